use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;

const CONFIG: &str = "\
reward_type: weighted_combination
collision_weight: -0.5
goal_achieved_weight: 1.0
off_road_weight: -0.5
episode_len: 20
remove_non_vehicles: true
polyline_reduction_threshold: 0.1
observation_radius: 50.0
mlp_class: feed_forward
device: cpu
num_worlds: 2
n_steps: 10
num_minibatches: 2
k_unique_scenes: 1
selection_discipline: K_UNIQUE_N
project_name: ippo-cli
group_name: tests
sync_tensorboard: false
tags: [ippo]
wandb_mode: disabled
seed: 42
verbose: 0
gamma: 0.99
gae_lambda: 0.95
vf_coef: 0.5
clip_range: 0.2
lr: 0.0003
ent_coef: 0.0001
n_epochs: 2
total_timesteps: 20
";

const SCENE: &str = r#"{"objects": [{"position": {"x": 0, "y": 0}, "goalPosition": {"x": 30, "y": 0}}]}"#;

/// Write a config whose `data_dir` holds `num_scenes` scene files.
fn write_config(dir: &Path, extra: &str, num_scenes: usize) -> std::path::PathBuf {
    let scenes = dir.join("scenes");
    fs::create_dir_all(&scenes).unwrap();
    for i in 0..num_scenes {
        fs::write(scenes.join(format!("scene_{}.json", i)), SCENE).unwrap();
    }
    let path = dir.join("config.yaml");
    let body = format!(
        "{}data_dir: {}\ntracking_dir: {}\nlog_dir: {}\n{}",
        CONFIG,
        scenes.display(),
        dir.join("tracking").display(),
        dir.join("runs").display(),
        extra
    );
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn test_cli_help() {
    let mut cmd = Command::cargo_bin("ippo").unwrap();
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("IPPO - Independent PPO for multi-agent driving"))
        .stdout(predicate::str::contains("check-config"));
}

#[test]
fn test_check_config() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "", 3);

    let mut cmd = Command::cargo_bin("ippo").unwrap();
    cmd.arg("check-config")
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Configuration OK"))
        .stdout(predicate::str::contains("Ffn/FeedForwardPolicy"))
        .stdout(predicate::str::contains("2 worlds x 10 steps = 20 samples"));
}

#[test]
fn test_check_config_reports_invalid_fields() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "", 1);
    let contents = fs::read_to_string(&config)
        .unwrap()
        .replace("num_minibatches: 2", "num_minibatches: 3");
    fs::write(&config, contents).unwrap();

    let mut cmd = Command::cargo_bin("ippo").unwrap();
    cmd.arg("check-config")
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("num_minibatches"));
}

#[test]
fn test_missing_config_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = Command::cargo_bin("ippo").unwrap();
    cmd.arg("check-config")
        .arg("--config")
        .arg(dir.path().join("absent.yaml"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("absent.yaml"));
}

#[test]
fn test_scenes_cycles_unique_scenes() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "", 3);

    let mut cmd = Command::cargo_bin("ippo").unwrap();
    cmd.arg("scenes")
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("K_UNIQUE_N, 2 worlds"))
        .stdout(predicate::str::contains("scene_").count(2));
}

#[test]
fn test_scenes_pad_n() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "", 1);
    let contents = fs::read_to_string(&config)
        .unwrap()
        .replace("selection_discipline: K_UNIQUE_N", "selection_discipline: PAD_N");
    fs::write(&config, contents).unwrap();

    let mut cmd = Command::cargo_bin("ippo").unwrap();
    cmd.arg("scenes")
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("PAD_N, 2 worlds"))
        .stdout(predicate::str::contains("scene_0.json").count(2));
}

#[test]
#[cfg(not(feature = "torch"))]
fn test_train_requires_torch() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "", 1);

    let mut cmd = Command::cargo_bin("ippo").unwrap();
    cmd.arg("train")
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("neural-network backend"));
}

#[test]
#[cfg(feature = "torch")]
fn test_train_short_run() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path(), "", 1);

    let mut cmd = Command::cargo_bin("ippo").unwrap();
    cmd.arg("train")
        .arg("--config")
        .arg(&config)
        .assert()
        .success()
        .stdout(predicate::str::contains("Timesteps:   20"))
        .stdout(predicate::str::contains("Iterations:  1"));
}
