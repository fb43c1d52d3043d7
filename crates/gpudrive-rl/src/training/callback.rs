//! Training callbacks.

use crate::env::EnvInfo;
use crate::log::Metrics;
use crate::tracking::RunHandle;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// State after one environment step.
pub struct StepContext<'a> {
    /// Timesteps (world-steps) collected so far
    pub num_timesteps: u64,
    pub rewards: &'a [f32],
    pub infos: &'a [EnvInfo],
    /// Which slots held a live agent during the step
    pub mask: &'a [bool],
}

/// Summary of one collect-and-update iteration.
#[derive(Clone, Debug)]
pub struct RolloutSummary {
    pub iteration: u64,
    pub num_timesteps: u64,
    pub learning_rate: f64,
    /// `train/*` statistics of the update
    pub train_metrics: Metrics,
}

/// Hooks into [`super::Ippo::learn`].
pub trait TrainingCallback {
    fn on_training_start(&mut self, _total_timesteps: u64) {}

    /// Called after every environment step. Returning `false` stops training.
    fn on_step(&mut self, _ctx: &StepContext<'_>) -> bool {
        true
    }

    fn on_rollout_end(&mut self, _summary: &RolloutSummary) {}

    fn on_training_end(&mut self, _num_timesteps: u64) {}
}

/// Callback that does nothing.
pub struct NoCallback;

impl TrainingCallback for NoCallback {}

#[derive(Clone, Copy, Debug)]
struct EpisodeRecord {
    reward: f32,
    goal_achieved: bool,
    collided: bool,
    off_road: bool,
}

/// Aggregates finished agent episodes and forwards metrics to a tracked run.
///
/// Every `log_freq` rollouts it logs, over the last `window` finished episodes:
/// - `metrics/mean_episode_reward_per_agent`
/// - `metrics/perc_goal_achieved`, `metrics/perc_off_road`, `metrics/perc_veh_collisions`
/// - `charts/num_finished_episodes` (total since the start of training)
///
/// together with the update's `train/*` statistics.
///
/// With an interrupt flag attached, training stops at the first step after the
/// flag is raised.
pub struct MultiAgentCallback<'a> {
    run: &'a mut RunHandle,
    interrupt: Option<&'a AtomicBool>,
    log_freq: usize,
    window: usize,
    episodes: VecDeque<EpisodeRecord>,
    num_finished: u64,
    rollouts: u64,
}

impl<'a> MultiAgentCallback<'a> {
    pub fn new(run: &'a mut RunHandle, log_freq: usize, window: usize) -> Self {
        Self {
            run,
            interrupt: None,
            log_freq: log_freq.max(1),
            window: window.max(1),
            episodes: VecDeque::new(),
            num_finished: 0,
            rollouts: 0,
        }
    }

    /// Stop training once `flag` is set, e.g. from a signal handler.
    pub fn with_interrupt(mut self, flag: &'a AtomicBool) -> Self {
        self.interrupt = Some(flag);
        self
    }

    pub fn num_finished_episodes(&self) -> u64 {
        self.num_finished
    }

    fn record(&mut self, info: &EnvInfo) {
        let Some(reward) = info.episode_return else {
            return;
        };
        let flag = |key| info.get(key).is_some_and(|v| v > 0.5);
        self.episodes.push_back(EpisodeRecord {
            reward,
            goal_achieved: flag("goal_achieved"),
            collided: flag("collided"),
            off_road: flag("off_road"),
        });
        if self.episodes.len() > self.window {
            self.episodes.pop_front();
        }
        self.num_finished += 1;
    }

    /// Aggregated episode metrics over the current window.
    pub fn episode_metrics(&self) -> Metrics {
        let mut metrics = Metrics::new();
        metrics.insert(
            "charts/num_finished_episodes".to_string(),
            self.num_finished as f64,
        );
        if self.episodes.is_empty() {
            return metrics;
        }

        let n = self.episodes.len() as f64;
        let fraction = |pred: fn(&EpisodeRecord) -> bool| {
            self.episodes.iter().filter(|e| pred(e)).count() as f64 / n
        };
        let mean_reward = self.episodes.iter().map(|e| e.reward as f64).sum::<f64>() / n;

        metrics.insert("metrics/mean_episode_reward_per_agent".to_string(), mean_reward);
        metrics.insert(
            "metrics/perc_goal_achieved".to_string(),
            fraction(|e| e.goal_achieved),
        );
        metrics.insert("metrics/perc_off_road".to_string(), fraction(|e| e.off_road));
        metrics.insert(
            "metrics/perc_veh_collisions".to_string(),
            fraction(|e| e.collided),
        );
        metrics
    }
}

impl TrainingCallback for MultiAgentCallback<'_> {
    fn on_step(&mut self, ctx: &StepContext<'_>) -> bool {
        for info in ctx.infos.iter().filter(|i| i.is_episode_end()) {
            self.record(info);
        }
        if self.interrupt.is_some_and(|flag| flag.load(Ordering::SeqCst)) {
            tracing::warn!(
                run_id = self.run.run_id(),
                step = ctx.num_timesteps,
                "Interrupted, stopping training"
            );
            return false;
        }
        true
    }

    fn on_rollout_end(&mut self, summary: &RolloutSummary) {
        self.rollouts += 1;
        if self.rollouts % self.log_freq as u64 != 0 {
            return;
        }

        let mut metrics = self.episode_metrics();
        metrics.extend(summary.train_metrics.iter().map(|(k, v)| (k.clone(), *v)));
        self.run.log(summary.num_timesteps, &metrics);

        tracing::debug!(
            step = summary.num_timesteps,
            iteration = summary.iteration,
            finished_episodes = self.num_finished,
            "Logged rollout metrics"
        );
    }
}
