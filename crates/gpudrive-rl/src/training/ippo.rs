//! Independent PPO trainer.
//!
//! Every agent slot of the vectorized environment is trained with one shared
//! policy; slots without a live agent are masked out of the update.

use super::backend::{PolicyBackend, UpdateParams, UpdateStats};
use super::buffer::RolloutBuffer;
use super::callback::{RolloutSummary, StepContext, TrainingCallback};
use super::config::IppoConfig;
use crate::env::VecEnvBackend;
use crate::log::{CompositeLogger, ConsoleLogger, MetricLogger, Metrics, NoOpLogger};
use crate::schedule::Schedule;
use crate::IppoError;
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::time::Instant;

/// Outcome of [`Ippo::learn`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LearnOutcome {
    pub num_timesteps: u64,
    pub iterations: u64,
    /// A callback asked to stop before the timestep budget was reached
    pub stopped_early: bool,
}

/// IPPO trainer
pub struct Ippo {
    config: IppoConfig,
    backend: Box<dyn PolicyBackend>,
    schedule: Schedule,
    logger: Box<dyn MetricLogger>,
    rng: StdRng,
    /// Timesteps collected so far, counted in world-steps
    num_timesteps: u64,
    iterations: u64,
    learning_rate: f64,
}

impl Ippo {
    pub fn new(config: IppoConfig, backend: Box<dyn PolicyBackend>, schedule: Schedule) -> Self {
        let rng = StdRng::seed_from_u64(config.seed);
        let learning_rate = schedule.initial();
        Self {
            config,
            backend,
            schedule,
            logger: Box::new(NoOpLogger),
            rng,
            num_timesteps: 0,
            iterations: 0,
            learning_rate,
        }
    }

    /// Metric backend for per-update statistics (replaces the default).
    pub fn with_logger(mut self, logger: Box<dyn MetricLogger>) -> Self {
        self.logger = logger;
        self
    }

    /// The loggers implied by the configuration: console output when verbose,
    /// TensorBoard event files under `tensorboard_log/<run_id>` when enabled.
    pub fn default_logger(config: &IppoConfig, run_id: &str) -> Box<dyn MetricLogger> {
        let mut composite = CompositeLogger::default();
        if config.verbose >= 1 {
            composite.add(Box::new(ConsoleLogger::new()));
        }
        #[cfg(feature = "tensorboard")]
        if let Some(dir) = &config.tensorboard_log {
            composite.add(Box::new(crate::log::TensorBoardLogger::for_run(dir, run_id)));
        }
        #[cfg(not(feature = "tensorboard"))]
        if config.tensorboard_log.is_some() {
            tracing::debug!(run_id, "TensorBoard logging requires the `tensorboard` feature");
        }
        if composite.is_empty() {
            return Box::new(NoOpLogger);
        }
        Box::new(composite)
    }

    pub fn config(&self) -> &IppoConfig {
        &self.config
    }

    pub fn num_timesteps(&self) -> u64 {
        self.num_timesteps
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn update_params(&self) -> UpdateParams {
        UpdateParams {
            clip_range: self.config.clip_range,
            ent_coef: self.config.ent_coef,
            vf_coef: self.config.vf_coef,
            max_grad_norm: self.config.max_grad_norm,
        }
    }

    fn progress_bar(&self, total_timesteps: u64) -> Option<ProgressBar> {
        if self.config.verbose == 0 {
            return None;
        }
        let pb = ProgressBar::new(total_timesteps);
        let style = ProgressStyle::default_bar()
            .template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
            )
            .map(|s| s.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        pb.set_style(style);
        Some(pb)
    }

    /// Train until `total_timesteps` world-steps have been collected or the
    /// callback asks to stop.
    pub fn learn(
        &mut self,
        env: &mut dyn VecEnvBackend,
        total_timesteps: u64,
        callback: &mut dyn TrainingCallback,
    ) -> crate::Result<LearnOutcome> {
        let num_envs = env.num_envs();
        let num_worlds = env.num_worlds() as u64;
        let mut buffer = RolloutBuffer::new(self.config.n_steps, num_envs, env.observation_dim());
        let (mut obs, mut alive) = env.reset()?;
        let start = Instant::now();
        let progress = self.progress_bar(total_timesteps);
        let mut stopped_early = false;

        tracing::info!(
            total_timesteps,
            num_envs,
            n_steps = self.config.n_steps,
            batch_size = self.config.batch_size,
            "Starting training"
        );
        callback.on_training_start(total_timesteps);

        while self.num_timesteps < total_timesteps {
            // Collect rollout
            buffer.reset();
            while !buffer.is_full() {
                let output = self.backend.act(&obs)?;
                if output.actions.len() != num_envs
                    || output.log_probs.len() != num_envs
                    || output.values.len() != num_envs
                {
                    return Err(IppoError::Training(format!(
                        "policy produced {} actions for {} environments",
                        output.actions.len(),
                        num_envs
                    )));
                }

                let actions = Array2::from_shape_vec((num_envs, 1), output.actions.clone())
                    .map_err(|e| IppoError::Training(e.to_string()))?;
                let result = env.step(&actions)?;
                buffer.add(
                    &obs,
                    &output.actions,
                    &output.log_probs,
                    &output.values,
                    &result.rewards,
                    &result.dones(),
                    &alive,
                );
                self.num_timesteps += num_worlds;

                let keep_going = callback.on_step(&StepContext {
                    num_timesteps: self.num_timesteps,
                    rewards: &result.rewards,
                    infos: &result.infos,
                    mask: &alive,
                });
                obs = result.observations;
                alive = result.alive;

                if !keep_going {
                    stopped_early = true;
                    break;
                }
            }
            if stopped_early {
                tracing::info!(step = self.num_timesteps, "Training stopped by callback");
                break;
            }

            // Compute returns and advantages
            let last_values = self.backend.values(&obs)?;
            buffer.compute_returns_and_advantages(
                &last_values,
                self.config.gamma,
                self.config.gae_lambda,
            );

            let progress_remaining =
                1.0 - self.num_timesteps as f64 / total_timesteps.max(1) as f64;
            self.learning_rate = self.schedule.value(progress_remaining);
            self.backend.set_learning_rate(self.learning_rate);

            let stats = self.update(&buffer)?;
            self.iterations += 1;

            let train_metrics = self.train_metrics(&stats, &buffer, start.elapsed().as_secs_f64());
            self.logger.log_metrics(&train_metrics, self.num_timesteps);
            callback.on_rollout_end(&RolloutSummary {
                iteration: self.iterations,
                num_timesteps: self.num_timesteps,
                learning_rate: self.learning_rate,
                train_metrics,
            });

            if let Some(pb) = &progress {
                pb.set_position(self.num_timesteps.min(total_timesteps));
                pb.set_message(format!("Loss: {:.4} LR: {:.2e}", stats.loss, self.learning_rate));
            } else {
                tracing::debug!(
                    step = self.num_timesteps,
                    iteration = self.iterations,
                    loss = stats.loss,
                    "Update complete"
                );
            }
        }

        if let Some(pb) = &progress {
            pb.finish_with_message("Training complete");
        }
        callback.on_training_end(self.num_timesteps);
        self.logger.close();

        tracing::info!(
            step = self.num_timesteps,
            iterations = self.iterations,
            elapsed_secs = start.elapsed().as_secs_f64(),
            "Training finished"
        );

        Ok(LearnOutcome {
            num_timesteps: self.num_timesteps,
            iterations: self.iterations,
            stopped_early,
        })
    }

    /// Run `n_epochs` passes of minibatch updates; returns mean statistics.
    fn update(&mut self, buffer: &RolloutBuffer) -> crate::Result<UpdateStats> {
        if buffer.num_valid() == 0 {
            tracing::warn!(
                step = self.num_timesteps,
                "Rollout has no valid samples, skipping update"
            );
            return Ok(UpdateStats::default());
        }

        let params = self.update_params();
        let mut total = UpdateStats::default();
        let mut count = 0usize;

        for epoch in 0..self.config.n_epochs {
            let batches = buffer.minibatches(
                self.config.batch_size,
                self.config.normalize_advantage,
                &mut self.rng,
            );
            for batch in &batches {
                let stats = self.backend.update(batch, &params)?;
                if !stats.is_finite() {
                    return Err(IppoError::Training(format!(
                        "non-finite loss in epoch {} of iteration {} (loss={}, value_loss={})",
                        epoch,
                        self.iterations + 1,
                        stats.loss,
                        stats.value_loss
                    )));
                }
                total.accumulate(&stats);
                count += 1;
            }
        }

        Ok(total.scaled(1.0 / count.max(1) as f64))
    }

    fn train_metrics(&self, stats: &UpdateStats, buffer: &RolloutBuffer, elapsed: f64) -> Metrics {
        let mut metrics = Metrics::new();
        let mut put = |name: &str, value: f64| {
            metrics.insert(format!("train/{}", name), value);
        };
        put("loss", stats.loss);
        put("policy_gradient_loss", stats.policy_loss);
        put("value_loss", stats.value_loss);
        put("entropy_loss", -stats.entropy);
        put("approx_kl", stats.approx_kl);
        put("clip_fraction", stats.clip_fraction);
        put("learning_rate", self.learning_rate);
        put("n_updates", (self.iterations * self.config.n_epochs as u64) as f64);
        let explained = buffer.explained_variance();
        if explained.is_finite() {
            put("explained_variance", explained);
        }
        if elapsed > 0.0 {
            put("fps", self.num_timesteps as f64 / elapsed);
        }
        metrics
    }
}
