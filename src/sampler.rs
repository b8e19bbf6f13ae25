//! Fixed-step pose sampling for the streaming side

use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::{Config, DEFAULT_TICK_HZ};
use crate::connection::ServerHandle;
use crate::protocol::Message;
use crate::types::{Pose, TelemetryRow};

/// Supplies the current transform of every tracked object, in configured order
pub trait PoseSource: Send + 'static {
    fn poses(&self) -> Vec<Pose>;
}

impl<F> PoseSource for F
where
    F: Fn() -> Vec<Pose> + Send + 'static,
{
    fn poses(&self) -> Vec<Pose> {
        self()
    }
}

/// Stamps samples with a fixed-step clock
///
/// The first sample is stamped 0 and every later one advances by
/// `1 / tick_hz`, regardless of wall-clock jitter.
#[derive(Debug, Clone)]
pub struct PoseSampler {
    step: f64,
    ticks: u64,
}

impl PoseSampler {
    /// Rates that are not positive and finite fall back to [`DEFAULT_TICK_HZ`]
    pub fn new(tick_hz: f64) -> Self {
        let tick_hz = if tick_hz.is_finite() && tick_hz > 0.0 {
            tick_hz
        } else {
            warn!(tick_hz, fallback = DEFAULT_TICK_HZ, "Invalid sampling rate");
            DEFAULT_TICK_HZ
        };
        Self { step: 1.0 / tick_hz, ticks: 0 }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.tick_hz)
    }

    /// Seconds between samples
    pub fn step(&self) -> Duration {
        Duration::from_secs_f64(self.step)
    }

    /// Timestamp the next sample will carry
    pub fn timestamp(&self) -> f32 {
        (self.ticks as f64 * self.step) as f32
    }

    /// Take one sample from `source` and advance the clock
    pub fn sample<S: PoseSource + ?Sized>(&mut self, source: &S) -> TelemetryRow {
        let row = TelemetryRow::new(self.timestamp(), source.poses());
        self.ticks += 1;
        row
    }

    /// Restart the clock at 0
    pub fn reset(&mut self) {
        self.ticks = 0;
    }

    /// Broadcast one sample per tick to every peer until `cancel` fires
    ///
    /// Returns the number of samples taken.
    pub async fn broadcast_loop<S: PoseSource>(
        mut self,
        source: S,
        server: ServerHandle,
        cancel: CancellationToken,
    ) -> u64 {
        let mut interval = tokio::time::interval(self.step());
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(step = ?self.step(), "Pose broadcast started");

        let mut samples = 0u64;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {}
            }
            let row = self.sample(&source);
            let reached = server.broadcast(&Message::TelemetryEntry(row));
            samples += 1;
            if samples % 500 == 0 {
                debug!(samples, reached, timestamp = self.timestamp(), "Pose broadcast progress");
            }
        }

        info!(samples, "Pose broadcast stopped");
        samples
    }
}

impl Default for PoseSampler {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Vector3;

    fn still_head() -> Vec<Pose> {
        vec![Pose::new(Vector3::new(0.0, 1.7, 0.0), Vector3::ZERO)]
    }

    #[test]
    fn first_sample_is_stamped_zero_and_steps_are_fixed() {
        let mut sampler = PoseSampler::new(50.0);
        let stamps: Vec<f32> = (0..4).map(|_| sampler.sample(&still_head).timestamp).collect();
        assert_eq!(stamps, vec![0.0, 0.02, 0.04, 0.06]);

        sampler.reset();
        assert_eq!(sampler.sample(&still_head).timestamp, 0.0);
    }

    #[test]
    fn invalid_rates_fall_back_to_default() {
        let fallback = PoseSampler::new(DEFAULT_TICK_HZ).step();
        for rate in [0.0, -10.0, f64::NAN, f64::INFINITY] {
            assert_eq!(PoseSampler::new(rate).step(), fallback, "rate {}", rate);
        }
    }

    #[test]
    fn long_runs_do_not_drift() {
        let mut sampler = PoseSampler::new(50.0);
        for _ in 0..50_000 {
            sampler.sample(&Vec::<Pose>::new);
        }
        assert!((sampler.timestamp() - 1000.0).abs() < 1e-3);
    }

    #[test]
    fn samples_carry_source_poses() {
        let mut sampler = PoseSampler::default();
        let row = sampler.sample(&still_head);
        assert_eq!(row.poses, still_head());
        assert_eq!(sampler.step(), Duration::from_millis(20));
    }
}
