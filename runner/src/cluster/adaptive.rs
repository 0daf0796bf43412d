use super::ClusterError;
use parking_lot::FairMutex;
use serde::{Deserialize, Serialize};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use tracing::debug;

/// Bounds and targets for adaptive worker pool sizing
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct AdaptivePolicy {
    pub minimum: usize,
    pub maximum: usize,
    /// desired wall clock time of the outstanding work in seconds
    #[serde(default = "default_target_duration")]
    pub target_duration: f64,
    /// largest multiplicative step of a single adjustment
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f64,
    /// consecutive observations below the current size before shrinking
    #[serde(default = "default_wait_count")]
    pub wait_count: u32,
    /// seconds without any further change after an adjustment
    #[serde(default)]
    pub cooldown: f64,
}

fn default_target_duration() -> f64 {
    5.0
}

fn default_scale_factor() -> f64 {
    2.0
}

fn default_wait_count() -> u32 {
    3
}

impl AdaptivePolicy {
    pub fn new(minimum: usize, maximum: usize, target_duration: Duration, scale_factor: f64) -> Self {
        Self {
            minimum,
            maximum,
            target_duration: target_duration.as_secs_f64(),
            scale_factor,
            wait_count: default_wait_count(),
            cooldown: 0.0,
        }
    }

    pub fn validate(&self) -> Result<(), ClusterError> {
        let problem = if self.minimum == 0 {
            "minimum must be at least one worker"
        } else if self.maximum < self.minimum {
            "maximum must not be below minimum"
        } else if !(self.target_duration.is_finite() && self.target_duration > 0.0) {
            "target_duration must be a positive number of seconds"
        } else if !(self.scale_factor.is_finite() && self.scale_factor > 1.0) {
            "scale_factor must be greater than one"
        } else if !(self.cooldown.is_finite() && self.cooldown >= 0.0) {
            "cooldown must not be negative"
        } else {
            return Ok(());
        };

        Err(ClusterError::InvalidPolicy(problem.to_string()))
    }

    pub fn clamp(&self, workers: usize) -> usize {
        workers.clamp(self.minimum, self.maximum)
    }

    fn cooldown(&self) -> Duration {
        Duration::from_secs_f64(self.cooldown)
    }
}

/// Feedback controller steering the worker count toward `target_duration`
#[derive(Debug, Clone)]
pub struct AdaptiveController {
    policy: AdaptivePolicy,
    low_observations: u32,
    last_change: Option<Instant>,
}

impl AdaptiveController {
    pub fn new(policy: AdaptivePolicy) -> Result<Self, ClusterError> {
        policy.validate()?;

        Ok(Self {
            policy,
            low_observations: 0,
            last_change: None,
        })
    }

    pub fn policy(&self) -> &AdaptivePolicy {
        &self.policy
    }

    /// workers needed to finish `pending` units of `unit` duration within the target
    pub fn desired(&self, pending: u64, unit: Duration) -> usize {
        let work = pending as f64 * unit.as_secs_f64();
        let workers = (work / self.policy.target_duration).ceil() as usize;

        self.policy.clamp(workers)
    }

    pub fn observe(&mut self, current: usize, pending: u64, unit: Duration) -> Option<usize> {
        self.observe_at(current, pending, unit, Instant::now())
    }

    /// Feed one observation taken at `now`, returns the new worker count if it should change
    pub fn observe_at(
        &mut self,
        current: usize,
        pending: u64,
        unit: Duration,
        now: Instant,
    ) -> Option<usize> {
        // out of bounds pools are corrected regardless of hysteresis
        let bounded = self.policy.clamp(current);
        if bounded != current {
            self.low_observations = 0;
            return self.change(bounded, now);
        }

        if let Some(last_change) = self.last_change {
            if now.saturating_duration_since(last_change) < self.policy.cooldown() {
                return None;
            }
        }

        let desired = self.desired(pending, unit);
        let factor = self.policy.scale_factor;

        let target = if desired > current {
            self.low_observations = 0;
            let step = ((current as f64 * factor).ceil() as usize).max(current + 1);

            desired.min(step)
        } else if desired < current {
            self.low_observations += 1;
            if self.low_observations < self.policy.wait_count {
                debug!(
                    desired,
                    current,
                    observations = self.low_observations,
                    "Holding worker count until shrinking is confirmed"
                );
                return None;
            }
            self.low_observations = 0;
            let step = ((current as f64 / factor).floor() as usize).max(1);

            desired.max(step)
        } else {
            self.low_observations = 0;
            return None;
        };

        let target = self.policy.clamp(target);
        if target == current {
            None
        } else {
            self.change(target, now)
        }
    }

    fn change(&mut self, target: usize, now: Instant) -> Option<usize> {
        self.last_change = Some(now);

        Some(target)
    }
}

#[derive(Debug, Default)]
struct Slot {
    generation: u64,
    controller: Option<AdaptiveController>,
}

/// Shared, optional adaptive controller of a cluster
#[derive(Debug, Clone, Default)]
pub struct Autoscaler {
    slot: Arc<FairMutex<Slot>>,
}

impl Autoscaler {
    pub fn enable(&self, policy: AdaptivePolicy) -> Result<AdaptiveHandle, ClusterError> {
        let controller = AdaptiveController::new(policy.clone())?;
        let mut slot = self.slot.lock();

        slot.generation += 1;
        slot.controller = Some(controller);

        Ok(AdaptiveHandle {
            slot: self.slot.clone(),
            generation: slot.generation,
            policy,
        })
    }

    pub fn disable(&self) {
        self.slot.lock().controller = None;
    }

    pub fn is_enabled(&self) -> bool {
        self.slot.lock().controller.is_some()
    }

    pub fn policy(&self) -> Option<AdaptivePolicy> {
        self.slot
            .lock()
            .controller
            .as_ref()
            .map(|controller| controller.policy().clone())
    }

    /// forward an observation to the active controller, if any
    pub fn observe(&self, current: usize, pending: u64, unit: Duration) -> Option<usize> {
        self.slot
            .lock()
            .controller
            .as_mut()
            .and_then(|controller| controller.observe(current, pending, unit))
    }
}

/// Handle to an enabled adaptive policy, stopping it disables autoscaling again
#[derive(Debug, Clone)]
pub struct AdaptiveHandle {
    slot: Arc<FairMutex<Slot>>,
    generation: u64,
    policy: AdaptivePolicy,
}

impl AdaptiveHandle {
    pub fn policy(&self) -> &AdaptivePolicy {
        &self.policy
    }

    /// false once stopped or replaced by a newer policy
    pub fn is_active(&self) -> bool {
        let slot = self.slot.lock();

        slot.generation == self.generation && slot.controller.is_some()
    }

    /// disable the policy unless it was already replaced by a newer one
    pub fn stop(self) {
        let mut slot = self.slot.lock();

        if slot.generation == self.generation {
            slot.controller = None;
        }
    }
}
