use tracing::warn;

use crate::compile::KernelRegistry;
use crate::config::{Config, Device, OptimizerMode, DEFAULT_MAX_PASSES};

use super::OptimizeEvent;

#[derive(Debug, Clone)]
pub struct OptimizeConfig {
    pub device: Device,
    pub mode: OptimizerMode,
    /// Iteration budget of every fixed-point step.
    pub max_passes: usize,
}

impl Default for OptimizeConfig {
    fn default() -> Self {
        Self {
            device: Device::Cpu,
            mode: OptimizerMode::FastRun,
            max_passes: DEFAULT_MAX_PASSES,
        }
    }
}

impl From<&Config> for OptimizeConfig {
    fn from(config: &Config) -> Self {
        Self {
            device: config.device,
            mode: config.optimizer,
            max_passes: config.max_passes,
        }
    }
}

/// State threaded through every pass of one optimizer run.
pub struct OptimizeContext<'a> {
    cfg: OptimizeConfig,
    kernels: &'a KernelRegistry,
    events: Vec<OptimizeEvent>,
}

impl<'a> OptimizeContext<'a> {
    pub fn new(cfg: OptimizeConfig, kernels: &'a KernelRegistry) -> Self {
        Self {
            cfg,
            kernels,
            events: Vec::new(),
        }
    }

    pub fn config(&self) -> &OptimizeConfig {
        &self.cfg
    }

    pub fn kernels(&self) -> &'a KernelRegistry {
        self.kernels
    }

    /// Logs and stores a non-fatal event. Repeats of an identical event are
    /// dropped.
    pub fn record(&mut self, event: OptimizeEvent) {
        if self.events.contains(&event) {
            return;
        }
        warn!(%event, "optimizer event");
        self.events.push(event);
    }

    pub fn events(&self) -> &[OptimizeEvent] {
        &self.events
    }

    pub fn take_events(&mut self) -> Vec<OptimizeEvent> {
        std::mem::take(&mut self.events)
    }
}
