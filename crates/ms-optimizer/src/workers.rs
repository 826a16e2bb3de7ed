//! Worker pool sizing and per-job device assignment.

use std::fmt;

use crossbeam_channel::{bounded, Receiver, Sender};
use ms_types::{DeviceStrategy, DispatchSettings};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Environment variable consulted when no accelerator count is configured.
pub const ACCELERATOR_ENV: &str = "MOLSWEEP_ACCELERATORS";

/// Compute device a job trains on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Device {
    Cpu,
    Accelerator(usize),
}

impl fmt::Display for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Device::Cpu => write!(f, "cpu"),
            Device::Accelerator(i) => write!(f, "accel:{i}"),
        }
    }
}

/// Number of hardware threads, at least 1.
pub fn available_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Pool size: `min(max_workers, available parallelism)`, at least 1.
pub fn worker_count(max_workers: usize) -> usize {
    max_workers.min(available_parallelism()).max(1)
}

/// Accelerator count: configured value, else the environment, else none.
pub fn accelerator_count<F>(configured: Option<usize>, lookup: F) -> usize
where
    F: Fn(&str) -> Option<String>,
{
    configured
        .or_else(|| lookup(ACCELERATOR_ENV).and_then(|v| v.trim().parse().ok()))
        .unwrap_or(0)
}

/// Allocation plan produced before dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerAllocation {
    /// Worker threads to start.
    pub num_workers: usize,
    /// Accelerators jobs may be placed on.
    pub accelerators: usize,
    /// Effective strategy after accounting for available accelerators.
    pub strategy: DeviceStrategy,
    /// Several workers will share a single accelerator.
    pub contention: bool,
}

impl WorkerAllocation {
    /// Plan for `jobs` jobs. Never starts more workers than jobs.
    pub fn plan(settings: &DispatchSettings, jobs: usize, accelerators: usize) -> Self {
        let num_workers = worker_count(settings.max_workers).min(jobs.max(1));

        let strategy = match settings.device_strategy {
            DeviceStrategy::Cpu => DeviceStrategy::Cpu,
            _ if accelerators == 0 => DeviceStrategy::Cpu,
            other => other,
        };

        let contention =
            num_workers > 1 && accelerators == 1 && strategy == DeviceStrategy::RoundRobin;
        if contention {
            warn!(
                "{} workers will share a single accelerator; use device_strategy: exclusive to serialize access",
                num_workers
            );
        }

        Self {
            num_workers,
            accelerators,
            strategy,
            contention,
        }
    }
}

/// Hands out devices to jobs according to the planned strategy.
#[derive(Debug)]
pub struct DeviceAllocator {
    mode: AllocatorMode,
}

#[derive(Debug)]
enum AllocatorMode {
    Cpu,
    RoundRobin { count: usize },
    Exclusive { tx: Sender<usize>, rx: Receiver<usize> },
}

impl DeviceAllocator {
    pub fn new(plan: &WorkerAllocation) -> Self {
        let mode = match plan.strategy {
            DeviceStrategy::Cpu => AllocatorMode::Cpu,
            DeviceStrategy::RoundRobin => AllocatorMode::RoundRobin {
                count: plan.accelerators,
            },
            DeviceStrategy::Exclusive => {
                let (tx, rx) = bounded(plan.accelerators);
                for i in 0..plan.accelerators {
                    // Capacity equals the token count.
                    let _ = tx.try_send(i);
                }
                AllocatorMode::Exclusive { tx, rx }
            }
        };
        info!("Device allocation: {:?}", plan.strategy);
        Self { mode }
    }

    /// Device for a trial. In exclusive mode this blocks until a token is free;
    /// the token returns when the lease is dropped.
    pub fn acquire(&self, trial: usize) -> DeviceLease {
        match &self.mode {
            AllocatorMode::Cpu => DeviceLease::shared(Device::Cpu),
            AllocatorMode::RoundRobin { count } if *count > 0 => {
                DeviceLease::shared(Device::Accelerator(trial % count))
            }
            AllocatorMode::RoundRobin { .. } => DeviceLease::shared(Device::Cpu),
            AllocatorMode::Exclusive { tx, rx } => match rx.recv() {
                Ok(token) => DeviceLease {
                    device: Device::Accelerator(token),
                    return_to: Some(tx.clone()),
                },
                Err(_) => DeviceLease::shared(Device::Cpu),
            },
        }
    }
}

/// A device held for the duration of one job.
#[derive(Debug)]
pub struct DeviceLease {
    device: Device,
    return_to: Option<Sender<usize>>,
}

impl DeviceLease {
    fn shared(device: Device) -> Self {
        Self {
            device,
            return_to: None,
        }
    }

    pub fn device(&self) -> Device {
        self.device
    }
}

impl Drop for DeviceLease {
    fn drop(&mut self) {
        if let (Some(tx), Device::Accelerator(token)) = (self.return_to.take(), self.device) {
            let _ = tx.send(token);
        }
    }
}
