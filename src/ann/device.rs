//! Compute device selection for index builds.
//!
//! Hardware offload is decided by asking each registered
//! [`AcceleratorBackend`] whether it can run right now. When one can, the
//! trained index is mirrored onto it in 16-bit form for the duration of the
//! build; the persisted artifact is always the portable CPU form.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ann::ivf::IvfPqIndex;
use crate::error::ExplorerResult;

/// A hardware backend that can host a copy of a trained index.
pub trait AcceleratorBackend: Send + Sync {
    /// Short backend name used in logs and index metadata.
    fn name(&self) -> &str;

    /// Runtime capability check. Must not assume availability.
    fn is_available(&self) -> bool;

    /// Mirrors a trained and populated index onto the device.
    fn upload(&self, index: &IvfPqIndex, half_precision: bool) -> ExplorerResult<()>;
}

/// Where an index build runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComputeDevice {
    Cpu,
    Accelerator { name: String },
}

impl fmt::Display for ComputeDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeDevice::Cpu => f.write_str("cpu"),
            ComputeDevice::Accelerator { name } => write!(f, "accelerator ({name})"),
        }
    }
}

/// Registered accelerator backends, tried in registration order.
#[derive(Clone, Default)]
pub struct DeviceRegistry {
    backends: Vec<Arc<dyn AcceleratorBackend>>,
}

impl DeviceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, backend: Arc<dyn AcceleratorBackend>) {
        self.backends.push(backend);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.backends.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.backends.is_empty()
    }

    /// Picks the first available backend, or the CPU.
    ///
    /// With `allow_accelerator` off the CPU is always selected.
    #[must_use]
    pub fn select(&self, allow_accelerator: bool) -> (ComputeDevice, Option<Arc<dyn AcceleratorBackend>>) {
        if !allow_accelerator {
            return (ComputeDevice::Cpu, None);
        }
        for backend in &self.backends {
            if backend.is_available() {
                tracing::info!("Accelerator '{}' is available", backend.name());
                return (
                    ComputeDevice::Accelerator {
                        name: backend.name().to_string(),
                    },
                    Some(Arc::clone(backend)),
                );
            }
            tracing::debug!("Accelerator '{}' is not available", backend.name());
        }
        (ComputeDevice::Cpu, None)
    }
}

impl fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.backends.iter().map(|b| b.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeBackend {
        name: &'static str,
        available: bool,
    }

    impl AcceleratorBackend for FakeBackend {
        fn name(&self) -> &str {
            self.name
        }
        fn is_available(&self) -> bool {
            self.available
        }
        fn upload(&self, _index: &IvfPqIndex, _half_precision: bool) -> ExplorerResult<()> {
            Ok(())
        }
    }

    #[test]
    fn test_empty_registry_reports_cpu() {
        let registry = DeviceRegistry::new();
        let (device, backend) = registry.select(true);
        assert_eq!(device, ComputeDevice::Cpu);
        assert!(backend.is_none());
    }

    #[test]
    fn test_first_available_backend_wins() {
        let mut registry = DeviceRegistry::new();
        registry.register(Arc::new(FakeBackend {
            name: "offline",
            available: false,
        }));
        registry.register(Arc::new(FakeBackend {
            name: "ready",
            available: true,
        }));

        let (device, backend) = registry.select(true);
        assert_eq!(
            device,
            ComputeDevice::Accelerator {
                name: "ready".to_string()
            }
        );
        assert_eq!(backend.unwrap().name(), "ready");

        let (device, _) = registry.select(false);
        assert_eq!(device, ComputeDevice::Cpu);
    }
}
