//! # Pool configuration.
//!
//! Provides [`PoolConfig`], the immutable settings a [`Pool`](crate::Pool) is
//! built from. Closures (aux factory, disk log function) are attached through
//! [`PoolBuilder`](crate::PoolBuilder), never through this data struct, so the
//! config can be loaded from any serde format.
//!
//! ## Sentinel values
//! - `queue_capacity = 0` → rendezvous channel (`push` waits for a worker)
//! - `disk = None` → in-memory channel backend

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::PoolError;
use crate::queue::DiskConfig;

/// Settings of a worker pool.
///
/// ## Field semantics
/// - `worker_count`: number of worker slots (min 1)
/// - `queue_capacity`: channel buffer size (`0` = rendezvous); ignored with `disk`
/// - `supervisor_interval`: health-check tick period (min 1s)
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by Bus)
/// - `disk`: switches the backend to the disk-spillover queue
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of workers consuming the queue concurrently.
    pub worker_count: usize,

    /// Capacity of the in-memory channel.
    ///
    /// - `0` = rendezvous: `push` completes once a worker took the item
    /// - `n > 0` = bounded: `push` waits only while `n` items are buffered
    pub queue_capacity: usize,

    /// Period of the supervision loop.
    ///
    /// A panicked or stopped worker slot is respawned on the next tick, so this
    /// bounds recovery latency.
    #[serde(rename = "supervisor_interval_ms", with = "duration_millis")]
    pub supervisor_interval: Duration,

    /// Capacity of the event bus broadcast channel ring buffer.
    pub bus_capacity: usize,

    /// Disk backend settings; `None` keeps the queue in memory.
    pub disk: Option<DiskConfig>,
}

impl PoolConfig {
    /// Checks the invariants a pool relies on.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.worker_count == 0 {
            return Err(PoolError::invalid("worker_count must be >= 1"));
        }
        if self.supervisor_interval < Duration::from_secs(1) {
            return Err(PoolError::invalid(format!(
                "supervisor_interval must be >= 1s, got {:?}",
                self.supervisor_interval
            )));
        }
        if let Some(disk) = &self.disk {
            disk.validate().map_err(PoolError::invalid)?;
        }
        Ok(())
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// True when the pool persists its queue on disk.
    #[inline]
    pub fn is_disk_backed(&self) -> bool {
        self.disk.is_some()
    }
}

impl Default for PoolConfig {
    /// Default configuration:
    ///
    /// - `worker_count = 32`
    /// - `queue_capacity = 0` (rendezvous)
    /// - `supervisor_interval = 1s`
    /// - `bus_capacity = 1024`
    /// - `disk = None`
    fn default() -> Self {
        Self {
            worker_count: 32,
            queue_capacity: 0,
            supervisor_interval: Duration::from_secs(1),
            bus_capacity: 1024,
            disk: None,
        }
    }
}

/// Serde support for `Duration` as milliseconds.
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = PoolConfig::default();
        assert_eq!(cfg.worker_count, 32);
        assert_eq!(cfg.queue_capacity, 0);
        assert_eq!(cfg.supervisor_interval, Duration::from_secs(1));
        assert!(!cfg.is_disk_backed());
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_zero_workers_and_short_interval() {
        let cfg = PoolConfig {
            worker_count: 0,
            ..PoolConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(PoolError::InvalidConfig { .. })));

        let cfg = PoolConfig {
            supervisor_interval: Duration::from_millis(200),
            ..PoolConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_incoherent_disk_limits() {
        let mut disk = DiskConfig::new("q", "/tmp/q");
        disk.sync_every = 0;
        let cfg = PoolConfig {
            disk: Some(disk),
            ..PoolConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn loads_from_json_with_defaults() {
        let cfg: PoolConfig = serde_json::from_str(
            r#"{
                "worker_count": 4,
                "supervisor_interval_ms": 2500,
                "disk": { "name": "jobs", "dir": "/var/lib/jobs", "max_total_bytes": 4096 }
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.worker_count, 4);
        assert_eq!(cfg.supervisor_interval, Duration::from_millis(2500));
        assert_eq!(cfg.bus_capacity, 1024);

        let disk = cfg.disk.unwrap();
        assert_eq!(disk.name, "jobs");
        assert_eq!(disk.max_total_bytes, 4096);
        assert_eq!(disk.sync_every, DiskConfig::default().sync_every);
    }
}
