//! Sample collection and the collection cycle drivers
//!
//! This module provides the raw sample sources (the container stats tool and
//! the local host), the text normalizer and service resolver that turn raw
//! records into typed metrics, and the periodic loops driving them.

mod docker;
mod host;
mod r#loop;
mod service;
mod units;


pub use docker::{parse_snapshot, DockerStatsSource, ParsedSnapshot};
pub use host::SysinfoHostSampler;
pub use r#loop::{
    CollectionConfig, CollectionLoopBuilder, ContainerCollectionLoop, ContainerCycle,
    CycleOutcome, CycleReport, HostCollectionLoop, HostSamplingConfig, HostTick,
};
pub use service::{resolve_service_name, should_monitor, MonitoringPolicy, PolicyHandle};
pub use units::{normalize, parse_compound, parse_percentage, CompoundValue, QuantityKind};

use crate::error::CollectorError;
use crate::models::HostMetric;

pub use async_trait::async_trait;

/// Source of container stats snapshots
///
/// One call is one all-or-nothing invocation of the external tool. The
/// implementation carries no deadline of its own; callers bound it.
#[async_trait]
pub trait SampleSource: Send + Sync {
    /// Raw line-delimited output, one record per running container
    async fn snapshot(&self) -> Result<String, CollectorError>;
}

/// Source of host-wide samples
///
/// `sample` may block on system reads; callers run it on the blocking pool.
pub trait HostSampler: Send + Sync {
    fn sample(&self) -> HostMetric;
}
