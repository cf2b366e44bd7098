//! Resource manager: per-type pools gating admission by quota, rate, and
//! capacity, with deadlock detection and a load monitor that scales pool
//! capacity to observed demand.

mod deadlock;
mod manager;
mod pool;
mod quota;

pub use deadlock::WaitForGraph;
pub use manager::{ResourceManager, ResourceManagerConfig};
pub use pool::{PoolStats, ResourcePool};
pub use quota::ResourceQuota;

use serde::{Deserialize, Serialize};

/// The four resource kinds this manager tracks. A host embedding the toolkit
/// is free to reinterpret what each name means for its own agents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Cpu,
    Memory,
    FileHandles,
    Network,
}

impl ResourceType {
    pub const ALL: [ResourceType; 4] = [
        ResourceType::Cpu,
        ResourceType::Memory,
        ResourceType::FileHandles,
        ResourceType::Network,
    ];
}
