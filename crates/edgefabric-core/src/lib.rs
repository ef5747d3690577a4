pub mod config;
pub mod types;

pub use config::{
    CacheConfig, ConfigError, FabricConfig, HealthConfig, NodeDeclaration, SchedulerConfig,
    SyncConfig, parse_duration,
};
pub use types::*;
