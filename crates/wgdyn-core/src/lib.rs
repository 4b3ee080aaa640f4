// # wgdyn-core
//
// Core library keeping WireGuard peer endpoints pointed at the current
// address of dynamic-DNS hostnames.
//
// ## Architecture Overview
//
// - **CacheStore**: Trait for durable hostname -> address storage
// - **Resolver**: Trait for resolving peer hostnames
// - **EndpointApplier**: Trait for reconfiguring live WireGuard peers
// - **GatewayProbe**: Trait for tunnel reachability checks
// - **ReconcileEngine**: Runs the resolve -> diff -> apply -> persist cycle
//
// ## Design Principles
//
// 1. **Single Writer**: One engine task owns the cache and runs every cycle
// 2. **Failure Isolation**: One hostname's failure never affects another
// 3. **Stale Over Empty**: A failed lookup keeps the last known address
// 4. **Crash Safety**: The cache file is replaced atomically
// 5. **Library-First**: The daemon is a thin wrapper around this crate

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod resolver;
pub mod traits;

// Re-export core types for convenience
pub use cache::{FileCacheStore, MemoryCacheStore};
pub use config::{AddressFamily, CacheStoreConfig, EngineConfig, PeerTarget, WgDynConfig};
pub use engine::{
    ApplyStatus, CycleReport, CycleTrigger, EngineEvent, FlushHandle, FlushRequest,
    ReconcileEngine, TargetState,
};
pub use error::{Error, Result};
pub use resolver::SystemResolver;
pub use traits::{
    AddressCache, ApplyRequest, CacheStore, EndpointApplier, GatewayProbe, ResolutionFailure,
    ResolveCause, Resolver,
};
