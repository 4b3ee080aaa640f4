//! Core traits for wgdyn
//!
//! This module defines the abstract interfaces that all implementations must follow.
//!
//! - [`CacheStore`]: Durable hostname -> address cache
//! - [`Resolver`]: Resolve peer hostnames
//! - [`EndpointApplier`]: Reconfigure live WireGuard peers
//! - [`GatewayProbe`]: Check tunnel reachability

pub mod cache_store;
pub mod endpoint_applier;
pub mod gateway_probe;
pub mod resolver;

pub use cache_store::{AddressCache, CacheStore};
pub use endpoint_applier::{ApplyRequest, EndpointApplier};
pub use gateway_probe::{AlwaysReachable, GatewayProbe};
pub use resolver::{ResolutionFailure, ResolutionResult, ResolveCause, Resolver};
