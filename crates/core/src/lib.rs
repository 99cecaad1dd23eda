//! Route engine, circuit breaker, cache/coalescer, and durable persistence
//! for the router service. The HTTP surface (`routex-backend`) and the two
//! upstream adapters are separate crates; this one owns everything they
//! share and dispatch through.

pub mod breaker;
pub mod cache;
pub mod db;
pub mod route_engine;
pub mod swap_executor;

pub use breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
pub use cache::{Cache, Coalescer, InMemoryCache, RedisCache};
pub use db::SqliteStore;
pub use route_engine::RouteEngine;
pub use swap_executor::SwapExecutor;
