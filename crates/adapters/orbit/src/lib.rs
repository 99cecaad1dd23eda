//! Unauthenticated REST aggregator adapter — one of the two concrete
//! `UpstreamAdapter` implementations the router ships with.

mod client;

pub use client::OrbitAdapter;
