//! HMAC-signed aggregator adapter — the authenticated counterpart to
//! `routex-adapter-orbit`.

mod client;
mod signing;

pub use client::MeridianAdapter;
