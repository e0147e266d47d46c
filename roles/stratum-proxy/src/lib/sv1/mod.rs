//! ## Stratum Listener
//!
//! Serves push miners speaking Stratum V1. Every miner shares the single pool session: it gets
//! the pool's extranonce1 extended by a private tail, receives pool jobs as they arrive, and has
//! its shares validated locally before they are forwarded.
pub mod downstream;
pub mod extranonce;
pub mod sv1_server;

pub use downstream::{Downstream, DownstreamContext};
pub use extranonce::TailAllocator;
pub use sv1_server::Sv1Server;
