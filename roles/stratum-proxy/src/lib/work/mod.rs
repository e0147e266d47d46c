//! Block header construction for pool jobs.
//!
//! - [`job`] holds the immutable pool job and the subscription parameters
//! - [`target`] converts between difficulty, `nbits` and 256 bit targets
//! - [`codec`] builds work units and rebuilds submitted shares
pub mod codec;
pub mod job;
pub mod target;
