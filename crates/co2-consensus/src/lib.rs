//! # co2-consensus
//! Block template assembly and proof-of-work mining (spec §4.7), plus
//! checkpoint pinning used by the chain manager during reorg evaluation.

pub mod checkpoint;
pub mod engine;

pub use engine::{mine_block, CancelToken, Clock, Miner, SystemClock};
