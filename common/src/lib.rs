//! Shared pieces of the burrowcam pipeline: configuration schema for the
//! node and hub binaries, wire protocol types, clip naming and the
//! disk-space probe both sides gate on.

pub mod clip;
pub mod config;
pub mod protocol;
pub mod storage;
