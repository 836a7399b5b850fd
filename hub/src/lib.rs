//! Burrowcam Hub – library crate behind the `burrowcam-hub` binary.
//!
//! Exposed as a library so integration tests (including the node's) can
//! run a real hub in-process via [`server::spawn`].

pub mod db;
pub mod error;
pub mod server;
pub mod storage;
