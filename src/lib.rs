//! strm-sync: mirror OpenList media trees as `.strm` pointer files
//!
//! Remote listings flow through a per-file pipeline (classify, filter,
//! name, write) that produces a local tree a media server can index
//! without copying any video bytes.

pub mod config;
pub mod error;
pub mod jobs;
pub mod pipeline;
pub mod services;

pub use error::{Result, SyncError};
