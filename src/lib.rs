//! Composable async engine for high-throughput HTTP file transfer: direct
//! upload, block/multi-part PUT, form-chunked POST, and byte-range
//! download, built as a pipeline of independently testable stages wired
//! together by [`facades`].

pub mod bufferpool;
pub mod config;
pub mod controller;
pub mod error;
pub mod facades;
pub mod fileio;
pub mod http;
pub mod model;
pub mod partsize;
pub mod pipeline;
pub mod range;
pub mod requestgen;
pub mod stages;

pub use config::{EngineConfig, RetryConfig};
pub use controller::{TransferController, TransferEvent};
pub use error::TransferError;
pub use model::{Asset, AssetId, AssetMetadata, AssetMultipart, NameConflictPolicy, TransferAsset, TransferPart};
