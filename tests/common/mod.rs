//! Shared harness for facade-level integration tests: a mock DAM/object
//! server plus small helpers for building assets against it.

use transferengine::{Asset, AssetMetadata, EngineConfig, TransferAsset};

/// `EngineConfig` tuned for fast tests: short retry intervals so a
/// deliberately-failing mock doesn't make a test slow.
pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.retry.retry_interval = std::time::Duration::from_millis(1);
    config.retry.retry_max = std::time::Duration::from_millis(200);
    config
}

pub fn http_asset(source_url: impl Into<String>, target_url: impl Into<String>, length: u64, filename: &str) -> TransferAsset {
    TransferAsset::new(Asset::url(source_url.into()), Asset::url(target_url.into()))
        .with_metadata(AssetMetadata::new(length).with_filename(filename))
}

pub fn blob_asset(bytes: &'static [u8], target_url: impl Into<String>, filename: &str) -> TransferAsset {
    TransferAsset::new(Asset::blob(bytes::Bytes::from_static(bytes)), Asset::url(target_url.into()))
        .with_metadata(AssetMetadata::new(bytes.len() as u64).with_filename(filename))
}
