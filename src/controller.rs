//! Transfer controller (C8): event bus plus per-asset failure registry.
//!
//! Stages only ever talk to the controller, never to each other, so they
//! stay pure and independently testable — the same reasoning the teacher
//! applies to its `AppState`/metrics handle threaded through every handler.

use crate::fileio::RandomAccessFileCache;
use crate::model::AssetId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::warn;

/// One recorded failure for an asset: the stage it happened in and the
/// error code assigned by `TransferError::code()`.
#[derive(Debug, Clone)]
pub struct FailureRecord {
    pub stage: &'static str,
    pub error_code: String,
    pub message: String,
}

/// Event-bus payloads, named after the stage boundaries in §4.7.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    BeforeStage { stage: &'static str, asset_id: AssetId },
    AfterStage { stage: &'static str, asset_id: AssetId },
    FileStart { asset_id: AssetId },
    FileProgress { asset_id: AssetId, bytes_transferred: u64, total_bytes: u64 },
    FileEnd { asset_id: AssetId },
    FileError { asset_id: AssetId, is_first_failure: bool, error_code: String, message: String },
}

/// Shared state every stage is handed a clone of: the failure registry,
/// an event bus, and the file-handle cache used for download cleanup.
pub struct TransferController {
    failures: Mutex<HashMap<AssetId, Vec<FailureRecord>>>,
    events: broadcast::Sender<TransferEvent>,
    files: RandomAccessFileCache,
}

impl Default for TransferController {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferController {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(1024);
        Self {
            failures: Mutex::new(HashMap::new()),
            events,
            files: RandomAccessFileCache::new(),
        }
    }

    /// Subscribe to the event bus; facades use this to surface progress to
    /// their caller.
    pub fn subscribe(&self) -> broadcast::Receiver<TransferEvent> {
        self.events.subscribe()
    }

    /// Best-effort publish — a lagging/absent subscriber is not an error.
    pub fn publish(&self, event: TransferEvent) {
        let _ = self.events.send(event);
    }

    pub fn file_cache(&self) -> &RandomAccessFileCache {
        &self.files
    }

    /// Record a failure for `asset_id`, returning whether it was the
    /// first failure for that asset, and publish a `FileError` event.
    pub fn notify_error(&self, asset_id: AssetId, stage: &'static str, error_code: String, message: String) -> bool {
        let is_first_failure = {
            let mut failures = self.failures.lock();
            let records = failures.entry(asset_id).or_default();
            let is_first = records.is_empty();
            records.push(FailureRecord {
                stage,
                error_code: error_code.clone(),
                message: message.clone(),
            });
            is_first
        };

        warn!(
            asset_id = ?asset_id,
            stage,
            is_first_failure,
            error_code = %error_code,
            "transfer stage failed"
        );
        self.publish(TransferEvent::FileError {
            asset_id,
            is_first_failure,
            error_code,
            message,
        });
        is_first_failure
    }

    /// Constant-time check: has this asset failed in any stage so far.
    pub fn has_failed(&self, asset_id: AssetId) -> bool {
        self.failures.lock().contains_key(&asset_id)
    }

    pub fn failures_for(&self, asset_id: AssetId) -> Vec<FailureRecord> {
        self.failures.lock().get(&asset_id).cloned().unwrap_or_default()
    }

    pub fn failed_asset_ids(&self) -> Vec<AssetId> {
        self.failures.lock().keys().copied().collect()
    }

    /// Unlink partially written target files for every failed download.
    /// Individual unlink errors are ignored (§4.7) — cleanup is
    /// best-effort, not itself a transfer that can fail.
    pub fn cleanup_failed_transfers(&self, target_urls: &HashMap<AssetId, String>) {
        for asset_id in self.failed_asset_ids() {
            if let Some(url) = target_urls.get(&asset_id) {
                self.files.unlink(url);
            }
        }
    }
}
