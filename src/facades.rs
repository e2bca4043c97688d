//! Public facades (C13): `AEMUpload`, `AEMDownload`, `BlockUpload`,
//! `BlockDownload` assemble the stage library into complete pipelines and
//! translate the controller's event bus into the four events documented
//! in spec §6.5 (`filestart`/`fileprogress`/`fileend`/`fileerror`).

use crate::bufferpool::BufferPool;
use crate::config::EngineConfig;
use crate::controller::{TransferController, TransferEvent};
use crate::error::TransferError;
use crate::http::HttpClient;
use crate::model::TransferAsset;
use crate::pipeline::concurrent_map::ConcurrentMap;
use crate::pipeline::Pipeline;
use crate::requestgen::{BlockRequestGenerator, FormRequestGenerator, RequestGenerator};
use crate::stages::{
    aem_initiate, AEMCompleteUpload, AEMInitiateUpload, CloseFiles, CreateTransferParts, FailUnsupportedAssets,
    GetAssetMetadata, JoinTransferParts, TransferWorker,
};
use futures::stream::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::instrument;

/// A facade's outcome: the assets that completed, plus the first error
/// recorded for every asset that did not (§6.5/§7 — a facade never
/// discards a failure, it surfaces it in the final `fileerror` picture).
#[derive(Debug, Default)]
pub struct TransferOutcome {
    pub completed: Vec<TransferAsset>,
    pub errors: HashMap<crate::model::AssetId, crate::controller::FailureRecord>,
}

impl TransferOutcome {
    fn build(completed: Vec<TransferAsset>, ctrl: &TransferController) -> Self {
        let mut errors = HashMap::new();
        for asset_id in ctrl.failed_asset_ids() {
            if let Some(first) = ctrl.failures_for(asset_id).into_iter().next() {
                errors.insert(asset_id, first);
            }
        }
        Self { completed, errors }
    }

    /// The first recorded error across the whole batch, if any — surfaced
    /// by upload facades to fulfil the "re-throw the first error" clause.
    pub fn first_error(&self) -> Option<&crate::controller::FailureRecord> {
        self.errors.values().next()
    }

    /// Applies the "re-throw the first error" contract: a batch with any
    /// recorded failure fails the whole call rather than returning a
    /// partial-success outcome. Per-asset detail stays available through
    /// the events a caller observes via `ctrl.subscribe()`.
    fn into_result(self) -> Result<Self, TransferError> {
        if let Some(first) = self.first_error() {
            return Err(TransferError::Validation(format!("{}: {}", first.error_code, first.message)));
        }
        Ok(self)
    }
}

/// Logs the facade-level events a caller would otherwise have to derive
/// from raw `BeforeStage`/`AfterStage`/`FileProgress` traffic.
fn spawn_event_logger(ctrl: &Arc<TransferController>) {
    let mut rx = ctrl.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match event {
                TransferEvent::FileStart { asset_id } => {
                    tracing::info!(asset_id = ?asset_id, "filestart");
                }
                TransferEvent::FileProgress { asset_id, bytes_transferred, total_bytes } => {
                    tracing::debug!(asset_id = ?asset_id, bytes_transferred, total_bytes, "fileprogress");
                }
                TransferEvent::FileEnd { asset_id } => {
                    tracing::info!(asset_id = ?asset_id, "fileend");
                }
                TransferEvent::FileError { asset_id, is_first_failure, error_code, message } => {
                    tracing::warn!(asset_id = ?asset_id, is_first_failure, error_code, message, "fileerror");
                }
                TransferEvent::BeforeStage { .. } | TransferEvent::AfterStage { .. } => {}
            }
        }
    });
}

/// Per spec §9 Open Questions: unlink partial target files for any asset
/// that failed without completing.
fn cleanup_failed_downloads(ctrl: &TransferController, assets: &[TransferAsset]) {
    let targets: HashMap<_, _> = assets
        .iter()
        .filter_map(|a| a.target.endpoint().as_url().map(|u| (a.id(), u.to_string())))
        .collect();
    ctrl.cleanup_failed_transfers(&targets);
}

/// Upload via the DAM `initiateUpload`/block-PUT/`completeUpload` handshake.
pub struct AEMUpload {
    http: HttpClient,
    buffer_pool: Arc<BufferPool>,
    config: EngineConfig,
}

impl AEMUpload {
    pub fn new(config: EngineConfig) -> Self {
        let http = HttpClient::new(config.socket_timeout);
        let buffer_pool = Arc::new(BufferPool::new(config.buffer_pool_bytes, config.buffer_block_size));
        Self { http, buffer_pool, config }
    }

    #[instrument(skip(self, assets), fields(count = assets.len()))]
    pub async fn upload_files(&self, assets: Vec<TransferAsset>) -> Result<TransferOutcome, TransferError> {
        let ctrl = Arc::new(TransferController::new());
        spawn_event_logger(&ctrl);
        let original = assets.clone();

        let pipeline = Pipeline::new(FailUnsupportedAssets::new(&self.config.forbidden_filename_chars))
            .then(
                ConcurrentMap::new(
                    AEMInitiateUpload::new(self.http.clone()),
                    self.config.block_max_concurrency,
                    usize::MAX,
                    true,
                )
                .with_check_add_batch(aem_initiate::same_parent),
            )
            .then(CreateTransferParts::new(self.config.preferred_part_size))
            .then(ConcurrentMap::new(
                TransferWorker::new(
                    self.http.clone(),
                    self.buffer_pool.clone(),
                    self.config.retry.clone(),
                    Arc::new(BlockRequestGenerator) as Arc<dyn RequestGenerator>,
                ),
                self.config.block_max_concurrency,
                1,
                false,
            ))
            .then(JoinTransferParts::new(original.clone()))
            .then(ConcurrentMap::new(
                AEMCompleteUpload::new(self.http.clone()),
                self.config.form_max_concurrency,
                1,
                true,
            ))
            .then(CloseFiles);

        let input = Box::pin(futures::stream::iter(original));
        let completed: Vec<TransferAsset> = pipeline.run(input, ctrl.clone()).collect().await;
        TransferOutcome::build(completed, &ctrl).into_result()
    }
}

/// Upload directly to pre-signed block URLs (no DAM handshake).
pub struct BlockUpload {
    http: HttpClient,
    buffer_pool: Arc<BufferPool>,
    config: EngineConfig,
}

impl BlockUpload {
    pub fn new(config: EngineConfig) -> Self {
        let http = HttpClient::new(config.socket_timeout);
        let buffer_pool = Arc::new(BufferPool::new(config.buffer_pool_bytes, config.buffer_block_size));
        Self { http, buffer_pool, config }
    }

    #[instrument(skip(self, assets), fields(count = assets.len()))]
    pub async fn upload_files(&self, assets: Vec<TransferAsset>) -> Result<TransferOutcome, TransferError> {
        let ctrl = Arc::new(TransferController::new());
        spawn_event_logger(&ctrl);
        let original = assets.clone();

        let pipeline = Pipeline::new(FailUnsupportedAssets::new(&self.config.forbidden_filename_chars))
            .then(CreateTransferParts::new(self.config.preferred_part_size))
            .then(ConcurrentMap::new(
                TransferWorker::new(
                    self.http.clone(),
                    self.buffer_pool.clone(),
                    self.config.retry.clone(),
                    Arc::new(BlockRequestGenerator) as Arc<dyn RequestGenerator>,
                ),
                self.config.block_max_concurrency,
                1,
                false,
            ))
            .then(JoinTransferParts::new(original.clone()))
            .then(CloseFiles);

        let input = Box::pin(futures::stream::iter(original));
        let completed: Vec<TransferAsset> = pipeline.run(input, ctrl.clone()).collect().await;
        TransferOutcome::build(completed, &ctrl).into_result()
    }
}

/// Upload via the form-POST create-asset servlet, chunked when the asset
/// exceeds `preferredPartSize`.
pub struct FormUpload {
    http: HttpClient,
    buffer_pool: Arc<BufferPool>,
    config: EngineConfig,
}

impl FormUpload {
    pub fn new(config: EngineConfig) -> Self {
        let http = HttpClient::new(config.socket_timeout);
        let buffer_pool = Arc::new(BufferPool::new(config.buffer_pool_bytes, config.buffer_block_size));
        Self { http, buffer_pool, config }
    }

    #[instrument(skip(self, assets), fields(count = assets.len()))]
    pub async fn upload_files(&self, assets: Vec<TransferAsset>) -> Result<TransferOutcome, TransferError> {
        let ctrl = Arc::new(TransferController::new());
        spawn_event_logger(&ctrl);
        let original = assets.clone();

        // The create-asset servlet is sequential per asset (§9 Open
        // Questions): `form_max_concurrency` defaults to 1.
        let pipeline = Pipeline::new(FailUnsupportedAssets::new(&self.config.forbidden_filename_chars))
            .then(CreateTransferParts::new(self.config.preferred_part_size).with_form_chunking(true))
            .then(ConcurrentMap::new(
                TransferWorker::new(
                    self.http.clone(),
                    self.buffer_pool.clone(),
                    self.config.retry.clone(),
                    Arc::new(FormRequestGenerator) as Arc<dyn RequestGenerator>,
                ),
                self.config.form_max_concurrency,
                1,
                true,
            ))
            .then(JoinTransferParts::new(original.clone()))
            .then(CloseFiles);

        let input = Box::pin(futures::stream::iter(original));
        let completed: Vec<TransferAsset> = pipeline.run(input, ctrl.clone()).collect().await;
        TransferOutcome::build(completed, &ctrl).into_result()
    }
}

/// Byte-range download, writing into a local file via random-access I/O.
pub struct AEMDownload {
    http: HttpClient,
    buffer_pool: Arc<BufferPool>,
    config: EngineConfig,
}

impl AEMDownload {
    pub fn new(config: EngineConfig) -> Self {
        let http = HttpClient::new(config.socket_timeout);
        let buffer_pool = Arc::new(BufferPool::new(config.buffer_pool_bytes, config.buffer_block_size));
        Self { http, buffer_pool, config }
    }

    #[instrument(skip(self, assets), fields(count = assets.len()))]
    pub async fn download_files(&self, assets: Vec<TransferAsset>) -> Result<TransferOutcome, TransferError> {
        let ctrl = Arc::new(TransferController::new());
        spawn_event_logger(&ctrl);
        let original = assets.clone();

        // Resolve metadata (size/type/range-support) before seeding
        // `JoinTransferParts`, which needs each asset's real contentLength
        // up front — the input assets don't carry one for downloads.
        let metadata_input = Box::pin(futures::stream::iter(assets));
        let resolved: Vec<TransferAsset> =
            Pipeline::new(GetAssetMetadata::new(self.http.clone()))
                .run(metadata_input, ctrl.clone())
                .collect()
                .await;

        let pipeline = Pipeline::new(CreateTransferParts::new(self.config.preferred_part_size))
            .then(ConcurrentMap::new(
                TransferWorker::new(
                    self.http.clone(),
                    self.buffer_pool.clone(),
                    self.config.retry.clone(),
                    Arc::new(BlockRequestGenerator) as Arc<dyn RequestGenerator>,
                ),
                self.config.block_max_concurrency,
                1,
                false,
            ))
            .then(JoinTransferParts::new(resolved.clone()))
            .then(CloseFiles);

        let input = Box::pin(futures::stream::iter(resolved));
        let completed: Vec<TransferAsset> = pipeline.run(input, ctrl.clone()).collect().await;
        cleanup_failed_downloads(&ctrl, &original);
        TransferOutcome::build(completed, &ctrl).into_result()
    }
}

/// `BlockDownload` is the same pipeline as `AEMDownload` — byte-range GET
/// against pre-signed or direct URLs — kept as a distinct type so callers
/// name the protocol they're using rather than reach for the DAM-flavored
/// one by habit.
pub type BlockDownload = AEMDownload;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Asset, AssetMetadata};
    use bytes::Bytes;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn block_upload_completes_a_single_file() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/block"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let asset = TransferAsset::new(
            Asset::blob(Bytes::from_static(b"hello world")),
            Asset::url(format!("{}/block", server.uri())),
        )
        .with_metadata(AssetMetadata::new(11).with_filename("a.bin"));

        let mut config = EngineConfig::default();
        config.retry.retry_interval = std::time::Duration::from_millis(1);
        let facade = BlockUpload::new(config);
        let outcome = facade.upload_files(vec![asset]).await.unwrap();

        assert_eq!(outcome.completed.len(), 1);
        assert!(outcome.errors.is_empty());
    }

    #[tokio::test]
    async fn aem_download_writes_a_file_and_reports_no_errors() {
        let server = MockServer::start().await;
        Mock::given(method("HEAD"))
            .and(path("/obj"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Content-Length", "11")
                    .insert_header("Accept-Ranges", "bytes"),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/obj"))
            .respond_with(
                ResponseTemplate::new(206)
                    .set_body_bytes(b"hello world".to_vec())
                    .insert_header("Content-Length", "11"),
            )
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let dst = dir.path().join("out.bin");
        let asset = TransferAsset::new(
            Asset::url(format!("{}/obj", server.uri())),
            Asset::url(format!("file://{}", dst.display())),
        );

        let mut config = EngineConfig::default();
        config.retry.retry_interval = std::time::Duration::from_millis(1);
        let facade = AEMDownload::new(config);
        let outcome = facade.download_files(vec![asset]).await.unwrap();

        assert_eq!(outcome.completed.len(), 1);
        assert_eq!(std::fs::read(&dst).unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn invalid_filename_fails_the_whole_batch() {
        let asset = TransferAsset::new(Asset::url("file:///a"), Asset::url("https://x/a"))
            .with_metadata(AssetMetadata::new(10).with_filename("bad:name.jpg"));

        let config = EngineConfig::default();
        let facade = BlockUpload::new(config);
        let err = facade.upload_files(vec![asset]).await.unwrap_err();

        assert!(err.to_string().contains("unsupported characters"));
    }

    #[tokio::test]
    async fn a_batch_with_one_failure_among_successes_still_fails_the_call() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/block"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let good = TransferAsset::new(
            Asset::blob(Bytes::from_static(b"hello world")),
            Asset::url(format!("{}/block", server.uri())),
        )
        .with_metadata(AssetMetadata::new(11).with_filename("a.bin"));
        let bad = TransferAsset::new(Asset::url("file:///a"), Asset::url("https://x/a"))
            .with_metadata(AssetMetadata::new(10).with_filename("bad:name.jpg"));

        let mut config = EngineConfig::default();
        config.retry.retry_interval = std::time::Duration::from_millis(1);
        let facade = BlockUpload::new(config);
        let err = facade.upload_files(vec![good, bad]).await.unwrap_err();

        assert!(err.to_string().contains("unsupported characters"));
    }
}
