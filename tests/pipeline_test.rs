//! Cross-stage pipeline behavior not already covered by a single stage's
//! own unit tests.

mod common;

use futures::stream::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use transferengine::controller::TransferEvent;
use transferengine::pipeline::concurrent_map::ConcurrentMap;
use transferengine::pipeline::Pipeline;
use transferengine::stages::{CreateTransferParts, JoinTransferParts, TransferWorker};
use transferengine::{EngineConfig, TransferController};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// A single 282_584-byte file over one block PUT: one `filestart`, at
/// least one `fileprogress`, one `fileend`, and zero `fileerror`.
#[tokio::test]
async fn single_block_upload_emits_the_expected_event_sequence() {
    let server = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/block"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let payload = vec![7u8; 282_584];
    let asset = common::blob_asset(
        Box::leak(payload.into_boxed_slice()),
        format!("{}/block", server.uri()),
        "a.bin",
    );

    let ctrl = Arc::new(TransferController::new());
    let mut events = ctrl.subscribe();
    let config = EngineConfig::default();
    let http = transferengine::http::HttpClient::new(Duration::from_secs(5));
    let buffer_pool = Arc::new(transferengine::bufferpool::BufferPool::new(
        config.buffer_pool_bytes,
        config.buffer_block_size,
    ));

    let pipeline = Pipeline::new(CreateTransferParts::new(config.preferred_part_size))
        .then(ConcurrentMap::new(
            TransferWorker::new(
                http,
                buffer_pool,
                config.retry.clone(),
                Arc::new(transferengine::requestgen::BlockRequestGenerator),
            ),
            config.block_max_concurrency,
            1,
            false,
        ))
        .then(JoinTransferParts::new(vec![asset.clone()]));

    let input = Box::pin(futures::stream::iter(vec![asset]));
    let completed: Vec<_> = pipeline.run(input, ctrl.clone()).collect().await;
    assert_eq!(completed.len(), 1);

    let mut filestarts = 0;
    let mut fileprogresses = 0;
    let mut fileends = 0;
    let mut fileerrors = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            TransferEvent::FileStart { .. } => filestarts += 1,
            TransferEvent::FileProgress { .. } => fileprogresses += 1,
            TransferEvent::FileEnd { .. } => fileends += 1,
            TransferEvent::FileError { .. } => fileerrors += 1,
            _ => {}
        }
    }
    assert_eq!(filestarts, 1);
    assert!(fileprogresses >= 1);
    assert_eq!(fileends, 1);
    assert_eq!(fileerrors, 0);
}
