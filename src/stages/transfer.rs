//! Transfer stage (C10 + C11, §4.4): moves the bytes of one `TransferPart`
//! between a local file/blob and a remote URL, choosing a transport by
//! source/target shape and wrapping the network call in retry.
//!
//! Implements `BatchWorker` (batch size always 1 — parts don't batch) so a
//! facade wraps it in `ConcurrentMap` to get bounded parallel fan-out.

use crate::bufferpool::BufferPool;
use crate::config::RetryConfig;
use crate::controller::TransferController;
use crate::error::TransferError;
use crate::http::retry::with_retry;
use crate::http::HttpClient;
use crate::model::{AssetEndpoint, TransferPart};
use crate::pipeline::concurrent_map::BatchWorker;
use crate::requestgen::RequestGenerator;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::instrument;

pub struct TransferWorker {
    http: HttpClient,
    buffer_pool: Arc<BufferPool>,
    retry: RetryConfig,
    request_generator: Arc<dyn RequestGenerator>,
}

impl TransferWorker {
    pub fn new(
        http: HttpClient,
        buffer_pool: Arc<BufferPool>,
        retry: RetryConfig,
        request_generator: Arc<dyn RequestGenerator>,
    ) -> Self {
        Self {
            http,
            buffer_pool,
            retry,
            request_generator,
        }
    }
}

impl BatchWorker for TransferWorker {
    type In = TransferPart;
    type Out = TransferPart;

    fn call(&self, batch: Vec<TransferPart>, ctrl: Arc<TransferController>) -> BoxFuture<'static, Vec<TransferPart>> {
        let http = self.http.clone();
        let buffer_pool = self.buffer_pool.clone();
        let retry = self.retry.clone();
        let request_generator = self.request_generator.clone();

        Box::pin(async move {
            let mut out = Vec::with_capacity(batch.len());
            for part in batch {
                match transfer_one(&http, &buffer_pool, &retry, &request_generator, &part, &ctrl).await {
                    Ok(()) => out.push(part),
                    Err(err) => {
                        ctrl.notify_error(part.asset_id, "Transfer", err.code().to_string(), err.to_string());
                    }
                }
            }
            out
        })
    }
}

#[instrument(skip(http, buffer_pool, retry, request_generator, part, ctrl), fields(asset_id = ?part.asset_id))]
async fn transfer_one(
    http: &HttpClient,
    buffer_pool: &Arc<BufferPool>,
    retry: &RetryConfig,
    request_generator: &Arc<dyn RequestGenerator>,
    part: &TransferPart,
    ctrl: &Arc<TransferController>,
) -> Result<(), TransferError> {
    let Some(target_url) = part.target_urls.first() else {
        return Err(TransferError::IllegalArgument("part has no target URL".to_string()));
    };

    match (part.source.endpoint(), target_url.as_str()) {
        (AssetEndpoint::Url(src), _) if src.starts_with("file://") && is_http(target_url) => {
            let _allotment = buffer_pool.allocate(part.range.len()).await;
            let data = ctrl.file_cache().read(src, part.range).await?;
            upload(http, retry, request_generator, part, target_url, data).await
        }
        (AssetEndpoint::Blob(bytes), _) if is_http(target_url) => {
            let low = part.range.low as usize;
            let high = part.range.high as usize;
            let data = bytes.slice(low..high);
            upload(http, retry, request_generator, part, target_url, data).await
        }
        (AssetEndpoint::Url(src), _) if is_http(src) && target_url.starts_with("file://") => {
            let _allotment = buffer_pool.allocate(part.range.len()).await;
            let (low, high) = part.range.to_closed_inclusive();
            let headers = part.headers.clone();
            let data = with_retry(retry, || http.get_range(src, &headers, low, high)).await?;
            ctrl.file_cache().write(target_url, part.range, data, part.total_size).await
        }
        _ => Err(TransferError::Unsupported(
            "no transport matches this part's source/target shape".to_string(),
        )),
    }
}

fn is_http(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

async fn upload(
    http: &HttpClient,
    retry: &RetryConfig,
    request_generator: &Arc<dyn RequestGenerator>,
    part: &TransferPart,
    target_url: &str,
    data: Bytes,
) -> Result<(), TransferError> {
    let content_type = part
        .headers
        .get("Content-Type")
        .cloned()
        .unwrap_or_else(|| "application/octet-stream".to_string());
    let filename = part.headers.get("X-Filename").cloned();

    with_retry(retry, || {
        let data = data.clone();
        let content_type = content_type.clone();
        let filename = filename.clone();
        async move {
            let prepared = request_generator.build(part, data, &content_type, filename.as_deref());
            http.send(request_generator.method(), target_url, &prepared.headers, prepared.body)
                .await
        }
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{test_support::fixed_asset_id, Asset};
    use crate::range::ByteRange;
    use crate::requestgen::BlockRequestGenerator;
    use std::collections::HashMap;
    use std::time::Duration;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn retry_config() -> RetryConfig {
        RetryConfig {
            retry_interval: Duration::from_millis(1),
            ..RetryConfig::default()
        }
    }

    #[tokio::test]
    async fn file_to_http_upload_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let src_path = dir.path().join("src.bin");
        std::fs::write(&src_path, b"hello world").unwrap();
        let src_url = format!("file://{}", src_path.display());

        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/block"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let part = TransferPart::new(
            fixed_asset_id(1),
            Asset::url(src_url),
            vec![format!("{}/block", server.uri())],
            ByteRange::new(0, 11),
            11,
            HashMap::new(),
            11,
        )
        .unwrap();

        let worker = TransferWorker::new(
            HttpClient::new(Duration::from_secs(5)),
            Arc::new(BufferPool::new(1024 * 1024, 1024)),
            retry_config(),
            Arc::new(BlockRequestGenerator),
        );
        let ctrl = Arc::new(TransferController::new());
        let out = worker.call(vec![part], ctrl).await;
        assert_eq!(out.len(), 1);
    }

    #[tokio::test]
    async fn http_to_file_download_writes_requested_range() {
        let dir = tempfile::tempdir().unwrap();
        let dst_path = dir.path().join("dst.bin");
        let dst_url = format!("file://{}", dst_path.display());

        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/obj"))
            .respond_with(
                ResponseTemplate::new(206)
                    .set_body_bytes(b"0123456789".to_vec())
                    .insert_header("Content-Length", "10"),
            )
            .mount(&server)
            .await;

        let part = TransferPart::new(
            fixed_asset_id(2),
            Asset::url(format!("{}/obj", server.uri())),
            vec![dst_url],
            ByteRange::new(0, 10),
            10,
            HashMap::new(),
            10,
        )
        .unwrap();

        let worker = TransferWorker::new(
            HttpClient::new(Duration::from_secs(5)),
            Arc::new(BufferPool::new(1024 * 1024, 1024)),
            retry_config(),
            Arc::new(BlockRequestGenerator),
        );
        let ctrl = Arc::new(TransferController::new());
        let out = worker.call(vec![part], ctrl).await;
        assert_eq!(out.len(), 1);
        assert_eq!(std::fs::read(&dst_path).unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn failed_transport_reports_to_controller_and_drops_item() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/block"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let part = TransferPart::new(
            fixed_asset_id(3),
            Asset::blob(Bytes::from_static(b"hello world")),
            vec![format!("{}/block", server.uri())],
            ByteRange::new(0, 11),
            11,
            HashMap::new(),
            11,
        )
        .unwrap();

        let worker = TransferWorker::new(
            HttpClient::new(Duration::from_secs(5)),
            Arc::new(BufferPool::new(1024 * 1024, 1024)),
            RetryConfig {
                retry_interval: Duration::from_millis(1),
                retry_max_count: Some(1),
                ..RetryConfig::default()
            },
            Arc::new(BlockRequestGenerator),
        );
        let ctrl = Arc::new(TransferController::new());
        let asset_id = part.asset_id;
        let out = worker.call(vec![part], ctrl.clone()).await;
        assert!(out.is_empty());
        assert!(ctrl.has_failed(asset_id));
    }
}
