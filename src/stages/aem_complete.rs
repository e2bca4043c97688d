//! `AEMCompleteUpload` (C10, §4.6, §6.1): per-asset completion POST after
//! every part of an asset's multipart upload has landed.

use crate::controller::{TransferController, TransferEvent};
use crate::model::{NameConflictPolicy, TransferAsset};
use crate::pipeline::Stage;
use crate::pipeline::concurrent_map::BatchWorker;
use async_stream::stream;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const STAGE_NAME: &str = "AEMCompleteUpload";

pub struct AEMCompleteUpload {
    http: crate::http::HttpClient,
}

impl AEMCompleteUpload {
    pub fn new(http: crate::http::HttpClient) -> Self {
        Self { http }
    }

    async fn complete_one(&self, asset: &TransferAsset) -> Result<(), crate::error::TransferError> {
        let Some(multipart) = &asset.multipart else {
            return Err(crate::error::TransferError::IllegalArgument(
                "asset has no multipart target to complete".to_string(),
            ));
        };
        let Some(complete_url) = &multipart.complete_url else {
            return Err(crate::error::TransferError::IllegalArgument(
                "multipart target has no completeURI".to_string(),
            ));
        };

        let filename = asset.filename().unwrap_or_default().to_string();
        let content_length = asset.content_length().unwrap_or(0).to_string();
        let mime_type = asset
            .metadata
            .as_ref()
            .map(|m| m.content_type_or_default().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let upload_token = multipart.upload_token.clone().unwrap_or_default();

        let (create_version, replace, version_label, version_comment) = match &asset.name_conflict_policy {
            NameConflictPolicy::Default => (false, false, None, None),
            NameConflictPolicy::Replace => (false, true, None, None),
            NameConflictPolicy::CreateVersion { label, comment } => (true, false, label.clone(), comment.clone()),
        };

        let mut fields = vec![
            ("fileName".to_string(), filename),
            ("fileSize".to_string(), content_length),
            ("mimeType".to_string(), mime_type),
            ("createVersion".to_string(), create_version.to_string()),
            ("replace".to_string(), replace.to_string()),
            ("uploadToken".to_string(), upload_token),
        ];
        if let Some(label) = version_label {
            fields.push(("versionLabel".to_string(), label));
        }
        if let Some(comment) = version_comment {
            fields.push(("versionComment".to_string(), comment));
        }

        self.http.post_form(complete_url, &fields).await
    }
}

/// `Stage` form: one asset at a time, used when wired directly into a
/// pipeline rather than through `ConcurrentMap`.
impl Stage for AEMCompleteUpload {
    type In = TransferAsset;
    type Out = TransferAsset;

    #[tracing::instrument(name = "stage", skip_all, fields(name = STAGE_NAME))]
    fn run(
        &self,
        mut input: BoxStream<'static, TransferAsset>,
        ctrl: Arc<TransferController>,
        token: CancellationToken,
    ) -> BoxStream<'static, TransferAsset> {
        let http = self.http.clone();
        Box::pin(stream! {
            let completer = AEMCompleteUpload { http };
            loop {
                let item = tokio::select! {
                    _ = token.cancelled() => break,
                    item = input.next() => item,
                };
                let Some(asset) = item else { break };
                ctrl.publish(TransferEvent::BeforeStage { stage: STAGE_NAME, asset_id: asset.id() });
                match completer.complete_one(&asset).await {
                    Ok(()) => {
                        ctrl.publish(TransferEvent::AfterStage { stage: STAGE_NAME, asset_id: asset.id() });
                        yield asset;
                    }
                    Err(err) => {
                        ctrl.notify_error(asset.id(), STAGE_NAME, err.code().to_string(), err.to_string());
                    }
                }
            }
        })
    }
}

/// `BatchWorker` form (batch size 1) for use under `ConcurrentMap` when the
/// facade wants bounded fan-out over the completion calls.
impl BatchWorker for AEMCompleteUpload {
    type In = TransferAsset;
    type Out = TransferAsset;

    fn call(&self, batch: Vec<TransferAsset>, ctrl: Arc<TransferController>) -> BoxFuture<'static, Vec<TransferAsset>> {
        let http = self.http.clone();
        Box::pin(async move {
            let completer = AEMCompleteUpload { http };
            let mut out = Vec::with_capacity(batch.len());
            for asset in batch {
                match completer.complete_one(&asset).await {
                    Ok(()) => out.push(asset),
                    Err(err) => {
                        ctrl.notify_error(asset.id(), STAGE_NAME, err.code().to_string(), err.to_string());
                    }
                }
            }
            out
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Asset, AssetMetadata, AssetMultipart};
    use std::time::Duration;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn completion_posts_expected_fields() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/complete"))
            .and(body_string_contains("uploadToken=tok"))
            .and(body_string_contains("createVersion=false"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let multipart = AssetMultipart::new(vec!["https://x/1".into()], 10, 1000)
            .unwrap()
            .with_complete_url(format!("{}/complete", server.uri()))
            .with_upload_token("tok");

        let asset = TransferAsset::new(Asset::url("file:///a"), Asset::url("https://x/a.jpg"))
            .with_metadata(AssetMetadata::new(100).with_filename("a.jpg"))
            .with_multipart(multipart)
            .unwrap();

        let worker = AEMCompleteUpload::new(crate::http::HttpClient::new(Duration::from_secs(5)));
        let ctrl = Arc::new(TransferController::new());
        let out = worker.call(vec![asset], ctrl).await;
        assert_eq!(out.len(), 1);
    }
}
