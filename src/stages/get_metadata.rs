//! `GetAssetMetadata` (C10): for download assets whose size/type/range
//! support isn't already known, issues a `HEAD` against the source URL
//! before `CreateTransferParts` runs.

use crate::controller::{TransferController, TransferEvent};
use crate::http::HttpClient;
use crate::model::{AssetMetadata, TransferAsset};
use crate::pipeline::Stage;
use async_stream::stream;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const STAGE_NAME: &str = "GetAssetMetadata";

pub struct GetAssetMetadata {
    http: HttpClient,
}

impl GetAssetMetadata {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }
}

impl Stage for GetAssetMetadata {
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
            loop {
                let item = tokio::select! {
                    _ = token.cancelled() => break,
                    item = input.next() => item,
                };
                let Some(mut asset) = item else { break };
                ctrl.publish(TransferEvent::BeforeStage { stage: STAGE_NAME, asset_id: asset.id() });

                if asset.metadata.is_some() {
                    ctrl.publish(TransferEvent::AfterStage { stage: STAGE_NAME, asset_id: asset.id() });
                    yield asset;
                    continue;
                }

                let Some(source_url) = asset.source.endpoint().as_url().map(str::to_string) else {
                    ctrl.notify_error(
                        asset.id(),
                        STAGE_NAME,
                        "EUNKNOWN".to_string(),
                        "File cannot be uploaded: source has no URL to probe for metadata".to_string(),
                    );
                    continue;
                };

                match http.head(&source_url, asset.source.headers()).await {
                    Ok(info) => {
                        let Some(content_length) = info.content_length else {
                            ctrl.notify_error(
                                asset.id(),
                                STAGE_NAME,
                                "EUNKNOWN".to_string(),
                                "File cannot be uploaded: source did not report a Content-Length".to_string(),
                            );
                            continue;
                        };
                        let mut metadata = AssetMetadata::new(content_length);
                        if let Some(content_type) = info.content_type {
                            metadata = metadata.with_content_type(content_type);
                        }
                        asset = asset.with_metadata(metadata).with_accept_ranges(info.accept_ranges);
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
