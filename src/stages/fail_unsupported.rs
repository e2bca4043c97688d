//! `FailUnsupportedAssets` (C10, §4.6): rejects assets the DAM cannot
//! accept before any network I/O is attempted.

use crate::controller::{TransferController, TransferEvent};
use crate::model::TransferAsset;
use crate::pipeline::Stage;
use async_stream::stream;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const STAGE_NAME: &str = "FailUnsupportedAssets";

pub struct FailUnsupportedAssets {
    forbidden_chars: Vec<char>,
}

impl FailUnsupportedAssets {
    pub fn new(forbidden_chars: &str) -> Self {
        Self {
            forbidden_chars: forbidden_chars.chars().collect(),
        }
    }

    fn find_violation(&self, asset: &TransferAsset) -> Option<String> {
        let metadata = match &asset.metadata {
            Some(m) => m,
            None => return Some("missing metadata".to_string()),
        };
        if metadata.content_length < 1 {
            return Some("contentLength must be >= 1".to_string());
        }
        if let Some(filename) = &metadata.filename {
            if filename.chars().any(|c| self.forbidden_chars.contains(&c)) {
                return Some(format!("Filename '{}' has unsupported characters", filename));
            }
        }
        None
    }
}

impl Stage for FailUnsupportedAssets {
    type In = TransferAsset;
    type Out = TransferAsset;

    #[tracing::instrument(name = "stage", skip_all, fields(name = STAGE_NAME))]
    fn run(
        &self,
        mut input: BoxStream<'static, TransferAsset>,
        ctrl: Arc<TransferController>,
        token: CancellationToken,
    ) -> BoxStream<'static, TransferAsset> {
        let forbidden_chars = self.forbidden_chars.clone();
        Box::pin(stream! {
            let checker = FailUnsupportedAssets { forbidden_chars };
            loop {
                let item = tokio::select! {
                    _ = token.cancelled() => break,
                    item = input.next() => item,
                };
                let Some(asset) = item else { break };
                ctrl.publish(TransferEvent::BeforeStage { stage: STAGE_NAME, asset_id: asset.id() });
                match checker.find_violation(&asset) {
                    Some(reason) => {
                        ctrl.notify_error(
                            asset.id(),
                            STAGE_NAME,
                            "EUNKNOWN".to_string(),
                            format!("File cannot be uploaded: {}", reason),
                        );
                    }
                    None => {
                        ctrl.publish(TransferEvent::AfterStage { stage: STAGE_NAME, asset_id: asset.id() });
                        yield asset;
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Asset, AssetMetadata};

    fn asset_with_filename(name: &str, length: u64) -> TransferAsset {
        TransferAsset::new(Asset::url("file:///a"), Asset::url("https://x/a"))
            .with_metadata(AssetMetadata::new(length).with_filename(name))
    }

    #[tokio::test]
    async fn rejects_forbidden_filename_characters() {
        let stage = FailUnsupportedAssets::new(":[]*?\"<>|#%&{}");
        let ctrl = Arc::new(TransferController::new());
        let bad = asset_with_filename("bad:name[1].jpg", 10);
        let bad_id = bad.id();
        let good = asset_with_filename("good.jpg", 10);

        let input: BoxStream<'static, TransferAsset> = Box::pin(futures::stream::iter(vec![bad, good]));
        let out: Vec<TransferAsset> = stage.run(input, ctrl.clone(), CancellationToken::new()).collect().await;

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].filename(), Some("good.jpg"));
        assert!(ctrl.has_failed(bad_id));
    }

    #[tokio::test]
    async fn rejects_zero_length_assets() {
        let stage = FailUnsupportedAssets::new("");
        let ctrl = Arc::new(TransferController::new());
        let asset = asset_with_filename("empty.bin", 0);
        let input: BoxStream<'static, TransferAsset> = Box::pin(futures::stream::iter(vec![asset]));
        let out: Vec<TransferAsset> = stage.run(input, ctrl, CancellationToken::new()).collect().await;
        assert!(out.is_empty());
    }
}
