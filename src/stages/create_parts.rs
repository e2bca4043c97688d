//! `CreateTransferParts` (C10, §4.3): expands each `TransferAsset` into one
//! or more `TransferPart`s according to its multipart target and whether
//! byte-range access is available.

use crate::controller::{TransferController, TransferEvent};
use crate::model::{AssetEndpoint, TransferAsset, TransferPart};
use crate::partsize::{calculate_part_size, generate_part_ranges};
use crate::pipeline::Stage;
use async_stream::stream;
use futures::stream::{BoxStream, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const STAGE_NAME: &str = "CreateTransferParts";

pub struct CreateTransferParts {
    preferred_part_size: u64,
    /// Whether a non-rangeable, non-multipart HTTP target may still be
    /// split into sequential parts (the form-POST create-asset servlet
    /// accepts chunked `file@Offset`/`chunk@Length` fields against a
    /// single URL; a block PUT target cannot, since each PUT replaces the
    /// whole resource rather than appending).
    allow_form_chunking: bool,
}

impl CreateTransferParts {
    pub fn new(preferred_part_size: u64) -> Self {
        Self {
            preferred_part_size,
            allow_form_chunking: false,
        }
    }

    /// Enables form-chunked splitting for HTTP targets that aren't
    /// rangeable and have no DAM multipart handshake. Only the form-POST
    /// facade should set this.
    pub fn with_form_chunking(mut self, allow: bool) -> Self {
        self.allow_form_chunking = allow;
        self
    }

    fn parts_for(&self, asset: &TransferAsset) -> Result<Vec<TransferPart>, crate::error::TransferError> {
        let content_length = asset.content_length().unwrap_or(0);

        if let Some(multipart) = &asset.multipart {
            if asset.accept_ranges {
                let num_urls = multipart.target_urls.len() as u64;
                let part_size = calculate_part_size(
                    num_urls,
                    content_length,
                    multipart.min_part_size,
                    multipart.max_part_size,
                    Some(self.preferred_part_size),
                )?;
                let ranges = generate_part_ranges(content_length, part_size);
                return ranges
                    .into_iter()
                    .zip(multipart.target_urls.iter())
                    .map(|(range, url)| {
                        TransferPart::new(
                            asset.id(),
                            asset.source.clone(),
                            vec![url.clone()],
                            range,
                            content_length,
                            multipart.part_headers.clone(),
                            multipart.max_part_size,
                        )
                    })
                    .collect();
            }
        }

        if asset.accept_ranges && asset.target.endpoint().is_file_url() {
            let ranges = generate_part_ranges(content_length, self.preferred_part_size);
            let url = asset.target.endpoint().as_url().unwrap().to_string();
            return ranges
                .into_iter()
                .map(|range| {
                    TransferPart::new(
                        asset.id(),
                        asset.source.clone(),
                        vec![url.clone()],
                        range,
                        content_length,
                        asset.target.part_headers().clone(),
                        content_length.max(1),
                    )
                })
                .collect();
        }

        let url = match asset.target.endpoint() {
            AssetEndpoint::Url(u) => u.clone(),
            AssetEndpoint::Blob(_) => String::new(),
        };
        let headers: HashMap<String, String> = asset.target.part_headers().clone();

        // Form-chunked upload (§6.3): the target doesn't support ranges and
        // there's no DAM multipart handshake, but the form protocol can
        // still split a large asset across sequential chunked POSTs.
        if self.allow_form_chunking && self.preferred_part_size > 0 && self.preferred_part_size < content_length {
            let ranges = generate_part_ranges(content_length, self.preferred_part_size);
            return ranges
                .into_iter()
                .map(|range| {
                    TransferPart::new(
                        asset.id(),
                        asset.source.clone(),
                        vec![url.clone()],
                        range,
                        content_length,
                        headers.clone(),
                        content_length.max(1),
                    )
                })
                .collect();
        }

        let whole = TransferPart::new(
            asset.id(),
            asset.source.clone(),
            vec![url],
            crate::range::ByteRange::new(0, content_length),
            content_length,
            headers,
            content_length.max(1),
        )?;
        Ok(vec![whole])
    }
}

impl Stage for CreateTransferParts {
    type In = TransferAsset;
    type Out = TransferPart;

    #[tracing::instrument(name = "stage", skip_all, fields(name = STAGE_NAME))]
    fn run(
        &self,
        mut input: BoxStream<'static, TransferAsset>,
        ctrl: Arc<TransferController>,
        token: CancellationToken,
    ) -> BoxStream<'static, TransferPart> {
        let preferred_part_size = self.preferred_part_size;
        let allow_form_chunking = self.allow_form_chunking;
        Box::pin(stream! {
            let creator = CreateTransferParts { preferred_part_size, allow_form_chunking };
            loop {
                let item = tokio::select! {
                    _ = token.cancelled() => break,
                    item = input.next() => item,
                };
                let Some(mut asset) = item else { break };
                ctrl.publish(TransferEvent::BeforeStage { stage: STAGE_NAME, asset_id: asset.id() });
                asset.mark_started(chrono::Utc::now());
                ctrl.publish(TransferEvent::FileStart { asset_id: asset.id() });
                match creator.parts_for(&asset) {
                    Ok(parts) => {
                        ctrl.publish(TransferEvent::AfterStage { stage: STAGE_NAME, asset_id: asset.id() });
                        for part in parts {
                            yield part;
                        }
                    }
                    Err(err) => {
                        ctrl.notify_error(asset.id(), STAGE_NAME, err.code().to_string(), err.to_string());
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Asset, AssetMetadata, AssetMultipart};

    #[tokio::test]
    async fn multipart_asset_emits_one_part_per_url() {
        let asset = TransferAsset::new(Asset::url("file:///a"), Asset::url("https://x/a"))
            .with_metadata(AssetMetadata::new(1000))
            .with_accept_ranges(true)
            .with_multipart(
                AssetMultipart::new(
                    vec!["https://x/1".into(), "https://x/2".into(), "https://x/3".into()],
                    100,
                    500,
                )
                .unwrap(),
            )
            .unwrap();

        let stage = CreateTransferParts::new(0);
        let ctrl = Arc::new(TransferController::new());
        let input: BoxStream<'static, TransferAsset> = Box::pin(futures::stream::iter(vec![asset]));
        let parts: Vec<TransferPart> = stage.run(input, ctrl, CancellationToken::new()).collect().await;

        assert_eq!(parts.len(), 3);
        let total: u64 = parts.iter().map(|p| p.range.len()).sum();
        assert_eq!(total, 1000);
    }

    #[tokio::test]
    async fn non_rangeable_asset_emits_single_whole_part() {
        let asset = TransferAsset::new(Asset::url("file:///a"), Asset::url("https://x/a"))
            .with_metadata(AssetMetadata::new(500));

        let stage = CreateTransferParts::new(10 * 1024 * 1024);
        let ctrl = Arc::new(TransferController::new());
        let input: BoxStream<'static, TransferAsset> = Box::pin(futures::stream::iter(vec![asset]));
        let parts: Vec<TransferPart> = stage.run(input, ctrl, CancellationToken::new()).collect().await;

        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].range.len(), 500);
    }

    #[tokio::test]
    async fn rangeable_file_target_uses_preferred_part_size() {
        let asset = TransferAsset::new(Asset::url("https://x/a"), Asset::url("file:///out.bin"))
            .with_metadata(AssetMetadata::new(1_000_000))
            .with_accept_ranges(true);

        let stage = CreateTransferParts::new(262_144);
        let ctrl = Arc::new(TransferController::new());
        let input: BoxStream<'static, TransferAsset> = Box::pin(futures::stream::iter(vec![asset]));
        let parts: Vec<TransferPart> = stage.run(input, ctrl, CancellationToken::new()).collect().await;

        assert_eq!(parts.len(), 4);
        assert!(parts.iter().all(|p| p.target_urls[0] == "file:///out.bin"));
    }

    #[tokio::test]
    async fn form_chunking_splits_http_target_when_enabled() {
        let asset = TransferAsset::new(Asset::url("file:///a"), Asset::url("https://x/createasset.html"))
            .with_metadata(AssetMetadata::new(1024));

        let stage = CreateTransferParts::new(512).with_form_chunking(true);
        let ctrl = Arc::new(TransferController::new());
        let input: BoxStream<'static, TransferAsset> = Box::pin(futures::stream::iter(vec![asset]));
        let parts: Vec<TransferPart> = stage.run(input, ctrl, CancellationToken::new()).collect().await;

        assert_eq!(parts.len(), 2);
        assert!(parts.iter().all(|p| p.is_chunked()));
    }

    #[tokio::test]
    async fn form_chunking_disabled_keeps_single_part_for_block_target() {
        let asset = TransferAsset::new(Asset::url("file:///a"), Asset::url("https://x/block"))
            .with_metadata(AssetMetadata::new(1024));

        let stage = CreateTransferParts::new(512);
        let ctrl = Arc::new(TransferController::new());
        let input: BoxStream<'static, TransferAsset> = Box::pin(futures::stream::iter(vec![asset]));
        let parts: Vec<TransferPart> = stage.run(input, ctrl, CancellationToken::new()).collect().await;

        assert_eq!(parts.len(), 1);
        assert!(!parts[0].is_chunked());
    }
}
