//! `CloseFiles` (C10): drops the cached file handle for an asset's local
//! endpoint once its transfer has fully completed, so the handle doesn't
//! linger for the lifetime of a long-running batch.

use crate::controller::TransferController;
use crate::model::TransferAsset;
use crate::pipeline::Stage;
use async_stream::stream;
use futures::stream::{BoxStream, StreamExt};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const STAGE_NAME: &str = "CloseFiles";

pub struct CloseFiles;

impl Stage for CloseFiles {
    type In = TransferAsset;
    type Out = TransferAsset;

    #[tracing::instrument(name = "stage", skip_all, fields(name = STAGE_NAME))]
    fn run(
        &self,
        mut input: BoxStream<'static, TransferAsset>,
        ctrl: Arc<TransferController>,
        token: CancellationToken,
    ) -> BoxStream<'static, TransferAsset> {
        Box::pin(stream! {
            loop {
                let item = tokio::select! {
                    _ = token.cancelled() => break,
                    item = input.next() => item,
                };
                let Some(asset) = item else { break };
                if let Some(url) = asset.source.endpoint().as_url() {
                    ctrl.file_cache().close_path(url);
                }
                if let Some(url) = asset.target.endpoint().as_url() {
                    ctrl.file_cache().close_path(url);
                }
                yield asset;
            }
        })
    }
}
