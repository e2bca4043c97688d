//! `JoinTransferParts` (C10, §4.5): accounts completed parts back into
//! per-asset progress and yields the `TransferAsset` downstream once its
//! whole byte range is covered.

use crate::controller::{TransferController, TransferEvent};
use crate::model::{TransferAsset, TransferPart};
use crate::pipeline::Stage;
use crate::range::DisjointRangeSet;
use async_stream::stream;
use chrono::Utc;
use futures::stream::{BoxStream, StreamExt};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const STAGE_NAME: &str = "JoinTransferParts";

/// Joins completed parts against the owning assets supplied up front (the
/// facade hands `JoinTransferParts` the full asset set before parts start
/// arriving, so it can look up `content_length` and emit the asset once
/// complete).
pub struct JoinTransferParts {
    assets: Arc<Mutex<HashMap<crate::model::AssetId, JoinState>>>,
}

struct JoinState {
    asset: Option<TransferAsset>,
    content_length: u64,
    ranges: DisjointRangeSet,
}

impl JoinTransferParts {
    pub fn new(assets: Vec<TransferAsset>) -> Self {
        let mut map = HashMap::new();
        for asset in assets {
            let content_length = asset.content_length().unwrap_or(0);
            map.insert(
                asset.id(),
                JoinState {
                    asset: Some(asset),
                    content_length,
                    ranges: DisjointRangeSet::new(),
                },
            );
        }
        Self {
            assets: Arc::new(Mutex::new(map)),
        }
    }
}

impl Stage for JoinTransferParts {
    type In = TransferPart;
    type Out = TransferAsset;

    #[tracing::instrument(name = "stage", skip_all, fields(name = STAGE_NAME))]
    fn run(
        &self,
        mut input: BoxStream<'static, TransferPart>,
        ctrl: Arc<TransferController>,
        token: CancellationToken,
    ) -> BoxStream<'static, TransferAsset> {
        let assets = self.assets.clone();
        Box::pin(stream! {
            loop {
                let item = tokio::select! {
                    _ = token.cancelled() => break,
                    item = input.next() => item,
                };
                let Some(part) = item else { break };
                ctrl.publish(TransferEvent::BeforeStage { stage: STAGE_NAME, asset_id: part.asset_id });

                let completed = {
                    let mut states = assets.lock();
                    let Some(state) = states.get_mut(&part.asset_id) else {
                        continue;
                    };
                    state.ranges.add(part.range);
                    let transferred = state.ranges.total_length();
                    ctrl.publish(TransferEvent::FileProgress {
                        asset_id: part.asset_id,
                        bytes_transferred: transferred,
                        total_bytes: state.content_length,
                    });

                    if state.ranges.covers(state.content_length) {
                        states.remove(&part.asset_id).and_then(|mut s| s.asset.take())
                    } else {
                        None
                    }
                };

                if let Some(mut asset) = completed {
                    asset.mark_ended(Utc::now());
                    ctrl.publish(TransferEvent::FileEnd { asset_id: asset.id() });
                    ctrl.publish(TransferEvent::AfterStage { stage: STAGE_NAME, asset_id: asset.id() });
                    yield asset;
                }
            }
        })
    }
}
