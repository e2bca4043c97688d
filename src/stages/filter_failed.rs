//! `FilterFailedAssets` (C10): drops items belonging to an asset that has
//! already failed in a prior stage. `Chain` already applies this at every
//! seam built with `.then(..)`; this is the standalone form for pipelines
//! assembled by hand rather than through the combinator.

use crate::controller::TransferController;
use crate::pipeline::{AssetScoped, Stage};
use async_stream::stream;
use futures::stream::{BoxStream, StreamExt};
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

const STAGE_NAME: &str = "FilterFailedAssets";

pub struct FilterFailedAssets<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> FilterFailedAssets<T> {
    pub fn new() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<T> Default for FilterFailedAssets<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: AssetScoped + Send + 'static> Stage for FilterFailedAssets<T> {
    type In = T;
    type Out = T;

    #[tracing::instrument(name = "stage", skip_all, fields(name = STAGE_NAME))]
    fn run(
        &self,
        mut input: BoxStream<'static, T>,
        ctrl: Arc<TransferController>,
        token: CancellationToken,
    ) -> BoxStream<'static, T> {
        Box::pin(stream! {
            loop {
                let item = tokio::select! {
                    _ = token.cancelled() => break,
                    item = input.next() => item,
                };
                let Some(item) = item else { break };
                if !ctrl.has_failed(item.asset_id()) {
                    yield item;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::test_support::fixed_asset_id;
    use crate::model::AssetId;

    struct Tagged(u32);
    impl AssetScoped for Tagged {
        fn asset_id(&self) -> AssetId {
            fixed_asset_id(self.0)
        }
    }

    #[tokio::test]
    async fn drops_items_whose_asset_has_failed() {
        let ctrl = Arc::new(TransferController::new());
        ctrl.notify_error(fixed_asset_id(2), "SomeStage", "EIO".into(), "boom".into());

        let stage = FilterFailedAssets::<Tagged>::new();
        let input: BoxStream<'static, Tagged> =
            Box::pin(futures::stream::iter(vec![Tagged(1), Tagged(2), Tagged(3)]));
        let out: Vec<Tagged> = stage.run(input, ctrl, CancellationToken::new()).collect().await;

        let ids: Vec<u32> = out.iter().map(|t| t.0).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[tokio::test]
    async fn passes_everything_through_when_nothing_has_failed() {
        let ctrl = Arc::new(TransferController::new());
        let stage = FilterFailedAssets::<Tagged>::new();
        let input: BoxStream<'static, Tagged> = Box::pin(futures::stream::iter(vec![Tagged(1), Tagged(2)]));
        let out: Vec<Tagged> = stage.run(input, ctrl, CancellationToken::new()).collect().await;
        assert_eq!(out.len(), 2);
    }
}
