//! Pipeline runtime (C6): a lazy async producer chain. Each stage consumes
//! an input stream and the shared controller and yields a (possibly
//! different-typed) output stream. A `FilterFailedAssets`-shaped hook is
//! implicitly inserted between every two stages whose items are
//! `AssetScoped`, dropping items belonging to an already-failed asset.

pub mod concurrent_map;

use crate::controller::TransferController;
use crate::model::AssetId;
use futures::stream::{BoxStream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;

/// Items that belong to one `TransferAsset`, letting the pipeline's
/// implicit filter hook consult `TransferController::has_failed`.
pub trait AssetScoped {
    fn asset_id(&self) -> AssetId;
}

impl AssetScoped for crate::model::TransferAsset {
    fn asset_id(&self) -> AssetId {
        self.id()
    }
}

impl AssetScoped for crate::model::TransferPart {
    fn asset_id(&self) -> AssetId {
        self.asset_id
    }
}

/// A single pipeline stage: a lazy async producer from `In` to `Out`.
///
/// Implementations typically build their output stream with
/// `async_stream::stream!`, the closest Rust idiom to a cooperative async
/// generator (§9 design note), and `select!` against `token` at every
/// suspension point so they stop producing promptly once it fires —
/// `Pipeline::run` cancels it the moment its caller drops the output
/// stream, whether that's after full consumption or an early abandonment.
pub trait Stage: Send + Sync + 'static {
    type In: Send + 'static;
    type Out: Send + 'static;

    fn run(
        &self,
        input: BoxStream<'static, Self::In>,
        ctrl: Arc<TransferController>,
        token: CancellationToken,
    ) -> BoxStream<'static, Self::Out>;
}

/// Two stages glued end-to-end, with the implicit failed-asset filter
/// inserted at the seam when the intermediate type is `AssetScoped`.
pub struct Chain<A, B> {
    a: A,
    b: B,
}

impl<A, B> Stage for Chain<A, B>
where
    A: Stage,
    B: Stage<In = A::Out>,
    A::Out: AssetScoped,
{
    type In = A::In;
    type Out = B::Out;

    fn run(
        &self,
        input: BoxStream<'static, Self::In>,
        ctrl: Arc<TransferController>,
        token: CancellationToken,
    ) -> BoxStream<'static, Self::Out> {
        let mid = self.a.run(input, ctrl.clone(), token.clone());
        let filtered_ctrl = ctrl.clone();
        let filtered = mid.filter(move |item| {
            let keep = !filtered_ctrl.has_failed(item.asset_id());
            async move { keep }
        });
        self.b.run(Box::pin(filtered), ctrl, token)
    }
}

/// An ordered list of stages, built by `.then(..)`, driven to completion by
/// `.run(..)`.
pub struct Pipeline<S> {
    stage: S,
}

impl<S: Stage> Pipeline<S> {
    pub fn new(stage: S) -> Self {
        Self { stage }
    }

    pub fn then<B: Stage<In = S::Out>>(self, next: B) -> Pipeline<Chain<S, B>>
    where
        S::Out: AssetScoped,
    {
        Pipeline {
            stage: Chain {
                a: self.stage,
                b: next,
            },
        }
    }

    /// Drive the composed pipeline to completion given the initial stream.
    ///
    /// Owns the `CancellationToken` for this run: every stage gets a clone
    /// to `select!` against, and the token is cancelled the moment the
    /// returned stream is dropped, whether that's because the caller
    /// drained it fully or gave up on it early.
    pub fn run(
        self,
        input: BoxStream<'static, S::In>,
        ctrl: Arc<TransferController>,
    ) -> BoxStream<'static, S::Out> {
        let token = CancellationToken::new();
        let inner = self.stage.run(input, ctrl, token.clone());
        Box::pin(CancelOnDrop { inner, token })
    }
}

/// Cancels `token` when the wrapped stream is dropped, so every stage
/// downstream of a `Pipeline::run` call stops promptly once its caller
/// stops polling — matching the contract documented on `Stage::run`.
struct CancelOnDrop<S> {
    inner: S,
    token: CancellationToken,
}

impl<S: futures::Stream + Unpin> futures::Stream for CancelOnDrop<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<S> Drop for CancelOnDrop<S> {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
