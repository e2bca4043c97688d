//! Concurrent map stage (C7): wraps any batch-oriented unit of work with
//! bounded fan-out, optional batching, and ordered/unordered delivery.

use crate::controller::TransferController;
use crate::pipeline::Stage;
use futures::future::BoxFuture;
use futures::stream::{BoxStream, StreamExt};
use std::cmp::Ordering;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// One inner invocation of a `ConcurrentMap`: takes a batch of inputs
/// (length 1 unless batching is configured) and produces the matching
/// outputs. Implementations are expected to report their own failures to
/// the controller and simply omit the failed items from the returned
/// batch — a dropped item never aborts its siblings.
pub trait BatchWorker: Send + Sync + 'static {
    type In: Send + 'static;
    type Out: Send + 'static;

    fn call(&self, batch: Vec<Self::In>, ctrl: Arc<TransferController>) -> BoxFuture<'static, Vec<Self::Out>>;
}

type CheckAddBatch<In> = Arc<dyn Fn(&[In], &In) -> bool + Send + Sync>;

/// Wraps `W` with concurrency control. `max_concurrent` bounds in-flight
/// invocations; `max_batch_length` caps items per invocation;
/// `check_add_batch` rejects a candidate that should not join the
/// accumulating batch (e.g. a different parent folder).
pub struct ConcurrentMap<W: BatchWorker> {
    worker: Arc<W>,
    max_concurrent: usize,
    max_batch_length: usize,
    ordered: bool,
    check_add_batch: Option<CheckAddBatch<W::In>>,
}

impl<W: BatchWorker> ConcurrentMap<W> {
    pub fn new(worker: W, max_concurrent: usize, max_batch_length: usize, ordered: bool) -> Self {
        Self {
            worker: Arc::new(worker),
            max_concurrent: max_concurrent.max(1),
            max_batch_length: max_batch_length.max(1),
            ordered,
            check_add_batch: None,
        }
    }

    pub fn with_check_add_batch(
        mut self,
        f: impl Fn(&[W::In], &W::In) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.check_add_batch = Some(Arc::new(f));
        self
    }
}

/// A completed batch tagged with its position in the input stream, so
/// ordered mode can replay output in the original sequence.
struct IndexedBatch<T>(usize, Vec<T>);

impl<T> PartialEq for IndexedBatch<T> {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}
impl<T> Eq for IndexedBatch<T> {}
impl<T> PartialOrd for IndexedBatch<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl<T> Ord for IndexedBatch<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.cmp(&other.0)
    }
}

impl<W: BatchWorker> Stage for ConcurrentMap<W> {
    type In = W::In;
    type Out = W::Out;

    fn run(
        &self,
        mut input: BoxStream<'static, Self::In>,
        ctrl: Arc<TransferController>,
        token: CancellationToken,
    ) -> BoxStream<'static, Self::Out> {
        let worker = self.worker.clone();
        let max_concurrent = self.max_concurrent;
        let max_batch_length = self.max_batch_length;
        let ordered = self.ordered;
        let check_add_batch = self.check_add_batch.clone();

        let (tx, rx) = mpsc::unbounded_channel::<IndexedBatch<W::Out>>();

        let span = tracing::info_span!("stage", name = "ConcurrentMap");
        let driver = {
            let token = token.clone();
            async move {
                let semaphore = Arc::new(Semaphore::new(max_concurrent));
                let mut current_batch: Vec<W::In> = Vec::new();
                let mut next_index = 0usize;
                let mut tasks: JoinSet<()> = JoinSet::new();

                loop {
                    let next = tokio::select! {
                        _ = token.cancelled() => break,
                        next = input.next() => next,
                    };
                    let Some(item) = next else { break };

                    let should_flush = match &check_add_batch {
                        Some(check) if !current_batch.is_empty() => !check(&current_batch, &item),
                        _ => false,
                    };
                    if should_flush {
                        spawn_flush(
                            &mut current_batch,
                            &mut next_index,
                            &semaphore,
                            &worker,
                            &ctrl,
                            &tx,
                            &mut tasks,
                        )
                        .await;
                    }
                    current_batch.push(item);
                    if current_batch.len() >= max_batch_length {
                        spawn_flush(
                            &mut current_batch,
                            &mut next_index,
                            &semaphore,
                            &worker,
                            &ctrl,
                            &tx,
                            &mut tasks,
                        )
                        .await;
                    }
                }
                if !current_batch.is_empty() {
                    spawn_flush(
                        &mut current_batch,
                        &mut next_index,
                        &semaphore,
                        &worker,
                        &ctrl,
                        &tx,
                        &mut tasks,
                    )
                    .await;
                }
                // Dropping `tasks` (a `JoinSet`) aborts whatever is still
                // in flight, so a cancelled run doesn't wait on it here.
                while tasks.join_next().await.is_some() {}
            }
        };
        let handle: JoinHandle<()> = tokio::spawn(driver.instrument(span));

        let received = UnboundedReceiverStream::new(rx);
        let out: BoxStream<'static, Self::Out> = if ordered {
            Box::pin(reorder(received))
        } else {
            Box::pin(received.flat_map(|batch| futures::stream::iter(batch.1)))
        };
        Box::pin(AbortOnDrop { inner: out, handle })
    }
}

/// Aborts the background batching task as soon as this stage's output
/// stream is dropped, so a caller that gives up early (or a cancelled
/// pipeline run, via `Pipeline::run`'s drop guard) doesn't leave it
/// running to drain the rest of the upstream in the background.
struct AbortOnDrop<S> {
    inner: S,
    handle: JoinHandle<()>,
}

impl<S: futures::Stream + Unpin> futures::Stream for AbortOnDrop<S> {
    type Item = S::Item;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl<S> Drop for AbortOnDrop<S> {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Acquire a concurrency permit (suspending the driver if `maxConcurrent`
/// invocations are already in flight), then spawn the batch as an
/// independent task so the driver can keep reading input while it runs.
#[allow(clippy::too_many_arguments)]
async fn spawn_flush<W: BatchWorker>(
    current_batch: &mut Vec<W::In>,
    next_index: &mut usize,
    semaphore: &Arc<Semaphore>,
    worker: &Arc<W>,
    ctrl: &Arc<TransferController>,
    tx: &mpsc::UnboundedSender<IndexedBatch<W::Out>>,
    tasks: &mut JoinSet<()>,
) {
    let batch = std::mem::take(current_batch);
    let index = *next_index;
    *next_index += 1;

    let permit = semaphore
        .clone()
        .acquire_owned()
        .await
        .expect("concurrent map semaphore is never closed");
    let worker = worker.clone();
    let ctrl = ctrl.clone();
    let tx = tx.clone();

    tasks.spawn(async move {
        let _permit = permit;
        let out = worker.call(batch, ctrl).await;
        let _ = tx.send(IndexedBatch(index, out));
    });
}

/// Replay batches produced out of order back into input order, yielding
/// their items individually once every preceding batch has arrived.
fn reorder<T: Send + 'static>(
    mut received: UnboundedReceiverStream<IndexedBatch<T>>,
) -> BoxStream<'static, T> {
    Box::pin(async_stream::stream! {
        use std::collections::BinaryHeap;
        use std::cmp::Reverse;

        let mut heap: BinaryHeap<Reverse<IndexedBatch<T>>> = BinaryHeap::new();
        let mut next_expected = 0usize;

        while let Some(batch) = received.next().await {
            heap.push(Reverse(batch));
            while let Some(Reverse(IndexedBatch(idx, _))) = heap.peek() {
                if *idx != next_expected {
                    break;
                }
                let Reverse(IndexedBatch(_, items)) = heap.pop().unwrap();
                next_expected += 1;
                for item in items {
                    yield item;
                }
            }
        }
        // Channel closed: flush whatever remains, in index order.
        let mut remaining: Vec<IndexedBatch<T>> = heap.into_iter().map(|Reverse(b)| b).collect();
        remaining.sort_by_key(|b| b.0);
        for batch in remaining {
            for item in batch.1 {
                yield item;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::time::Duration;

    struct SlowDouble {
        max_inflight: Arc<AtomicUsize>,
        observed_max: Arc<AtomicUsize>,
    }

    impl BatchWorker for SlowDouble {
        type In = u32;
        type Out = u32;

        fn call(&self, batch: Vec<u32>, _ctrl: Arc<TransferController>) -> BoxFuture<'static, Vec<u32>> {
            let max_inflight = self.max_inflight.clone();
            let observed_max = self.observed_max.clone();
            Box::pin(async move {
                let now = max_inflight.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                observed_max.fetch_max(now, AtomicOrdering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                max_inflight.fetch_sub(1, AtomicOrdering::SeqCst);
                batch.into_iter().map(|n| n * 2).collect()
            })
        }
    }

    #[tokio::test]
    async fn unordered_mode_bounds_concurrency() {
        let observed_max = Arc::new(AtomicUsize::new(0));
        let worker = SlowDouble {
            max_inflight: Arc::new(AtomicUsize::new(0)),
            observed_max: observed_max.clone(),
        };
        let stage = ConcurrentMap::new(worker, 2, 1, false);
        let ctrl = Arc::new(TransferController::new());
        let input: BoxStream<'static, u32> = Box::pin(futures::stream::iter(0..8));

        let mut out: Vec<u32> = stage.run(input, ctrl, CancellationToken::new()).collect().await;
        out.sort();
        assert_eq!(out, (0..8).map(|n| n * 2).collect::<Vec<_>>());
        assert!(observed_max.load(AtomicOrdering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn ordered_mode_preserves_input_order() {
        let worker = SlowDouble {
            max_inflight: Arc::new(AtomicUsize::new(0)),
            observed_max: Arc::new(AtomicUsize::new(0)),
        };
        let stage = ConcurrentMap::new(worker, 4, 1, true);
        let ctrl = Arc::new(TransferController::new());
        let input: BoxStream<'static, u32> = Box::pin(futures::stream::iter(0..6));

        let out: Vec<u32> = stage.run(input, ctrl, CancellationToken::new()).collect().await;
        assert_eq!(out, vec![0, 2, 4, 6, 8, 10]);
    }

    struct SumBatches;
    impl BatchWorker for SumBatches {
        type In = u32;
        type Out = u32;
        fn call(&self, batch: Vec<u32>, _ctrl: Arc<TransferController>) -> BoxFuture<'static, Vec<u32>> {
            Box::pin(async move { vec![batch.iter().sum()] })
        }
    }

    #[tokio::test]
    async fn batches_respect_max_batch_length() {
        let stage = ConcurrentMap::new(SumBatches, 2, 3, true);
        let ctrl = Arc::new(TransferController::new());
        let input: BoxStream<'static, u32> = Box::pin(futures::stream::iter(1..=7));

        let out: Vec<u32> = stage.run(input, ctrl, CancellationToken::new()).collect().await;
        // batches: [1,2,3] -> 6, [4,5,6] -> 15, [7] -> 7
        assert_eq!(out, vec![6, 15, 7]);
    }

    #[tokio::test]
    async fn check_add_batch_splits_on_predicate() {
        let stage = ConcurrentMap::new(SumBatches, 2, 10, true)
            .with_check_add_batch(|batch: &[u32], candidate: &u32| {
                batch.iter().all(|existing| existing % 2 == candidate % 2)
            });
        let ctrl = Arc::new(TransferController::new());
        let input: BoxStream<'static, u32> = Box::pin(futures::stream::iter(vec![1, 3, 2, 4, 5]));

        let out: Vec<u32> = stage.run(input, ctrl, CancellationToken::new()).collect().await;
        // [1,3] (odd) -> 4, [2,4] (even) -> 6, [5] (odd) -> 5
        assert_eq!(out, vec![4, 6, 5]);
    }

    struct CountingWorker {
        processed: Arc<AtomicUsize>,
    }
    impl BatchWorker for CountingWorker {
        type In = u32;
        type Out = u32;
        fn call(&self, batch: Vec<u32>, _ctrl: Arc<TransferController>) -> BoxFuture<'static, Vec<u32>> {
            let processed = self.processed.clone();
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                processed.fetch_add(batch.len(), AtomicOrdering::SeqCst);
                batch
            })
        }
    }

    #[tokio::test]
    async fn dropping_the_output_stream_stops_the_background_task() {
        let processed = Arc::new(AtomicUsize::new(0));
        let worker = CountingWorker { processed: processed.clone() };
        let stage = ConcurrentMap::new(worker, 1, 1, false);
        let ctrl = Arc::new(TransferController::new());
        let input: BoxStream<'static, u32> = Box::pin(futures::stream::iter(0..10_000));

        let mut out = stage.run(input, ctrl, CancellationToken::new());
        let _ = out.next().await;
        drop(out);

        let right_after_drop = processed.load(AtomicOrdering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let later = processed.load(AtomicOrdering::SeqCst);
        assert_eq!(
            right_after_drop, later,
            "background task kept draining the input after the output stream was dropped"
        );
    }
}
