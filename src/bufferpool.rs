//! Memory buffer pool (C5): a fixed aggregate byte budget divided into
//! fixed-size blocks, with back-pressure when the budget is exhausted.
//!
//! Exhaustion is never an error (§7) — callers simply suspend on
//! `allocate` until a `Permit` is dropped and its blocks are released.

use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// A bounded pool of `block_size`-byte blocks, `total_bytes / block_size`
/// of them in total.
pub struct BufferPool {
    semaphore: Arc<Semaphore>,
    block_size: u64,
}

/// An allocated allotment of blocks. Dropping it returns the blocks to the
/// pool (the semaphore permit is released on drop).
pub struct BufferAllocation {
    _permit: OwnedSemaphorePermit,
    byte_capacity: u64,
}

impl BufferAllocation {
    pub fn byte_capacity(&self) -> u64 {
        self.byte_capacity
    }
}

impl BufferPool {
    /// `total_bytes` is the aggregate budget; `block_size` is the unit of
    /// allocation. Per §9 Open Questions, when callers are sizing the pool
    /// for a multi-file batch with no `preferredPartSize`, the safe minimum
    /// block size is `max(min(minPartSize across files), preferredPartSize or 0)`
    /// — that computation lives in the facade that constructs the pool,
    /// not here.
    pub fn new(total_bytes: u64, block_size: u64) -> Self {
        let block_size = block_size.max(1);
        let num_blocks = (total_bytes / block_size).max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(num_blocks as usize)),
            block_size,
        }
    }

    /// Allocate the smallest number of blocks whose aggregate size is
    /// `>= n` bytes, suspending until enough blocks are free.
    pub async fn allocate(&self, n: u64) -> BufferAllocation {
        let blocks = n.div_ceil(self.block_size).max(1) as u32;
        let permit = self
            .semaphore
            .clone()
            .acquire_many_owned(blocks)
            .await
            .expect("buffer pool semaphore is never closed");
        BufferAllocation {
            _permit: permit,
            byte_capacity: blocks as u64 * self.block_size,
        }
    }

    /// Number of blocks currently free.
    pub fn available_blocks(&self) -> usize {
        self.semaphore.available_permits()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn allocate_rounds_up_to_whole_blocks() {
        let pool = BufferPool::new(10 * 1024, 1024);
        let alloc = pool.allocate(1500).await;
        assert_eq!(alloc.byte_capacity(), 2048);
    }

    #[tokio::test]
    async fn allocation_blocks_until_release() {
        let pool = Arc::new(BufferPool::new(1024, 1024));
        let first = pool.allocate(1024).await;
        assert_eq!(pool.available_blocks(), 0);

        let pool2 = pool.clone();
        let waiter = tokio::spawn(async move {
            let _second = pool2.allocate(1024).await;
        });

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(first);
        waiter.await.unwrap();
    }
}
