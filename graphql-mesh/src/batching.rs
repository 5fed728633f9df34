//! Per-tick request batching.
//!
//! Callers submitting under the same batch key while the executor polls one pass of
//! sibling futures end up in the same batch. The first caller (the leader) yields once,
//! then closes the batch and dispatches every collected item at once.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::FieldError;

type Waiter<O> = oneshot::Sender<Result<O, FieldError>>;

struct PendingBatch<I, O> {
    id: u64,
    items: Vec<I>,
    waiters: Vec<Waiter<O>>,
}

pub(crate) struct MicroBatcher<I, O> {
    next_id: AtomicU64,
    pending: Mutex<HashMap<String, PendingBatch<I, O>>>,
}

impl<I, O> Default for MicroBatcher<I, O> {
    fn default() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
        }
    }
}

impl<I, O> fmt::Debug for MicroBatcher<I, O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Use try_lock. If the batches are locked, we won't display them.
        let guard = self.pending.try_lock().ok_or(fmt::Error)?;
        f.debug_map()
            .entries(guard.iter().map(|(key, batch)| (key, batch.items.len())))
            .finish()
    }
}

impl<I, O> MicroBatcher<I, O> {
    fn take(&self, key: &str, id: u64) -> Option<PendingBatch<I, O>> {
        let mut pending = self.pending.lock();
        match pending.get(key) {
            Some(batch) if batch.id == id => pending.remove(key),
            _ => None,
        }
    }

    #[cfg(test)]
    pub(crate) fn open_batches(&self) -> usize {
        self.pending.lock().len()
    }
}

/// Removes the leader's batch if the leader is dropped before it dispatched.
struct LeaderGuard<'a, I, O> {
    batcher: &'a MicroBatcher<I, O>,
    key: &'a str,
    id: u64,
    armed: bool,
}

impl<I, O> LeaderGuard<'_, I, O> {
    fn close(mut self) -> Option<PendingBatch<I, O>> {
        self.armed = false;
        self.batcher.take(self.key, self.id)
    }
}

impl<I, O> Drop for LeaderGuard<'_, I, O> {
    fn drop(&mut self) {
        if self.armed {
            // dropping the senders wakes every waiter with an error
            self.batcher.take(self.key, self.id);
        }
    }
}

impl<I, O> MicroBatcher<I, O>
where
    I: Send,
    O: Send,
{
    /// Adds `item` to the open batch for `key`, opening one if needed, and waits for its output.
    ///
    /// `dispatch` runs once per batch, on the leader, and must return one output per item.
    pub(crate) async fn submit<F, Fut>(
        &self,
        key: String,
        item: I,
        dispatch: F,
    ) -> Result<O, FieldError>
    where
        F: FnOnce(Vec<I>) -> Fut,
        Fut: Future<Output = Vec<Result<O, FieldError>>>,
    {
        let (sender, receiver) = oneshot::channel();
        let leader_id = {
            let mut pending = self.pending.lock();
            match pending.get_mut(&key) {
                Some(batch) => {
                    batch.items.push(item);
                    batch.waiters.push(sender);
                    None
                }
                None => {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    pending.insert(
                        key.clone(),
                        PendingBatch {
                            id,
                            items: vec![item],
                            waiters: vec![sender],
                        },
                    );
                    Some(id)
                }
            }
        };

        if let Some(id) = leader_id {
            let guard = LeaderGuard {
                batcher: self,
                key: &key,
                id,
                armed: true,
            };
            tokio::task::yield_now().await;
            if let Some(batch) = guard.close() {
                let PendingBatch { items, waiters, .. } = batch;
                tracing::debug!(batch_key = %key, size = items.len(), "dispatching batch");
                let expected = waiters.len();
                let mut outputs = dispatch(items).await.into_iter();
                for waiter in waiters {
                    let output = outputs.next().unwrap_or_else(|| {
                        Err(FieldError::new(format!(
                            "batch returned fewer results than the {expected} requested"
                        )))
                    });
                    // the receiver may be gone if its caller was cancelled
                    let _ = waiter.send(output);
                }
            }
        }

        receiver.await.unwrap_or_else(|_| {
            Err(FieldError::new(
                "batched call was cancelled before it was dispatched",
            ))
        })
    }

}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    use futures::future::join_all;

    use super::*;

    #[tokio::test]
    async fn groups_submissions_of_one_poll_pass() {
        let batcher: MicroBatcher<u32, u32> = MicroBatcher::default();
        let dispatches = Arc::new(AtomicUsize::new(0));

        let results = join_all((0..5).map(|item| {
            let dispatches = dispatches.clone();
            batcher.submit("double".into(), item, move |items| async move {
                dispatches.fetch_add(1, Ordering::SeqCst);
                items.into_iter().map(|item| Ok(item * 2)).collect()
            })
        }))
        .await;

        assert_eq!(dispatches.load(Ordering::SeqCst), 1);
        assert_eq!(
            results.into_iter().map(Result::unwrap).collect::<Vec<_>>(),
            vec![0, 2, 4, 6, 8]
        );
        assert_eq!(batcher.open_batches(), 0);
    }

    #[tokio::test]
    async fn keys_batch_independently() {
        let batcher: MicroBatcher<u32, String> = MicroBatcher::default();
        let dispatches = Arc::new(AtomicUsize::new(0));

        let results = join_all((0..4).map(|item| {
            let dispatches = dispatches.clone();
            let key = if item % 2 == 0 { "even" } else { "odd" };
            batcher.submit(key.into(), item, move |items| async move {
                dispatches.fetch_add(1, Ordering::SeqCst);
                items.iter().map(|item| Ok(format!("{key}:{item}"))).collect()
            })
        }))
        .await;

        assert_eq!(dispatches.load(Ordering::SeqCst), 2);
        assert_eq!(
            results.into_iter().map(Result::unwrap).collect::<Vec<_>>(),
            vec!["even:0", "odd:1", "even:2", "odd:3"]
        );
    }

    #[tokio::test]
    async fn later_submissions_start_a_new_batch() {
        let batcher: MicroBatcher<u32, u32> = MicroBatcher::default();
        let dispatches = Arc::new(AtomicUsize::new(0));
        for item in 0..2 {
            let dispatches = dispatches.clone();
            let result = batcher
                .submit("k".into(), item, move |items| async move {
                    dispatches.fetch_add(1, Ordering::SeqCst);
                    items.into_iter().map(Ok).collect()
                })
                .await;
            assert_eq!(result, Ok(item));
        }
        assert_eq!(dispatches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn short_dispatch_results_fail_the_missing_waiters() {
        let batcher: MicroBatcher<u32, u32> = MicroBatcher::default();
        let results = join_all((0..2).map(|item| {
            batcher.submit("k".into(), item, |_items| async move { vec![Ok(1)] })
        }))
        .await;
        assert_eq!(results[0], Ok(1));
        assert!(results[1].is_err());
    }

    #[tokio::test]
    async fn dropping_the_leader_removes_its_batch() {
        let batcher: MicroBatcher<u32, u32> = MicroBatcher::default();
        let mut leader = Box::pin(batcher.submit("k".into(), 1, |items| async move {
            items.into_iter().map(Ok).collect()
        }));
        assert!(futures::poll!(leader.as_mut()).is_pending());
        assert_eq!(batcher.open_batches(), 1);
        drop(leader);
        assert_eq!(batcher.open_batches(), 0);
    }
}
