//! Bounded, order-preserving worker pool.
//!
//! `min(limit, items.len())` workers share one atomic cursor. Each worker
//! claims the next index, runs the item, and records the outcome at that
//! index. A failing or panicking item is captured as a `PoolError` in its
//! own slot and the worker moves on.

use futures::future::join_all;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{panic_message, PoolError};

pub type PoolOutcome<R> = Result<R, PoolError>;

/// Run `f` over every item with at most `limit` in flight. The output has
/// one entry per input, in input order. A `limit` of zero runs one worker.
pub async fn with_concurrency<'a, T, R, F, Fut>(
    items: &'a [T],
    limit: usize,
    f: F,
) -> Vec<PoolOutcome<R>>
where
    T: Sync,
    F: Fn(&'a T) -> Fut,
    Fut: Future<Output = anyhow::Result<R>> + 'a,
{
    let total = items.len();
    if total == 0 {
        return Vec::new();
    }
    let worker_count = limit.max(1).min(total);

    let cursor = AtomicUsize::new(0);
    let cursor = &cursor;
    let f = &f;

    let workers = (0..worker_count).map(move |_| async move {
        let mut done = Vec::new();
        loop {
            let idx = cursor.fetch_add(1, Ordering::SeqCst);
            if idx >= total {
                break;
            }
            let outcome = match AssertUnwindSafe(async { f(&items[idx]).await })
                .catch_unwind()
                .await
            {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => Err(PoolError::Failed(format!("{e:#}"))),
                Err(payload) => Err(PoolError::Panicked(panic_message(payload.as_ref()))),
            };
            done.push((idx, outcome));
        }
        done
    });

    let mut slots: Vec<Option<PoolOutcome<R>>> = (0..total).map(|_| None).collect();
    for (idx, outcome) in join_all(workers).await.into_iter().flatten() {
        slots[idx] = Some(outcome);
    }
    slots
        .into_iter()
        .map(|slot| slot.unwrap_or_else(|| Err(PoolError::Failed("item never claimed".into()))))
        .collect()
}
