//! A small bounded worker-pool abstraction used for the per-node fan-out
//! inside `Dealer::assume` (spec.md §5, §9: "a proper work pool
//! abstraction with graceful completion rather than the source's pattern
//! of draining a channel with a default-return select").
//!
//! Each work item is a future; the pool runs at most `width` of them
//! concurrently and returns all results once every item has completed —
//! there is no early-exit/default-return path, every dispatched item is
//! accounted for in the output.

use futures_util::stream::{FuturesUnordered, StreamExt};

/// Run `items` through `make_future`, at most `width` concurrently,
/// preserving input order in the returned `Vec`.
pub async fn run_bounded<T, F, Fut, R>(items: Vec<T>, width: usize, make_future: F) -> Vec<R>
where
    F: Fn(usize, T) -> Fut,
    Fut: std::future::Future<Output = R>,
{
    let width = width.max(1);
    let mut results: Vec<Option<R>> = (0..items.len()).map(|_| None).collect();
    let mut pending = FuturesUnordered::new();
    let mut iter = items.into_iter().enumerate();

    for (idx, item) in iter.by_ref().take(width) {
        pending.push(async move { (idx, make_future(idx, item).await) });
    }

    while let Some((idx, result)) = pending.next().await {
        results[idx] = Some(result);
        if let Some((next_idx, next_item)) = iter.next() {
            pending.push(async move { (next_idx, make_future(next_idx, next_item).await) });
        }
    }

    results.into_iter().map(|r| r.expect("every dispatched index completes exactly once")).collect()
}

/// Width of the internal fan-out inside `Dealer::assume` (spec.md §5).
pub const ASSUME_FANOUT_WIDTH: usize = 4;
