//! Parallel batch execution.
//!
//! Every CPU-heavy step of the pipeline (scanning files, diffing, merging one
//! file) is an independent pure task over owned inputs. [`run_batch`] maps
//! such tasks over the rayon thread pool and sorts the outcomes into
//! successes and [`ItemFailure`]s. The coordinator then does the sequential
//! aggregation and writing.
//!
//! A fatal error (see [`Error::is_fatal`]) in any task stops the remaining
//! tasks from starting and is returned as the batch result. A batch in which
//! every item failed is fatal as well.

use crate::error::{Error, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};

/// A non-fatal failure of one batch item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemFailure {
    /// What the item was (usually a canonical name).
    pub item: String,
    pub error: String,
}

impl ItemFailure {
    pub fn new(item: impl Into<String>, error: &Error) -> Self {
        Self {
            item: item.into(),
            error: error.to_string(),
        }
    }
}

#[derive(Debug)]
pub struct BatchResult<T> {
    /// Successful outputs, in input order.
    pub successes: Vec<T>,
    pub failures: Vec<ItemFailure>,
}

/// Run `task` over `items` in parallel.
///
/// `label` names an item for failure reports. Output order matches input
/// order regardless of scheduling.
pub fn run_batch<I, T, L, F>(items: Vec<I>, label: L, task: F) -> Result<BatchResult<T>>
where
    I: Send,
    T: Send,
    L: Fn(&I) -> String + Sync,
    F: Fn(I) -> Result<T> + Sync,
{
    let total = items.len();
    let abort = AtomicBool::new(false);

    let outcomes: Vec<Option<(String, Result<T>)>> = items
        .into_par_iter()
        .map(|item| {
            if abort.load(Ordering::Relaxed) {
                return None;
            }
            let name = label(&item);
            let outcome = task(item);
            if matches!(&outcome, Err(e) if e.is_fatal()) {
                abort.store(true, Ordering::Relaxed);
            }
            Some((name, outcome))
        })
        .collect();

    let mut successes = Vec::with_capacity(total);
    let mut failures = Vec::new();
    for (name, outcome) in outcomes.into_iter().flatten() {
        match outcome {
            Ok(value) => successes.push(value),
            Err(e) if e.is_fatal() => {
                tracing::error!("Fatal error processing {}: {}", name, e);
                return Err(e);
            }
            Err(e) => {
                tracing::warn!("Failed to process {}: {}", name, e);
                failures.push(ItemFailure::new(name, &e));
            }
        }
    }

    if successes.is_empty() && !failures.is_empty() {
        return Err(Error::BatchFailed {
            count: failures.len(),
            first: failures[0].error.clone(),
        });
    }

    Ok(BatchResult {
        successes,
        failures,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_preserved() {
        let items: Vec<u32> = (0..64).collect();
        let result = run_batch(items, |i| i.to_string(), |i| Ok(i * 2)).unwrap();
        let expected: Vec<u32> = (0..64).map(|i| i * 2).collect();
        assert_eq!(result.successes, expected);
        assert!(result.failures.is_empty());
    }

    #[test]
    fn test_non_fatal_failures_collected() {
        let items: Vec<u32> = (0..10).collect();
        let result = run_batch(
            items,
            |i| format!("item-{i}"),
            |i| {
                if i % 3 == 0 {
                    Err(Error::corrupt_archive(format!("item-{i}"), "bad magic"))
                } else {
                    Ok(i)
                }
            },
        )
        .unwrap();
        assert_eq!(result.successes, vec![1, 2, 4, 5, 7, 8]);
        assert_eq!(result.failures.len(), 4);
        assert_eq!(result.failures[0].item, "item-0");
    }

    #[test]
    fn test_fatal_aborts_batch() {
        let items: Vec<u32> = (0..10).collect();
        let result = run_batch(
            items,
            |i| i.to_string(),
            |i| {
                if i == 5 {
                    Err(Error::Configuration("dump vanished".into()))
                } else {
                    Ok(i)
                }
            },
        );
        assert!(matches!(result, Err(Error::Configuration(_))));
    }

    #[test]
    fn test_all_failed_is_fatal() {
        let result: Result<BatchResult<u32>> = run_batch(
            vec![1u32, 2],
            |i| i.to_string(),
            |_| Err(Error::Consistency("nope".into())),
        );
        assert!(matches!(result, Err(Error::BatchFailed { count: 2, .. })));
    }

    #[test]
    fn test_empty_batch() {
        let result = run_batch(Vec::<u32>::new(), |i| i.to_string(), Ok).unwrap();
        assert!(result.successes.is_empty());
        assert!(result.failures.is_empty());
    }
}
