//! Bounded-concurrency batch runner with per-batch failure isolation.

use std::future::Future;

use futures::stream::{self, StreamExt};

use crate::error::PipelineError;

/// One failed batch.
#[derive(Debug)]
pub struct BatchFailure {
    pub label: String,
    pub error: PipelineError,
}

/// Successes and failures from one [`run_batches`] call.
#[derive(Debug)]
pub struct BatchReport<T> {
    pub succeeded: Vec<T>,
    pub failed: Vec<BatchFailure>,
}

impl<T> BatchReport<T> {
    #[must_use]
    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }
}

/// Runs `op` over every labelled batch with at most `concurrency` in flight.
///
/// A failed batch is logged and recorded; it never cancels its siblings and
/// is not retried here.
pub async fn run_batches<I, T, F, Fut>(
    batches: Vec<(String, I)>,
    concurrency: usize,
    op: F,
) -> BatchReport<T>
where
    F: Fn(I) -> Fut,
    Fut: Future<Output = Result<T, PipelineError>>,
{
    let results: Vec<(String, Result<T, PipelineError>)> = stream::iter(batches)
        .map(|(label, input)| {
            let fut = op(input);
            async move { (label, fut.await) }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut report = BatchReport {
        succeeded: Vec::with_capacity(results.len()),
        failed: Vec::new(),
    };

    for (label, result) in results {
        match result {
            Ok(value) => report.succeeded.push(value),
            Err(error) => {
                tracing::warn!(batch = %label, error = %error, "batch failed");
                report.failed.push(BatchFailure { label, error });
            }
        }
    }

    report
}

/// Splits `items` into labelled chunks of at most `size`.
pub fn chunk_labelled<T: Clone>(prefix: &str, items: &[T], size: usize) -> Vec<(String, Vec<T>)> {
    items
        .chunks(size.max(1))
        .enumerate()
        .map(|(i, chunk)| (format!("{prefix}#{i}"), chunk.to_vec()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn failed_batch_does_not_cancel_siblings() {
        let batches = chunk_labelled("acme", &[1, 2, 3, 4, 5, 6, 7], 3);
        assert_eq!(batches.len(), 3);

        let report = run_batches(batches, 2, |items: Vec<i32>| async move {
            if items.contains(&4) {
                Err(PipelineError::Validation("bad batch".to_string()))
            } else {
                Ok(items.iter().sum::<i32>())
            }
        })
        .await;

        let mut sums = report.succeeded.clone();
        sums.sort_unstable();
        assert_eq!(sums, vec![6, 7]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].label, "acme#1");
        assert_eq!(report.total(), 3);
    }

    #[tokio::test]
    async fn concurrency_is_bounded() {
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let batches: Vec<(String, ())> = (0..8).map(|i| (format!("b{i}"), ())).collect();

        let report = run_batches(batches, 3, |()| {
            let in_flight = Arc::clone(&in_flight);
            let peak = Arc::clone(&peak);
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok::<_, PipelineError>(())
            }
        })
        .await;

        assert_eq!(report.succeeded.len(), 8);
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }
}
