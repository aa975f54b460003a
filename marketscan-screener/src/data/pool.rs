//! Bounded worker pool for intra-provider batch requests.
//!
//! Page and batch requests of a single provider run at most `size` at a
//! time. Tasks are owned by the caller's future: dropping it, or firing the
//! cancellation token, drops every outstanding request.

use futures::stream::{self, StreamExt};
use std::future::Future;
use tokio_util::sync::CancellationToken;

use super::provider::ProviderError;

/// Concurrency bound shared by an adapter's batch fetches.
#[derive(Debug, Clone, Copy)]
pub struct WorkerPool {
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Self {
        Self { size: size.max(1) }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Run every task with bounded concurrency.
    ///
    /// Results come back in input order, one per task. Returns
    /// `Err(Cancelled)` as soon as `cancel` fires.
    pub async fn run_all<I, F, T>(
        &self,
        cancel: &CancellationToken,
        tasks: I,
    ) -> Result<Vec<Result<T, ProviderError>>, ProviderError>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T, ProviderError>>,
    {
        let tasks: Vec<(usize, F)> = tasks.into_iter().enumerate().collect();
        let mut pending = std::pin::pin!(stream::iter(tasks)
            .map(indexed::<F, T>)
            .buffer_unordered(self.size));

        let mut done = Vec::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
                next = pending.next() => match next {
                    Some(item) => done.push(item),
                    None => break,
                },
            }
        }

        done.sort_by_key(|(i, _)| *i);
        Ok(done.into_iter().map(|(_, result)| result).collect())
    }

    /// Like [`WorkerPool::run_all`], keeping the successes.
    ///
    /// Fails with the first error only when every task failed.
    pub async fn collect_ok<I, F, T>(
        &self,
        cancel: &CancellationToken,
        tasks: I,
    ) -> Result<(Vec<T>, usize), ProviderError>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T, ProviderError>>,
    {
        let results = self.run_all(cancel, tasks).await?;
        let total = results.len();
        let mut ok = Vec::with_capacity(total);
        let mut first_err = None;
        for result in results {
            match result {
                Ok(v) => ok.push(v),
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        let failed = total - ok.len();
        match first_err {
            Some(e) if ok.is_empty() => Err(e),
            _ => Ok((ok, failed)),
        }
    }
}

async fn indexed<F, T>((i, task): (usize, F)) -> (usize, Result<T, ProviderError>)
where
    F: Future<Output = Result<T, ProviderError>>,
{
    (i, task.await)
}

impl Default for WorkerPool {
    fn default() -> Self {
        Self::new(3)
    }
}
