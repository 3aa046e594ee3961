//! Completion signal of a distribution

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use super::DistributionError;

/// Result a distribution resolves with
pub type DistributionResult = Result<(), DistributionError>;

/// Resolves once every target acknowledged the distribution, or with the
/// reason it was abandoned
///
/// Dropping the handle does not cancel the distribution.
#[derive(Debug)]
#[must_use = "a completion handle does nothing unless awaited"]
pub struct CompletionHandle {
    distribution_key: u64,
    receiver: oneshot::Receiver<DistributionResult>,
}

impl CompletionHandle {
    /// Key of the distribution this handle waits for
    pub fn distribution_key(&self) -> u64 {
        self.distribution_key
    }

    /// A handle that resolves immediately with `result`
    pub fn ready(distribution_key: u64, result: DistributionResult) -> Self {
        let mut completion = Completion::default();
        let handle = completion.handle(distribution_key);
        completion.resolve(result);
        handle
    }
}

impl Future for CompletionHandle {
    type Output = DistributionResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let key = self.distribution_key;
        Pin::new(&mut self.receiver)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(DistributionError::Shutdown { key })))
    }
}

/// Coordinator side of every handle issued for one distribution
#[derive(Debug, Default)]
pub(crate) struct Completion {
    waiters: Vec<oneshot::Sender<DistributionResult>>,
}

impl Completion {
    pub(crate) fn handle(&mut self, distribution_key: u64) -> CompletionHandle {
        let (tx, rx) = oneshot::channel();
        self.waiters.push(tx);
        CompletionHandle {
            distribution_key,
            receiver: rx,
        }
    }

    pub(crate) fn resolve(self, result: DistributionResult) {
        for waiter in self.waiters {
            let _ = waiter.send(result.clone());
        }
    }
}
