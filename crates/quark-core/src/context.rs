//! Operation context — cancellation and per-call deadlines.
//!
//! Every provider, DNS, discovery and remote-command call receives an
//! [`OpContext`] and is driven through [`OpContext::run`], so a stalled
//! call fails with a `Timeout` instead of blocking its phase forever and a
//! cancelled operation stops at the next suspension point.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{Error, ErrorKind, Result};

/// Default deadline applied to a single external call.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, Clone)]
pub struct OpContext {
    cancel: CancellationToken,
    call_timeout: Duration,
}

impl Default for OpContext {
    fn default() -> Self {
        Self::new()
    }
}

impl OpContext {
    pub fn new() -> Self {
        Self {
            cancel: CancellationToken::new(),
            call_timeout: DEFAULT_CALL_TIMEOUT,
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    /// A context that is cancelled together with this one.
    pub fn child(&self) -> Self {
        Self {
            cancel: self.cancel.child_token(),
            call_timeout: self.call_timeout,
        }
    }

    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Drive `fut` under this context's cancellation token and call timeout.
    pub async fn run<F, T>(&self, what: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_cancelled() {
            return Err(Error::new(
                ErrorKind::Cancelled,
                format!("{what}: operation cancelled"),
            ));
        }

        tokio::select! {
            _ = self.cancel.cancelled() => {
                debug!(%what, "call cancelled");
                Err(Error::new(ErrorKind::Cancelled, format!("{what}: operation cancelled")))
            }
            res = tokio::time::timeout(self.call_timeout, fut) => match res {
                Ok(inner) => inner,
                Err(_) => {
                    debug!(%what, timeout = ?self.call_timeout, "call timed out");
                    Err(Error::new(
                        ErrorKind::Timeout,
                        format!("{what}: no result after {:?}", self.call_timeout),
                    ))
                }
            },
        }
    }
}
