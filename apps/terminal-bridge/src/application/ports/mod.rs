//! Port Interfaces
//!
//! Contracts between the stream task manager and whatever supplies its
//! data. Infrastructure adapters implement these.
//!
//! - `FetchSource`: produces one value per symbol per tick

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

/// Failure reported by a [`FetchSource`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// The terminal could not be reached.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The terminal answered outside the protocol.
    #[error("protocol failure: {0}")]
    Protocol(String),

    /// Any other failure.
    #[error("{0}")]
    Other(String),
}

impl FetchError {
    /// Short label used for metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Protocol(_) => "protocol",
            Self::Other(_) => "other",
        }
    }
}

/// Produces a value for a symbol on each stream tick.
///
/// Implementations are called repeatedly and concurrently for different
/// symbols.
#[async_trait]
pub trait FetchSource: Send + Sync + 'static {
    /// Value produced per tick.
    type Output: Send + 'static;

    /// Fetch the current value for `symbol`.
    async fn fetch(&self, symbol: &str) -> Result<Self::Output, FetchError>;
}

/// [`FetchSource`] backed by an async closure.
pub struct FnSource<F, T> {
    f: F,
    _output: PhantomData<fn() -> T>,
}

impl<F, T> std::fmt::Debug for FnSource<F, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnSource").finish_non_exhaustive()
    }
}

/// Wrap an async closure as a [`FetchSource`].
pub const fn fetch_fn<F, Fut, T>(f: F) -> FnSource<F, T>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    T: Send + 'static,
{
    FnSource {
        f,
        _output: PhantomData,
    }
}

#[async_trait]
impl<F, Fut, T> FetchSource for FnSource<F, T>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    async fn fetch(&self, symbol: &str) -> Result<T, FetchError> {
        (self.f)(symbol.to_string()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn closure_source_forwards_symbol() {
        let source = fetch_fn(|symbol: String| async move { Ok(symbol.len()) });
        assert_eq!(source.fetch("EURUSD").await.unwrap(), 6);
    }

    #[tokio::test]
    async fn closure_source_forwards_errors() {
        let source = fetch_fn(|symbol: String| async move {
            Err::<(), _>(FetchError::Other(format!("no data for {symbol}")))
        });
        let err = source.fetch("XAUUSD").await.unwrap_err();
        assert_eq!(err.to_string(), "no data for XAUUSD");
        assert_eq!(err.kind(), "other");
    }
}
