//! Cooperative cancellation for renders.
//!
//! The pipeline checks the token between blocks only; an evaluator call in
//! progress always runs to completion.

/// A cloneable cancellation token shared between the caller and a render.
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    inner: tokio_util::sync::CancellationToken,
}

impl Cancellation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled()
    }

    /// Request cancellation. The render stops before its next block.
    pub fn cancel(&self) {
        self.inner.cancel()
    }
}

impl From<tokio_util::sync::CancellationToken> for Cancellation {
    fn from(token: tokio_util::sync::CancellationToken) -> Self {
        Self { inner: token }
    }
}
