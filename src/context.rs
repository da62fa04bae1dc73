//! Cancellation context passed to every entry point.

use tokio_util::sync::CancellationToken;

use crate::error::{FrameworkError, Result};

/// Request-scoped cancellation context.
///
/// Cloning is cheap; clones share the same cancellation state. Child contexts
/// are cancelled with their parent but can also be cancelled on their own.
#[derive(Debug, Clone, Default)]
pub struct Context {
    token: CancellationToken,
}

impl Context {
    /// A context that is never cancelled unless [`Context::cancel`] is called.
    pub fn background() -> Self {
        Self::default()
    }

    /// Wraps an existing token, e.g. one owned by the host transport.
    pub fn with_token(token: CancellationToken) -> Self {
        Self { token }
    }

    /// Derives a child context.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Cancels this context and all of its children.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns true once cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns [`FrameworkError::Cancelled`] once cancelled.
    ///
    /// # Example
    ///
    /// ```
    /// use vaultframe::Context;
    ///
    /// let ctx = Context::background();
    /// assert!(ctx.check().is_ok());
    /// ctx.cancel();
    /// assert!(ctx.check().is_err());
    /// ```
    pub fn check(&self) -> Result<()> {
        if self.token.is_cancelled() {
            Err(FrameworkError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolves when the context is cancelled.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// The underlying token.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_cancelled_with_parent() {
        let parent = Context::background();
        let child = parent.child();

        assert!(!child.is_cancelled());
        parent.cancel();
        assert!(child.is_cancelled());
        assert!(matches!(child.check(), Err(FrameworkError::Cancelled)));
    }

    #[test]
    fn test_child_cancel_does_not_propagate_up() {
        let parent = Context::background();
        let child = parent.child();

        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let ctx = Context::background();
        let waiter = ctx.clone();
        let handle = tokio::spawn(async move { waiter.cancelled().await });

        ctx.cancel();
        handle.await.unwrap();
    }
}
