use crate::{Error, Result};
pub use tokio_util::sync::CancellationToken;

/// The namespace used when the caller does not provide one.
pub const DEFAULT_NAMESPACE: &str = "default";

/// `Context` carries the per-request values every snapshotter call receives.
#[derive(Clone, Debug)]
pub struct Context {
    namespace: String,
    cancel: CancellationToken,
}

impl Context {
    pub fn new(namespace: &str) -> Self {
        Self::with_cancellation(namespace, CancellationToken::new())
    }

    pub fn with_cancellation(namespace: &str, cancel: CancellationToken) -> Self {
        let namespace = match namespace {
            "" => DEFAULT_NAMESPACE,
            ns => ns,
        };
        Context {
            namespace: namespace.to_string(),
            cancel,
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the context has been canceled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// Returns `Error::Canceled` once the context has been canceled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::Canceled);
        }
        Ok(())
    }

    /// A context in the same namespace that ignores cancellation of this one.
    ///
    /// Used for cleanup work that must run even when the request was aborted. The token is
    /// a fresh one, not a child token, since children are canceled with their parent.
    pub fn detached(&self) -> Self {
        Self::new(&self.namespace)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(DEFAULT_NAMESPACE)
    }
}

#[cfg(test)]
mod tests {
    use crate::context::{CancellationToken, Context};
    use crate::Error;

    #[test]
    fn test_empty_namespace_falls_back_to_default() {
        assert_eq!(Context::new("").namespace(), "default");
        assert_eq!(Context::new("k8s.io").namespace(), "k8s.io");
    }

    #[test]
    fn test_cancel_reaches_every_clone() {
        let token = CancellationToken::new();
        let ctx = Context::with_cancellation("default", token.clone());
        let other = ctx.clone();
        let detached = ctx.detached();

        assert!(ctx.check().is_ok());
        token.cancel();

        assert!(matches!(ctx.check(), Err(Error::Canceled)));
        assert!(other.is_cancelled());
        assert!(!detached.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_cancel() {
        let token = CancellationToken::new();
        let ctx = Context::with_cancellation("default", token.child_token());

        let waiter = tokio::spawn(async move { ctx.cancelled().await });
        token.cancel();
        waiter.await.unwrap();
    }
}
