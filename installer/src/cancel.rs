//! Cooperative cancellation for an installation run.
//!
//! A [`CancellationToken`] is a shared flag polled by long-running work at
//! safe points. Child tokens observe their ancestors, so a caller-supplied
//! token and the run's internal fail-fast token can be checked as one.

use crate::error::{InstallerError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// A cloneable cancellation flag.
///
/// Clones share the same flag. A [`child`](Self::child) has its own flag and
/// additionally reports cancellation when any ancestor is cancelled;
/// cancelling the child does not affect the parent.
///
/// # Examples
///
/// ```
/// use runtime_installer::cancel::CancellationToken;
///
/// let parent = CancellationToken::new();
/// let child = parent.child();
/// child.cancel();
/// assert!(child.is_cancelled());
/// assert!(!parent.is_cancelled());
///
/// parent.cancel();
/// assert!(parent.child().is_cancelled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
    ancestors: Vec<Arc<AtomicBool>>,
}

impl CancellationToken {
    /// Create a fresh, uncancelled token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a token that is cancelled when either it or `self` is.
    #[must_use]
    pub fn child(&self) -> Self {
        let mut ancestors = self.ancestors.clone();
        ancestors.push(Arc::clone(&self.flag));
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            ancestors,
        }
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether this token or any ancestor has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
            || self
                .ancestors
                .iter()
                .any(|ancestor| ancestor.load(Ordering::SeqCst))
    }

    /// Return [`InstallerError::Cancelled`] if cancellation was requested.
    ///
    /// # Errors
    ///
    /// Returns [`InstallerError::Cancelled`] when the token is cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(InstallerError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancellationToken::new();
        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.check(), Err(InstallerError::Cancelled)));
    }

    #[test]
    fn grandchild_observes_root() {
        let root = CancellationToken::new();
        let grandchild = root.child().child();
        assert!(grandchild.check().is_ok());
        root.cancel();
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn sibling_children_are_independent() {
        let root = CancellationToken::new();
        let first = root.child();
        let second = root.child();
        first.cancel();
        assert!(!second.is_cancelled());
        assert!(!root.is_cancelled());
    }
}
