//! Generation counter + cancellation token per preview field.
//! A response may only be applied while its guard is still current.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

/// Issues monotonically increasing generations. Advancing cancels the
/// token handed out for the previous generation.
pub struct TaskGeneration {
    parent: CancellationToken,
    current_token: RwLock<CancellationToken>,
    generation: Arc<AtomicU64>,
}

impl TaskGeneration {
    pub fn new() -> Self {
        Self::with_parent(&CancellationToken::new())
    }

    /// Every issued token is a child of `parent`, so cancelling the parent
    /// aborts all generations at once.
    pub fn with_parent(parent: &CancellationToken) -> Self {
        Self {
            parent: parent.clone(),
            current_token: RwLock::new(parent.child_token()),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Cancel the current generation and start the next one.
    pub fn advance(&self) -> GenerationGuard {
        let mut token_guard = self.current_token.write();
        token_guard.cancel();
        let token = self.parent.child_token();
        *token_guard = token.clone();
        let gen = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        GenerationGuard::new(Arc::clone(&self.generation), gen, token)
    }

    /// Invalidate whatever is in flight without issuing a new token.
    pub fn invalidate(&self) -> u64 {
        let token_guard = self.current_token.read();
        token_guard.cancel();
        self.generation.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn current_generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }
}

impl Default for TaskGeneration {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone)]
pub struct GenerationGuard {
    generation: Arc<AtomicU64>,
    my_generation: u64,
    token: CancellationToken,
}

impl GenerationGuard {
    fn new(generation: Arc<AtomicU64>, my_generation: u64, token: CancellationToken) -> Self {
        Self {
            generation,
            my_generation,
            token,
        }
    }

    #[inline]
    pub fn is_current(&self) -> bool {
        self.generation.load(Ordering::SeqCst) == self.my_generation
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    #[inline]
    pub fn should_continue(&self) -> bool {
        !self.is_cancelled() && self.is_current()
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn my_generation(&self) -> u64 {
        self.my_generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advancing_supersedes_previous_guard() {
        let gen = TaskGeneration::new();
        let first = gen.advance();
        assert!(first.should_continue());

        let second = gen.advance();
        assert!(first.is_cancelled());
        assert!(!first.is_current());
        assert!(second.should_continue());
        assert_eq!(second.my_generation(), 2);
    }

    #[test]
    fn invalidate_cancels_without_new_token() {
        let gen = TaskGeneration::new();
        let guard = gen.advance();
        assert_eq!(gen.invalidate(), 2);
        assert!(!guard.should_continue());
        assert_eq!(gen.current_generation(), 2);
    }

    #[test]
    fn parent_cancellation_reaches_every_generation() {
        let root = CancellationToken::new();
        let a = TaskGeneration::with_parent(&root);
        let b = TaskGeneration::with_parent(&root);
        let ga = a.advance();
        let gb = b.advance();

        root.cancel();
        assert!(ga.is_cancelled());
        assert!(gb.is_cancelled());
        assert!(a.advance().is_cancelled());
    }
}
