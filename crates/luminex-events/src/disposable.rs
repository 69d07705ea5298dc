//! Revocable subscriptions.
//!
//! ## Learning: Explicit Revocation
//!
//! A [`Disposable`] wraps the closure that undoes a registration. Dropping it
//! does *not* revoke anything: subscriptions often outlive the scope that
//! created them, so revocation is an explicit `dispose()` call. Group
//! related disposables in [`Disposables`] and dispose them together.

/// A single revocable registration.
#[must_use = "dropping a Disposable keeps the registration alive; call dispose() to revoke it"]
pub struct Disposable {
    revoke: Option<Box<dyn FnOnce() + Send>>,
}

impl Disposable {
    /// Creates a disposable that runs `revoke` once when disposed.
    pub fn new(revoke: impl FnOnce() + Send + 'static) -> Self {
        Self {
            revoke: Some(Box::new(revoke)),
        }
    }

    /// A disposable that does nothing.
    pub fn empty() -> Self {
        Self { revoke: None }
    }

    /// Combines several disposables into one.
    pub fn from_many(items: Vec<Disposable>) -> Self {
        Self::new(move || {
            for item in items {
                item.dispose();
            }
        })
    }

    /// Revokes the registration.
    pub fn dispose(mut self) {
        if let Some(revoke) = self.revoke.take() {
            revoke();
        }
    }
}

impl std::fmt::Debug for Disposable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Disposable")
            .field("pending", &self.revoke.is_some())
            .finish()
    }
}

/// A disposal group.
#[derive(Debug, Default)]
pub struct Disposables {
    items: Vec<Disposable>,
}

impl Disposables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, disposable: Disposable) {
        self.items.push(disposable);
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Disposes every member, most recent first, and empties the group.
    pub fn dispose_all(&mut self) {
        while let Some(item) = self.items.pop() {
            item.dispose();
        }
    }
}

impl Extend<Disposable> for Disposables {
    fn extend<T: IntoIterator<Item = Disposable>>(&mut self, iter: T) {
        self.items.extend(iter);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting(counter: &Arc<AtomicUsize>) -> Disposable {
        let counter = counter.clone();
        Disposable::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_dispose_runs_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        counting(&counter).dispose();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_does_not_revoke() {
        let counter = Arc::new(AtomicUsize::new(0));
        drop(counting(&counter));
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_composite_and_group() {
        let counter = Arc::new(AtomicUsize::new(0));
        Disposable::from_many(vec![counting(&counter), counting(&counter)]).dispose();
        assert_eq!(counter.load(Ordering::SeqCst), 2);

        let mut group = Disposables::new();
        group.push(counting(&counter));
        group.extend([counting(&counter), Disposable::empty()]);
        assert_eq!(group.len(), 3);
        group.dispose_all();
        assert!(group.is_empty());
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }
}
