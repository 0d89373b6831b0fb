//! Single-use release handles.
//!
//! Every resource the environment hands out (retained selections, store
//! subscriptions, in-flight requests) is represented by an owned token.
//! Releasing consumes the token, so releasing twice does not type-check.
//! A token that is dropped without being disposed releases itself.

use std::fmt;

type Release = Box<dyn FnOnce()>;

/// An owned handle to a releasable resource.
pub struct Disposable {
    label: &'static str,
    release: Option<Release>,
}

impl Disposable {
    /// Creates a handle that runs `release` exactly once.
    pub fn new(label: &'static str, release: impl FnOnce() + 'static) -> Self {
        Self {
            label,
            release: Some(Box::new(release)),
        }
    }

    /// Creates a handle that owns nothing.
    pub fn noop() -> Self {
        Self {
            label: "noop",
            release: None,
        }
    }

    /// Returns the label given at construction.
    pub fn label(&self) -> &'static str {
        self.label
    }

    /// Releases the resource.
    pub fn dispose(mut self) {
        self.release_now();
    }

    /// Drops the handle without releasing the resource.
    pub fn forget(mut self) {
        self.release = None;
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            tracing::trace!(label = self.label, "dispose");
            release();
        }
    }
}

impl Drop for Disposable {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for Disposable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Disposable")
            .field("label", &self.label)
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// A retain handle keeping a selection's records alive in the store.
///
/// Obtained from [`Environment::retain`](crate::Environment::retain).
#[derive(Debug)]
pub struct SelectionReference {
    inner: Disposable,
}

impl SelectionReference {
    /// Creates a reference that runs `release` when disposed.
    pub fn new(release: impl FnOnce() + 'static) -> Self {
        Self {
            inner: Disposable::new("selection_reference", release),
        }
    }

    /// Releases the retained selection.
    pub fn dispose(self) {
        self.inner.dispose();
    }
}
