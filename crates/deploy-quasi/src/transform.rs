//! Manifest transformation
//!
//! A [`ManifestTransformer`] rewrites a bundle manifest. Two uses exist:
//! - install pipelines apply transformers to the manifests of bundle artifacts
//! - commits install a bundle under a scoped override so the framework sees the manifest
//!   the planner resolved rather than the one on disk
//!
//! Scoped overrides live on a per-thread stack. [`TransformerScope`] pushes on creation
//! and pops on drop, so an override never outlives the install call it wraps and never
//! leaks to installs running on other threads.

use deploy_artifact::BundleManifest;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

/// Rewrites bundle manifests
pub trait ManifestTransformer: Send + Sync {
    fn transform(&self, manifest: BundleManifest) -> BundleManifest;
}

impl<F> ManifestTransformer for F
where
    F: Fn(BundleManifest) -> BundleManifest + Send + Sync,
{
    fn transform(&self, manifest: BundleManifest) -> BundleManifest {
        self(manifest)
    }
}

/// Transformer that discards its input and yields a fixed manifest
#[derive(Debug, Clone)]
pub struct ReplaceManifest(pub BundleManifest);

impl ManifestTransformer for ReplaceManifest {
    fn transform(&self, _manifest: BundleManifest) -> BundleManifest {
        self.0.clone()
    }
}

thread_local! {
    static STACK: RefCell<Vec<Arc<dyn ManifestTransformer>>> = RefCell::new(Vec::new());
}

/// Per-thread stack of scoped transformers
pub struct ManifestTransformerStack;

impl ManifestTransformerStack {
    pub fn push(transformer: Arc<dyn ManifestTransformer>) {
        STACK.with(|stack| stack.borrow_mut().push(transformer));
    }

    pub fn pop() -> Option<Arc<dyn ManifestTransformer>> {
        STACK.with(|stack| stack.borrow_mut().pop())
    }

    /// Number of transformers pushed on the current thread
    #[must_use]
    pub fn depth() -> usize {
        STACK.with(|stack| stack.borrow().len())
    }

    fn top() -> Option<Arc<dyn ManifestTransformer>> {
        STACK.with(|stack| stack.borrow().last().cloned())
    }
}

/// Apply the innermost scoped transformer of the current thread, if any
#[must_use]
pub fn transform_manifest(manifest: BundleManifest) -> BundleManifest {
    match ManifestTransformerStack::top() {
        Some(transformer) => transformer.transform(manifest),
        None => manifest,
    }
}

/// Guard keeping a transformer pushed for its lifetime
#[must_use = "the transformer is popped when the scope is dropped"]
pub struct TransformerScope {
    _thread_bound: PhantomData<*const ()>,
}

impl TransformerScope {
    pub fn push(transformer: Arc<dyn ManifestTransformer>) -> Self {
        ManifestTransformerStack::push(transformer);
        Self {
            _thread_bound: PhantomData,
        }
    }
}

impl Drop for TransformerScope {
    fn drop(&mut self) {
        ManifestTransformerStack::pop();
    }
}
