use std::{
    fmt::{self, Display},
    mem,
    sync::Arc,
};

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::ast::{Ast, AstInfo, AstKey, Touch};

/// Touch rotation threshold: once a key accumulates this many touches, the
/// next retrieve drains them into the AST's info. Kept a power of two.
pub const TOUCH_DRAIN_THRESHOLD: u64 = 128;

/// The cache's only out-of-band error: an insert without `replace` hit an
/// existing key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    KeyExists(String),
}

impl Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::KeyExists(name) => write!(f, "a compiled template named '{name}' is already cached"),
        }
    }
}

impl std::error::Error for CacheError {}

/// Concurrent store of compiled templates plus a side table of usage
/// telemetry.
///
/// Two independent reader/writer locks guard the two maps. The lock order is
/// invariant: **cache before touch, never the reverse** — any method that
/// needs both acquires the AST map's lock first, or fully releases the touch
/// lock before touching the AST map. This keeps every interleaving of the
/// five operations deadlock-free against callers holding either lock's
/// guarded data.
///
/// Retrieval is the hot path: it takes the cache lock shared and only
/// escalates to the touch-write lock to rotate telemetry.
#[derive(Default)]
pub struct Cache {
    asts: RwLock<AHashMap<AstKey, Arc<Ast>>>,
    touches: RwLock<AHashMap<AstKey, Touch>>,
}

impl Cache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a compiled template.
    ///
    /// With `replace` unset, an existing key fails with
    /// [`CacheError::KeyExists`] and leaves the cached AST untouched. A
    /// successful insert initializes the key's touch entry to empty.
    pub fn insert(&self, ast: Ast, replace: bool) -> Result<Arc<Ast>, CacheError> {
        let mut asts = self.asts.write();
        if !replace && asts.contains_key(ast.key()) {
            return Err(CacheError::KeyExists(ast.name().to_string()));
        }
        let key = ast.key().clone();
        let shared = Arc::new(ast);
        asts.insert(key.clone(), Arc::clone(&shared));
        self.touches.write().insert(key, Touch::EMPTY);
        Ok(shared)
    }

    /// Fetches a compiled template.
    ///
    /// When the key's accumulated touch count has reached
    /// [`TOUCH_DRAIN_THRESHOLD`], the aggregate is atomically swapped for
    /// empty and folded into the AST's own info before the handle is
    /// returned.
    #[must_use]
    pub fn retrieve(&self, key: &AstKey) -> Option<Arc<Ast>> {
        let asts = self.asts.read();
        let ast = asts.get(key)?;
        let mut touches = self.touches.write();
        if let Some(touch) = touches.get_mut(key) {
            if touch.count() >= TOUCH_DRAIN_THRESHOLD {
                let drained = mem::replace(touch, Touch::EMPTY);
                ast.fold_touch(&drained);
            }
        }
        Some(Arc::clone(ast))
    }

    /// Removes a compiled template and its telemetry.
    ///
    /// Returns `None` when no touch entry exists for the key, `Some(true)`
    /// after removing both entries. Pending telemetry is discarded without a
    /// final drain. The touch lock is released before the cache lock is
    /// taken, preserving the lock order.
    pub fn remove(&self, key: &AstKey) -> Option<bool> {
        {
            let mut touches = self.touches.write();
            touches.remove(key)?;
        }
        self.asts.write().remove(key);
        Some(true)
    }

    /// Merges a usage record into the key's aggregate. Unknown keys are
    /// silently ignored.
    pub fn touch(&self, key: &AstKey, values: Touch) {
        let mut touches = self.touches.write();
        if let Some(entry) = touches.get_mut(key) {
            entry.aggregate(&values);
        }
    }

    /// The key's metadata, with any nonempty touch aggregate folded in first
    /// (info reads do not wait for the rotation threshold).
    #[must_use]
    pub fn info(&self, key: &AstKey) -> Option<AstInfo> {
        let asts = self.asts.read();
        let ast = asts.get(key)?;
        {
            let mut touches = self.touches.write();
            if let Some(touch) = touches.get_mut(key) {
                if !touch.is_empty() {
                    let drained = mem::replace(touch, Touch::EMPTY);
                    ast.fold_touch(&drained);
                }
            }
        }
        Some(ast.info())
    }

    /// Clears both maps. Cache lock first, then touch lock.
    pub fn drop_all(&self) {
        let mut asts = self.asts.write();
        let mut touches = self.touches.write();
        asts.clear();
        touches.clear();
    }

    #[must_use]
    pub fn count(&self) -> usize {
        self.asts.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.asts.read().is_empty()
    }

    #[must_use]
    pub fn keys(&self) -> Vec<AstKey> {
        self.asts.read().keys().cloned().collect()
    }
}

/// Future-returning façade over a shared [`Cache`].
///
/// The cache's critical sections are short and blocking; this adapter merely
/// lets event-loop clients await the synchronous result instead of calling
/// into the lock directly. No operation suspends internally.
#[derive(Clone)]
pub struct AsyncCache {
    inner: Arc<Cache>,
}

impl AsyncCache {
    #[must_use]
    pub fn new(inner: Arc<Cache>) -> Self {
        Self { inner }
    }

    /// The wrapped synchronous cache.
    #[must_use]
    pub fn inner(&self) -> &Arc<Cache> {
        &self.inner
    }

    pub async fn insert(&self, ast: Ast, replace: bool) -> Result<Arc<Ast>, CacheError> {
        self.inner.insert(ast, replace)
    }

    pub async fn retrieve(&self, key: &AstKey) -> Option<Arc<Ast>> {
        self.inner.retrieve(key)
    }

    pub async fn remove(&self, key: &AstKey) -> Option<bool> {
        self.inner.remove(key)
    }

    pub async fn touch(&self, key: &AstKey, values: Touch) {
        self.inner.touch(key, values);
    }

    pub async fn info(&self, key: &AstKey) -> Option<AstInfo> {
        self.inner.info(key)
    }

    pub async fn drop_all(&self) {
        self.inner.drop_all();
    }
}
