use std::{
    collections::hash_map::DefaultHasher,
    hash::{Hash, Hasher},
    time::Duration,
};

use ahash::AHashSet;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::{param::Parameter, stack::VarStack, symbol::Symbol, variable::Variable};

/// A content-and-name fingerprint identifying a compiled template.
///
/// Two sources compiling to different text under the same name produce
/// different keys, so a stale cache entry can never shadow a re-fetched
/// template body.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AstKey {
    name: String,
    fingerprint: u64,
}

impl AstKey {
    /// Fingerprints a template name and its raw source text.
    #[must_use]
    pub fn new(name: &str, source: &str) -> Self {
        let mut hasher = DefaultHasher::new();
        name.hash(&mut hasher);
        source.hash(&mut hasher);
        Self {
            name: name.to_string(),
            fingerprint: hasher.finish(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn fingerprint(&self) -> u64 {
        self.fingerprint
    }
}

/// One element of a compiled template's scroll: either a span of raw output
/// text, or a dynamic element the renderer evaluates.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Raw(String),
    Dynamic(Parameter),
}

/// Aggregated usage counters for one cached template.
///
/// Touches accumulate in the cache's side table and are folded into the
/// owning AST's [`AstInfo`] when the rotation threshold is reached. The
/// empty touch (`count == 0`) is distinguishable from any recorded one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Touch {
    count: u64,
    exec_time: Duration,
    size_max: u32,
}

impl Touch {
    /// The empty aggregate.
    pub const EMPTY: Self = Self {
        count: 0,
        exec_time: Duration::ZERO,
        size_max: 0,
    };

    /// Records a single render: its execution time and serialized-size
    /// estimate.
    #[must_use]
    pub fn single(exec_time: Duration, size: u32) -> Self {
        Self {
            count: 1,
            exec_time,
            size_max: size,
        }
    }

    /// Merges another aggregate into this one: counts and times accumulate,
    /// the size estimate keeps the maximum.
    pub fn aggregate(&mut self, other: &Self) {
        self.count += other.count;
        self.exec_time += other.exec_time;
        self.size_max = self.size_max.max(other.size_max);
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    #[must_use]
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Cumulative execution time across recorded renders.
    #[must_use]
    pub fn exec_time(&self) -> Duration {
        self.exec_time
    }

    /// Largest serialized-size estimate seen.
    #[must_use]
    pub fn size_max(&self) -> u32 {
        self.size_max
    }
}

impl Default for Touch {
    fn default() -> Self {
        Self::EMPTY
    }
}

/// Dependency and usage metadata for one compiled template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AstInfo {
    /// Every variable the scroll's dynamic elements still need bound.
    pub required_vars: AHashSet<Variable>,
    /// Output-size lower bound: raw text plus per-element underestimates.
    pub estimated_size: usize,
    /// Lifetime usage counters folded in from the cache's touch table.
    pub touch: Touch,
}

/// A compiled template: its cache key, the statement scroll the renderer
/// walks, and telemetry.
///
/// ASTs are immutable once inserted into the cache, except for `info`, which
/// the cache mutates under its touch-write lock during rotations.
#[derive(Debug)]
pub struct Ast {
    key: AstKey,
    scroll: Vec<Statement>,
    info: RwLock<AstInfo>,
}

impl Ast {
    /// Compiles the bookkeeping for a parsed scroll: fingerprints the source
    /// and gathers symbol dependencies and size estimates.
    #[must_use]
    pub fn new(name: &str, source: &str, scroll: Vec<Statement>) -> Self {
        let info = Self::derive_info(&scroll);
        Self {
            key: AstKey::new(name, source),
            scroll,
            info: RwLock::new(info),
        }
    }

    fn derive_info(scroll: &[Statement]) -> AstInfo {
        let mut required_vars = AHashSet::new();
        let mut estimated_size = 0;
        for statement in scroll {
            match statement {
                Statement::Raw(text) => estimated_size += text.len(),
                Statement::Dynamic(parameter) => {
                    required_vars.extend(parameter.symbols());
                    estimated_size += parameter.underestimated_size();
                }
            }
        }
        AstInfo {
            required_vars,
            estimated_size,
            touch: Touch::EMPTY,
        }
    }

    #[must_use]
    pub fn key(&self) -> &AstKey {
        &self.key
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.key.name()
    }

    #[must_use]
    pub fn scroll(&self) -> &[Statement] {
        &self.scroll
    }

    /// A snapshot of the AST's metadata.
    #[must_use]
    pub fn info(&self) -> AstInfo {
        self.info.read().clone()
    }

    /// Whether every dynamic element is structurally complete.
    #[must_use]
    pub fn resolved(&self) -> bool {
        self.scroll.iter().all(|statement| match statement {
            Statement::Raw(_) => true,
            Statement::Dynamic(parameter) => parameter.resolved(),
        })
    }

    /// Pre-insert resolution pass: resolves every dynamic element against
    /// the stack (inlining locked-scope constants, binding overloads) and
    /// rebuilds the dependency metadata. Accumulated touches survive.
    #[must_use]
    pub fn resolve(self, stack: &mut VarStack) -> Self {
        let touch = self.info.into_inner().touch;
        let scroll: Vec<Statement> = self
            .scroll
            .into_iter()
            .map(|statement| match statement {
                raw @ Statement::Raw(_) => raw,
                Statement::Dynamic(parameter) => Statement::Dynamic(parameter.resolve(stack)),
            })
            .collect();
        let mut info = Self::derive_info(&scroll);
        info.touch = touch;
        Self {
            key: self.key,
            scroll,
            info: RwLock::new(info),
        }
    }

    /// Folds a drained touch aggregate into the AST's info. Called by the
    /// cache under its touch-write lock.
    pub(crate) fn fold_touch(&self, drained: &Touch) {
        self.info.write().touch.aggregate(drained);
    }
}
