use std::fmt::{self, Display};

use ahash::AHashSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// One step of a variable's access path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Segment {
    /// Dot access on a dictionary: `.name`.
    Member(String),
    /// Subscript access on an array: `[3]`.
    Index(usize),
}

/// Which reserved form a variable takes, if any.
///
/// Reserved forms have no scope and no access path of their own; they are
/// resolved against the frame stack rather than the context database.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
enum Form {
    /// An ordinary, possibly scoped, possibly pathed identifier.
    Named,
    /// The implicit current iteration target (`self`).
    SelfRef,
    /// A reference resolved against scoped block definitions.
    Define,
}

/// A path-structured key locating a value within scoped contexts.
///
/// A variable names a scope (or inherits the default lookup scope), a base
/// identifier within it, and an ordered chain of member/subscript segments
/// descending into collection values. Two reserved forms exist: [`self_ref`]
/// for the current iteration target and [`define`] for block-definition
/// references.
///
/// Variables are plain data (`Eq + Hash`) so they can key symbol sets and
/// telemetry records.
///
/// [`self_ref`]: Variable::self_ref
/// [`define`]: Variable::define
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Variable {
    form: Form,
    scope: Option<String>,
    ident: String,
    path: SmallVec<[Segment; 2]>,
}

impl Variable {
    /// An unscoped identifier, looked up through frames and the default scope.
    pub fn named(ident: impl Into<String>) -> Self {
        let ident = ident.into();
        debug_assert!(!ident.is_empty(), "named variable requires an identifier");
        Self {
            form: Form::Named,
            scope: None,
            ident,
            path: SmallVec::new(),
        }
    }

    /// A scope-qualified identifier. An empty identifier references the whole
    /// scope, which is always a dictionary.
    pub fn scoped(scope: impl Into<String>, ident: impl Into<String>) -> Self {
        Self {
            form: Form::Named,
            scope: Some(scope.into()),
            ident: ident.into(),
            path: SmallVec::new(),
        }
    }

    /// The implicit current iteration target.
    #[must_use]
    pub fn self_ref() -> Self {
        Self {
            form: Form::SelfRef,
            scope: None,
            ident: String::new(),
            path: SmallVec::new(),
        }
    }

    /// A reference to the named block definition.
    pub fn define(name: impl Into<String>) -> Self {
        let ident = name.into();
        debug_assert!(!ident.is_empty(), "define reference requires a name");
        Self {
            form: Form::Define,
            scope: None,
            ident,
            path: SmallVec::new(),
        }
    }

    /// Extends the access path with a member segment.
    #[must_use]
    pub fn member(mut self, name: impl Into<String>) -> Self {
        self.path.push(Segment::Member(name.into()));
        self
    }

    /// Extends the access path with a subscript segment.
    #[must_use]
    pub fn index(mut self, index: usize) -> Self {
        self.path.push(Segment::Index(index));
        self
    }

    #[must_use]
    pub fn scope(&self) -> Option<&str> {
        self.scope.as_deref()
    }

    #[must_use]
    pub fn ident(&self) -> &str {
        &self.ident
    }

    #[must_use]
    pub fn path(&self) -> &[Segment] {
        &self.path
    }

    #[must_use]
    pub fn is_self(&self) -> bool {
        self.form == Form::SelfRef
    }

    #[must_use]
    pub fn is_define(&self) -> bool {
        self.form == Form::Define
    }

    /// True iff the key's static shape forces a collection value: only a bare
    /// scope reference qualifies, since a whole scope is always a dictionary.
    #[must_use]
    pub fn is_collection(&self) -> bool {
        self.form == Form::Named && self.scope.is_some() && self.ident.is_empty() && self.path.is_empty()
    }

    /// The prefix variables this key transitively depends on, itself included.
    ///
    /// `user.name[0]` cannot be bound unless `user` and `user.name` are; the
    /// resolver uses this closure to decide when a subtree is ready.
    #[must_use]
    pub fn symbols(&self) -> AHashSet<Self> {
        if self.form != Form::Named {
            return AHashSet::from_iter([self.clone()]);
        }
        let mut symbols = AHashSet::with_capacity(self.path.len() + 1);
        let mut prefix = Self {
            form: Form::Named,
            scope: self.scope.clone(),
            ident: self.ident.clone(),
            path: SmallVec::new(),
        };
        symbols.insert(prefix.clone());
        for segment in &self.path {
            prefix.path.push(segment.clone());
            symbols.insert(prefix.clone());
        }
        symbols
    }

    /// The base key without its access path.
    #[must_use]
    pub fn short(&self) -> String {
        match self.form {
            Form::SelfRef => "self".to_string(),
            Form::Define => format!("define({})", self.ident),
            Form::Named => match &self.scope {
                Some(scope) => format!("${scope}.{}", self.ident),
                None => self.ident.clone(),
            },
        }
    }
}

impl Display for Variable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.form {
            Form::SelfRef => return f.write_str("self"),
            Form::Define => return write!(f, "define({})", self.ident),
            Form::Named => {
                if let Some(scope) = &self.scope {
                    write!(f, "${scope}")?;
                    if !self.ident.is_empty() {
                        write!(f, ".{}", self.ident)?;
                    }
                } else {
                    f.write_str(&self.ident)?;
                }
            }
        }
        for segment in &self.path {
            match segment {
                Segment::Member(name) => write!(f, ".{name}")?,
                Segment::Index(index) => write!(f, "[{index}]")?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The symbol closure of a pathed variable is its full prefix chain.
    #[test]
    fn symbols_are_prefix_chain() {
        let variable = Variable::named("user").member("name").index(0);
        let symbols = variable.symbols();
        assert_eq!(symbols.len(), 3);
        assert!(symbols.contains(&Variable::named("user")));
        assert!(symbols.contains(&Variable::named("user").member("name")));
        assert!(symbols.contains(&variable));
    }

    /// Reserved forms depend only on themselves.
    #[test]
    fn reserved_forms_are_their_own_symbol() {
        let symbols = Variable::self_ref().symbols();
        assert_eq!(symbols.len(), 1);
        assert!(symbols.contains(&Variable::self_ref()));
    }

    /// Only a bare scope reference statically forces a collection.
    #[test]
    fn bare_scope_is_collection() {
        assert!(Variable::scoped("server", "").is_collection());
        assert!(!Variable::scoped("server", "port").is_collection());
        assert!(!Variable::named("user").is_collection());
    }

    #[test]
    fn display_renders_scope_and_path() {
        let variable = Variable::scoped("ctx", "user").member("name").index(2);
        assert_eq!(variable.to_string(), "$ctx.user.name[2]");
        assert_eq!(Variable::define("header").to_string(), "define(header)");
    }
}
