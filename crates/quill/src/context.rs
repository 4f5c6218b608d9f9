use std::{
    fmt::{self, Display},
    sync::Arc,
};

use ahash::AHashMap;
use bitflags::bitflags;

use crate::data::{Data, DataType, LazyData};

/// The scope an unqualified variable falls back to when no frame binds it.
pub const DEFAULT_SCOPE: &str = "context";

bitflags! {
    /// How a host object participates when registered on a context.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ObjectMode: u8 {
        /// The object's published variables are inserted as a scope.
        const CONTEXTUAL = 1 << 0;
        /// The object is exposed to unsafe entities via the call-values
        /// snapshot.
        const UNSAFE = 1 << 1;
    }
}

impl Default for ObjectMode {
    fn default() -> Self {
        Self::CONTEXTUAL
    }
}

/// A host-supplied source of named generators.
///
/// Publishers are borrowed, never owned: registration snapshots the generator
/// maps into the context, and the engine never holds a reference back into
/// host state unless the host registers the object as `UNSAFE`.
pub trait ContextPublisher: Send + Sync {
    /// The primary variables this publisher exposes.
    fn variables(&self) -> AHashMap<String, DataGenerator>;

    /// Additional generators merged into the same scope after `variables`.
    fn extended_variables(&self) -> AHashMap<String, DataGenerator> {
        AHashMap::new()
    }
}

/// The unsafe host objects a context exposes to unsafe entities.
pub type UnsafeObjects = AHashMap<String, Arc<dyn ContextPublisher>>;

/// A value source registered by the host: either a value that already exists
/// or a producer invoked on refresh.
#[derive(Debug, Clone)]
pub enum DataGenerator {
    Immediate(Data),
    Lazy(LazyData),
}

impl DataGenerator {
    pub fn immediate(data: impl Into<Data>) -> Self {
        Self::Immediate(data.into())
    }

    pub fn lazy(producer: impl Fn() -> Data + Send + Sync + 'static, returns: DataType, invariant: bool) -> Self {
        Self::Lazy(LazyData::new(producer, returns, invariant))
    }

    /// Invokes the generator once.
    #[must_use]
    pub fn produce(&self) -> Data {
        match self {
            Self::Immediate(data) => data.clone(),
            Self::Lazy(lazy) => lazy.produce(),
        }
    }

    #[must_use]
    pub fn invariant(&self) -> bool {
        match self {
            Self::Immediate(data) => data.invariant(),
            Self::Lazy(lazy) => lazy.invariant(),
        }
    }
}

/// One cell of a context scope.
///
/// A `Literal` cell is fixed for the lifetime of the scope and must never be
/// downgraded back to a generator. A `Variable` cell re-invokes its generator
/// on refresh and memoizes the last result.
#[derive(Debug, Clone)]
pub enum DataValue {
    Literal(Data),
    Variable {
        generator: DataGenerator,
        cached: Option<Data>,
    },
}

impl DataValue {
    pub fn literal(data: impl Into<Data>) -> Self {
        Self::Literal(data.into())
    }

    #[must_use]
    pub fn variable(generator: DataGenerator) -> Self {
        Self::Variable {
            generator,
            cached: None,
        }
    }

    /// Whether reading this cell costs nothing: a non-lazy literal, or a
    /// variable cell holding a memoized refresh.
    #[must_use]
    pub fn cached(&self) -> bool {
        match self {
            Self::Literal(data) => !data.is_lazy(),
            Self::Variable { cached, .. } => cached.is_some(),
        }
    }

    /// Forces the cell to a literal, discarding generator identity.
    pub fn flatten(&mut self) {
        let flattened = match self {
            Self::Literal(data) => data.evaluate(),
            Self::Variable { generator, .. } => generator.produce().evaluate(),
        };
        *self = Self::Literal(flattened);
    }

    /// Re-invokes the generator and memoizes the result. Literal cells just
    /// hand back their value.
    pub fn refresh(&mut self) -> Data {
        match self {
            Self::Literal(data) => data.clone(),
            Self::Variable { generator, cached } => {
                let fresh = generator.produce();
                *cached = Some(fresh.clone());
                fresh
            }
        }
    }

    /// Drops the memoized value, retaining the generator.
    pub fn uncache(&mut self) {
        if let Self::Variable { cached, .. } = self {
            *cached = None;
        }
    }

    /// The cell's value without invoking any generator: literals and memoized
    /// variable cells only.
    #[must_use]
    pub fn peek(&self) -> Option<Data> {
        match self {
            Self::Literal(data) => Some(data.clone()),
            Self::Variable { cached, .. } => cached.clone(),
        }
    }
}

/// A named scope: its cells plus the lock bit.
#[derive(Debug, Default)]
struct Scope {
    cells: AHashMap<String, DataValue>,
    locked: bool,
}

/// Errors from host-facing context registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextError {
    /// The scope has been locked and no longer accepts registration or
    /// updates.
    LockedScope(String),
    /// The named scope does not exist.
    UnknownScope(String),
    /// A literal cell would have been downgraded to a generator.
    LiteralOverwrite(String),
    /// The registration requested object modes the context does not allow.
    ModeNotAllowed(String),
}

impl Display for ContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::LockedScope(scope) => write!(f, "scope '{scope}' is locked"),
            Self::UnknownScope(scope) => write!(f, "no scope named '{scope}'"),
            Self::LiteralOverwrite(name) => {
                write!(f, "'{name}' is a literal and cannot be replaced by a generator")
            }
            Self::ModeNotAllowed(label) => {
                write!(f, "object '{label}' requested modes this context does not allow")
            }
        }
    }
}

impl std::error::Error for ContextError {}

/// The per-render database of named values, grouped into scopes, plus the
/// policy record evaluation consults.
///
/// Scopes may be locked: locking flattens every cell to a literal, after
/// which the scope's names behave as parse-time constants the resolver is
/// free to inline.
#[derive(Default)]
pub struct Context {
    scopes: AHashMap<String, Scope>,
    missing_variable_throws: bool,
    allowed_modes: ObjectMode,
    unsafe_objects: UnsafeObjects,
}

impl Context {
    #[must_use]
    pub fn new() -> Self {
        Self {
            scopes: AHashMap::new(),
            missing_variable_throws: false,
            allowed_modes: ObjectMode::default(),
            unsafe_objects: AHashMap::new(),
        }
    }

    /// Strict mode: a missing variable halts evaluation instead of decaying
    /// to nil.
    pub fn set_missing_variable_throws(&mut self, throws: bool) {
        self.missing_variable_throws = throws;
    }

    #[must_use]
    pub fn missing_variable_throws(&self) -> bool {
        self.missing_variable_throws
    }

    /// Restricts which object modes [`register_object`](Self::register_object)
    /// will accept.
    pub fn set_allowed_modes(&mut self, modes: ObjectMode) {
        self.allowed_modes = modes;
    }

    #[must_use]
    pub fn allowed_modes(&self) -> ObjectMode {
        self.allowed_modes
    }

    /// Registers a publisher's generators under the given scope.
    pub fn register_publisher(&mut self, scope: &str, publisher: &dyn ContextPublisher) -> Result<(), ContextError> {
        self.register_generators(scope, publisher.variables())?;
        self.register_generators(scope, publisher.extended_variables())
    }

    /// Registers a map of generators under the given scope.
    ///
    /// Immediate generators become literal cells; lazy generators become
    /// variable cells with no cache. Existing literal cells are never
    /// downgraded.
    pub fn register_generators(
        &mut self,
        scope: &str,
        generators: AHashMap<String, DataGenerator>,
    ) -> Result<(), ContextError> {
        let scope_entry = self.scopes.entry(scope.to_string()).or_default();
        if scope_entry.locked {
            return Err(ContextError::LockedScope(scope.to_string()));
        }
        for (name, generator) in generators {
            if matches!(scope_entry.cells.get(&name), Some(DataValue::Literal(_)))
                && matches!(generator, DataGenerator::Lazy(_))
            {
                return Err(ContextError::LiteralOverwrite(name));
            }
            let cell = match generator {
                DataGenerator::Immediate(data) => DataValue::Literal(data),
                lazy @ DataGenerator::Lazy(_) => DataValue::variable(lazy),
            };
            scope_entry.cells.insert(name, cell);
        }
        Ok(())
    }

    /// Sets a single literal cell, creating the scope as needed.
    pub fn set_literal(&mut self, scope: &str, name: &str, data: impl Into<Data>) -> Result<(), ContextError> {
        let scope_entry = self.scopes.entry(scope.to_string()).or_default();
        if scope_entry.locked {
            return Err(ContextError::LockedScope(scope.to_string()));
        }
        scope_entry.cells.insert(name.to_string(), DataValue::Literal(data.into()));
        Ok(())
    }

    /// Registers a host object with the requested participation modes.
    ///
    /// `CONTEXTUAL` inserts the object's published variables as the scope
    /// named by `label`; `UNSAFE` additionally records the object so unsafe
    /// entities receive it in their call-values snapshot.
    pub fn register_object(
        &mut self,
        label: &str,
        object: Arc<dyn ContextPublisher>,
        modes: ObjectMode,
    ) -> Result<(), ContextError> {
        if !self.allowed_modes.contains(modes) {
            return Err(ContextError::ModeNotAllowed(label.to_string()));
        }
        if modes.contains(ObjectMode::CONTEXTUAL) {
            self.register_publisher(label, object.as_ref())?;
        }
        if modes.contains(ObjectMode::UNSAFE) {
            self.unsafe_objects.insert(label.to_string(), object);
        }
        Ok(())
    }

    /// Locks a scope: every cell is flattened to a literal and the scope
    /// stops accepting registration. Locked names behave as parse-time
    /// constants.
    pub fn lock_scope(&mut self, scope: &str) -> Result<(), ContextError> {
        let scope_entry = self
            .scopes
            .get_mut(scope)
            .ok_or_else(|| ContextError::UnknownScope(scope.to_string()))?;
        for cell in scope_entry.cells.values_mut() {
            cell.flatten();
        }
        scope_entry.locked = true;
        Ok(())
    }

    #[must_use]
    pub fn is_locked(&self, scope: &str) -> bool {
        self.scopes.get(scope).is_some_and(|entry| entry.locked)
    }

    #[must_use]
    pub fn scope_names(&self) -> Vec<&str> {
        self.scopes.keys().map(String::as_str).collect()
    }

    /// Direct cell access, for host inspection and tests.
    #[must_use]
    pub fn cell(&self, scope: &str, name: &str) -> Option<&DataValue> {
        self.scopes.get(scope)?.cells.get(name)
    }

    /// Names registered in a scope, unordered.
    #[must_use]
    pub fn names_in_scope(&self, scope: &str) -> Vec<&str> {
        self.scopes
            .get(scope)
            .map(|entry| entry.cells.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Reads a cell without invoking generators; `None` when the cell is
    /// absent or would need a refresh.
    pub(crate) fn peek(&self, scope: &str, name: &str) -> Option<Data> {
        self.scopes.get(scope)?.cells.get(name)?.peek()
    }

    /// Reads a cell, refreshing an uncached variable cell.
    pub(crate) fn fetch(&mut self, scope: &str, name: &str) -> Option<Data> {
        let cell = self.scopes.get_mut(scope)?.cells.get_mut(name)?;
        match cell.peek() {
            Some(data) => Some(data),
            None => Some(cell.refresh()),
        }
    }

    /// Materializes a whole scope as a dictionary, refreshing as needed.
    pub(crate) fn fetch_scope(&mut self, scope: &str) -> Option<Data> {
        let scope_entry = self.scopes.get_mut(scope)?;
        let mut dictionary = indexmap::IndexMap::with_capacity(scope_entry.cells.len());
        for (name, cell) in &mut scope_entry.cells {
            let value = match cell.peek() {
                Some(data) => data,
                None => cell.refresh(),
            };
            dictionary.insert(name.clone(), value);
        }
        Some(Data::Dictionary(dictionary))
    }

    /// Overwrites a cell with a literal, used by mutating write-back.
    pub(crate) fn write(&mut self, scope: &str, name: &str, data: Data) -> Result<(), ContextError> {
        let scope_entry = self.scopes.entry(scope.to_string()).or_default();
        if scope_entry.locked {
            return Err(ContextError::LockedScope(scope.to_string()));
        }
        scope_entry.cells.insert(name.to_string(), DataValue::Literal(data));
        Ok(())
    }

    pub(crate) fn has_cell(&self, scope: &str, name: &str) -> bool {
        self.scopes.get(scope).is_some_and(|entry| entry.cells.contains_key(name))
    }

    pub(crate) fn unsafe_objects(&self) -> &UnsafeObjects {
        &self.unsafe_objects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};

    /// Refreshing a variable cell memoizes; uncache drops the memo.
    #[test]
    fn variable_cell_refresh_and_uncache() {
        let hits = Arc::new(AtomicI64::new(0));
        let counter = Arc::clone(&hits);
        let mut cell = DataValue::variable(DataGenerator::lazy(
            move || Data::Int(counter.fetch_add(1, Ordering::SeqCst)),
            DataType::Int,
            false,
        ));
        assert!(!cell.cached());
        assert_eq!(cell.refresh(), Data::Int(0));
        assert!(cell.cached());
        assert_eq!(cell.peek(), Some(Data::Int(0)));
        cell.uncache();
        assert!(!cell.cached());
        assert_eq!(cell.refresh(), Data::Int(1));
    }

    /// Locking flattens every cell to a cached literal.
    #[test]
    fn lock_scope_flattens_cells() {
        let mut context = Context::new();
        let mut generators = AHashMap::new();
        generators.insert("port".to_string(), DataGenerator::lazy(|| Data::Int(8080), DataType::Int, true));
        generators.insert("host".to_string(), DataGenerator::immediate("localhost"));
        context.register_generators("server", generators).unwrap();
        context.lock_scope("server").unwrap();

        assert!(context.is_locked("server"));
        for name in ["port", "host"] {
            let cell = context.cell("server", name).unwrap();
            assert!(matches!(cell, DataValue::Literal(_)), "{name} should be literal");
            assert!(cell.cached(), "{name} should be cached");
        }
        assert_eq!(
            context.register_generators("server", AHashMap::new()).unwrap_err(),
            ContextError::LockedScope("server".to_string())
        );
    }

    /// A literal cell is never downgraded to a generator.
    #[test]
    fn literal_cells_resist_downgrade() {
        let mut context = Context::new();
        context.set_literal("app", "version", Data::Int(3)).unwrap();
        let mut generators = AHashMap::new();
        generators.insert("version".to_string(), DataGenerator::lazy(|| Data::Int(4), DataType::Int, true));
        assert_eq!(
            context.register_generators("app", generators).unwrap_err(),
            ContextError::LiteralOverwrite("version".to_string())
        );
    }

    /// Unsafe registration is gated behind the allowed-modes record.
    #[test]
    fn unsafe_registration_requires_mode() {
        struct Host;
        impl ContextPublisher for Host {
            fn variables(&self) -> AHashMap<String, DataGenerator> {
                AHashMap::new()
            }
        }
        let mut context = Context::new();
        let result = context.register_object("db", Arc::new(Host), ObjectMode::UNSAFE);
        assert_eq!(result.unwrap_err(), ContextError::ModeNotAllowed("db".to_string()));

        context.set_allowed_modes(ObjectMode::CONTEXTUAL | ObjectMode::UNSAFE);
        context.register_object("db", Arc::new(Host), ObjectMode::UNSAFE).unwrap();
        assert!(context.unsafe_objects().contains_key("db"));
    }
}
