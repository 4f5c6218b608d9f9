use std::{
    fmt::{self, Display},
    sync::Arc,
};

use ahash::{AHashMap, AHashSet};

use crate::{
    call::{bind_shape, CallParameter, CallValues},
    data::{Data, DataType},
    tuple::Tuple,
};

/// A callable entity: a function, type constructor, or the function half of
/// a method.
///
/// Implementations declare a static call signature and return-type set so
/// the resolver can disambiguate overloads and type the call site without
/// invoking anything. `invariant` entities over invariant arguments are
/// folded at resolution time; `unsafe_access` entities receive the context's
/// unsafe-object snapshot in their call values.
pub trait TemplateFunction: Send + Sync {
    /// The static call signature, one slot per accepted argument.
    fn call_parameters(&self) -> &[CallParameter];

    /// Every stored type this entity may return.
    fn return_types(&self) -> &[DataType];

    /// Whether invocation is independent of external state.
    fn invariant(&self) -> bool {
        true
    }

    /// Whether this entity wants the context's unsafe host objects.
    fn unsafe_access(&self) -> bool {
        false
    }

    /// Invokes the entity over a type-checked call record.
    fn evaluate(&self, values: CallValues) -> Data;
}

/// A method entity: called through a receiver, which arrives as the first
/// call value.
///
/// Mutating methods additionally produce an updated receiver; the evaluator
/// writes it back through the symbol stack. A `None` updated value means
/// "no mutation", not "clear the variable".
pub trait TemplateMethod: TemplateFunction {
    /// Whether this method rebinds its receiver.
    fn mutating(&self) -> bool {
        false
    }

    /// Mutating entry point: `(updated receiver, return value)`.
    ///
    /// The default forwards to the plain entry point and reports no
    /// mutation.
    fn evaluate_mutating(&self, values: CallValues) -> (Option<Data>, Data) {
        (None, self.evaluate(values))
    }
}

/// Which registry a name is already claimed by, for collision diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Function,
    Method,
    Block,
    RawBlock,
    Type,
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Function => "function",
            Self::Method => "method",
            Self::Block => "block",
            Self::RawBlock => "raw block",
            Self::Type => "type",
        };
        f.write_str(label)
    }
}

/// Errors from entity registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The name is not a valid entity identifier.
    InvalidName(String),
    /// The name is already claimed by a different entity kind.
    NameInUse { name: String, kind: EntityKind },
}

impl Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidName(name) => write!(f, "'{name}' is not a valid entity name"),
            Self::NameInUse { name, kind } => write!(f, "'{name}' is already registered as a {kind}"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// The registry of recognized entities, queried during overload resolution.
///
/// Functions and methods may carry multiple overloads per name; blocks and
/// raw blocks are recorded by name only (their machinery belongs to the tag
/// library), and type constructors are functions that also reserve their
/// name in the type namespace.
#[derive(Default)]
pub struct Entities {
    functions: AHashMap<String, Vec<Arc<dyn TemplateFunction>>>,
    methods: AHashMap<String, Vec<Arc<dyn TemplateMethod>>>,
    types: AHashSet<String>,
    blocks: AHashSet<String>,
    raw_blocks: AHashSet<String>,
}

impl Entities {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn check_name(&self, name: &str, registering: EntityKind) -> Result<(), RegistryError> {
        let valid = !name.is_empty()
            && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(RegistryError::InvalidName(name.to_string()));
        }
        // functions overload functions and methods overload methods; every
        // other combination is a cross-kind claim on the shared namespace
        let claimed = [
            (
                EntityKind::Function,
                self.functions.contains_key(name) && !self.types.contains(name),
            ),
            (EntityKind::Method, self.methods.contains_key(name)),
            (EntityKind::Type, self.types.contains(name)),
            (EntityKind::Block, self.blocks.contains(name)),
            (EntityKind::RawBlock, self.raw_blocks.contains(name)),
        ];
        for (kind, present) in claimed {
            let overloadable =
                kind == registering && matches!(kind, EntityKind::Function | EntityKind::Method);
            if present && !overloadable {
                return Err(RegistryError::NameInUse {
                    name: name.to_string(),
                    kind,
                });
            }
        }
        Ok(())
    }

    /// Registers a function overload under the given name.
    pub fn register_function(&mut self, name: &str, function: Arc<dyn TemplateFunction>) -> Result<(), RegistryError> {
        self.check_name(name, EntityKind::Function)?;
        self.functions.entry(name.to_string()).or_default().push(function);
        Ok(())
    }

    /// Registers a method overload under the given name.
    pub fn register_method(&mut self, name: &str, method: Arc<dyn TemplateMethod>) -> Result<(), RegistryError> {
        self.check_name(name, EntityKind::Method)?;
        self.methods.entry(name.to_string()).or_default().push(method);
        Ok(())
    }

    /// Registers a type constructor: a function that also claims the type
    /// namespace for its name.
    pub fn register_type(&mut self, name: &str, constructor: Arc<dyn TemplateFunction>) -> Result<(), RegistryError> {
        self.check_name(name, EntityKind::Type)?;
        self.types.insert(name.to_string());
        self.functions.entry(name.to_string()).or_default().push(constructor);
        Ok(())
    }

    /// Reserves a block name. Block bodies are compiled and driven by the
    /// tag library; the registry only polices the shared namespace.
    pub fn register_block(&mut self, name: &str) -> Result<(), RegistryError> {
        self.check_name(name, EntityKind::Block)?;
        self.blocks.insert(name.to_string());
        Ok(())
    }

    /// Reserves a raw-block name.
    pub fn register_raw_block(&mut self, name: &str) -> Result<(), RegistryError> {
        self.check_name(name, EntityKind::RawBlock)?;
        self.raw_blocks.insert(name.to_string());
        Ok(())
    }

    #[must_use]
    pub fn has_function(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    #[must_use]
    pub fn has_method(&self, name: &str) -> bool {
        self.methods.contains_key(name)
    }

    #[must_use]
    pub fn is_block(&self, name: &str) -> bool {
        self.blocks.contains(name) || self.raw_blocks.contains(name)
    }

    /// Finds every function overload whose signature can accept the argument
    /// shape, paired with the shape-normalized argument tuple.
    ///
    /// One candidate binds immediately; several keep the call dynamic until
    /// evaluation-time disambiguation; none is a diagnostic.
    pub fn validate_function(
        &self,
        name: &str,
        args: Option<&Tuple>,
    ) -> Result<Vec<(Arc<dyn TemplateFunction>, Option<Tuple>)>, String> {
        let overloads = self
            .functions
            .get(name)
            .ok_or_else(|| format!("no function '{name}' is registered"))?;
        let candidates: Vec<_> = overloads
            .iter()
            .filter_map(|overload| {
                bind_shape(overload.call_parameters(), args).map(|normalized| (Arc::clone(overload), Some(normalized)))
            })
            .collect();
        if candidates.is_empty() {
            return Err(format!(
                "no overload of '{name}' accepts {} argument(s)",
                args.map_or(0, Tuple::len)
            ));
        }
        Ok(candidates)
    }

    /// Finds every method overload accepting the argument shape. The first
    /// argument slot is the receiver. Mutating overloads are only considered
    /// for mutating call sites.
    pub fn validate_method(
        &self,
        name: &str,
        args: Option<&Tuple>,
        mutating: bool,
    ) -> Result<Vec<(Arc<dyn TemplateMethod>, Option<Tuple>)>, String> {
        let overloads = self
            .methods
            .get(name)
            .ok_or_else(|| format!("no method '{name}' is registered"))?;
        let candidates: Vec<_> = overloads
            .iter()
            .filter(|overload| mutating || !overload.mutating())
            .filter_map(|overload| {
                bind_shape(overload.call_parameters(), args).map(|normalized| (Arc::clone(overload), Some(normalized)))
            })
            .collect();
        if candidates.is_empty() {
            return Err(format!(
                "no overload of method '{name}' accepts {} argument(s)",
                args.map_or(0, Tuple::len)
            ));
        }
        Ok(candidates)
    }
}
