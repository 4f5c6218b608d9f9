use std::{fmt, sync::Arc};

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::error::{ErrorKind, RenderError};

/// Maximum number of times a lazy producer may hand back another lazy value
/// before forcing gives up with an internal error.
const MAX_LAZY_DEPTH: usize = 8;

/// The storable type of a concrete template value.
///
/// The variant order is load-bearing: it is the fixed ordering the entity
/// registry uses when matching call signatures, so `DataType` derives `Ord`.
/// Errored data reports `Void`; lazy data reports its producer's declared
/// type.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, EnumString, IntoStaticStr, Serialize, Deserialize,
)]
pub enum DataType {
    Bool,
    Int,
    Double,
    String,
    Array,
    Dictionary,
    Void,
}

/// A deferred value: a producer invoked on demand, plus the static facts the
/// resolver needs without forcing it.
///
/// The producer must yield a concrete (non-lazy) value or an errored value;
/// a producer that keeps returning lazy values is cut off after a bounded
/// number of forcing steps.
#[derive(Clone)]
pub struct LazyData {
    producer: Arc<dyn Fn() -> Data + Send + Sync>,
    /// The stored type the producer promises to yield.
    returns: DataType,
    /// True iff repeated invocation yields the same value.
    invariant: bool,
}

impl LazyData {
    pub fn new(producer: impl Fn() -> Data + Send + Sync + 'static, returns: DataType, invariant: bool) -> Self {
        Self {
            producer: Arc::new(producer),
            returns,
            invariant,
        }
    }

    /// Invokes the producer once. The result may itself be lazy; use
    /// [`Data::evaluate`] for bounded full forcing.
    #[must_use]
    pub fn produce(&self) -> Data {
        (self.producer)()
    }

    #[must_use]
    pub fn returns(&self) -> DataType {
        self.returns
    }

    #[must_use]
    pub fn invariant(&self) -> bool {
        self.invariant
    }
}

impl fmt::Debug for LazyData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyData")
            .field("returns", &self.returns)
            .field("invariant", &self.invariant)
            .finish_non_exhaustive()
    }
}

/// A concrete or deferred template value.
///
/// This is the terminal currency of evaluation: every parameter reduces to a
/// `Data`, contexts store `Data`, and entities consume and produce `Data`.
/// Errors are first-class values (`Error`) and flow through operators rather
/// than unwinding. `TrueNil` is the single void/nil value; templates render
/// it as empty output.
#[derive(Debug, Clone)]
pub enum Data {
    Bool(bool),
    Int(i64),
    Double(f64),
    Str(String),
    Array(Vec<Data>),
    /// Insertion-ordered so dictionary literals render in source order.
    Dictionary(IndexMap<String, Data>),
    /// The void/nil value.
    TrueNil,
    /// A render failure travelling as a value.
    Error(Box<RenderError>),
    /// A deferred value produced on demand.
    Lazy(LazyData),
}

impl Data {
    /// Creates an errored value with the given kind and message.
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Error(Box::new(RenderError::new(kind, message)))
    }

    /// Creates a lazy value from a producer and its declared facts.
    pub fn lazy(producer: impl Fn() -> Self + Send + Sync + 'static, returns: DataType, invariant: bool) -> Self {
        Self::Lazy(LazyData::new(producer, returns, invariant))
    }

    /// The storable type of this value.
    ///
    /// Lazy values report their declared type without being forced; errored
    /// values report `Void`.
    #[must_use]
    pub fn stored_type(&self) -> DataType {
        match self {
            Self::Bool(_) => DataType::Bool,
            Self::Int(_) => DataType::Int,
            Self::Double(_) => DataType::Double,
            Self::Str(_) => DataType::String,
            Self::Array(_) => DataType::Array,
            Self::Dictionary(_) => DataType::Dictionary,
            Self::TrueNil | Self::Error(_) => DataType::Void,
            Self::Lazy(lazy) => lazy.returns(),
        }
    }

    #[must_use]
    pub fn errored(&self) -> bool {
        matches!(self, Self::Error(_))
    }

    /// The embedded error, if this value is errored.
    #[must_use]
    pub fn error_info(&self) -> Option<&RenderError> {
        match self {
            Self::Error(err) => Some(err),
            _ => None,
        }
    }

    /// True iff repeated evaluation yields the same value.
    ///
    /// Concrete values are always invariant; lazy values inherit their
    /// producer's declaration.
    #[must_use]
    pub fn invariant(&self) -> bool {
        match self {
            Self::Lazy(lazy) => lazy.invariant(),
            _ => true,
        }
    }

    #[must_use]
    pub fn is_lazy(&self) -> bool {
        matches!(self, Self::Lazy(_))
    }

    #[must_use]
    pub fn is_collection(&self) -> bool {
        matches!(self.stored_type(), DataType::Array | DataType::Dictionary)
    }

    #[must_use]
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::TrueNil)
    }

    /// Forces any laziness, returning a concrete variant.
    ///
    /// Producers may themselves return lazy values; forcing is repeated up to
    /// a fixed depth, after which an internal error value is returned.
    #[must_use]
    pub fn evaluate(&self) -> Self {
        let Self::Lazy(lazy) = self else {
            return self.clone();
        };
        let mut current = lazy.produce();
        for _ in 0..MAX_LAZY_DEPTH {
            match current {
                Self::Lazy(next) => current = next.produce(),
                concrete => return concrete,
            }
        }
        Self::error(ErrorKind::Internal, "lazy value did not produce a concrete value")
    }

    /// Boolean coercion: only actual booleans are truthy-testable.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            Self::Lazy(_) => self.evaluate().as_bool(),
            _ => None,
        }
    }

    /// Widens this value toward the requested stored type.
    ///
    /// The only permitted conversion is Int -> Double, mirroring the numeric
    /// promotion the expression layer performs. Anything else is returned
    /// unchanged.
    #[must_use]
    pub fn coerce(self, to: DataType) -> Self {
        match (&self, to) {
            (Self::Int(value), DataType::Double) => Self::Double(*value as f64),
            _ => self,
        }
    }

    /// A short diagnostic rendering with the stored type visible, for error
    /// messages and logs. The user-facing serialization is the `Display`
    /// impl.
    #[must_use]
    pub fn short(&self) -> String {
        match self {
            Self::Bool(value) => format!("bool({value})"),
            Self::Int(value) => format!("int({value})"),
            Self::Double(value) => format!("double({value})"),
            Self::Str(value) => format!("string({value:?})"),
            Self::Array(values) => format!("array(count: {})", values.len()),
            Self::Dictionary(values) => format!("dictionary(count: {})", values.len()),
            Self::TrueNil => "nil".to_string(),
            Self::Error(err) => format!("error({err})"),
            Self::Lazy(lazy) => format!("lazy({})", lazy.returns()),
        }
    }
}

/// Serialized rendering: the text a template emits for this value.
///
/// Nil and errored values render as empty output; the renderer surfaces
/// errors separately through the error info rather than the byte stream.
impl fmt::Display for Data {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(value) => write!(f, "{value}"),
            Self::Int(value) => write!(f, "{value}"),
            Self::Double(value) => write!(f, "{value}"),
            Self::Str(value) => f.write_str(value),
            Self::Array(values) => {
                f.write_str("[")?;
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{value}")?;
                }
                f.write_str("]")
            }
            Self::Dictionary(values) => {
                if values.is_empty() {
                    return f.write_str("[:]");
                }
                f.write_str("[")?;
                for (i, (key, value)) in values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                f.write_str("]")
            }
            Self::TrueNil | Self::Error(_) => Ok(()),
            Self::Lazy(_) => write!(f, "{}", self.evaluate()),
        }
    }
}

/// Equality over concrete contents.
///
/// Errored values never compare equal to anything, themselves included; lazy
/// values are forced before comparison; Int and Double cross-compare
/// numerically. Bool deliberately does not cross-compare with Int.
impl PartialEq for Data {
    fn eq(&self, other: &Self) -> bool {
        if self.errored() || other.errored() {
            return false;
        }
        if self.is_lazy() || other.is_lazy() {
            return self.evaluate() == other.evaluate();
        }
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a == b,
            (Self::Int(a), Self::Double(b)) | (Self::Double(b), Self::Int(a)) => (*a as f64) == *b,
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Dictionary(a), Self::Dictionary(b)) => {
                a.len() == b.len() && a.iter().all(|(key, value)| b.get(key) == Some(value))
            }
            (Self::TrueNil, Self::TrueNil) => true,
            _ => false,
        }
    }
}

impl From<bool> for Data {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for Data {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f64> for Data {
    fn from(value: f64) -> Self {
        Self::Double(value)
    }
}

impl From<&str> for Data {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for Data {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<Vec<Data>> for Data {
    fn from(values: Vec<Data>) -> Self {
        Self::Array(values)
    }
}

impl From<IndexMap<String, Data>> for Data {
    fn from(values: IndexMap<String, Data>) -> Self {
        Self::Dictionary(values)
    }
}
