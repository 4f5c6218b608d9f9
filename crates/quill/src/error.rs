use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::token::SourceLocation;

/// Classification of a render-time failure.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>`
/// implementations. The string representation matches the variant name exactly
/// (e.g., `MissingVariable` -> "MissingVariable").
///
/// Every kind except `Internal` is an ordinary soft error: it travels inside a
/// [`Data::Error`](crate::Data) value and never unwinds the evaluator.
/// `Internal` marks an "impossible" state reached at evaluation time and always
/// indicates a defect in the parser that produced the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A symbol-stack lookup found no binding for a variable.
    ///
    /// Propagates under strict policy; decays to nil otherwise.
    MissingVariable,
    /// An `Evaluate` reference named a definition that is not bound and
    /// carries no default.
    UndefinedEvaluate,
    /// A non-optional call argument evaluated to void.
    VoidArgument,
    /// Dynamic overload resolution still had more than one candidate at
    /// evaluation time.
    OverloadAmbiguous,
    /// Overload resolution found no matching candidate.
    OverloadNone,
    /// An evaluated argument failed the callee's signature type check, or an
    /// operator received operands of an unsupported shape.
    TypeMismatch,
    /// Integer overflow or division by zero inside an expression.
    Arithmetic,
    /// An "impossible" branch was reached; the parser broke a construction
    /// invariant.
    Internal,
}

/// A render-time failure embedded in the value stream.
///
/// Render errors never unwind: they are wrapped in `Data::Error` and flow
/// through operators and calls according to the soft-error policy. Each error
/// carries a human-readable message plus, where known, the name of the entity
/// that produced it and the source location of the call site.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderError {
    /// Failure classification, used by tests and host error reporting.
    pub kind: ErrorKind,
    /// Human-readable description.
    pub message: String,
    /// Name of the function or method that produced the error, if any.
    pub function: Option<String>,
    /// Source location of the originating call site, if attached by the parser.
    pub position: Option<SourceLocation>,
}

impl RenderError {
    /// Creates an error with just a kind and message.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            function: None,
            position: None,
        }
    }

    /// Attaches the name of the producing function or method.
    #[must_use]
    pub fn with_function(mut self, function: impl Into<String>) -> Self {
        self.function = Some(function.into());
        self
    }

    /// Attaches the call-site source location.
    #[must_use]
    pub fn with_position(mut self, position: SourceLocation) -> Self {
        self.position = Some(position);
        self
    }
}

impl Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)?;
        if let Some(function) = &self.function {
            write!(f, " (in {function})")?;
        }
        if let Some(position) = &self.position {
            write!(f, " at {position}")?;
        }
        Ok(())
    }
}

impl std::error::Error for RenderError {}
