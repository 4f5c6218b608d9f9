//! Parser-visible atoms shared between the lexer's token stream and the AST.
//!
//! The lexer and parser live outside this crate; they hand finished
//! [`Keyword`] and [`Operator`] symbols (plus [`SourceLocation`]s for call
//! sites) into the parameter factories. The enums here therefore define the
//! full vocabulary the parser is allowed to emit, and flag which subset may
//! survive into a finished tree.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Unvalued control tokens recognized inside tag bodies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
pub enum Keyword {
    True,
    False,
    Yes,
    No,
    Nil,
    /// The implicit current iteration target (`self`).
    #[strum(serialize = "self")]
    SelfRef,
    /// Loop-membership token (`for x in xs`); structural only.
    In,
}

impl Keyword {
    /// Whether this keyword can decay to a value or variable and thus appear
    /// where an evaluable parameter is expected.
    #[must_use]
    pub fn is_evaluable(self) -> bool {
        !matches!(self, Self::In)
    }

    /// Whether this keyword is one of the boolean literals.
    #[must_use]
    pub fn is_boolean(self) -> bool {
        matches!(self, Self::True | Self::False | Self::Yes | Self::No)
    }

    /// The boolean value of a boolean keyword, `None` otherwise.
    #[must_use]
    pub fn bool_value(self) -> Option<bool> {
        match self {
            Self::True | Self::Yes => Some(true),
            Self::False | Self::No => Some(false),
            _ => None,
        }
    }
}

/// Operator symbols.
///
/// `parseable` marks the subset the lexer may emit; the rest are synthesized
/// internally during parsing (e.g. `Subscript` replaces a balanced
/// `SubOpen`/`SubClose` pair). `evaluable` marks the subset that is legal
/// inside a finished expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum Operator {
    // logical
    // `!`
    Not,
    // `&&`
    And,
    // `||`
    Or,
    // `^^`
    Xor,

    // comparison
    // `==`
    Equal,
    // `!=`
    NotEqual,
    // `>`
    Greater,
    // `>=`
    GreaterOrEqual,
    // `<`
    Lesser,
    // `<=`
    LesserOrEqual,

    // arithmetic
    // `+`
    Plus,
    // `-`
    Minus,
    // `*`
    Multiply,
    // `/`
    Divide,
    // `%`
    Modulo,

    // `??`
    NilCoalesce,

    // path & structural operators; never evaluable
    // `$`
    ScopeRoot,
    // `.`
    ScopeMember,
    // `[`
    SubOpen,
    // `]`
    SubClose,
    /// Computed subscript, synthesized from a balanced `SubOpen`/`SubClose`
    /// pair. Evaluable, but never lexed.
    Subscript,
    /// Reference to a named block definition; synthesized for `Evaluate`
    /// call sites.
    Evaluate,
    // `=`
    Assignment,
}

impl Operator {
    /// Whether the lexer may emit this operator.
    #[must_use]
    pub fn parseable(self) -> bool {
        !matches!(self, Self::Subscript | Self::Evaluate)
    }

    /// Whether this operator may appear inside a finished expression.
    #[must_use]
    pub fn evaluable(self) -> bool {
        !matches!(
            self,
            Self::ScopeRoot | Self::ScopeMember | Self::SubOpen | Self::SubClose | Self::Evaluate | Self::Assignment
        )
    }

    /// Whether this operator forms a prefix (single-operand) expression.
    #[must_use]
    pub fn unary_prefix(self) -> bool {
        matches!(self, Self::Not | Self::Minus)
    }

    /// The source glyph, used when rendering expressions in diagnostics.
    #[must_use]
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Not => "!",
            Self::And => "&&",
            Self::Or => "||",
            Self::Xor => "^^",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Greater => ">",
            Self::GreaterOrEqual => ">=",
            Self::Lesser => "<",
            Self::LesserOrEqual => "<=",
            Self::Plus => "+",
            Self::Minus => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::NilCoalesce => "??",
            Self::ScopeRoot => "$",
            Self::ScopeMember => ".",
            Self::SubOpen => "[",
            Self::SubClose => "]",
            Self::Subscript => "[]",
            Self::Evaluate => "evaluate",
            Self::Assignment => "=",
        }
    }

    /// Whether this operator's infix result is always boolean.
    #[must_use]
    pub fn comparison(self) -> bool {
        matches!(
            self,
            Self::And
                | Self::Or
                | Self::Xor
                | Self::Equal
                | Self::NotEqual
                | Self::Greater
                | Self::GreaterOrEqual
                | Self::Lesser
                | Self::LesserOrEqual
        )
    }
}

/// A point in a template source file, attached by the parser to call sites
/// and carried through into render errors.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SourceLocation {
    /// Name of the template the parser was reading.
    pub name: String,
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

impl SourceLocation {
    pub fn new(name: impl Into<String>, line: u32, column: u32) -> Self {
        Self {
            name: name.into(),
            line,
            column,
        }
    }
}

impl Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.name, self.line, self.column)
    }
}
