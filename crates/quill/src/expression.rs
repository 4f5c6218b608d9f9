use std::fmt::{self, Display};

use ahash::AHashSet;
use smallvec::SmallVec;

use crate::{
    data::{Data, DataType},
    error::ErrorKind,
    param::Parameter,
    stack::VarStack,
    symbol::Symbol,
    token::Operator,
    variable::Variable,
};

/// The constrained shapes an expression may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExprForm {
    /// `[operator, operand]` — `!x`, `-x`.
    Prefix,
    /// `[lhs, operator, rhs]` — includes the computed subscript `lhs[rhs]`.
    Infix,
    /// `[condition, then, else]`.
    Ternary,
    /// Host-library-built operand group; carried through resolution but never
    /// valued by the core.
    Custom,
}

/// A constrained 2–3 operand expression over parameters.
///
/// Expressions cache their observable facets (`base_type`, `resolved`,
/// `invariant`, `symbols`) at construction and rematerialize them whenever
/// resolution rebuilds the operand storage.
#[derive(Debug, Clone)]
pub struct Expression {
    form: ExprForm,
    storage: SmallVec<[Parameter; 3]>,
    base_type: Option<DataType>,
    resolved: bool,
    invariant: bool,
    symbols: AHashSet<Variable>,
}

impl Expression {
    /// Builds an infix expression. Fails when the operator cannot appear in a
    /// finished expression or either side cannot produce a value.
    #[must_use]
    pub fn infix(lhs: Parameter, op: Operator, rhs: Parameter) -> Option<Self> {
        if !op.evaluable() || op == Operator::Not || !lhs.is_valued() || !rhs.is_valued() {
            return None;
        }
        Some(Self::assemble(
            ExprForm::Infix,
            SmallVec::from_vec(vec![lhs, Parameter::operator_unchecked(op), rhs]),
        ))
    }

    /// Builds a prefix expression (`!x`, `-x`).
    #[must_use]
    pub fn prefix(op: Operator, operand: Parameter) -> Option<Self> {
        if !op.unary_prefix() || !operand.is_valued() {
            return None;
        }
        Some(Self::assemble(
            ExprForm::Prefix,
            SmallVec::from_vec(vec![Parameter::operator_unchecked(op), operand]),
        ))
    }

    /// Builds a ternary conditional expression.
    #[must_use]
    pub fn ternary(condition: Parameter, then: Parameter, otherwise: Parameter) -> Option<Self> {
        if !condition.is_valued() || !then.is_valued() || !otherwise.is_valued() {
            return None;
        }
        Some(Self::assemble(
            ExprForm::Ternary,
            SmallVec::from_vec(vec![condition, then, otherwise]),
        ))
    }

    /// Builds a custom operand group for the host tag library. Custom
    /// expressions resolve normally but are never valued by the core.
    #[must_use]
    pub fn custom(parts: Vec<Parameter>) -> Option<Self> {
        if !(2..=3).contains(&parts.len()) {
            return None;
        }
        Some(Self::assemble(ExprForm::Custom, SmallVec::from_vec(parts)))
    }

    fn assemble(form: ExprForm, storage: SmallVec<[Parameter; 3]>) -> Self {
        let mut expression = Self {
            form,
            storage,
            base_type: None,
            resolved: false,
            invariant: false,
            symbols: AHashSet::new(),
        };
        expression.rematerialize();
        expression
    }

    /// Rebuilds the cached facets from the current operand storage.
    fn rematerialize(&mut self) {
        self.resolved = self.storage.iter().all(Parameter::resolved);
        self.invariant = self.storage.iter().all(Parameter::invariant);
        self.symbols = self.storage.iter().flat_map(Parameter::symbols).collect();
        self.base_type = self.derive_base_type();
    }

    fn derive_base_type(&self) -> Option<DataType> {
        match self.form {
            ExprForm::Prefix => match self.operator()? {
                Operator::Not => Some(DataType::Bool),
                Operator::Minus => match self.storage[1].base_type()? {
                    numeric @ (DataType::Int | DataType::Double) => Some(numeric),
                    _ => None,
                },
                _ => None,
            },
            ExprForm::Infix => {
                let op = self.operator()?;
                if op.comparison() {
                    return Some(DataType::Bool);
                }
                match op {
                    Operator::Plus | Operator::Minus | Operator::Multiply | Operator::Divide | Operator::Modulo => {
                        Self::unify(self.storage[0].base_type(), self.storage[2].base_type())
                    }
                    Operator::NilCoalesce => Self::unify(self.storage[0].base_type(), self.storage[2].base_type()),
                    _ => None,
                }
            }
            ExprForm::Ternary => Self::unify(self.storage[1].base_type(), self.storage[2].base_type()),
            ExprForm::Custom => None,
        }
    }

    /// Unifies two provable operand types: equal types stand, Int widens to
    /// Double, anything else is unknown.
    fn unify(lhs: Option<DataType>, rhs: Option<DataType>) -> Option<DataType> {
        match (lhs?, rhs?) {
            (a, b) if a == b => Some(a),
            (DataType::Int, DataType::Double) | (DataType::Double, DataType::Int) => Some(DataType::Double),
            _ => None,
        }
    }

    #[must_use]
    pub fn form(&self) -> ExprForm {
        self.form
    }

    #[must_use]
    pub fn operands(&self) -> &[Parameter] {
        &self.storage
    }

    /// The operator of a prefix or infix expression.
    #[must_use]
    pub fn operator(&self) -> Option<Operator> {
        let slot = match self.form {
            ExprForm::Prefix => 0,
            ExprForm::Infix => 1,
            ExprForm::Ternary | ExprForm::Custom => return None,
        };
        self.storage[slot].as_operator()
    }

    /// The statically provable result type, when the operator forces one.
    #[must_use]
    pub fn base_type(&self) -> Option<DataType> {
        self.base_type
    }

    /// Evaluates one operand under the soft-error policy: errored results
    /// either short-circuit (`Err`) or decay to nil, and laziness is forced.
    fn operand(parameter: &Parameter, stack: &mut VarStack) -> Result<Data, Data> {
        let value = parameter.evaluate(stack);
        if value.errored() {
            if stack.missing_variable_throws() {
                return Err(value);
            }
            return Ok(Data::TrueNil);
        }
        Ok(value.evaluate())
    }

    fn evaluate_prefix(&self, stack: &mut VarStack) -> Data {
        let op = self.storage[0].as_operator().expect("prefix expression stores operator first");
        let operand = match Self::operand(&self.storage[1], stack) {
            Ok(value) => value,
            Err(errored) => return errored,
        };
        match op {
            Operator::Not => match operand.as_bool() {
                Some(value) => Data::Bool(!value),
                None => Data::error(
                    ErrorKind::TypeMismatch,
                    format!("operator '!' requires a boolean operand, got {}", operand.short()),
                ),
            },
            Operator::Minus => match operand {
                Data::Int(value) => match value.checked_neg() {
                    Some(negated) => Data::Int(negated),
                    None => Data::error(ErrorKind::Arithmetic, "integer overflow negating value"),
                },
                Data::Double(value) => Data::Double(-value),
                other => Data::error(
                    ErrorKind::TypeMismatch,
                    format!("operator '-' requires a numeric operand, got {}", other.short()),
                ),
            },
            _ => Data::error(ErrorKind::Internal, "prefix expression holds a non-prefix operator"),
        }
    }

    fn evaluate_infix(&self, stack: &mut VarStack) -> Data {
        let op = self.storage[1].as_operator().expect("infix expression stores operator second");
        let lhs = match Self::operand(&self.storage[0], stack) {
            Ok(value) => value,
            Err(errored) => return errored,
        };
        // short-circuit forms never touch the right side
        match op {
            Operator::And => match lhs.as_bool() {
                Some(false) => return Data::Bool(false),
                Some(true) => {}
                None => return boolean_operand_error(op, &lhs),
            },
            Operator::Or => match lhs.as_bool() {
                Some(true) => return Data::Bool(true),
                Some(false) => {}
                None => return boolean_operand_error(op, &lhs),
            },
            Operator::NilCoalesce => {
                if !lhs.is_nil() {
                    return lhs;
                }
            }
            _ => {}
        }
        let rhs = match Self::operand(&self.storage[2], stack) {
            Ok(value) => value,
            Err(errored) => return errored,
        };
        apply_infix(op, lhs, rhs)
    }

    fn evaluate_ternary(&self, stack: &mut VarStack) -> Data {
        let condition = match Self::operand(&self.storage[0], stack) {
            Ok(value) => value,
            Err(errored) => return errored,
        };
        match condition.as_bool() {
            Some(true) => self.storage[1].evaluate(stack),
            Some(false) => self.storage[2].evaluate(stack),
            None => Data::error(
                ErrorKind::TypeMismatch,
                format!("ternary condition must be boolean, got {}", condition.short()),
            ),
        }
    }
}

impl Symbol for Expression {
    fn resolved(&self) -> bool {
        self.resolved
    }

    fn invariant(&self) -> bool {
        self.invariant
    }

    fn symbols(&self) -> AHashSet<Variable> {
        self.symbols.clone()
    }

    fn resolve(mut self, stack: &mut VarStack) -> Self {
        self.storage = self.storage.into_iter().map(|operand| operand.resolve(stack)).collect();
        self.rematerialize();
        self
    }

    fn evaluate(&self, stack: &mut VarStack) -> Data {
        match self.form {
            ExprForm::Prefix => self.evaluate_prefix(stack),
            ExprForm::Infix => self.evaluate_infix(stack),
            ExprForm::Ternary => self.evaluate_ternary(stack),
            ExprForm::Custom => Data::error(
                ErrorKind::Internal,
                "custom expressions are evaluated by their owning entity",
            ),
        }
    }
}

impl PartialEq for Expression {
    fn eq(&self, other: &Self) -> bool {
        self.form == other.form && self.storage == other.storage
    }
}

impl Display for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.form {
            ExprForm::Prefix => write!(f, "{}{}", self.operator().map_or("?", Operator::symbol), self.storage[1]),
            ExprForm::Infix => {
                let op = self.operator().unwrap_or(Operator::Subscript);
                if op == Operator::Subscript {
                    write!(f, "{}[{}]", self.storage[0], self.storage[2])
                } else {
                    write!(f, "{} {} {}", self.storage[0], op.symbol(), self.storage[2])
                }
            }
            ExprForm::Ternary => write!(f, "{} ? {} : {}", self.storage[0], self.storage[1], self.storage[2]),
            ExprForm::Custom => {
                f.write_str("custom(")?;
                for (i, part) in self.storage.iter().enumerate() {
                    if i > 0 {
                        f.write_str(" ")?;
                    }
                    write!(f, "{part}")?;
                }
                f.write_str(")")
            }
        }
    }
}

fn boolean_operand_error(op: Operator, operand: &Data) -> Data {
    Data::error(
        ErrorKind::TypeMismatch,
        format!(
            "operator '{}' requires boolean operands, got {}",
            op.symbol(),
            operand.short()
        ),
    )
}

fn numeric_operand_error(op: Operator, lhs: &Data, rhs: &Data) -> Data {
    Data::error(
        ErrorKind::TypeMismatch,
        format!(
            "operator '{}' cannot combine {} and {}",
            op.symbol(),
            lhs.short(),
            rhs.short()
        ),
    )
}

/// Applies a non-short-circuiting infix operator to two concrete operands.
fn apply_infix(op: Operator, lhs: Data, rhs: Data) -> Data {
    match op {
        Operator::Plus => match (lhs, rhs) {
            (Data::Int(a), Data::Int(b)) => match a.checked_add(b) {
                Some(sum) => Data::Int(sum),
                None => Data::error(ErrorKind::Arithmetic, "integer overflow in addition"),
            },
            (Data::Str(mut a), Data::Str(b)) => {
                a.push_str(&b);
                Data::Str(a)
            }
            (Data::Array(mut a), Data::Array(b)) => {
                a.extend(b);
                Data::Array(a)
            }
            (Data::Dictionary(mut a), Data::Dictionary(b)) => {
                // right side wins on key collision
                a.extend(b);
                Data::Dictionary(a)
            }
            (lhs, rhs) => numeric_binary(op, lhs, rhs, |a, b| a.checked_add(b), |a, b| a + b),
        },
        Operator::Minus => numeric_binary(op, lhs, rhs, |a, b| a.checked_sub(b), |a, b| a - b),
        Operator::Multiply => numeric_binary(op, lhs, rhs, |a, b| a.checked_mul(b), |a, b| a * b),
        Operator::Divide => match (&lhs, &rhs) {
            // float division by zero follows IEEE semantics instead
            (Data::Int(_), Data::Int(0)) => Data::error(ErrorKind::Arithmetic, "division by zero"),
            _ => numeric_binary(op, lhs, rhs, |a, b| a.checked_div(b), |a, b| a / b),
        },
        Operator::Modulo => match (&lhs, &rhs) {
            (Data::Int(_), Data::Int(0)) => Data::error(ErrorKind::Arithmetic, "modulo by zero"),
            _ => numeric_binary(op, lhs, rhs, |a, b| a.checked_rem(b), |a, b| a % b),
        },
        Operator::Equal => Data::Bool(lhs == rhs),
        Operator::NotEqual => Data::Bool(lhs != rhs),
        Operator::Greater | Operator::GreaterOrEqual | Operator::Lesser | Operator::LesserOrEqual => {
            ordered_compare(op, lhs, rhs)
        }
        Operator::And | Operator::Or => match (lhs.as_bool(), rhs.as_bool()) {
            // left side already passed the short-circuit check
            (Some(_), Some(b)) => Data::Bool(b),
            _ => boolean_operand_error(op, &rhs),
        },
        Operator::Xor => match (lhs.as_bool(), rhs.as_bool()) {
            (Some(a), Some(b)) => Data::Bool(a != b),
            _ => boolean_operand_error(op, if lhs.as_bool().is_none() { &lhs } else { &rhs }),
        },
        Operator::NilCoalesce => rhs,
        Operator::Subscript => subscript(lhs, rhs),
        _ => Data::error(ErrorKind::Internal, "non-evaluable operator inside expression"),
    }
}

/// Arithmetic with Int/Double promotion. Checked integer math; overflow and
/// non-numeric operands become errored data.
fn numeric_binary(
    op: Operator,
    lhs: Data,
    rhs: Data,
    int_op: impl Fn(i64, i64) -> Option<i64>,
    double_op: impl Fn(f64, f64) -> f64,
) -> Data {
    match (&lhs, &rhs) {
        (Data::Int(a), Data::Int(b)) => match int_op(*a, *b) {
            Some(result) => Data::Int(result),
            None => Data::error(
                ErrorKind::Arithmetic,
                format!("integer overflow applying '{}'", op.symbol()),
            ),
        },
        (Data::Double(a), Data::Double(b)) => Data::Double(double_op(*a, *b)),
        (Data::Int(a), Data::Double(b)) => Data::Double(double_op(*a as f64, *b)),
        (Data::Double(a), Data::Int(b)) => Data::Double(double_op(*a, *b as f64)),
        _ => numeric_operand_error(op, &lhs, &rhs),
    }
}

fn ordered_compare(op: Operator, lhs: Data, rhs: Data) -> Data {
    let ordering = match (&lhs, &rhs) {
        (Data::Int(a), Data::Int(b)) => a.partial_cmp(b),
        (Data::Double(a), Data::Double(b)) => a.partial_cmp(b),
        (Data::Int(a), Data::Double(b)) => (*a as f64).partial_cmp(b),
        (Data::Double(a), Data::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Data::Str(a), Data::Str(b)) => Some(a.cmp(b)),
        _ => None,
    };
    let Some(ordering) = ordering else {
        return numeric_operand_error(op, &lhs, &rhs);
    };
    let result = match op {
        Operator::Greater => ordering.is_gt(),
        Operator::GreaterOrEqual => ordering.is_ge(),
        Operator::Lesser => ordering.is_lt(),
        Operator::LesserOrEqual => ordering.is_le(),
        _ => unreachable!("ordered_compare only receives ordering operators"),
    };
    Data::Bool(result)
}

/// Computed subscript: arrays index by Int, dictionaries by String. Misses
/// yield missing-variable errors so the soft-error policy can decay them.
fn subscript(lhs: Data, rhs: Data) -> Data {
    match (lhs, rhs) {
        (Data::Array(values), Data::Int(index)) => {
            let index_usize = usize::try_from(index).ok();
            match index_usize.and_then(|i| values.get(i)) {
                Some(value) => value.clone(),
                None => Data::error(
                    ErrorKind::MissingVariable,
                    format!("array index {index} out of range (count: {})", values.len()),
                ),
            }
        }
        (Data::Dictionary(values), Data::Str(key)) => match values.get(&key) {
            Some(value) => value.clone(),
            None => Data::error(ErrorKind::MissingVariable, format!("dictionary has no key '{key}'")),
        },
        (lhs, rhs) => Data::error(
            ErrorKind::TypeMismatch,
            format!("cannot subscript {} with {}", lhs.short(), rhs.short()),
        ),
    }
}
