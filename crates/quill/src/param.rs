use std::{
    fmt::{self, Debug, Display},
    sync::Arc,
};

use ahash::AHashSet;

use crate::{
    call::{CallParameter, CallValues},
    data::{Data, DataType},
    entities::{TemplateFunction, TemplateMethod},
    error::{ErrorKind, RenderError},
    expression::{ExprForm, Expression},
    stack::VarStack,
    symbol::Symbol,
    token::{Keyword, Operator, SourceLocation},
    tuple::Tuple,
    variable::Variable,
};

/// The method slot of a call site.
///
/// Absent for plain function calls; for method calls it records whether the
/// callee may rebind its receiver, and if so which variable receives the
/// write-back.
#[derive(Debug, Clone, PartialEq)]
pub enum MethodSlot {
    /// A plain function call.
    Function,
    /// A method call that never rebinds its receiver.
    NonMutating,
    /// A method call whose receiver variable is rebound on mutation.
    Mutating(Variable),
}

/// The binding state of a call site's target.
#[derive(Clone)]
pub enum Callee {
    /// No candidate bound yet; static resolution may bind one, or the call
    /// stays dynamic until evaluation-time disambiguation.
    Unbound,
    /// Uniquely bound function entity.
    Function(Arc<dyn TemplateFunction>),
    /// Uniquely bound method entity.
    Method(Arc<dyn TemplateMethod>),
    /// The built-in `Evaluate` reference to a named block definition.
    Evaluate {
        identifier: String,
        default: Option<Box<Parameter>>,
    },
}

impl Debug for Callee {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unbound => f.write_str("Unbound"),
            Self::Function(_) => f.write_str("Function(..)"),
            Self::Method(_) => f.write_str("Method(..)"),
            Self::Evaluate { identifier, default } => f
                .debug_struct("Evaluate")
                .field("identifier", identifier)
                .field("default", default)
                .finish(),
        }
    }
}

impl PartialEq for Callee {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Unbound, Self::Unbound) => true,
            (Self::Function(a), Self::Function(b)) => Arc::ptr_eq(a, b),
            (Self::Method(a), Self::Method(b)) => Arc::ptr_eq(a, b),
            (
                Self::Evaluate {
                    identifier: a,
                    default: da,
                },
                Self::Evaluate {
                    identifier: b,
                    default: db,
                },
            ) => a == b && da == db,
            _ => false,
        }
    }
}

/// A call site: name, binding state, argument tuple, method slot, and the
/// source location the parser attached.
#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    name: String,
    callee: Callee,
    params: Option<Tuple>,
    method: MethodSlot,
    position: Option<SourceLocation>,
}

impl FunctionCall {
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn params(&self) -> Option<&Tuple> {
        self.params.as_ref()
    }

    #[must_use]
    pub fn method(&self) -> &MethodSlot {
        &self.method
    }

    #[must_use]
    pub fn position(&self) -> Option<&SourceLocation> {
        self.position.as_ref()
    }

    /// Whether a target is bound (including the built-in `Evaluate`).
    #[must_use]
    pub fn bound(&self) -> bool {
        !matches!(self.callee, Callee::Unbound)
    }

    fn resolved(&self) -> bool {
        let params_resolved = self.params.as_ref().is_none_or(Symbol::resolved);
        let default_resolved = match &self.callee {
            Callee::Evaluate { default, .. } => default.as_ref().is_none_or(|d| d.resolved()),
            _ => true,
        };
        self.bound() && params_resolved && default_resolved
    }

    fn invariant(&self) -> bool {
        let callee_invariant = match &self.callee {
            Callee::Function(function) => function.invariant(),
            Callee::Method(method) => method.invariant(),
            // definition references depend on stack bindings
            Callee::Evaluate { .. } => false,
            Callee::Unbound => false,
        };
        callee_invariant && self.params.as_ref().is_none_or(Symbol::invariant)
    }

    fn symbols(&self) -> AHashSet<Variable> {
        let mut symbols = self.params.as_ref().map(Symbol::symbols).unwrap_or_default();
        if let Callee::Evaluate { identifier, default } = &self.callee {
            symbols.insert(Variable::define(identifier.clone()));
            if let Some(default) = default {
                symbols.extend(default.symbols());
            }
        }
        if let MethodSlot::Mutating(variable) = &self.method {
            symbols.insert(variable.clone());
        }
        symbols
    }

    /// The bound callee's declared return types.
    fn return_types(&self) -> Option<&[DataType]> {
        match &self.callee {
            Callee::Function(function) => Some(function.return_types()),
            Callee::Method(method) => Some(method.return_types()),
            _ => None,
        }
    }

    fn call_error(&self, kind: ErrorKind, message: String) -> Data {
        let mut error = RenderError::new(kind, message).with_function(self.name.clone());
        if let Some(position) = &self.position {
            error = error.with_position(position.clone());
        }
        Data::Error(Box::new(error))
    }

    /// Structural resolution: resolve arguments, then bind the callee when
    /// the registry reports exactly one candidate. Zero candidates replace
    /// the call with the registry's diagnostic as an errored value (returned
    /// as `Err`); several keep it dynamic.
    fn resolve(mut self, stack: &mut VarStack) -> Result<Self, Data> {
        self.params = self.params.map(|params| params.resolve(stack));
        if let Callee::Evaluate { default, .. } = &mut self.callee {
            *default = default.take().map(|d| Box::new(d.resolve(stack)));
            return Ok(self);
        }
        if !matches!(self.callee, Callee::Unbound) {
            return Ok(self);
        }
        let entities = stack.entities();
        match &self.method {
            MethodSlot::Function => match entities.validate_function(&self.name, self.params.as_ref()) {
                Err(diagnostic) => Err(self.call_error(ErrorKind::OverloadNone, diagnostic)),
                Ok(mut candidates) if candidates.len() == 1 => {
                    let (function, normalized) = candidates.pop().expect("one candidate present");
                    self.callee = Callee::Function(function);
                    self.params = normalized;
                    Ok(self)
                }
                Ok(_) => Ok(self),
            },
            MethodSlot::NonMutating | MethodSlot::Mutating(_) => {
                let mutating = matches!(self.method, MethodSlot::Mutating(_));
                match entities.validate_method(&self.name, self.params.as_ref(), mutating) {
                    Err(diagnostic) => Err(self.call_error(ErrorKind::OverloadNone, diagnostic)),
                    Ok(mut candidates) if candidates.len() == 1 => {
                        let (method, normalized) = candidates.pop().expect("one candidate present");
                        self.callee = Callee::Method(method);
                        self.params = normalized;
                        Ok(self)
                    }
                    Ok(_) => Ok(self),
                }
            }
        }
    }

    /// Terminal reduction of a call site, following the general call
    /// sequence: argument evaluation, dynamic disambiguation, void check,
    /// call-value type check, unsafe injection, invocation.
    fn evaluate(&self, stack: &mut VarStack) -> Data {
        if let Callee::Evaluate { identifier, default } = &self.callee {
            return self.evaluate_definition(identifier, default.as_deref(), stack);
        }
        let throws = stack.missing_variable_throws();

        // arguments evaluate left-to-right; literals are taken directly
        let mut values = Vec::new();
        if let Some(params) = &self.params {
            values.reserve(params.len());
            for member in params.values() {
                let value = if member.is_literal() {
                    member.data().expect("literal parameter holds data").evaluate()
                } else {
                    member.evaluate(stack)
                };
                if value.errored() {
                    if throws {
                        return value;
                    }
                    values.push(Data::TrueNil);
                } else {
                    values.push(value.evaluate());
                }
            }
        }

        // a still-dynamic callee disambiguates on the concrete values
        let (function, method) = match &self.callee {
            Callee::Function(function) => (Some(Arc::clone(function)), None),
            Callee::Method(method) => (None, Some(Arc::clone(method))),
            Callee::Unbound => match self.disambiguate(&values, stack) {
                Ok((function, method, normalized)) => {
                    values = normalized;
                    (function, method)
                }
                Err(errored) => return errored,
            },
            Callee::Evaluate { .. } => unreachable!("handled above"),
        };
        let signature = function
            .as_deref()
            .map(TemplateFunction::call_parameters)
            .or_else(|| method.as_deref().map(|m| m.call_parameters()))
            .unwrap_or_default();

        // void arguments in non-optional slots
        for (index, value) in values.iter().enumerate() {
            let optional = signature.get(index).is_some_and(CallParameter::is_optional);
            if value.is_nil() && !optional {
                if throws {
                    return self.call_error(
                        ErrorKind::VoidArgument,
                        format!("`{}` returned void", self.arg_description(index)),
                    );
                }
                return Data::TrueNil;
            }
        }

        // build the call record, type-checking against the signature
        let Some(call_values) = CallValues::try_bind(signature, values.clone()) else {
            let rendered: Vec<String> = values.iter().map(Data::short).collect();
            return self.call_error(
                ErrorKind::TypeMismatch,
                format!("Couldn't validate parameter types for `{}({})`", self.name, rendered.join(", ")),
            );
        };
        let wants_unsafe = function.as_deref().map_or_else(
            || method.as_deref().is_some_and(|m| m.unsafe_access()),
            TemplateFunction::unsafe_access,
        );
        let call_values = if wants_unsafe {
            call_values.with_unsafe_objects(stack.unsafe_objects_snapshot())
        } else {
            call_values
        };

        match (&self.method, function, method) {
            (MethodSlot::Mutating(variable), _, Some(method)) => {
                let (updated, returned) = method.evaluate_mutating(call_values);
                if let Some(updated) = updated {
                    if let Err(error) = stack.update(variable, updated) {
                        return Data::Error(error);
                    }
                }
                returned
            }
            (_, Some(function), _) => function.evaluate(call_values),
            (_, _, Some(method)) => method.evaluate(call_values),
            _ => self.call_error(ErrorKind::Internal, "call site evaluated without a callee".to_string()),
        }
    }

    /// Evaluation-time overload disambiguation over concrete values.
    #[expect(clippy::type_complexity, reason = "callee pair mirrors the binding split")]
    fn disambiguate(
        &self,
        values: &[Data],
        stack: &mut VarStack,
    ) -> Result<(Option<Arc<dyn TemplateFunction>>, Option<Arc<dyn TemplateMethod>>, Vec<Data>), Data> {
        let members = values
            .iter()
            .enumerate()
            .map(|(index, value)| {
                let label = self
                    .params
                    .as_ref()
                    .and_then(|params| params.label_for(index))
                    .map(str::to_string);
                (label, Parameter::value(value.clone()))
            })
            .collect();
        let concrete = Tuple::arguments(members).expect("argument labels were validated at construction");
        let concrete = (!concrete.is_empty()).then_some(concrete);
        let entities = stack.entities();
        match &self.method {
            MethodSlot::Function => match entities.validate_function(&self.name, concrete.as_ref()) {
                Err(diagnostic) => Err(self.call_error(ErrorKind::OverloadNone, diagnostic)),
                Ok(mut candidates) if candidates.len() == 1 => {
                    let (function, normalized) = candidates.pop().expect("one candidate present");
                    Ok((Some(function), None, extract_values(normalized)))
                }
                Ok(_) => Err(self.call_error(
                    ErrorKind::OverloadAmbiguous,
                    "Dynamic call had too many matches at evaluation".to_string(),
                )),
            },
            MethodSlot::NonMutating | MethodSlot::Mutating(_) => {
                let mutating = matches!(self.method, MethodSlot::Mutating(_));
                match entities.validate_method(&self.name, concrete.as_ref(), mutating) {
                    Err(diagnostic) => Err(self.call_error(ErrorKind::OverloadNone, diagnostic)),
                    Ok(mut candidates) if candidates.len() == 1 => {
                        let (method, normalized) = candidates.pop().expect("one candidate present");
                        Ok((None, Some(method), extract_values(normalized)))
                    }
                    Ok(_) => Err(self.call_error(
                        ErrorKind::OverloadAmbiguous,
                        "Dynamic call had too many matches at evaluation".to_string(),
                    )),
                }
            }
        }
    }

    /// `Evaluate` semantics: look up the definition, fall back to the
    /// default, otherwise error at the call site.
    fn evaluate_definition(&self, identifier: &str, default: Option<&Parameter>, stack: &mut VarStack) -> Data {
        let bound = stack.match_var(&Variable::define(identifier));
        if !bound.errored() {
            // an evaluable definition evaluates in place; a literal returns
            return if bound.is_lazy() { bound.evaluate() } else { bound };
        }
        if let Some(default) = default {
            return default.evaluate(stack);
        }
        self.call_error(
            ErrorKind::UndefinedEvaluate,
            format!("`{identifier}` is undefined and has no default value"),
        )
    }

    fn arg_description(&self, index: usize) -> String {
        self.params
            .as_ref()
            .and_then(|params| params.values().get(index))
            .map_or_else(|| format!("argument {index}"), ToString::to_string)
    }
}

/// Extracts concrete values from a shape-normalized tuple of value members.
fn extract_values(normalized: Option<Tuple>) -> Vec<Data> {
    normalized
        .map(|tuple| {
            tuple
                .values()
                .iter()
                .map(|member| member.data().cloned().unwrap_or(Data::TrueNil).evaluate())
                .collect()
        })
        .unwrap_or_default()
}

/// The discriminated payload of a parameter.
#[derive(Debug, Clone, PartialEq)]
pub enum Container {
    /// A literal or previously folded value.
    Value(Data),
    /// An unvalued control token.
    Keyword(Keyword),
    /// A parser-visible operator; evaluable only inside an expression.
    Operator(Operator),
    /// A name to look up in the stack.
    Variable(Variable),
    /// A constrained 2–3 operand tree.
    Expression(Box<Expression>),
    /// An ordered, optionally labeled sequence.
    Tuple(Box<Tuple>),
    /// A call site.
    Function(Box<FunctionCall>),
}

/// The unit stored inside the AST: a discriminated container plus the facet
/// cache the resolver reads.
///
/// Parameters are immutable after construction; every factory rematerializes
/// the cached `resolved`/`invariant`/`symbols`/`is_literal` facets from the
/// container, and resolution builds new parameters rather than mutating in
/// place.
#[derive(Debug, Clone)]
pub struct Parameter {
    container: Container,
    resolved: bool,
    invariant: bool,
    symbols: AHashSet<Variable>,
    is_literal: bool,
}

impl Parameter {
    /// Wraps a value. Lazy values keep their declared invariance; everything
    /// else is invariant by construction.
    #[must_use]
    pub fn value(data: Data) -> Self {
        Self::assemble(Container::Value(data))
    }

    /// Wraps a keyword, eagerly decaying reducible keywords when `reduce` is
    /// set: boolean keywords collapse to boolean literals, `nil` to the
    /// void-nil literal, and `self` to the self variable.
    #[must_use]
    pub fn keyword(keyword: Keyword, reduce: bool) -> Self {
        if reduce && keyword.is_evaluable() {
            if let Some(value) = keyword.bool_value() {
                return Self::value(Data::Bool(value));
            }
            if keyword == Keyword::Nil {
                return Self::value(Data::TrueNil);
            }
            if keyword == Keyword::SelfRef {
                return Self::variable(Variable::self_ref());
            }
        }
        Self::assemble(Container::Keyword(keyword))
    }

    /// Wraps a parser-visible operator. Operators the lexer cannot emit are
    /// rejected: the factory degrades to the invalid sentinel (asserting in
    /// debug builds).
    #[must_use]
    pub fn operator(operator: Operator) -> Self {
        debug_assert!(operator.parseable(), "operator {operator} is not parser-visible");
        if !operator.parseable() {
            return Self::invalid();
        }
        Self::assemble(Container::Operator(operator))
    }

    /// Internal operator construction for expression storage, bypassing the
    /// parser-visibility check.
    pub(crate) fn operator_unchecked(operator: Operator) -> Self {
        Self::assemble(Container::Operator(operator))
    }

    /// The invalid sentinel: the open-subscript operator can never appear in
    /// a finished tree.
    #[must_use]
    pub fn invalid() -> Self {
        Self::assemble(Container::Operator(Operator::SubOpen))
    }

    #[must_use]
    pub fn variable(variable: Variable) -> Self {
        Self::assemble(Container::Variable(variable))
    }

    #[must_use]
    pub fn expression(expression: Expression) -> Self {
        Self::assemble(Container::Expression(Box::new(expression)))
    }

    /// Groups parameters into a tuple, collapsing trivial nesting: a single
    /// unlabeled member collapses through any chain of single-member tuples
    /// to the member itself, and an empty group collapses to the void-nil
    /// literal.
    #[must_use]
    pub fn tuple(members: Vec<Self>) -> Self {
        let mut members = members;
        if members.is_empty() {
            return Self::value(Data::TrueNil);
        }
        if members.len() == 1 {
            let mut only = members.pop().expect("length checked");
            loop {
                match only.container {
                    Container::Tuple(tuple) if tuple.len() == 1 && tuple.labels().is_empty() => {
                        only = tuple.into_values().pop().expect("length checked");
                    }
                    Container::Tuple(tuple) if tuple.is_empty() => return Self::value(Data::TrueNil),
                    container => {
                        only.container = container;
                        return only;
                    }
                }
            }
        }
        let members = members.into_iter().map(|member| (None, member)).collect();
        let tuple = Tuple::collection(members).expect("unlabeled members cannot collide");
        Self::assemble(Container::Tuple(Box::new(tuple)))
    }

    /// Wraps an already-built collection literal without collapsing, so
    /// single-element array literals survive.
    #[must_use]
    pub fn collection(tuple: Tuple) -> Self {
        debug_assert!(tuple.is_collection_literal(), "argument lists belong to call sites");
        Self::assemble(Container::Tuple(Box::new(tuple)))
    }

    /// A plain function call site, unbound until resolution.
    #[must_use]
    pub fn function(name: impl Into<String>, args: Option<Tuple>, position: Option<SourceLocation>) -> Self {
        Self::assemble(Container::Function(Box::new(FunctionCall {
            name: name.into(),
            callee: Callee::Unbound,
            params: args,
            method: MethodSlot::Function,
            position,
        })))
    }

    /// A method call site. The receiver is the first argument; passing the
    /// receiver variable marks the call mutating and routes write-back to it.
    #[must_use]
    pub fn method(
        name: impl Into<String>,
        args: Tuple,
        mutating: Option<Variable>,
        position: Option<SourceLocation>,
    ) -> Self {
        debug_assert!(!args.is_empty(), "method call requires a receiver argument");
        let method = match mutating {
            Some(variable) => MethodSlot::Mutating(variable),
            None => MethodSlot::NonMutating,
        };
        Self::assemble(Container::Function(Box::new(FunctionCall {
            name: name.into(),
            callee: Callee::Unbound,
            params: Some(args),
            method,
            position,
        })))
    }

    /// An `Evaluate` call site referencing a named block definition, with an
    /// optional default evaluated when the definition is unbound.
    #[must_use]
    pub fn evaluate_call(
        identifier: impl Into<String>,
        default: Option<Self>,
        position: Option<SourceLocation>,
    ) -> Self {
        let identifier = identifier.into();
        Self::assemble(Container::Function(Box::new(FunctionCall {
            name: "evaluate".to_string(),
            callee: Callee::Evaluate {
                identifier,
                default: default.map(Box::new),
            },
            params: None,
            method: MethodSlot::Function,
            position,
        })))
    }

    fn assemble(container: Container) -> Self {
        let mut parameter = Self {
            container,
            resolved: false,
            invariant: false,
            symbols: AHashSet::new(),
            is_literal: false,
        };
        parameter.rematerialize();
        parameter
    }

    /// Recomputes the facet cache from the container. Called whenever the
    /// container is (re)assigned.
    fn rematerialize(&mut self) {
        let (resolved, invariant, symbols) = match &self.container {
            Container::Value(data) => {
                let invariant = if data.is_lazy() { data.invariant() } else { true };
                (true, invariant, AHashSet::new())
            }
            Container::Keyword(_) | Container::Operator(_) => (true, true, AHashSet::new()),
            Container::Variable(variable) => (false, true, AHashSet::from_iter([variable.clone()])),
            Container::Expression(expression) => (expression.resolved(), expression.invariant(), expression.symbols()),
            Container::Tuple(tuple) => (tuple.resolved(), tuple.invariant(), tuple.symbols()),
            Container::Function(call) => (call.resolved(), call.invariant(), call.symbols()),
        };
        self.resolved = resolved;
        self.invariant = invariant;
        self.symbols = symbols;
        self.is_literal = match &self.container {
            Container::Value(data) => invariant && !data.errored(),
            _ => false,
        };
    }

    #[must_use]
    pub fn container(&self) -> &Container {
        &self.container
    }

    /// Whether this parameter is a non-errored, invariant value.
    #[must_use]
    pub fn is_literal(&self) -> bool {
        self.is_literal
    }

    /// Whether this parameter is the invalid sentinel.
    #[must_use]
    pub fn is_invalid(&self) -> bool {
        matches!(self.container, Container::Operator(Operator::SubOpen))
    }

    /// The wrapped value, when the container is a value.
    #[must_use]
    pub fn data(&self) -> Option<&Data> {
        match &self.container {
            Container::Value(data) => Some(data),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_variable(&self) -> Option<&Variable> {
        match &self.container {
            Container::Variable(variable) => Some(variable),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_keyword(&self) -> Option<Keyword> {
        match &self.container {
            Container::Keyword(keyword) => Some(*keyword),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_operator(&self) -> Option<Operator> {
        match &self.container {
            Container::Operator(operator) => Some(*operator),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_expression(&self) -> Option<&Expression> {
        match &self.container {
            Container::Expression(expression) => Some(expression),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_tuple(&self) -> Option<&Tuple> {
        match &self.container {
            Container::Tuple(tuple) => Some(tuple),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_function(&self) -> Option<&FunctionCall> {
        match &self.container {
            Container::Function(call) => Some(call),
            _ => None,
        }
    }

    /// May this parameter produce a value at evaluation time?
    #[must_use]
    pub fn is_valued(&self) -> bool {
        match &self.container {
            Container::Value(_) | Container::Variable(_) | Container::Function(_) => true,
            Container::Operator(_) => false,
            Container::Keyword(keyword) => keyword.is_evaluable(),
            Container::Tuple(tuple) => tuple.is_evaluable(),
            Container::Expression(expression) => expression.form() != ExprForm::Custom,
        }
    }

    /// The statically provable stored type: from a literal, an expression
    /// whose operator forces a type, an evaluable tuple, or a bound callee
    /// declaring a single return type. `None` otherwise.
    #[must_use]
    pub fn base_type(&self) -> Option<DataType> {
        match &self.container {
            Container::Value(data) => (!data.errored()).then(|| data.stored_type()),
            Container::Expression(expression) => expression.base_type(),
            Container::Tuple(tuple) => tuple.is_evaluable().then(|| {
                if tuple.is_dictionary() {
                    DataType::Dictionary
                } else {
                    DataType::Array
                }
            }),
            Container::Function(call) => match call.return_types() {
                Some([single]) => Some(*single),
                _ => None,
            },
            Container::Keyword(_) | Container::Operator(_) | Container::Variable(_) => None,
        }
    }

    /// Tri-valued collection test: `Some(true)`/`Some(false)` when provable
    /// from structure, `None` when a variable could resolve to either.
    #[must_use]
    pub fn is_collection(&self) -> Option<bool> {
        match &self.container {
            Container::Value(data) => Some(data.is_collection()),
            Container::Keyword(_) | Container::Operator(_) => Some(false),
            Container::Variable(variable) => variable.is_collection().then_some(true),
            Container::Expression(expression) => expression
                .base_type()
                .map(|base| matches!(base, DataType::Array | DataType::Dictionary)),
            Container::Tuple(tuple) => Some(tuple.is_evaluable()),
            Container::Function(call) => {
                let returns = call.return_types()?;
                let collections = returns
                    .iter()
                    .filter(|base| matches!(base, DataType::Array | DataType::Dictionary))
                    .count();
                if collections == returns.len() && collections > 0 {
                    Some(true)
                } else if collections == 0 && !returns.is_empty() {
                    Some(false)
                } else {
                    None
                }
            }
        }
    }

    /// A cheap output-size upper bound the renderer uses for buffer
    /// preallocation.
    #[must_use]
    pub fn underestimated_size(&self) -> usize {
        match &self.container {
            Container::Value(_) | Container::Variable(_) | Container::Function(_) | Container::Expression(_) => 16,
            Container::Keyword(keyword) if keyword.is_boolean() => {
                let spelled: &'static str = (*keyword).into();
                spelled.len()
            }
            Container::Keyword(_) | Container::Operator(_) | Container::Tuple(_) => 0,
        }
    }
}

impl Symbol for Parameter {
    fn resolved(&self) -> bool {
        self.resolved
    }

    fn invariant(&self) -> bool {
        self.invariant
    }

    fn symbols(&self) -> AHashSet<Variable> {
        self.symbols.clone()
    }

    fn resolve(self, stack: &mut VarStack) -> Self {
        let resolved = match self.container {
            Container::Value(_) | Container::Keyword(_) | Container::Operator(_) => return self,
            Container::Variable(variable) => {
                let peeked = stack.peek(&variable);
                if peeked.errored() {
                    // the lookup may succeed later; keep the variable
                    return Self::assemble(Container::Variable(variable));
                }
                if peeked.is_lazy() && peeked.invariant() {
                    return Self::value(peeked.evaluate());
                }
                return Self::value(peeked);
            }
            Container::Expression(expression) => Self::assemble(Container::Expression(Box::new(expression.resolve(stack)))),
            Container::Tuple(tuple) => {
                if tuple.is_evaluable() {
                    Self::assemble(Container::Tuple(Box::new(tuple.resolve(stack))))
                } else {
                    Self::assemble(Container::Tuple(tuple))
                }
            }
            Container::Function(call) => match call.resolve(stack) {
                Ok(call) => Self::assemble(Container::Function(Box::new(call))),
                Err(errored) => Self::value(errored),
            },
        };
        // a resolved, invariant subtree folds to its value
        let foldable = resolved.resolved
            && resolved.invariant
            && resolved.is_valued()
            && matches!(
                resolved.container,
                Container::Expression(_) | Container::Tuple(_) | Container::Function(_)
            );
        if foldable {
            return Self::value(resolved.evaluate(stack));
        }
        if let Container::Value(data) = &resolved.container {
            // force invariant lazy literals while we are allowed to
            if data.is_lazy() && resolved.invariant {
                return Self::value(data.evaluate());
            }
        }
        resolved
    }

    fn evaluate(&self, stack: &mut VarStack) -> Data {
        match &self.container {
            Container::Value(data) => data.evaluate(),
            Container::Variable(variable) => {
                let value = stack.match_var(variable);
                if value.errored() && !stack.missing_variable_throws() {
                    return Data::TrueNil;
                }
                value
            }
            Container::Expression(expression) => expression.evaluate(stack),
            Container::Tuple(tuple) => tuple.evaluate(stack),
            Container::Function(call) => call.evaluate(stack),
            Container::Keyword(keyword) if keyword.is_evaluable() => {
                Self::keyword(*keyword, true).evaluate(stack)
            }
            Container::Keyword(_) | Container::Operator(_) => {
                debug_assert!(false, "non-evaluable token reached evaluation: {self}");
                Data::error(
                    ErrorKind::Internal,
                    "non-evaluable token reached evaluation; the parser emitted a malformed tree",
                )
            }
        }
    }
}

impl PartialEq for Parameter {
    fn eq(&self, other: &Self) -> bool {
        self.container == other.container
    }
}

impl Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.container {
            Container::Value(data) => f.write_str(&data.short()),
            Container::Keyword(keyword) => write!(f, "{keyword}"),
            Container::Operator(operator) => f.write_str(operator.symbol()),
            Container::Variable(variable) => write!(f, "{variable}"),
            Container::Expression(expression) => write!(f, "{expression}"),
            Container::Tuple(tuple) => write!(f, "{tuple}"),
            Container::Function(call) => {
                write!(f, "{}", call.name)?;
                match &call.params {
                    Some(params) => write!(f, "{params}"),
                    None => f.write_str("()"),
                }
            }
        }
    }
}
