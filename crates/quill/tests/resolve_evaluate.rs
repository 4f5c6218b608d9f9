//! End-to-end tests for the resolve/evaluate pipeline: expression
//! arithmetic, stack lookups under both soft-error policies, overload
//! binding and evaluation-time disambiguation, `Evaluate` references,
//! mutating methods, and unsafe-object injection.

use std::sync::Arc;

use quill::{
    CallParameter, CallValues, Context, Data, DataType, DataValue, Entities, ErrorKind, Expression, Keyword, Operator,
    Parameter, Symbol, TemplateFunction, TemplateMethod, Tuple, VarStack, Variable,
};

/// `upper(string) -> string`: the single-overload function of scenario 5.
struct Upper {
    params: Vec<CallParameter>,
}

impl Upper {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            params: vec![CallParameter::new(&[DataType::String])],
        })
    }
}

impl TemplateFunction for Upper {
    fn call_parameters(&self) -> &[CallParameter] {
        &self.params
    }

    fn return_types(&self) -> &[DataType] {
        &[DataType::String]
    }

    fn evaluate(&self, values: CallValues) -> Data {
        match values.get(0) {
            Data::Str(text) => Data::Str(text.to_uppercase()),
            other => Data::error(ErrorKind::TypeMismatch, format!("upper: unexpected {}", other.short())),
        }
    }
}

/// One of two `f(int) -> int` overloads that stay ambiguous forever.
struct IntOverload {
    params: Vec<CallParameter>,
    factor: i64,
}

impl IntOverload {
    fn new(factor: i64) -> Arc<Self> {
        Arc::new(Self {
            params: vec![CallParameter::new(&[DataType::Int])],
            factor,
        })
    }
}

impl TemplateFunction for IntOverload {
    fn call_parameters(&self) -> &[CallParameter] {
        &self.params
    }

    fn return_types(&self) -> &[DataType] {
        &[DataType::Int]
    }

    fn evaluate(&self, values: CallValues) -> Data {
        match values.get(0) {
            Data::Int(value) => Data::Int(value * self.factor),
            other => Data::error(ErrorKind::TypeMismatch, format!("f: unexpected {}", other.short())),
        }
    }
}

/// `xs.push(element)`: a mutating method that appends to its receiver and
/// returns the new count.
struct Push {
    params: Vec<CallParameter>,
}

impl Push {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            params: vec![
                CallParameter::new(&[DataType::Array]),
                CallParameter::new(&[
                    DataType::Bool,
                    DataType::Int,
                    DataType::Double,
                    DataType::String,
                    DataType::Array,
                    DataType::Dictionary,
                ]),
            ],
        })
    }
}

impl TemplateFunction for Push {
    fn call_parameters(&self) -> &[CallParameter] {
        &self.params
    }

    fn return_types(&self) -> &[DataType] {
        &[DataType::Int]
    }

    fn invariant(&self) -> bool {
        false
    }

    fn evaluate(&self, values: CallValues) -> Data {
        Data::error(ErrorKind::Internal, format!("push invoked non-mutating with {} args", values.len()))
    }
}

impl TemplateMethod for Push {
    fn mutating(&self) -> bool {
        true
    }

    fn evaluate_mutating(&self, values: CallValues) -> (Option<Data>, Data) {
        let Data::Array(mut items) = values.get(0) else {
            return (None, Data::error(ErrorKind::TypeMismatch, "push requires an array receiver"));
        };
        items.push(values.get(1));
        let count = i64::try_from(items.len()).unwrap_or(i64::MAX);
        (Some(Data::Array(items)), Data::Int(count))
    }
}

/// `xs.count()`: a non-mutating method.
struct Count {
    params: Vec<CallParameter>,
}

impl Count {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            params: vec![CallParameter::new(&[DataType::Array])],
        })
    }
}

impl TemplateFunction for Count {
    fn call_parameters(&self) -> &[CallParameter] {
        &self.params
    }

    fn return_types(&self) -> &[DataType] {
        &[DataType::Int]
    }

    fn evaluate(&self, values: CallValues) -> Data {
        match values.get(0) {
            Data::Array(items) => Data::Int(i64::try_from(items.len()).unwrap_or(i64::MAX)),
            other => Data::error(ErrorKind::TypeMismatch, format!("count: unexpected {}", other.short())),
        }
    }
}

impl TemplateMethod for Count {}

/// An unsafe entity that reports whether a named host object was injected.
struct HasObject {
    params: Vec<CallParameter>,
}

impl HasObject {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            params: vec![CallParameter::new(&[DataType::String])],
        })
    }
}

impl TemplateFunction for HasObject {
    fn call_parameters(&self) -> &[CallParameter] {
        &self.params
    }

    fn return_types(&self) -> &[DataType] {
        &[DataType::Bool]
    }

    fn invariant(&self) -> bool {
        false
    }

    fn unsafe_access(&self) -> bool {
        true
    }

    fn evaluate(&self, values: CallValues) -> Data {
        let Data::Str(key) = values.get(0) else {
            return Data::error(ErrorKind::TypeMismatch, "has_object requires a string key");
        };
        let present = values.unsafe_objects().is_some_and(|objects| objects.contains_key(&key));
        Data::Bool(present)
    }
}

fn registry() -> Arc<Entities> {
    let mut entities = Entities::new();
    entities.register_function("upper", Upper::new()).unwrap();
    entities.register_function("f", IntOverload::new(2)).unwrap();
    entities.register_function("f", IntOverload::new(3)).unwrap();
    entities.register_function("has_object", HasObject::new()).unwrap();
    entities.register_method("push", Push::new()).unwrap();
    entities.register_method("count", Count::new()).unwrap();
    Arc::new(entities)
}

fn stack_with(context: Context) -> VarStack {
    VarStack::new(context, registry())
}

fn empty_stack() -> VarStack {
    stack_with(Context::new())
}

fn int(value: i64) -> Parameter {
    Parameter::value(Data::Int(value))
}

fn args(members: Vec<Parameter>) -> Tuple {
    Tuple::arguments(members.into_iter().map(|member| (None, member)).collect()).unwrap()
}

// =============================================================================
// 1. Expression evaluation
// =============================================================================

/// `1 + 2` evaluates to `3` on an empty stack.
#[test]
fn addition_of_literals() {
    let mut stack = empty_stack();
    let expression = Expression::infix(int(1), Operator::Plus, int(2)).unwrap();
    assert_eq!(expression.evaluate(&mut stack), Data::Int(3));
}

/// Mixed Int/Double arithmetic promotes to Double; `+` concatenates strings.
#[test]
fn arithmetic_promotion_and_concatenation() {
    let mut stack = empty_stack();
    let mixed = Expression::infix(int(3), Operator::Multiply, Parameter::value(Data::Double(1.5))).unwrap();
    assert_eq!(mixed.evaluate(&mut stack), Data::Double(4.5));

    let concat = Expression::infix(
        Parameter::value(Data::from("tem")),
        Operator::Plus,
        Parameter::value(Data::from("plate")),
    )
    .unwrap();
    assert_eq!(concat.evaluate(&mut stack), Data::Str("template".to_string()));
}

/// Division by an integer zero is an arithmetic error value, not a panic.
#[test]
fn division_by_zero_is_soft() {
    let mut stack = empty_stack();
    let division = Expression::infix(int(10), Operator::Divide, int(0)).unwrap();
    let result = division.evaluate(&mut stack);
    assert_eq!(result.error_info().unwrap().kind, ErrorKind::Arithmetic);
}

/// Logical operators short-circuit: the right side of `false && x` never
/// evaluates, so an unbound variable there is harmless even in strict mode.
#[test]
fn logical_short_circuit() {
    let mut context = Context::new();
    context.set_missing_variable_throws(true);
    let mut stack = stack_with(context);
    let guarded = Expression::infix(
        Parameter::keyword(Keyword::False, true),
        Operator::And,
        Parameter::variable(Variable::named("unbound")),
    )
    .unwrap();
    assert_eq!(guarded.evaluate(&mut stack), Data::Bool(false));
}

/// Ternary picks exactly one branch; nil-coalescing substitutes its right
/// side only for nil.
#[test]
fn ternary_and_nil_coalesce() {
    let mut stack = empty_stack();
    let ternary = Expression::ternary(Parameter::keyword(Keyword::True, true), int(1), int(2)).unwrap();
    assert_eq!(ternary.evaluate(&mut stack), Data::Int(1));

    let coalesce = Expression::infix(Parameter::value(Data::TrueNil), Operator::NilCoalesce, int(9)).unwrap();
    assert_eq!(coalesce.evaluate(&mut stack), Data::Int(9));
    let kept = Expression::infix(int(4), Operator::NilCoalesce, int(9)).unwrap();
    assert_eq!(kept.evaluate(&mut stack), Data::Int(4));
}

/// Subscripting arrays by Int and dictionaries by String; misses decay to
/// nil under the default policy.
#[test]
fn subscript_expression() {
    let mut stack = empty_stack();
    let array = Parameter::value(Data::Array(vec![Data::Int(10), Data::Int(20)]));
    let pick = Expression::infix(array.clone(), Operator::Subscript, int(1)).unwrap();
    assert_eq!(pick.evaluate(&mut stack), Data::Int(20));

    let miss = Expression::infix(array, Operator::Subscript, int(5)).unwrap();
    let result = Parameter::expression(miss).evaluate(&mut stack);
    assert!(result.errored());
    assert_eq!(result.error_info().unwrap().kind, ErrorKind::MissingVariable);
}

// =============================================================================
// 2. Variable lookup and the soft-error policy
// =============================================================================

/// A bound pathed variable evaluates to its value.
#[test]
fn bound_variable_lookup() {
    let mut context = Context::new();
    let mut user = indexmap::IndexMap::new();
    user.insert("name".to_string(), Data::from("ada"));
    context.set_literal("context", "user", Data::Dictionary(user)).unwrap();

    let mut stack = stack_with(context);
    let parameter = Parameter::variable(Variable::named("user").member("name"));
    assert_eq!(parameter.evaluate(&mut stack), Data::Str("ada".to_string()));
}

/// A missing variable under strict policy propagates as a missing-variable
/// error.
#[test]
fn missing_variable_strict() {
    let mut context = Context::new();
    context.set_missing_variable_throws(true);
    let mut stack = stack_with(context);
    let parameter = Parameter::variable(Variable::named("user").member("name"));
    let result = parameter.evaluate(&mut stack);
    assert_eq!(result.error_info().unwrap().kind, ErrorKind::MissingVariable);
}

/// The same miss decays to nil under the default policy.
#[test]
fn missing_variable_soft() {
    let mut stack = empty_stack();
    let parameter = Parameter::variable(Variable::named("user").member("name"));
    assert_eq!(parameter.evaluate(&mut stack), Data::TrueNil);
}

/// Frame locals shadow the default scope, and `self` resolves to the
/// innermost iteration target.
#[test]
fn frames_shadow_and_self_resolves() {
    let mut context = Context::new();
    context.set_literal("context", "x", Data::Int(1)).unwrap();
    let mut stack = stack_with(context);

    stack.push_frame();
    stack.bind("x", Data::Int(2));
    stack.set_self(Data::from("item"));
    assert_eq!(Parameter::variable(Variable::named("x")).evaluate(&mut stack), Data::Int(2));
    assert_eq!(
        Parameter::keyword(Keyword::SelfRef, true).evaluate(&mut stack),
        Data::Str("item".to_string())
    );
    stack.pop_frame();
    assert_eq!(Parameter::variable(Variable::named("x")).evaluate(&mut stack), Data::Int(1));
}

// =============================================================================
// 3. Function calls: binding, folding, disambiguation
// =============================================================================

/// A single-overload call binds at resolution, and because `upper` is
/// invariant over a literal argument, resolution folds the whole call.
#[test]
fn single_overload_binds_and_folds() {
    let mut stack = empty_stack();
    let call = Parameter::function("upper", Some(args(vec![Parameter::value(Data::from("hi"))])), None);
    assert!(!call.resolved());

    let resolved = call.clone().resolve(&mut stack);
    assert!(resolved.is_literal(), "invariant call over a literal should fold");
    assert_eq!(resolved.data(), Some(&Data::Str("HI".to_string())));

    // direct evaluation of the unresolved call agrees
    assert_eq!(call.evaluate(&mut stack), Data::Str("HI".to_string()));
}

/// Two overloads both accepting the argument stay dynamic at resolution
/// and error at evaluation.
#[test]
fn ambiguous_overloads_error_at_evaluation() {
    let mut stack = empty_stack();
    let call = Parameter::function("f", Some(args(vec![int(1)])), None);

    let resolved = call.resolve(&mut stack);
    assert!(!resolved.resolved(), "two candidates must stay dynamic");

    let result = resolved.evaluate(&mut stack);
    let error = result.error_info().unwrap();
    assert_eq!(error.kind, ErrorKind::OverloadAmbiguous);
    assert_eq!(error.message, "Dynamic call had too many matches at evaluation");
}

/// A call to an unregistered name resolves to an errored value carrying the
/// registry diagnostic.
#[test]
fn unknown_function_resolves_to_error() {
    let mut stack = empty_stack();
    let call = Parameter::function("nonsense", None, None);
    let resolved = call.resolve(&mut stack);
    let error = resolved.data().unwrap().error_info().unwrap();
    assert_eq!(error.kind, ErrorKind::OverloadNone);
    assert_eq!(error.function.as_deref(), Some("nonsense"));
}

/// A callee bound on an unresolved argument type-checks the concrete value
/// at evaluation time.
#[test]
fn late_type_mismatch() {
    let mut stack = empty_stack();
    let call = Parameter::function(
        "upper",
        Some(args(vec![Parameter::variable(Variable::named("y"))])),
        None,
    );
    let resolved = call.resolve(&mut stack);
    // y was unknown, so the single overload bound on shape alone
    stack.bind("y", Data::Int(5));
    let result = resolved.evaluate(&mut stack);
    let error = result.error_info().unwrap();
    assert_eq!(error.kind, ErrorKind::TypeMismatch);
    assert!(error.message.starts_with("Couldn't validate parameter types for `upper("));
}

/// A non-optional argument that evaluates to void errors under strict
/// policy and decays the call to nil otherwise.
#[test]
fn void_argument_policy() {
    let mut strict_context = Context::new();
    strict_context.set_missing_variable_throws(true);
    let mut strict = stack_with(strict_context);
    let call = Parameter::function("upper", Some(args(vec![Parameter::value(Data::TrueNil)])), None);
    let result = call.evaluate(&mut strict);
    let error = result.error_info().unwrap();
    assert_eq!(error.kind, ErrorKind::VoidArgument);
    assert!(error.message.ends_with("returned void"));

    let mut soft = empty_stack();
    assert_eq!(call.evaluate(&mut soft), Data::TrueNil);
}

/// Strict policy short-circuits argument evaluation at the first error.
#[test]
fn strict_policy_short_circuits_arguments() {
    let mut context = Context::new();
    context.set_missing_variable_throws(true);
    let mut stack = stack_with(context);
    let call = Parameter::function(
        "upper",
        Some(args(vec![Parameter::variable(Variable::named("gone"))])),
        None,
    );
    let result = call.evaluate(&mut stack);
    assert_eq!(result.error_info().unwrap().kind, ErrorKind::MissingVariable);
}

// =============================================================================
// 4. Methods
// =============================================================================

/// A non-mutating method call evaluates through the method registry.
#[test]
fn non_mutating_method() {
    let mut stack = empty_stack();
    stack.bind("xs", Data::Array(vec![Data::Int(1), Data::Int(2)]));
    let call = Parameter::method(
        "count",
        args(vec![Parameter::variable(Variable::named("xs"))]),
        None,
        None,
    );
    assert_eq!(call.evaluate(&mut stack), Data::Int(2));
}

/// A mutating method applies its updated receiver back through the stack
/// and returns its return value.
#[test]
fn mutating_method_writes_back() {
    let mut stack = empty_stack();
    stack.bind("xs", Data::Array(vec![Data::Int(1), Data::Int(2)]));
    let call = Parameter::method(
        "push",
        args(vec![Parameter::variable(Variable::named("xs")), int(3)]),
        Some(Variable::named("xs")),
        None,
    );
    assert_eq!(call.evaluate(&mut stack), Data::Int(3));

    let updated = Parameter::variable(Variable::named("xs")).evaluate(&mut stack);
    assert_eq!(updated, Data::Array(vec![Data::Int(1), Data::Int(2), Data::Int(3)]));
}

/// A mutating overload is not considered for a non-mutating call site.
#[test]
fn mutating_overload_hidden_from_plain_call() {
    let mut stack = empty_stack();
    stack.bind("xs", Data::Array(vec![Data::Int(1)]));
    let call = Parameter::method(
        "push",
        args(vec![Parameter::variable(Variable::named("xs")), int(3)]),
        None,
        None,
    );
    let result = call.evaluate(&mut stack);
    assert_eq!(result.error_info().unwrap().kind, ErrorKind::OverloadNone);
}

// =============================================================================
// 5. Evaluate references
// =============================================================================

/// A bound literal definition returns directly; a lazy definition evaluates
/// in place.
#[test]
fn evaluate_reference_bound() {
    let mut stack = empty_stack();
    stack.set_define("title", DataValue::literal(Data::from("Home")));
    let call = Parameter::evaluate_call("title", None, None);
    assert_eq!(call.evaluate(&mut stack), Data::Str("Home".to_string()));

    stack.set_define(
        "banner",
        DataValue::variable(quill::DataGenerator::lazy(|| Data::from("Hi!"), DataType::String, true)),
    );
    let call = Parameter::evaluate_call("banner", None, None);
    assert_eq!(call.evaluate(&mut stack), Data::Str("Hi!".to_string()));
}

/// An unbound definition falls back to its default.
#[test]
fn evaluate_reference_default() {
    let mut stack = empty_stack();
    let call = Parameter::evaluate_call("missing", Some(Parameter::value(Data::from("fallback"))), None);
    assert_eq!(call.evaluate(&mut stack), Data::Str("fallback".to_string()));
}

/// An unbound definition with no default errors at the call site with the
/// canonical message.
#[test]
fn evaluate_reference_undefined() {
    let mut stack = empty_stack();
    let call = Parameter::evaluate_call("missing", None, None);
    let result = call.evaluate(&mut stack);
    let error = result.error_info().unwrap();
    assert_eq!(error.kind, ErrorKind::UndefinedEvaluate);
    assert_eq!(error.message, "`missing` is undefined and has no default value");
}

// =============================================================================
// 6. Unsafe-object injection
// =============================================================================

/// An unsafe entity receives the context's registered unsafe objects; a
/// context without them injects an empty snapshot.
#[test]
fn unsafe_objects_snapshot() {
    struct Db;
    impl quill::ContextPublisher for Db {
        fn variables(&self) -> ahash::AHashMap<String, quill::DataGenerator> {
            ahash::AHashMap::new()
        }
    }

    let mut context = Context::new();
    context.set_allowed_modes(quill::ObjectMode::CONTEXTUAL | quill::ObjectMode::UNSAFE);
    context
        .register_object("db", Arc::new(Db), quill::ObjectMode::UNSAFE)
        .unwrap();
    let mut stack = stack_with(context);
    let call = Parameter::function("has_object", Some(args(vec![Parameter::value(Data::from("db"))])), None);
    assert_eq!(call.evaluate(&mut stack), Data::Bool(true));

    let mut bare = empty_stack();
    let call = Parameter::function("has_object", Some(args(vec![Parameter::value(Data::from("db"))])), None);
    assert_eq!(call.evaluate(&mut bare), Data::Bool(false));
}

// =============================================================================
// 7. Structural properties
// =============================================================================

/// Resolution is idempotent across the container kinds exercised here.
#[test]
fn resolve_idempotent() {
    let mut stack = empty_stack();
    let samples = vec![
        Parameter::variable(Variable::named("unbound")),
        Parameter::function("f", Some(args(vec![int(1)])), None),
        Parameter::expression(
            Expression::infix(Parameter::variable(Variable::named("unbound")), Operator::Plus, int(1)).unwrap(),
        ),
    ];
    for sample in samples {
        let once = sample.resolve(&mut stack);
        let twice = once.clone().resolve(&mut stack);
        assert_eq!(once, twice);
    }
}

/// An invariant, resolved parameter evaluates identically on stacks that
/// bind its (empty) symbol set identically.
#[test]
fn invariant_evaluation_is_stack_independent() {
    let mut first = empty_stack();
    let mut second = stack_with({
        let mut context = Context::new();
        context.set_literal("context", "noise", Data::Int(99)).unwrap();
        context
    });

    let parameter = Parameter::function("upper", Some(args(vec![Parameter::value(Data::from("hi"))])), None)
        .resolve(&mut first);
    assert!(parameter.resolved() && parameter.invariant());
    assert_eq!(parameter.evaluate(&mut first), parameter.evaluate(&mut second));
}

/// Tuple literals evaluate to arrays or dictionaries according to their
/// labels.
#[test]
fn tuple_literals_evaluate() {
    let mut stack = empty_stack();
    let array = Tuple::collection(vec![(None, int(1)), (None, int(2))]).unwrap();
    assert_eq!(
        Parameter::collection(array).evaluate(&mut stack),
        Data::Array(vec![Data::Int(1), Data::Int(2)])
    );

    let dictionary = Tuple::collection(vec![
        (Some("a".to_string()), int(1)),
        (Some("b".to_string()), int(2)),
    ])
    .unwrap();
    let result = Parameter::collection(dictionary).evaluate(&mut stack);
    let Data::Dictionary(values) = result else {
        panic!("expected a dictionary, got {}", result.short());
    };
    assert_eq!(values.get("a"), Some(&Data::Int(1)));
    assert_eq!(values.get("b"), Some(&Data::Int(2)));
}
