//! Integration tests for scoped contexts: publisher registration, lazy
//! refresh semantics, scope locking with resolve-time inlining, and the
//! pre-seal configuration surface.

use std::sync::{
    Arc,
    atomic::{AtomicI64, Ordering},
};

use ahash::AHashMap;
use quill::{
    Context, ContextError, ContextPublisher, Data, DataGenerator, DataType, DataValue, Entities, Parameter, Runtime,
    Symbol, VarStack, Variable,
};

/// A publisher exposing a primary map plus extended variables.
struct ServerInfo {
    requests: Arc<AtomicI64>,
}

impl ContextPublisher for ServerInfo {
    fn variables(&self) -> AHashMap<String, DataGenerator> {
        let mut variables = AHashMap::new();
        variables.insert("host".to_string(), DataGenerator::immediate("example.com"));
        let requests = Arc::clone(&self.requests);
        variables.insert(
            "requests".to_string(),
            DataGenerator::lazy(move || Data::Int(requests.load(Ordering::SeqCst)), DataType::Int, false),
        );
        variables
    }

    fn extended_variables(&self) -> AHashMap<String, DataGenerator> {
        let mut variables = AHashMap::new();
        variables.insert("port".to_string(), DataGenerator::immediate(Data::Int(443)));
        variables
    }
}

fn stack_with(context: Context) -> VarStack {
    VarStack::new(context, Arc::new(Entities::new()))
}

// =============================================================================
// 1. Registration and lookup
// =============================================================================

/// Registered publisher variables (primary and extended) resolve through
/// scope-qualified lookups.
#[test]
fn publisher_variables_visible() {
    let publisher = ServerInfo {
        requests: Arc::new(AtomicI64::new(7)),
    };
    let mut context = Context::new();
    context.register_publisher("server", &publisher).unwrap();

    let mut stack = stack_with(context);
    assert_eq!(
        Parameter::variable(Variable::scoped("server", "host")).evaluate(&mut stack),
        Data::Str("example.com".to_string())
    );
    assert_eq!(
        Parameter::variable(Variable::scoped("server", "port")).evaluate(&mut stack),
        Data::Int(443)
    );
    assert_eq!(
        Parameter::variable(Variable::scoped("server", "requests")).evaluate(&mut stack),
        Data::Int(7)
    );
}

/// A bare scope reference materializes the whole scope as a dictionary.
#[test]
fn bare_scope_reference_is_dictionary() {
    let mut context = Context::new();
    context.set_literal("site", "title", Data::from("Docs")).unwrap();
    context.set_literal("site", "lang", Data::from("en")).unwrap();

    let mut stack = stack_with(context);
    let whole = Parameter::variable(Variable::scoped("site", "")).evaluate(&mut stack);
    let Data::Dictionary(values) = whole else {
        panic!("expected the scope dictionary, got {}", whole.short());
    };
    assert_eq!(values.get("title"), Some(&Data::Str("Docs".to_string())));
    assert_eq!(values.get("lang"), Some(&Data::Str("en".to_string())));
}

/// Lazy cells refresh once per render and then serve the memoized value.
#[test]
fn lazy_cells_memoize_within_render() {
    let requests = Arc::new(AtomicI64::new(0));
    let publisher = ServerInfo {
        requests: Arc::clone(&requests),
    };
    let mut context = Context::new();
    context.register_publisher("server", &publisher).unwrap();
    let mut stack = stack_with(context);

    let parameter = Parameter::variable(Variable::scoped("server", "requests"));
    assert_eq!(parameter.evaluate(&mut stack), Data::Int(0));
    requests.store(5, Ordering::SeqCst);
    // the cached refresh wins; the generator is not re-invoked mid-render
    assert_eq!(parameter.evaluate(&mut stack), Data::Int(0));
}

// =============================================================================
// 2. Locking
// =============================================================================

/// Locking a scope flattens every cell to a cached literal.
#[test]
fn locking_flattens_every_cell() {
    let publisher = ServerInfo {
        requests: Arc::new(AtomicI64::new(3)),
    };
    let mut context = Context::new();
    context.register_publisher("server", &publisher).unwrap();
    context.lock_scope("server").unwrap();

    assert!(context.is_locked("server"));
    for name in context.names_in_scope("server") {
        let cell = context.cell("server", name).unwrap();
        assert!(matches!(cell, DataValue::Literal(_)), "{name} must be literal after lock");
        assert!(cell.cached(), "{name} must be cached after lock");
    }
    assert_eq!(
        context.set_literal("server", "extra", Data::Int(1)).unwrap_err(),
        ContextError::LockedScope("server".to_string())
    );
}

/// Variables over a locked scope resolve to literals at resolve time, so the
/// compiled tree no longer depends on the scope at all.
#[test]
fn locked_scope_inlines_during_resolution() {
    let mut context = Context::new();
    context.set_literal("site", "title", Data::from("Docs")).unwrap();
    context.lock_scope("site").unwrap();
    let mut stack = stack_with(context);

    let parameter = Parameter::variable(Variable::scoped("site", "title"));
    assert!(!parameter.resolved());
    let resolved = parameter.resolve(&mut stack);
    assert!(resolved.is_literal());
    assert_eq!(resolved.data(), Some(&Data::Str("Docs".to_string())));
    assert!(resolved.symbols().is_empty());
}

/// An uncached lazy cell in an unlocked scope does NOT resolve early: the
/// generator must not run before evaluation.
#[test]
fn unlocked_lazy_cell_defers_to_evaluation() {
    let invoked = Arc::new(AtomicI64::new(0));
    let counter = Arc::clone(&invoked);
    let mut generators = AHashMap::new();
    generators.insert(
        "stamp".to_string(),
        DataGenerator::lazy(
            move || Data::Int(counter.fetch_add(1, Ordering::SeqCst)),
            DataType::Int,
            false,
        ),
    );
    let mut context = Context::new();
    context.register_generators("meta", generators).unwrap();
    let mut stack = stack_with(context);

    let parameter = Parameter::variable(Variable::scoped("meta", "stamp"));
    let resolved = parameter.resolve(&mut stack);
    assert!(!resolved.resolved(), "uncached cells stay unresolved");
    assert_eq!(invoked.load(Ordering::SeqCst), 0, "resolution must not invoke generators");

    assert_eq!(resolved.evaluate(&mut stack), Data::Int(0));
    assert_eq!(invoked.load(Ordering::SeqCst), 1);
}

// =============================================================================
// 3. Runtime configuration
// =============================================================================

/// Borrowing the registry for a render seals the runtime; setters fail from
/// then on.
#[test]
fn runtime_seals_on_first_render_borrow() {
    let mut entities = Entities::new();
    entities.register_block("for").unwrap();
    let mut runtime = Runtime::with_entities(Arc::new(entities));
    runtime.set_sigil('@').unwrap();

    let registry = runtime.entities_for_render();
    assert!(registry.is_block("for"));
    assert!(runtime.sealed());
    assert!(runtime.set_sigil('#').is_err());
    assert_eq!(runtime.sigil(), '@');

    // sealing is idempotent and later renders share the same registry
    let again = runtime.entities_for_render();
    assert!(Arc::ptr_eq(&registry, &again));
}
