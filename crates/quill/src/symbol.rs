use ahash::AHashSet;

use crate::{data::Data, stack::VarStack, variable::Variable};

/// The uniform contract every AST node implements.
///
/// Reduction is two-phase. `resolve` is the structural phase: it binds
/// overloads, inlines stack values that are already available, and folds
/// subtrees that are provably constant, always returning a node of the same
/// kind that is no weaker than its input. `evaluate` is the terminal phase:
/// it reduces the node to a concrete [`Data`], embedding failures as errored
/// values rather than unwinding.
///
/// The three observable facets drive scheduling: a renderer only evaluates a
/// node once every variable in `symbols` is bound, and a resolver may fold
/// any node that is both `resolved` and `invariant` ahead of time.
pub trait Symbol: Sized {
    /// Whether the node is structurally complete: all overloads bound, all
    /// subtrees resolved.
    fn resolved(&self) -> bool;

    /// Whether evaluation is independent of external time or state, so that
    /// repeated evaluation yields equal data.
    fn invariant(&self) -> bool;

    /// The set of variable keys that must be bound before full evaluation.
    fn symbols(&self) -> AHashSet<Variable>;

    /// Structural reduction against the stack. Returns a same-kind node,
    /// possibly folded toward a value; never loses information.
    #[must_use]
    fn resolve(self, stack: &mut VarStack) -> Self;

    /// Terminal reduction to a concrete value. Failures are embedded as
    /// errored data, subject to the stack's soft-error policy.
    fn evaluate(&self, stack: &mut VarStack) -> Data;
}
