use std::fmt::{self, Display};

use ahash::AHashSet;
use indexmap::IndexMap;

use crate::{
    data::{Data, DataType},
    error::ErrorKind,
    param::Parameter,
    stack::VarStack,
    symbol::Symbol,
    variable::Variable,
};

/// An ordered, optionally labeled sequence of parameters.
///
/// Tuples serve two roles, distinguished by the `collection` flag:
/// - collection literals, which evaluate to an array (label-free) or a
///   dictionary (fully labeled);
/// - argument lists at call sites, which are never evaluated as a unit but
///   are matched against entity signatures.
///
/// Labels map to member indices and preserve declaration order so dictionary
/// literals render in source order.
#[derive(Debug, Clone)]
pub struct Tuple {
    values: Vec<Parameter>,
    labels: IndexMap<String, usize>,
    collection: bool,
    resolved: bool,
    invariant: bool,
    symbols: AHashSet<Variable>,
}

impl Tuple {
    /// Builds a collection-literal tuple from `(label?, member)` pairs.
    ///
    /// Returns `None` when labels repeat or when only some members are
    /// labeled with members before unlabeled ones mixed in a way no literal
    /// form can represent (a literal is either fully labeled or label-free).
    #[must_use]
    pub fn collection(members: Vec<(Option<String>, Parameter)>) -> Option<Self> {
        Self::build(members, true)
    }

    /// Builds an argument-list tuple from `(label?, member)` pairs.
    ///
    /// Argument lists permit a mix of positional and labeled members, but a
    /// labeled member may not be followed by a positional one and labels may
    /// not repeat.
    #[must_use]
    pub fn arguments(members: Vec<(Option<String>, Parameter)>) -> Option<Self> {
        Self::build(members, false)
    }

    fn build(members: Vec<(Option<String>, Parameter)>, collection: bool) -> Option<Self> {
        let mut values = Vec::with_capacity(members.len());
        let mut labels = IndexMap::new();
        for (label, member) in members {
            if let Some(label) = label {
                if labels.insert(label, values.len()).is_some() {
                    return None;
                }
            } else if !labels.is_empty() {
                // positional member after a labeled one
                return None;
            }
            values.push(member);
        }
        if collection && !labels.is_empty() && labels.len() != values.len() {
            return None;
        }
        let mut tuple = Self {
            values,
            labels,
            collection,
            resolved: false,
            invariant: false,
            symbols: AHashSet::new(),
        };
        tuple.rematerialize();
        Some(tuple)
    }

    /// Rebuilds the cached facets from the current members.
    fn rematerialize(&mut self) {
        self.resolved = self.values.iter().all(Parameter::resolved);
        self.invariant = self.values.iter().all(Parameter::invariant);
        self.symbols = self
            .values
            .iter()
            .flat_map(Parameter::symbols)
            .collect();
    }

    #[must_use]
    pub fn values(&self) -> &[Parameter] {
        &self.values
    }

    /// Consumes the tuple, returning its members in order.
    #[must_use]
    pub fn into_values(self) -> Vec<Parameter> {
        self.values
    }

    #[must_use]
    pub fn labels(&self) -> &IndexMap<String, usize> {
        &self.labels
    }

    /// The label attached to the member at `index`, if any.
    #[must_use]
    pub fn label_for(&self, index: usize) -> Option<&str> {
        self.labels
            .iter()
            .find(|(_, i)| **i == index)
            .map(|(label, _)| label.as_str())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn is_collection_literal(&self) -> bool {
        self.collection
    }

    /// A fully labeled collection tuple represents a dictionary literal.
    #[must_use]
    pub fn is_dictionary(&self) -> bool {
        self.collection && !self.values.is_empty() && self.labels.len() == self.values.len()
    }

    /// Whether the tuple can be evaluated as a unit: it is a collection
    /// literal and every member can produce a value.
    #[must_use]
    pub fn is_evaluable(&self) -> bool {
        self.collection && self.values.iter().all(Parameter::is_valued)
    }

    /// The unified member type when every member has the same provable type.
    #[must_use]
    pub fn base_type(&self) -> Option<DataType> {
        let mut members = self.values.iter();
        let first = members.next()?.base_type()?;
        members
            .all(|member| member.base_type() == Some(first))
            .then_some(first)
    }
}

impl Symbol for Tuple {
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
        self.values = self.values.into_iter().map(|member| member.resolve(stack)).collect();
        self.rematerialize();
        self
    }

    fn evaluate(&self, stack: &mut VarStack) -> Data {
        if !self.is_evaluable() {
            return Data::error(ErrorKind::Internal, "attempted to evaluate a non-evaluable tuple");
        }
        let throws = stack.missing_variable_throws();
        if self.is_dictionary() {
            let mut dictionary = IndexMap::with_capacity(self.values.len());
            for (label, index) in &self.labels {
                let value = self.values[*index].evaluate(stack);
                if value.errored() {
                    if throws {
                        return value;
                    }
                    dictionary.insert(label.clone(), Data::TrueNil);
                } else {
                    dictionary.insert(label.clone(), value);
                }
            }
            return Data::Dictionary(dictionary);
        }
        let mut array = Vec::with_capacity(self.values.len());
        for member in &self.values {
            let value = member.evaluate(stack);
            if value.errored() {
                if throws {
                    return value;
                }
                array.push(Data::TrueNil);
            } else {
                array.push(value);
            }
        }
        Data::Array(array)
    }
}

impl PartialEq for Tuple {
    fn eq(&self, other: &Self) -> bool {
        self.collection == other.collection && self.labels == other.labels && self.values == other.values
    }
}

impl Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, member) in self.values.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            if let Some(label) = self.label_for(i) {
                write!(f, "{label}: ")?;
            }
            write!(f, "{member}")?;
        }
        f.write_str(")")
    }
}
