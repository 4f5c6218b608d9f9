use smallvec::SmallVec;

use crate::{
    context::UnsafeObjects,
    data::{Data, DataType},
    param::Parameter,
    tuple::Tuple,
};

/// One slot of an entity's static call signature.
///
/// A slot accepts a small ordered set of stored types, may carry a label for
/// keyword-style call sites, may be optional, and may supply a default that
/// shape-matching substitutes for an absent argument.
#[derive(Debug, Clone)]
pub struct CallParameter {
    label: Option<String>,
    types: SmallVec<[DataType; 2]>,
    optional: bool,
    default: Option<Data>,
}

impl CallParameter {
    /// A required positional slot.
    #[must_use]
    pub fn new(types: &[DataType]) -> Self {
        Self {
            label: None,
            types: SmallVec::from_slice(types),
            optional: false,
            default: None,
        }
    }

    /// A labeled slot, addressable by keyword at the call site.
    #[must_use]
    pub fn labeled(label: &str, types: &[DataType]) -> Self {
        Self {
            label: Some(label.to_string()),
            types: SmallVec::from_slice(types),
            optional: false,
            default: None,
        }
    }

    /// Marks the slot optional: an absent or void argument is accepted.
    #[must_use]
    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    /// Supplies a default substituted when the argument is absent.
    #[must_use]
    pub fn with_default(mut self, default: impl Into<Data>) -> Self {
        self.default = Some(default.into());
        self
    }

    #[must_use]
    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    #[must_use]
    pub fn types(&self) -> &[DataType] {
        &self.types
    }

    #[must_use]
    pub fn is_optional(&self) -> bool {
        self.optional
    }

    #[must_use]
    pub fn default(&self) -> Option<&Data> {
        self.default.as_ref()
    }

    /// Whether a value of the given stored type is acceptable, allowing the
    /// single Int -> Double widening.
    #[must_use]
    pub fn matches_type(&self, stored: DataType) -> bool {
        self.types.contains(&stored) || (stored == DataType::Int && self.types.contains(&DataType::Double))
    }
}

/// Matches an argument tuple against a signature's static shape.
///
/// Positional members fill slots in order; labeled members address the slot
/// carrying that label. Unfilled slots take their default, or void when
/// optional. Members with a provable type that the slot rejects fail the
/// match, as do surplus or duplicate arguments. On success the returned
/// tuple is fully positional: one member per signature slot.
pub(crate) fn bind_shape(signature: &[CallParameter], args: Option<&Tuple>) -> Option<Tuple> {
    let empty;
    let args = match args {
        Some(tuple) => tuple,
        None => {
            empty = Tuple::arguments(Vec::new()).expect("empty argument tuple is well-formed");
            &empty
        }
    };
    if args.len() > signature.len() {
        return None;
    }
    let mut slots: Vec<Option<Parameter>> = vec![None; signature.len()];
    for (index, member) in args.values().iter().enumerate() {
        let slot = match args.label_for(index) {
            Some(label) => signature.iter().position(|param| param.label() == Some(label))?,
            None => index,
        };
        if slots[slot].is_some() {
            return None;
        }
        slots[slot] = Some(member.clone());
    }
    let mut normalized = Vec::with_capacity(signature.len());
    for (param, slot) in signature.iter().zip(slots) {
        let member = match slot {
            Some(member) => {
                if let Some(base) = member.base_type() {
                    if base != DataType::Void && !param.matches_type(base) {
                        return None;
                    }
                }
                member
            }
            None => match param.default() {
                Some(default) => Parameter::value(default.clone()),
                None if param.is_optional() => Parameter::value(Data::TrueNil),
                None => return None,
            },
        };
        normalized.push((None, member));
    }
    Tuple::arguments(normalized)
}

/// The invocation record handed to an entity: type-checked positional values
/// plus, for unsafe entities, a snapshot of the context's host objects.
#[derive(Default)]
pub struct CallValues {
    values: Vec<Data>,
    unsafe_objects: Option<UnsafeObjects>,
}

impl CallValues {
    /// Type-checks evaluated arguments against one signature.
    ///
    /// Values are widened Int -> Double where the slot requires it; void is
    /// accepted only for optional slots. Returns `None` on any mismatch.
    #[must_use]
    pub fn try_bind(signature: &[CallParameter], values: Vec<Data>) -> Option<Self> {
        if values.len() != signature.len() {
            return None;
        }
        let mut bound = Vec::with_capacity(values.len());
        for (param, value) in signature.iter().zip(values) {
            if value.is_nil() {
                if !param.is_optional() {
                    return None;
                }
                bound.push(value);
            } else if param.matches_type(value.stored_type()) {
                let target = if param.types().contains(&value.stored_type()) {
                    value.stored_type()
                } else {
                    DataType::Double
                };
                bound.push(value.coerce(target));
            } else {
                return None;
            }
        }
        Some(Self {
            values: bound,
            unsafe_objects: None,
        })
    }

    pub(crate) fn with_unsafe_objects(mut self, objects: UnsafeObjects) -> Self {
        self.unsafe_objects = Some(objects);
        self
    }

    /// The value at a position; void when out of range.
    #[must_use]
    pub fn get(&self, index: usize) -> Data {
        self.values.get(index).cloned().unwrap_or(Data::TrueNil)
    }

    #[must_use]
    pub fn values(&self) -> &[Data] {
        &self.values
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The unsafe host-object snapshot; populated only for entities that
    /// declare unsafe access, and only when the context registered objects
    /// with the `UNSAFE` mode.
    #[must_use]
    pub fn unsafe_objects(&self) -> Option<&UnsafeObjects> {
        self.unsafe_objects.as_ref()
    }
}
