use std::sync::Arc;

use ahash::AHashMap;

use crate::{
    context::{Context, DataValue, UnsafeObjects, DEFAULT_SCOPE},
    data::Data,
    entities::Entities,
    error::{ErrorKind, RenderError},
    variable::{Segment, Variable},
};

/// One block-body scope on the lookup stack.
#[derive(Default)]
struct Frame {
    /// The current iteration target, when a loop body is executing.
    self_value: Option<Data>,
    /// Block definitions visible to `define(name)` references.
    defines: AHashMap<String, DataValue>,
    /// Block-local bindings, shadowing the context's default scope.
    locals: AHashMap<String, Data>,
}

/// The lookup surface passed through resolution and evaluation.
///
/// A `VarStack` owns the render's [`Context`], borrows the sealed entity
/// registry for the duration of the render, and maintains the stack of block
/// frames the renderer pushes around block bodies. It carries the context's
/// policy record; the evaluator consults [`missing_variable_throws`] to
/// decide whether errored lookups propagate or decay to nil.
///
/// [`missing_variable_throws`]: VarStack::missing_variable_throws
pub struct VarStack {
    context: Context,
    entities: Arc<Entities>,
    frames: Vec<Frame>,
}

impl VarStack {
    /// Builds the stack for one render, with a single base frame.
    #[must_use]
    pub fn new(context: Context, entities: Arc<Entities>) -> Self {
        Self {
            context,
            entities,
            frames: vec![Frame::default()],
        }
    }

    #[must_use]
    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut Context {
        &mut self.context
    }

    pub(crate) fn entities(&self) -> Arc<Entities> {
        Arc::clone(&self.entities)
    }

    #[must_use]
    pub fn missing_variable_throws(&self) -> bool {
        self.context.missing_variable_throws()
    }

    /// Opens a new block frame. The renderer pairs this with [`pop_frame`]
    /// around every block body.
    ///
    /// [`pop_frame`]: VarStack::pop_frame
    pub fn push_frame(&mut self) {
        self.frames.push(Frame::default());
    }

    /// Closes the innermost block frame. The base frame is never popped.
    pub fn pop_frame(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    /// Sets the current iteration target for the innermost frame.
    pub fn set_self(&mut self, data: Data) {
        self.innermost().self_value = Some(data);
    }

    /// Binds a block definition in the innermost frame.
    pub fn set_define(&mut self, name: &str, value: DataValue) {
        self.innermost().defines.insert(name.to_string(), value);
    }

    /// Binds a block-local value in the innermost frame.
    pub fn bind(&mut self, name: &str, data: Data) {
        self.innermost().locals.insert(name.to_string(), data);
    }

    fn innermost(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("stack always holds a base frame")
    }

    /// Full lookup: reserved forms, then frames innermost-first, then the
    /// explicit or default context scope, then path descent. Variable cells
    /// are refreshed as needed. Misses yield missing-variable errored data.
    pub fn match_var(&mut self, variable: &Variable) -> Data {
        let base = if variable.is_self() {
            match self.frames.iter().rev().find_map(|frame| frame.self_value.clone()) {
                Some(data) => data,
                None => return missing(variable, "no current iteration target"),
            }
        } else if variable.is_define() {
            match self
                .frames
                .iter_mut()
                .rev()
                .find_map(|frame| frame.defines.get_mut(variable.ident()))
            {
                Some(cell) => match cell.peek() {
                    Some(data) => data,
                    None => cell.refresh(),
                },
                None => return missing(variable, "definition is not bound"),
            }
        } else if let Some(scope) = variable.scope() {
            let fetched = if variable.ident().is_empty() {
                self.context.fetch_scope(scope)
            } else {
                self.context.fetch(scope, variable.ident())
            };
            match fetched {
                Some(data) => data,
                None => return missing(variable, "not registered in scope"),
            }
        } else {
            let local = self
                .frames
                .iter()
                .rev()
                .find_map(|frame| frame.locals.get(variable.ident()).cloned());
            match local.or_else(|| self.context.fetch(DEFAULT_SCOPE, variable.ident())) {
                Some(data) => data,
                None => return missing(variable, "not bound"),
            }
        };
        descend(base, variable)
    }

    /// Resolution-time lookup: reads only literal cells, memoized variable
    /// cells, frame locals, and bound defines. Never invokes a generator, so
    /// an uncached cell reports as missing and the variable stays unresolved.
    pub(crate) fn peek(&self, variable: &Variable) -> Data {
        let base = if variable.is_self() {
            match self.frames.iter().rev().find_map(|frame| frame.self_value.clone()) {
                Some(data) => data,
                None => return missing(variable, "no current iteration target"),
            }
        } else if variable.is_define() {
            let cell = self
                .frames
                .iter()
                .rev()
                .find_map(|frame| frame.defines.get(variable.ident()));
            match cell.and_then(DataValue::peek) {
                Some(data) => data,
                None => return missing(variable, "definition is not bound"),
            }
        } else if let Some(scope) = variable.scope() {
            if variable.ident().is_empty() {
                // materializing a whole scope may invoke generators; defer
                return missing(variable, "scope reference defers to evaluation");
            }
            match self.context.peek(scope, variable.ident()) {
                Some(data) => data,
                None => return missing(variable, "not cached in scope"),
            }
        } else {
            let local = self
                .frames
                .iter()
                .rev()
                .find_map(|frame| frame.locals.get(variable.ident()).cloned());
            match local.or_else(|| self.context.peek(DEFAULT_SCOPE, variable.ident())) {
                Some(data) => data,
                None => return missing(variable, "not bound"),
            }
        };
        descend(base, variable)
    }

    /// Write-back for mutating methods. Targets the frame or cell that binds
    /// the variable's base identifier; path segments rewrite the collection
    /// in place. Locked scopes reject updates.
    pub fn update(&mut self, variable: &Variable, data: Data) -> Result<(), Box<RenderError>> {
        if variable.is_self() {
            let frame = self
                .frames
                .iter_mut()
                .rev()
                .find(|frame| frame.self_value.is_some())
                .ok_or_else(|| update_error(variable, "no current iteration target"))?;
            let target = frame.self_value.as_mut().expect("frame filtered on self presence");
            return write_path(target, variable, data);
        }
        if variable.is_define() {
            let name = variable.ident().to_string();
            if let Some(frame) = self
                .frames
                .iter_mut()
                .rev()
                .find(|frame| frame.defines.contains_key(&name))
            {
                frame.defines.insert(name, DataValue::Literal(data));
            } else {
                self.innermost().defines.insert(name, DataValue::Literal(data));
            }
            return Ok(());
        }
        if let Some(scope) = variable.scope() {
            let scope = scope.to_string();
            return self.update_in_context(&scope, variable, data);
        }
        let name = variable.ident().to_string();
        if let Some(frame) = self
            .frames
            .iter_mut()
            .rev()
            .find(|frame| frame.locals.contains_key(&name))
        {
            let target = frame.locals.get_mut(&name).expect("frame filtered on key presence");
            return write_path(target, variable, data);
        }
        if self.context.has_cell(DEFAULT_SCOPE, &name) {
            return self.update_in_context(DEFAULT_SCOPE, variable, data);
        }
        if variable.path().is_empty() {
            self.innermost().locals.insert(name, data);
            return Ok(());
        }
        Err(update_error(variable, "not bound"))
    }

    fn update_in_context(&mut self, scope: &str, variable: &Variable, data: Data) -> Result<(), Box<RenderError>> {
        if self.context.is_locked(scope) {
            return Err(Box::new(RenderError::new(
                ErrorKind::Internal,
                format!("scope '{scope}' is locked and cannot be updated"),
            )));
        }
        let stored = if variable.path().is_empty() {
            data
        } else {
            let mut current = self
                .context
                .fetch(scope, variable.ident())
                .ok_or_else(|| update_error(variable, "not registered in scope"))?;
            write_path(&mut current, variable, data)?;
            current
        };
        self.context
            .write(scope, variable.ident(), stored)
            .map_err(|err| Box::new(RenderError::new(ErrorKind::Internal, err.to_string())))
    }

    /// A snapshot of the context's unsafe host objects, for injection into
    /// unsafe entities. Cloning the map clones handles, not host state.
    pub(crate) fn unsafe_objects_snapshot(&self) -> UnsafeObjects {
        self.context.unsafe_objects().clone()
    }
}

fn missing(variable: &Variable, detail: &str) -> Data {
    Data::Error(Box::new(RenderError::new(
        ErrorKind::MissingVariable,
        format!("variable '{variable}' not found: {detail}"),
    )))
}

fn update_error(variable: &Variable, detail: &str) -> Box<RenderError> {
    Box::new(RenderError::new(
        ErrorKind::MissingVariable,
        format!("cannot update '{variable}': {detail}"),
    ))
}

/// Walks member/index segments down a value. Misses become missing-variable
/// errors so the caller's soft-error policy applies.
fn descend(base: Data, variable: &Variable) -> Data {
    let mut current = base;
    for segment in variable.path() {
        if current.is_lazy() {
            current = current.evaluate();
        }
        current = match (segment, current) {
            (Segment::Member(name), Data::Dictionary(values)) => match values.get(name) {
                Some(value) => value.clone(),
                None => return missing(variable, &format!("no member '{name}'")),
            },
            (Segment::Index(index), Data::Array(values)) => match values.get(*index) {
                Some(value) => value.clone(),
                None => return missing(variable, &format!("index {index} out of range")),
            },
            (Segment::Member(name), other) => {
                return missing(variable, &format!("{} has no member '{name}'", other.short()));
            }
            (Segment::Index(index), other) => {
                return missing(variable, &format!("{} cannot be indexed by {index}", other.short()));
            }
        };
    }
    current
}

/// Rewrites the value at the variable's path inside `target`, creating
/// nothing: every intermediate collection must already exist.
fn write_path(target: &mut Data, variable: &Variable, data: Data) -> Result<(), Box<RenderError>> {
    let mut current = target;
    for segment in variable.path() {
        current = match (segment, current) {
            (Segment::Member(name), Data::Dictionary(values)) => values
                .get_mut(name)
                .ok_or_else(|| update_error(variable, &format!("no member '{name}'")))?,
            (Segment::Index(index), Data::Array(values)) => values
                .get_mut(*index)
                .ok_or_else(|| update_error(variable, &format!("index {index} out of range")))?,
            _ => return Err(update_error(variable, "path does not traverse a collection")),
        };
    }
    *current = data;
    Ok(())
}
