#![doc = include_str!("../../../README.md")]
#![expect(clippy::float_cmp, reason = "data equality requires exact float comparison")]

mod ast;
mod cache;
mod call;
mod config;
mod context;
mod data;
mod entities;
mod error;
mod expression;
mod param;
mod stack;
mod symbol;
mod token;
mod tuple;
mod variable;

pub use crate::{
    ast::{Ast, AstInfo, AstKey, Statement, Touch},
    cache::{AsyncCache, Cache, CacheError, TOUCH_DRAIN_THRESHOLD},
    call::{CallParameter, CallValues},
    config::{ConfigError, Runtime},
    context::{
        Context, ContextError, ContextPublisher, DataGenerator, DataValue, ObjectMode, UnsafeObjects, DEFAULT_SCOPE,
    },
    data::{Data, DataType, LazyData},
    entities::{Entities, EntityKind, RegistryError, TemplateFunction, TemplateMethod},
    error::{ErrorKind, RenderError},
    expression::{ExprForm, Expression},
    param::{Callee, Container, FunctionCall, MethodSlot, Parameter},
    stack::VarStack,
    symbol::Symbol,
    token::{Keyword, Operator, SourceLocation},
    tuple::Tuple,
    variable::{Segment, Variable},
};
