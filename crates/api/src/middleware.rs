//! Middleware chain
//!
//! An ordered list of interceptors runs around every CRUD operation,
//! before the store is touched. A middleware may mutate the context,
//! short-circuit by setting `ctx.result` without calling `next`, or call
//! `next` and post-process afterwards. Errors propagate as the
//! operation's failure.
//!
//! The optional schema-validator hook is expressed as a middleware
//! ([`ValidatorHook`]) that inspects write payloads and rejects with
//! `Error::ValidatorRejection`.

use crate::options::OpOptions;
use bri_core::{Error, Result};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Which CRUD operation is passing through the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Document creation
    Add,
    /// Singular read
    Get,
    /// Group read
    GetAll,
    /// Wholesale replacement
    Set,
    /// Soft-delete
    Del,
    /// Change-journal flush
    Save,
}

impl Operation {
    /// Whether this operation writes document data worth validating.
    pub fn is_write(&self) -> bool {
        matches!(self, Operation::Add | Operation::Set | Operation::Save)
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Operation::Add => "add",
            Operation::Get => "get",
            Operation::GetAll => "getAll",
            Operation::Set => "set",
            Operation::Del => "del",
            Operation::Save => "save",
        };
        write!(f, "{name}")
    }
}

/// Context passed through the chain.
pub struct OpContext {
    /// The operation kind
    pub operation: Operation,
    /// Lowercase collection type
    pub type_name: String,
    /// Operation payload: document data for writes, the selector's JSON
    /// shape (or `Null`) for reads and deletes
    pub args: Value,
    /// Operation options; middleware may adjust them
    pub opts: OpOptions,
    /// Operation result. Setting this before calling `next` short-circuits
    /// the rest of the chain and the store access.
    pub result: Option<Value>,
}

/// The continuation handed to each middleware.
pub type Next<'a> = &'a mut dyn FnMut(&mut OpContext) -> Result<()>;

/// An interceptor around CRUD operations.
pub trait Middleware: Send + Sync {
    /// Handle the operation. Call `next(ctx)` to continue the chain.
    fn handle(&self, ctx: &mut OpContext, next: Next<'_>) -> Result<()>;
}

/// Run the chain, then the terminal store operation.
pub(crate) fn run_chain(
    middlewares: &[Arc<dyn Middleware>],
    ctx: &mut OpContext,
    terminal: &mut dyn FnMut(&mut OpContext) -> Result<()>,
) -> Result<()> {
    match middlewares.split_first() {
        Some((head, tail)) => {
            let mut next = |ctx: &mut OpContext| run_chain(tail, ctx, &mut *terminal);
            head.handle(ctx, &mut next)
        }
        None => {
            if ctx.result.is_some() {
                // A middleware already produced the result
                Ok(())
            } else {
                terminal(ctx)
            }
        }
    }
}

/// Middleware adapter for an external schema validator.
///
/// The validator sees `(type, data)` for every write operation and
/// returns an error string to reject, `None` to accept.
pub struct ValidatorHook<F> {
    validate: F,
}

impl<F> ValidatorHook<F>
where
    F: Fn(&str, &Value) -> Option<String> + Send + Sync,
{
    /// Wrap a validator function.
    pub fn new(validate: F) -> Self {
        ValidatorHook { validate }
    }
}

impl<F> Middleware for ValidatorHook<F>
where
    F: Fn(&str, &Value) -> Option<String> + Send + Sync,
{
    fn handle(&self, ctx: &mut OpContext, next: Next<'_>) -> Result<()> {
        if ctx.operation.is_write() {
            if let Some(message) = (self.validate)(&ctx.type_name, &ctx.args) {
                return Err(Error::ValidatorRejection { message });
            }
        }
        next(ctx)
    }
}
