//! Core stage trait and outcome type.
//!
//! This module defines the [`Stage`] trait that every pipeline stage
//! implements. A stage inspects the buffered request, may enrich the
//! [`GatewayContext`], and returns a [`StageOutcome`].
//!
//! # Design
//!
//! Stages do not call each other. The pipeline drives them in a fixed order
//! and stops at the first outcome that is not [`StageOutcome::Continue`].
//! Refusals are ordinary return values rather than errors unwinding through
//! the stack.
//!
//! # Example
//!
//! ```
//! use citadel_middleware::{BoxFuture, BufferedRequest, GatewayContext, Stage, StageOutcome};
//!
//! struct DenyDeletes;
//!
//! impl Stage for DenyDeletes {
//!     fn name(&self) -> &'static str {
//!         "deny_deletes"
//!     }
//!
//!     fn check<'a>(
//!         &'a self,
//!         _ctx: &'a mut GatewayContext,
//!         request: &'a BufferedRequest,
//!     ) -> BoxFuture<'a, StageOutcome> {
//!         Box::pin(async move {
//!             if request.method() == http::Method::DELETE {
//!                 StageOutcome::Reject(citadel_middleware::Rejection::unauthorized("no deletes"))
//!             } else {
//!                 StageOutcome::Continue
//!             }
//!         })
//!     }
//! }
//! ```

use std::future::Future;
use std::pin::Pin;

use crate::context::GatewayContext;
use crate::error::Rejection;
use crate::types::{BufferedRequest, Response};

/// A boxed future, used so stages can be stored as trait objects.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Result of running a single stage.
#[derive(Debug)]
pub enum StageOutcome {
    /// Proceed to the next stage.
    Continue,
    /// Stop and answer with an error envelope.
    Reject(Rejection),
    /// Stop and answer with a response produced by the stage itself.
    Respond(Response),
}

impl StageOutcome {
    /// Returns true if the pipeline should proceed.
    pub fn is_continue(&self) -> bool {
        matches!(self, Self::Continue)
    }

    /// Returns the rejection, if this outcome is one.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            Self::Reject(rejection) => Some(rejection),
            _ => None,
        }
    }
}

impl From<Result<(), Rejection>> for StageOutcome {
    fn from(result: Result<(), Rejection>) -> Self {
        match result {
            Ok(()) => Self::Continue,
            Err(rejection) => Self::Reject(rejection),
        }
    }
}

/// A single step of the request pipeline.
///
/// # Invariants
///
/// - A stage MUST NOT consume or alter the request body
/// - A stage SHOULD only touch the context fields it owns
pub trait Stage: Send + Sync + 'static {
    /// Returns the unique name of this stage.
    ///
    /// This name is used for logging and debugging.
    fn name(&self) -> &'static str;

    /// Inspect the request and decide whether it may proceed.
    fn check<'a>(
        &'a self,
        ctx: &'a mut GatewayContext,
        request: &'a BufferedRequest,
    ) -> BoxFuture<'a, StageOutcome>;
}
