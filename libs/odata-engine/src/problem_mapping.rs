//! Mapping from engine errors to Problem (pure data)
//!
//! The baseline conversion carries no request context; `error_to_problem`
//! adds the request path and a trace id before the problem leaves the
//! service boundary.

use odata_errors::{Problem, catalog};

use crate::error::Error;

impl From<Error> for Problem {
    fn from(err: Error) -> Self {
        let code = err.code();
        match err {
            Error::BadRequest {
                message, offset, ..
            } => {
                let problem = catalog::BAD_REQUEST.as_problem(code, message);
                match offset {
                    Some(offset) => problem.with_offset(offset),
                    None => problem,
                }
            }
            Error::NotFound { message, .. } => catalog::NOT_FOUND.as_problem(code, message),
            Error::NotImplemented(capability) => catalog::NOT_IMPLEMENTED.as_problem(
                code,
                format!("this entity set does not support {capability}"),
            ),
            Error::Configuration { message, .. } => {
                catalog::CONFIGURATION.as_problem(code, message)
            }
            // Storage details stay in the logs.
            Error::Driver(_) => catalog::INTERNAL.as_problem(
                code,
                "an internal error occurred while processing the request",
            ),
        }
    }
}

/// Extract trace ID from current tracing span
#[inline]
fn current_trace_id() -> Option<String> {
    tracing::Span::current()
        .id()
        .map(|id| id.into_u64().to_string())
}

/// Returns a fully contextualized Problem for an engine error.
///
/// `instance` is the request path; the trace id falls back to the current
/// span when none is given.
#[must_use]
pub fn error_to_problem(err: &Error, instance: &str, trace_id: Option<String>) -> Problem {
    match err {
        Error::Driver(msg) => {
            tracing::error!(error = %msg, instance, "storage failure while serving request");
        }
        Error::Configuration { code, message } => {
            tracing::error!(code, error = %message, instance, "model configuration error");
        }
        _ => {
            tracing::debug!(code = err.code(), error = %err, instance, "request rejected");
        }
    }

    let problem: Problem = err.clone().into();
    odata_errors::finalize(problem, instance, trace_id.or_else(current_trace_id))
}
