//! Error payload types for the OData engine
//!
//! Pure data types, no dependency on an HTTP framework:
//! - RFC 9457 Problem Details (`Problem`)
//! - OData v4 JSON error body (`ODataErrorBody`)
//! - Static error catalog entries (`ErrDef`)
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod catalog;
pub mod problem;

pub use catalog::ErrDef;
pub use problem::{APPLICATION_PROBLEM_JSON, ODataErrorBody, ODataErrorDetail, Problem};

/// Attach the request path and an optional trace id to a problem.
#[must_use]
pub fn finalize(mut p: Problem, instance: &str, trace_id: Option<String>) -> Problem {
    p = p.with_instance(instance);
    if let Some(tid) = trace_id {
        p = p.with_trace_id(tid);
    }
    p
}
