//! Static error catalog for OData protocol failures

use crate::problem::Problem;
use http::StatusCode;

/// Static error definition from the catalog
#[derive(Debug, Clone, Copy)]
pub struct ErrDef {
    pub status: u16,
    pub title: &'static str,
    pub type_url: &'static str,
}

impl ErrDef {
    /// Convert this definition into a Problem with the given code and detail
    #[inline]
    pub fn as_problem(&self, code: &str, detail: impl Into<String>) -> Problem {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Problem::new(status, self.title, detail.into())
            .with_code(code)
            .with_type(self.type_url)
    }
}

pub const BAD_REQUEST: ErrDef = ErrDef {
    status: 400,
    title: "Bad Request",
    type_url: "https://docs.oasis-open.org/odata/odata/v4.01/errors#bad_request",
};

pub const NOT_FOUND: ErrDef = ErrDef {
    status: 404,
    title: "Not Found",
    type_url: "https://docs.oasis-open.org/odata/odata/v4.01/errors#not_found",
};

pub const NOT_IMPLEMENTED: ErrDef = ErrDef {
    status: 501,
    title: "Not Implemented",
    type_url: "https://docs.oasis-open.org/odata/odata/v4.01/errors#not_implemented",
};

pub const CONFIGURATION: ErrDef = ErrDef {
    status: 500,
    title: "Configuration Error",
    type_url: "https://docs.oasis-open.org/odata/odata/v4.01/errors#configuration",
};

pub const INTERNAL: ErrDef = ErrDef {
    status: 500,
    title: "Internal Server Error",
    type_url: "https://docs.oasis-open.org/odata/odata/v4.01/errors#internal",
};

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;

    #[test]
    fn err_def_to_problem_works() {
        let problem = NOT_FOUND.as_problem("entity_not_found", "Pets(99) does not exist");
        assert_eq!(problem.status, StatusCode::NOT_FOUND);
        assert_eq!(problem.title, "Not Found");
        assert_eq!(problem.detail, "Pets(99) does not exist");
        assert_eq!(problem.code, "entity_not_found");
        assert!(problem.type_url.ends_with("#not_found"));
    }

    #[test]
    fn not_implemented_maps_to_501() {
        let problem = NOT_IMPLEMENTED.as_problem("capability_missing", "link");
        assert_eq!(problem.status, StatusCode::NOT_IMPLEMENTED);
    }
}
