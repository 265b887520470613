use thiserror::Error;

/// Rejections raised while compiling a rule pattern.
///
/// These are fatal at registration time: a malformed pattern is a bug in the
/// application, not a condition to recover from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    #[error("rule pattern must start with `/`: `{0}`")]
    MissingLeadingSlash(String),
    #[error("unbalanced variable delimiters in `{0}`")]
    UnbalancedDelimiters(String),
    #[error("empty variable name in `{0}`")]
    EmptyVariable(String),
    #[error("empty path segment in `{0}`")]
    EmptySegment(String),
    #[error("duplicate variable `{name}` in `{pattern}`")]
    DuplicateVariable { pattern: String, name: String },
    #[error("unknown converter `{name}` in `{pattern}`")]
    UnknownConverter { pattern: String, name: String },
    #[error("invalid arguments `{args}` for converter `{name}` in `{pattern}`")]
    BadConverterArguments {
        pattern: String,
        name: String,
        args: String,
    },
    #[error("at most one `path` converter is allowed per rule: `{0}`")]
    MultiplePathConverters(String),
}

/// Errors raised while registering rules into a [`RuleMap`](crate::RuleMap).
#[derive(Debug, Error)]
pub enum MapError {
    #[error(transparent)]
    Validation(#[from] RuleError),
    /// An identical (pattern, method-set, host, subdomain) tuple is already
    /// registered, so matching could never be deterministic between the two.
    #[error("rule `{pattern}` is already registered for the same methods and host")]
    Conflict { pattern: String },
}

/// Errors raised during URL reversal (`build`).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
    #[error("no rule registered for endpoint `{0}`")]
    UnknownEndpoint(String),
    #[error("missing parameter `{parameter}` for endpoint `{endpoint}`")]
    MissingParameter { endpoint: String, parameter: String },
    #[error(
        "value `{value}` for parameter `{parameter}` does not satisfy the converter \
         of endpoint `{endpoint}`"
    )]
    InvalidParameter {
        endpoint: String,
        parameter: String,
        value: String,
    },
    #[error("no rule for endpoint `{endpoint}` accepts method {method}")]
    MethodMismatch { endpoint: String, method: String },
    #[error("could not encode extra parameters as a query string: {0}")]
    QueryEncoding(String),
}
