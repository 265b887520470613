//! Runtime error taxonomy.
//!
//! Registration-time failures (`SetupError`, `RegisterError`) and
//! programmer errors (`ContextMissingError`) are surfaced loudly; handler
//! failures travel as [`HandlerError`] through the error-handler table and
//! end their life as HTTP responses.

use crate::response::ResponseLike;
use ahash::AHashMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// A framework accessor was used outside of an active context.
///
/// This is a programmer error and is never silently defaulted: a handler
/// running outside a request should fail loudly, not misbehave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ContextMissingError {
    #[error("working outside of an application context")]
    App,
    #[error("working outside of a request context")]
    Request,
}

/// A setup method was called after the setup phase ended.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("`{0}` was called after the first request was dispatched; register everything during application setup")]
pub struct SetupError(pub &'static str);

/// Failures while registering a rule or handler on the application.
#[derive(Debug, Error)]
pub enum RegisterError {
    #[error(transparent)]
    Setup(#[from] SetupError),
    #[error(transparent)]
    Map(#[from] trellis_core::MapError),
    #[error("endpoint `{0}` is already bound to a different handler")]
    EndpointTaken(String),
}

impl From<trellis_core::RuleError> for RegisterError {
    fn from(err: trellis_core::RuleError) -> Self {
        RegisterError::Map(err.into())
    }
}

/// An error raised by user handler code (or by response coercion).
///
/// Carries an optional HTTP status code and the underlying cause. The
/// dispatcher routes it through the error-handler table; whatever is left
/// unmatched becomes a generic server-error response.
#[derive(Debug)]
pub struct HandlerError {
    code: Option<u16>,
    cause: anyhow::Error,
}

impl HandlerError {
    pub fn new(cause: impl Into<anyhow::Error>) -> Self {
        HandlerError {
            code: None,
            cause: cause.into(),
        }
    }

    pub fn msg(message: impl fmt::Display + fmt::Debug + Send + Sync + 'static) -> Self {
        HandlerError {
            code: None,
            cause: anyhow::Error::msg(message),
        }
    }

    pub fn with_code(code: u16, cause: impl Into<anyhow::Error>) -> Self {
        HandlerError {
            code: Some(code),
            cause: cause.into(),
        }
    }

    pub fn code(&self) -> Option<u16> {
        self.code
    }

    pub fn cause(&self) -> &anyhow::Error {
        &self.cause
    }

    /// Downcast the underlying cause to a concrete error type.
    pub fn downcast_ref<E>(&self) -> Option<&E>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.cause.downcast_ref::<E>()
    }
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.cause.fmt(f)
    }
}

impl std::error::Error for HandlerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.cause.as_ref())
    }
}

impl From<anyhow::Error> for HandlerError {
    fn from(cause: anyhow::Error) -> Self {
        HandlerError::new(cause)
    }
}

/// Hook invoked for a matching error; may produce a replacement response or
/// give up and fall through to the generic handler.
pub type ErrorHook = Arc<dyn Fn(&HandlerError) -> Result<ResponseLike, HandlerError> + Send + Sync>;

/// Error-handler table: concrete error types first (in registration order),
/// then status codes, then the dispatcher's generic fallback.
#[derive(Default)]
pub(crate) struct ErrorRegistry {
    typed: Vec<(Box<dyn Fn(&HandlerError) -> bool + Send + Sync>, ErrorHook)>,
    by_code: AHashMap<u16, ErrorHook>,
}

impl ErrorRegistry {
    pub(crate) fn register_type<E>(&mut self, hook: ErrorHook)
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
    {
        self.typed.push((
            Box::new(|err: &HandlerError| err.downcast_ref::<E>().is_some()),
            hook,
        ));
    }

    pub(crate) fn register_code(&mut self, code: u16, hook: ErrorHook) {
        self.by_code.insert(code, hook);
    }

    pub(crate) fn find_typed(&self, err: &HandlerError) -> Option<ErrorHook> {
        self.typed
            .iter()
            .find(|(matches, _)| matches(err))
            .map(|(_, hook)| hook.clone())
    }

    pub(crate) fn find_code(&self, code: u16) -> Option<ErrorHook> {
        self.by_code.get(&code).cloned()
    }
}

/// Failures of the [`url_for`](crate::url_for) convenience accessor.
#[derive(Debug, Error)]
pub enum UrlForError {
    #[error(transparent)]
    Context(#[from] ContextMissingError),
    #[error(transparent)]
    Build(#[from] trellis_core::BuildError),
}
