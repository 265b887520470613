//! # trellis-runtime
//!
//! The application runtime: the [`App`] object and its registration API,
//! per-execution-unit context stacks with ambient `current_app` /
//! `with_request` accessors, and the dispatcher that turns a parsed
//! request into a finished response.
//!
//! Context stacks live in thread-local storage — one logical stack per
//! execution unit, never shared, never locked. The transport adapter in
//! `trellis-http` gives each in-flight request its own blocking thread, so
//! the stacks' push/pop discipline holds by construction.

pub mod app;
pub mod config;
pub mod context;
mod dispatch;
pub mod error;
pub mod request;
pub mod response;
pub mod session;
pub mod store;
pub mod telemetry;

pub use app::{
    current_app_name, url_for, AfterHook, App, BeforeHook, Handler, TeardownHook,
    UrlValuePreprocessor,
};
pub use config::{AppConfig, ConfigError};
pub use context::{
    current_app, current_endpoint, try_current_app, with_app_store, with_request, with_session,
    AppContext, AppContextGuard, RequestContext, RequestContextGuard,
};
pub use error::{
    ContextMissingError, ErrorHook, HandlerError, RegisterError, SetupError, UrlForError,
};
pub use request::Request;
pub use response::{Response, ResponseLike};
pub use session::Session;
pub use store::Store;

// the routing vocabulary travels with the runtime API
pub use trellis_core::{BindOutcome, ParamValue, Params, Rule};

pub mod prelude {
    pub use crate::app::{url_for, App};
    pub use crate::config::AppConfig;
    pub use crate::context::{current_app, with_app_store, with_request, with_session};
    pub use crate::error::HandlerError;
    pub use crate::request::Request;
    pub use crate::response::{Response, ResponseLike};
    pub use trellis_core::{ParamValue, Params, Rule};
}
