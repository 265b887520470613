//! Trellis facade crate.
//!
//! Re-exports the core, runtime, and http crates with a single entry
//! point. The gateway is a transport adapter, not the framework: dispatch
//! begins at a fully-parsed request and ends at a fully-formed response.

pub use trellis_core as core;
pub use trellis_http as http;
pub use trellis_runtime as runtime;

pub use trellis_core::{BindArgs, BindOutcome, Converter, ParamValue, Params, Rule, RuleMap};
pub use trellis_http::{Gateway, GatewayService};
pub use trellis_runtime::{
    current_app, url_for, with_app_store, with_request, with_session, App, AppConfig,
    HandlerError, Request, Response, ResponseLike,
};

pub mod prelude {
    pub use trellis_core::{ParamValue, Params, Rule};
    pub use trellis_http::Gateway;
    pub use trellis_runtime::prelude::*;
    pub use trellis_runtime::telemetry;

    // Re-export common types users will need
    pub use bytes::Bytes;
    pub use ::http::{Method, StatusCode};
    pub use serde_json::json;
}
