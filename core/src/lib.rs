//! # trellis-core
//!
//! The protocol-agnostic routing core: rule compilation, converter-based
//! parameter extraction, and the rule map that binds an incoming
//! (host, subdomain, path, method) tuple to an endpoint.
//!
//! HTTP methods are carried as normalized uppercase strings so this crate
//! stays free of any transport vocabulary; `trellis-runtime` converts real
//! `http::Method` values at the boundary.

pub mod converter;
pub mod error;
pub mod map;
pub mod rule;

pub use converter::{Converter, ConverterSpecError, ParamValue, Params};
pub use error::{BuildError, MapError, RuleError};
pub use map::{BindArgs, BindOutcome, RuleMap};
pub use rule::{PathMatch, Rule, Segment};
