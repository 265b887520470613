//! The dispatcher: from a parsed request to a finished response.
//!
//! Per request: bind against the rule map, push the request context (and
//! an application context if none is active), run URL value preprocessors
//! and before hooks, invoke the handler, coerce its return value, route
//! errors through the handler table, run after hooks in reverse order, and
//! pop the contexts so teardown fires whatever happened in between.

use crate::app::{App, BeforeHook, UrlValuePreprocessor};
use crate::context::{push_request_context, RequestContext};
use crate::error::HandlerError;
use crate::request::Request;
use crate::response::{Response, ResponseLike};
use http::StatusCode;
use std::rc::Rc;
use std::sync::atomic::Ordering;
use trellis_core::{BindArgs, BindOutcome};

impl App {
    /// Dispatch one request. This is the synchronous entry point a
    /// transport adapter calls once per execution unit.
    pub fn handle_request(&self, request: Request) -> Response {
        // first dispatch ends the setup phase
        if !self.inner.setup_done.swap(true, Ordering::AcqRel) {
            let hooks = self.inner.hooks.read().before_first.clone();
            for hook in hooks {
                hook();
            }
        }

        let outcome = self.bind_request(&request);
        let guard = push_request_context(self, request, outcome);
        let (response, error) = self.dispatch(guard.context());
        let response = self.apply_after_hooks(response);
        guard.pop(error.as_ref());
        response
    }

    fn bind_request(&self, request: &Request) -> BindOutcome {
        let host = request.host().map(str::to_string);
        let subdomain = match (&self.config().server_name, host.as_deref()) {
            (Some(server_name), Some(host)) => split_subdomain(host, server_name),
            _ => None,
        };
        let query = request.query_string();
        let args = BindArgs {
            server_name: host.as_deref(),
            subdomain: subdomain.as_deref(),
            script_root: "",
            path_info: request.path(),
            method: request.method().as_str(),
            query_string: (!query.is_empty()).then_some(query),
        };
        self.inner.map.read().bind(&args)
    }

    fn dispatch(&self, ctx: &Rc<RequestContext>) -> (Response, Option<HandlerError>) {
        match ctx.routing() {
            BindOutcome::Matched { endpoint, .. } => self.dispatch_matched(ctx, &endpoint),
            BindOutcome::NotFound => (self.error_response(StatusCode::NOT_FOUND), None),
            BindOutcome::MethodNotAllowed { allowed } => {
                let mut response = self.error_response(StatusCode::METHOD_NOT_ALLOWED);
                let joined = allowed.iter().cloned().collect::<Vec<_>>().join(", ");
                if let Err(err) = response.insert_header("allow", &joined) {
                    tracing::warn!(error = %err, "could not attach Allow header");
                }
                (response, None)
            }
            BindOutcome::RedirectRequired { location } => {
                match Response::redirect(&location, StatusCode::PERMANENT_REDIRECT) {
                    Ok(response) => (response, None),
                    Err(err) => self.handle_error(err),
                }
            }
        }
    }

    fn dispatch_matched(
        &self,
        ctx: &Rc<RequestContext>,
        endpoint: &str,
    ) -> (Response, Option<HandlerError>) {
        let namespace = endpoint.split_once('.').map(|(ns, _)| ns.to_string());
        let in_scope = |scope: &Option<String>| match scope {
            None => false,
            Some(scope) => namespace.as_deref() == Some(scope.as_str()),
        };

        // URL value preprocessors: global first, then namespace-scoped
        let preprocessors: Vec<UrlValuePreprocessor> = {
            let hooks = self.inner.hooks.read();
            hooks
                .url_value_preprocessors
                .iter()
                .filter(|(scope, _)| scope.is_none())
                .chain(
                    hooks
                        .url_value_preprocessors
                        .iter()
                        .filter(|(scope, _)| in_scope(scope)),
                )
                .map(|(_, hook)| hook.clone())
                .collect()
        };
        for preprocessor in preprocessors {
            ctx.with_params_mut(|params| preprocessor(endpoint, params));
        }

        // before hooks: global first, then namespace-scoped; a Some return
        // short-circuits straight to response finalization
        let before: Vec<BeforeHook> = {
            let hooks = self.inner.hooks.read();
            hooks
                .before
                .iter()
                .filter(|(scope, _)| scope.is_none())
                .chain(hooks.before.iter().filter(|(scope, _)| in_scope(scope)))
                .map(|(_, hook)| hook.clone())
                .collect()
        };
        for hook in before {
            if let Some(rv) = hook(ctx.request()) {
                return self.finalize(rv);
            }
        }

        let handler = self.inner.handlers.read().get(endpoint).cloned();
        let Some(handler) = handler else {
            let err = HandlerError::with_code(
                500,
                anyhow::anyhow!("no handler registered for endpoint `{endpoint}`"),
            );
            return self.handle_error(err);
        };
        let params = ctx.params().unwrap_or_default();
        match handler(params) {
            Ok(rv) => self.finalize(rv),
            Err(err) => self.handle_error(err),
        }
    }

    fn finalize(&self, rv: ResponseLike) -> (Response, Option<HandlerError>) {
        match rv.into_response() {
            Ok(response) => (response, None),
            Err(err) => self.handle_error(err),
        }
    }

    /// Map an error through the handler table: typed handlers in
    /// registration order, then the status-code table, then a generic
    /// server error. Debug mode carries the full error chain in the body.
    fn handle_error(&self, err: HandlerError) -> (Response, Option<HandlerError>) {
        let hook = {
            let errors = self.inner.errors.read();
            errors
                .find_typed(&err)
                .or_else(|| errors.find_code(err.code().unwrap_or(500)))
        };
        if let Some(hook) = hook {
            match hook(&err).and_then(|rv| rv.into_response()) {
                Ok(response) => return (response, Some(err)),
                Err(second) => {
                    tracing::error!(error = %second, "error handler failed; falling back to generic response");
                }
            }
        }

        let status = err
            .code()
            .and_then(|code| StatusCode::from_u16(code).ok())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        tracing::error!(error = %err, status = %status, "unhandled error during dispatch");
        let body = if self.config().debug {
            format!("{:?}", err.cause())
        } else {
            status
                .canonical_reason()
                .unwrap_or("Internal Server Error")
                .to_string()
        };
        (Response::text(body).with_status(status), Some(err))
    }

    /// Default response for a routing miss, honoring any handler
    /// registered for the status code.
    fn error_response(&self, status: StatusCode) -> Response {
        let reason = status.canonical_reason().unwrap_or("Error");
        if let Some(hook) = self.inner.errors.read().find_code(status.as_u16()) {
            let synthetic = HandlerError::with_code(status.as_u16(), anyhow::anyhow!("{reason}"));
            match hook(&synthetic).and_then(|rv| rv.into_response()) {
                Ok(response) => return response,
                Err(err) => {
                    tracing::error!(error = %err, "error handler failed; using default response");
                }
            }
        }
        Response::text(reason).with_status(status)
    }

    fn apply_after_hooks(&self, mut response: Response) -> Response {
        let hooks = self.inner.hooks.read().after.clone();
        for hook in hooks.iter().rev() {
            response = hook(response);
        }
        response
    }
}

fn split_subdomain(host: &str, server_name: &str) -> Option<String> {
    if host == server_name {
        return Some(String::new());
    }
    host.strip_suffix(server_name)
        .and_then(|prefix| prefix.strip_suffix('.'))
        .map(str::to_string)
}
