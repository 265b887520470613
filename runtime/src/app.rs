//! The central application object.
//!
//! `App` is a cheap-clone handle: registries live behind read/write locks
//! in a shared inner, and the setup-phase flag flips on the first
//! dispatched request. After that flip every registration method fails
//! with [`SetupError`], which keeps the rule map and hook tables
//! read-only while requests are in flight.

use crate::config::AppConfig;
use crate::context::{current_app, AppContext};
use crate::error::{
    ContextMissingError, ErrorHook, ErrorRegistry, HandlerError, RegisterError, SetupError,
    UrlForError,
};
use crate::request::Request;
use crate::response::{Response, ResponseLike};
use ahash::AHashMap;
use parking_lot::RwLock;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use trellis_core::{BuildError, Params, Rule, RuleMap};

/// A registered view handler. Invoked synchronously with the extracted
/// path parameters; everything else is reachable through the context
/// accessors.
pub type Handler = Arc<dyn Fn(Params) -> Result<ResponseLike, HandlerError> + Send + Sync>;

/// Runs before the handler; a `Some` return short-circuits dispatch.
pub type BeforeHook = Arc<dyn Fn(&Request) -> Option<ResponseLike> + Send + Sync>;

/// Runs after the handler, receiving and able to replace the response.
pub type AfterHook = Arc<dyn Fn(Response) -> Response + Send + Sync>;

/// Runs when a context pops, receiving the in-flight error if any. Its own
/// error is logged and never stops the remaining teardown hooks.
pub type TeardownHook = Arc<dyn Fn(Option<&HandlerError>) -> anyhow::Result<()> + Send + Sync>;

/// Mutates extracted parameters before dispatch, given the endpoint.
pub type UrlValuePreprocessor = Arc<dyn Fn(&str, &mut Params) + Send + Sync>;

type FirstRequestHook = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
pub(crate) struct HookRegistry {
    pub(crate) before: Vec<(Option<String>, BeforeHook)>,
    pub(crate) after: Vec<AfterHook>,
    pub(crate) teardown_request: Vec<TeardownHook>,
    pub(crate) teardown_appcontext: Vec<TeardownHook>,
    pub(crate) url_value_preprocessors: Vec<(Option<String>, UrlValuePreprocessor)>,
    pub(crate) before_first: Vec<FirstRequestHook>,
}

pub(crate) struct AppInner {
    name: String,
    config: AppConfig,
    pub(crate) map: RwLock<RuleMap>,
    pub(crate) handlers: RwLock<AHashMap<String, Handler>>,
    pub(crate) hooks: RwLock<HookRegistry>,
    pub(crate) errors: RwLock<ErrorRegistry>,
    pub(crate) setup_done: AtomicBool,
}

#[derive(Clone)]
pub struct App {
    pub(crate) inner: Arc<AppInner>,
}

impl App {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_config(name, AppConfig::default())
    }

    pub fn with_config(name: impl Into<String>, config: AppConfig) -> Self {
        App {
            inner: Arc::new(AppInner {
                name: name.into(),
                config,
                map: RwLock::new(RuleMap::new()),
                handlers: RwLock::new(AHashMap::new()),
                hooks: RwLock::new(HookRegistry::default()),
                errors: RwLock::new(ErrorRegistry::default()),
                setup_done: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn config(&self) -> &AppConfig {
        &self.inner.config
    }

    /// Identity comparison between handles of the same application.
    pub fn ptr_eq(&self, other: &App) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Whether the setup phase has ended (a request has been dispatched).
    pub fn has_dispatched(&self) -> bool {
        self.inner.setup_done.load(Ordering::Acquire)
    }

    fn ensure_setup(&self, what: &'static str) -> Result<(), SetupError> {
        if self.has_dispatched() {
            return Err(SetupError(what));
        }
        Ok(())
    }

    /// Register a compiled rule, optionally with its view handler.
    ///
    /// Build-only rules take no handler. Re-registering an endpoint with a
    /// different handler is refused.
    pub fn add_url_rule(&self, rule: Rule, handler: Option<Handler>) -> Result<(), RegisterError> {
        self.ensure_setup("add_url_rule")?;
        let endpoint = rule.endpoint().to_string();
        if let Some(handler) = &handler {
            let handlers = self.inner.handlers.read();
            if let Some(existing) = handlers.get(&endpoint) {
                if !Arc::ptr_eq(existing, handler) {
                    return Err(RegisterError::EndpointTaken(endpoint));
                }
            }
        }
        self.inner.map.write().add(rule)?;
        if let Some(handler) = handler {
            self.inner.handlers.write().insert(endpoint, handler);
        }
        Ok(())
    }

    /// Convenience registration: compile `pattern`, apply the configured
    /// slash behavior and `methods`, and bind `handler` to `endpoint`.
    /// An empty method list means every method is accepted.
    pub fn route<F>(
        &self,
        pattern: &str,
        endpoint: &str,
        methods: &[&str],
        handler: F,
    ) -> Result<(), RegisterError>
    where
        F: Fn(Params) -> Result<ResponseLike, HandlerError> + Send + Sync + 'static,
    {
        let mut rule =
            Rule::parse(pattern, endpoint)?.strict_slashes(self.inner.config.strict_slashes);
        if !methods.is_empty() {
            rule = rule.with_methods(methods.iter().copied());
        }
        self.add_url_rule(rule, Some(Arc::new(handler)))
    }

    pub fn before_request<F>(&self, hook: F) -> Result<(), SetupError>
    where
        F: Fn(&Request) -> Option<ResponseLike> + Send + Sync + 'static,
    {
        self.ensure_setup("before_request")?;
        self.inner.hooks.write().before.push((None, Arc::new(hook)));
        Ok(())
    }

    /// Before-request hook that only runs for endpoints in `namespace`
    /// (the text before the first `.` in the endpoint name).
    pub fn before_request_scoped<F>(
        &self,
        namespace: impl Into<String>,
        hook: F,
    ) -> Result<(), SetupError>
    where
        F: Fn(&Request) -> Option<ResponseLike> + Send + Sync + 'static,
    {
        self.ensure_setup("before_request_scoped")?;
        self.inner
            .hooks
            .write()
            .before
            .push((Some(namespace.into()), Arc::new(hook)));
        Ok(())
    }

    pub fn after_request<F>(&self, hook: F) -> Result<(), SetupError>
    where
        F: Fn(Response) -> Response + Send + Sync + 'static,
    {
        self.ensure_setup("after_request")?;
        self.inner.hooks.write().after.push(Arc::new(hook));
        Ok(())
    }

    pub fn teardown_request<F>(&self, hook: F) -> Result<(), SetupError>
    where
        F: Fn(Option<&HandlerError>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.ensure_setup("teardown_request")?;
        self.inner
            .hooks
            .write()
            .teardown_request
            .push(Arc::new(hook));
        Ok(())
    }

    pub fn teardown_appcontext<F>(&self, hook: F) -> Result<(), SetupError>
    where
        F: Fn(Option<&HandlerError>) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.ensure_setup("teardown_appcontext")?;
        self.inner
            .hooks
            .write()
            .teardown_appcontext
            .push(Arc::new(hook));
        Ok(())
    }

    pub fn url_value_preprocessor<F>(&self, hook: F) -> Result<(), SetupError>
    where
        F: Fn(&str, &mut Params) + Send + Sync + 'static,
    {
        self.ensure_setup("url_value_preprocessor")?;
        self.inner
            .hooks
            .write()
            .url_value_preprocessors
            .push((None, Arc::new(hook)));
        Ok(())
    }

    pub fn url_value_preprocessor_scoped<F>(
        &self,
        namespace: impl Into<String>,
        hook: F,
    ) -> Result<(), SetupError>
    where
        F: Fn(&str, &mut Params) + Send + Sync + 'static,
    {
        self.ensure_setup("url_value_preprocessor_scoped")?;
        self.inner
            .hooks
            .write()
            .url_value_preprocessors
            .push((Some(namespace.into()), Arc::new(hook)));
        Ok(())
    }

    /// Runs once, right before the first request is dispatched.
    pub fn before_first_request<F>(&self, hook: F) -> Result<(), SetupError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.ensure_setup("before_first_request")?;
        self.inner.hooks.write().before_first.push(Arc::new(hook));
        Ok(())
    }

    /// Register an error handler for a concrete error type. Typed handlers
    /// are consulted in registration order, before code handlers.
    pub fn error_handler_for<E, F>(&self, hook: F) -> Result<(), SetupError>
    where
        E: fmt::Display + fmt::Debug + Send + Sync + 'static,
        F: Fn(&HandlerError) -> Result<ResponseLike, HandlerError> + Send + Sync + 'static,
    {
        self.ensure_setup("error_handler_for")?;
        self.inner
            .errors
            .write()
            .register_type::<E>(Arc::new(hook) as ErrorHook);
        Ok(())
    }

    /// Register an error handler for an HTTP status code.
    pub fn error_handler_code<F>(&self, code: u16, hook: F) -> Result<(), SetupError>
    where
        F: Fn(&HandlerError) -> Result<ResponseLike, HandlerError> + Send + Sync + 'static,
    {
        self.ensure_setup("error_handler_code")?;
        self.inner
            .errors
            .write()
            .register_code(code, Arc::new(hook) as ErrorHook);
        Ok(())
    }

    /// Reverse a URL against this application's rule map.
    pub fn url_for(&self, endpoint: &str, params: &Params) -> Result<String, BuildError> {
        self.inner.map.read().build(endpoint, params, None)
    }

    /// Create an application context for use outside a request (scripts,
    /// background jobs, tests).
    pub fn app_context(&self) -> Rc<AppContext> {
        AppContext::new(self.clone())
    }

    pub(crate) fn run_request_teardown(&self, error: Option<&HandlerError>) {
        let hooks = self.inner.hooks.read().teardown_request.clone();
        run_teardown_hooks(&hooks, error, "teardown_request");
    }

    pub(crate) fn run_appcontext_teardown(&self, error: Option<&HandlerError>) {
        let hooks = self.inner.hooks.read().teardown_appcontext.clone();
        run_teardown_hooks(&hooks, error, "teardown_appcontext");
    }
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("name", &self.inner.name)
            .field("rules", &self.inner.map.read().len())
            .field("has_dispatched", &self.has_dispatched())
            .finish()
    }
}

fn run_teardown_hooks(hooks: &[TeardownHook], error: Option<&HandlerError>, kind: &str) {
    for hook in hooks {
        if let Err(err) = hook(error) {
            // a failing teardown hook must not stop the remaining ones
            tracing::error!(error = %err, kind, "teardown hook failed");
        }
    }
}

/// Reverse a URL against the current application.
pub fn url_for(endpoint: &str, params: &Params) -> Result<String, UrlForError> {
    let app = current_app()?;
    Ok(app.url_for(endpoint, params)?)
}

/// Convenience wrapper that surfaces [`ContextMissingError`] for the
/// current app's name, mostly useful in handlers and templates.
pub fn current_app_name() -> Result<String, ContextMissingError> {
    Ok(current_app()?.name().to_string())
}
