//! Context stacks.
//!
//! Two stacks per execution unit — application contexts and request
//! contexts — stored in `thread_local!` so push/pop is lock-free by
//! construction. "Current" accessors read the top of the calling unit's
//! stack and fail with [`ContextMissingError`] when it is empty.
//!
//! Pushing returns an RAII guard. Popping the guard explicitly lets the
//! dispatcher pass the in-flight error to teardown hooks; if the guard is
//! instead dropped (panic, cancellation), the pop and the teardown hooks
//! still run.

use crate::app::App;
use crate::error::{ContextMissingError, HandlerError};
use crate::request::Request;
use crate::session::Session;
use crate::store::Store;
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use trellis_core::{BindOutcome, Params};

thread_local! {
    static APP_CTX_STACK: RefCell<Vec<Rc<AppContext>>> = const { RefCell::new(Vec::new()) };
    static REQUEST_CTX_STACK: RefCell<Vec<Rc<RequestContext>>> = const { RefCell::new(Vec::new()) };
}

/// An active application context.
///
/// Every push creates a fresh context instance; the nested-push depth
/// tracks how many times this instance is currently on the stack. The
/// app-scoped [`Store`] is the shared resource nested pushes reuse.
pub struct AppContext {
    app: App,
    store: RefCell<Store>,
    depth: Cell<usize>,
}

impl AppContext {
    pub(crate) fn new(app: App) -> Rc<Self> {
        Rc::new(AppContext {
            app,
            store: RefCell::new(Store::new()),
            depth: Cell::new(0),
        })
    }

    pub fn app(&self) -> &App {
        &self.app
    }

    /// Push this context onto the calling unit's stack.
    pub fn push(self: Rc<Self>) -> AppContextGuard {
        self.depth.set(self.depth.get() + 1);
        APP_CTX_STACK.with(|stack| stack.borrow_mut().push(self.clone()));
        AppContextGuard {
            ctx: self,
            popped: false,
        }
    }

    /// Run `f` against the context's store.
    pub fn with_store<R>(&self, f: impl FnOnce(&mut Store) -> R) -> R {
        f(&mut self.store.borrow_mut())
    }
}

/// RAII handle for one push of an [`AppContext`].
pub struct AppContextGuard {
    ctx: Rc<AppContext>,
    popped: bool,
}

impl AppContextGuard {
    pub fn context(&self) -> &Rc<AppContext> {
        &self.ctx
    }

    /// Pop explicitly, forwarding the in-flight error to teardown hooks.
    pub fn pop(mut self, error: Option<&HandlerError>) {
        self.do_pop(error);
    }

    fn do_pop(&mut self, error: Option<&HandlerError>) {
        if self.popped {
            return;
        }
        self.popped = true;

        let depth = self.ctx.depth.get().saturating_sub(1);
        self.ctx.depth.set(depth);
        // teardown fires while the context is still current, at the moment
        // the last nested push unwinds
        if depth == 0 {
            self.ctx.app.run_appcontext_teardown(error);
        }

        let top = APP_CTX_STACK.with(|stack| stack.borrow_mut().pop());
        match top {
            Some(top) if Rc::ptr_eq(&top, &self.ctx) => {}
            _ => tracing::error!(
                "application context stack out of order; popped a context that was not on top"
            ),
        }
    }
}

impl Drop for AppContextGuard {
    fn drop(&mut self) {
        self.do_pop(None);
    }
}

/// An active request context.
///
/// Always paired with exactly one application context. If none was active
/// for the same app when the request context was pushed, one is pushed
/// implicitly and the `owns_app_ctx` flag records that this request
/// context's pop must cascade.
pub struct RequestContext {
    request: Request,
    routing: RefCell<BindOutcome>,
    session: RefCell<Session>,
    app_ctx: Rc<AppContext>,
    owns_app_ctx: bool,
}

impl RequestContext {
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn app_context(&self) -> &Rc<AppContext> {
        &self.app_ctx
    }

    pub fn owns_app_context(&self) -> bool {
        self.owns_app_ctx
    }

    /// The matched endpoint, if routing succeeded.
    pub fn endpoint(&self) -> Option<String> {
        match &*self.routing.borrow() {
            BindOutcome::Matched { endpoint, .. } => Some(endpoint.clone()),
            _ => None,
        }
    }

    /// Extracted view parameters, if routing succeeded.
    pub fn params(&self) -> Option<Params> {
        match &*self.routing.borrow() {
            BindOutcome::Matched { params, .. } => Some(params.clone()),
            _ => None,
        }
    }

    /// The raw routing outcome for this request.
    pub fn routing(&self) -> BindOutcome {
        self.routing.borrow().clone()
    }

    /// Mutate the extracted parameters (URL value preprocessors).
    pub(crate) fn with_params_mut<R>(&self, f: impl FnOnce(&mut Params) -> R) -> Option<R> {
        match &mut *self.routing.borrow_mut() {
            BindOutcome::Matched { params, .. } => Some(f(params)),
            _ => None,
        }
    }

    pub(crate) fn with_session<R>(&self, f: impl FnOnce(&mut Session) -> R) -> R {
        f(&mut self.session.borrow_mut())
    }
}

/// Push a request context, creating and pushing an application context
/// first when none is active for `app` on this execution unit.
pub(crate) fn push_request_context(
    app: &App,
    request: Request,
    routing: BindOutcome,
) -> RequestContextGuard {
    let top = APP_CTX_STACK.with(|stack| stack.borrow().last().cloned());
    let (app_ctx, app_guard) = match top {
        Some(top) if top.app.ptr_eq(app) => (top, None),
        _ => {
            let ctx = AppContext::new(app.clone());
            let guard = ctx.clone().push();
            (ctx, Some(guard))
        }
    };

    let ctx = Rc::new(RequestContext {
        request,
        routing: RefCell::new(routing),
        session: RefCell::new(Session::default()),
        app_ctx,
        owns_app_ctx: app_guard.is_some(),
    });
    REQUEST_CTX_STACK.with(|stack| stack.borrow_mut().push(ctx.clone()));
    RequestContextGuard {
        ctx,
        app_guard,
        popped: false,
    }
}

/// RAII handle for one pushed [`RequestContext`].
pub struct RequestContextGuard {
    ctx: Rc<RequestContext>,
    app_guard: Option<AppContextGuard>,
    popped: bool,
}

impl RequestContextGuard {
    pub fn context(&self) -> &Rc<RequestContext> {
        &self.ctx
    }

    /// Pop explicitly, forwarding the in-flight error to teardown hooks.
    pub fn pop(mut self, error: Option<&HandlerError>) {
        self.do_pop(error);
    }

    fn do_pop(&mut self, error: Option<&HandlerError>) {
        if self.popped {
            return;
        }
        self.popped = true;

        // request teardown runs while the request context is still current
        self.ctx.app_ctx.app.run_request_teardown(error);

        let top = REQUEST_CTX_STACK.with(|stack| stack.borrow_mut().pop());
        match top {
            Some(top) if Rc::ptr_eq(&top, &self.ctx) => {}
            _ => tracing::error!(
                "request context stack out of order; popped a context that was not on top"
            ),
        }

        if let Some(guard) = self.app_guard.take() {
            guard.pop(error);
        }
    }
}

impl Drop for RequestContextGuard {
    fn drop(&mut self) {
        self.do_pop(None);
    }
}

/// The application owning the top of the calling unit's context stack.
pub fn current_app() -> Result<App, ContextMissingError> {
    try_current_app().ok_or(ContextMissingError::App)
}

/// Like [`current_app`], but `None` instead of an error.
pub fn try_current_app() -> Option<App> {
    APP_CTX_STACK.with(|stack| stack.borrow().last().map(|ctx| ctx.app.clone()))
}

/// Run `f` against the current application context's store (the
/// `g`-equivalent scoped storage).
pub fn with_app_store<R>(f: impl FnOnce(&mut Store) -> R) -> Result<R, ContextMissingError> {
    let ctx = APP_CTX_STACK
        .with(|stack| stack.borrow().last().cloned())
        .ok_or(ContextMissingError::App)?;
    Ok(ctx.with_store(f))
}

/// Run `f` against the current request.
pub fn with_request<R>(f: impl FnOnce(&Request) -> R) -> Result<R, ContextMissingError> {
    let ctx = current_request_context().ok_or(ContextMissingError::Request)?;
    Ok(f(&ctx.request))
}

/// Run `f` against the current request's session.
pub fn with_session<R>(f: impl FnOnce(&mut Session) -> R) -> Result<R, ContextMissingError> {
    let ctx = current_request_context().ok_or(ContextMissingError::Request)?;
    Ok(ctx.with_session(f))
}

/// Endpoint of the current request, `None` when routing missed.
pub fn current_endpoint() -> Result<Option<String>, ContextMissingError> {
    let ctx = current_request_context().ok_or(ContextMissingError::Request)?;
    Ok(ctx.endpoint())
}

pub(crate) fn current_request_context() -> Option<Rc<RequestContext>> {
    REQUEST_CTX_STACK.with(|stack| stack.borrow().last().cloned())
}
