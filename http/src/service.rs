use bytes::Bytes;
use http::{Request as HttpRequest, Response as HttpResponse};
use http_body_util::Full;
use hyper::body::Incoming;
use std::convert::Infallible;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tower::Service;
use trellis_runtime::App;

/// Tower `Service` wrapper around an application, for composing the
/// gateway into existing Tower stacks.
#[derive(Clone)]
pub struct GatewayService {
    app: App,
}

impl GatewayService {
    pub fn new(app: App) -> Self {
        GatewayService { app }
    }
}

impl Service<HttpRequest<Incoming>> for GatewayService {
    type Response = HttpResponse<Full<Bytes>>;
    type Error = Infallible;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: HttpRequest<Incoming>) -> Self::Future {
        let app = self.app.clone();
        Box::pin(async move { crate::gateway::handle(app, req).await })
    }
}
