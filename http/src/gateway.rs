//! # Gateway - The Transport Boundary
//!
//! The framework's responsibility begins at a fully-parsed request and ends
//! at a fully-formed response; everything before and after is this
//! adapter's job. `Gateway` owns the Hyper 1.0 accept loop, collects each
//! request body, and hands the parsed request to the application on a
//! blocking worker thread - one execution unit per in-flight request, so
//! the runtime's thread-local context stacks hold by construction.

use bytes::Bytes;
use http::{Request as HttpRequest, Response as HttpResponse, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use trellis_runtime::{App, Request, Response};

/// HTTP gateway builder.
///
/// ```rust,ignore
/// Gateway::new(app)
///     .bind("127.0.0.1:3000")
///     .serve()
///     .await?;
/// ```
pub struct Gateway {
    app: App,
    /// Bind address (e.g. "127.0.0.1:3000")
    addr: Option<String>,
}

impl Gateway {
    pub fn new(app: App) -> Self {
        Gateway { app, addr: None }
    }

    /// Set the bind address for the server.
    pub fn bind(mut self, addr: impl Into<String>) -> Self {
        self.addr = Some(addr.into());
        self
    }

    /// Run the accept loop until the process is torn down.
    pub async fn serve(self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr: SocketAddr = self.addr.as_deref().unwrap_or("127.0.0.1:3000").parse()?;
        let listener = TcpListener::bind(addr).await?;
        tracing::info!("trellis gateway listening on http://{}", addr);

        let app = self.app;
        loop {
            let (stream, _) = listener.accept().await?;
            let io = TokioIo::new(stream);
            let app = app.clone();

            tokio::task::spawn(async move {
                let service =
                    service_fn(move |req: HttpRequest<Incoming>| handle(app.clone(), req));
                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    tracing::error!("error serving connection: {:?}", err);
                }
            });
        }
    }

    /// Convert to a raw Tower Service for integration with existing Tower
    /// stacks.
    pub fn into_raw_service(self) -> crate::service::GatewayService {
        crate::service::GatewayService::new(self.app)
    }
}

/// Process one wire request: parse, dispatch on a blocking thread, encode.
pub(crate) async fn handle(
    app: App,
    req: HttpRequest<Incoming>,
) -> Result<HttpResponse<Full<Bytes>>, Infallible> {
    let request_id = uuid::Uuid::new_v4().to_string();
    let span = tracing::info_span!(
        "HTTPRequest",
        trellis.http.method = %req.method(),
        trellis.http.path = %req.uri().path(),
        trellis.http.request_id = %request_id
    );

    let request = match read_request(req).await {
        Ok(request) => request,
        Err(err) => {
            tracing::warn!(error = %err, "failed to read request body");
            return Ok(simple_response(StatusCode::BAD_REQUEST, "Bad Request"));
        }
    };

    let response =
        match tokio::task::spawn_blocking(move || span.in_scope(|| app.handle_request(request)))
            .await
        {
            Ok(response) => response,
            Err(join_err) => {
                tracing::error!(error = %join_err, "request worker panicked");
                Response::text("Internal Server Error")
                    .with_status(StatusCode::INTERNAL_SERVER_ERROR)
            }
        };

    Ok(write_response(response))
}

/// Collect the body and reshape the wire request into the runtime's
/// request abstraction.
async fn read_request(req: HttpRequest<Incoming>) -> Result<Request, hyper::Error> {
    let (parts, body) = req.into_parts();
    let bytes = body.collect().await?.to_bytes();
    Ok(Request::from(HttpRequest::from_parts(parts, bytes)))
}

pub(crate) fn write_response(response: Response) -> HttpResponse<Full<Bytes>> {
    let (status, headers, body) = response.into_parts();
    let mut out = HttpResponse::new(Full::new(body));
    *out.status_mut() = status;
    *out.headers_mut() = headers;
    out
}

fn simple_response(status: StatusCode, body: &'static str) -> HttpResponse<Full<Bytes>> {
    let mut out = HttpResponse::new(Full::new(Bytes::from_static(body.as_bytes())));
    *out.status_mut() = status;
    out
}
