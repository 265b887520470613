//! hello-shop
//!
//! A small storefront wired through the full stack: routes with typed
//! converters, hooks, an error handler, and the Hyper gateway.

use trellis_core::ParamValue;
use trellis_http::Gateway;
use trellis_runtime::{telemetry, url_for, with_request, App, HandlerError, Params, ResponseLike};

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    telemetry::init();

    let app = App::new("hello-shop");

    app.route("/", "index", &[], |_| {
        let mut params = Params::default();
        params.insert("id".to_string(), ParamValue::Int(1));
        let first = url_for("shop.product", &params).map_err(HandlerError::new)?;
        Ok(format!("welcome! try {first}").into())
    })?;

    app.route("/shop/", "shop.listing", &["GET"], |_| {
        ResponseLike::json(serde_json::json!({ "products": [1, 2, 3] }))
    })?;

    app.route("/shop/product/<int:id>", "shop.product", &["GET"], |params| {
        match params.get("id") {
            Some(ParamValue::Int(id)) if *id <= 3 => Ok(format!("product #{id}").into()),
            Some(ParamValue::Int(id)) => Err(HandlerError::with_code(
                404,
                anyhow::anyhow!("no product #{id}"),
            )),
            _ => Err(HandlerError::msg("missing id")),
        }
    })?;

    app.before_request_scoped("shop", |_| {
        let path = with_request(|req| req.path().to_string()).ok()?;
        tracing::debug!(%path, "shop request");
        None
    })?;

    app.error_handler_code(404, |_| Ok(("that shelf is empty", 404u16).into()))?;

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(Gateway::new(app).bind("127.0.0.1:3000").serve())
}
