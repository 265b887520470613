//! End-to-end dispatch flows: routing, hook ordering, error handling,
//! context teardown, and the setup-phase freeze.

use http::StatusCode;
use std::sync::{Arc, Mutex};
use trellis_core::{ParamValue, Params, Rule};
use trellis_runtime::{
    current_app, url_for, with_app_store, with_request, App, AppConfig, HandlerError, Request,
    ResponseLike, SetupError,
};

type Log = Arc<Mutex<Vec<String>>>;

fn record(log: &Log, entry: &str) {
    log.lock().unwrap().push(entry.to_string());
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

#[derive(Debug, thiserror::Error)]
#[error("teapot refused to brew")]
struct TeapotError;

#[test]
fn test_specificity_scenario_int_vs_name() {
    let app = App::new("users");
    app.route("/users/<name>", "by_name", &[], |params| {
        let name = params.get("name").cloned();
        Ok(format!("name:{}", name.map(|v| v.to_string()).unwrap_or_default()).into())
    })
    .unwrap();
    app.route("/users/<int:id>", "by_id", &[], |params| {
        match params.get("id") {
            Some(ParamValue::Int(id)) => Ok(format!("id:{id}").into()),
            other => Err(HandlerError::msg(format!("bad id param: {other:?}"))),
        }
    })
    .unwrap();

    let response = app.handle_request(Request::get("/users/42"));
    assert_eq!(response.body_string(), "id:42");
    let response = app.handle_request(Request::get("/users/abc"));
    assert_eq!(response.body_string(), "name:abc");
}

#[test]
fn test_routing_misses_become_responses() {
    let app = App::new("misses");
    app.route("/item", "item", &["GET"], |_| Ok("item".into()))
        .unwrap();
    app.route("/shop/", "shop", &[], |_| Ok("shop".into()))
        .unwrap();

    let response = app.handle_request(Request::get("/missing"));
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = app.handle_request(Request::post("/item"));
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    assert_eq!(response.headers().get("allow").unwrap(), "GET");

    let response = app.handle_request(Request::get("/shop"));
    assert_eq!(response.status(), StatusCode::PERMANENT_REDIRECT);
    assert_eq!(response.headers().get("location").unwrap(), "/shop/");

    let response = app.handle_request(Request::get("/shop/"));
    assert_eq!(response.body_string(), "shop");
}

#[test]
fn test_hook_ordering_through_full_dispatch() {
    let app = App::new("hooks");
    let log: Log = Default::default();

    let l = log.clone();
    app.before_request(move |_| {
        record(&l, "before:global");
        None
    })
    .unwrap();
    let l = log.clone();
    app.before_request_scoped("admin", move |_| {
        record(&l, "before:admin");
        None
    })
    .unwrap();
    let l = log.clone();
    app.before_request_scoped("shop", move |_| {
        record(&l, "before:shop");
        None
    })
    .unwrap();

    let l = log.clone();
    app.after_request(move |response| {
        record(&l, "after:first");
        response
    })
    .unwrap();
    let l = log.clone();
    app.after_request(move |response| {
        record(&l, "after:second");
        response
    })
    .unwrap();

    let l = log.clone();
    app.teardown_request(move |_| {
        record(&l, "teardown:request");
        Ok(())
    })
    .unwrap();
    let l = log.clone();
    app.teardown_appcontext(move |_| {
        record(&l, "teardown:appcontext");
        Ok(())
    })
    .unwrap();

    let l = log.clone();
    app.route("/admin/panel", "admin.panel", &[], move |_| {
        record(&l, "handler");
        Ok("panel".into())
    })
    .unwrap();

    let response = app.handle_request(Request::get("/admin/panel"));
    assert_eq!(response.body_string(), "panel");
    assert_eq!(
        entries(&log),
        vec![
            "before:global",
            "before:admin",
            "handler",
            // after hooks run in reverse registration order
            "after:second",
            "after:first",
            "teardown:request",
            "teardown:appcontext",
        ]
    );
}

#[test]
fn test_before_hook_short_circuits_handler() {
    let app = App::new("short");
    let log: Log = Default::default();

    let l = log.clone();
    app.before_request(move |_| {
        record(&l, "before");
        Some(("intercepted", 403u16).into())
    })
    .unwrap();
    let l = log.clone();
    app.route("/secret", "secret", &[], move |_| {
        record(&l, "handler");
        Ok("secret".into())
    })
    .unwrap();

    let response = app.handle_request(Request::get("/secret"));
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert_eq!(response.body_string(), "intercepted");
    assert_eq!(entries(&log), vec!["before"]);
}

#[test]
fn test_url_value_preprocessor_mutates_params() {
    let app = App::new("preprocess");
    app.url_value_preprocessor(|_endpoint, params: &mut Params| {
        params.insert("lang".to_string(), ParamValue::Str("en".to_string()));
    })
    .unwrap();
    app.route("/docs/<page>", "docs", &[], |params| {
        let lang = params.get("lang").cloned();
        let page = params.get("page").cloned();
        Ok(format!(
            "{}:{}",
            lang.map(|v| v.to_string()).unwrap_or_default(),
            page.map(|v| v.to_string()).unwrap_or_default()
        )
        .into())
    })
    .unwrap();

    let response = app.handle_request(Request::get("/docs/intro"));
    assert_eq!(response.body_string(), "en:intro");
}

#[test]
fn test_typed_error_handler_beats_code_handler() {
    let app = App::new("errors");
    app.error_handler_for::<TeapotError, _>(|_| Ok(("short and stout", 418u16).into()))
        .unwrap();
    app.error_handler_code(500, |_| Ok(("caught by code", 500u16).into()))
        .unwrap();

    app.route("/teapot", "teapot", &[], |_| {
        Err(HandlerError::new(TeapotError))
    })
    .unwrap();
    app.route("/boom", "boom", &[], |_| {
        Err(HandlerError::msg("plain failure"))
    })
    .unwrap();

    let response = app.handle_request(Request::get("/teapot"));
    assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
    assert_eq!(response.body_string(), "short and stout");

    let response = app.handle_request(Request::get("/boom"));
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(response.body_string(), "caught by code");
}

#[test]
fn test_code_error_handler_sees_routing_misses() {
    let app = App::new("custom404");
    app.error_handler_code(404, |_| Ok(("nothing here", 404u16).into()))
        .unwrap();
    let response = app.handle_request(Request::get("/nope"));
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert_eq!(response.body_string(), "nothing here");
}

#[test]
fn test_unhandled_error_is_generic_unless_debug() {
    let app = App::new("opaque");
    app.route("/boom", "boom", &[], |_| {
        Err(HandlerError::msg("secret detail"))
    })
    .unwrap();
    let response = app.handle_request(Request::get("/boom"));
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(!response.body_string().contains("secret detail"));

    let config = AppConfig {
        debug: true,
        ..Default::default()
    };
    let app = App::with_config("verbose", config);
    app.route("/boom", "boom", &[], |_| {
        Err(HandlerError::msg("secret detail"))
    })
    .unwrap();
    let response = app.handle_request(Request::get("/boom"));
    assert!(response.body_string().contains("secret detail"));
}

#[test]
fn test_teardown_runs_once_with_error_when_handler_fails() {
    let app = App::new("teardown");
    let log: Log = Default::default();

    let l = log.clone();
    app.teardown_request(move |error| {
        record(
            &l,
            &format!("teardown_request(err={})", error.is_some()),
        );
        Ok(())
    })
    .unwrap();
    let l = log.clone();
    app.teardown_appcontext(move |error| {
        record(
            &l,
            &format!("teardown_appcontext(err={})", error.is_some()),
        );
        Ok(())
    })
    .unwrap();
    app.route("/boom", "boom", &[], |_| {
        Err(HandlerError::msg("kaput"))
    })
    .unwrap();

    let response = app.handle_request(Request::get("/boom"));
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        entries(&log),
        vec!["teardown_request(err=true)", "teardown_appcontext(err=true)"]
    );
}

#[test]
fn test_failing_teardown_hook_does_not_stop_the_rest() {
    let app = App::new("teardown-chain");
    let log: Log = Default::default();

    let l = log.clone();
    app.teardown_request(move |_| {
        record(&l, "first");
        Err(anyhow::anyhow!("teardown hiccup"))
    })
    .unwrap();
    let l = log.clone();
    app.teardown_request(move |_| {
        record(&l, "second");
        Ok(())
    })
    .unwrap();
    app.route("/", "index", &[], |_| Ok("ok".into())).unwrap();

    app.handle_request(Request::get("/"));
    assert_eq!(entries(&log), vec!["first", "second"]);
}

#[test]
fn test_context_accessors_inside_handler() {
    let app = App::new("ambient");
    app.route("/whoami", "whoami", &[], |_| {
        let name = current_app().map_err(HandlerError::new)?.name().to_string();
        let path = with_request(|req| req.path().to_string()).map_err(HandlerError::new)?;
        with_app_store(|store| store.insert(7usize)).map_err(HandlerError::new)?;
        let stored =
            with_app_store(|store| store.get::<usize>().copied()).map_err(HandlerError::new)?;
        Ok(format!("{name}:{path}:{stored:?}").into())
    })
    .unwrap();

    let response = app.handle_request(Request::get("/whoami"));
    assert_eq!(response.body_string(), "ambient:/whoami:Some(7)");
}

#[test]
fn test_url_for_round_trip_inside_handler() {
    let app = App::new("reversal");
    app.route("/users/<int:id>", "user", &[], |params| {
        match params.get("id") {
            Some(ParamValue::Int(id)) => Ok(format!("user {id}").into()),
            _ => Err(HandlerError::msg("missing id")),
        }
    })
    .unwrap();
    app.route("/links", "links", &[], |_| {
        let mut params = Params::default();
        params.insert("id".to_string(), ParamValue::Int(7));
        params.insert("page".to_string(), ParamValue::Int(2));
        let url = url_for("user", &params).map_err(HandlerError::new)?;
        Ok(url.into())
    })
    .unwrap();

    let response = app.handle_request(Request::get("/links"));
    assert_eq!(response.body_string(), "/users/7?page=2");
    // and the built path binds back to the same rule
    let response = app.handle_request(Request::get("/users/7").with_query("page=2"));
    assert_eq!(response.body_string(), "user 7");
}

#[test]
fn test_registration_rejected_after_first_dispatch() {
    let app = App::new("frozen");
    app.route("/", "index", &[], |_| Ok("ok".into())).unwrap();
    app.handle_request(Request::get("/"));

    assert!(matches!(
        app.before_request(|_| None),
        Err(SetupError("before_request"))
    ));
    assert!(app.route("/late", "late", &[], |_| Ok("late".into())).is_err());
    assert!(matches!(
        app.teardown_request(|_| Ok(())),
        Err(SetupError("teardown_request"))
    ));
}

#[test]
fn test_subdomain_routing() {
    let config = AppConfig {
        server_name: Some("example.com".to_string()),
        ..Default::default()
    };
    let app = App::with_config("subdomains", config);

    app.add_url_rule(
        Rule::parse("/", "api_index").unwrap().with_subdomain("api"),
        Some(Arc::new(|_| Ok("api".into()))),
    )
    .unwrap();
    app.route("/", "index", &[], |_| Ok("main".into())).unwrap();

    let response = app.handle_request(Request::get("/").with_header("host", "api.example.com"));
    assert_eq!(response.body_string(), "api");
    let response = app.handle_request(Request::get("/").with_header("host", "example.com"));
    assert_eq!(response.body_string(), "main");
}

#[test]
fn test_json_handler_return() {
    let app = App::new("json");
    app.route("/status", "status", &[], |_| {
        ResponseLike::json(serde_json::json!({"ok": true, "version": 3}))
    })
    .unwrap();
    let response = app.handle_request(Request::get("/status"));
    assert_eq!(
        response.headers().get("content-type").unwrap(),
        "application/json"
    );
    assert_eq!(response.body_string(), "{\"ok\":true,\"version\":3}");
}

#[test]
fn test_after_hooks_still_see_request_context() {
    let app = App::new("after-ctx");
    let log: Log = Default::default();
    let l = log.clone();
    app.after_request(move |response| {
        let seen = with_request(|req| req.path().to_string());
        record(&l, &format!("after sees {seen:?}"));
        response
    })
    .unwrap();
    app.route("/here", "here", &[], |_| Ok("x".into())).unwrap();

    app.handle_request(Request::get("/here"));
    assert_eq!(entries(&log), vec!["after sees Ok(\"/here\")"]);
}

#[test]
fn test_before_first_request_runs_once() {
    let app = App::new("first");
    let log: Log = Default::default();
    let l = log.clone();
    app.before_first_request(move || record(&l, "warmup")).unwrap();
    app.route("/", "index", &[], |_| Ok("ok".into())).unwrap();

    app.handle_request(Request::get("/"));
    app.handle_request(Request::get("/"));
    assert_eq!(entries(&log), vec!["warmup"]);
}
