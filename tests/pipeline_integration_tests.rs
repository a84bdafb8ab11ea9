//! End-to-end pipeline tests against a local mock server: template
//! resolution into real URLs, header defaults, body encoding and the
//! map-argument merge rules.

use legate::{
    ArgValue, CollectionFormat, InterfaceDef, Legate, OperationDef, ParamDef, ReturnType,
};
use serde_json::json;
use wiremock::matchers::{body_string, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn github() -> InterfaceDef {
    InterfaceDef::new("GitHub").operation(
        OperationDef::new("contributors", "GET /repos/{owner}/{repo}/contributors")
            .param(ParamDef::named("owner"))
            .param(ParamDef::named("repo")),
    )
}

#[tokio::test]
async fn basic_get_resolves_path_variables() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/rust-lang/regex/contributors"))
        .and(header("accept", "*/*"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"login": "denden"}])))
        .expect(1)
        .mount(&server)
        .await;

    let proxy = Legate::builder().target(&github(), &server.uri()).unwrap();
    let value = proxy
        .invoke(
            "contributors",
            &[ArgValue::from("rust-lang"), ArgValue::from("regex")],
        )
        .await
        .unwrap()
        .into_value();

    assert_eq!(value[0]["login"], json!("denden"));
}

#[tokio::test]
async fn iterable_query_expands_exploded() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let interface = InterfaceDef::new("Search").operation(
        OperationDef::new("by_tag", "GET /search?tag={tags}").param(ParamDef::named("tags")),
    );
    let proxy = Legate::builder().target(&interface, &server.uri()).unwrap();
    proxy
        .invoke(
            "by_tag",
            &[ArgValue::from(vec!["a".to_string(), "b".to_string()])],
        )
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests[0].url.query(), Some("tag=a&tag=b"));
}

#[tokio::test]
async fn iterable_query_expands_csv() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .mount(&server)
        .await;

    let interface = InterfaceDef::new("Search").operation(
        OperationDef::new("by_tag", "GET /search?tag={tags}")
            .collection_format(CollectionFormat::Csv)
            .param(ParamDef::named("tags")),
    );
    let proxy = Legate::builder().target(&interface, &server.uri()).unwrap();
    proxy
        .invoke(
            "by_tag",
            &[ArgValue::from(vec!["a".to_string(), "b".to_string()])],
        )
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests[0].url.query(), Some("tag=a,b"));
}

#[tokio::test]
async fn unresolved_query_parameter_is_dropped() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/x"))
        .and(query_param("q", "1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let interface = InterfaceDef::new("Api").operation(
        OperationDef::new("search", "GET /x?q={q}&r={r}")
            .param(ParamDef::named("q"))
            .param(ParamDef::named("r")),
    );
    let proxy = Legate::builder().target(&interface, &server.uri()).unwrap();
    proxy
        .invoke(
            "search",
            &[ArgValue::from("1"), ArgValue::from(serde_json::Value::Null)],
        )
        .await
        .unwrap();

    let requests = server.received_requests().await.unwrap();
    assert_eq!(requests[0].url.query(), Some("q=1"));
}

#[tokio::test]
async fn body_argument_is_json_encoded() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/users"))
        .and(header("content-type", "application/json"))
        .and(body_string("{\"login\":\"denden\",\"admin\":true}"))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 1})))
        .expect(1)
        .mount(&server)
        .await;

    let interface = InterfaceDef::new("Users")
        .operation(OperationDef::new("create", "POST /users").param(ParamDef::Body));
    let proxy = Legate::builder().target(&interface, &server.uri()).unwrap();
    let value = proxy
        .invoke(
            "create",
            &[ArgValue::from(json!({"login": "denden", "admin": true}))],
        )
        .await
        .unwrap()
        .into_value();

    assert_eq!(value["id"], json!(1));
}

#[tokio::test]
async fn form_params_become_urlencoded_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login"))
        .and(header("content-type", "application/x-www-form-urlencoded"))
        .and(body_string("user=denden&password=open%20sesame"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let interface = InterfaceDef::new("Auth").operation(
        OperationDef::new("login", "POST /login")
            .returns(ReturnType::Unit)
            .param(ParamDef::named("user"))
            .param(ParamDef::named("password")),
    );
    let proxy = Legate::builder()
        .encoder(legate::FormEncoder)
        .target(&interface, &server.uri())
        .unwrap();
    proxy
        .invoke(
            "login",
            &[ArgValue::from("denden"), ArgValue::from("open sesame")],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn body_template_expands_arguments() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/sessions"))
        .and(body_string("{\"login\":\"ferris\",\"type\":\"owner\"}"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let interface = InterfaceDef::new("Auth").operation(
        OperationDef::new("open", "POST /sessions")
            .body("%7B\"login\":\"{login}\",\"type\":\"{type}\"%7D")
            .param(ParamDef::named("login"))
            .param(ParamDef::named("type")),
    );
    let proxy = Legate::builder().target(&interface, &server.uri()).unwrap();
    proxy
        .invoke("open", &[ArgValue::from("ferris"), ArgValue::from("owner")])
        .await
        .unwrap();
}

#[tokio::test]
async fn query_map_and_header_map_merge_into_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/search"))
        .and(query_param("sort", "stars"))
        .and(query_param("q", "http"))
        .and(header("x-trace", "abc123"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let interface = InterfaceDef::new("Search").operation(
        OperationDef::new("all", "GET /search?sort=stars")
            .param(ParamDef::QueryMap { encoded: false })
            .param(ParamDef::HeaderMap),
    );
    let proxy = Legate::builder().target(&interface, &server.uri()).unwrap();
    proxy
        .invoke(
            "all",
            &[
                ArgValue::from(json!({"q": "http"})),
                ArgValue::from(json!({"X-Trace": "abc123"})),
            ],
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn class_level_headers_are_sent() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/emojis"))
        .and(header("x-client", "legate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let interface = InterfaceDef::new("GitHub")
        .header("X-Client: legate")
        .operation(OperationDef::new("emojis", "GET /emojis"));
    let proxy = Legate::builder().target(&interface, &server.uri()).unwrap();
    proxy.invoke("emojis", &[]).await.unwrap();
}

#[tokio::test]
async fn interceptors_apply_on_every_request() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/private"))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let interface =
        InterfaceDef::new("Api").operation(OperationDef::new("private", "GET /private"));
    let proxy = Legate::builder()
        .interceptor(legate::HeaderInterceptor::new(
            "Authorization",
            "Bearer token-1",
        ))
        .target(&interface, &server.uri())
        .unwrap();
    proxy.invoke("private", &[]).await.unwrap();
}

#[tokio::test]
async fn uri_argument_overrides_the_target_per_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/ping"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
        .expect(1)
        .mount(&server)
        .await;

    let interface = InterfaceDef::new("Api")
        .operation(OperationDef::new("ping", "GET /ping").param(ParamDef::Uri));
    // the configured target points nowhere; the per-call URI wins
    let proxy = Legate::builder()
        .target(&interface, "https://unused.invalid")
        .unwrap();
    proxy
        .invoke("ping", &[ArgValue::Uri(server.uri())])
        .await
        .unwrap();
}

#[tokio::test]
async fn raw_response_return_exposes_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/raw"))
        .respond_with(
            ResponseTemplate::new(202)
                .insert_header("x-request-id", "r-1")
                .set_body_string("raw payload"),
        )
        .mount(&server)
        .await;

    let interface = InterfaceDef::new("Api")
        .operation(OperationDef::new("raw", "GET /raw").returns(ReturnType::Response));
    let proxy = Legate::builder().target(&interface, &server.uri()).unwrap();
    let result = proxy.invoke("raw", &[]).await.unwrap();

    let legate::InvocationResult::Response(mut response) = result else {
        panic!("expected a raw response");
    };
    assert_eq!(response.status(), 202);
    assert_eq!(response.header("x-request-id"), Some("r-1"));
    let body = response.buffer().await.unwrap();
    assert_eq!(body, &bytes::Bytes::from("raw payload"));
}

#[tokio::test]
async fn http_errors_carry_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/missing"))
        .respond_with(ResponseTemplate::new(404).set_body_string("no such thing"))
        .mount(&server)
        .await;

    let interface =
        InterfaceDef::new("Api").operation(OperationDef::new("missing", "GET /missing"));
    let proxy = Legate::builder().target(&interface, &server.uri()).unwrap();
    let err = proxy.invoke("missing", &[]).await.unwrap_err();

    let legate::Error::Http { status, body, .. } = err else {
        panic!("expected an HTTP error, got {err}");
    };
    assert_eq!(status, 404);
    assert_eq!(body.as_deref(), Some("no such thing"));
}

#[tokio::test]
async fn decode404_turns_not_found_into_empty() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/maybe"))
        .respond_with(ResponseTemplate::new(404).set_body_string("{\"error\": \"nope\"}"))
        .mount(&server)
        .await;

    let interface = InterfaceDef::new("Api")
        .operation(OperationDef::new("maybe", "GET /maybe").returns(ReturnType::Optional));
    let proxy = Legate::builder()
        .decode404(true)
        .target(&interface, &server.uri())
        .unwrap();
    let value = proxy.invoke("maybe", &[]).await.unwrap().into_value();
    assert_eq!(value, serde_json::Value::Null);
}

#[tokio::test]
async fn decode_failures_are_not_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/garbled"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json at all"))
        .expect(1)
        .mount(&server)
        .await;

    let interface =
        InterfaceDef::new("Api").operation(OperationDef::new("garbled", "GET /garbled"));
    let proxy = Legate::builder().target(&interface, &server.uri()).unwrap();
    let err = proxy.invoke("garbled", &[]).await.unwrap_err();
    assert!(matches!(err, legate::Error::Decode { status: 200, .. }));
}

#[tokio::test]
async fn typed_results_deserialize() {
    #[derive(serde::Deserialize)]
    struct Contributor {
        login: String,
    }

    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/repos/rust-lang/regex/contributors"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"login": "denden"}])))
        .mount(&server)
        .await;

    let proxy = Legate::builder().target(&github(), &server.uri()).unwrap();
    let contributors: Vec<Contributor> = proxy
        .invoke_json(
            "contributors",
            &[ArgValue::from("rust-lang"), ArgValue::from("regex")],
        )
        .await
        .unwrap();
    assert_eq!(contributors.len(), 1);
    assert_eq!(contributors[0].login, "denden");
}
