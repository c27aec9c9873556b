// ============================================================================
// Proxy Surface Tests
// ============================================================================
//
// End-to-end coverage of the request pipeline:
// - 404 / 401 / 429 contract bodies
// - forwarding to a stub upstream (query, JSON body, multipart)
// - auth gate with header and query tokens
// - audit gating (authenticated traffic only)
// - upstream failure mapping and chunked relay
//
// ============================================================================

use std::sync::Arc;

use serde_json::json;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use wiremock::matchers::{body_json, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use portico::auth::AuthManager;
use portico::ratelimit::DenyAllLimiter;
use portico::registry::definition::{AuthType, HttpMethod};

use test_utils::{endpoint, local_api, make_token, spawn_app, spawn_app_with, test_config};

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

#[tokio::test]
async fn test_unmatched_route_returns_404_contract_body() {
    let app = spawn_app().await;
    app.registry
        .add_api(
            "movies",
            local_api(
                "movies",
                59999,
                AuthType::None,
                vec![endpoint(HttpMethod::Get, "/myapi/movies", true)],
            ),
        )
        .unwrap();

    let response = client().get(app.url("/nowhere")).send().await.unwrap();

    assert_eq!(response.status(), 404);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Route is not available");
}

#[tokio::test]
async fn test_secured_endpoint_without_token_returns_401() {
    let app = spawn_app().await;
    app.registry
        .add_api(
            "movies",
            local_api(
                "movies",
                59999,
                AuthType::Jwt,
                vec![endpoint(HttpMethod::Get, "/myapi/movies", false)],
            ),
        )
        .unwrap();

    let response = client().get(app.url("/myapi/movies")).send().await.unwrap();

    assert_eq!(response.status(), 401);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Missing or invalid token");
}

#[tokio::test]
async fn test_rate_limited_request_returns_429() {
    let config = test_config();
    let verifier = Arc::new(AuthManager::new(&config.jwt).unwrap());
    let app = spawn_app_with(config, Arc::new(DenyAllLimiter), verifier).await;

    app.registry
        .add_api(
            "movies",
            local_api(
                "movies",
                59999,
                AuthType::None,
                vec![endpoint(HttpMethod::Get, "/myapi/movies", true)],
            ),
        )
        .unwrap();

    let response = client()
        .get(app.url("/myapi/movies"))
        .header("x-forwarded-for", "1.2.3.4")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 429);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["message"], "Too many requests.");
}

#[tokio::test]
async fn test_get_is_forwarded_with_query() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/myapi/movies"))
        .and(query_param("genre", "drama"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"titles": ["Heat"]})))
        .expect(1)
        .mount(&upstream)
        .await;

    let app = spawn_app().await;
    app.registry
        .add_api(
            "movies",
            local_api(
                "movies",
                upstream.address().port(),
                AuthType::None,
                vec![endpoint(HttpMethod::Get, "/myapi/movies", true)],
            ),
        )
        .unwrap();

    let response = client()
        .get(app.url("/myapi/movies?genre=drama"))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["titles"][0], "Heat");
}

#[tokio::test]
async fn test_post_json_body_is_relayed() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/myapi/movies"))
        .and(body_json(json!({"title": "Ran"})))
        .respond_with(ResponseTemplate::new(201))
        .expect(1)
        .mount(&upstream)
        .await;

    let app = spawn_app().await;
    app.registry
        .add_api(
            "movies",
            local_api(
                "movies",
                upstream.address().port(),
                AuthType::None,
                vec![endpoint(HttpMethod::Post, "/myapi/movies", true)],
            ),
        )
        .unwrap();

    let response = client()
        .post(app.url("/myapi/movies"))
        .json(&json!({"title": "Ran"}))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 201);
}

#[tokio::test]
async fn test_form_body_is_forwarded_as_json() {
    let upstream = MockServer::start().await;
    Mock::given(method("PUT"))
        .and(path("/myapi/movies/7"))
        .and(body_json(json!({"title": "Ikiru", "year": "1952"})))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&upstream)
        .await;

    let app = spawn_app().await;
    app.registry
        .add_api(
            "movies",
            local_api(
                "movies",
                upstream.address().port(),
                AuthType::None,
                vec![endpoint(HttpMethod::Put, "/myapi/movies/{id}", true)],
            ),
        )
        .unwrap();

    let response = client()
        .put(app.url("/myapi/movies/7"))
        .form(&[("title", "Ikiru"), ("year", "1952")])
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_multipart_upload_is_rebuilt_for_upstream() {
    let upstream = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/myapi/upload"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&upstream)
        .await;

    let app = spawn_app().await;
    app.registry
        .add_api(
            "uploads",
            local_api(
                "uploads",
                upstream.address().port(),
                AuthType::None,
                vec![endpoint(HttpMethod::Post, "/myapi/upload", true)],
            ),
        )
        .unwrap();

    let file_part = reqwest::multipart::Part::bytes(b"file contents".to_vec())
        .file_name("notes.txt")
        .mime_str("text/plain")
        .unwrap();
    let form = reqwest::multipart::Form::new()
        .text("description", "quarterly notes")
        .part("qqfile", file_part);

    let response = client()
        .post(app.url("/myapi/upload"))
        .multipart(form)
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);

    // The upstream saw a multipart body carrying both parts
    let received = &upstream.received_requests().await.unwrap()[0];
    let body = String::from_utf8_lossy(&received.body);
    assert!(body.contains("quarterly notes"));
    assert!(body.contains("filename=\"notes.txt\""));
    assert!(body.contains("file contents"));
}

#[tokio::test]
async fn test_bearer_token_passes_auth_and_is_audited() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/myapi/movies"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&upstream)
        .await;

    let app = spawn_app().await;
    app.registry
        .add_api(
            "movies",
            local_api(
                "movies",
                upstream.address().port(),
                AuthType::Jwt,
                vec![endpoint(HttpMethod::Get, "/myapi/movies", false)],
            ),
        )
        .unwrap();

    let response = client()
        .get(app.url("/myapi/movies"))
        .header("authorization", format!("Bearer {}", make_token("user-42")))
        .header("x-forwarded-for", "9.9.9.9")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(app.audit.depth(), 1);
}

#[tokio::test]
async fn test_token_in_query_param_passes_auth() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/myapi/movies"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&upstream)
        .await;

    let app = spawn_app().await;
    app.registry
        .add_api(
            "movies",
            local_api(
                "movies",
                upstream.address().port(),
                AuthType::Jwt,
                vec![endpoint(HttpMethod::Get, "/myapi/movies", false)],
            ),
        )
        .unwrap();

    let response = client()
        .get(app.url(&format!("/myapi/movies?token={}", make_token("user-42"))))
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn test_garbage_token_is_rejected() {
    let app = spawn_app().await;
    app.registry
        .add_api(
            "movies",
            local_api(
                "movies",
                59999,
                AuthType::Jwt,
                vec![endpoint(HttpMethod::Get, "/myapi/movies", false)],
            ),
        )
        .unwrap();

    let response = client()
        .get(app.url("/myapi/movies"))
        .header("authorization", "Bearer not-a-jwt")
        .send()
        .await
        .unwrap();

    assert_eq!(response.status(), 401);
}

#[tokio::test]
async fn test_open_endpoint_is_not_audited() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/public/ping"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&upstream)
        .await;

    let app = spawn_app().await;
    app.registry
        .add_api(
            "public",
            local_api(
                "public",
                upstream.address().port(),
                AuthType::None,
                vec![endpoint(HttpMethod::Get, "/public/ping", true)],
            ),
        )
        .unwrap();

    let response = client().get(app.url("/public/ping")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(app.audit.depth(), 0);
}

#[tokio::test]
async fn test_method_mismatch_is_404() {
    let app = spawn_app().await;
    app.registry
        .add_api(
            "movies",
            local_api(
                "movies",
                59999,
                AuthType::None,
                vec![endpoint(HttpMethod::Get, "/myapi/movies", true)],
            ),
        )
        .unwrap();

    let response = client().post(app.url("/myapi/movies")).send().await.unwrap();
    assert_eq!(response.status(), 404);
}

#[tokio::test]
async fn test_unreachable_upstream_returns_502() {
    // Reserve a port, then close it so the connection is refused
    let closed_port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };

    let app = spawn_app().await;
    app.registry
        .add_api(
            "movies",
            local_api(
                "movies",
                closed_port,
                AuthType::None,
                vec![endpoint(HttpMethod::Get, "/myapi/movies", true)],
            ),
        )
        .unwrap();

    let response = client().get(app.url("/myapi/movies")).send().await.unwrap();
    assert_eq!(response.status(), 502);
}

#[tokio::test]
async fn test_upstream_error_status_is_relayed_not_wrapped() {
    let upstream = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/myapi/movies"))
        .respond_with(ResponseTemplate::new(503).set_body_string("backend says no"))
        .mount(&upstream)
        .await;

    let app = spawn_app().await;
    app.registry
        .add_api(
            "movies",
            local_api(
                "movies",
                upstream.address().port(),
                AuthType::None,
                vec![endpoint(HttpMethod::Get, "/myapi/movies", true)],
            ),
        )
        .unwrap();

    let response = client().get(app.url("/myapi/movies")).send().await.unwrap();
    assert_eq!(response.status(), 503);
    assert_eq!(response.text().await.unwrap(), "backend says no");
}

/// Minimal HTTP/1.1 backend speaking chunked transfer encoding, for the
/// streamed relay path that wiremock cannot exercise.
async fn spawn_chunked_backend() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4096];
                // Read the request head; the test only sends GETs
                let _ = socket.read(&mut buf).await;
                let response = b"HTTP/1.1 200 OK\r\n\
                    Content-Type: text/plain\r\n\
                    Transfer-Encoding: chunked\r\n\
                    \r\n\
                    6\r\nstream\r\n\
                    5\r\n-body\r\n\
                    0\r\n\r\n";
                let _ = socket.write_all(response).await;
            });
        }
    });

    port
}

#[tokio::test]
async fn test_chunked_upstream_is_streamed_through() {
    let backend_port = spawn_chunked_backend().await;

    let app = spawn_app().await;
    app.registry
        .add_api(
            "streaming",
            local_api(
                "streaming",
                backend_port,
                AuthType::None,
                vec![endpoint(HttpMethod::Get, "/stream", true)],
            ),
        )
        .unwrap();

    let response = client().get(app.url("/stream")).send().await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "stream-body");
}
