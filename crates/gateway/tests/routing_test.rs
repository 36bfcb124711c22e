//! Front controller routing

#![cfg(unix)]

mod common;

use bytes::Bytes;
use certomat::issuance::SerializationToken;
use certomat::server::{FrontController, GATEWAY_PAGE, REQUEST_ID_HEADER, UNCONFIGURED_DNS_PAGE};
use common::*;
use http::header::{ALLOW, CONTENT_TYPE};
use http::{Method, Request, StatusCode};
use http_body_util::{BodyExt, Full};

fn controller(fixture: &Fixture) -> FrontController {
    FrontController::new(
        fixture.orchestrator(SUCCESS_AGENT, SerializationToken::new()),
        "certomat.example.org",
    )
    .with_body_limit(16 * 1024)
}

fn request(method: Method, path: &str, host: &str, body: impl Into<Bytes>) -> Request<Full<Bytes>> {
    Request::builder()
        .method(method)
        .uri(path)
        .header("host", host)
        .body(Full::new(body.into()))
        .unwrap()
}

async fn body_text(response: http::Response<Full<Bytes>>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn test_gateway_page_for_canonical_host() {
    let fixture = Fixture::new();
    let controller = controller(&fixture);

    let response = controller
        .handle(request(Method::GET, "/", "Certomat.Example.org:443", ""))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers()[CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/html"));
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    assert_eq!(body_text(response).await, GATEWAY_PAGE);
}

#[tokio::test]
async fn test_dns_page_for_other_hosts() {
    let fixture = Fixture::new();
    let controller = controller(&fixture);

    for (method, path) in [(Method::GET, "/"), (Method::POST, "/anything/else")] {
        let response = controller
            .handle(request(method, path, "host1.example.org", ""))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_text(response).await, UNCONFIGURED_DNS_PAGE);
    }
}

#[tokio::test]
async fn test_issuance_path_requires_post() {
    let fixture = Fixture::new();
    let controller = controller(&fixture);

    for path in ["/get-cert-from-csr", "/get-cert-from-csr/sub"] {
        let response = controller
            .handle(request(Method::GET, path, "certomat.example.org", ""))
            .await;

        assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(response.headers()[ALLOW], "POST");
        assert_eq!(body_text(response).await, "post only");
    }
    assert!(!fixture.state.path().join("last-csr.req").exists());
}

#[tokio::test]
async fn test_post_returns_certificate() {
    let fixture = Fixture::new();
    let controller = controller(&fixture);

    let response = controller
        .handle(request(
            Method::POST,
            "/get-cert-from-csr",
            "certomat.example.org",
            csr_der("host.example.org"),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[CONTENT_TYPE], "text/plain");
    assert_eq!(body_text(response).await, STUB_CERT);
}

#[tokio::test]
async fn test_oversized_body_rejected() {
    let fixture = Fixture::new();
    let controller = controller(&fixture);

    let response = controller
        .handle(request(
            Method::POST,
            "/get-cert-from-csr",
            "certomat.example.org",
            vec![b'x'; 32 * 1024],
        ))
        .await;

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(fixture.staged_files(), 0);
}

#[tokio::test]
async fn test_agent_failure_maps_to_500() {
    let fixture = Fixture::new();
    let controller = FrontController::new(
        fixture.orchestrator(FAILING_AGENT, SerializationToken::new()),
        "certomat.example.org",
    );

    let response = controller
        .handle(request(
            Method::POST,
            "/get-cert-from-csr",
            "certomat.example.org",
            csr_der("host.example.org"),
        ))
        .await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body_text(response).await.contains("agent result code"));
}
