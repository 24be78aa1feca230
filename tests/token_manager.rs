mod common;

use std::sync::Arc;

use chrono::Duration;
use common::*;
use reqwest::Url;
use snowstream::{
    auth::{Credential, TokenManager},
    transport::HttpResponse,
    Error,
};

fn manager(
    transport: &Arc<ScriptedTransport>,
    credential: Credential,
) -> TokenManager<ScriptedTransport> {
    TokenManager::new(
        credential,
        transport.clone(),
        Url::parse("https://acme-prod.snowflakecomputing.com/oauth/token").unwrap(),
        "ingest_role",
    )
}

#[tokio::test]
async fn static_token_is_returned_unchanged() {
    let transport = ScriptedTransport::new();
    let tokens = manager(&transport, Credential::static_token(PAT).unwrap());
    assert!(tokens.is_static());
    for _ in 0..3 {
        assert_eq!(tokens.token().await.unwrap(), PAT);
    }
    tokens.invalidate().await;
    assert_eq!(tokens.token().await.unwrap(), PAT);
    assert_eq!(transport.count(Call::Token), 0);
}

#[tokio::test]
async fn exchanged_token_is_cached_within_window() {
    let transport = ScriptedTransport::new();
    let tokens = manager(&transport, key_pair());
    let first = tokens.token().await.unwrap();
    let second = tokens.token().await.unwrap();
    assert_eq!(first, "bearer-1");
    assert_eq!(first, second);
    assert_eq!(transport.count(Call::Token), 1);

    let exchange = &transport.requests(Call::Token)[0];
    assert_eq!(exchange.bearer, None);
    assert_eq!(
        form(exchange, "grant_type").as_deref(),
        Some("urn:ietf:params:oauth:grant-type:jwt-bearer")
    );
    assert_eq!(form(exchange, "scope").as_deref(), Some("session:role:INGEST_ROLE"));
    let assertion = form(exchange, "assertion").unwrap();
    assert_eq!(assertion.split('.').count(), 3);
}

#[tokio::test]
async fn expired_token_triggers_one_new_exchange() {
    let transport = ScriptedTransport::new();
    let tokens = manager(&transport, key_pair()).with_validity(Duration::zero());
    assert_eq!(tokens.token().await.unwrap(), "bearer-1");
    assert_eq!(tokens.token().await.unwrap(), "bearer-2");
    assert_eq!(transport.count(Call::Token), 2);
}

#[tokio::test]
async fn invalidation_forces_exchange() {
    let transport = ScriptedTransport::new();
    let tokens = manager(&transport, key_pair());
    tokens.token().await.unwrap();
    tokens.invalidate().await;
    assert_eq!(tokens.token().await.unwrap(), "bearer-2");
    assert_eq!(tokens.token().await.unwrap(), "bearer-2");
    assert_eq!(transport.count(Call::Token), 2);
}

#[tokio::test]
async fn concurrent_callers_share_one_exchange() {
    let transport = ScriptedTransport::new();
    let tokens = manager(&transport, key_pair());
    let (a, b, c) = tokio::join!(tokens.token(), tokens.token(), tokens.token());
    assert_eq!(a.unwrap(), "bearer-1");
    assert_eq!(b.unwrap(), "bearer-1");
    assert_eq!(c.unwrap(), "bearer-1");
    assert_eq!(transport.count(Call::Token), 1);
}

#[tokio::test]
async fn rejected_exchange_carries_status_and_body() {
    let transport = ScriptedTransport::new();
    let tokens = manager(&transport, key_pair());
    transport.push(Call::Token, HttpResponse::new(400, r#"{"error": "invalid_grant"}"#));
    match tokens.token().await.unwrap_err() {
        Error::Auth { status, body } => {
            assert_eq!(status, Some(400));
            assert!(body.contains("invalid_grant"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    // nothing cached, next call exchanges again
    assert_eq!(tokens.token().await.unwrap(), "bearer-2");
}

#[tokio::test]
async fn exchange_response_without_token_is_auth_error() {
    let transport = ScriptedTransport::new();
    let tokens = manager(&transport, key_pair());
    transport.push(Call::Token, HttpResponse::new(200, r#"{"access_token": ""}"#));
    assert!(matches!(tokens.token().await, Err(Error::Auth { status: Some(200), .. })));

    transport.push(Call::Token, HttpResponse::new(200, r#"{"token": "legacy"}"#));
    assert_eq!(tokens.token().await.unwrap(), "legacy");
}

#[tokio::test]
async fn network_failure_during_exchange_is_auth_error() {
    let transport = ScriptedTransport::new();
    let tokens = manager(&transport, key_pair());
    transport.push_result(Call::Token, Err(network_error()));
    assert!(matches!(tokens.token().await, Err(Error::Auth { status: None, .. })));
}
