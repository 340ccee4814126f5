#![allow(clippy::unwrap_used)]
// Auth bridge protocol scenarios: scripted device, mocked name service,
// real ES256K tokens.

mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use k256::ecdsa::SigningKey;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use pretty_assertions::assert_eq;
use rand::rngs::OsRng;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use ryder_core::auth::address::{btc_address, did_for_address};
use ryder_core::auth::token::{public_key_hex, sign_token};
use ryder_core::bridge::{AppKeyRequest, Identity, InvalidReason};
use ryder_core::{
    AuthProtocol, BlockstackAuth, BridgeHandler, CoreError, DeviceService, HandlerSettings, Inbound,
    NameCache, Outbound,
};

use common::{FakeRyder, address_of, device_client, session};

// ── Helpers ─────────────────────────────────────────────────────────

struct Harness {
    server: MockServer,
    handler: BridgeHandler,
    fake: FakeRyder,
}

async fn harness_with(fake: FakeRyder, tolerate_redirect_mismatch: bool) -> Harness {
    let server = MockServer::start().await;
    let api_url = Url::parse(&server.uri()).unwrap();
    let (client, _session, _cancel) = device_client(&fake).await;
    let names = Arc::new(NameCache::new(
        reqwest::Client::new(),
        api_url.clone(),
        Duration::from_secs(600),
    ));
    let settings = HandlerSettings {
        bridge_url: "http://localhost:8888/".into(),
        hub_url: Url::parse("https://hub.blockstack.org").unwrap(),
        api_url,
        tolerate_redirect_mismatch,
    };
    let handler = BridgeHandler::new(client, names, Arc::new(BlockstackAuth::new()), settings);
    Harness {
        server,
        handler,
        fake,
    }
}

async fn harness(fake: FakeRyder) -> Harness {
    harness_with(fake, true).await
}

async fn mount_names(server: &MockServer, address: &str, names: &[&str]) {
    Mock::given(method("GET"))
        .and(path(format!("/v1/addresses/bitcoin/{address}")))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "names": names })))
        .mount(server)
        .await;
}

async fn events(handler: &BridgeHandler, message: Inbound) -> Vec<Outbound> {
    let (tx, mut rx) = mpsc::unbounded_channel();
    handler.handle(message, &tx).await.unwrap();
    drop(tx);
    let mut out = Vec::new();
    while let Some(event) = rx.recv().await {
        out.push(event);
    }
    out
}

fn issuer_of(key: &SigningKey) -> String {
    did_for_address(&btc_address(key.verifying_key()))
}

fn signed_request(domain_name: &str, redirect_uri: &str, issuer: Option<String>) -> String {
    let key = SigningKey::random(&mut OsRng);
    let payload = json!({
        "jti": "b0b4c5a6",
        "iat": Utc::now().timestamp() - 5,
        "exp": Utc::now().timestamp() + 600,
        "iss": issuer.unwrap_or_else(|| issuer_of(&key)),
        "domain_name": domain_name,
        "redirect_uri": redirect_uri,
        "manifest_uri": "https://app.example.com/manifest.json",
        "scopes": ["store_write"],
        "public_keys": [public_key_hex(&key)],
        "version": "1.3.1",
    });
    sign_token(&payload, &key).unwrap()
}

fn auth_request_token(redirect_uri: &str) -> String {
    signed_request("https://app.example.com", redirect_uri, None)
}

fn auth_request(query: &str) -> Inbound {
    Inbound::AuthRequest {
        data: Some(query.to_owned()),
    }
}

// ── auth_request ────────────────────────────────────────────────────

#[tokio::test]
async fn valid_auth_request_emits_decoded_token() {
    let h = harness(FakeRyder::new()).await;
    let token = auth_request_token("https://app.example.com/redirect");

    let out = events(&h.handler, auth_request(&format!("?authRequest={token}"))).await;
    assert_eq!(out.len(), 1);
    let Outbound::Auth(decoded) = &out[0] else {
        panic!("expected auth event, got: {out:?}");
    };
    assert_eq!(decoded.payload.domain_name, "https://app.example.com");
    assert_eq!(decoded.payload.extra["scopes"], json!(["store_write"]));
}

#[tokio::test]
async fn missing_data_is_reported() {
    let h = harness(FakeRyder::new()).await;
    let out = events(&h.handler, Inbound::AuthRequest { data: None }).await;
    assert_eq!(out, vec![Outbound::InvalidAuthRequest(InvalidReason::MissingData)]);
}

#[tokio::test]
async fn bad_signature_fails_verification() {
    let h = harness(FakeRyder::new()).await;
    let token = auth_request_token("https://app.example.com/redirect");
    let (body, _) = token.rsplit_once('.').unwrap();
    let forged = format!("{body}.{}", "A".repeat(86));

    let out = events(&h.handler, auth_request(&format!("authRequest={forged}"))).await;
    assert_eq!(
        out,
        vec![Outbound::InvalidAuthRequest(InvalidReason::VerificationFailed)]
    );
}

#[tokio::test]
async fn query_without_auth_request_is_ignored() {
    let h = harness(FakeRyder::new()).await;
    let out = events(&h.handler, auth_request("?foo=bar")).await;
    assert!(out.is_empty());
}

#[tokio::test]
async fn echo_redirects_with_continuation() {
    let h = harness(FakeRyder::new()).await;
    let token = auth_request_token("https://app.example.com/redirect");

    let out = events(&h.handler, auth_request(&format!("?authRequest={token}&echo=xyz"))).await;
    let [Outbound::Redirect(target)] = out.as_slice() else {
        panic!("expected one redirect, got: {out:?}");
    };
    let url = Url::parse(target).unwrap();
    assert_eq!(url.path(), "/redirect");
    let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();
    assert_eq!(pairs[0], ("echoReply".to_owned(), "xyz".to_owned()));
    assert_eq!(
        pairs[1],
        (
            "authContinuation".to_owned(),
            format!("http://localhost:8888/auth?authRequest={token}&echo=")
        )
    );
}

#[tokio::test]
async fn cross_origin_redirect_fails_verification() {
    let h = harness(FakeRyder::new()).await;
    let token = auth_request_token("https://evil.example.net/steal");

    let out = events(&h.handler, auth_request(&format!("authRequest={token}"))).await;
    assert_eq!(
        out,
        vec![Outbound::InvalidAuthRequest(InvalidReason::VerificationFailed)]
    );
}

#[tokio::test]
async fn issuer_of_another_key_fails_verification() {
    let h = harness(FakeRyder::new()).await;
    let stranger = SigningKey::random(&mut OsRng);
    let token = signed_request(
        "https://app.example.com",
        "https://app.example.com/redirect",
        Some(issuer_of(&stranger)),
    );

    let out = events(&h.handler, auth_request(&format!("authRequest={token}"))).await;
    assert_eq!(
        out,
        vec![Outbound::InvalidAuthRequest(InvalidReason::VerificationFailed)]
    );
}

#[tokio::test]
async fn redirect_outside_domain_path_is_redirected_when_tolerated() {
    let h = harness(FakeRyder::new()).await;
    let token = signed_request("https://app.example.com/app", "https://app.example.com/other", None);

    let out = events(&h.handler, auth_request(&format!("authRequest={token}"))).await;
    assert_eq!(
        out,
        vec![Outbound::Redirect("https://app.example.com/other".into())]
    );
}

#[tokio::test]
async fn redirect_outside_domain_path_is_rejected_when_strict() {
    let h = harness_with(FakeRyder::new(), false).await;
    let token = signed_request("https://app.example.com/app", "https://app.example.com/other", None);

    let out = events(&h.handler, auth_request(&format!("authRequest={token}"))).await;
    assert_eq!(
        out,
        vec![Outbound::InvalidAuthRequest(InvalidReason::RedirectMismatch)]
    );
}

#[tokio::test]
async fn auth_event_keeps_integer_claims() {
    let h = harness(FakeRyder::new()).await;
    let token = auth_request_token("https://app.example.com/redirect");

    let out = events(&h.handler, auth_request(&format!("authRequest={token}"))).await;
    let json: serde_json::Value = serde_json::from_str(&out[0].to_json().unwrap()).unwrap();
    assert!(json["data"]["payload"]["exp"].is_i64(), "exp: {}", json["data"]["payload"]["exp"]);
    assert!(json["data"]["payload"]["iat"].is_i64());
}

// ── list_identities ─────────────────────────────────────────────────

#[tokio::test]
async fn listing_stops_at_first_unnamed_identity() {
    let h = harness(FakeRyder::new()).await;
    mount_names(&h.server, &address_of(0), &["alice.id"]).await;
    mount_names(&h.server, &address_of(1), &["bob.id", "bobby.id"]).await;
    mount_names(&h.server, &address_of(2), &[]).await;

    let out = events(&h.handler, Inbound::ListIdentities).await;
    assert_eq!(
        out,
        vec![
            Outbound::Identity(Identity {
                number: 0,
                address: address_of(0),
                names: Some(vec!["alice.id".into()]),
            }),
            Outbound::Identity(Identity {
                number: 1,
                address: address_of(1),
                names: Some(vec!["bob.id".into(), "bobby.id".into()]),
            }),
        ]
    );

    // INFO, then exports for 0, 1 and 2 only.
    assert_eq!(h.fake.log().len(), 4);
}

#[tokio::test]
async fn listing_with_failing_name_service_emits_nothing() {
    let h = harness(FakeRyder::new()).await;
    let out = events(&h.handler, Inbound::ListIdentities).await;
    assert!(out.is_empty());
}

#[tokio::test]
async fn listing_without_device_service_fails() {
    let fake = FakeRyder::new();
    let session = session(&fake);
    session.open().await.unwrap();
    let cancel = CancellationToken::new();
    let (client, handle) = DeviceService::spawn(session, cancel.clone(), None);
    cancel.cancel();
    handle.await.unwrap();

    let handler = BridgeHandler::new(
        client,
        Arc::new(NameCache::new(
            reqwest::Client::new(),
            Url::parse("http://127.0.0.1:9").unwrap(),
            Duration::from_secs(600),
        )),
        Arc::new(BlockstackAuth::new()),
        HandlerSettings {
            bridge_url: "http://localhost:8888/".into(),
            hub_url: Url::parse("https://hub.blockstack.org").unwrap(),
            api_url: Url::parse("http://127.0.0.1:9").unwrap(),
            tolerate_redirect_mismatch: true,
        },
    );
    let (tx, _rx) = mpsc::unbounded_channel();
    let err = handler.handle(Inbound::ListIdentities, &tx).await.unwrap_err();
    assert!(matches!(err, CoreError::DeviceUnavailable));
}

// ── request_app_auth_private_key ────────────────────────────────────

fn app_key_request(token_public_key: String) -> Inbound {
    Inbound::RequestAppAuthPrivateKey(AppKeyRequest {
        domain_name: "https://app.example.com".into(),
        token_public_key,
        identity_public_key: "1Alice".into(),
        identity_number: 0,
    })
}

#[tokio::test]
async fn declined_app_key_emits_false() {
    let h = harness(FakeRyder::with_bundle(None)).await;
    let out = events(&h.handler, app_key_request("02aa".into())).await;
    assert_eq!(out, vec![Outbound::AppAuthPrivateKey(None)]);
}

#[tokio::test]
async fn malformed_device_reply_emits_false() {
    let h = harness(FakeRyder::with_bundle(Some("garbage".into()))).await;
    let out = events(&h.handler, app_key_request("02aa".into())).await;
    assert_eq!(out, vec![Outbound::AppAuthPrivateKey(None)]);
}

#[tokio::test]
async fn released_app_key_emits_signed_response() {
    let owner = SigningKey::random(&mut OsRng);
    let app = SigningKey::random(&mut OsRng);
    let transit = k256::SecretKey::random(&mut OsRng);
    let transit_hex = hex::encode(transit.public_key().to_encoded_point(true).as_bytes());
    let bundle = format!(
        "\u{1}\u{2}https://app.example.com,{},{},{}01",
        public_key_hex(&app),
        hex::encode(app.to_bytes()),
        hex::encode(owner.to_bytes()),
    );

    let h = harness(FakeRyder::with_bundle(Some(bundle))).await;
    mount_names(&h.server, "1Alice", &["alice.id"]).await;

    let out = events(&h.handler, app_key_request(transit_hex)).await;
    let [Outbound::AppAuthPrivateKey(Some(token))] = out.as_slice() else {
        panic!("expected a signed response, got: {out:?}");
    };

    let decoded = BlockstackAuth::new().decode(token).unwrap();
    assert_eq!(decoded.header.alg, "ES256K");
    assert_eq!(decoded.payload.public_keys, vec![public_key_hex(&owner)]);
    let claims = &decoded.payload.extra;
    assert_eq!(claims["username"], "alice.id");
    assert_eq!(claims["iss"], issuer_of(&owner));
    assert!(claims["private_key"].is_string());

    let exp = decoded.payload.exp.unwrap().as_i64().unwrap();
    let iat = decoded.payload.iat.unwrap().as_i64().unwrap();
    let days = (exp - iat) / 86_400;
    assert!((27..=31).contains(&days), "expiry {days} days out");
}
