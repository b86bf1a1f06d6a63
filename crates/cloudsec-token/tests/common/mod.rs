//! Common test utilities for integration tests
//!
//! Signing keys, token minting and a mock identity service publishing
//! token keys and OIDC discovery documents.

#![allow(dead_code)]

use std::sync::LazyLock;
use std::sync::atomic::{AtomicUsize, Ordering};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use cloudsec_token::{ValidationListener, ValidationResult};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use p256::elliptic_curve::sec1::ToEncodedPoint;
use rsa::RsaPrivateKey;
use rsa::pkcs1::EncodeRsaPrivateKey;
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use serde_json::{Value, json};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CLIENT_ID: &str = "sb-app!t1";
pub const KEY_ID: &str = "key-id-1";
pub const TOKEN_KEYS_PATH: &str = "/token_keys";
pub const CERTS_PATH: &str = "/oauth2/certs";
pub const DISCOVERY_PATH: &str = "/.well-known/openid-configuration";

/// RSA key shared by all tests; generation is slow
pub static RSA_KEY: LazyLock<RsaPrivateKey> = LazyLock::new(|| {
    RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("RSA key generation")
});

/// EC key shared by all tests
pub static EC_KEY: LazyLock<p256::SecretKey> =
    LazyLock::new(|| p256::SecretKey::random(&mut rand::thread_rng()));

/// Current time in seconds since the epoch
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Public key of [`RSA_KEY`] as a JWK
pub fn rsa_jwk(kid: &str) -> Value {
    let public = RSA_KEY.to_public_key();
    json!({
        "kty": "RSA",
        "kid": kid,
        "alg": "RS256",
        "use": "sig",
        "n": URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
        "e": URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
    })
}

/// Public key of [`RSA_KEY`] as PEM SubjectPublicKeyInfo
pub fn rsa_public_pem() -> String {
    RSA_KEY
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .expect("encode public key")
}

/// Public key of [`EC_KEY`] as a JWK
pub fn ec_jwk(kid: &str) -> Value {
    let point = EC_KEY.public_key().to_encoded_point(false);
    json!({
        "kty": "EC",
        "kid": kid,
        "alg": "ES256",
        "crv": "P-256",
        "x": URL_SAFE_NO_PAD.encode(point.x().expect("uncompressed point")),
        "y": URL_SAFE_NO_PAD.encode(point.y().expect("uncompressed point")),
    })
}

pub fn key_set(keys: &[Value]) -> Value {
    json!({ "keys": keys })
}

/// RS256 token signed with [`RSA_KEY`]
pub fn mint_rs256(kid: Option<&str>, jku: Option<&str>, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::RS256);
    header.kid = kid.map(str::to_string);
    header.jku = jku.map(str::to_string);
    let pem = RSA_KEY.to_pkcs1_pem(LineEnding::LF).expect("encode private key");
    let key = EncodingKey::from_rsa_pem(pem.as_bytes()).expect("encoding key");
    jsonwebtoken::encode(&header, claims, &key).expect("sign token")
}

/// ES256 token signed with [`EC_KEY`]
pub fn mint_es256(kid: Option<&str>, claims: &Value) -> String {
    let mut header = Header::new(Algorithm::ES256);
    header.kid = kid.map(str::to_string);
    let pem = EC_KEY.to_pkcs8_pem(LineEnding::LF).expect("encode private key");
    let key = EncodingKey::from_ec_pem(pem.as_bytes()).expect("encoding key");
    jsonwebtoken::encode(&header, claims, &key).expect("sign token")
}

/// XSUAA claims that pass every check for [`CLIENT_ID`]
pub fn xsuaa_claims() -> Value {
    json!({
        "iss": "http://localhost/uaa/oauth/token",
        "aud": [CLIENT_ID, "openid"],
        "cid": CLIENT_ID,
        "zid": "zone-1",
        "exp": now() + 300,
        "iat": now() - 10,
        "scope": ["openid", "app!t1.Read"],
    })
}

/// Mock identity service
pub struct MockIdentityService {
    pub server: MockServer,
}

impl MockIdentityService {
    pub async fn start() -> Self {
        Self {
            server: MockServer::start().await,
        }
    }

    /// Base URL, e.g. `http://127.0.0.1:4242`
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// `host:port`, usable as trusted domain
    pub fn authority(&self) -> String {
        self.uri().trim_start_matches("http://").to_string()
    }

    pub fn token_keys_url(&self) -> String {
        format!("{}{TOKEN_KEYS_PATH}", self.uri())
    }

    /// Serve `keys` at `/token_keys`, expecting exactly `calls` requests
    pub async fn mount_token_keys(&self, keys: Value, calls: u64) {
        Mock::given(method("GET"))
            .and(path(TOKEN_KEYS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(keys))
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    /// Publish a discovery document pointing at `/oauth2/certs` serving `keys`
    pub async fn mount_discovery(&self, keys: Value, calls: u64) {
        Mock::given(method("GET"))
            .and(path(DISCOVERY_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "issuer": self.uri(),
                "jwks_uri": format!("{}{CERTS_PATH}", self.uri()),
            })))
            .expect(calls)
            .mount(&self.server)
            .await;
        Mock::given(method("GET"))
            .and(path(CERTS_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(keys))
            .expect(calls)
            .mount(&self.server)
            .await;
    }

    /// Answer `/token_keys` with `status`, expecting exactly `calls` requests
    pub async fn mount_token_keys_failure(&self, status: u16, calls: u64) {
        Mock::given(method("GET"))
            .and(path(TOKEN_KEYS_PATH))
            .respond_with(ResponseTemplate::new(status))
            .up_to_n_times(calls)
            .expect(calls)
            .mount(&self.server)
            .await;
    }
}

/// Run blocking validation code off the async test runtime
pub async fn blocking<F, R>(f: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .expect("blocking task panicked")
}

/// Listener counting notifications
#[derive(Debug, Default)]
pub struct CountingListener {
    pub successes: AtomicUsize,
    pub failures: AtomicUsize,
}

impl CountingListener {
    pub fn successes(&self) -> usize {
        self.successes.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }
}

impl ValidationListener for CountingListener {
    fn on_validation_error(&self, _result: &ValidationResult) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }

    fn on_validation_success(&self) {
        self.successes.fetch_add(1, Ordering::SeqCst);
    }
}
