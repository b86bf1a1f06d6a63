//! End-to-end validation against a mock identity service
//!
//! Tests cover:
//! - RS256 (XSUAA) and ES256 (IAS) tokens with keys fetched over HTTP
//! - Key caching: one fetch per key set within the TTL
//! - Expired, foreign-audience and tampered tokens
//! - Unknown keys and failing key endpoints (retryable)
//! - Offline mode and verification-key fallback
//! - Tokens bound to a client certificate
//! - Listener notification

mod common;

use std::sync::Arc;
use std::time::Duration;

use cloudsec_token::{
    CacheConfiguration, Service, Token, TrustConfiguration, ValidationError, Validator,
    ValidatorBuilder, X5tValidator, certificate_thumbprint,
};
use common::{
    CLIENT_ID, CountingListener, KEY_ID, MockIdentityService, blocking, ec_jwk, key_set,
    mint_es256, mint_rs256, now, rsa_jwk, rsa_public_pem, xsuaa_claims,
};
use serde_json::json;
use url::Url;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

fn xsuaa_config(identity: &MockIdentityService) -> TrustConfiguration {
    TrustConfiguration::builder(Service::Xsuaa)
        .client_id(CLIENT_ID)
        .app_id("app!t1")
        .url(Url::parse(&identity.uri()).unwrap())
        .domain(identity.authority())
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_rs256_token_is_valid_and_keys_are_cached() {
    // GIVEN: an identity service publishing the signing key
    let identity = MockIdentityService::start().await;
    identity.mount_token_keys(key_set(&[rsa_jwk(KEY_ID)]), 1).await;
    let config = xsuaa_config(&identity);
    let jku = identity.token_keys_url();

    // WHEN: two tokens are validated by the same chain
    let results = blocking(move || {
        let chain = ValidatorBuilder::new(config).build().unwrap();
        let first = Token::decode(&mint_rs256(Some(KEY_ID), Some(jku.as_str()), &xsuaa_claims())).unwrap();
        let mut claims = xsuaa_claims();
        claims["user_name"] = json!("second-user");
        let second = Token::decode(&mint_rs256(Some(KEY_ID), Some(jku.as_str()), &claims)).unwrap();
        (chain.validate(&first), chain.validate(&second))
    })
    .await;

    // THEN: both are valid and the key set was fetched once
    assert!(results.0.is_valid(), "{:?}", results.0.error_description());
    assert!(results.1.is_valid(), "{:?}", results.1.error_description());
}

#[tokio::test]
async fn test_token_without_jku_uses_configured_url() {
    let identity = MockIdentityService::start().await;
    identity.mount_token_keys(key_set(&[rsa_jwk(KEY_ID)]), 1).await;
    let config = xsuaa_config(&identity);

    let result = blocking(move || {
        let chain = ValidatorBuilder::new(config).build().unwrap();
        chain.validate(&Token::decode(&mint_rs256(Some(KEY_ID), None, &xsuaa_claims())).unwrap())
    })
    .await;

    assert!(result.is_valid(), "{:?}", result.error_description());
}

#[tokio::test]
async fn test_token_without_kid_uses_default_key() {
    let identity = MockIdentityService::start().await;
    let mut jwk = rsa_jwk(KEY_ID);
    jwk.as_object_mut().unwrap().remove("kid");
    identity.mount_token_keys(key_set(&[jwk]), 1).await;
    let config = xsuaa_config(&identity);

    let result = blocking(move || {
        let chain = ValidatorBuilder::new(config).build().unwrap();
        chain.validate(&Token::decode(&mint_rs256(None, None, &xsuaa_claims())).unwrap())
    })
    .await;

    assert!(result.is_valid(), "{:?}", result.error_description());
}

#[tokio::test]
async fn test_es256_ias_token_with_discovery() {
    // GIVEN: an IAS tenant with OIDC discovery
    let identity = MockIdentityService::start().await;
    identity.mount_discovery(key_set(&[ec_jwk("ec-key")]), 1).await;
    let config = TrustConfiguration::builder(Service::Ias)
        .client_id("ias-client")
        .url(Url::parse(&identity.uri()).unwrap())
        .domain(identity.authority())
        .build()
        .unwrap();
    let claims = json!({
        "iss": identity.uri(),
        "aud": "ias-client",
        "app_tid": "tenant-1",
        "exp": now() + 300,
    });

    // WHEN: the token is validated twice
    let results = blocking(move || {
        let chain = ValidatorBuilder::new(config).build().unwrap();
        let token = Token::decode(&mint_es256(Some("ec-key"), &claims)).unwrap();
        (chain.validate(&token), chain.validate(&token))
    })
    .await;

    // THEN: discovery and key download happened once
    assert!(results.0.is_valid(), "{:?}", results.0.error_description());
    assert!(results.1.is_valid());
}

#[tokio::test]
async fn test_ias_token_of_untrusted_issuer() {
    let identity = MockIdentityService::start().await;
    identity.mount_discovery(key_set(&[ec_jwk("ec-key")]), 0).await;
    let config = TrustConfiguration::builder(Service::Ias)
        .client_id("ias-client")
        .domain("accounts.example.com")
        .build()
        .unwrap();
    let claims = json!({
        "iss": identity.uri(),
        "aud": "ias-client",
        "app_tid": "tenant-1",
        "exp": now() + 300,
    });

    let result = blocking(move || {
        let chain = ValidatorBuilder::new(config).build().unwrap();
        chain.validate(&Token::decode(&mint_es256(Some("ec-key"), &claims)).unwrap())
    })
    .await;

    assert!(matches!(result.error(), Some(ValidationError::UntrustedIssuer(_))));
}

#[tokio::test]
async fn test_expired_token() {
    let identity = MockIdentityService::start().await;
    identity.mount_token_keys(key_set(&[rsa_jwk(KEY_ID)]), 1).await;
    let config = xsuaa_config(&identity);
    let mut claims = xsuaa_claims();
    claims["exp"] = json!(now() - 60);
    claims["iat"] = json!(now() - 3600);

    let result = blocking(move || {
        let chain = ValidatorBuilder::new(config).build().unwrap();
        chain.validate(&Token::decode(&mint_rs256(Some(KEY_ID), None, &claims)).unwrap())
    })
    .await;

    assert!(matches!(result.error(), Some(ValidationError::ExpiredToken(_))));
    assert!(result.error_description().unwrap().contains("expired"));
    assert!(!result.is_retryable());
}

#[tokio::test]
async fn test_leeway_accepts_recently_expired_token() {
    let identity = MockIdentityService::start().await;
    identity.mount_token_keys(key_set(&[rsa_jwk(KEY_ID)]), 1).await;
    let config = xsuaa_config(&identity);
    let mut claims = xsuaa_claims();
    claims["exp"] = json!(now() - 5);

    let result = blocking(move || {
        let chain = ValidatorBuilder::new(config)
            .with_leeway(Duration::from_secs(60))
            .build()
            .unwrap();
        chain.validate(&Token::decode(&mint_rs256(Some(KEY_ID), None, &claims)).unwrap())
    })
    .await;

    assert!(result.is_valid(), "{:?}", result.error_description());
}

#[tokio::test]
async fn test_foreign_audience() {
    let identity = MockIdentityService::start().await;
    identity.mount_token_keys(key_set(&[rsa_jwk(KEY_ID)]), 1).await;
    let config = xsuaa_config(&identity);
    let claims = json!({
        "aud": ["sb-other!t9"],
        "cid": "sb-other!t9",
        "exp": now() + 300,
    });

    let result = blocking(move || {
        let chain = ValidatorBuilder::new(config).build().unwrap();
        chain.validate(&Token::decode(&mint_rs256(Some(KEY_ID), None, &claims)).unwrap())
    })
    .await;

    assert!(matches!(result.error(), Some(ValidationError::AudienceMismatch(_))));
}

#[tokio::test]
async fn test_tampered_signature() {
    // GIVEN: the payload of one token combined with the signature of another
    let identity = MockIdentityService::start().await;
    identity.mount_token_keys(key_set(&[rsa_jwk(KEY_ID)]), 1).await;
    let config = xsuaa_config(&identity);

    let genuine = mint_rs256(Some(KEY_ID), None, &xsuaa_claims());
    let mut elevated = xsuaa_claims();
    elevated["scope"] = json!(["app!t1.Admin"]);
    let other = mint_rs256(Some(KEY_ID), None, &elevated);
    let (other_content, _) = other.rsplit_once('.').unwrap();
    let (_, genuine_signature) = genuine.rsplit_once('.').unwrap();
    let forged = format!("{other_content}.{genuine_signature}");

    let result = blocking(move || {
        let chain = ValidatorBuilder::new(config).build().unwrap();
        chain.validate(&Token::decode(&forged).unwrap())
    })
    .await;

    // THEN: the signature check fails for good and the error leaks no token text
    let error = result.error().unwrap();
    assert!(matches!(error, ValidationError::SignatureMismatch(_)));
    assert!(!result.is_retryable());
    assert!(!error.to_string().contains(genuine_signature));
}

#[tokio::test]
async fn test_unknown_kid_is_retryable() {
    let identity = MockIdentityService::start().await;
    identity.mount_token_keys(key_set(&[rsa_jwk("rotated-key")]), 1).await;
    let config = xsuaa_config(&identity);

    let result = blocking(move || {
        let chain = ValidatorBuilder::new(config).build().unwrap();
        chain.validate(&Token::decode(&mint_rs256(Some(KEY_ID), None, &xsuaa_claims())).unwrap())
    })
    .await;

    assert!(matches!(result.error(), Some(ValidationError::KeyResolution(_))));
    assert!(result.is_retryable());
}

#[tokio::test]
async fn test_failed_fetch_does_not_poison_cache() {
    // GIVEN: a key endpoint that fails once, then recovers
    let identity = MockIdentityService::start().await;
    identity.mount_token_keys_failure(503, 1).await;
    identity.mount_token_keys(key_set(&[rsa_jwk(KEY_ID)]), 1).await;
    let config = xsuaa_config(&identity);

    let results = blocking(move || {
        let chain = ValidatorBuilder::new(config).build().unwrap();
        let token = Token::decode(&mint_rs256(Some(KEY_ID), None, &xsuaa_claims())).unwrap();
        (chain.validate(&token), chain.validate(&token))
    })
    .await;

    // THEN: the first attempt is retryable and the retry succeeds
    assert!(results.0.is_retryable());
    assert!(results.1.is_valid(), "{:?}", results.1.error_description());
}

#[tokio::test]
async fn test_zone_is_forwarded_and_checked() {
    let identity = MockIdentityService::start().await;
    Mock::given(method("GET"))
        .and(path(common::TOKEN_KEYS_PATH))
        .and(header("x-zone_uuid", "zone-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(key_set(&[rsa_jwk(KEY_ID)])))
        .expect(1)
        .mount(&identity.server)
        .await;
    let mut config = xsuaa_config(&identity);
    config.zone_id = Some("zone-1".into());

    let mut foreign = xsuaa_claims();
    foreign["zid"] = json!("zone-2");

    let results = blocking(move || {
        let chain = ValidatorBuilder::new(config).build().unwrap();
        let own = Token::decode(&mint_rs256(Some(KEY_ID), None, &xsuaa_claims())).unwrap();
        let foreign = Token::decode(&mint_rs256(Some(KEY_ID), None, &foreign)).unwrap();
        (chain.validate(&own), chain.validate(&foreign))
    })
    .await;

    assert!(results.0.is_valid(), "{:?}", results.0.error_description());
    // zone-2 keys are requested with their own header and never served
    assert!(results.1.is_erroneous());
}

#[tokio::test]
async fn test_offline_mode() {
    let config = TrustConfiguration::builder(Service::Xsuaa)
        .client_id(CLIENT_ID)
        .domain("auth.example.com")
        .verification_key(rsa_public_pem())
        .build()
        .unwrap();

    let results = blocking(move || {
        let chain = ValidatorBuilder::new(config).offline().build().unwrap();
        // jku is ignored offline
        let token = Token::decode(&mint_rs256(
            Some(KEY_ID),
            Some("https://evil.example.org/token_keys"),
            &xsuaa_claims(),
        ))
        .unwrap();
        let foreign = Token::decode(&mint_es256(None, &xsuaa_claims())).unwrap();
        (chain.validate(&token), chain.validate(&foreign))
    })
    .await;

    assert!(results.0.is_valid(), "{:?}", results.0.error_description());
    assert!(matches!(results.1.error(), Some(ValidationError::SignatureMismatch(_))));
}

#[tokio::test]
async fn test_verification_key_fallback() {
    let identity = MockIdentityService::start().await;
    identity.mount_token_keys_failure(500, 1).await;
    let mut config = xsuaa_config(&identity);
    config.verification_key = Some(rsa_public_pem());

    let result = blocking(move || {
        let chain = ValidatorBuilder::new(config).build().unwrap();
        chain.validate(&Token::decode(&mint_rs256(Some(KEY_ID), None, &xsuaa_claims())).unwrap())
    })
    .await;

    assert!(result.is_valid(), "{:?}", result.error_description());
}

#[tokio::test]
async fn test_listeners_are_notified() {
    let identity = MockIdentityService::start().await;
    identity.mount_token_keys(key_set(&[rsa_jwk(KEY_ID)]), 1).await;
    let config = xsuaa_config(&identity);
    let listener = Arc::new(CountingListener::default());
    let registered = Arc::clone(&listener);

    blocking(move || {
        let chain = ValidatorBuilder::new(config)
            .with_listener(registered)
            .with_cache_configuration(CacheConfiguration::new(Duration::from_secs(600), 10))
            .build()
            .unwrap();
        let valid = Token::decode(&mint_rs256(Some(KEY_ID), None, &xsuaa_claims())).unwrap();
        let mut claims = xsuaa_claims();
        claims["exp"] = json!(now() - 60);
        let expired = Token::decode(&mint_rs256(Some(KEY_ID), None, &claims)).unwrap();

        let _ = chain.validate(&valid);
        let _ = chain.validate(&expired);
        let _ = chain.validate(&valid);
    })
    .await;

    assert_eq!(listener.successes(), 2);
    assert_eq!(listener.failures(), 1);
}

#[tokio::test]
async fn test_certificate_bound_token() {
    // GIVEN: a token bound to the caller's client certificate (one key fetch per chain)
    let identity = MockIdentityService::start().await;
    identity.mount_token_keys(key_set(&[rsa_jwk(KEY_ID)]), 2).await;
    let config = xsuaa_config(&identity);
    let caller = "-----BEGIN CERTIFICATE-----\nMAMCAQA=\n-----END CERTIFICATE-----";
    let mut claims = xsuaa_claims();
    claims["cnf"] = json!({"x5t#S256": certificate_thumbprint(&[0x30, 0x03, 0x02, 0x01, 0x00])});

    // WHEN: it is presented with the bound and with another certificate
    let (bound, other) = blocking(move || {
        let token = Token::decode(&mint_rs256(Some(KEY_ID), None, &claims)).unwrap();
        let bound = ValidatorBuilder::new(config.clone())
            .with(X5tValidator::from_pem(caller).unwrap())
            .build()
            .unwrap();
        let other = ValidatorBuilder::new(config)
            .with(X5tValidator::from_pem("MAMCAQE=").unwrap())
            .build()
            .unwrap();
        (bound.validate(&token), other.validate(&token))
    })
    .await;

    // THEN: only the bound certificate is accepted
    assert!(bound.is_valid(), "{:?}", bound.error_description());
    assert!(matches!(other.error(), Some(ValidationError::CertificateMismatch(_))));
    assert!(!other.is_retryable());
}
