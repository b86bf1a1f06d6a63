//! Trusted issuer guard
//!
//! Tokens name the place their verification keys come from: XSUAA tokens in
//! the `jku` header, IAS tokens through their issuer and OIDC discovery. A
//! forged token can point those anywhere, so before anything is fetched the
//! URL must belong to one of the configured trusted domains.
//!
//! ## Matching rules
//!
//! - The URL is parsed (WHATWG rules) and only its host is compared; user
//!   info, path and query never decide trust.
//! - A host is trusted when it equals a domain or ends with `.` + domain.
//! - A domain that carries a port (`localhost:4242`) is compared against
//!   `host:port`, where a URL without a port uses the scheme default.
//! - Key endpoints must additionally look like a key endpoint: `http(s)`,
//!   path ending in `token_keys`, no query, no fragment, no `@` and no empty
//!   path segment. This rejects URLs that smuggle a second authority into
//!   the path.

use tracing::{debug, warn};
use url::Url;

use crate::config::Service;
use crate::error::ValidationError;
use crate::token::{Token, claims};
use crate::validation::{ValidationResult, Validator};

/// Path suffix of XSUAA key endpoints
pub const TOKEN_KEYS_PATH: &str = "token_keys";

/// Decides whether issuer and key URLs belong to trusted domains
#[derive(Debug, Clone)]
pub struct TrustedIssuerGuard {
    domains: Vec<String>,
    service: Service,
}

impl TrustedIssuerGuard {
    /// Guard for `service` trusting `domains` (case-insensitive)
    pub fn new<I, S>(service: Service, domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let domains = domains
            .into_iter()
            .map(|d| normalize_domain(d.as_ref()))
            .filter(|d| !d.is_empty())
            .collect();
        Self { domains, service }
    }

    /// Trusted domains, normalized
    pub fn domains(&self) -> &[String] {
        &self.domains
    }

    /// Whether the host of `url` is inside a trusted domain
    pub fn is_trusted_host(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        let authority = match url.port_or_known_default() {
            Some(port) => format!("{host}:{port}"),
            None => host.clone(),
        };
        self.domains.iter().any(|domain| {
            let candidate = if domain.contains(':') { &authority } else { &host };
            is_within(candidate, domain)
        })
    }

    /// Accept `jku` only when it is a key endpoint inside a trusted domain.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UntrustedIssuer`] for unparsable URLs,
    /// untrusted hosts and URLs that are not shaped like a key endpoint.
    pub fn check_key_url(&self, jku: &str) -> Result<Url, ValidationError> {
        let url = Url::parse(jku.trim()).map_err(|e| {
            ValidationError::UntrustedIssuer(format!("'jku' is not a valid URL ({e})"))
        })?;
        self.require_trusted_host(&url, claims::JKU)?;

        if let Some(reason) = key_endpoint_violation(&url) {
            warn!(host = url.host_str().unwrap_or_default(), reason, "Rejected token key URL");
            return Err(ValidationError::UntrustedIssuer(format!(
                "'jku' does not reference a token key endpoint: {reason}"
            )));
        }
        Ok(url)
    }

    /// Accept an issuer only when it is an `http(s)` URL inside a trusted domain.
    ///
    /// Bare host names are read as `https://{issuer}`.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::UntrustedIssuer`] for unparsable issuers,
    /// unsupported schemes and untrusted hosts.
    pub fn check_issuer(&self, issuer: &str) -> Result<Url, ValidationError> {
        let issuer = issuer.trim();
        let candidate = if issuer.contains("://") {
            issuer.to_string()
        } else {
            format!("https://{issuer}")
        };
        let url = Url::parse(&candidate).map_err(|e| {
            ValidationError::UntrustedIssuer(format!("issuer is not a valid URL ({e})"))
        })?;
        if url.query().is_some() || url.fragment().is_some() {
            return Err(ValidationError::UntrustedIssuer(
                "issuer must not contain a query or fragment".into(),
            ));
        }
        self.require_trusted_host(&url, claims::ISS)?;
        Ok(url)
    }

    fn require_trusted_host(&self, url: &Url, what: &str) -> Result<(), ValidationError> {
        if !matches!(url.scheme(), "https" | "http") {
            return Err(ValidationError::UntrustedIssuer(format!(
                "'{what}' uses unsupported scheme '{}'",
                url.scheme()
            )));
        }
        if self.is_trusted_host(url) {
            return Ok(());
        }
        let host = url.host_str().unwrap_or_default();
        warn!(host, claim = what, "Untrusted host in token");
        Err(ValidationError::UntrustedIssuer(format!(
            "host '{host}' of '{what}' is not within the trusted domains {:?}",
            self.domains
        )))
    }
}

impl Validator<Token> for TrustedIssuerGuard {
    fn validate(&self, token: &Token) -> ValidationResult {
        match self.service {
            // No jku: keys come from the configured url, nothing to check here
            Service::Xsuaa => match token.header_str(claims::JKU) {
                None => ValidationResult::VALID,
                Some(jku) => self.check_key_url(jku).map(|_| ()).into(),
            },
            Service::Ias => {
                let issuer = token
                    .claim_str(claims::IAS_ISS)
                    .or_else(|| token.issuer());
                match issuer {
                    None => ValidationResult::invalid(ValidationError::UntrustedIssuer(
                        "token does not contain an 'iss' claim".into(),
                    )),
                    Some(issuer) => {
                        let result = self.check_issuer(issuer).map(|_| ());
                        if result.is_ok() {
                            debug!(issuer, "Issuer is trusted");
                        }
                        result.into()
                    }
                }
            }
        }
    }

    fn name(&self) -> &str {
        "TrustedIssuerGuard"
    }
}

fn normalize_domain(domain: &str) -> String {
    let domain = domain.trim().trim_start_matches('.').to_ascii_lowercase();
    // tolerate domains configured as URLs
    match domain.split_once("://") {
        Some((_, rest)) => rest.trim_end_matches('/').to_string(),
        None => domain.trim_end_matches('/').to_string(),
    }
}

fn is_within(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn key_endpoint_violation(url: &Url) -> Option<&'static str> {
    let path = url.path();
    if url.query().is_some() {
        return Some("query parameters are not allowed");
    }
    if url.fragment().is_some() {
        return Some("fragments are not allowed");
    }
    if path.contains('@') || path.contains("%40") {
        return Some("path must not contain '@'");
    }
    if path.contains("//") {
        return Some("path must not contain empty segments");
    }
    if !path.ends_with(TOKEN_KEYS_PATH) {
        return Some("path must end with 'token_keys'");
    }
    None
}
