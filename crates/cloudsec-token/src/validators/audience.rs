//! Audience and client id check
//!
//! The audiences of a token are collected from:
//!
//! - `aud`, where `app.scope`-style entries are trimmed to `app`
//! - the authorized party (`azp`); `cid` alone is not an audience
//! - for XSUAA tokens without `aud`, the app prefix of each `scope`
//!
//! The token is accepted when one of them is a trusted client id, or when a
//! trusted id of a broker plan (`!b`) is the suffix `|{id}` of an XSUAA
//! audience (a clone instance of the broker).

use tracing::debug;

use crate::config::{Service, TrustConfiguration};
use crate::error::ValidationError;
use crate::token::{Token, claims};
use crate::validation::{ValidationResult, Validator};

const BROKER_PLAN_MARKER: &str = "!b";

/// Accepts tokens issued for one of the trusted client ids
#[derive(Debug, Clone)]
pub struct AudienceValidator {
    service: Service,
    trusted_client_ids: Vec<String>,
}

impl AudienceValidator {
    /// Validator for `service` trusting `client_ids`
    pub fn new<I, S>(service: Service, client_ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut validator = Self {
            service,
            trusted_client_ids: Vec::new(),
        };
        for id in client_ids {
            validator = validator.with_trusted_client_id(id);
        }
        validator
    }

    /// Validator trusting the client ids of `config`
    pub fn from_configuration(config: &TrustConfiguration) -> Self {
        Self::new(config.service, config.trusted_client_ids())
    }

    /// Trust another client id
    pub fn with_trusted_client_id(mut self, client_id: impl Into<String>) -> Self {
        let client_id = client_id.into().trim().to_string();
        if !client_id.is_empty() && !self.trusted_client_ids.contains(&client_id) {
            self.trusted_client_ids.push(client_id);
        }
        self
    }

    /// Trusted client ids
    pub fn trusted_client_ids(&self) -> &[String] {
        &self.trusted_client_ids
    }

    /// Audiences the token can be matched with
    pub fn token_audiences(&self, token: &Token) -> Vec<String> {
        let mut audiences: Vec<String> = Vec::new();
        let mut add = |audience: &str| {
            let audience = audience.trim();
            if !audience.is_empty() && !audiences.iter().any(|a| a == audience) {
                audiences.push(audience.to_string());
            }
        };

        let aud = token.audiences();
        for audience in &aud {
            add(trim_namespace(audience));
        }
        if aud.is_empty() && self.service == Service::Xsuaa {
            for scope in token.scopes() {
                if let Some((app, _)) = scope.split_once('.') {
                    add(app);
                }
            }
        }
        if let Some(azp) = token.claim_str(claims::AZP) {
            add(azp);
        }
        audiences
    }

    fn is_trusted(&self, audience: &str) -> bool {
        self.trusted_client_ids.iter().any(|id| {
            audience == id
                || (self.service == Service::Xsuaa
                    && id.contains(BROKER_PLAN_MARKER)
                    && audience
                        .strip_suffix(id.as_str())
                        .is_some_and(|rest| rest.ends_with('|')))
        })
    }
}

impl Validator<Token> for AudienceValidator {
    fn validate(&self, token: &Token) -> ValidationResult {
        let audiences = self.token_audiences(token);
        if let Some(matched) = audiences.iter().find(|a| self.is_trusted(a)) {
            debug!(audience = %matched, "Token audience is trusted");
            return ValidationResult::VALID;
        }
        ValidationResult::invalid(ValidationError::AudienceMismatch(format!(
            "Jwt token with audience {audiences:?} is not issued for these clientIds: {:?}",
            self.trusted_client_ids
        )))
    }

    fn name(&self) -> &str {
        "AudienceValidator"
    }
}

fn trim_namespace(audience: &str) -> &str {
    match audience.split_once('.') {
        Some((app, _)) => app,
        None => audience,
    }
}
