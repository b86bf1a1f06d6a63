//! Zone and tenant check for multi-tenant applications

use crate::config::Service;
use crate::error::ValidationError;
use crate::token::{Token, claims};
use crate::validation::{ValidationResult, Validator};

/// Accepts only tokens of the configured zone (XSUAA `zid`) or tenant
/// (IAS `app_tid`, legacy `zone_uuid`)
#[derive(Debug, Clone)]
pub struct ZoneValidator {
    service: Service,
    zone_id: String,
}

impl ZoneValidator {
    /// Validator requiring `zone_id`
    pub fn new(service: Service, zone_id: impl Into<String>) -> Self {
        Self {
            service,
            zone_id: zone_id.into(),
        }
    }

    /// Required zone or tenant
    pub fn zone_id(&self) -> &str {
        &self.zone_id
    }

    fn token_zone<'a>(&self, token: &'a Token) -> Option<&'a str> {
        match self.service {
            Service::Xsuaa => token.claim_str(claims::ZID),
            Service::Ias => token
                .claim_str(claims::APP_TID)
                .or_else(|| token.claim_str(claims::ZONE_UUID)),
        }
    }
}

impl Validator<Token> for ZoneValidator {
    fn validate(&self, token: &Token) -> ValidationResult {
        match self.token_zone(token) {
            Some(zone) if zone == self.zone_id => ValidationResult::VALID,
            Some(zone) => ValidationResult::invalid(ValidationError::ZoneMismatch(format!(
                "token zone '{zone}' does not match the configured zone '{}'",
                self.zone_id
            ))),
            None => ValidationResult::invalid(ValidationError::ZoneMismatch(format!(
                "token carries no zone, expected '{}'",
                self.zone_id
            ))),
        }
    }

    fn name(&self) -> &str {
        "ZoneValidator"
    }
}
