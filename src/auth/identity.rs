use super::claims::{ClaimSource, claim_keys};
use super::resolver::{resolve_display_name, resolve_email};
use crate::config::AuthConfig;

/// Attributes of the authenticated principal, resolved once per request
#[derive(Debug, Clone)]
pub struct Identity {
    /// Display name per the resolution order (may fall back to email)
    pub display_name: Option<String>,
    /// Resolved email; identifies ownership of change requests
    pub email: Option<String>,
    /// Raw group-bearing claim values: role claims plus every configured
    /// group claim key, unexpanded
    pub group_values: Vec<String>,
}

impl Identity {
    /// Resolve an identity from a claim source using the configured probe
    /// orders.
    pub fn from_claims(source: &dyn ClaimSource, config: &AuthConfig) -> Self {
        let email = resolve_email(source);
        let display_name = resolve_display_name(source, &config.preferred_name_claims);

        let mut group_values = Vec::new();
        let mut push_values = |values: Vec<String>| {
            for value in values {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    group_values.push(trimmed.to_string());
                }
            }
        };
        push_values(source.values_for(claim_keys::ROLE));
        for key in &config.group_claim_keys {
            push_values(source.values_for(key));
        }

        Self {
            display_name,
            email,
            group_values,
        }
    }

    /// Label recorded in `updated_by` and audit actor fields: email when
    /// present, otherwise the display name.
    pub fn actor(&self) -> Option<String> {
        self.email.clone().or_else(|| self.display_name.clone())
    }

    /// Whether this principal submitted the request owned by `requestor_email`.
    pub fn owns(&self, requestor_email: &str) -> bool {
        self.email
            .as_deref()
            .is_some_and(|email| email.eq_ignore_ascii_case(requestor_email))
    }
}

/// Request extension carrying the resolved principal and its policy decisions
#[derive(Debug, Clone)]
pub struct AuthContext {
    pub identity: Identity,
    pub is_approver: bool,
}
