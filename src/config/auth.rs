use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Identity and authorization configuration.
///
/// The service never authenticates principals itself. An authenticating
/// reverse proxy (Azure Easy Auth, oauth2-proxy, or similar) terminates the
/// login flow and forwards identity on every request: either a base64 JSON
/// claims document, or discrete name/email/groups headers. This section names
/// those headers, orders the claim keys consulted during resolution, and
/// holds the access and approver allow-lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Header carrying the base64-encoded JSON claims document.
    /// Preferred over discrete headers when both are present.
    #[serde(default = "default_principal_header")]
    pub principal_header: String,

    /// Header carrying the authenticated principal's identifier
    /// (typically a UPN or email). Its presence marks a request as
    /// authenticated even when no claims document is forwarded.
    #[serde(default = "default_identity_header")]
    pub identity_header: String,

    /// Header carrying the principal's email when no claims document
    /// is present.
    #[serde(default = "default_email_header")]
    pub email_header: String,

    /// Header carrying the principal's display name when no claims
    /// document is present.
    #[serde(default = "default_name_header")]
    pub name_header: String,

    /// Header carrying group memberships when no claims document is
    /// present. Accepts a JSON array or a comma-separated list.
    #[serde(default = "default_groups_header")]
    pub groups_header: String,

    /// Claim keys probed, in order, for group membership values.
    /// Role claims are always consulted in addition to these.
    #[serde(default = "default_group_claim_keys")]
    pub group_claim_keys: Vec<String>,

    /// Claim keys probed, in order, for a display name before the
    /// built-in name claim list.
    #[serde(default)]
    pub preferred_name_claims: Vec<String>,

    /// General access allow-lists. When every list is empty, any
    /// authenticated principal may use the service.
    #[serde(default)]
    pub access: AccessListConfig,

    /// Approver allow-lists. When every list is empty, nobody is an
    /// approver and no request can leave the New status.
    #[serde(default)]
    pub approvers: ApproverConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            principal_header: default_principal_header(),
            identity_header: default_identity_header(),
            email_header: default_email_header(),
            name_header: default_name_header(),
            groups_header: default_groups_header(),
            group_claim_keys: default_group_claim_keys(),
            preferred_name_claims: Vec::new(),
            access: AccessListConfig::default(),
            approvers: ApproverConfig::default(),
        }
    }
}

impl AuthConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.principal_header.trim().is_empty() {
            return Err(ConfigError::Validation(
                "auth.principal_header cannot be empty".into(),
            ));
        }
        if self.identity_header.trim().is_empty() {
            return Err(ConfigError::Validation(
                "auth.identity_header cannot be empty".into(),
            ));
        }
        Ok(())
    }

    /// Trim and case-insensitively deduplicate every allow-list.
    /// Called once at load so policy evaluation never re-normalizes.
    pub fn normalize(&mut self) {
        normalize_list(&mut self.access.allowed_group_names);
        normalize_list(&mut self.access.allowed_group_ids);
        normalize_list(&mut self.access.allowed_emails);
        normalize_list(&mut self.approvers.group_names);
        normalize_list(&mut self.approvers.group_ids);
    }
}

/// Allow-lists controlling who may use the service at all.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccessListConfig {
    /// Group display names granted general access.
    #[serde(default)]
    pub allowed_group_names: Vec<String>,

    /// Group object ids (GUIDs) granted general access.
    /// Matched before names.
    #[serde(default)]
    pub allowed_group_ids: Vec<String>,

    /// Emails granted general access regardless of group membership.
    #[serde(default)]
    pub allowed_emails: Vec<String>,
}

/// Allow-lists naming which groups hold the approver role.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApproverConfig {
    /// Group display names whose members are approvers.
    #[serde(default)]
    pub group_names: Vec<String>,

    /// Group object ids (GUIDs) whose members are approvers.
    #[serde(default)]
    pub group_ids: Vec<String>,
}

fn normalize_list(values: &mut Vec<String>) {
    let mut seen: Vec<String> = Vec::with_capacity(values.len());
    values.retain_mut(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return false;
        }
        let folded = trimmed.to_lowercase();
        if seen.contains(&folded) {
            return false;
        }
        *value = trimmed.to_string();
        seen.push(folded);
        true
    });
}

fn default_principal_header() -> String {
    "X-MS-CLIENT-PRINCIPAL".to_string()
}

fn default_identity_header() -> String {
    "X-MS-CLIENT-PRINCIPAL-NAME".to_string()
}

fn default_email_header() -> String {
    "X-Auth-Request-Email".to_string()
}

fn default_name_header() -> String {
    "X-Auth-Request-User".to_string()
}

fn default_groups_header() -> String {
    "X-Auth-Request-Groups".to_string()
}

fn default_group_claim_keys() -> Vec<String> {
    vec!["groups".to_string(), "roles".to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AuthConfig::default();
        assert_eq!(config.principal_header, "X-MS-CLIENT-PRINCIPAL");
        assert_eq!(config.identity_header, "X-MS-CLIENT-PRINCIPAL-NAME");
        assert_eq!(config.group_claim_keys, vec!["groups", "roles"]);
        assert!(config.preferred_name_claims.is_empty());
        assert!(config.access.allowed_group_names.is_empty());
        assert!(config.approvers.group_names.is_empty());
    }

    #[test]
    fn test_parse_full_section() {
        let config: AuthConfig = toml::from_str(
            r#"
            principal_header = "X-Principal"
            group_claim_keys = ["groups"]
            preferred_name_claims = ["nickname"]

            [access]
            allowed_group_names = ["Change Users"]
            allowed_emails = ["ada@example.com"]

            [approvers]
            group_names = ["Change Approvers"]
            group_ids = ["d3b07384-d9a0-4c9e-8f5e-2c1a5d6e7f80"]
            "#,
        )
        .unwrap();

        assert_eq!(config.principal_header, "X-Principal");
        // Unspecified headers keep their defaults
        assert_eq!(config.identity_header, "X-MS-CLIENT-PRINCIPAL-NAME");
        assert_eq!(config.preferred_name_claims, vec!["nickname"]);
        assert_eq!(config.access.allowed_group_names, vec!["Change Users"]);
        assert_eq!(config.approvers.group_names, vec!["Change Approvers"]);
    }

    #[test]
    fn test_validate_rejects_empty_identity_header() {
        let config = AuthConfig {
            identity_header: "  ".to_string(),
            ..AuthConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_empty_principal_header() {
        let config = AuthConfig {
            principal_header: String::new(),
            ..AuthConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_normalize_trims_and_dedupes_case_insensitively() {
        let mut config = AuthConfig {
            approvers: ApproverConfig {
                group_names: vec![
                    "  Change Approvers ".to_string(),
                    "change approvers".to_string(),
                    "".to_string(),
                    "Ops".to_string(),
                ],
                group_ids: vec![],
            },
            ..AuthConfig::default()
        };
        config.normalize();
        assert_eq!(
            config.approvers.group_names,
            vec!["Change Approvers", "Ops"]
        );
    }

    #[test]
    fn test_normalize_keeps_first_spelling() {
        let mut config = AuthConfig {
            access: AccessListConfig {
                allowed_emails: vec![
                    "Ada@Example.com".to_string(),
                    "ada@example.com".to_string(),
                ],
                ..AccessListConfig::default()
            },
            ..AuthConfig::default()
        };
        config.normalize();
        assert_eq!(config.access.allowed_emails, vec!["Ada@Example.com"]);
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result = toml::from_str::<AuthConfig>("api_key_header = \"X-Api-Key\"");
        assert!(result.is_err());
    }
}
