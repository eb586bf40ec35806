use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use http::HeaderMap;
use serde::Deserialize;

use super::error::AuthError;
use crate::config::AuthConfig;

/// Well-known claim keys carried by identity tokens. Auth proxies in front of
/// this service forward XML-identity claim URIs alongside bare OIDC names, so
/// both vocabularies appear here.
pub mod claim_keys {
    pub const ROLE: &str = "http://schemas.microsoft.com/ws/2008/06/identity/claims/role";
    pub const NAME: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/name";
    pub const GIVEN_NAME: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/givenname";
    pub const SURNAME: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/surname";
    pub const EMAIL: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/emailaddress";
    pub const UPN: &str = "http://schemas.xmlsoap.org/ws/2005/05/identity/claims/upn";
    pub const DISPLAY_NAME: &str = "http://schemas.microsoft.com/identity/claims/displayname";
    pub const DISPLAY_NAME_2008: &str =
        "http://schemas.microsoft.com/ws/2008/06/identity/claims/displayname";
}

/// Any key to multi-value identity attribute provider.
///
/// Two sources exist: the claims document an auth proxy forwards as a base64
/// JSON header, and plain request headers mapped into the claim vocabulary.
/// Resolution and authorization code only ever sees this trait.
pub trait ClaimSource {
    /// All values carried under `key`. Key comparison is case-insensitive.
    fn values_for(&self, key: &str) -> Vec<String>;

    /// First non-blank value under `key`, trimmed.
    fn first_non_blank(&self, key: &str) -> Option<String> {
        self.values_for(key)
            .into_iter()
            .map(|v| v.trim().to_string())
            .find(|v| !v.is_empty())
    }
}

#[derive(Debug, Clone, Deserialize)]
struct PrincipalClaim {
    typ: String,
    val: String,
}

/// Wire format of the forwarded claims document. Only the claim list matters
/// here; `auth_typ`, `name_typ`, and `role_typ` ride along unused.
#[derive(Debug, Deserialize)]
struct PrincipalDocument {
    #[serde(default)]
    claims: Vec<PrincipalClaim>,
}

/// Claim source backed by the base64-encoded JSON claims document an
/// authenticating proxy forwards on every request.
#[derive(Debug, Clone)]
pub struct PrincipalClaims {
    claims: Vec<PrincipalClaim>,
}

impl PrincipalClaims {
    /// Decode a forwarded claims document header value.
    pub fn from_base64(encoded: &str) -> Result<Self, AuthError> {
        let bytes = BASE64_STANDARD
            .decode(encoded.trim())
            .map_err(|e| AuthError::InvalidPrincipal(format!("invalid base64: {}", e)))?;
        let doc: PrincipalDocument = serde_json::from_slice(&bytes)
            .map_err(|e| AuthError::InvalidPrincipal(format!("invalid JSON: {}", e)))?;
        Ok(Self { claims: doc.claims })
    }

    #[cfg(test)]
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            claims: pairs
                .iter()
                .map(|(typ, val)| PrincipalClaim {
                    typ: typ.to_string(),
                    val: val.to_string(),
                })
                .collect(),
        }
    }
}

impl ClaimSource for PrincipalClaims {
    fn values_for(&self, key: &str) -> Vec<String> {
        self.claims
            .iter()
            .filter(|c| c.typ.eq_ignore_ascii_case(key))
            .map(|c| c.val.clone())
            .collect()
    }
}

/// Claim source backed by discrete proxy headers.
///
/// The configured name/email/groups headers are mapped into the bare claim
/// vocabulary ("name", "email", "groups") so resolution works identically
/// over both sources. A groups header may carry a JSON array or a
/// comma-separated list. The identity header (usually a UPN) is mapped under
/// the UPN claim key, where email resolution probes it last.
#[derive(Debug, Clone)]
pub struct HeaderClaims {
    entries: Vec<(String, String)>,
}

impl HeaderClaims {
    pub fn from_headers(headers: &HeaderMap, config: &AuthConfig) -> Self {
        let mut entries = Vec::new();

        for value in headers.get_all(&config.identity_header) {
            if let Ok(v) = value.to_str() {
                entries.push((claim_keys::UPN.to_string(), v.to_string()));
            }
        }
        for value in headers.get_all(&config.name_header) {
            if let Ok(v) = value.to_str() {
                entries.push(("name".to_string(), v.to_string()));
            }
        }
        for value in headers.get_all(&config.email_header) {
            if let Ok(v) = value.to_str() {
                entries.push(("email".to_string(), v.to_string()));
            }
        }
        for value in headers.get_all(&config.groups_header) {
            let Ok(v) = value.to_str() else { continue };
            let groups: Vec<String> = serde_json::from_str(v)
                .unwrap_or_else(|_| v.split(',').map(|g| g.trim().to_string()).collect());
            for group in groups {
                entries.push(("groups".to_string(), group));
            }
        }

        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ClaimSource for HeaderClaims {
    fn values_for(&self, key: &str) -> Vec<String> {
        self.entries
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.clone())
            .collect()
    }
}
