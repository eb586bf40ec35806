//! Identity middleware.
//!
//! Every `/api` request passes through here. The authenticating reverse
//! proxy in front of the service terminates the login flow and forwards
//! identity on each request; this middleware resolves the principal from
//! the forwarded claims, gates general access, and stores an [`AuthContext`]
//! in request extensions for handlers.
//!
//! **Security:** identity headers are only trusted when the request
//! originates from a trusted proxy IP (configured via
//! `server.trusted_proxies`). This prevents header spoofing attacks where a
//! client connects to the service directly and forges a principal.

use std::net::IpAddr;

use axum::{
    extract::{ConnectInfo, Request, State},
    middleware::Next,
    response::Response,
};

use crate::{
    AppState,
    auth::{AuthContext, AuthError, HeaderClaims, Identity, PrincipalClaims},
    authz::AccessPolicy,
    config::ServiceConfig,
};

/// Middleware that requires an authenticated, access-listed principal.
/// Rejects requests without valid identity headers from a trusted source.
pub async fn identity_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AuthError> {
    // Extract connecting IP for trusted proxy validation
    let connecting_ip = req
        .extensions()
        .get::<ConnectInfo<std::net::SocketAddr>>()
        .map(|ci| ci.0.ip());

    let context = authenticate(req.headers(), connecting_ip, &state.config, &state.policy)?;

    tracing::debug!(
        email = ?context.identity.email,
        is_approver = context.is_approver,
        "Request authenticated"
    );

    req.extensions_mut().insert(context);
    Ok(next.run(req).await)
}

/// Resolve and authorize the principal behind a request.
///
/// Pure over its inputs so tests can drive it without a running server.
fn authenticate(
    headers: &axum::http::HeaderMap,
    connecting_ip: Option<IpAddr>,
    config: &ServiceConfig,
    policy: &AccessPolicy,
) -> Result<AuthContext, AuthError> {
    // If trusted_proxies is configured, we MUST verify the connecting IP is
    // trusted before honoring any identity header. If it is NOT configured,
    // headers are trusted from any source; config validation restricts that
    // mode to localhost binds.
    let trusted_proxies = &config.server.trusted_proxies;
    if trusted_proxies.is_configured() {
        let parsed_cidrs = trusted_proxies.parsed_cidrs();

        let is_trusted = match connecting_ip {
            Some(ip) => trusted_proxies.is_trusted_ip(ip, &parsed_cidrs),
            // No connecting IP available - only trust if dangerously_trust_all is explicitly set
            None => trusted_proxies.dangerously_trust_all,
        };

        if !is_trusted {
            if let Some(ip) = connecting_ip
                && (headers.contains_key(&config.auth.principal_header)
                    || headers.contains_key(&config.auth.identity_header))
            {
                tracing::warn!(
                    connecting_ip = %ip,
                    "Ignoring identity headers from untrusted IP - \
                     configure server.trusted_proxies to trust this source"
                );
            }
            return Err(AuthError::MissingIdentity);
        }
    }

    let identity = resolve_identity(headers, &config.auth)?;

    if !policy.allows_general_access(&identity) {
        tracing::warn!(
            email = ?identity.email,
            display_name = ?identity.display_name,
            "Principal denied by access allow-lists"
        );
        return Err(AuthError::Forbidden(
            "You are not authorized to use this service".to_string(),
        ));
    }

    let is_approver = policy.is_approver(&identity);
    Ok(AuthContext {
        identity,
        is_approver,
    })
}

/// Build an [`Identity`] from the request headers. The base64 claims
/// document is preferred; discrete headers are the fallback, where the
/// identity header's presence marks the request as authenticated.
fn resolve_identity(
    headers: &axum::http::HeaderMap,
    auth: &crate::config::AuthConfig,
) -> Result<Identity, AuthError> {
    if let Some(value) = headers.get(&auth.principal_header) {
        let encoded = value.to_str().map_err(|_| {
            AuthError::InvalidPrincipal("principal header is not valid UTF-8".to_string())
        })?;
        let claims = PrincipalClaims::from_base64(encoded)?;
        return Ok(Identity::from_claims(&claims, auth));
    }

    if !headers.contains_key(&auth.identity_header) {
        return Err(AuthError::MissingIdentity);
    }
    let claims = HeaderClaims::from_headers(headers, auth);
    Ok(Identity::from_claims(&claims, auth))
}

#[cfg(test)]
mod tests {
    use base64::Engine as _;
    use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;

    use super::*;
    use crate::config::TrustedProxiesConfig;

    fn test_config(trusted_proxies: TrustedProxiesConfig) -> ServiceConfig {
        let mut config = ServiceConfig::default();
        config.server.trusted_proxies = trusted_proxies;
        config
    }

    fn policy_for(config: &ServiceConfig) -> AccessPolicy {
        AccessPolicy::from_config(&config.auth)
    }

    fn make_headers(headers: Vec<(&str, &str)>) -> axum::http::HeaderMap {
        let mut map = axum::http::HeaderMap::new();
        for (name, value) in headers {
            map.append(
                axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
                axum::http::HeaderValue::from_str(value).unwrap(),
            );
        }
        map
    }

    fn principal_document(claims: &[(&str, &str)]) -> String {
        let claims: Vec<serde_json::Value> = claims
            .iter()
            .map(|(typ, val)| serde_json::json!({"typ": typ, "val": val}))
            .collect();
        BASE64_STANDARD.encode(
            serde_json::to_vec(&serde_json::json!({"claims": claims})).unwrap(),
        )
    }

    // ========== No trusted_proxies configured ==========

    #[test]
    fn no_proxy_config_trusts_headers_from_any_ip() {
        let config = test_config(TrustedProxiesConfig::default());
        let headers = make_headers(vec![("X-MS-CLIENT-PRINCIPAL-NAME", "alice@example.com")]);

        let context = authenticate(
            &headers,
            Some("192.168.1.100".parse().unwrap()),
            &config,
            &policy_for(&config),
        )
        .unwrap();

        assert_eq!(context.identity.email.as_deref(), Some("alice@example.com"));
        assert!(!context.is_approver);
    }

    #[test]
    fn no_proxy_config_no_connecting_ip_still_trusts_headers() {
        let config = test_config(TrustedProxiesConfig::default());
        let headers = make_headers(vec![("X-MS-CLIENT-PRINCIPAL-NAME", "bob@example.com")]);

        let context = authenticate(&headers, None, &config, &policy_for(&config)).unwrap();
        assert_eq!(context.identity.email.as_deref(), Some("bob@example.com"));
    }

    // ========== dangerously_trust_all mode ==========

    #[test]
    fn trust_all_accepts_any_ip() {
        let config = test_config(TrustedProxiesConfig {
            dangerously_trust_all: true,
            cidrs: vec![],
        });
        let headers = make_headers(vec![("X-MS-CLIENT-PRINCIPAL-NAME", "carol@example.com")]);

        let context = authenticate(
            &headers,
            Some("1.2.3.4".parse().unwrap()),
            &config,
            &policy_for(&config),
        )
        .unwrap();
        assert_eq!(context.identity.email.as_deref(), Some("carol@example.com"));
    }

    // ========== CIDR-based trust ==========

    #[test]
    fn cidr_match_trusts_headers() {
        let config = test_config(TrustedProxiesConfig {
            dangerously_trust_all: false,
            cidrs: vec!["10.0.0.0/8".to_string()],
        });
        let headers = make_headers(vec![("X-MS-CLIENT-PRINCIPAL-NAME", "dave@example.com")]);

        let context = authenticate(
            &headers,
            Some("10.1.2.3".parse().unwrap()),
            &config,
            &policy_for(&config),
        )
        .unwrap();
        assert_eq!(context.identity.email.as_deref(), Some("dave@example.com"));
    }

    #[test]
    fn untrusted_ip_is_rejected_despite_valid_headers() {
        let config = test_config(TrustedProxiesConfig {
            dangerously_trust_all: false,
            cidrs: vec!["10.0.0.0/8".to_string()],
        });
        let headers = make_headers(vec![("X-MS-CLIENT-PRINCIPAL-NAME", "eve@example.com")]);

        let err = authenticate(
            &headers,
            Some("203.0.113.9".parse().unwrap()),
            &config,
            &policy_for(&config),
        )
        .unwrap_err();
        assert!(matches!(err, AuthError::MissingIdentity));
    }

    #[test]
    fn missing_connecting_ip_with_cidrs_is_rejected() {
        let config = test_config(TrustedProxiesConfig {
            dangerously_trust_all: false,
            cidrs: vec!["10.0.0.0/8".to_string()],
        });
        let headers = make_headers(vec![("X-MS-CLIENT-PRINCIPAL-NAME", "eve@example.com")]);

        let err = authenticate(&headers, None, &config, &policy_for(&config)).unwrap_err();
        assert!(matches!(err, AuthError::MissingIdentity));
    }

    // ========== Claim sources ==========

    #[test]
    fn principal_document_preferred_over_discrete_headers() {
        let config = test_config(TrustedProxiesConfig::default());
        let document = principal_document(&[
            ("name", "Ada Lovelace"),
            ("email", "ada@example.com"),
            ("groups", "Engineering"),
        ]);
        let headers = make_headers(vec![
            ("X-MS-CLIENT-PRINCIPAL", document.as_str()),
            ("X-MS-CLIENT-PRINCIPAL-NAME", "other@example.com"),
        ]);

        let context = authenticate(&headers, None, &config, &policy_for(&config)).unwrap();
        assert_eq!(context.identity.email.as_deref(), Some("ada@example.com"));
        assert_eq!(context.identity.display_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(context.identity.group_values, vec!["Engineering"]);
    }

    #[test]
    fn discrete_headers_resolve_when_no_document_present() {
        let config = test_config(TrustedProxiesConfig::default());
        let headers = make_headers(vec![
            ("X-MS-CLIENT-PRINCIPAL-NAME", "ada@example.com"),
            ("X-Auth-Request-User", "Ada Lovelace"),
            ("X-Auth-Request-Groups", "Engineering, Ops"),
        ]);

        let context = authenticate(&headers, None, &config, &policy_for(&config)).unwrap();
        assert_eq!(context.identity.email.as_deref(), Some("ada@example.com"));
        assert_eq!(context.identity.display_name.as_deref(), Some("Ada Lovelace"));
        assert_eq!(context.identity.group_values, vec!["Engineering", "Ops"]);
    }

    #[test]
    fn no_identity_headers_is_rejected() {
        let config = test_config(TrustedProxiesConfig::default());
        let headers = make_headers(vec![("X-Auth-Request-User", "Ada Lovelace")]);

        let err = authenticate(&headers, None, &config, &policy_for(&config)).unwrap_err();
        assert!(matches!(err, AuthError::MissingIdentity));
    }

    #[test]
    fn malformed_principal_document_is_rejected() {
        let config = test_config(TrustedProxiesConfig::default());
        let headers = make_headers(vec![("X-MS-CLIENT-PRINCIPAL", "%%%not-base64%%%")]);

        let err = authenticate(&headers, None, &config, &policy_for(&config)).unwrap_err();
        assert!(matches!(err, AuthError::InvalidPrincipal(_)));
    }

    // ========== Policy gates ==========

    #[test]
    fn access_allow_list_forbids_unlisted_principals() {
        let mut config = test_config(TrustedProxiesConfig::default());
        config.auth.access.allowed_group_names = vec!["Change Users".to_string()];
        let policy = policy_for(&config);

        let outsider = make_headers(vec![
            ("X-MS-CLIENT-PRINCIPAL-NAME", "eve@example.com"),
            ("X-Auth-Request-Groups", "Marketing"),
        ]);
        let err = authenticate(&outsider, None, &config, &policy).unwrap_err();
        assert!(matches!(err, AuthError::Forbidden(_)));

        let member = make_headers(vec![
            ("X-MS-CLIENT-PRINCIPAL-NAME", "ada@example.com"),
            ("X-Auth-Request-Groups", "Change Users"),
        ]);
        let context = authenticate(&member, None, &config, &policy).unwrap();
        assert_eq!(context.identity.email.as_deref(), Some("ada@example.com"));
    }

    #[test]
    fn approver_groups_set_the_approver_flag() {
        let mut config = test_config(TrustedProxiesConfig::default());
        config.auth.approvers.group_names = vec!["Change Approvers".to_string()];
        let policy = policy_for(&config);

        let approver = make_headers(vec![
            ("X-MS-CLIENT-PRINCIPAL-NAME", "grace@example.com"),
            ("X-Auth-Request-Groups", "Change Approvers"),
        ]);
        let context = authenticate(&approver, None, &config, &policy).unwrap();
        assert!(context.is_approver);

        let requestor = make_headers(vec![("X-MS-CLIENT-PRINCIPAL-NAME", "ada@example.com")]);
        let context = authenticate(&requestor, None, &config, &policy).unwrap();
        assert!(!context.is_approver);
    }
}
