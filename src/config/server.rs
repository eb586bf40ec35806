use std::{net::IpAddr, time::Duration};

use http::{HeaderName, Method};
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Host address to bind to.
    ///
    /// Defaults to loopback. Binding anything else requires
    /// `trusted_proxies` to be configured, because identity arrives in
    /// spoofable headers.
    #[serde(default = "default_host")]
    pub host: IpAddr,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Request body size limit in bytes. Bounds multipart submissions,
    /// so it must cover the payload plus every attachment.
    #[serde(default = "default_body_limit")]
    pub body_limit_bytes: usize,

    /// Trusted proxy configuration. Identity headers are only honored
    /// on connections from these ranges.
    #[serde(default)]
    pub trusted_proxies: TrustedProxiesConfig,

    /// CORS configuration.
    #[serde(default)]
    pub cors: CorsConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            body_limit_bytes: default_body_limit(),
            trusted_proxies: TrustedProxiesConfig::default(),
            cors: CorsConfig::default(),
        }
    }
}

fn default_host() -> IpAddr {
    "127.0.0.1".parse().unwrap()
}

fn default_port() -> u16 {
    8080
}

fn default_body_limit() -> usize {
    50 * 1024 * 1024 // 50 MB
}

/// Configuration for trusted reverse proxies.
///
/// **Security Note:** The service trusts the identity headers set by the
/// authenticating proxy in front of it. Header spoofing is a serious
/// vulnerability, so those headers are only honored when the connecting
/// client is from a known proxy IP/CIDR range.
///
/// - `dangerously_trust_all: true` - **DANGEROUS**: Trusts identity headers
///   from ANY source. Only use in controlled environments where the service
///   is not directly reachable (e.g., behind a load balancer that
///   strips/rewrites headers).
///
/// - `cidrs: ["10.0.0.0/8"]` - Trust identity headers only when the
///   connecting IP is within one of the specified CIDR ranges. This is the
///   recommended approach.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct TrustedProxiesConfig {
    /// Trust identity headers from any connecting address.
    ///
    /// **WARNING: This is a security risk!** Only enable this if the service
    /// is completely isolated behind a trusted proxy that:
    /// 1. Is the only way to reach the service
    /// 2. Properly sets/overwrites the identity headers
    ///
    /// If attackers can connect directly, they can impersonate any principal,
    /// including approvers.
    #[serde(default)]
    pub dangerously_trust_all: bool,

    /// List of trusted proxy CIDR ranges (e.g., ["10.0.0.0/8", "172.16.0.0/12"]).
    ///
    /// Identity headers are only trusted when the connecting IP is within
    /// one of these ranges.
    #[serde(default)]
    pub cidrs: Vec<String>,
}

impl TrustedProxiesConfig {
    /// Parse the CIDR strings into IpNet objects.
    ///
    /// Invalid CIDRs are logged as warnings and skipped.
    pub fn parsed_cidrs(&self) -> Vec<IpNet> {
        self.cidrs
            .iter()
            .filter_map(|cidr_str| {
                cidr_str.parse::<IpNet>().ok().or_else(|| {
                    tracing::warn!(cidr = %cidr_str, "Invalid CIDR in trusted_proxies config, skipping");
                    None
                })
            })
            .collect()
    }

    /// Check if an IP address is within any of the trusted CIDR ranges.
    pub fn is_trusted_ip(&self, ip: IpAddr, parsed_cidrs: &[IpNet]) -> bool {
        if self.dangerously_trust_all {
            return true;
        }
        parsed_cidrs.iter().any(|cidr| cidr.contains(&ip))
    }

    /// Returns true if proxy headers should potentially be trusted.
    ///
    /// This doesn't mean headers ARE trusted - the connecting IP must still
    /// be validated against the CIDRs (unless dangerously_trust_all is set).
    pub fn is_configured(&self) -> bool {
        self.dangerously_trust_all || !self.cidrs.is_empty()
    }
}

/// CORS configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CorsConfig {
    /// Enable CORS.
    #[serde(default = "default_cors_enabled")]
    pub enabled: bool,

    /// Allowed origins. Use ["*"] for any origin (not recommended for production).
    #[serde(default)]
    pub allowed_origins: Vec<String>,

    /// Allowed HTTP methods.
    #[serde(default = "default_cors_methods")]
    pub allowed_methods: Vec<String>,

    /// Allowed headers.
    #[serde(default = "default_cors_headers")]
    pub allowed_headers: Vec<String>,

    /// Whether to allow credentials.
    #[serde(default)]
    pub allow_credentials: bool,

    /// Max age for preflight cache in seconds.
    #[serde(default = "default_cors_max_age")]
    pub max_age_secs: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            enabled: default_cors_enabled(),
            allowed_origins: vec![],
            allowed_methods: default_cors_methods(),
            allowed_headers: default_cors_headers(),
            allow_credentials: false,
            max_age_secs: default_cors_max_age(),
        }
    }
}

impl CorsConfig {
    /// Build a CorsLayer from the configuration.
    ///
    /// Returns None if CORS is disabled.
    ///
    /// Behavior:
    /// - If `allowed_origins` is empty, no cross-origin requests are allowed (restrictive default)
    /// - If `allowed_origins` contains "*", any origin is allowed (logs a warning)
    /// - Otherwise, only the specified origins are allowed
    pub fn into_layer(self) -> Option<CorsLayer> {
        if !self.enabled {
            tracing::debug!("CORS is disabled");
            return None;
        }

        let allow_origin = if self.allowed_origins.is_empty() {
            tracing::info!(
                "CORS: No allowed_origins configured - cross-origin requests will be rejected. \
                 Configure [server.cors.allowed_origins] to allow specific origins."
            );
            AllowOrigin::list(std::iter::empty::<http::HeaderValue>())
        } else if self.allowed_origins.len() == 1 && self.allowed_origins[0] == "*" {
            tracing::warn!(
                "CORS: Allowing any origin (allowed_origins = [\"*\"]). \
                 This is NOT recommended for production - specify allowed origins explicitly."
            );
            AllowOrigin::any()
        } else {
            let origins: Vec<http::HeaderValue> = self
                .allowed_origins
                .iter()
                .filter_map(|origin| {
                    origin.parse().ok().or_else(|| {
                        tracing::warn!(origin = %origin, "Invalid CORS origin, skipping");
                        None
                    })
                })
                .collect();

            if origins.is_empty() {
                tracing::warn!(
                    "CORS: All configured origins were invalid - cross-origin requests will be rejected"
                );
            } else {
                tracing::info!(origins = ?self.allowed_origins, "CORS: Allowing specific origins");
            }

            AllowOrigin::list(origins)
        };

        let methods: Vec<Method> = self
            .allowed_methods
            .iter()
            .filter_map(|m| {
                m.parse().ok().or_else(|| {
                    tracing::warn!(method = %m, "Invalid CORS method, skipping");
                    None
                })
            })
            .collect();
        let allow_methods = AllowMethods::list(methods);

        let headers: Vec<HeaderName> = self
            .allowed_headers
            .iter()
            .filter_map(|h| {
                h.parse().ok().or_else(|| {
                    tracing::warn!(header = %h, "Invalid CORS header, skipping");
                    None
                })
            })
            .collect();
        let allow_headers = AllowHeaders::list(headers);

        let mut layer = CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_methods(allow_methods)
            .allow_headers(allow_headers)
            .max_age(Duration::from_secs(self.max_age_secs));

        if self.allow_credentials {
            layer = layer.allow_credentials(true);
        }

        Some(layer)
    }
}

fn default_cors_enabled() -> bool {
    true
}

fn default_cors_methods() -> Vec<String> {
    vec!["GET", "POST", "PUT", "DELETE", "OPTIONS"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_cors_headers() -> Vec<String> {
    vec!["Content-Type", "Authorization"]
        .into_iter()
        .map(String::from)
        .collect()
}

fn default_cors_max_age() -> u64 {
    86400 // 24 hours
}
