//! Startup configuration
//!
//! All configuration is gathered once at startup into [`AuthConfig`] and
//! passed by reference into each component; there is no ambient global
//! state.

use reqwest::Url;

/// The default authorization realm
pub const DEFAULT_REALM: &str = "CAIDA";

/// The scope requested when none is given
pub const DEFAULT_SCOPE: &str = "openid";

/// The scope granting refresh tokens that survive logout
pub const OFFLINE_SCOPE: &str = "offline_access";

/// The conventional authorization URL for a realm
pub fn default_auth_url(realm: &str) -> String {
    format!("https://auth.caida.org/realms/{realm}/protocol/openid-connect")
}

/// The immutable authorization-server configuration for one invocation
#[derive(Clone, Debug)]
pub struct AuthConfig {
    /// Base URL of the realm's OpenID Connect endpoints
    pub auth_url: Url,
    /// The OIDC client id
    pub client_id: String,
    /// The space-separated scope string sent with authorization requests
    pub scope: String,
}

impl AuthConfig {
    /// Constructs the configuration for one invocation
    pub fn new(auth_url: Url, client_id: impl Into<String>, scope: impl Into<String>) -> Self {
        Self {
            auth_url,
            client_id: client_id.into(),
            scope: scope.into(),
        }
    }

    /// The device-authorization endpoint, `{auth_url}/auth/device`
    pub fn device_url(&self) -> Url {
        self.endpoint("auth/device")
    }

    /// The token endpoint, `{auth_url}/token`
    pub fn token_url(&self) -> Url {
        self.endpoint("token")
    }

    fn endpoint(&self, suffix: &str) -> Url {
        let mut url = self.auth_url.clone();
        let path = format!("{}/{}", url.path().trim_end_matches('/'), suffix);
        url.set_path(&path);
        url
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        let url = default_auth_url("CAIDA").parse().unwrap();
        AuthConfig::new(url, "myapp-offline", "openid offline_access")
    }

    #[test]
    fn endpoints_extend_the_auth_url() {
        let config = config();
        assert_eq!(
            config.token_url().as_str(),
            "https://auth.caida.org/realms/CAIDA/protocol/openid-connect/token"
        );
        assert_eq!(
            config.device_url().as_str(),
            "https://auth.caida.org/realms/CAIDA/protocol/openid-connect/auth/device"
        );
    }

    #[test]
    fn trailing_slash_does_not_double() {
        let url = "https://auth.example.org/realms/TEST/protocol/openid-connect/"
            .parse()
            .unwrap();
        let config = AuthConfig::new(url, "c", "openid");
        assert_eq!(
            config.token_url().as_str(),
            "https://auth.example.org/realms/TEST/protocol/openid-connect/token"
        );
    }
}
