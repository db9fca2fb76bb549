use std::collections::HashMap;
use std::time::Duration;

use common_types::config::de_duration;
use common_types::SurgeError;
use serde::Deserialize;
use url::Url;

use crate::tls::TlsConfig;

/// Statuses the liveness probe treats as "peer reachable" even though the
/// request itself was rejected.
pub const DEFAULT_ACCEPT_STATUS: &[u16] = &[403, 404, 405, 500, 502, 503];

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HttpConfig {
    pub base_url: String,
    /// Method and path used when no request templates are configured.
    pub method: String,
    pub path: String,
    /// Headers applied to every request.
    pub headers: HashMap<String, String>,
    pub user_agent: String,
    pub content_type: String,
    pub auth: AuthConfig,
    pub requests: Vec<RequestTemplate>,
    pub upload: Option<UploadConfig>,
    pub pool: PoolConfig,
    pub tls: Option<TlsConfig>,
    pub redirect: RedirectConfig,
    /// Non-2xx statuses the liveness probe accepts as reachable.
    pub accept_status: Vec<u16>,
    /// Extra statuses counted as operation success, for reachability-style
    /// runs where any answer from the peer is a pass.
    pub success_status: Vec<u16>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            method: "GET".into(),
            path: "/".into(),
            headers: HashMap::new(),
            user_agent: concat!("surge/", env!("CARGO_PKG_VERSION")).into(),
            content_type: "application/json".into(),
            auth: AuthConfig::default(),
            requests: Vec::new(),
            upload: None,
            pool: PoolConfig::default(),
            tls: None,
            redirect: RedirectConfig::default(),
            accept_status: DEFAULT_ACCEPT_STATUS.to_vec(),
            success_status: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequestTemplate {
    pub name: String,
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    pub body: Option<serde_json::Value>,
    /// Template-substitution variables for `{{name}}` tokens.
    pub params: HashMap<String, String>,
    pub weight: u32,
    pub content_type: Option<String>,
}

impl Default for RequestTemplate {
    fn default() -> Self {
        Self {
            name: String::new(),
            method: "GET".into(),
            path: "/".into(),
            headers: HashMap::new(),
            body: None,
            params: HashMap::new(),
            weight: 1,
            content_type: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UploadConfig {
    /// Multipart field name for file parts.
    pub field: String,
    /// Files to attach, each a path or a glob pattern.
    pub files: Vec<String>,
    /// Extra plain-text form fields.
    pub fields: HashMap<String, String>,
    pub path: String,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            field: "file".into(),
            files: Vec::new(),
            fields: HashMap::new(),
            path: "/upload".into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    #[default]
    None,
    Basic,
    Bearer,
    MutualTls,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    pub mode: AuthMode,
    pub username: String,
    pub password: String,
    pub token: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Number of prebuilt clients.
    pub size: usize,
    #[serde(deserialize_with = "de_duration")]
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            size: 8,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RedirectConfig {
    /// Follow redirects up to `max_redirects`, or stop at the first
    /// response when false.
    pub follow: bool,
    pub max_redirects: usize,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            follow: true,
            max_redirects: 10,
        }
    }
}

impl HttpConfig {
    pub fn validate(&self) -> Result<(), SurgeError> {
        if self.base_url.is_empty() {
            return Err(SurgeError::ConfigInvalid("base_url is required".into()));
        }
        let url = Url::parse(&self.base_url)
            .map_err(|err| SurgeError::ConfigInvalid(format!("invalid base_url: {err}")))?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(SurgeError::ConfigInvalid(format!(
                    "unsupported base_url scheme {other:?}"
                )))
            }
        }
        if self.pool.size == 0 {
            return Err(SurgeError::ConfigInvalid(
                "pool.size must be at least 1".into(),
            ));
        }
        match self.auth.mode {
            AuthMode::None => {}
            AuthMode::Basic => {
                if self.auth.username.is_empty() {
                    return Err(SurgeError::ConfigInvalid(
                        "basic auth requires a username".into(),
                    ));
                }
            }
            AuthMode::Bearer => {
                if self.auth.token.is_empty() {
                    return Err(SurgeError::ConfigInvalid(
                        "bearer auth requires a token".into(),
                    ));
                }
            }
            AuthMode::MutualTls => {
                let has_identity = self
                    .tls
                    .as_ref()
                    .is_some_and(|tls| tls.cert_file.is_some() && tls.key_file.is_some());
                if !has_identity {
                    return Err(SurgeError::ConfigInvalid(
                        "mutual_tls auth requires tls.cert_file and tls.key_file".into(),
                    ));
                }
            }
        }
        if let Some(tls) = &self.tls {
            tls.validate(url.host_str())?;
        }
        for template in &self.requests {
            if template.method.is_empty() {
                return Err(SurgeError::ConfigInvalid(format!(
                    "request template {:?} has an empty method",
                    template.name
                )));
            }
        }
        Ok(())
    }

    pub fn parsed_base_url(&self) -> Result<Url, SurgeError> {
        Url::parse(&self.base_url)
            .map_err(|err| SurgeError::ConfigInvalid(format!("invalid base_url: {err}")))
    }

    pub fn accepts_status(&self, code: u16) -> bool {
        (200..300).contains(&code) || self.accept_status.contains(&code)
    }

    pub fn is_success_status(&self, code: u16) -> bool {
        (200..300).contains(&code) || self.success_status.contains(&code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> HttpConfig {
        HttpConfig {
            base_url: "http://localhost:18080".into(),
            ..HttpConfig::default()
        }
    }

    #[test]
    fn minimal_config_passes() {
        base().validate().unwrap();
    }

    #[test]
    fn base_url_is_required_and_must_be_http() {
        assert!(HttpConfig::default().validate().is_err());
        let mut cfg = base();
        cfg.base_url = "ftp://example.com".into();
        assert!(cfg.validate().is_err());
        cfg.base_url = "not a url".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn auth_modes_require_their_material() {
        let mut cfg = base();
        cfg.auth.mode = AuthMode::Basic;
        assert!(cfg.validate().is_err());
        cfg.auth.username = "user".into();
        cfg.validate().unwrap();

        let mut cfg = base();
        cfg.auth.mode = AuthMode::Bearer;
        assert!(cfg.validate().is_err());
        cfg.auth.token = "tok".into();
        cfg.validate().unwrap();

        let mut cfg = base();
        cfg.auth.mode = AuthMode::MutualTls;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn status_policies_default_to_2xx() {
        let cfg = base();
        assert!(cfg.is_success_status(204));
        assert!(!cfg.is_success_status(503));
        assert!(cfg.accepts_status(404));
        assert!(!cfg.accepts_status(301));
    }

    #[test]
    fn yaml_shape_round_trips() {
        let cfg: HttpConfig = serde_yaml::from_str(
            r#"
            base_url: "http://localhost:8080"
            requests:
              - name: list
                method: GET
                path: /items
                weight: 3
              - name: create
                method: POST
                path: /items
                body: {"name": "{{random.name}}"}
                weight: 1
            pool:
              size: 4
              acquire_timeout: "2s"
            redirect:
              follow: false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.requests.len(), 2);
        assert_eq!(cfg.requests[0].weight, 3);
        assert_eq!(cfg.pool.size, 4);
        assert!(!cfg.redirect.follow);
        cfg.validate().unwrap();
    }
}
