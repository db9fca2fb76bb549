use std::path::PathBuf;

use common_types::SurgeError;
use serde::Deserialize;

/// TLS 1.3 suites the config recognizes.
const KNOWN_TLS13_SUITES: &[&str] = &[
    "TLS_AES_128_GCM_SHA256",
    "TLS_AES_256_GCM_SHA384",
    "TLS_CHACHA20_POLY1305_SHA256",
];

/// TLS context configuration. Invalid combinations fail at pool
/// construction, never lazily: knobs the HTTP stack cannot honor (cipher
/// suite pinning, renegotiation, disabling SNI verification against a
/// different server name) are rejected here instead of being ignored.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TlsConfig {
    /// Minimum protocol version, `"1.2"` or `"1.3"`.
    pub min_version: Option<String>,
    pub max_version: Option<String>,
    pub cipher_suites: Vec<String>,
    /// Extra root CA bundle, PEM.
    pub ca_file: Option<PathBuf>,
    /// Client certificate and key, PEM, for mutual TLS.
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    /// Expected server name; must match the target host when set.
    pub server_name: Option<String>,
    pub insecure_skip_verify: bool,
    pub sni: bool,
    /// `never`, `once`, or `freely`.
    pub renegotiation: String,
}

impl Default for TlsConfig {
    fn default() -> Self {
        Self {
            min_version: None,
            max_version: None,
            cipher_suites: Vec::new(),
            ca_file: None,
            cert_file: None,
            key_file: None,
            server_name: None,
            insecure_skip_verify: false,
            sni: true,
            renegotiation: "never".into(),
        }
    }
}

fn version_rank(version: &str) -> Result<u8, SurgeError> {
    match version {
        "1.0" | "1.1" => Err(SurgeError::ConfigInvalid(format!(
            "TLS {version} is not supported; the minimum supported version is 1.2"
        ))),
        "1.2" => Ok(2),
        "1.3" => Ok(3),
        other => Err(SurgeError::ConfigInvalid(format!(
            "unknown TLS version {other:?}"
        ))),
    }
}

pub(crate) fn reqwest_version(version: &str) -> reqwest::tls::Version {
    match version {
        "1.3" => reqwest::tls::Version::TLS_1_3,
        _ => reqwest::tls::Version::TLS_1_2,
    }
}

impl TlsConfig {
    pub fn validate(&self, target_host: Option<&str>) -> Result<(), SurgeError> {
        let min = self.min_version.as_deref().map(version_rank).transpose()?;
        let max = self.max_version.as_deref().map(version_rank).transpose()?;
        if let (Some(min), Some(max)) = (min, max) {
            if min > max {
                return Err(SurgeError::ConfigInvalid(
                    "tls.min_version exceeds tls.max_version".into(),
                ));
            }
        }

        for suite in &self.cipher_suites {
            if !KNOWN_TLS13_SUITES.contains(&suite.as_str()) {
                return Err(SurgeError::ConfigInvalid(format!(
                    "unknown TLS 1.3 cipher suite {suite:?}"
                )));
            }
        }
        if !self.cipher_suites.is_empty()
            && self.cipher_suites.len() < KNOWN_TLS13_SUITES.len()
        {
            return Err(SurgeError::ConfigInvalid(
                "cipher-suite pinning is not supported by the HTTP stack".into(),
            ));
        }

        match self.renegotiation.as_str() {
            "never" => {}
            "once" | "freely" => {
                return Err(SurgeError::ConfigInvalid(format!(
                    "renegotiation policy {:?} is not supported by the HTTP stack",
                    self.renegotiation
                )))
            }
            other => {
                return Err(SurgeError::ConfigInvalid(format!(
                    "unknown renegotiation policy {other:?}"
                )))
            }
        }

        if self.cert_file.is_some() != self.key_file.is_some() {
            return Err(SurgeError::ConfigInvalid(
                "tls.cert_file and tls.key_file must be set together".into(),
            ));
        }

        if let (Some(server_name), Some(host)) = (self.server_name.as_deref(), target_host) {
            if server_name != host {
                return Err(SurgeError::ConfigInvalid(format!(
                    "tls.server_name {server_name:?} does not match the target host {host:?}"
                )));
            }
        }

        Ok(())
    }

    /// Apply the context to a client builder. `validate` must have passed;
    /// file reads happen here so construction fails eagerly.
    pub(crate) fn apply(
        &self,
        mut builder: reqwest::ClientBuilder,
    ) -> Result<reqwest::ClientBuilder, SurgeError> {
        if let Some(min) = &self.min_version {
            builder = builder.min_tls_version(reqwest_version(min));
        }
        if let Some(max) = &self.max_version {
            builder = builder.max_tls_version(reqwest_version(max));
        }
        if let Some(ca_file) = &self.ca_file {
            let pem = std::fs::read(ca_file).map_err(|err| {
                SurgeError::ConfigInvalid(format!("cannot read tls.ca_file {ca_file:?}: {err}"))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem).map_err(|err| {
                SurgeError::ConfigInvalid(format!("invalid CA certificate: {err}"))
            })?;
            builder = builder.add_root_certificate(cert);
        }
        if let (Some(cert_file), Some(key_file)) = (&self.cert_file, &self.key_file) {
            let mut pem = std::fs::read(cert_file).map_err(|err| {
                SurgeError::ConfigInvalid(format!("cannot read tls.cert_file {cert_file:?}: {err}"))
            })?;
            let key = std::fs::read(key_file).map_err(|err| {
                SurgeError::ConfigInvalid(format!("cannot read tls.key_file {key_file:?}: {err}"))
            })?;
            pem.extend_from_slice(&key);
            let identity = reqwest::Identity::from_pem(&pem).map_err(|err| {
                SurgeError::ConfigInvalid(format!("invalid client identity: {err}"))
            })?;
            builder = builder.identity(identity);
        }
        if self.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }
        builder = builder.tls_sni(self.sni);
        Ok(builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_below_1_2_are_rejected() {
        let mut tls = TlsConfig {
            min_version: Some("1.0".into()),
            ..TlsConfig::default()
        };
        assert!(tls.validate(None).is_err());
        tls.min_version = Some("1.2".into());
        tls.validate(None).unwrap();
    }

    #[test]
    fn inverted_version_bounds_fail() {
        let tls = TlsConfig {
            min_version: Some("1.3".into()),
            max_version: Some("1.2".into()),
            ..TlsConfig::default()
        };
        assert!(tls.validate(None).is_err());
    }

    #[test]
    fn unknown_suites_and_pinning_fail_eagerly() {
        let tls = TlsConfig {
            cipher_suites: vec!["TLS_MAGIC".into()],
            ..TlsConfig::default()
        };
        assert!(tls.validate(None).is_err());

        let tls = TlsConfig {
            cipher_suites: vec!["TLS_AES_128_GCM_SHA256".into()],
            ..TlsConfig::default()
        };
        assert!(tls.validate(None).is_err());

        // The full default suite set is a no-op and passes.
        let tls = TlsConfig {
            cipher_suites: KNOWN_TLS13_SUITES.iter().map(|s| (*s).to_string()).collect(),
            ..TlsConfig::default()
        };
        tls.validate(None).unwrap();
    }

    #[test]
    fn renegotiation_other_than_never_fails() {
        for policy in ["once", "freely", "sometimes"] {
            let tls = TlsConfig {
                renegotiation: policy.into(),
                ..TlsConfig::default()
            };
            assert!(tls.validate(None).is_err(), "policy {policy} passed");
        }
    }

    #[test]
    fn identity_files_must_come_in_pairs() {
        let tls = TlsConfig {
            cert_file: Some("client.pem".into()),
            ..TlsConfig::default()
        };
        assert!(tls.validate(None).is_err());
    }

    #[test]
    fn server_name_must_match_the_target() {
        let tls = TlsConfig {
            server_name: Some("other.example.com".into()),
            ..TlsConfig::default()
        };
        assert!(tls.validate(Some("api.example.com")).is_err());
        tls.validate(Some("other.example.com")).unwrap();
    }
}
