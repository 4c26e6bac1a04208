use miette::{IntoDiagnostic, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::authz::subject::UserTypeConfig;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: Server,
    #[serde(default)]
    pub authz: Authz,
    /// Subject kinds the service recognizes, in detection priority order.
    #[serde(default = "default_user_types")]
    pub user_types: Vec<UserTypeConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Authz {
    /// When false the decision endpoints allow everything (with a distinct
    /// reason) and policy administration is unavailable.
    #[serde(default = "default_authz_enabled")]
    pub enabled: bool,
    /// Directory of `.kdl` seed files installed as system-managed policy at
    /// startup.
    #[serde(default)]
    pub seeds_dir: Option<PathBuf>,
}

fn default_authz_enabled() -> bool {
    true
}

fn default_user_types() -> Vec<UserTypeConfig> {
    vec![
        UserTypeConfig {
            user_type: "user".to_string(),
            display_name: "User".to_string(),
            priority: 1,
            entitlement_claim: "groups".to_string(),
        },
        UserTypeConfig {
            user_type: "service_account".to_string(),
            display_name: "Service Account".to_string(),
            priority: 2,
            entitlement_claim: "service_account".to_string(),
        },
    ]
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl Default for Authz {
    fn default() -> Self {
        Self {
            enabled: true,
            seeds_dir: None,
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: Server::default(),
            authz: Authz::default(),
            user_types: default_user_types(),
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self> {
        let mut builder = config::Config::builder()
            .set_default("server.host", Server::default().host)
            .into_diagnostic()?
            .set_default("server.port", Server::default().port)
            .into_diagnostic()?
            .set_default("authz.enabled", default_authz_enabled())
            .into_diagnostic()?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: PALISADE__SERVER__PORT=9090, etc.
        builder =
            builder.add_source(config::Environment::with_prefix("PALISADE").separator("__"));

        let cfg = builder.build().into_diagnostic()?;
        let mut s: Settings = cfg.try_deserialize().into_diagnostic()?;

        // Normalize the seed dir to be relative to the current dir
        if let Some(dir) = &s.authz.seeds_dir {
            if dir.is_relative() {
                s.authz.seeds_dir = Some(std::env::current_dir().into_diagnostic()?.join(dir));
            }
        }

        Ok(s)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
