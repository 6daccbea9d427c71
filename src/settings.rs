use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::authz::PolicyDefaults;
use crate::errors::AppError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    pub server: Server,
    pub access_control: AccessControlSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Server {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AccessControlSettings {
    /// Reject client operations on resource types without an inbound rule.
    #[serde(default)]
    pub block_inbound_by_default: bool,
    /// Withhold data of resource types without an outbound rule.
    #[serde(default)]
    pub block_outbound_by_default: bool,
    /// Deny when a rule takes longer than this. Unset waits indefinitely.
    #[serde(default)]
    pub evaluator_timeout_ms: Option<u64>,
    /// Directory of `.kdl` policy files. Unset means no declarative rules.
    #[serde(default)]
    pub policies_dir: Option<PathBuf>,
}

impl AccessControlSettings {
    pub fn policy_defaults(&self) -> PolicyDefaults {
        PolicyDefaults {
            block_inbound_by_default: self.block_inbound_by_default,
            block_outbound_by_default: self.block_outbound_by_default,
            evaluator_timeout: self.evaluator_timeout_ms.map(Duration::from_millis),
        }
    }
}

impl Default for Server {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
        }
    }
}

impl Settings {
    pub fn load(path: &str) -> Result<Self, AppError> {
        let mut builder = config::Config::builder()
            .set_default("server.host", Server::default().host)?
            .set_default("server.port", Server::default().port)?
            .set_default("access_control.block_inbound_by_default", false)?
            .set_default("access_control.block_outbound_by_default", false)?;

        // Optional file
        if Path::new(path).exists() {
            builder = builder.add_source(config::File::with_name(path));
        }

        // Environment overrides: CRUDGATE__SERVER__PORT=9090, etc.
        builder = builder.add_source(
            config::Environment::with_prefix("CRUDGATE")
                .prefix_separator("__")
                .separator("__"),
        );

        let cfg = builder.build()?;
        let mut s: Settings = cfg.try_deserialize()?;

        // Normalize policies dir to be relative to current dir
        if let Some(dir) = s.access_control.policies_dir.take() {
            let dir = if dir.is_relative() {
                std::env::current_dir()?.join(dir)
            } else {
                dir
            };
            s.access_control.policies_dir = Some(dir);
        }

        Ok(s)
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}
