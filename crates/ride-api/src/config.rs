//! # Server Configuration
//!
//! Command-line flags, each with an environment fallback. Orchestrator
//! tuning (waiting windows, retry policy, safety thresholds) lives in the
//! optional YAML file named by `--config`.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use clap::Parser;
use ride_orchestrator::{ConfigError, OrchestratorConfig};

use crate::auth::SecretToken;
use crate::state::AppConfig;

#[derive(Parser, Debug, Clone)]
#[command(name = "ride-api", version, about = "Ride lifecycle orchestrator HTTP server")]
pub struct ServerArgs {
    /// Port to listen on.
    #[arg(long, env = "RIDE_API_PORT", default_value_t = 8080)]
    pub port: u16,

    /// Orchestrator configuration file (YAML). Defaults apply when omitted.
    #[arg(long, env = "RIDE_API_CONFIG")]
    pub config: Option<PathBuf>,

    /// Emit JSON log lines.
    #[arg(long, env = "RIDE_API_JSON_LOGS")]
    pub json_logs: bool,

    /// Require this bearer token on every `/v1` request.
    #[arg(long, env = "RIDE_API_AUTH_TOKEN", hide_env_values = true)]
    pub auth_token: Option<String>,
}

impl ServerArgs {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port))
    }

    pub fn orchestrator_config(&self) -> Result<OrchestratorConfig, ConfigError> {
        match &self.config {
            Some(path) => OrchestratorConfig::from_file(path),
            None => Ok(OrchestratorConfig::default()),
        }
    }

    pub fn app_config(&self) -> AppConfig {
        AppConfig {
            auth_token: self
                .auth_token
                .as_deref()
                .filter(|t| !t.is_empty())
                .map(SecretToken::new),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = ServerArgs::try_parse_from(["ride-api"]).unwrap();
        assert_eq!(args.port, 8080);
        assert!(!args.json_logs);
        assert!(args.app_config().auth_token.is_none());
        assert_eq!(args.orchestrator_config().unwrap(), OrchestratorConfig::default());
    }

    #[test]
    fn flags_override() {
        let args = ServerArgs::try_parse_from([
            "ride-api",
            "--port",
            "9090",
            "--json-logs",
            "--auth-token",
            "t0ken",
        ])
        .unwrap();
        assert_eq!(args.listen_addr().port(), 9090);
        assert!(args.json_logs);
        assert!(args.app_config().auth_token.is_some());
    }

    #[test]
    fn empty_token_disables_auth() {
        let args = ServerArgs::try_parse_from(["ride-api", "--auth-token", ""]).unwrap();
        assert!(args.app_config().auth_token.is_none());
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let args =
            ServerArgs::try_parse_from(["ride-api", "--config", "/nonexistent/ride.yaml"]).unwrap();
        assert!(matches!(args.orchestrator_config(), Err(ConfigError::Io { .. })));
    }
}
