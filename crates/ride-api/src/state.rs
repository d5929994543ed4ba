//! # Application State
//!
//! Shared by every handler: the orchestrator, its three gateways, transport
//! settings, and the Prometheus handle when an exporter is installed.

use std::sync::Arc;

use metrics_exporter_prometheus::PrometheusHandle;
use ride_orchestrator::{Gateways, Orchestrator};

use crate::auth::SecretToken;

/// Transport-level settings.
#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    /// When set, every `/v1` request must carry `Authorization: Bearer <token>`.
    pub auth_token: Option<SecretToken>,
}

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<Orchestrator>,
    pub gateways: Gateways,
    pub config: AppConfig,
    pub prometheus: Option<PrometheusHandle>,
}

impl AppState {
    pub fn new(orchestrator: Arc<Orchestrator>) -> Self {
        Self::with_config(orchestrator, AppConfig::default())
    }

    pub fn with_config(orchestrator: Arc<Orchestrator>, config: AppConfig) -> Self {
        Self {
            gateways: Gateways::new(Arc::clone(&orchestrator)),
            orchestrator,
            config,
            prometheus: None,
        }
    }

    pub fn with_prometheus(mut self, handle: PrometheusHandle) -> Self {
        self.prometheus = Some(handle);
        self
    }
}
