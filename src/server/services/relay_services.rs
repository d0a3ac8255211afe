use std::sync::Arc;

use tracing::info;

use crate::config::AppConfig;

use super::upstream_services::{DynUpstreamService, UpstreamService};

/// everything a relay request needs, cloned into each handler through an Extension
/// nothing in here is mutable so requests never wait on each other
#[derive(Clone)]
pub struct RelayServices {
    pub upstream: DynUpstreamService,
    pub config: Arc<AppConfig>,
}

impl RelayServices {
    pub fn new(config: Arc<AppConfig>) -> anyhow::Result<Self> {
        info!("starting relay services...");

        let upstream = Arc::new(UpstreamService::new(&config)?) as DynUpstreamService;

        Ok(Self::with_upstream(config, upstream))
    }

    pub fn with_upstream(config: Arc<AppConfig>, upstream: DynUpstreamService) -> Self {
        Self { upstream, config }
    }
}
