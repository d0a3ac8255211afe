use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use mockall::automock;
use reqwest::header;
use tracing::{debug, error};
use url::Url;

use crate::{
    config::AppConfig,
    server::error::{AppResult, Error},
};

const ACCEPT_ALL: &str = "*/*";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

pub type DynUpstreamService = Arc<dyn UpstreamServiceTrait + Send + Sync>;

/// one outbound fetch, built per incoming request and dropped once it's relayed
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    requested: String,
    url: Url,
    referer: String,
}

impl UpstreamRequest {
    pub fn parse(requested: &str) -> AppResult<Self> {
        let url = Url::parse(requested).map_err(|e| {
            error!("Failed to parse upstream URL {}: {}", requested, e);
            Error::InvalidUrl(e.to_string())
        })?;

        // opaque origins (data:, file:, ...) have nothing to put in a referer
        let origin = url.origin();
        if !origin.is_tuple() {
            error!("Upstream URL has no origin: {}", requested);
            return Err(Error::InvalidUrl(format!(
                "Cannot derive origin from {}",
                requested
            )));
        }

        // always the upstream's own origin, never whatever the caller sent us
        let referer = format!("{}/", origin.ascii_serialization());

        Ok(Self {
            requested: requested.to_string(),
            url,
            referer,
        })
    }

    /// the url exactly as the client sent it, base paths are cut from this
    pub fn requested(&self) -> &str {
        &self.requested
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn referer(&self) -> &str {
        &self.referer
    }
}

#[automock]
#[async_trait]
pub trait UpstreamServiceTrait {
    /// sends the request, the status is left for the caller to judge
    async fn fetch(&self, request: &UpstreamRequest) -> AppResult<reqwest::Response>;
}

pub struct UpstreamService {
    http: reqwest::Client,
    user_agent: String,
}

impl UpstreamService {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();

        if let Some(secs) = config.upstream_timeout_secs {
            builder = builder.timeout(Duration::from_secs(secs));
        }

        let http = builder
            .build()
            .context("failed to build upstream http client")?;

        Ok(Self {
            http,
            user_agent: config.user_agent.clone(),
        })
    }
}

#[async_trait]
impl UpstreamServiceTrait for UpstreamService {
    async fn fetch(&self, request: &UpstreamRequest) -> AppResult<reqwest::Response> {
        debug!("Fetching upstream: {}", request.url());

        let response = self
            .http
            .get(request.url().clone())
            .header(header::USER_AGENT, &self.user_agent)
            .header(header::ACCEPT, ACCEPT_ALL)
            .header(header::ACCEPT_LANGUAGE, ACCEPT_LANGUAGE)
            .header(header::REFERER, request.referer())
            .send()
            .await
            .map_err(|e| {
                error!("Upstream request failed: {}", e);
                Error::Fetch(e.to_string())
            })?;

        debug!(
            "Upstream {} answered with status: {}",
            request.url(),
            response.status()
        );

        Ok(response)
    }
}
