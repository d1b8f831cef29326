//! Fetch capability: an async client for the split, segment and my-segments change endpoints.
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use reqwest::{header, StatusCode, Url};
use serde::de::DeserializeOwned;

use crate::{
    dtos::{ChangeNumber, SegmentChangesResponse, SplitChangesResponse},
    Error, Result,
};

/// Remote source of truth for split definitions and segment memberships.
///
/// Failures must be reported with errors for which [`Error::is_sync_error`] is `true`; anything
/// else is treated as a programming error by the updaters.
#[async_trait]
pub trait SplitApi: Send + Sync {
    /// Fetch split definitions changed after `since`.
    ///
    /// `no_cache` asks intermediate caches to revalidate. `till` forces a CDN bypass for the given
    /// target version.
    async fn fetch_split_changes(
        &self,
        since: ChangeNumber,
        no_cache: bool,
        till: Option<ChangeNumber>,
    ) -> Result<SplitChangesResponse>;

    /// Fetch a page of membership changes of `segment` after `since`.
    async fn fetch_segment_changes(
        &self,
        segment: &str,
        since: ChangeNumber,
        no_cache: bool,
        till: Option<ChangeNumber>,
    ) -> Result<SegmentChangesResponse>;

    /// Fetch names of the segments `key` belongs to. The endpoint does not expose a version.
    async fn fetch_my_segments(&self, key: &str, no_cache: bool) -> Result<Vec<String>>;
}

/// Configuration for [`HttpSplitApi`].
#[derive(Debug, Clone)]
pub struct SplitApiConfig {
    #[allow(missing_docs)]
    pub base_url: String,
    #[allow(missing_docs)]
    pub api_key: String,
    /// Reported in the `SplitSDKVersion` header.
    pub sdk_version: String,
}

impl SplitApiConfig {
    /// Default base URL for API calls.
    pub const DEFAULT_BASE_URL: &'static str = "https://sdk.split.io/api";

    /// Create a configuration using the default base URL.
    pub fn from_api_key(api_key: impl Into<String>) -> SplitApiConfig {
        SplitApiConfig {
            base_url: SplitApiConfig::DEFAULT_BASE_URL.to_owned(),
            api_key: api_key.into(),
            sdk_version: format!("rust-{}", env!("CARGO_PKG_VERSION")),
        }
    }

    /// Override base URL for API calls. Clients should use the default setting in most cases.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> SplitApiConfig {
        self.base_url = base_url.into();
        self
    }
}

#[derive(serde::Deserialize)]
#[serde(rename_all = "camelCase")]
struct MySegmentsResponse {
    my_segments: Vec<MySegment>,
}

#[derive(serde::Deserialize)]
struct MySegment {
    name: String,
}

/// A [`SplitApi`] that talks HTTP to the Split backend.
pub struct HttpSplitApi {
    // Client holds a connection pool internally, so we're reusing the client between requests.
    client: reqwest::Client,
    config: SplitApiConfig,
    /// If we receive a 401/403 response, the API key is not valid. We remember it so we don't
    /// issue additional requests to the server.
    unauthorized: AtomicBool,
}

impl HttpSplitApi {
    #[allow(missing_docs)]
    pub fn new(config: SplitApiConfig) -> HttpSplitApi {
        HttpSplitApi {
            client: reqwest::Client::new(),
            config,
            unauthorized: AtomicBool::new(false),
        }
    }

    fn url(&self, path: &str, params: &[(&str, String)]) -> Result<Url> {
        Url::parse_with_params(&format!("{}{}", self.config.base_url, path), params)
            .map_err(Error::InvalidBaseUrl)
    }

    async fn get<T: DeserializeOwned>(&self, url: Url, no_cache: bool) -> Result<T> {
        if self.unauthorized.load(Ordering::Relaxed) {
            return Err(Error::Unauthorized);
        }

        let mut request = self
            .client
            .get(url)
            .bearer_auth(&self.config.api_key)
            .header("SplitSDKVersion", &self.config.sdk_version);
        if no_cache {
            request = request.header(header::CACHE_CONTROL, "no-cache");
        }

        let response = request.send().await?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            log::warn!(target: "splitio", "client is not authorized. Check your API key");
            self.unauthorized.store(true, Ordering::Relaxed);
            return Err(Error::Unauthorized);
        }
        if !status.is_success() {
            log::warn!(target: "splitio", "received non-200 response: {:?}", status);
            return Err(Error::HttpStatus(status.as_u16()));
        }

        Ok(response.json().await?)
    }
}

fn since_till_params(
    since: ChangeNumber,
    till: Option<ChangeNumber>,
) -> Vec<(&'static str, String)> {
    let mut params = vec![("since", since.to_string())];
    if let Some(till) = till {
        params.push(("till", till.to_string()));
    }
    params
}

#[async_trait]
impl SplitApi for HttpSplitApi {
    async fn fetch_split_changes(
        &self,
        since: ChangeNumber,
        no_cache: bool,
        till: Option<ChangeNumber>,
    ) -> Result<SplitChangesResponse> {
        let url = self.url("/splitChanges", &since_till_params(since, till))?;
        log::debug!(target: "splitio", since = since; "fetching split changes");
        self.get(url, no_cache).await
    }

    async fn fetch_segment_changes(
        &self,
        segment: &str,
        since: ChangeNumber,
        no_cache: bool,
        till: Option<ChangeNumber>,
    ) -> Result<SegmentChangesResponse> {
        let url = self.url(
            &format!("/segmentChanges/{segment}"),
            &since_till_params(since, till),
        )?;
        log::debug!(target: "splitio", segment = segment, since = since; "fetching segment changes");
        self.get(url, no_cache).await
    }

    async fn fetch_my_segments(&self, key: &str, no_cache: bool) -> Result<Vec<String>> {
        let url = self.url(&format!("/mySegments/{key}"), &[])?;
        let response: MySegmentsResponse = self.get(url, no_cache).await?;
        Ok(response
            .my_segments
            .into_iter()
            .map(|segment| segment.name)
            .collect())
    }
}
