//! HTTP client of the focus analyzer.
//!
use std::time::Duration;

use bytes::Bytes;
use common::protocol::{AnalysisRequest, AnalysisResult};
use reqwest::{Client, Url};

use crate::{capture::FramePayload, Error};

/// Posts frames to the analysis endpoint.
#[derive(Clone, Debug)]
pub struct AnalyzerClient {
    client: Client,
    endpoint: Url,
}

impl AnalyzerClient {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Upload one frame and parse the verdict.
    ///
    /// The body is parsed whatever the status code, the analyzer answers invalid
    /// requests with a regular verdict.
    pub async fn analyze(&self, payload: &FramePayload) -> Result<AnalysisResult, Error> {
        let request = AnalysisRequest::new(payload.data_uri.clone());

        let resp = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            log::warn!("Analyzer answered frame {} with {}", payload.seq, status);
        }

        let result: AnalysisResult = resp.json().await?;
        log::debug!(
            "Frame {}: focused={} reason={:?} image={}",
            payload.seq,
            result.focused,
            result.reason,
            result.image.is_some()
        );

        Ok(result)
    }

    /// Download an annotated image referenced by URL, relative to the endpoint.
    pub async fn fetch_image(&self, url: &str) -> Result<Bytes, Error> {
        let url = self
            .endpoint
            .join(url)
            .map_err(|err| Error::Url(format!("{url:?}: {err}")))?;

        let resp = self.client.get(url).send().await?.error_for_status()?;
        Ok(resp.bytes().await?)
    }
}
