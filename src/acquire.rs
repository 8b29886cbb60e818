//! Outbound HTTP: CAPTCHA download, page scraping and form posts
//!
//! One `HttpSession` serves one invocation. Its agent keeps a private cookie
//! jar, so the CAPTCHA fetch and a following form post share the portal's
//! session cookie without anything outliving the request.

use crate::error::PipelineError;
use image::DynamicImage;
use std::sync::Arc;
use std::time::Duration;
use ureq::Agent;

/// Downloaded or uploaded image bytes, not yet decoded
#[derive(Debug, Clone)]
pub struct RawImage {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
}

impl RawImage {
    pub fn new(bytes: Vec<u8>, content_type: Option<String>) -> Self {
        Self {
            bytes,
            content_type,
        }
    }

    /// Decode into pixels; an undecodable body counts as a failed download
    pub fn decode(&self) -> Result<DynamicImage, PipelineError> {
        if let Some(mime) = &self.content_type {
            if !mime.starts_with("image/") && mime != "application/octet-stream" {
                tracing::warn!("Decoding image with content type: {}", mime);
            }
        }

        image::load_from_memory(&self.bytes)
            .map_err(|e| PipelineError::Download(format!("Failed to decode image: {}", e)))
    }
}

/// Raw reply to a form post
#[derive(Debug)]
pub struct FormReply {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// HTTP agent plus the headers sent with every request
#[derive(Clone)]
pub struct HttpSession {
    agent: Agent,
    headers: Arc<Vec<(String, String)>>,
    max_body: u64,
}

impl HttpSession {
    pub fn new(timeout: Duration, max_body: usize, headers: Vec<(String, String)>) -> Self {
        let config = Agent::config_builder()
            .timeout_global(Some(timeout))
            .build();

        Self {
            agent: Agent::new_with_config(config),
            headers: Arc::new(headers),
            max_body: max_body as u64,
        }
    }

    /// Download an image; any non-2xx status is a download error
    pub fn fetch_image(&self, url: &str) -> Result<RawImage, PipelineError> {
        let mut request = self.agent.get(url);
        for (name, value) in self.headers.iter() {
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request.call().map_err(|e| match e {
            ureq::Error::StatusCode(status) => {
                PipelineError::Download(format!("{} returned HTTP {}", url, status))
            }
            other => PipelineError::Download(format!("Failed to fetch {}: {}", url, other)),
        })?;

        let content_type = header_value(response.headers(), "content-type");
        let bytes = response
            .into_body()
            .with_config()
            .limit(self.max_body)
            .read_to_vec()
            .map_err(|e| PipelineError::Download(format!("Failed to read image body: {}", e)))?;

        tracing::debug!("Fetched {} bytes from {}", bytes.len(), url);

        Ok(RawImage::new(bytes, content_type))
    }

    /// Fetch an HTML page as text
    pub fn fetch_page(&self, url: &str) -> Result<String, PipelineError> {
        let mut request = self.agent.get(url);
        for (name, value) in self.headers.iter() {
            request = request.header(name.as_str(), value.as_str());
        }

        request
            .call()
            .map_err(|e| PipelineError::Download(format!("Failed to fetch page {}: {}", url, e)))?
            .into_body()
            .read_to_string()
            .map_err(|e| PipelineError::Download(format!("Failed to read page {}: {}", url, e)))
    }

    /// Post an urlencoded form and return the reply whatever its status
    pub fn post_form(&self, url: &str, fields: &[(String, String)]) -> Result<FormReply, ureq::Error> {
        let mut request = self.agent.post(url);
        for (name, value) in self.headers.iter() {
            if name.eq_ignore_ascii_case("content-type") {
                continue;
            }
            request = request.header(name.as_str(), value.as_str());
        }

        let response = request
            .config()
            .http_status_as_error(false)
            .build()
            .send_form(fields.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;

        let status = response.status().as_u16();
        let content_type = header_value(response.headers(), "content-type");
        let body = response
            .into_body()
            .with_config()
            .limit(self.max_body)
            .read_to_vec()?;

        Ok(FormReply {
            status,
            content_type,
            body,
        })
    }
}

fn header_value(headers: &ureq::http::HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string())
}
