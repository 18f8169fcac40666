use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use docscope_core::{AnalysisError, AnalysisRequest, AnalysisResult, AnalysisService, Config};
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::{debug, instrument, warn};

const PDF_MIME: &str = "application/pdf";

/// Client for the `/analyze` endpoint of the analysis service.
pub struct HttpAnalysisService {
    client: reqwest::Client,
    endpoint: String,
    timeout: Duration,
}

impl HttpAnalysisService {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("docscope/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            endpoint: analyze_endpoint(base_url),
            timeout,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.analyzer_url, config.request_timeout())
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_form(request: &AnalysisRequest) -> Result<Form, AnalysisError> {
        let mut form = Form::new();
        for file in &request.files {
            let part = Part::bytes(file.bytes.to_vec())
                .file_name(file.name.clone())
                .mime_str(PDF_MIME)
                .map_err(|err| AnalysisError::Transport(err.to_string()))?;
            form = form.part("files", part);
        }
        for (name, value) in text_fields(request) {
            form = form.text(name, value);
        }
        Ok(form)
    }
}

#[async_trait]
impl AnalysisService for HttpAnalysisService {
    #[instrument(skip_all, fields(endpoint = %self.endpoint))]
    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResult, AnalysisError> {
        let form = Self::build_form(request)?;
        debug!(
            files = request.files.len(),
            topics = %request.topics_field(),
            "posting analysis request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        let body = response.text().await.map_err(transport_error)?;
        if !status.is_success() {
            let err = error_for_status(status, &body);
            warn!(%status, "analysis service returned an error");
            return Err(err);
        }

        serde_json::from_str(&body).map_err(|err| AnalysisError::InvalidResponse(err.to_string()))
    }
}

fn analyze_endpoint(base_url: &str) -> String {
    format!("{}/analyze", base_url.trim_end_matches('/'))
}

/// Non-file form fields, in the order they are sent.
fn text_fields(request: &AnalysisRequest) -> [(&'static str, String); 3] {
    [
        ("topics", request.topics_field()),
        ("min_score", request.min_score_field()),
        (
            "generate_topics",
            request.generate_topics_field().to_string(),
        ),
    ]
}

#[derive(Deserialize)]
struct ServiceError {
    error: String,
}

fn error_for_status(status: StatusCode, body: &str) -> AnalysisError {
    let detail = serde_json::from_str::<ServiceError>(body)
        .ok()
        .map(|e| e.error)
        .filter(|e| !e.trim().is_empty());
    AnalysisError::Http {
        status: status.as_u16(),
        reason: status.canonical_reason().unwrap_or_default().to_string(),
        detail,
    }
}

fn transport_error(err: reqwest::Error) -> AnalysisError {
    if err.is_timeout() {
        AnalysisError::Transport("request timed out".to_string())
    } else {
        AnalysisError::Transport(err.to_string())
    }
}
