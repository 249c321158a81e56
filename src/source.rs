//! Remote numeric source.
//!
//! One call to [`SampleSource::fetch_sample`] is one round trip and yields one
//! sample. There are no retries here; failures go straight back to the
//! scheduler, which simply tries the slot again next cycle.

use crate::config::SourceConfig;
use crate::error::FetchError;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Something that can produce numeric samples.
///
/// The returned future must not borrow the source, so many fetches can be in
/// flight at once while the caller keeps mutating its own state.
pub trait SampleSource: Send + Sync + 'static {
    fn fetch_sample(&self) -> impl Future<Output = Result<f64, FetchError>> + Send + 'static;
}

/// Fetches samples over HTTP GET and reads one numeric JSON field.
#[derive(Debug, Clone)]
pub struct HttpSampleSource {
    client: reqwest::Client,
    url: Arc<str>,
    field: Arc<str>,
}

impl HttpSampleSource {
    /// Build a source from configuration. The HTTP client is shared by all
    /// fetches.
    pub fn new(config: &SourceConfig) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(config.user_agent.as_str())
            .build()?;

        Ok(Self::with_client(client, config))
    }

    /// Build a source around an existing client.
    pub fn with_client(client: reqwest::Client, config: &SourceConfig) -> Self {
        Self {
            client,
            url: Arc::from(config.url.as_str()),
            field: Arc::from(config.field.as_str()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl SampleSource for HttpSampleSource {
    fn fetch_sample(&self) -> impl Future<Output = Result<f64, FetchError>> + Send + 'static {
        let client = self.client.clone();
        let url = Arc::clone(&self.url);
        let field = Arc::clone(&self.field);

        async move {
            let response = client.get(url.as_ref()).send().await?;

            let status = response.status();
            if !status.is_success() {
                return Err(FetchError::Status(status));
            }

            let body = response.text().await?;
            trace!("Source body: {}", body);
            parse_sample(&body, &field)
        }
    }
}

/// Extract the sample from a response body.
///
/// The field may hold a number, a numeric string, or a one-element array of
/// either. A top-level `"success": false` marks the whole response as failed.
pub fn parse_sample(body: &str, field: &str) -> Result<f64, FetchError> {
    let json: Value = serde_json::from_str(body)?;

    if json.get("success").and_then(Value::as_bool) == Some(false) {
        return Err(FetchError::Rejected);
    }

    let raw = json.get(field).ok_or_else(|| FetchError::MissingField {
        field: field.to_string(),
    })?;

    let value = match raw {
        Value::Array(items) if items.len() == 1 => &items[0],
        other => other,
    };

    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };

    number
        .filter(|n| n.is_finite())
        .ok_or_else(|| FetchError::NotNumeric {
            field: field.to_string(),
            raw: raw.to_string(),
        })
}
