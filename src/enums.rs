use std::collections::BTreeMap;
use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};

use crate::error::HelixError;

/// Controlled-vocabulary lookup: display value to opaque registry tag,
/// one map per category (file types, analysis types, experiment types...).
pub trait EnumClient: Send + Sync {
    fn lookup(&self, category: &str) -> Result<BTreeMap<String, String>, HelixError>;
}

#[derive(Clone)]
pub struct EnumHttpClient {
    client: Client,
    base_url: String,
}

impl EnumHttpClient {
    pub fn new(base_url: &str) -> Result<Self, HelixError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("helix-sub/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| HelixError::EnumHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|err| HelixError::EnumHttp(err.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

impl EnumClient for EnumHttpClient {
    fn lookup(&self, category: &str) -> Result<BTreeMap<String, String>, HelixError> {
        let url = format!("{}/enums/{category}", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .map_err(|err| HelixError::EnumHttp(err.to_string()))?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let message = response
                .text()
                .unwrap_or_else(|_| "enum request failed".to_string());
            return Err(HelixError::EnumStatus { status, message });
        }
        response
            .json::<BTreeMap<String, String>>()
            .map_err(|err| HelixError::EnumHttp(err.to_string()))
    }
}
