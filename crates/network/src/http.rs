// -------------------------------------------------------------------------------------------------
//  Copyright (C) 2025 Meridian Contributors. All rights reserved.
//
//  Licensed under the GNU Lesser General Public License Version 3.0 (the "License");
//  You may not use this file except in compliance with the License.
//  You may obtain a copy of the License at https://www.gnu.org/licenses/lgpl-3.0.en.html
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.
// -------------------------------------------------------------------------------------------------

//! Single-shot HTTP transport built on reqwest.

use std::{collections::HashMap, time::Duration};

use async_trait::async_trait;
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue, header::CONTENT_TYPE};

use crate::{
    error::TransportError,
    tls::install_crypto_provider,
    transport::{HttpResponse, RequestTransport},
};

/// Configuration for an [`HttpTransport`].
#[derive(Clone, Debug)]
pub struct HttpTransportConfig {
    /// The endpoint every request is posted to.
    pub url: String,
    /// Extra headers sent with every request.
    pub headers: Vec<(String, String)>,
}

impl HttpTransportConfig {
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: Vec::new(),
        }
    }
}

/// A [`RequestTransport`] posting JSON bodies to a fixed endpoint.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    url: String,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Creates a new [`HttpTransport`].
    ///
    /// # Errors
    ///
    /// Returns an error if a header is invalid or the underlying client cannot be built.
    pub fn new(config: HttpTransportConfig) -> Result<Self, TransportError> {
        install_crypto_provider();

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        for (key, val) in &config.headers {
            let name: HeaderName = key
                .parse()
                .map_err(|e| TransportError::InvalidConfig(format!("header '{key}': {e}")))?;
            let value = HeaderValue::from_str(val)
                .map_err(|e| TransportError::InvalidConfig(format!("header '{key}': {e}")))?;
            headers.insert(name, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            url: config.url,
            client,
        })
    }

    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl RequestTransport for HttpTransport {
    async fn request(&self, body: Bytes, timeout: Duration) -> Result<HttpResponse, TransportError> {
        tracing::trace!("POST {} ({} bytes)", self.url, body.len());

        let exchange = async {
            let response = self.client.post(&self.url).body(body).send().await?;

            let status = response.status().as_u16();
            let headers: HashMap<String, String> = response
                .headers()
                .iter()
                .map(|(k, v)| {
                    (
                        k.as_str().to_string(),
                        String::from_utf8_lossy(v.as_bytes()).into_owned(),
                    )
                })
                .collect();
            let body = response.bytes().await?;

            Ok::<_, TransportError>(HttpResponse {
                status,
                headers,
                body,
            })
        };

        let response = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| TransportError::RequestTimeout(timeout.as_millis() as u64))??;

        tracing::trace!("Response status {}", response.status);
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn test_invalid_header_is_rejected() {
        let mut config = HttpTransportConfig::new("http://127.0.0.1:1");
        config.headers.push(("bad header".to_string(), "x".to_string()));

        let result = HttpTransport::new(config);

        assert!(matches!(result, Err(TransportError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_returns_http_error() {
        // Port 1 is privileged and nothing listens there in test environments
        let transport = HttpTransport::new(HttpTransportConfig::new("http://127.0.0.1:1")).unwrap();

        let result = transport
            .request(Bytes::from_static(b"{}"), Duration::from_secs(5))
            .await;

        assert!(matches!(
            result,
            Err(TransportError::Http(_) | TransportError::RequestTimeout(_))
        ));
    }
}
