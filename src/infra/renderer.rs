//! HTTP client for the external rendering endpoint.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use url::Url;

use crate::{
    application::{
        params::RenderParameters,
        renderer::{FormulaRenderer, RenderError},
    },
    infra::error::InfraError,
};

/// Posts the parameter map as an urlencoded form and expects PNG bytes
/// back. The timeout applies to the whole call; rendering is synchronous
/// on the remote side.
#[derive(Debug, Clone)]
pub struct HttpRenderer {
    client: Client,
    endpoint: Url,
    timeout: Duration,
}

impl HttpRenderer {
    pub fn new(endpoint: Url, timeout: Duration) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(Self::user_agent())
            .timeout(timeout)
            .build()
            .map_err(|err| {
                InfraError::configuration(format!("failed to build render client: {err}"))
            })?;
        Ok(Self {
            client,
            endpoint,
            timeout,
        })
    }

    pub fn user_agent() -> &'static str {
        concat!("formella/", env!("CARGO_PKG_VERSION"))
    }

    fn classify(&self, err: reqwest::Error) -> RenderError {
        if err.is_timeout() {
            RenderError::Timeout(self.timeout)
        } else {
            RenderError::Transport(Box::new(err))
        }
    }
}

#[async_trait]
impl FormulaRenderer for HttpRenderer {
    async fn render(&self, params: &RenderParameters) -> Result<Bytes, RenderError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .form(&params.entries())
            .send()
            .await
            .map_err(|err| self.classify(err))?;

        let status = response.status();
        if !status.is_success() {
            return Err(RenderError::Status {
                status: status.as_u16(),
            });
        }

        response.bytes().await.map_err(|err| self.classify(err))
    }
}
