//! Controller relay: posts lock frames to the controller and decodes its replies

use std::time::Duration;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use latch_proto::{ActivationRequest, Command, RelayRequest};

pub const MESSAGE_RECEIVED_PATH: &str = "/_r/homekey_ble_message_received";
pub const AUTHENTICATED_PATH: &str = "/_r/homekey_authenticated";

#[derive(thiserror::Error, Debug)]
pub enum RelayError {
    #[error("invalid controller url: {0}")]
    InvalidUrl(String),
    #[error("failed to build request: {0}")]
    Request(#[from] hyper::http::Error),
    #[error("http error: {0}")]
    Http(#[from] hyper_util::client::legacy::Error),
    #[error("failed to read response body: {0}")]
    Body(#[from] hyper::Error),
    #[error("controller returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to encode request: {0}")]
    Encode(serde_json::Error),
    #[error("controller reply is not a command: {0}")]
    Decode(serde_json::Error),
    #[error("controller did not answer within {0:?}")]
    Timeout(Duration),
    #[error("controller replied with a command that is not valid here")]
    UnexpectedCommand,
}

/// Remote side of the relay: every frame from the lock yields one command
#[async_trait::async_trait]
pub trait Controller: Send + Sync + 'static {
    async fn relay(&self, serial: u32, payload: &[u8]) -> Result<Command, RelayError>;
}

/// Controller reached over HTTP/1.1 with JSON bodies
pub struct HttpController {
    base_url: String,
    timeout: Duration,
    client: Client<HttpConnector, Full<Bytes>>,
}

impl HttpController {
    pub fn new(base_url: &str, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            timeout,
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Ask the controller which lock to open for an authenticated endpoint
    pub async fn activate(&self, endpoint_id: &str) -> Result<Command, RelayError> {
        let body = ActivationRequest {
            endpoint_id: endpoint_id.to_string(),
        };
        match self.post(AUTHENTICATED_PATH, &body).await? {
            command @ Command::OpenChannel { .. } => {
                tracing::info!(endpoint_id, "controller returned activation data");
                Ok(command)
            }
            _ => Err(RelayError::UnexpectedCommand),
        }
    }

    async fn post<B: serde::Serialize>(&self, path: &str, body: &B) -> Result<Command, RelayError> {
        let url = format!("{}{path}", self.base_url);
        let uri: hyper::Uri = url.parse().map_err(|_| RelayError::InvalidUrl(url.clone()))?;
        let body = serde_json::to_vec(body).map_err(RelayError::Encode)?;

        let request = hyper::Request::post(uri)
            .header(hyper::header::CONTENT_TYPE, "application/json")
            .body(Full::new(Bytes::from(body)))?;

        let (status, bytes) = tokio::time::timeout(self.timeout, self.exchange(request))
            .await
            .map_err(|_| RelayError::Timeout(self.timeout))??;

        if status != hyper::StatusCode::OK {
            return Err(RelayError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        serde_json::from_slice(&bytes).map_err(RelayError::Decode)
    }

    async fn exchange(
        &self,
        request: hyper::Request<Full<Bytes>>,
    ) -> Result<(hyper::StatusCode, Bytes), RelayError> {
        let response = self.client.request(request).await?;
        let status = response.status();
        let bytes = response.into_body().collect().await?.to_bytes();
        Ok((status, bytes))
    }
}

#[async_trait::async_trait]
impl Controller for HttpController {
    async fn relay(&self, serial: u32, payload: &[u8]) -> Result<Command, RelayError> {
        let body = RelayRequest {
            serial,
            message: payload.to_vec(),
        };
        self.post(MESSAGE_RECEIVED_PATH, &body).await
    }
}
