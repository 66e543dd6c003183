use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::Client;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::constants::gateway::{API_VERSION, ENCODING};
use crate::error::GatewayError;

/// Duplex text transport underneath a gateway session.
#[async_trait]
pub trait Transport: Send {
    async fn open(&mut self) -> Result<(), GatewayError>;

    async fn send(&mut self, text: String) -> Result<(), GatewayError>;

    /// Next text frame. `None` means the peer closed the connection.
    async fn recv(&mut self) -> Option<Result<String, GatewayError>>;

    async fn close(&mut self);

    fn is_open(&self) -> bool;
}

/// Add the version and encoding query the gateway expects.
pub fn gateway_url_with_query(base: &str) -> Result<String, GatewayError> {
    let mut url = Url::parse(base).map_err(|e| GatewayError::GatewayUrl(format!("{}: {}", base, e)))?;
    url.query_pairs_mut()
        .clear()
        .append_pair("v", API_VERSION)
        .append_pair("encoding", ENCODING);
    Ok(url.to_string())
}

/// Ask the REST API which gateway endpoint to use.
pub async fn discover_gateway_url(client: &Client, api_base: &str, token: &str) -> Result<String, GatewayError> {
    let endpoint = format!("{}/gateway", api_base.trim_end_matches('/'));
    let mut request = client.get(&endpoint);
    if !token.is_empty() {
        request = request.header("Authorization", token);
    }

    let response = request
        .send()
        .await
        .map_err(|e| GatewayError::GatewayUrl(e.to_string()))?;
    if !response.status().is_success() {
        return Err(GatewayError::GatewayUrl(format!(
            "{} returned {}",
            endpoint,
            response.status()
        )));
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| GatewayError::GatewayUrl(e.to_string()))?;
    let url = body
        .get("url")
        .and_then(|v| v.as_str())
        .ok_or_else(|| GatewayError::GatewayUrl("response has no url".into()))?;

    gateway_url_with_query(url)
}

pub struct WsTransport {
    url: String,
    stream: Option<WebSocketStream<MaybeTlsStream<TcpStream>>>,
}

impl WsTransport {
    pub fn new(url: String) -> Self {
        Self { url, stream: None }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn open(&mut self) -> Result<(), GatewayError> {
        info!("🔗 [GATEWAY] Connecting to {}", self.url);
        let (stream, _) = connect_async(self.url.as_str())
            .await
            .map_err(|e| GatewayError::Connect {
                url: self.url.clone(),
                reason: e.to_string(),
            })?;
        self.stream = Some(stream);
        Ok(())
    }

    async fn send(&mut self, text: String) -> Result<(), GatewayError> {
        let stream = self.stream.as_mut().ok_or(GatewayError::NotOpen)?;
        stream
            .send(Message::Text(text))
            .await
            .map_err(|e| GatewayError::WebSocket(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, GatewayError>> {
        let stream = self.stream.as_mut()?;
        loop {
            match stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => warn!("[GATEWAY] Dropping non-UTF8 binary frame"),
                },
                Ok(Message::Ping(payload)) => {
                    if let Err(e) = stream.send(Message::Pong(payload)).await {
                        return Some(Err(GatewayError::WebSocket(e.to_string())));
                    }
                }
                Ok(Message::Close(frame)) => {
                    debug!("[GATEWAY] Close frame: {:?}", frame);
                    return None;
                }
                Ok(_) => {}
                Err(e) => return Some(Err(GatewayError::WebSocket(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            if let Err(e) = stream.close(None).await {
                debug!("[GATEWAY] Close failed: {}", e);
            }
        }
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }
}
