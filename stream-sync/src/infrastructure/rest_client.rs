use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::{Deserialize, de::DeserializeOwned};
use sync_core::{DepthSnapshot, PriceLevel, TimestampMs};
use thiserror::Error;

use crate::domain::{CredentialSource, FetchError, SessionIssuer, SnapshotProvider};

const SPOT_DEPTH_PATH: &str = "/api/v3/depth";
const SPOT_LISTEN_KEY_PATH: &str = "/api/v3/userDataStream";
const FUTURES_DEPTH_PATH: &str = "/fapi/v1/depth";
const FUTURES_LISTEN_KEY_PATH: &str = "/fapi/v1/listenKey";

#[derive(Error, Debug)]
pub enum RestError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error: {code} - {msg}")]
    Api { code: i64, msg: String },
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Convert infrastructure RestError to domain FetchError
impl From<RestError> for FetchError {
    fn from(err: RestError) -> Self {
        match err {
            RestError::Http(e) => FetchError::Network(e.to_string()),
            RestError::Api { code, msg } => FetchError::Api { code, message: msg },
            RestError::Parse(msg) => FetchError::Parse(msg),
        }
    }
}

/// REST client for a Binance-compatible venue
/// Infrastructure component - serves depth snapshots and listen keys
#[derive(Clone)]
pub struct RestClient {
    client: Client,
    base_url: String,
    depth_path: String,
    listen_key_path: String,
}

impl RestClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        RestClient {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            depth_path: SPOT_DEPTH_PATH.to_string(),
            listen_key_path: SPOT_LISTEN_KEY_PATH.to_string(),
        }
    }

    /// Client for USDⓈ-M futures endpoints
    pub fn futures(base_url: impl Into<String>) -> Self {
        Self::new(base_url)
            .with_depth_path(FUTURES_DEPTH_PATH)
            .with_listen_key_path(FUTURES_LISTEN_KEY_PATH)
    }

    pub fn with_depth_path(mut self, path: impl Into<String>) -> Self {
        self.depth_path = path.into();
        self
    }

    pub fn with_listen_key_path(mut self, path: impl Into<String>) -> Self {
        self.listen_key_path = path.into();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Get order book depth snapshot
    pub async fn get_depth(&self, symbol: &str, limit: Option<u32>) -> Result<DepthResponse, RestError> {
        let limit = limit.unwrap_or(100);
        let path = format!("{}?symbol={}&limit={}", self.depth_path, symbol.to_uppercase(), limit);
        self.call(Method::GET, &path, None).await
    }

    /// Create a listen key for the user data stream
    pub async fn create_listen_key(&self, api_key: &str) -> Result<String, RestError> {
        #[derive(Deserialize)]
        struct ListenKeyResponse {
            #[serde(rename = "listenKey")]
            listen_key: String,
        }

        let resp: ListenKeyResponse = self
            .call(Method::POST, &self.listen_key_path, Some(api_key))
            .await?;
        Ok(resp.listen_key)
    }

    /// Extend a listen key's validity
    pub async fn keepalive_listen_key(&self, api_key: &str, listen_key: &str) -> Result<(), RestError> {
        let path = format!("{}?listenKey={}", self.listen_key_path, listen_key);
        let _: serde_json::Value = self.call(Method::PUT, &path, Some(api_key)).await?;
        Ok(())
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        api_key: Option<&str>,
    ) -> Result<T, RestError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.request(method, &url);
        if let Some(api_key) = api_key {
            request = request.header("X-MBX-APIKEY", api_key);
        }
        let resp = request.send().await?;

        self.handle_response(resp).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, RestError> {
        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            if let Ok(err) = serde_json::from_str::<ApiError>(&text) {
                return Err(RestError::Api {
                    code: err.code,
                    msg: err.msg,
                });
            }
            return Err(RestError::Parse(format!("HTTP {}: {}", status, text)));
        }

        serde_json::from_str(&text).map_err(|e| RestError::Parse(e.to_string()))
    }
}

#[derive(Deserialize)]
struct ApiError {
    code: i64,
    msg: String,
}

/// Depth endpoint payload
#[derive(Debug, Clone, Deserialize)]
pub struct DepthResponse {
    #[serde(rename = "lastUpdateId")]
    pub last_update_id: u64,
    /// Futures only: message output time
    #[serde(rename = "E", default)]
    pub event_time: Option<TimestampMs>,
    pub bids: Vec<[String; 2]>,
    pub asks: Vec<[String; 2]>,
}

impl TryFrom<DepthResponse> for DepthSnapshot {
    type Error = RestError;

    fn try_from(resp: DepthResponse) -> Result<Self, Self::Error> {
        let bids = PriceLevel::parse_all(&resp.bids).map_err(|e| RestError::Parse(e.to_string()))?;
        let asks = PriceLevel::parse_all(&resp.asks).map_err(|e| RestError::Parse(e.to_string()))?;
        let snapshot = DepthSnapshot::new(resp.last_update_id, bids, asks);
        Ok(match resp.event_time {
            Some(timestamp) => snapshot.with_timestamp(timestamp),
            None => snapshot,
        })
    }
}

#[async_trait]
impl SnapshotProvider for RestClient {
    async fn fetch_snapshot(
        &self,
        symbol: &str,
        depth: Option<u32>,
    ) -> Result<DepthSnapshot, FetchError> {
        let resp = self.get_depth(symbol, depth).await?;
        Ok(DepthSnapshot::try_from(resp)?)
    }
}

#[async_trait]
impl SessionIssuer for RestClient {
    async fn issue(&self, credentials: &dyn CredentialSource) -> Result<String, FetchError> {
        Ok(self.create_listen_key(credentials.api_key()).await?)
    }

    async fn extend(
        &self,
        credentials: &dyn CredentialSource,
        token: &str,
    ) -> Result<(), FetchError> {
        Ok(self
            .keepalive_listen_key(credentials.api_key(), token)
            .await?)
    }
}
