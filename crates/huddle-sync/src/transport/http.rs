use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use reqwest::{Client, RequestBuilder};
use tracing::debug;

use huddle_types::api::{AppendAck, AppendRequest, WireMessage};
use huddle_types::{Cursor, GroupId};

use crate::error::{Result, SyncError};
use crate::transport::MessageApi;

/// [`MessageApi`] over the backend's REST endpoints:
/// `GET /messages`, `POST /messages` and `GET /health`.
///
/// Requests carry no client-wide timeout; callers bound each call with the
/// budget that fits it (listing, send or liveness).
pub struct HttpMessageApi {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpMessageApi {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .build()
            .map_err(|e| SyncError::TransportUnavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
        })
    }

    /// Attach `Authorization: Bearer <token>` to every request.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl MessageApi for HttpMessageApi {
    async fn list_since(&self, group: &GroupId, since: Option<Cursor>) -> Result<Vec<WireMessage>> {
        let mut query = vec![("groupId", group.to_string())];
        if let Some(cursor) = since {
            query.push(("since", cursor.to_rfc3339()));
        }

        let resp = self
            .authorize(self.client.get(self.url("/messages")).query(&query))
            .send()
            .await
            .map_err(|e| SyncError::TransportUnavailable(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SyncError::TransportUnavailable(format!(
                "listing returned {}",
                status
            )));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| SyncError::TransportUnavailable(e.to_string()))?;

        serde_json::from_slice(&body).map_err(|e| SyncError::MalformedBatch(e.to_string()))
    }

    async fn append(&self, request: &AppendRequest) -> Result<AppendAck> {
        let body =
            serde_json::to_vec(request).map_err(|e| SyncError::SendFailed(e.to_string()))?;

        let resp = self
            .authorize(self.client.post(self.url("/messages")))
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| SyncError::SendFailed(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(SyncError::SendFailed(format!("append returned {}", status)));
        }

        // A 2xx without a readable body still means the row was stored
        let body = resp.bytes().await.unwrap_or_default();
        match serde_json::from_slice::<AppendAck>(&body) {
            Ok(ack) => Ok(ack),
            Err(e) => {
                debug!("Append acknowledged without ack body: {}", e);
                Ok(AppendAck { ack: true })
            }
        }
    }

    async fn liveness(&self) -> Result<()> {
        let resp = self
            .authorize(self.client.get(self.url("/health")))
            .send()
            .await
            .map_err(|e| SyncError::TransportUnavailable(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(SyncError::TransportUnavailable(format!(
                "liveness returned {}",
                resp.status()
            )))
        }
    }
}
