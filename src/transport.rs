//! Outbound contract to the console's query endpoints, plus the reqwest
//! implementation used by the binary.
//!
//! The transport only moves bytes; decoding is the stream decoder's job and
//! run policy is the coordinator's.

use std::pin::Pin;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::TransportError;
use crate::model::QueryId;

/// Response body of an execute request, chunked however the network
/// delivers it.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, TransportError>> + Send>>;

/// Body of the execute request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryRequest {
    pub sql: String,
    pub query_id: QueryId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    #[serde(rename = "pageSize", skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
}

impl QueryRequest {
    pub fn new(sql: impl Into<String>, query_id: QueryId) -> Self {
        Self { sql: sql.into(), query_id, page: None, page_size: None }
    }

    pub fn with_page(mut self, page: Option<Page>) -> Self {
        if let Some(p) = page {
            self.page = Some(p.page);
            self.page_size = Some(p.page_size);
        }
        self
    }
}

/// Requested window of a paginated run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Page {
    pub page: u32,
    pub page_size: u32,
}

#[derive(Serialize)]
struct CancelRequest<'a> {
    #[serde(rename = "queryId")]
    query_id: &'a str,
}

/// Authenticated channel to the query interface.
///
/// `execute` resolves once response headers are in; a non-2xx status is an
/// `Err` before any body is read.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: &QueryRequest) -> Result<ByteStream, TransportError>;

    /// Best-effort kill of a running query. Callers do not wait on it.
    async fn cancel(&self, query_id: &QueryId) -> Result<(), TransportError>;
}

/*──────────────────────── HTTP implementation ─────────────────*/
#[derive(Clone)]
pub struct HttpTransport {
    base_url: String,
    http_client: reqwest::Client,
    token: Option<String>,
}

impl HttpTransport {
    /// No overall request timeout is set: a run is bounded by the server's
    /// own limits and by cancellation.
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let http_client = reqwest::Client::builder()
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            http_client,
            token,
        })
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let url = format!("{}/{}", self.base_url, path);
        let req = self.http_client.post(url);
        match &self.token {
            Some(t) => req.bearer_auth(t),
            None => req,
        }
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn execute(&self, request: &QueryRequest) -> Result<ByteStream, TransportError> {
        debug!(query_id = %request.query_id, "POST api/query");
        let response = self.post("api/query").json(request).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = error_message_from_body(&body);
            warn!(query_id = %request.query_id, status = status.as_u16(), %message, "query request rejected");
            return Err(match status.as_u16() {
                401 | 403 => TransportError::Unauthorized { status: status.as_u16(), message },
                code => TransportError::Status { status: code, message },
            });
        }

        Ok(Box::pin(response.bytes_stream().map(|chunk| chunk.map_err(TransportError::from))))
    }

    async fn cancel(&self, query_id: &QueryId) -> Result<(), TransportError> {
        debug!(%query_id, "POST api/query/cancel");
        let response = self
            .post("api/query/cancel")
            .json(&CancelRequest { query_id: query_id.as_str() })
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(TransportError::Status {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            })
        }
    }
}

/// Pull a readable message out of an error body: `{"error":{"message":..}}`,
/// `{"error":".."}`, `{"message":".."}`, or the raw text.
fn error_message_from_body(body: &str) -> String {
    let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();
    let from_json = parsed.as_ref().and_then(|v| {
        v.pointer("/error/message")
            .or_else(|| v.get("error"))
            .or_else(|| v.get("message"))
            .and_then(|m| m.as_str())
            .map(str::to_owned)
    });
    match from_json {
        Some(m) => m,
        None if body.trim().is_empty() => "empty response".to_owned(),
        None => body.trim().to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_shape() {
        let id = QueryId::generate();
        let req = QueryRequest::new("SELECT 1", id.clone());
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            serde_json::json!({ "sql": "SELECT 1", "query_id": id.as_str() })
        );

        let paged = req.with_page(Some(Page { page: 2, page_size: 50 }));
        assert_eq!(
            serde_json::to_value(&paged).unwrap(),
            serde_json::json!({ "sql": "SELECT 1", "query_id": id.as_str(), "page": 2, "pageSize": 50 })
        );
    }

    #[test]
    fn error_bodies() {
        assert_eq!(error_message_from_body(r#"{"error":{"message":"bad sql"}}"#), "bad sql");
        assert_eq!(error_message_from_body(r#"{"error":"no session"}"#), "no session");
        assert_eq!(error_message_from_body("gateway timeout\n"), "gateway timeout");
        assert_eq!(error_message_from_body(""), "empty response");
    }
}
