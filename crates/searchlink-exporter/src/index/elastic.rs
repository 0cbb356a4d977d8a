//! Elasticsearch-compatible HTTP adapter for the index client
//!
//! Speaks the document CRUD subset of the Elasticsearch REST API:
//!
//! - create: `PUT {host}/{index}/{doc_type}/{id}?op_type=create` (409 on duplicate)
//! - update: `POST {host}/{index}/{doc_type}/{id}/_update` with a `doc` wrapper
//! - delete: `DELETE {host}/{index}/{doc_type}/{id}` (404 when absent)
//!
//! Hosts come from the binding's backend configuration and are tried in
//! order when a host is unreachable.

use async_trait::async_trait;
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode};
use std::time::Duration;

use super::{DeleteOutcome, DocumentTarget, IndexClient, IndexError, IndexResult};

/// Default timeout for index requests in seconds.
/// Can be overridden via SEARCHLINK_INDEX_TIMEOUT_SECS environment variable.
pub const DEFAULT_INDEX_TIMEOUT_SECS: u64 = 30;

/// Index client speaking the Elasticsearch document API over HTTP
#[derive(Debug, Clone)]
pub struct EsClient {
    client: Client,
}

impl EsClient {
    /// Create a new client with the default (or env-overridden) timeout
    pub fn new() -> IndexResult<Self> {
        let timeout_secs = std::env::var("SEARCHLINK_INDEX_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_INDEX_TIMEOUT_SECS);

        Self::with_timeout(Duration::from_secs(timeout_secs))
    }

    /// Create a new client with an explicit request timeout
    pub fn with_timeout(timeout: Duration) -> IndexResult<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    fn document_url(host: &str, target: &DocumentTarget<'_>, suffix: &str) -> String {
        format!(
            "{}/{}/{}/{}{}",
            host.trim_end_matches('/'),
            target.index,
            target.doc_type,
            target.id,
            suffix
        )
    }

    /// Send a request to the first reachable host.
    ///
    /// Only connection-level failures trigger failover; once a host answers,
    /// its response (success or not) is the response.
    async fn send_with_failover<F>(
        &self,
        target: &DocumentTarget<'_>,
        method: Method,
        suffix: &str,
        decorate: F,
    ) -> IndexResult<Response>
    where
        F: Fn(RequestBuilder) -> RequestBuilder,
    {
        if target.hosts.is_empty() {
            return Err(IndexError::NoHosts);
        }

        let mut last_err: Option<reqwest::Error> = None;
        for host in target.hosts {
            let url = Self::document_url(host, target, suffix);
            let request = decorate(self.client.request(method.clone(), &url));
            match request.send().await {
                Ok(response) => return Ok(response),
                Err(err) if err.is_connect() || err.is_timeout() => {
                    tracing::warn!(host = %host, error = %err, "Index host unreachable, trying next");
                    last_err = Some(err);
                },
                Err(err) => return Err(err.into()),
            }
        }

        // All hosts were unreachable; surface the last failure.
        match last_err {
            Some(err) => Err(err.into()),
            None => Err(IndexError::NoHosts),
        }
    }

    async fn protocol_error(response: Response) -> IndexError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        IndexError::Protocol { status, body }
    }
}

#[async_trait]
impl IndexClient for EsClient {
    async fn create_document(&self, target: &DocumentTarget<'_>, body: &str) -> IndexResult<()> {
        let response = self
            .send_with_failover(target, Method::PUT, "", |req| {
                req.query(&[("op_type", "create")])
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(body.to_string())
            })
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(IndexError::Conflict {
                index: target.index.to_string(),
                doc_type: target.doc_type.to_string(),
                id: target.id,
            }),
            _ => Err(Self::protocol_error(response).await),
        }
    }

    async fn update_document(&self, target: &DocumentTarget<'_>, body: &str) -> IndexResult<()> {
        // The _update endpoint expects the partial document under "doc".
        let wrapped = format!("{{\"doc\":{}}}", body);
        let response = self
            .send_with_failover(target, Method::POST, "/_update", |req| {
                req.header(header::CONTENT_TYPE, "application/json")
                    .body(wrapped.clone())
            })
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::NOT_FOUND => Err(IndexError::NotFound {
                index: target.index.to_string(),
                doc_type: target.doc_type.to_string(),
                id: target.id,
            }),
            _ => Err(Self::protocol_error(response).await),
        }
    }

    async fn delete_document(&self, target: &DocumentTarget<'_>) -> IndexResult<DeleteOutcome> {
        let response = self
            .send_with_failover(target, Method::DELETE, "", |req| req)
            .await?;

        match response.status() {
            status if status.is_success() => Ok(DeleteOutcome::Deleted),
            StatusCode::NOT_FOUND => Ok(DeleteOutcome::NotFound),
            _ => Err(Self::protocol_error(response).await),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_document_url_strips_trailing_slash() {
        let hosts = vec!["http://localhost:9200/".to_string()];
        let id = Uuid::nil();
        let target = DocumentTarget {
            hosts: &hosts,
            index: "records",
            doc_type: "record",
            id,
        };
        assert_eq!(
            EsClient::document_url(&hosts[0], &target, "/_update"),
            format!("http://localhost:9200/records/record/{}/_update", id)
        );
    }
}
