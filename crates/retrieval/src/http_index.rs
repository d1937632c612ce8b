//! HTTP vector index client.
//!
//! Talks to a Milvus-style REST v2 search endpoint. The backend is a black
//! box to the rest of the system: vectors in, ranked hits out. Any engine
//! exposing the same search contract can sit behind this client.

use async_trait::async_trait;
use lorebook_core::error::RetrievalError;
use lorebook_core::retrieval::{VectorHit, VectorIndex};
use serde::Deserialize;
use tracing::{debug, warn};

/// A vector search backend reached over HTTP.
pub struct HttpVectorIndex {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl HttpVectorIndex {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            client,
        }
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.post(url).header("Content-Type", "application/json");
        if let Some(token) = &self.token {
            req = req.header("Authorization", format!("Bearer {token}"));
        }
        req
    }
}

#[async_trait]
impl VectorIndex for HttpVectorIndex {
    fn name(&self) -> &str {
        "milvus"
    }

    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> std::result::Result<Vec<VectorHit>, RetrievalError> {
        let url = format!("{}/v2/vectordb/entities/search", self.base_url);

        let body = serde_json::json!({
            "collectionName": collection,
            "data": [vector],
            "limit": top_k,
            "outputFields": ["vector_text", "metadata"],
        });

        debug!(collection, top_k, "Vector search request");

        let response = self
            .request(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| RetrievalError::Search(e.to_string()))?;

        let status = response.status().as_u16();
        if status != 200 {
            let error_body = response.text().await.unwrap_or_default();
            warn!(status, body = %error_body, "Vector backend returned error");
            return Err(RetrievalError::Search(format!(
                "search returned status {status}: {error_body}"
            )));
        }

        let api_resp: SearchResponse = response
            .json()
            .await
            .map_err(|e| RetrievalError::Search(format!("failed to parse search response: {e}")))?;

        if api_resp.code != 0 {
            return Err(RetrievalError::Search(format!(
                "backend error code {}: {}",
                api_resp.code,
                api_resp.message.unwrap_or_default()
            )));
        }

        let hits = api_resp
            .data
            .into_iter()
            .map(|h| VectorHit {
                score: h.distance,
                text: h.vector_text.unwrap_or_default(),
                metadata: h.metadata,
            })
            .collect();

        Ok(hits)
    }

    async fn health_check(&self) -> std::result::Result<bool, RetrievalError> {
        let url = format!("{}/v2/vectordb/collections/list", self.base_url);
        let response = self
            .request(&url)
            .json(&serde_json::json!({}))
            .send()
            .await
            .map_err(|e| RetrievalError::Search(e.to_string()))?;

        Ok(response.status().is_success())
    }
}

// --- Wire types ---

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    code: i64,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    data: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    distance: f32,
    #[serde(default)]
    vector_text: Option<String>,
    #[serde(default)]
    metadata: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_slash_stripped() {
        let index = HttpVectorIndex::new("http://localhost:19530/", None);
        assert_eq!(index.base_url, "http://localhost:19530");
    }

    #[test]
    fn parse_search_response() {
        let data = r#"{
            "code": 0,
            "data": [
                {"distance": 0.91, "vector_text": "Q: who edited module five?",
                 "metadata": {"answer": "The module was edited by the standards team."}},
                {"distance": 0.74, "vector_text": "Q: publication date?",
                 "metadata": {"answer": "Published in 2021."}}
            ]
        }"#;
        let parsed: SearchResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.code, 0);
        assert_eq!(parsed.data.len(), 2);
        assert!((parsed.data[0].distance - 0.91).abs() < f32::EPSILON);
        assert_eq!(
            parsed.data[0].metadata["answer"],
            serde_json::json!("The module was edited by the standards team.")
        );
    }

    #[test]
    fn parse_backend_error() {
        let data = r#"{"code": 1100, "message": "collection not found"}"#;
        let parsed: SearchResponse = serde_json::from_str(data).unwrap();
        assert_eq!(parsed.code, 1100);
        assert_eq!(parsed.message.as_deref(), Some("collection not found"));
        assert!(parsed.data.is_empty());
    }
}
