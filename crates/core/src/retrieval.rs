//! Knowledge retrieval domain types and the vector search trait.
//!
//! The vector search engine is an external collaborator: a black-box
//! nearest-neighbor service queried with an embedding and a collection name.
//! The `VectorIndex` trait is the seam; the HTTP client lives in
//! `lorebook-retrieval`, mocks live next to the tests that need them.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::RetrievalError;

/// A single ranked hit from the vector search backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorHit {
    /// Similarity score, higher is better.
    pub score: f32,

    /// The indexed text of the hit.
    #[serde(default)]
    pub text: String,

    /// Backend metadata attached to the hit. Expected to carry an `answer`
    /// string for fragment extraction; shape is otherwise backend-defined.
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// A retrieved knowledge snippet. Ephemeral — assembled into a prompt and
/// dropped, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeFragment {
    /// The extracted answer text.
    pub text: String,

    /// Similarity score of the originating hit.
    pub score: f32,

    /// Metadata carried along for diagnostics.
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// The nearest-neighbor search backend.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// A human-readable name for this backend (e.g., "milvus").
    fn name(&self) -> &str;

    /// Top-K search against a named collection.
    ///
    /// Returns hits ranked best-first. An empty result is a normal outcome,
    /// not an error.
    async fn search(
        &self,
        collection: &str,
        vector: &[f32],
        top_k: usize,
    ) -> std::result::Result<Vec<VectorHit>, RetrievalError>;

    /// Health check — can we reach the backend?
    async fn health_check(&self) -> std::result::Result<bool, RetrievalError> {
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hit_deserializes_with_defaults() {
        let hit: VectorHit = serde_json::from_str(r#"{"score": 0.87}"#).unwrap();
        assert!((hit.score - 0.87).abs() < f32::EPSILON);
        assert!(hit.text.is_empty());
        assert!(hit.metadata.is_null());
    }

    #[test]
    fn fragment_serialization_roundtrip() {
        let mut metadata = serde_json::Map::new();
        metadata.insert("answer".into(), serde_json::json!("Paris"));

        let fragment = KnowledgeFragment {
            text: "Paris".into(),
            score: 0.92,
            metadata,
        };
        let json = serde_json::to_string(&fragment).unwrap();
        let parsed: KnowledgeFragment = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.text, "Paris");
        assert_eq!(parsed.metadata["answer"], serde_json::json!("Paris"));
    }
}
