//! Outbound request types.

use crate::config::{ServiceConfig, SessionConfig};
use crate::error::{Result, StreamError};
use serde::{Deserialize, Serialize};

/// Operation carried by a message on a duplex session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[cfg_attr(feature = "uniffi", derive(uniffi::Enum))]
pub enum OperationType {
    Embed,
    Search,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Embed => "embed",
            OperationType::Search => "search",
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accelerator options attached to embedding requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "uniffi", derive(uniffi::Record))]
pub struct AccelerationOptions {
    pub use_tensor_cores: bool,
    pub batch_size: u32,
    pub enable_memory_pool: bool,
}

impl Default for AccelerationOptions {
    fn default() -> Self {
        Self {
            use_tensor_cores: true,
            batch_size: 1,
            enable_memory_pool: true,
        }
    }
}

/// A single message written on a duplex session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceRequest {
    pub session_id: String,
    pub operation_type: OperationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_text: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub embedding_vector: Vec<f32>,
    pub is_final_chunk: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cuda_options: Option<AccelerationOptions>,
}

impl InferenceRequest {
    /// Build an embedding chunk request.
    pub fn embedding(
        session_id: impl Into<String>,
        text: impl Into<String>,
        is_final: bool,
        options: AccelerationOptions,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            operation_type: OperationType::Embed,
            raw_text: Some(text.into()),
            embedding_vector: Vec::new(),
            is_final_chunk: is_final,
            cuda_options: Some(options),
        }
    }

    /// Build a vector search request. Search requests carry no accelerator options.
    pub fn search(session_id: impl Into<String>, vector: Vec<f32>, is_final: bool) -> Self {
        Self {
            session_id: session_id.into(),
            operation_type: OperationType::Search,
            raw_text: None,
            embedding_vector: vector,
            is_final_chunk: is_final,
            cuda_options: None,
        }
    }
}

/// Processing stages requested for a document job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "uniffi", derive(uniffi::Record))]
pub struct ProcessingFlags {
    pub extract_entities: bool,
    pub generate_summary: bool,
    pub compute_embeddings: bool,
    pub analyze_sentiment: bool,
    pub detect_clauses: bool,
}

impl ProcessingFlags {
    /// Default flags for a document type. Clause detection only runs on contracts.
    pub fn for_document_type(document_type: &str) -> Self {
        Self {
            extract_entities: true,
            generate_summary: true,
            compute_embeddings: true,
            analyze_sentiment: true,
            detect_clauses: document_type == ServiceConfig::CONTRACT_DOCUMENT_TYPE,
        }
    }
}

/// Request for the document processing stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRequest {
    pub document_id: String,
    pub document_content: String,
    pub document_type: String,
    pub flags: ProcessingFlags,
}

impl DocumentRequest {
    pub fn new(
        document_id: impl Into<String>,
        document_content: impl Into<String>,
        document_type: impl Into<String>,
    ) -> Self {
        let document_type = document_type.into();
        Self {
            document_id: document_id.into(),
            document_content: document_content.into(),
            flags: ProcessingFlags::for_document_type(&document_type),
            document_type,
        }
    }

    pub fn validate(&self) -> Result<()> {
        require_non_empty("document_id", &self.document_id)
    }
}

/// Filters applied to a semantic search. Empty means unfiltered.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "uniffi", derive(uniffi::Record))]
pub struct SearchFilters {
    #[serde(default)]
    pub document_types: Vec<String>,
    #[serde(default)]
    pub jurisdictions: Vec<String>,
}

/// Request for the semantic search stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub collection_name: String,
    pub top_k: u32,
    pub enable_reranking: bool,
    pub filters: SearchFilters,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>, collection_name: impl Into<String>, top_k: u32) -> Self {
        Self {
            query: query.into(),
            collection_name: collection_name.into(),
            top_k,
            enable_reranking: true,
            filters: SearchFilters::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        require_non_empty("query", &self.query)?;
        require_non_empty("collection_name", &self.collection_name)?;
        if self.top_k == 0 {
            return Err(StreamError::Validation {
                field: "top_k".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Similarity dimensions requested for a case comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "uniffi", derive(uniffi::Record))]
pub struct SimilarityMetrics {
    pub factual_similarity: bool,
    pub legal_precedent_similarity: bool,
    pub outcome_similarity: bool,
    pub procedural_similarity: bool,
}

impl Default for SimilarityMetrics {
    fn default() -> Self {
        Self {
            factual_similarity: true,
            legal_precedent_similarity: true,
            outcome_similarity: true,
            procedural_similarity: true,
        }
    }
}

/// Request for the case similarity stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityRequest {
    pub base_case_id: String,
    pub compare_case_ids: Vec<String>,
    pub requested_metrics: SimilarityMetrics,
}

impl SimilarityRequest {
    pub fn new(base_case_id: impl Into<String>, compare_case_ids: Vec<String>) -> Self {
        Self {
            base_case_id: base_case_id.into(),
            compare_case_ids,
            requested_metrics: SimilarityMetrics::default(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        require_non_empty("base_case_id", &self.base_case_id)
    }
}

/// Check a caller-supplied session id before it reaches the registry.
pub fn validate_session_id(session_id: &str) -> Result<()> {
    require_non_empty("session_id", session_id)?;
    if session_id.len() > SessionConfig::MAX_SESSION_ID_LEN {
        return Err(StreamError::Validation {
            field: "session_id".to_string(),
            message: format!(
                "length {} exceeds maximum {}",
                session_id.len(),
                SessionConfig::MAX_SESSION_ID_LEN
            ),
        });
    }
    Ok(())
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(StreamError::Validation {
            field: field.to_string(),
            message: "must not be empty".to_string(),
        });
    }
    Ok(())
}
