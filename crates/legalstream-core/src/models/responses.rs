//! Inbound response types.

use serde::{Deserialize, Serialize};

/// Accelerator timing reported alongside a session response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "uniffi", derive(uniffi::Record))]
pub struct AcceleratorMetrics {
    #[serde(default)]
    pub total_processing_time_us: u64,
    #[serde(default)]
    pub gpu_utilization: f32,
    #[serde(default)]
    pub gpu_model: String,
}

/// A message received on a duplex session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "uniffi", derive(uniffi::Record))]
pub struct InferenceResponse {
    pub session_id: String,
    /// Kept as text: the remote may answer with operations this client never sends.
    #[serde(default)]
    pub operation_type: String,
    #[serde(default)]
    pub status: i32,
    #[serde(default)]
    pub computed_embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cuda_metrics: Option<AcceleratorMetrics>,
}

/// Progress or result message from a document job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "uniffi", derive(uniffi::Record))]
pub struct DocumentResponse {
    pub document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f32>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default)]
    pub embedding: Vec<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<f32>,
    #[serde(default)]
    pub clauses: Vec<String>,
}

/// One ranked hit in a semantic search response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "uniffi", derive(uniffi::Record))]
pub struct SearchHit {
    pub document_id: String,
    pub score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snippet: Option<String>,
}

/// A batch of results from the semantic search stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "uniffi", derive(uniffi::Record))]
pub struct SearchResponse {
    pub query_id: String,
    #[serde(default)]
    pub results: Vec<SearchHit>,
}

/// Similarity scores for one compared case.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "uniffi", derive(uniffi::Record))]
pub struct SimilarityResponse {
    pub base_case_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compared_case_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factual_similarity: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub legal_precedent_similarity: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outcome_similarity: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub procedural_similarity: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overall_score: Option<f32>,
}
