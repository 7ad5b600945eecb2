//! AD-012: Inference transport seam.
//!
//! The core hands each attempt to an `InferenceClient` and never looks past
//! the raw response text. Authentication, HTTP framing and provider quirks
//! live behind the trait.

pub mod scripted;

pub use scripted::ScriptedClient;

use crate::core::types::{InferenceParams, Verb};
use crate::error::TransportError;
use async_trait::async_trait;
use serde::Serialize;

/// One fully resolved inference call. Retries reuse it unchanged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InferenceRequest {
    pub record_id: u64,
    pub step: usize,
    pub verb: Verb,
    /// JSON-schema rendering of the step's structural schema
    pub schema: serde_json::Value,
    /// Prompt resource, generated instructions and examples
    pub system: String,
    /// Rendered input unit (plus the record so far, for drafting)
    pub input: String,
    pub params: InferenceParams,
}

/// Outbound inference collaborator.
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Return the raw response text, or a transport failure.
    async fn invoke(&self, request: &InferenceRequest) -> Result<String, TransportError>;
}
