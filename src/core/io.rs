//! AD-009: Collaborator seams for sources, sinks and named resources.
//!
//! Concrete file, directory or endpoint adapters live outside the core; the
//! in-memory adapters here back `run_one`, dry runs and tests.

use super::types::{InputUnit, RecordResult, ResourceKind};
use crate::error::{ResourceError, SinkError, SourceError};
use async_trait::async_trait;
use indexmap::IndexMap;
use std::collections::VecDeque;
use std::sync::Mutex;

/// Lazy, finite, non-restartable sequence of input units.
#[async_trait]
pub trait RecordSource: Send {
    /// `None` once exhausted. An `Err` item fails that unit only.
    async fn next_unit(&mut self) -> Option<Result<InputUnit, SourceError>>;
}

/// Receives one result at a time.
pub trait RecordSink: Send + Sync {
    fn accept(&self, result: &RecordResult) -> Result<(), SinkError>;
}

/// Resolves a named prompt or examples resource to text.
pub trait ResourceLoader: Send + Sync {
    fn load(&self, kind: ResourceKind, name: &str) -> Result<String, ResourceError>;
}

/// Source over an owned queue of units.
#[derive(Debug, Default)]
pub struct VecSource {
    units: VecDeque<Result<InputUnit, SourceError>>,
}

impl VecSource {
    pub fn new(units: Vec<InputUnit>) -> Self {
        Self {
            units: units.into_iter().map(Ok).collect(),
        }
    }

    /// Plain text units.
    pub fn from_texts<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(texts.into_iter().map(|t| InputUnit::Text(t.into())).collect())
    }

    /// Units interleaved with read failures.
    pub fn with_results(units: Vec<Result<InputUnit, SourceError>>) -> Self {
        Self {
            units: units.into(),
        }
    }
}

#[async_trait]
impl RecordSource for VecSource {
    async fn next_unit(&mut self) -> Option<Result<InputUnit, SourceError>> {
        self.units.pop_front()
    }
}

/// Collects results in arrival order.
#[derive(Debug, Default)]
pub struct MemorySink {
    results: Mutex<Vec<RecordResult>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn results(&self) -> Vec<RecordResult> {
        self.results.lock().map(|r| r.clone()).unwrap_or_default()
    }

    /// Results ordered by record id.
    pub fn sorted(&self) -> Vec<RecordResult> {
        let mut results = self.results();
        results.sort_by_key(|r| r.record_id);
        results
    }
}

impl RecordSink for MemorySink {
    fn accept(&self, result: &RecordResult) -> Result<(), SinkError> {
        self.results
            .lock()
            .map_err(|_| SinkError("sink lock poisoned".to_string()))?
            .push(result.clone());
        Ok(())
    }
}

/// Named resources held in memory.
#[derive(Debug, Clone, Default)]
pub struct MemoryResources {
    entries: IndexMap<(ResourceKind, String), String>,
}

impl MemoryResources {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_prompt(mut self, name: &str, text: &str) -> Self {
        self.entries
            .insert((ResourceKind::Prompt, name.to_string()), text.to_string());
        self
    }

    pub fn with_examples(mut self, name: &str, text: &str) -> Self {
        self.entries
            .insert((ResourceKind::Examples, name.to_string()), text.to_string());
        self
    }
}

impl ResourceLoader for MemoryResources {
    fn load(&self, kind: ResourceKind, name: &str) -> Result<String, ResourceError> {
        self.entries
            .get(&(kind, name.to_string()))
            .cloned()
            .ok_or_else(|| ResourceError {
                kind,
                name: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RecordStatus;

    #[tokio::test]
    async fn test_ad009_vec_source_drains_in_order() {
        let mut src = VecSource::from_texts(["a", "b"]);
        assert_eq!(src.next_unit().await, Some(Ok(InputUnit::Text("a".into()))));
        assert_eq!(src.next_unit().await, Some(Ok(InputUnit::Text("b".into()))));
        assert_eq!(src.next_unit().await, None);
        assert_eq!(src.next_unit().await, None);
    }

    #[tokio::test]
    async fn test_ad009_vec_source_with_failures() {
        let mut src = VecSource::with_results(vec![
            Err(SourceError("row 2: bad quoting".into())),
            Ok(InputUnit::Text("ok".into())),
        ]);
        assert!(matches!(src.next_unit().await, Some(Err(_))));
        assert!(matches!(src.next_unit().await, Some(Ok(_))));
    }

    #[test]
    fn test_ad009_memory_sink_sorted() {
        let sink = MemorySink::new();
        for id in [3u64, 1, 2] {
            sink.accept(&RecordResult {
                record_id: id,
                input_ref: String::new(),
                status: RecordStatus::Completed,
                record: Default::default(),
                flagged: false,
                flag_reasons: vec![],
                rule_errors: vec![],
            })
            .unwrap();
        }
        assert_eq!(sink.results()[0].record_id, 3);
        let ids: Vec<u64> = sink.sorted().iter().map(|r| r.record_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_ad009_memory_resources() {
        let res = MemoryResources::new()
            .with_prompt("ctx", "You are a data processor.")
            .with_examples("ctx", "INPUT: a\nOUTPUT: b\n");
        assert_eq!(res.load(ResourceKind::Prompt, "ctx").unwrap(), "You are a data processor.");
        assert!(res.load(ResourceKind::Examples, "ctx").unwrap().starts_with("INPUT"));
        let err = res.load(ResourceKind::Prompt, "missing").unwrap_err();
        assert_eq!(err.to_string(), "prompt resource 'missing' not found");
    }
}
