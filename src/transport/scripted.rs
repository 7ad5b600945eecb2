//! Scripted inference client for dry runs and tests.

use super::{InferenceClient, InferenceRequest};
use crate::error::TransportError;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

type Responder = dyn Fn(&InferenceRequest) -> Result<String, TransportError> + Send + Sync;

/// Answers every request from a closure. Records what it was asked.
pub struct ScriptedClient {
    responder: Box<Responder>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    requests: Mutex<Vec<InferenceRequest>>,
}

impl ScriptedClient {
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&InferenceRequest) -> Result<String, TransportError> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            delay: None,
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Same response for every request.
    pub fn always(response: impl Into<String>) -> Self {
        let response = response.into();
        Self::new(move |_| Ok(response.clone()))
    }

    /// Responses in order; the last one repeats once the script runs out.
    pub fn sequence(script: Vec<Result<String, TransportError>>) -> Self {
        let script = Mutex::new(VecDeque::from(script));
        Self::new(move |_| {
            let mut script = script
                .lock()
                .map_err(|_| TransportError("script lock poisoned".to_string()))?;
            match script.len() {
                0 => Err(TransportError("script exhausted".to_string())),
                1 => script[0].clone(),
                _ => script
                    .pop_front()
                    .unwrap_or_else(|| Err(TransportError("script exhausted".to_string()))),
            }
        })
    }

    /// Sleep before answering each request.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Number of `invoke` calls that returned.
    pub fn invocations(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests received so far, in arrival order.
    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl InferenceClient for ScriptedClient {
    async fn invoke(&self, request: &InferenceRequest) -> Result<String, TransportError> {
        if let Ok(mut log) = self.requests.lock() {
            log.push(request.clone());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let response = (self.responder)(request);
        self.calls.fetch_add(1, Ordering::SeqCst);
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::params::defaults_for;
    use crate::core::types::Verb;

    fn request(record_id: u64) -> InferenceRequest {
        InferenceRequest {
            record_id,
            step: 0,
            verb: Verb::Extract,
            schema: serde_json::json!({"type": "object"}),
            system: "sys".into(),
            input: "text".into(),
            params: defaults_for(Verb::Extract),
        }
    }

    #[tokio::test]
    async fn test_ad012_always() {
        let client = ScriptedClient::always("{\"a\": 1}");
        assert_eq!(client.invoke(&request(1)).await.unwrap(), "{\"a\": 1}");
        assert_eq!(client.invoke(&request(2)).await.unwrap(), "{\"a\": 1}");
        assert_eq!(client.invocations(), 2);
        assert_eq!(client.requests()[1].record_id, 2);
    }

    #[tokio::test]
    async fn test_ad012_sequence_repeats_last() {
        let client = ScriptedClient::sequence(vec![
            Err(TransportError("503".into())),
            Ok("first".into()),
            Ok("last".into()),
        ]);
        assert_eq!(client.invoke(&request(1)).await, Err(TransportError("503".into())));
        assert_eq!(client.invoke(&request(1)).await.unwrap(), "first");
        assert_eq!(client.invoke(&request(1)).await.unwrap(), "last");
        assert_eq!(client.invoke(&request(1)).await.unwrap(), "last");
    }

    #[tokio::test]
    async fn test_ad012_closure_sees_request() {
        let client = ScriptedClient::new(|req| Ok(format!("record {}", req.record_id)));
        assert_eq!(client.invoke(&request(7)).await.unwrap(), "record 7");
    }

    #[tokio::test(start_paused = true)]
    async fn test_ad012_delay() {
        let client = ScriptedClient::always("x").with_delay(Duration::from_secs(5));
        let started = tokio::time::Instant::now();
        client.invoke(&request(1)).await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(5));
    }
}
