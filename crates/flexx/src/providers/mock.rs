use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::base::{Completion, CompletionDelta, CompletionRequest, CompletionStream, Provider};

/// A mock provider that returns pre-configured responses for testing
#[derive(Default)]
pub struct MockProvider {
    completion: Option<Completion>,
    complete_error: Option<String>,
    deltas: Vec<std::result::Result<CompletionDelta, String>>,
    stream_error: Option<String>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_completion(mut self, completion: Completion) -> Self {
        self.completion = Some(completion);
        self
    }

    /// Make `complete` fail with the given message
    pub fn with_complete_error(mut self, error: &str) -> Self {
        self.complete_error = Some(error.to_string());
        self
    }

    /// Items yielded by `stream`, an `Err` becomes an iteration failure
    pub fn with_deltas(mut self, deltas: Vec<std::result::Result<CompletionDelta, String>>) -> Self {
        self.deltas = deltas;
        self
    }

    /// Make `stream` fail before yielding anything
    pub fn with_stream_error(mut self, error: &str) -> Self {
        self.stream_error = Some(error.to_string());
        self
    }

    /// Handle to the requests received so far
    pub fn requests(&self) -> Arc<Mutex<Vec<CompletionRequest>>> {
        self.requests.clone()
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn complete(&self, request: &CompletionRequest) -> Result<Completion> {
        self.requests.lock().unwrap().push(request.clone());
        match &self.complete_error {
            Some(error) => Err(anyhow!(error.clone())),
            None => Ok(self.completion.clone().unwrap_or_default()),
        }
    }

    async fn stream(&self, request: &CompletionRequest) -> Result<CompletionStream> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(error) = &self.stream_error {
            return Err(anyhow!(error.clone()));
        }

        let items: Vec<Result<CompletionDelta>> = self
            .deltas
            .iter()
            .cloned()
            .map(|item| item.map_err(|e| anyhow!(e)))
            .collect();
        Ok(Box::pin(futures::stream::iter(items)))
    }
}
