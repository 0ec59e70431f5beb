use async_trait::async_trait;

use crate::{LlmResult, ModelRequest, ModelResponse};

/// Backend-agnostic interface for the model provider.
///
/// The analysis engine only sees this trait; tests swap in a scripted
/// implementation and production wires the HTTP client.
#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn complete(&self, request: ModelRequest) -> LlmResult<ModelResponse>;

    fn backend_name(&self) -> &'static str;
}
