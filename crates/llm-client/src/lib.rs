mod anthropic;
mod error;
mod provider;
mod request;

pub use anthropic::AnthropicClient;
pub use error::{LlmError, LlmResult};
pub use provider::ModelProvider;
pub use request::{ContentBlock, ModelRequest, ModelResponse, SystemBlock};
