use serde::{Deserialize, Serialize};
use std::time::Duration;

/// One block of the system prompt. Blocks marked `cache` carry a
/// provider-side cache-control hint so a repeated prefix is deduplicated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemBlock {
    pub text: String,
    #[serde(default)]
    pub cache: bool,
}

impl SystemBlock {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cache: false,
        }
    }

    pub fn cached(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cache: true,
        }
    }
}

/// User-message content blocks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ContentBlock {
    Text(String),
    /// Base64-encoded image bytes
    Image {
        media_type: String,
        data: String,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        ContentBlock::Text(text.into())
    }

    pub fn png(bytes: &[u8]) -> Self {
        use base64::Engine as _;
        ContentBlock::Image {
            media_type: "image/png".to_string(),
            data: base64::engine::general_purpose::STANDARD.encode(bytes),
        }
    }
}

/// A single-turn completion request
#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub system: Vec<SystemBlock>,
    pub content: Vec<ContentBlock>,
    pub max_tokens: u32,
    /// Thinking budget in tokens; large budgets force a streamed call
    pub thinking_budget: Option<u32>,
    /// Enable the provider's web-search tool with this use cap
    pub web_search_max_uses: Option<u32>,
    pub timeout: Duration,
}

impl ModelRequest {
    pub fn new(system: Vec<SystemBlock>, content: Vec<ContentBlock>) -> Self {
        Self {
            system,
            content,
            max_tokens: 4096,
            thinking_budget: None,
            web_search_max_uses: None,
            timeout: Duration::from_secs(60),
        }
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_thinking_budget(mut self, budget: u32) -> Self {
        self.thinking_budget = Some(budget);
        self
    }

    pub fn with_web_search(mut self, max_uses: u32) -> Self {
        self.web_search_max_uses = Some(max_uses);
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Joined text of a completion
#[derive(Debug, Clone, Default)]
pub struct ModelResponse {
    pub text: String,
    pub stop_reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn png_block_encodes_base64() {
        match ContentBlock::png(b"foobar") {
            ContentBlock::Image { media_type, data } => {
                assert_eq!(media_type, "image/png");
                assert_eq!(data, "Zm9vYmFy");
            }
            other => panic!("unexpected block: {other:?}"),
        }
    }

    #[test]
    fn request_builder_defaults() {
        let req = ModelRequest::new(vec![SystemBlock::cached("sys")], vec![ContentBlock::text("hi")]);
        assert_eq!(req.max_tokens, 4096);
        assert!(req.thinking_budget.is_none());
        assert!(req.system[0].cache);
    }
}
