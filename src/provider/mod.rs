pub mod client;
pub mod gemini;
pub mod retry;

use async_trait::async_trait;

pub use client::CompletionClient;
pub use gemini::GeminiProvider;
pub use retry::{BackoffStrategy, RetryPolicy};

/// A text-completion service that turns one prompt into one reply.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn generate(&self, api_key: &str, prompt: &str) -> Result<String, ProviderError>;
}

/// Failure reported by a completion provider, classified by cause.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Permission denied: {0}")]
    Permission(String),

    #[error("Quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Service overloaded: {0}")]
    Overloaded(String),

    #[error("Blocked by safety filters: {0}")]
    SafetyBlocked(String),

    #[error("Provider error: {0}")]
    Unknown(String),
}

impl ProviderError {
    /// Message shown to the end user. The detail stays in the logs.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Authentication(_) => {
                "Invalid API key or API endpoint not found. Please check your Gemini API key."
            }
            Self::Permission(_) => "API key is invalid or has insufficient permissions.",
            Self::QuotaExceeded(_) => "API quota exceeded. Please check your usage limits.",
            Self::Overloaded(_) => {
                "Gemini service is temporarily overloaded. Please try again in a few moments."
            }
            Self::SafetyBlocked(_) => "This request was blocked for safety reasons.",
            Self::Unknown(_) => "Failed to get response from Gemini",
        }
    }

    /// Whether a later attempt has a chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::QuotaExceeded(_) | Self::Overloaded(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_messages_are_distinct() {
        let errors = [
            ProviderError::Authentication(String::new()),
            ProviderError::Permission(String::new()),
            ProviderError::QuotaExceeded(String::new()),
            ProviderError::Overloaded(String::new()),
            ProviderError::SafetyBlocked(String::new()),
            ProviderError::Unknown(String::new()),
        ];

        let mut messages: Vec<&str> = errors.iter().map(|e| e.user_message()).collect();
        messages.sort();
        messages.dedup();
        assert_eq!(messages.len(), errors.len());
    }

    #[test]
    fn test_only_quota_and_overload_are_transient() {
        assert!(ProviderError::QuotaExceeded("429".into()).is_transient());
        assert!(ProviderError::Overloaded("503".into()).is_transient());
        assert!(!ProviderError::Authentication("401".into()).is_transient());
        assert!(!ProviderError::SafetyBlocked("SAFETY".into()).is_transient());
        assert!(!ProviderError::Unknown("?".into()).is_transient());
    }
}
