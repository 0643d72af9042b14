use std::sync::Arc;

use crate::{
    dual_info,
    provider::{CompletionProvider, ProviderError, RetryPolicy},
};

/// Sends prompts to a [`CompletionProvider`] under a [`RetryPolicy`].
#[derive(Clone)]
pub struct CompletionClient {
    provider: Arc<dyn CompletionProvider>,
    policy: RetryPolicy,
}

impl CompletionClient {
    pub fn new(provider: Arc<dyn CompletionProvider>, policy: RetryPolicy) -> Self {
        Self { provider, policy }
    }

    /// Get a completion for `prompt`, retrying failed attempts per the policy.
    ///
    /// After the last allowed attempt the error of that attempt is returned.
    /// There is no cancellation: once started, the call runs through all
    /// attempts and backoff waits.
    pub async fn complete(&self, api_key: &str, prompt: &str) -> Result<String, ProviderError> {
        let text = self
            .policy
            .run(|_| self.provider.generate(api_key, prompt))
            .await?;

        dual_info!("Gemini response received (full length): {} characters", text.len());

        Ok(text)
    }
}
