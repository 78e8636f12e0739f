//! BoxLlmClient -- object-safe dynamic dispatch wrapper for LlmClient.
//!
//! 1. `LlmClientDyn` is object-safe with boxed futures
//! 2. Blanket impl of `LlmClientDyn` for all `T: LlmClient`
//! 3. `BoxLlmClient` wraps `Box<dyn LlmClientDyn>` and delegates

use std::future::Future;
use std::pin::Pin;

use draftline_types::error::LlmError;
use draftline_types::message::Message;

use super::client::{GenerateRequest, LlmClient};

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Object-safe version of [`LlmClient`].
pub trait LlmClientDyn: Send + Sync {
    fn generate_boxed<'a>(&'a self, request: &'a GenerateRequest) -> BoxFuture<'a, Result<String, LlmError>>;

    fn summarize_boxed<'a>(
        &'a self,
        model: &'a str,
        messages: &'a [Message],
    ) -> BoxFuture<'a, Result<String, LlmError>>;

    fn estimate_tokens(&self, model: &str, text: &str) -> Result<u32, LlmError>;
}

impl<T: LlmClient> LlmClientDyn for T {
    fn generate_boxed<'a>(&'a self, request: &'a GenerateRequest) -> BoxFuture<'a, Result<String, LlmError>> {
        Box::pin(self.generate(request))
    }

    fn summarize_boxed<'a>(
        &'a self,
        model: &'a str,
        messages: &'a [Message],
    ) -> BoxFuture<'a, Result<String, LlmError>> {
        Box::pin(self.summarize(model, messages))
    }

    fn estimate_tokens(&self, model: &str, text: &str) -> Result<u32, LlmError> {
        LlmClient::estimate_tokens(self, model, text)
    }
}

/// Type-erased LLM client, shared by steps and the context manager.
pub struct BoxLlmClient {
    inner: Box<dyn LlmClientDyn + Send + Sync>,
}

impl BoxLlmClient {
    pub fn new<T: LlmClient + 'static>(client: T) -> Self {
        Self {
            inner: Box::new(client),
        }
    }

    pub async fn generate(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        self.inner.generate_boxed(request).await
    }

    pub async fn summarize(&self, model: &str, messages: &[Message]) -> Result<String, LlmError> {
        self.inner.summarize_boxed(model, messages).await
    }

    pub fn estimate_tokens(&self, model: &str, text: &str) -> Result<u32, LlmError> {
        self.inner.estimate_tokens(model, text)
    }
}

impl std::fmt::Debug for BoxLlmClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxLlmClient").finish_non_exhaustive()
    }
}
