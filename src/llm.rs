use anyhow::Result;

/// A text-generation backend.
///
/// Implementations sample deterministically (temperature 0). Errors from the
/// provider are returned unchanged; nothing here retries.
#[allow(async_fn_in_trait)]
pub trait LanguageModel {
    async fn complete(&self, prompt: &str) -> Result<String>;
}
