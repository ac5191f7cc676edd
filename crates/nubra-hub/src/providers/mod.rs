pub mod chatbase;
pub mod openai;

pub use chatbase::ChatbaseProvider;
pub use openai::OpenAiProvider;

use std::sync::Arc;

use nubra_core::error::Result;
use nubra_core::provider::{LlmProvider, ProviderConfig};

/// Build the provider named in the config.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn LlmProvider>> {
    match config.provider.as_str() {
        "chatbase" => Ok(Arc::new(ChatbaseProvider::new(config)?)),
        _ => Ok(Arc::new(OpenAiProvider::new(config.clone()))),
    }
}
