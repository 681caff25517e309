pub mod ollama_client;
pub mod openrouter_client;

pub use ollama_client::{OllamaClient, DEFAULT_OLLAMA_URL};
pub use openrouter_client::{OpenRouterClient, DEFAULT_OPENROUTER_MODEL, DEFAULT_OPENROUTER_URL};
