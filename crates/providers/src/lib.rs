pub mod openai_compat;
pub mod traits;
pub mod unconfigured;

pub use openai_compat::OpenAiCompatProvider;
pub use traits::{ChatRequest, ChatResponse, LlmProvider};
pub use unconfigured::UnconfiguredProvider;
