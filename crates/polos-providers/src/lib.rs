pub mod anthropic;
pub mod error;
pub mod generic;
pub mod openai;
pub mod provider;
pub mod registry;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use error::ProviderError;
pub use generic::GenericOpenAiCompatibleProvider;
pub use openai::OpenAiProvider;
pub use provider::{EventStream, Provider};
pub use registry::ProviderRegistry;
pub use types::{
    FunctionCall, GenerateRequest, GenerateResponse, HistoryEntry, StreamEvent, ToolCallRequest,
    ToolDefinition, Usage,
};
