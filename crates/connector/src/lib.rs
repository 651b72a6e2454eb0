pub mod anthropic;
pub mod chat;
pub mod error;
pub mod mock;
pub mod openai;
pub mod registry;
pub mod secret;
pub mod sse;

pub use anthropic::AnthropicConnector;
pub use chat::{ChatConnector, ChatOutcome, ChunkStream, StreamItem};
pub use error::ConnectorError;
pub use mock::{MockConnector, ScriptedCall, ScriptedFailure};
pub use openai::OpenAiConnector;
pub use registry::ConnectorRegistry;
pub use secret::{EnvSecretStore, SecretStore, StaticSecretStore};
pub use sse::{SseDecoder, DONE_MARKER};
