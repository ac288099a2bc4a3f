//! # agent-runtime
//!
//! Concrete transports behind the `agent-core` traits.
//!
//! ## Providers
//!
//! - **Ollama** (default): Local LLM inference via Ollama
//! - **OpenRouter** / **OpenAI**: hosted, OpenAI-compatible chat completions
//!
//! ## Transports
//!
//! - [`mcp::McpConnector`]: tool bridge over MCP streamable HTTP
//! - [`a2a::A2aClient`]: delegation to peer agents
//!
//! ## Usage
//!
//! ```rust,ignore
//! use agent_runtime::providers::{resolve, ProviderOptions};
//!
//! let options = ProviderOptions::from_lookup(|k| std::env::var(k).ok())?;
//! let model = resolve("ollama", &options)?;
//! ```

pub mod a2a;
pub mod mcp;
pub mod openai;
pub mod providers;
pub mod sse;

#[cfg(feature = "ollama")]
pub mod ollama;

pub use a2a::A2aClient;
pub use mcp::McpConnector;
pub use providers::{ProviderKind, ProviderOptions, resolve};

#[cfg(feature = "ollama")]
pub use ollama::OllamaProvider;
