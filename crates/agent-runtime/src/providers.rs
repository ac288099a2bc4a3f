//! Model backend selection
//!
//! Maps a provider name plus its settings onto a ready [`ModelHandle`].
//! Hosted providers without a credential are refused here, at startup,
//! instead of failing on the first task.

use agent_core::error::{AgentError, Result};
use agent_core::provider::{GenerationOptions, LlmProvider, ModelHandle};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::openai::OpenAiCompatible;

pub const OPENROUTER_KEY: &str = "OPENROUTER_KEY";
pub const OPENAI_API_KEY: &str = "OPENAI_API_KEY";

const OPENROUTER_BASE_URL: &str = "https://openrouter.ai/api/v1";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Supported model backends
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProviderKind {
    Ollama,
    OpenRouter,
    OpenAi,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ollama => "ollama",
            Self::OpenRouter => "openrouter",
            Self::OpenAi => "openai",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            Self::Ollama => "llama3.2",
            Self::OpenRouter => "z-ai/glm-4.5-air:free",
            Self::OpenAi => "gpt-4o-mini",
        }
    }
}

impl FromStr for ProviderKind {
    type Err = AgentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openrouter" => Ok(Self::OpenRouter),
            "openai" => Ok(Self::OpenAi),
            other => Err(AgentError::Config(format!(
                "unknown provider '{other}' (expected ollama, openrouter or openai)"
            ))),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Settings for every backend; only the selected one is consulted
#[derive(Clone, Debug)]
pub struct ProviderOptions {
    pub ollama_endpoint: String,
    pub ollama_model: Option<String>,
    pub openrouter_key: Option<String>,
    pub openrouter_base_url: String,
    pub openrouter_model: Option<String>,
    pub openai_key: Option<String>,
    pub openai_base_url: String,
    pub openai_model: Option<String>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    /// Bound on one hosted completion request
    pub request_timeout: Duration,
}

impl Default for ProviderOptions {
    fn default() -> Self {
        Self {
            ollama_endpoint: "http://localhost:11434".into(),
            ollama_model: None,
            openrouter_key: None,
            openrouter_base_url: OPENROUTER_BASE_URL.into(),
            openrouter_model: None,
            openai_key: None,
            openai_base_url: OPENAI_BASE_URL.into(),
            openai_model: None,
            temperature: None,
            max_tokens: None,
            request_timeout: Duration::from_secs(120),
        }
    }
}

impl ProviderOptions {
    /// Read provider keys through `lookup` (normally the process environment)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        Ok(Self {
            ollama_endpoint: get("OLLAMA_ENDPOINT")
                .or_else(|| get("OLLAMA_HOST"))
                .unwrap_or(defaults.ollama_endpoint),
            ollama_model: get("OLLAMA_MODEL_ID"),
            openrouter_key: get(OPENROUTER_KEY),
            openrouter_base_url: get("OPENROUTER_BASE_URL").unwrap_or(defaults.openrouter_base_url),
            openrouter_model: get("OPENROUTER_MODEL_ID"),
            openai_key: get(OPENAI_API_KEY),
            openai_base_url: get("OPENAI_BASE_URL").unwrap_or(defaults.openai_base_url),
            openai_model: get("OPENAI_MODEL_ID"),
            temperature: parse_opt(get("LLM_TEMPERATURE"), "LLM_TEMPERATURE")?,
            max_tokens: parse_opt(get("LLM_MAX_TOKENS"), "LLM_MAX_TOKENS")?,
            request_timeout: defaults.request_timeout,
        })
    }

    fn generation(&self, model: String) -> GenerationOptions {
        let mut options = GenerationOptions {
            model,
            ..Default::default()
        };
        if let Some(t) = self.temperature {
            options.temperature = t;
        }
        if let Some(n) = self.max_tokens {
            options.max_tokens = n;
        }
        options
    }
}

fn parse_opt<T: FromStr>(raw: Option<String>, key: &str) -> Result<Option<T>> {
    raw.map(|v| {
        v.parse()
            .map_err(|_| AgentError::Config(format!("{key}: cannot parse '{v}'")))
    })
    .transpose()
}

fn credential(key: Option<&String>, kind: ProviderKind, name: &str) -> Result<String> {
    key.cloned().ok_or_else(|| AgentError::MissingCredential {
        provider: kind.to_string(),
        key: name.into(),
    })
}

/// Build the model handle for provider `name`
pub fn resolve(name: &str, options: &ProviderOptions) -> Result<ModelHandle> {
    let kind: ProviderKind = name.parse()?;

    let (provider, model): (Arc<dyn LlmProvider>, Option<&String>) = match kind {
        ProviderKind::Ollama => (ollama(options)?, options.ollama_model.as_ref()),
        ProviderKind::OpenRouter => {
            let key = credential(options.openrouter_key.as_ref(), kind, OPENROUTER_KEY)?;
            let provider = OpenAiCompatible::new(
                kind.as_str(),
                &options.openrouter_base_url,
                key,
                options.request_timeout,
            )?;
            (Arc::new(provider), options.openrouter_model.as_ref())
        }
        ProviderKind::OpenAi => {
            let key = credential(options.openai_key.as_ref(), kind, OPENAI_API_KEY)?;
            let provider =
                OpenAiCompatible::new(kind.as_str(), &options.openai_base_url, key, options.request_timeout)?;
            (Arc::new(provider), options.openai_model.as_ref())
        }
    };

    let model = model.cloned().unwrap_or_else(|| kind.default_model().to_string());
    tracing::info!(provider = %kind, model = %model, "Model backend selected");
    Ok(ModelHandle::new(provider, options.generation(model)))
}

#[cfg(feature = "ollama")]
fn ollama(options: &ProviderOptions) -> Result<Arc<dyn LlmProvider>> {
    use crate::ollama::{OllamaConfig, OllamaProvider};

    let config = OllamaConfig::from_endpoint(&options.ollama_endpoint)?;
    Ok(Arc::new(OllamaProvider::from_config(config)))
}

#[cfg(not(feature = "ollama"))]
fn ollama(_options: &ProviderOptions) -> Result<Arc<dyn LlmProvider>> {
    Err(AgentError::Config("built without the `ollama` feature".into()))
}
