//! Server configuration
//!
//! Parsed once at startup from environment-style keys. Every key is read
//! through a lookup function, so tests can supply a map instead of the
//! process environment.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use agent_core::bridge::BridgeTimeouts;
use agent_core::card::CardIdentity;
use agent_core::error::{AgentError, Result};
use agent_core::reasoning::{AgentConfig, DEFAULT_SYSTEM_PROMPT, InvalidActionPolicy};
use agent_core::retry::RetryPolicy;
use agent_runtime::providers::ProviderOptions;

const DEFAULT_NAME: &str = "Hubitat Agent";
const DEFAULT_DESCRIPTION: &str = "Controls and reports on the devices of a Hubitat smart home hub";

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub name: String,
    pub description: String,

    /// Selected model backend name
    pub provider: String,
    pub providers: ProviderOptions,

    /// Tool-invocation endpoint, if this agent has one
    pub tool_endpoint: Option<String>,
    pub peer_urls: Vec<String>,

    pub bind_host: String,
    pub bind_port: u16,
    /// URL advertised in the card
    pub public_url: String,
    pub cors_permissive: bool,

    pub bridge_timeouts: BridgeTimeouts,
    pub discovery_timeout: Duration,
    pub retry: RetryPolicy,

    pub agent: AgentConfig,

    /// `None` disables periodic capability refresh
    pub card_refresh: Option<Duration>,
}

impl ServerConfig {
    /// Read from the process environment
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let bind_host = get("BIND_HOST").unwrap_or_else(|| "127.0.0.1".into());
        let bind_port = parse_or(get("BIND_PORT"), "BIND_PORT", 9002)?;
        let public_url = get("PUBLIC_URL").unwrap_or_else(|| format!("http://{bind_host}:{bind_port}"));

        let connect = secs(parse_or(get("CONNECT_TIMEOUT_SECS"), "CONNECT_TIMEOUT_SECS", 10)?);
        let invoke = parse_opt(get("INVOKE_TIMEOUT_SECS"), "INVOKE_TIMEOUT_SECS")?.map_or(connect, secs);
        let discovery = parse_opt(get("DISCOVERY_TIMEOUT_SECS"), "DISCOVERY_TIMEOUT_SECS")?.map_or(connect, secs);
        let per_tool = match get("TOOL_TIMEOUT_OVERRIDES") {
            Some(raw) => parse_overrides(&raw)?,
            None => HashMap::new(),
        };

        let retry = RetryPolicy::new(
            parse_or(get("RETRY_ATTEMPTS"), "RETRY_ATTEMPTS", 3)?,
            Duration::from_millis(parse_or(get("RETRY_BASE_MS"), "RETRY_BASE_MS", 500)?),
        );

        let agent = AgentConfig {
            system_prompt: get("AGENT_SYSTEM_PROMPT").unwrap_or_else(|| DEFAULT_SYSTEM_PROMPT.into()),
            max_iterations: parse_or(get("MAX_ITERATIONS"), "MAX_ITERATIONS", 10)?,
            max_replans: parse_or(get("MAX_REPLANS"), "MAX_REPLANS", 2)?,
            invalid_action_policy: parse_or(
                get("INVALID_ACTION_POLICY"),
                "INVALID_ACTION_POLICY",
                InvalidActionPolicy::RePlan,
            )?,
        };

        let refresh: u64 = parse_or(get("CARD_REFRESH_SECS"), "CARD_REFRESH_SECS", 30)?;

        Ok(Self {
            name: get("AGENT_NAME").unwrap_or_else(|| DEFAULT_NAME.into()),
            description: get("AGENT_DESCRIPTION").unwrap_or_else(|| DEFAULT_DESCRIPTION.into()),
            provider: get("LLM_PROVIDER").unwrap_or_else(|| "ollama".into()),
            providers: ProviderOptions::from_lookup(&lookup)?,
            tool_endpoint: get("TOOL_ENDPOINT"),
            peer_urls: get("PEER_AGENT_URLS")
                .map(|raw| {
                    raw.split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            bind_host,
            bind_port,
            public_url,
            cors_permissive: parse_or(get("CORS_PERMISSIVE"), "CORS_PERMISSIVE", false)?,
            bridge_timeouts: BridgeTimeouts {
                connect,
                invoke,
                per_tool,
            },
            discovery_timeout: discovery,
            retry,
            agent,
            card_refresh: (refresh > 0).then(|| secs(refresh)),
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.bind_host, self.bind_port)
    }

    pub fn identity(&self) -> CardIdentity {
        CardIdentity {
            name: self.name.clone(),
            description: self.description.clone(),
            url: self.public_url.clone(),
            version: env!("CARGO_PKG_VERSION").into(),
        }
    }
}

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

fn parse_opt<T: FromStr>(raw: Option<String>, key: &str) -> Result<Option<T>> {
    raw.map(|v| {
        v.parse()
            .map_err(|_| AgentError::Config(format!("{key}: cannot parse '{v}'")))
    })
    .transpose()
}

fn parse_or<T: FromStr>(raw: Option<String>, key: &str, default: T) -> Result<T> {
    Ok(parse_opt(raw, key)?.unwrap_or(default))
}

/// `name=secs,name=secs`
fn parse_overrides(raw: &str) -> Result<HashMap<String, Duration>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|pair| {
            let (name, value) = pair
                .split_once('=')
                .ok_or_else(|| AgentError::Config(format!("TOOL_TIMEOUT_OVERRIDES: expected name=secs, got '{pair}'")))?;
            let seconds: u64 = value
                .trim()
                .parse()
                .map_err(|_| AgentError::Config(format!("TOOL_TIMEOUT_OVERRIDES: bad seconds in '{pair}'")))?;
            Ok((name.trim().to_string(), secs(seconds)))
        })
        .collect()
}
