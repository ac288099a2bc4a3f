//! Agent protocol client
//!
//! Implements [`Delegator`] over HTTP: discovery fetches the peer's card
//! from its well-known path, delegation POSTs an [`InvocationRequest`] to
//! the peer's stream endpoint and decodes server-sent [`StreamEvent`]s into
//! [`Message`]s.

use agent_core::card::AgentCard;
use agent_core::delegation::{DelegationCall, Delegator, MessageStream};
use agent_core::error::{AgentError, Result};
use agent_core::message::Message;
use agent_core::protocol::{AGENT_CARD_PATH, InvocationRequest, STREAM_PATH, StreamEvent};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use reqwest::Client;
use reqwest::header::ACCEPT;
use serde_json::Value;
use std::time::Duration;

use crate::sse::SseDecoder;

/// HTTP client for peer agents
#[derive(Clone, Debug)]
pub struct A2aClient {
    http: Client,
    discovery_timeout: Duration,
}

impl A2aClient {
    /// `connect_timeout` bounds opening any connection; `discovery_timeout`
    /// bounds a whole card fetch. Delegated streams have no overall bound.
    pub fn new(connect_timeout: Duration, discovery_timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|e| AgentError::Config(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            discovery_timeout,
        })
    }
}

fn base(endpoint: &str) -> &str {
    endpoint.trim_end_matches('/')
}

#[async_trait]
impl Delegator for A2aClient {
    async fn discover(&self, endpoint: &str) -> Result<AgentCard> {
        let url = format!("{}{AGENT_CARD_PATH}", base(endpoint));
        let response = self
            .http
            .get(&url)
            .timeout(self.discovery_timeout)
            .send()
            .await
            .map_err(|e| AgentError::peer_unreachable(endpoint, e))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(AgentError::peer_unreachable(endpoint, format!("card request returned {status}")));
        }
        if !status.is_success() {
            return Err(AgentError::MalformedCard(format!("{url} returned {status}")));
        }

        let value: Value = response
            .json()
            .await
            .map_err(|e| AgentError::MalformedCard(format!("{url}: {e}")))?;
        let card = AgentCard::from_value(value)?;
        tracing::debug!(peer = %endpoint, name = %card.name, skills = card.skills.len(), "Peer discovered");
        Ok(card)
    }

    async fn delegate(&self, call: DelegationCall) -> Result<MessageStream> {
        let endpoint = call.target.endpoint.clone();
        let url = format!("{}{STREAM_PATH}", base(&endpoint));
        let correlation_id = call.correlation_id.clone();
        let request = InvocationRequest {
            skill_id: Some(call.skill_id),
            arguments: call.arguments,
            correlation_id: call.correlation_id,
            context_id: None,
        };

        let response = self
            .http
            .post(&url)
            .header(ACCEPT, "text/event-stream")
            .json(&request)
            .send()
            .await
            .map_err(|e| AgentError::peer_unreachable(&endpoint, e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::Delegation(format!("{url} returned {status}: {text}")));
        }

        let stream = event_stream(response.bytes_stream(), endpoint, correlation_id);
        Ok(Box::pin(stream))
    }
}

/// Peer messages until the first final one; anything else is an error
fn event_stream<S, B>(
    byte_stream: S,
    endpoint: String,
    correlation_id: String,
) -> impl Stream<Item = Result<Message>> + Send
where
    S: Stream<Item = reqwest::Result<B>> + Send + 'static,
    B: AsRef<[u8]> + Send,
{
    async_stream::try_stream! {
        let mut decoder = SseDecoder::new();
        let mut finished = false;
        futures::pin_mut!(byte_stream);

        'read: while let Some(chunk) = byte_stream.next().await {
            let chunk = chunk.map_err(|e| {
                AgentError::Delegation(format!("{endpoint}: stream interrupted: {e}"))
            })?;
            let events = decoder
                .push(chunk.as_ref())
                .map_err(|e| match e {
                    AgentError::Delegation(detail) => AgentError::Delegation(format!("{endpoint}: {detail}")),
                    other => other,
                })?;
            for event in events {
                let message = decode_event(&event.data, &correlation_id)?;
                let last = message.is_final();
                yield message;
                if last {
                    finished = true;
                    break 'read;
                }
            }
        }

        if !finished {
            if let Some(event) = decoder.finish() {
                let message = decode_event(&event.data, &correlation_id)?;
                finished = message.is_final();
                yield message;
            }
        }

        if !finished {
            Err::<(), _>(AgentError::Delegation(format!(
                "{endpoint}: stream ended without a final message"
            )))?;
        }
    }
}

/// Decode one event, checking it belongs to this call
fn decode_event(data: &str, correlation_id: &str) -> Result<Message> {
    let event: StreamEvent = serde_json::from_str(data)
        .map_err(|e| AgentError::Delegation(format!("unreadable stream event: {e}")))?;

    if event.correlation_id() != correlation_id {
        return Err(AgentError::Delegation(format!(
            "correlation id mismatch: expected {correlation_id}, got {}",
            event.correlation_id()
        )));
    }

    match event {
        StreamEvent::Message { message, .. } => Ok(message),
        StreamEvent::Error { error, .. } => Err(AgentError::Delegation(format!("{}: {}", error.kind, error.detail))),
    }
}
