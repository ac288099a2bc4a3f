//! Capability refresh
//!
//! Keeps the published card in line with what is actually reachable: a
//! dedicated bridge session supplies the local tool list and every
//! configured peer is re-discovered. Anything that fails is left out of the
//! next card and logged; nothing here is fatal.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use agent_core::bridge::{BridgeHandle, BridgeTimeouts, ToolConnector};
use agent_core::card::{AgentCard, CapabilityRegistry, PeerStatus};
use agent_core::delegation::Delegator;
use agent_core::retry::RetryPolicy;
use agent_core::tool::ToolDescriptor;

pub struct CatalogRefresher {
    registry: Arc<CapabilityRegistry>,
    connector: Option<Arc<dyn ToolConnector>>,
    delegator: Arc<dyn Delegator>,
    peers: Vec<String>,
    timeouts: BridgeTimeouts,
    retry: RetryPolicy,
    bridge: Option<BridgeHandle>,
}

impl CatalogRefresher {
    pub fn new(
        registry: Arc<CapabilityRegistry>,
        connector: Option<Arc<dyn ToolConnector>>,
        delegator: Arc<dyn Delegator>,
        peers: Vec<String>,
        timeouts: BridgeTimeouts,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            connector,
            delegator,
            peers,
            timeouts,
            retry,
            bridge: None,
        }
    }

    /// Rebuild and publish the card once
    pub async fn refresh(&mut self) -> Arc<AgentCard> {
        self.close_bridge().await;
        let tools = self.local_tools().await;
        let peers = self.discover_peers().await;
        self.registry.rebuild(&tools, &peers)
    }

    /// Refresh every `every` until `shutdown` fires, then close the bridge
    pub async fn run(mut self, every: Option<Duration>, shutdown: CancellationToken) {
        if let Some(every) = every {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            loop {
                tokio::select! {
                    () = shutdown.cancelled() => break,
                    _ = ticker.tick() => {
                        self.refresh().await;
                    }
                }
            }
        } else {
            shutdown.cancelled().await;
        }
        self.close_bridge().await;
    }

    async fn close_bridge(&mut self) {
        if let Some(bridge) = self.bridge.take() {
            if let Err(e) = bridge.close().await {
                warn!(error = %e, "Catalog bridge close failed");
            }
        }
    }

    async fn local_tools(&mut self) -> Vec<ToolDescriptor> {
        let Some(connector) = self.connector.as_deref() else {
            return Vec::new();
        };

        let mut bridge = match BridgeHandle::connect_with_retry(connector, self.timeouts.clone(), &self.retry).await {
            Ok(bridge) => bridge,
            Err(e) => {
                warn!(endpoint = %connector.endpoint(), error = %e, "Tool backend unreachable; local tools excluded");
                return Vec::new();
            }
        };

        match bridge.list_tools().await {
            Ok(tools) => {
                self.bridge = Some(bridge);
                tools
            }
            Err(e) => {
                warn!(endpoint = %connector.endpoint(), error = %e, "Tool listing failed; local tools excluded");
                if let Err(e) = bridge.close().await {
                    warn!(error = %e, "Catalog bridge close failed");
                }
                Vec::new()
            }
        }
    }

    async fn discover_peers(&self) -> Vec<PeerStatus> {
        let lookups = self.peers.iter().map(|endpoint| async move {
            match self.delegator.discover_with_retry(endpoint, &self.retry).await {
                Ok(card) => {
                    info!(peer = %endpoint, name = %card.name, skills = card.skills.len(), "Peer reachable");
                    PeerStatus::Reachable {
                        endpoint: endpoint.clone(),
                        card,
                    }
                }
                Err(e) => {
                    warn!(peer = %endpoint, error = %e, "Peer excluded");
                    PeerStatus::Unreachable {
                        endpoint: endpoint.clone(),
                        reason: e.to_string(),
                    }
                }
            }
        });
        join_all(lookups).await
    }
}
