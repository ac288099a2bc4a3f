//! Application State

use std::sync::Arc;

use agent_core::bridge::{BridgeTimeouts, ToolConnector};
use agent_core::card::CapabilityRegistry;
use agent_core::reasoning::Agent;
use agent_core::retry::RetryPolicy;

use crate::tasks::TaskTable;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Reasoning loop shared by every task
    pub agent: Arc<Agent>,

    /// Published capabilities
    pub registry: Arc<CapabilityRegistry>,

    /// Tool backend; each task opens its own bridge through it
    pub connector: Option<Arc<dyn ToolConnector>>,

    pub bridge_timeouts: BridgeTimeouts,

    pub retry: RetryPolicy,

    /// In-flight tasks, for cancellation
    pub tasks: TaskTable,
}
