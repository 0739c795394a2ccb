//! Device collaborator: stability waits and immediate state dumps.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A condition the device must satisfy before it is considered stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateCondition {
    /// No window-manager transition is pending
    NoPendingTransitions,
    /// No layer animation is in flight
    NoLayerAnimation,
    /// The app transition state is idle
    AppTransitionIdle,
}

impl StateCondition {
    /// Conditions waited for before and after every transition.
    pub fn stable() -> Vec<StateCondition> {
        vec![
            StateCondition::NoPendingTransitions,
            StateCondition::NoLayerAnimation,
            StateCondition::AppTransitionIdle,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StateCondition::NoPendingTransitions => "no_pending_transitions",
            StateCondition::NoLayerAnimation => "no_layer_animation",
            StateCondition::AppTransitionIdle => "app_transition_idle",
        }
    }
}

/// Raw state captured in one immediate dump.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceDump {
    pub window_manager: Vec<u8>,
    pub layers: Vec<u8>,
}

#[async_trait]
pub trait Device: Send + Sync {
    /// Block until every condition holds. Bounded by the implementation.
    async fn wait_for_stable(&self, conditions: &[StateCondition]) -> Result<()>;

    /// Take an immediate dump of window-manager and layer state.
    async fn dump(&self) -> Result<DeviceDump>;
}
