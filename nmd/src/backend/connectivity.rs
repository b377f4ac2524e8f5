//! Connectivity checkers.

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use super::ConnectivityChecker;
use crate::api::models::ConnectivityState;

/// Checker that reports a configurable fixed answer.
#[derive(Debug, Clone)]
pub struct StaticConnectivity {
    state: Arc<Mutex<ConnectivityState>>,
}

impl StaticConnectivity {
    pub fn new(state: ConnectivityState) -> Self {
        Self {
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Changes the answer given by later checks.
    pub fn set(&self, state: ConnectivityState) {
        *self.state.lock().unwrap_or_else(|p| p.into_inner()) = state;
    }
}

impl Default for StaticConnectivity {
    fn default() -> Self {
        Self::new(ConnectivityState::Full)
    }
}

#[async_trait]
impl ConnectivityChecker for StaticConnectivity {
    async fn check(&self) -> ConnectivityState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn reports_configured_state() {
        let checker = StaticConnectivity::default();
        assert_eq!(checker.check().await, ConnectivityState::Full);
        checker.set(ConnectivityState::Portal);
        assert_eq!(checker.check().await, ConnectivityState::Portal);
    }
}
