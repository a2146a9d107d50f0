use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::ServerConfig;
use crate::core::bridge::CallRegistry;

/// Application state shared by every handler.
pub struct AppState {
    pub config: ServerConfig,
    /// Bridges for calls currently connected
    pub calls: CallRegistry,
    /// Parent of every call's cancellation token
    pub shutdown: CancellationToken,
}

impl AppState {
    pub async fn new(config: ServerConfig) -> Arc<Self> {
        if !config.has_realtime_credentials() {
            tracing::warn!("OPENAI_API_KEY not set, calls will run telephony-only");
        }

        Arc::new(Self {
            config,
            calls: CallRegistry::new(),
            shutdown: CancellationToken::new(),
        })
    }

    /// End every active call and wait up to `grace` for their teardown.
    ///
    /// Returns `false` if calls were still registered when the grace ran out.
    pub async fn close_calls(&self, grace: Duration) -> bool {
        self.shutdown.cancel();
        let deadline = tokio::time::Instant::now() + grace;
        while !self.calls.is_empty() {
            if tokio::time::Instant::now() >= deadline {
                tracing::warn!(active = self.calls.len(), "Calls still open at shutdown");
                return false;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::bridge::CallBridge;

    #[tokio::test]
    async fn test_close_calls_without_calls() {
        let state = AppState::new(ServerConfig::default()).await;
        assert!(state.close_calls(Duration::from_millis(50)).await);
        assert!(state.shutdown.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_calls_gives_up_after_grace() {
        let state = AppState::new(ServerConfig::default()).await;
        let _guard = state.calls.register(Arc::new(CallBridge::new(None)));
        assert!(!state.close_calls(Duration::from_millis(100)).await);
    }
}
