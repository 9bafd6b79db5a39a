use tokio_util::sync::CancellationToken;

use relay_core::RelayConfig;
use relay_sync::SyncContext;

/// Everything the daemon loop and its jobs share. Built once at start-up.
#[derive(Clone)]
pub struct AppContext {
    pub sync: SyncContext,
    pub token: CancellationToken,
}

impl AppContext {
    pub fn new(sync: SyncContext) -> Self {
        Self {
            sync,
            token: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &RelayConfig {
        &self.sync.config
    }
}
