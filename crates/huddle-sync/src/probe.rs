use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, info};

use crate::channel::ChannelKind;
use crate::config::SyncConfig;
use crate::transport::{MessageApi, PushConnector, PushLink};

/// Tier chosen by a detection pass. A push result carries the connection
/// that passed the handshake so it is not opened twice.
pub enum ProbeOutcome {
    Push(PushLink),
    Poll,
    LocalOnly,
}

impl ProbeOutcome {
    pub fn kind(&self) -> ChannelKind {
        match self {
            Self::Push(_) => ChannelKind::Push,
            Self::Poll => ChannelKind::Poll,
            Self::LocalOnly => ChannelKind::LocalOnly,
        }
    }
}

/// Decides which tier is reachable right now.
///
/// One pass makes at most one push handshake and one liveness request, each
/// with its own bound, so detection always finishes within their sum.
pub struct TransportProbe {
    api: Arc<dyn MessageApi>,
    push: Option<Arc<dyn PushConnector>>,
    handshake_timeout: Duration,
    liveness_timeout: Duration,
}

impl TransportProbe {
    pub fn new(
        api: Arc<dyn MessageApi>,
        push: Option<Arc<dyn PushConnector>>,
        config: &SyncConfig,
    ) -> Self {
        Self {
            api,
            push,
            handshake_timeout: config.handshake_timeout,
            liveness_timeout: config.liveness_timeout,
        }
    }

    pub async fn detect(&self) -> ProbeOutcome {
        if let Some(push) = &self.push {
            match timeout(self.handshake_timeout, push.connect()).await {
                Ok(Ok(link)) => return ProbeOutcome::Push(link),
                Ok(Err(e)) => debug!("Push handshake failed: {}", e),
                Err(_) => debug!("Push handshake timed out after {:?}", self.handshake_timeout),
            }
        }

        match timeout(self.liveness_timeout, self.api.liveness()).await {
            Ok(Ok(())) => ProbeOutcome::Poll,
            Ok(Err(e)) => {
                info!("Backend unreachable, staying local: {}", e);
                ProbeOutcome::LocalOnly
            }
            Err(_) => {
                info!("Liveness check timed out after {:?}, staying local", self.liveness_timeout);
                ProbeOutcome::LocalOnly
            }
        }
    }
}
