//! Transport tuning knobs.

use std::sync::Arc;
use std::time::Duration;

use spore_proto::codec::MAX_FRAME_SIZE;

use crate::error::{Result, TransportError};

/// Settings shared by the endpoint, the pooled transport, and its streams.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Largest frame payload accepted or sent.
    pub max_frame_size: usize,
    /// Upper bound on establishing one QUIC connection.
    pub dial_timeout: Duration,
    /// Upper bound on writing one frame.
    pub send_timeout: Duration,
    /// Upper bound on waiting for the reply to a request.
    pub request_timeout: Duration,
    /// QUIC keep-alive interval; `None` disables keep-alives.
    pub keep_alive_interval: Option<Duration>,
    /// QUIC idle timeout after which the connection is dropped.
    pub idle_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_size: MAX_FRAME_SIZE,
            dial_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            keep_alive_interval: Some(Duration::from_secs(5)),
            idle_timeout: Duration::from_secs(30),
        }
    }
}

impl TransportConfig {
    /// The quinn transport parameters for these settings.
    pub(crate) fn quic_transport(&self) -> Result<Arc<quinn::TransportConfig>> {
        let idle = quinn::IdleTimeout::try_from(self.idle_timeout)
            .map_err(|e| TransportError::Endpoint(format!("idle timeout: {e}")))?;

        let mut transport = quinn::TransportConfig::default();
        transport
            .keep_alive_interval(self.keep_alive_interval)
            .max_idle_timeout(Some(idle));
        Ok(Arc::new(transport))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = TransportConfig::default();
        assert_eq!(config.max_frame_size, 1024 * 1024);
        assert!(config.keep_alive_interval.unwrap() < config.idle_timeout);
        assert!(config.quic_transport().is_ok());
    }

    #[test]
    fn absurd_idle_timeout_is_rejected() {
        let config = TransportConfig {
            idle_timeout: Duration::from_secs(u64::MAX / 2),
            ..TransportConfig::default()
        };
        assert!(config.quic_transport().is_err());
    }
}
