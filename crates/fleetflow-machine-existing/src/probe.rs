//! TCP reachability probe

use async_trait::async_trait;
use fleetflow_machine::ReachabilityProbe;
use std::time::Duration;
use tokio::net::TcpStream;

pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Considers a machine up when its SSH port accepts a TCP connection
#[derive(Debug, Clone)]
pub struct TcpProbe {
    timeout: Duration,
}

impl Default for TcpProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_TIMEOUT)
    }
}

impl TcpProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl ReachabilityProbe for TcpProbe {
    async fn ping(&self, host: &str, port: u16) -> bool {
        match tokio::time::timeout(self.timeout, TcpStream::connect((host, port))).await {
            Ok(Ok(_)) => true,
            Ok(Err(e)) => {
                tracing::debug!("{}:{} unreachable: {}", host, port, e);
                false
            }
            Err(_) => {
                tracing::debug!("{}:{} timed out after {:?}", host, port, self.timeout);
                false
            }
        }
    }
}
