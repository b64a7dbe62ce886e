/// Connectivity health of servers
use crate::core::Server;
use std::fmt;
use std::time::Duration;
use tokio::time::timeout;

/// Health status of a server
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy { reason: String },
    Timeout,
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Unhealthy { reason } => write!(f, "Unhealthy: {}", reason),
            HealthStatus::Timeout => write!(f, "Timeout"),
            HealthStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

impl HealthStatus {
    /// Check if the status represents a reachable server
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }
}

/// Bounds a server's connectivity probe with an overall timeout
#[derive(Debug, Clone)]
pub struct ServerHealthChecker {
    check_timeout: Duration,
}

impl ServerHealthChecker {
    pub fn new(check_timeout: Duration) -> Self {
        Self { check_timeout }
    }

    pub fn check_timeout(&self) -> Duration {
        self.check_timeout
    }

    /// Probe `server`, including address resolution
    pub async fn check(&self, server: &mut Server) -> HealthStatus {
        let status = match timeout(self.check_timeout, server.status()).await {
            Ok(status) => status,
            Err(_) => HealthStatus::Timeout,
        };
        log_status(server.id(), &status);
        status
    }
}

fn log_status(server_id: &str, status: &HealthStatus) {
    match status {
        HealthStatus::Healthy => {
            tracing::debug!("Server {} is healthy", server_id);
        }
        HealthStatus::Unhealthy { reason } => {
            tracing::debug!("Server {} is unhealthy: {}", server_id, reason);
        }
        HealthStatus::Timeout => {
            tracing::warn!("Health check timeout for server {}", server_id);
        }
        HealthStatus::Unknown => {
            tracing::warn!("Unknown health status for server {}", server_id);
        }
    }
}
