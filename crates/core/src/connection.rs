use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::adapter::{AdapterRegistry, Connection};
use crate::dsn::{redact_dsn, redact_secrets};

/// Messages in this type never contain the raw DSN or its password.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    #[error("unknown adapter `{0}`")]
    UnknownAdapter(String),
    #[error("connection attempt timed out after {0:?}")]
    TimedOut(Duration),
    #[error("connect failed: {0}")]
    Open(String),
    #[error("ping failed: {0}")]
    Ping(String),
}

pub struct Established {
    pub connection: Arc<dyn Connection>,
    pub latency: Duration,
}

/// Opens and validates a connection. The whole attempt, open plus ping,
/// is bounded by `limit`; a connection whose ping fails is closed before
/// the error is returned.
pub async fn establish(
    registry: &AdapterRegistry,
    adapter_name: &str,
    dsn: &str,
    limit: Duration,
) -> Result<Established, ConnectError> {
    let adapter = registry
        .get(adapter_name)
        .ok_or_else(|| ConnectError::UnknownAdapter(adapter_name.to_string()))?;
    let started_at = Instant::now();
    let target = redact_dsn(dsn);

    let connection = timeout(limit, adapter.connect(dsn))
        .await
        .map_err(|_| ConnectError::TimedOut(limit))?
        .map_err(|error| ConnectError::Open(redact_secrets(error.message(), dsn)))?;

    let remaining = limit.saturating_sub(started_at.elapsed());
    let ping = match timeout(remaining, connection.ping()).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(error)) => Err(ConnectError::Ping(redact_secrets(error.message(), dsn))),
        Err(_) => Err(ConnectError::TimedOut(limit)),
    };

    if let Err(error) = ping {
        warn!(adapter = adapter_name, %target, %error, "discarding connection that failed its ping");
        if let Err(close_error) = connection.close().await {
            warn!(adapter = adapter_name, error = %redact_secrets(close_error.message(), dsn), "close after failed ping also failed");
        }
        return Err(error);
    }

    let latency = started_at.elapsed();
    info!(adapter = adapter_name, %target, latency_ms = latency.as_millis(), "connection established");
    Ok(Established {
        connection,
        latency,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use std::time::Duration;

    use super::{establish, ConnectError};
    use crate::adapter::AdapterRegistry;
    use crate::test_support::{FakeAdapter, FakeConnection};

    const LIMIT: Duration = Duration::from_secs(5);

    fn registry_with(adapter: Arc<FakeAdapter>) -> AdapterRegistry {
        AdapterRegistry::new().with(adapter)
    }

    #[tokio::test]
    async fn connect_pings_before_returning() {
        let adapter = Arc::new(FakeAdapter::named("fake"));
        let connection = Arc::new(FakeConnection::new());
        adapter.queue(Arc::clone(&connection));
        let registry = registry_with(adapter);

        let established = establish(&registry, "fake", "fake://u:p@host/app", LIMIT)
            .await
            .expect("connect should succeed");

        assert_eq!(established.connection.database_name(), "app");
        assert_eq!(connection.ping_calls.load(Ordering::SeqCst), 1);
        assert!(!connection.closed.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failed_ping_closes_the_raw_handle() {
        let adapter = Arc::new(FakeAdapter::named("fake"));
        let connection = Arc::new(FakeConnection {
            fail_ping: true,
            ..FakeConnection::new()
        });
        adapter.queue(Arc::clone(&connection));
        let registry = registry_with(adapter);

        let error = establish(&registry, "fake", "fake://host/app", LIMIT)
            .await
            .err()
            .expect("ping failure should surface");

        assert!(matches!(error, ConnectError::Ping(_)));
        assert_eq!(connection.close_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_adapter_is_rejected_without_connecting() {
        let adapter = Arc::new(FakeAdapter::named("fake"));
        let registry = registry_with(Arc::clone(&adapter));

        let error = establish(&registry, "oracle", "oracle://host", LIMIT)
            .await
            .err()
            .expect("unknown adapter");

        assert_eq!(error, ConnectError::UnknownAdapter("oracle".to_string()));
        assert_eq!(adapter.connect_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn open_errors_never_leak_credentials() {
        let adapter = Arc::new(FakeAdapter::named("fake"));
        adapter.fail_connect.store(true, Ordering::SeqCst);
        let registry = registry_with(adapter);

        let error = establish(&registry, "fake", "fake://admin:hunter2@db/app", LIMIT)
            .await
            .err()
            .expect("connect should fail");

        let rendered = error.to_string();
        assert!(matches!(error, ConnectError::Open(_)));
        assert!(!rendered.contains("hunter2"), "{rendered}");
        assert!(!rendered.contains("admin"), "{rendered}");
    }
}
