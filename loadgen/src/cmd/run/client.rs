use rama::{
    Service,
    error::{BoxError, ErrorContext as _},
    http::{
        Request, Response,
        client::{EasyHttpWebClient, HttpPooledConnectorConfig},
    },
    rt::Executor,
};

/// Create the web client used to probe the target.
///
/// Connections are pooled so `Connection: keep-alive` requests reuse them.
/// The pool allows one active connection per worker, so the worker bound
/// is what limits concurrency. Proxy support is disabled: the target is
/// always dialed directly.
pub fn new_http_client(
    exec: Executor,
    max_concurrency: usize,
) -> Result<impl Service<Request, Output = Response, Error: Into<BoxError>>, BoxError> {
    let client = EasyHttpWebClient::connector_builder()
        .with_default_transport_connector()
        .without_tls_proxy_support()
        .without_proxy_support()
        .with_tls_support_using_boringssl(None)
        .with_default_http_connector(exec)
        .try_with_connection_pool(pool_config(max_concurrency))
        .context("create connection pool for load generator web client")
        .with_context_field("max_concurrency", || max_concurrency)?
        .build_client();

    Ok(client)
}

fn pool_config(max_concurrency: usize) -> HttpPooledConnectorConfig {
    let max_connections = max_concurrency.max(1);
    HttpPooledConnectorConfig {
        max_active: max_connections,
        max_total: max_connections,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_allows_a_connection_per_worker() {
        for (workers, expected) in [(0, 1), (1, 1), (199, 199), (2000, 2000)] {
            let cfg = pool_config(workers);
            assert_eq!(cfg.max_active, expected, "workers: {workers}");
            assert_eq!(cfg.max_total, expected, "workers: {workers}");
        }
    }

    #[test]
    fn test_pool_keeps_default_timeouts() {
        let cfg = pool_config(2000);
        let default = HttpPooledConnectorConfig::default();
        assert_eq!(cfg.idle_timeout, default.idle_timeout);
        assert_eq!(cfg.wait_for_pool_timeout, default.wait_for_pool_timeout);
    }
}
