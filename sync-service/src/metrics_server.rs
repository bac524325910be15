use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Installs the Prometheus recorder with its built-in scrape endpoint.
/// Must run inside the tokio runtime; called once from the bins.
pub fn init(bind_addr: &str) {
    let addr: SocketAddr = bind_addr.parse().expect("invalid metrics bind address");

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics recorder");
}
