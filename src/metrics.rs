use std::net::SocketAddr;
use tracing::{info, warn};

/// Installs the Prometheus exporter on `0.0.0.0:port` and registers the bridge counters.
pub fn init_metrics(port: u16) {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new().with_http_listener(addr);
    match builder.install() {
        Ok(()) => {
            info!("Prometheus exporter listening on http://{}/metrics", addr);
            describe();
        }
        Err(e) => {
            warn!("Prometheus exporter install failed (possibly already installed): {}", e);
        }
    }
}

fn describe() {
    ::metrics::describe_counter!("bridge_messages_admitted_total", "Messages accepted into the outbox");
    ::metrics::describe_counter!("bridge_messages_duplicate_total", "Messages dropped as already seen");
    ::metrics::describe_counter!("bridge_sink_delivered_total", "Messages confirmed by the sink");
    ::metrics::describe_counter!("bridge_sink_failed_total", "Failed sink delivery attempts");
    ::metrics::describe_counter!("bridge_poll_requests_total", "Operator API page requests");
    ::metrics::describe_counter!("bridge_poll_errors_total", "Poll ticks that ended in an error");
    ::metrics::describe_counter!("bridge_webhook_rejected_total", "Webhooks refused for bad credentials");
}
