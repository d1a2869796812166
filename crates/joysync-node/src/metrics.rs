//! Prometheus metrics for the sync daemon.

use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Request, Response};
use lazy_static::lazy_static;
use prometheus::{opts, register_counter, register_gauge, Counter, Gauge};

lazy_static! {
    /// Videos discovered by the metadata poller
    pub static ref VIDEOS_DISCOVERED: Counter =
        register_counter!(opts!("joysync_videos_discovered_total", "Videos discovered upstream")).unwrap();

    /// Videos staged by the download worker
    pub static ref VIDEOS_STAGED: Counter =
        register_counter!(opts!("joysync_videos_staged_total", "Videos staged locally")).unwrap();

    /// Videos created on chain
    pub static ref VIDEOS_CREATED: Counter =
        register_counter!(opts!("joysync_videos_created_total", "On-chain video records created")).unwrap();

    /// Videos accepted by the storage fleet
    pub static ref VIDEOS_UPLOADED: Counter =
        register_counter!(opts!("joysync_videos_uploaded_total", "Videos uploaded to the fleet")).unwrap();

    /// Sync quota units used today
    pub static ref QUOTA_SYNC_USED: Gauge =
        register_gauge!(opts!("joysync_quota_sync_used", "Sync quota units used today")).unwrap();
}

/// Start the Prometheus metrics HTTP server.
///
/// Serves metrics on the `/metrics` endpoint.
pub async fn start_metrics_server(port: u16) -> Result<(), std::io::Error> {
    use hyper::{server::conn::http1, service::service_fn};
    use hyper_util::rt::TokioIo;
    use tokio::net::TcpListener;

    let addr = format!("0.0.0.0:{}", port);
    let listener = TcpListener::bind(&addr).await?;

    tracing::info!("Metrics server listening on http://{}/metrics", addr);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(err) = http1::Builder::new()
                .serve_connection(io, service_fn(metrics_handler))
                .await
            {
                tracing::error!("Metrics server error: {:?}", err);
            }
        });
    }
}

async fn metrics_handler(
    _req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    use prometheus::Encoder;

    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        buffer.clear();
    }

    Ok(Response::new(Full::new(Bytes::from(buffer))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_register_once() {
        VIDEOS_DISCOVERED.inc();
        VIDEOS_STAGED.inc_by(2.0);
        assert!(VIDEOS_DISCOVERED.get() >= 1.0);
        assert!(VIDEOS_STAGED.get() >= 2.0);
    }
}
