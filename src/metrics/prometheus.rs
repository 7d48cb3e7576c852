//! Prometheus metrics definitions and HTTP server

use std::net::SocketAddr;

use chrono::{DateTime, Utc};
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use prometheus::{
    register_counter_vec, register_gauge_vec, register_histogram_vec, CounterVec, Encoder,
    GaugeVec, HistogramVec, TextEncoder,
};
use tokio::net::TcpListener;
use tracing::{error, info};

/// Value of [`BACKUP_LAST_STATUS`] after a successful backup
pub const BACKUP_LAST_STATUS_SUCCESS: f64 = 1.0;

/// Value of [`BACKUP_LAST_STATUS`] after a failed or partially failed backup
pub const BACKUP_LAST_STATUS_FAILURE: f64 = 0.0;

lazy_static::lazy_static! {
    /// Total number of reconciliations
    pub static ref RECONCILIATIONS: CounterVec = register_counter_vec!(
        "backup_finalizer_operator_reconciliations_total",
        "Total number of reconciliations",
        &["controller"]
    ).unwrap();

    /// Total number of reconciliation errors
    pub static ref RECONCILIATION_ERRORS: CounterVec = register_counter_vec!(
        "backup_finalizer_operator_reconciliation_errors_total",
        "Total number of reconciliation errors",
        &["controller"]
    ).unwrap();

    /// Reconciliation duration histogram
    pub static ref RECONCILE_DURATION: HistogramVec = register_histogram_vec!(
        "backup_finalizer_operator_reconcile_duration_seconds",
        "Duration of reconciliations in seconds",
        &["controller"],
        vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 60.0, 600.0]
    ).unwrap();

    /// Backups that finished Completed
    pub static ref BACKUP_SUCCESS_TOTAL: CounterVec = register_counter_vec!(
        "backup_finalizer_operator_backup_success_total",
        "Total number of successful backups",
        &["schedule"]
    ).unwrap();

    /// Backups that finished PartiallyFailed
    pub static ref BACKUP_PARTIAL_FAILURE_TOTAL: CounterVec = register_counter_vec!(
        "backup_finalizer_operator_backup_partial_failure_total",
        "Total number of partially failed backups",
        &["schedule"]
    ).unwrap();

    /// Outcome of the last backup (1 = success, 0 = failure)
    pub static ref BACKUP_LAST_STATUS: GaugeVec = register_gauge_vec!(
        "backup_finalizer_operator_backup_last_status",
        "Last status of the backup (1 = success, 0 = failure)",
        &["schedule"]
    ).unwrap();

    /// Size of the final-updates payload of the last backup
    pub static ref BACKUP_TARBALL_SIZE_BYTES: GaugeVec = register_gauge_vec!(
        "backup_finalizer_operator_backup_tarball_size_bytes",
        "Size in bytes of the final updates tarball of the last backup",
        &["schedule"]
    ).unwrap();

    /// Backup duration histogram
    pub static ref BACKUP_DURATION: HistogramVec = register_histogram_vec!(
        "backup_finalizer_operator_backup_duration_seconds",
        "Time from backup start to finalization",
        &["schedule"],
        vec![10.0, 30.0, 60.0, 120.0, 300.0, 600.0, 1800.0, 3600.0, 7200.0, 14400.0]
    ).unwrap();

    /// Completion time of the last successful backup
    pub static ref BACKUP_LAST_SUCCESSFUL_TIMESTAMP: GaugeVec = register_gauge_vec!(
        "backup_finalizer_operator_backup_last_successful_timestamp",
        "Unix timestamp of the last successful backup",
        &["schedule"]
    ).unwrap();

    /// Data mover waits that ended in failure
    pub static ref MOVER_WAIT_FAILURES: CounterVec = register_counter_vec!(
        "backup_finalizer_operator_datamover_wait_failures_total",
        "Data mover resources that failed or timed out while being awaited",
        &["kind", "reason"]
    ).unwrap();

    /// Data mover resource deletions
    pub static ref MOVER_DELETIONS: CounterVec = register_counter_vec!(
        "backup_finalizer_operator_datamover_deletions_total",
        "Data mover resources deleted by outcome",
        &["kind", "outcome"]
    ).unwrap();

    /// Operator health (1 = healthy, 0 = unhealthy)
    pub static ref OPERATOR_HEALTH: prometheus::Gauge = prometheus::register_gauge!(
        "backup_finalizer_operator_health",
        "Operator health status (1 = healthy, 0 = unhealthy)"
    ).unwrap();
}

/// Record a backup that finished Completed
pub fn register_backup_success(schedule: &str) {
    BACKUP_SUCCESS_TOTAL.with_label_values(&[schedule]).inc();
    BACKUP_LAST_STATUS
        .with_label_values(&[schedule])
        .set(BACKUP_LAST_STATUS_SUCCESS);
}

/// Record a backup that finished PartiallyFailed
pub fn register_backup_partial_failure(schedule: &str) {
    BACKUP_PARTIAL_FAILURE_TOTAL.with_label_values(&[schedule]).inc();
    BACKUP_LAST_STATUS
        .with_label_values(&[schedule])
        .set(BACKUP_LAST_STATUS_FAILURE);
}

/// Record size and timing of a finalized backup
pub fn record_backup_completion(
    schedule: &str,
    payload_bytes: u64,
    started: Option<DateTime<Utc>>,
    completed: DateTime<Utc>,
    succeeded: bool,
) {
    BACKUP_TARBALL_SIZE_BYTES
        .with_label_values(&[schedule])
        .set(payload_bytes as f64);

    if let Some(started) = started {
        if let Ok(duration) = (completed - started).to_std() {
            BACKUP_DURATION
                .with_label_values(&[schedule])
                .observe(duration.as_secs_f64());
        }
    }

    if succeeded {
        BACKUP_LAST_SUCCESSFUL_TIMESTAMP
            .with_label_values(&[schedule])
            .set(completed.timestamp() as f64);
    }
}

/// Start the metrics HTTP server
pub async fn serve(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    // Set initial health
    OPERATOR_HEALTH.set(1.0);

    loop {
        let (stream, _) = listener.accept().await?;
        let io = TokioIo::new(stream);

        tokio::spawn(async move {
            if let Err(e) = http1::Builder::new()
                .serve_connection(io, service_fn(handle_request))
                .await
            {
                error!("Error serving connection: {}", e);
            }
        });
    }
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let response = match req.uri().path() {
        "/metrics" => metrics_response(),
        "/healthz" | "/health" | "/readyz" | "/ready" => plain_response(StatusCode::OK, "ok"),
        _ => plain_response(StatusCode::NOT_FOUND, "Not Found"),
    };

    Ok(response)
}

/// Generate metrics response
fn metrics_response() -> Response<Full<Bytes>> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return plain_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to encode metrics");
    }

    let mut response = Response::new(Full::new(Bytes::from(buffer)));
    if let Ok(content_type) = encoder.format_type().parse() {
        response
            .headers_mut()
            .insert(hyper::header::CONTENT_TYPE, content_type);
    }
    response
}

fn plain_response(status: StatusCode, body: &'static str) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    response
}
