use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};

lazy_static! {
    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "http_requests_total",
        "Total number of HTTP requests",
        &["method", "path", "status"]
    )
    .unwrap();

    pub static ref HTTP_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds",
        &["method", "path"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]
    )
    .unwrap();

    // Database Metrics (MongoDB)
    pub static ref DB_OPERATIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "db_operations_total",
        "Total number of database operations",
        &["operation", "collection", "status"]
    )
    .unwrap();

    pub static ref DB_OPERATION_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "db_operation_duration_seconds",
        "Database operation duration in seconds",
        &["operation", "collection"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0]
    )
    .unwrap();

    // LLM Metrics
    pub static ref LLM_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "llm_requests_total",
        "Total number of LLM generation requests",
        &["operation", "status"]
    )
    .unwrap();

    pub static ref LLM_REQUEST_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "llm_request_duration_seconds",
        "LLM generation latency in seconds",
        &["operation"],
        vec![0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 40.0, 80.0]
    )
    .unwrap();

    // Business Metrics
    pub static ref ARTICLES_UPLOADED_TOTAL: IntCounter = register_int_counter!(
        "articles_uploaded_total",
        "Total number of uploaded articles"
    )
    .unwrap();

    pub static ref ARTICLE_ANALYSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "article_analyses_total",
        "Total number of article analyses",
        &["status"]
    )
    .unwrap();

    pub static ref CHAT_MESSAGES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "chat_messages_total",
        "Total number of chat requests",
        &["status"]
    )
    .unwrap();

    pub static ref SOCRATIC_SESSIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "socratic_sessions_total",
        "Total number of Socratic sessions by lifecycle event",
        &["status"]
    )
    .unwrap();

    pub static ref SOCRATIC_ANSWERS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "socratic_answers_total",
        "Total number of graded Socratic answers",
        &["correct"]
    )
    .unwrap();

    pub static ref EXPORTS_GENERATED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "exports_generated_total",
        "Total number of exports generated",
        &["format"]
    )
    .unwrap();
}

/// Renders all metrics in Prometheus text format
pub fn render_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer)
        .map_err(|e| prometheus::Error::Msg(format!("Failed to convert metrics to UTF-8: {}", e)))
}

/// Helper: track database operation with metrics
pub async fn track_db_operation<F, T>(
    operation: &str,
    collection: &str,
    future: F,
) -> Result<T, anyhow::Error>
where
    F: std::future::Future<Output = Result<T, anyhow::Error>>,
{
    let start = std::time::Instant::now();
    let result = future.await;
    let duration = start.elapsed().as_secs_f64();

    let status = if result.is_ok() { "success" } else { "error" };

    DB_OPERATIONS_TOTAL
        .with_label_values(&[operation, collection, status])
        .inc();

    DB_OPERATION_DURATION_SECONDS
        .with_label_values(&[operation, collection])
        .observe(duration);

    result
}

pub fn record_llm_request(operation: &str, status: &str, duration_secs: f64) {
    LLM_REQUESTS_TOTAL
        .with_label_values(&[operation, status])
        .inc();
    LLM_REQUEST_DURATION_SECONDS
        .with_label_values(&[operation])
        .observe(duration_secs);
}
