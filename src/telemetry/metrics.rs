use opentelemetry::{
    global,
    metrics::{Counter, Histogram, Meter},
};
use std::sync::LazyLock;

pub static METER: LazyLock<Meter> = LazyLock::new(|| global::meter("report-gateway"));

// --- Upstream Client Metrics ---

pub static UPSTREAM_LOGIN_COUNT: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("upstream.login.count")
        .with_description("Number of upstream login attempts by outcome")
        .with_unit("{login}")
        .build()
});

pub static UPSTREAM_REAUTH_COUNT: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("upstream.reauth.count")
        .with_description("Number of re-authentications triggered by an expired session")
        .with_unit("{reauth}")
        .build()
});

pub static UPSTREAM_RETRY_COUNT: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("upstream.retry.count")
        .with_description("Number of transport-level upstream retries")
        .with_unit("{retry}")
        .build()
});

pub static UPSTREAM_REQUEST_DURATION: LazyLock<Histogram<f64>> = LazyLock::new(|| {
    METER
        .f64_histogram("upstream.request.duration")
        .with_description("Duration of individual upstream HTTP attempts in seconds")
        .with_unit("s")
        .build()
});

// --- Domain Metrics ---

pub static REPORT_GENERATION_DURATION: LazyLock<Histogram<f64>> = LazyLock::new(|| {
    METER
        .f64_histogram("report.generation.duration")
        .with_description("Total report generation duration in seconds")
        .with_unit("s")
        .build()
});

pub static REPORTS_GENERATED: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("report.generated.count")
        .with_description("Number of reports generated successfully")
        .with_unit("{report}")
        .build()
});

pub static REPORT_FAILURES: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("report.failure.count")
        .with_description("Number of failed report generations by stage and error type")
        .with_unit("{report}")
        .build()
});

pub static ARTIFACTS_REMOVED: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("report.artifacts.removed")
        .with_description("Number of report artifacts removed by retention sweeps")
        .with_unit("{file}")
        .build()
});

// --- HTTP Metrics ---

pub static HTTP_REQUESTS_TOTAL: LazyLock<Counter<u64>> = LazyLock::new(|| {
    METER
        .u64_counter("http.requests.total")
        .with_description("Total number of HTTP requests")
        .with_unit("{request}")
        .build()
});

pub static HTTP_REQUEST_DURATION: LazyLock<Histogram<f64>> = LazyLock::new(|| {
    METER
        .f64_histogram("http.request.duration")
        .with_description("HTTP request duration in milliseconds")
        .with_unit("ms")
        .with_boundaries(vec![
            1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0,
        ])
        .build()
});
