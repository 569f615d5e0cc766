use std::net::SocketAddr;

use crate::wire::Request;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: workflow outcomes. Labels: operation, status.
pub const WORKFLOW_OUTCOMES_TOTAL: &str = "slotdesk_workflow_outcomes_total";

/// Histogram: request latency in seconds. Labels: op.
pub const REQUEST_DURATION_SECONDS: &str = "slotdesk_request_duration_seconds";

/// Counter: availability checks. Labels: result (available, full).
pub const AVAILABILITY_CHECKS_TOTAL: &str = "slotdesk_availability_checks_total";

/// Counter: failed credential checks.
pub const AUTH_FAILURES_TOTAL: &str = "slotdesk_auth_failures_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "slotdesk_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "slotdesk_connections_total";

/// Counter: connections rejected due to limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "slotdesk_connections_rejected_total";

/// Gauge: configured buildings.
pub const BUILDINGS_CONFIGURED: &str = "slotdesk_buildings_configured";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "slotdesk_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "slotdesk_wal_flush_batch_size";

/// Install Prometheus metrics exporter on the given port. No-op if port is None.
/// A failed install is logged and the service runs without the endpoint.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    match metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
    {
        Ok(()) => tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics"),
        Err(e) => tracing::error!("failed to install Prometheus metrics exporter: {e}"),
    }
}

/// Map a request to a short label for metrics.
pub fn request_label(req: &Request) -> &'static str {
    match req {
        Request::UpdateFirstChoice { .. } => "update_first_choice",
        Request::UpdateFirstChoiceAuthenticated { .. } => "update_first_choice_authenticated",
        Request::ListAvailableSlots { .. } => "list_available_slots",
        Request::CheckAvailability { .. } => "check_availability",
        Request::UpdateSecondChoice { .. } => "update_second_choice",
        Request::UpdateSecondChoicePreferences { .. } => "update_second_choice_preferences",
        Request::GetCurrentSecondChoice { .. } => "get_current_second_choice",
        Request::ClearSecondChoice { .. } => "clear_second_choice",
        Request::GetSecondChoiceHistory { .. } => "get_second_choice_history",
        Request::GetReservation { .. } => "get_reservation",
        Request::GetReservationHistory { .. } => "get_reservation_history",
        Request::GetReservationStatus { .. } => "get_reservation_status",
        Request::GetUpcomingReservations { .. } => "get_upcoming_reservations",
        Request::GetReservationSummary { .. } => "get_reservation_summary",
    }
}
