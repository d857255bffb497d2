use std::net::SocketAddr;

use crate::sql::Command;

// ── RED metrics (request-driven) ────────────────────────────────

/// Counter: total commands executed. Labels: command, status.
pub const QUERIES_TOTAL: &str = "forecourt_queries_total";

/// Histogram: command latency in seconds. Labels: command.
pub const QUERY_DURATION_SECONDS: &str = "forecourt_query_duration_seconds";

/// Counter: booking items committed through checkout.
pub const BOOKING_ITEMS_CREATED_TOTAL: &str = "forecourt_booking_items_created_total";

// ── USE metrics (resource utilization) ──────────────────────────

/// Gauge: active TCP connections.
pub const CONNECTIONS_ACTIVE: &str = "forecourt_connections_active";

/// Counter: total connections accepted.
pub const CONNECTIONS_TOTAL: &str = "forecourt_connections_total";

/// Counter: connections rejected due to the connection limit.
pub const CONNECTIONS_REJECTED_TOTAL: &str = "forecourt_connections_rejected_total";

/// Gauge: number of active tenants (loaded engines).
pub const TENANTS_ACTIVE: &str = "forecourt_tenants_active";

/// Histogram: WAL group-commit flush duration in seconds.
pub const WAL_FLUSH_DURATION_SECONDS: &str = "forecourt_wal_flush_duration_seconds";

/// Histogram: WAL group-commit batch size (events per flush).
pub const WAL_FLUSH_BATCH_SIZE: &str = "forecourt_wal_flush_batch_size";

/// Install the Prometheus exporter on the given port. No-op if `None`.
pub fn init(port: Option<u16>) {
    let Some(port) = port else { return };
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .expect("failed to install Prometheus metrics exporter");
    tracing::info!("metrics endpoint: http://0.0.0.0:{port}/metrics");
}

/// Map a Command variant to a short label for metrics.
pub fn command_label(cmd: &Command) -> &'static str {
    match cmd {
        Command::SeedService { .. } => "seed_service",
        Command::RetireService { .. } => "retire_service",
        Command::UpsertCustomer { .. } => "upsert_customer",
        Command::UpsertVendor { .. } => "upsert_vendor",
        Command::UpsertOffering { .. } => "upsert_offering",
        Command::UpdateOffering { .. } => "update_offering",
        Command::RemoveOffering { .. } => "remove_offering",
        Command::AddCartItem { .. } => "add_cart_item",
        Command::RescheduleCartItem { .. } => "reschedule_cart_item",
        Command::RemoveCartItem { .. } => "remove_cart_item",
        Command::Checkout { .. } => "checkout",
        Command::DeleteGroup { .. } => "delete_group",
        Command::SetItemStatus { .. } => "set_item_status",
        Command::SelectSlots { .. } => "select_slots",
        Command::SelectServices => "select_services",
        Command::SelectOfferings { .. } => "select_offerings",
        Command::SelectCart { .. } => "select_cart",
        Command::SelectGroups { .. } => "select_groups",
        Command::SelectBookings { .. } => "select_bookings",
        Command::Listen { .. } => "listen",
        Command::Unlisten { .. } => "unlisten",
    }
}
