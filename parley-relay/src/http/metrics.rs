//! Metrics endpoint, Prometheus text format.

use crate::server::ParleyRelay;
use axum::Extension;
use std::sync::atomic::Ordering;
use std::sync::Arc;

fn counter(out: &mut String, name: &str, help: &str, value: u64) {
    out.push_str(&format!("# HELP {name} {help}\n"));
    out.push_str(&format!("# TYPE {name} counter\n"));
    out.push_str(&format!("{name} {value}\n"));
}

fn gauge(out: &mut String, name: &str, help: &str, value: u64) {
    out.push_str(&format!("# HELP {name} {help}\n"));
    out.push_str(&format!("# TYPE {name} gauge\n"));
    out.push_str(&format!("{name} {value}\n"));
}

/// GET /metrics
pub async fn metrics(Extension(relay): Extension<Arc<ParleyRelay>>) -> String {
    let m = relay.metrics();
    let mut out = String::new();

    gauge(
        &mut out,
        "parley_relay_connections_active",
        "Live client connections",
        relay.registry().connection_count() as u64,
    );
    gauge(
        &mut out,
        "parley_relay_channels_active",
        "Channels with at least one subscriber",
        relay.registry().channel_count() as u64,
    );
    gauge(
        &mut out,
        "parley_relay_pairing_codes_active",
        "Pairing codes awaiting approval or consumption",
        relay.pairing().len() as u64,
    );
    counter(
        &mut out,
        "parley_relay_connections_total",
        "Connections accepted since startup",
        m.connections_total.load(Ordering::Relaxed),
    );
    counter(
        &mut out,
        "parley_relay_messages_total",
        "Messages accepted for delivery",
        m.messages_total.load(Ordering::Relaxed),
    );
    counter(
        &mut out,
        "parley_relay_messages_suppressed_total",
        "Messages suppressed by a block list",
        m.messages_suppressed_total.load(Ordering::Relaxed),
    );
    counter(
        &mut out,
        "parley_relay_signals_total",
        "Signaling events forwarded",
        m.signals_total.load(Ordering::Relaxed),
    );
    counter(
        &mut out,
        "parley_relay_pairing_generated_total",
        "Pairing codes generated",
        m.pairing_generated_total.load(Ordering::Relaxed),
    );
    counter(
        &mut out,
        "parley_relay_pairing_confirmed_total",
        "Pairing codes approved",
        m.pairing_confirmed_total.load(Ordering::Relaxed),
    );
    counter(
        &mut out,
        "parley_relay_pairing_consumed_total",
        "Pairing credentials consumed",
        m.pairing_consumed_total.load(Ordering::Relaxed),
    );
    counter(
        &mut out,
        "parley_relay_pairing_expired_total",
        "Pairing codes dropped by expiry",
        m.pairing_expired_total.load(Ordering::Relaxed),
    );
    counter(
        &mut out,
        "parley_relay_auth_failures_total",
        "Failed credential verifications",
        m.auth_failures_total.load(Ordering::Relaxed),
    );
    counter(
        &mut out,
        "parley_relay_rate_limit_hits_total",
        "Requests refused by a rate limit",
        m.rate_limit_hits.load(Ordering::Relaxed),
    );
    counter(
        &mut out,
        "parley_relay_errors_total",
        "Errors surfaced to clients",
        m.errors_total.load(Ordering::Relaxed),
    );

    out
}
