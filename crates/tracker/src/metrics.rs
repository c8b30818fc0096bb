use anyhow::Result;
use metrics::{describe_counter, describe_gauge};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;

pub fn describe() {
    describe_counter!(
        "tracker_stake_txs_total",
        "Stake transactions folded into wallet state."
    );
    describe_counter!(
        "tracker_unstake_txs_total",
        "Unstake transactions folded into wallet state."
    );
    describe_counter!(
        "tracker_ranges_dropped_total",
        "Block ranges abandoned after provider rejection or transport failure."
    );
    describe_counter!("rpc_requests_total", "Successful JSON-RPC requests.");
    describe_counter!(
        "rpc_transport_errors_total",
        "JSON-RPC requests that failed at the transport layer."
    );
    describe_counter!(
        "rpc_provider_errors_total",
        "JSON-RPC requests the provider rejected."
    );
    describe_gauge!("tracker_wallets_tracked", "Wallets with recorded history.");
    describe_counter!(
        "tracker_updates_total",
        "Completed leaderboard update runs, labeled by outcome."
    );
}

pub fn install_prometheus(port: u16) -> Result<PrometheusHandle> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    Ok(PrometheusBuilder::new()
        .with_http_listener(addr)
        .install_recorder()?)
}
