use anyhow::Result;
use common::classify::Classifier;
use common::config::Config;
use common::rpc::RpcClient;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

mod aggregator;
mod checkpoint;
mod cli;
mod metrics;
mod pipeline;
mod publisher;
mod scanner;
mod scheduler;
mod scorer;

fn rpc_client(config: &Config) -> Result<RpcClient> {
    RpcClient::new(
        config.rpc.urls.clone(),
        Duration::from_secs(config.rpc.timeout_secs),
        config.rpc.max_retries,
        Duration::from_millis(config.rpc.backoff_base_ms),
    )
}

fn publish_settings(config: &Config) -> publisher::PublishSettings {
    publisher::PublishSettings {
        webhook_url: config.publish.webhook_url.clone(),
        public_path: PathBuf::from(&config.publish.public_path),
        backup_dir: PathBuf::from(&config.publish.backup_dir),
        request_timeout: Duration::from_secs(config.publish.request_timeout_secs),
        max_payload_bytes: (config.publish.max_payload_mb * 1024.0 * 1024.0) as usize,
        chunk_size: config.publish.chunk_size,
        chunk_delay: Duration::from_millis(config.publish.chunk_delay_ms),
        safe_mode: config.publish.safe_mode,
        update_range: config.publish.update_range.clone(),
        current_phase: config.grading.current_phase,
        git_commit: config.publish.git_commit,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;

    let dispatch = common::observability::build_dispatch(&config.general.log_level);
    tracing::dispatcher::set_global_default(dispatch).map_err(anyhow::Error::msg)?;

    tracing::info!(
        staking_address = %config.contract.staking_address,
        genesis_block = config.contract.genesis_block,
        phase = config.grading.current_phase,
        safe_mode = config.publish.safe_mode,
        webhook = config.publish.webhook_url.is_some(),
        "stake tracker starting"
    );

    let cmd = cli::parse_args(std::env::args()).map_err(anyhow::Error::msg)?;

    let client = rpc_client(&config)?;
    let publisher = publisher::Publisher::new(publish_settings(&config))?;
    let classifier = Classifier::new(
        &config.contract.stake_selector,
        &config.contract.unstake_selector,
    );
    let checkpoint_path = PathBuf::from(&config.publish.checkpoint_path);

    // One-shot verbs run on the spot; a failure exits non-zero.
    if cmd != cli::Command::Run {
        let chain = pipeline::RpcChain {
            client: &client,
            staking_address: &config.contract.staking_address,
        };
        let outcome = match cmd {
            cli::Command::Incremental => {
                pipeline::run_incremental_once(
                    &chain,
                    &classifier,
                    &publisher,
                    &config,
                    &checkpoint_path,
                )
                .await?
            }
            _ => {
                pipeline::run_full_once(&chain, &classifier, &publisher, &config, &checkpoint_path)
                    .await?
            }
        };
        tracing::info!(
            wallets = outcome.wallets,
            entries = outcome.entries.len(),
            scanned = ?outcome.scanned,
            "update finished"
        );
        return Ok(());
    }

    metrics::install_prometheus(config.observability.prometheus_port)?;
    metrics::describe();

    let cfg = Arc::new(config);
    let client = Arc::new(client);
    let publisher = Arc::new(publisher);
    let classifier = Arc::new(classifier);

    let (update_tx, mut update_rx) = tokio::sync::mpsc::channel::<()>(8);

    tokio::spawn({
        let cfg = cfg.clone();
        let client = client.clone();
        let publisher = publisher.clone();
        let classifier = classifier.clone();
        let checkpoint_path = checkpoint_path.clone();
        async move {
            use tracing::Instrument;
            while update_rx.recv().await.is_some() {
                let span = tracing::info_span!("job_run", job = "leaderboard_update");
                let chain = pipeline::RpcChain {
                    client: &client,
                    staking_address: &cfg.contract.staking_address,
                };
                match pipeline::run_full_once(
                    &chain,
                    &classifier,
                    &publisher,
                    &cfg,
                    &checkpoint_path,
                )
                .instrument(span)
                .await
                {
                    Ok(outcome) => {
                        ::metrics::counter!("tracker_updates_total", "outcome" => "success")
                            .increment(1);
                        tracing::info!(
                            wallets = outcome.wallets,
                            entries = outcome.entries.len(),
                            "leaderboard_update done"
                        );
                    }
                    Err(e) => {
                        ::metrics::counter!("tracker_updates_total", "outcome" => "failure")
                            .increment(1);
                        tracing::error!(error = %e, "leaderboard_update failed");
                    }
                }
            }
        }
    });

    let _scheduler_handles = scheduler::start(vec![scheduler::JobSpec {
        name: "leaderboard_update".to_string(),
        interval: Duration::from_secs(cfg.scheduler.update_interval_secs),
        tick: update_tx,
        run_immediately: true,
    }]);
    tracing::info!(
        interval_secs = cfg.scheduler.update_interval_secs,
        "scheduler started, first update runs immediately"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("shutting down (force exit in 5s)");

    // Give spawned tasks a moment to finish, then force exit.
    tokio::spawn(async {
        tokio::time::sleep(Duration::from_secs(5)).await;
        tracing::warn!("force exit after timeout");
        std::process::exit(0);
    });

    Ok(())
}
