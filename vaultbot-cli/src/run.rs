//! Process wiring: turns a parsed [`VaultBotArgs`] into a running bot.
//! Assembles the store, ledger adapter, and scheduler, then dispatches on
//! the selected run mode (§6).

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;
use vaultbot_core::clock::now_secs;
use vaultbot_core::config::Config;
use vaultbot_core::ledger::HttpLedgerAdapter;
use vaultbot_core::scanner;
use vaultbot_core::scheduler::Scheduler;
use vaultbot_core::store::Store;
use vaultbot_core::{buy_job, reward_job};
use vaultbot_tokio::task::{try_join_tasks_and_shutdown, LxTask};

use crate::cli::{RunMode, VaultBotArgs};
use crate::server;

pub fn run(args: VaultBotArgs) -> anyhow::Result<()> {
    let mode = args.run_mode()?;
    let treasury_address = args
        .treasury_address
        .clone()
        .context("TREASURY_ADDRESS is required")?;
    let config =
        Config::validate(args.into_config_input()).context("invalid configuration")?;

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build Tokio runtime")?;

    rt.block_on(run_async(mode, config, treasury_address))
}

async fn run_async(
    mode: RunMode,
    config: Config,
    treasury_address: String,
) -> anyhow::Result<()> {
    let store = Store::open(&config.data_dir).context("failed to open store")?;

    if mode == RunMode::ExitSafeMode {
        store.exit_safe_mode().context("failed to clear safe mode")?;
        info!("safe mode cleared");
        return Ok(());
    }

    let ledger = HttpLedgerAdapter::new(
        config.rpc_url.clone(),
        config.indexer_api_key.clone(),
        config.dry_run,
    );

    match mode {
        RunMode::ExitSafeMode => unreachable!("handled above"),
        RunMode::Bootstrap => {
            let summary = scanner::bootstrap(
                &store,
                &ledger,
                &treasury_address,
                &config.token_mint,
                config.bootstrap_signature_limit as u32,
            )
            .await
            .context("bootstrap scan failed")?;
            info!(?summary, "bootstrap scan complete");
            store.flush()?;
            Ok(())
        }
        RunMode::OnceBuy => {
            let now = now_secs();
            let outcome = vaultbot_core::engine::run_guarded(
                &store,
                vaultbot_core::model::LockType::BuyJob,
                std::time::Duration::from_millis(config.buy_job_timeout_ms),
                config.max_consecutive_rpc_errors,
                || async {
                    buy_job::run(&store, &ledger, &config, &treasury_address, now)
                        .await
                        .map(|_| ())
                        .map_err(anyhow::Error::from)
                },
            )
            .await
            .context("buy job failed to run")?;
            info!(?outcome, "once-buy complete");
            store.flush()?;
            Ok(())
        }
        RunMode::OnceReward => {
            let now = now_secs();
            let outcome = vaultbot_core::engine::run_guarded(
                &store,
                vaultbot_core::model::LockType::RewardJob,
                std::time::Duration::from_millis(config.reward_job_timeout_ms),
                config.max_consecutive_rpc_errors,
                || async {
                    reward_job::run(&store, &ledger, &config, &treasury_address, now)
                        .await
                        .map(|_| ())
                        .map_err(anyhow::Error::from)
                },
            )
            .await
            .context("reward job failed to run")?;
            info!(?outcome, "once-reward complete");
            store.flush()?;
            Ok(())
        }
        RunMode::Scheduler => run_scheduler(store, ledger, config, treasury_address).await,
    }
}

/// Waits for SIGTERM (§6: graceful shutdown on SIGINT/SIGTERM). SIGINT is
/// handled separately via `ctrl_c`, which is portable; SIGTERM has no
/// Windows equivalent, so this future never resolves there.
#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut stream) => {
            stream.recv().await;
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to install SIGTERM handler");
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}

async fn run_scheduler(
    store: Store,
    ledger: HttpLedgerAdapter,
    config: Config,
    treasury_address: String,
) -> anyhow::Result<()> {
    let status_port = config.status_port;
    let scheduler = Scheduler::new(store, ledger, config, treasury_address);
    scheduler.init().await.context("scheduler init failed")?;

    let router_state = Arc::new(server::RouterState::new(
        scheduler.store.clone(),
        scheduler.config.clone(),
    ));
    let listen_addr: SocketAddr = ([0, 0, 0, 0], status_port).into();
    let listener = tokio::net::TcpListener::bind(listen_addr)
        .await
        .with_context(|| format!("failed to bind status server on {listen_addr}"))?;
    info!(%listen_addr, "status server listening");

    let mut server_shutdown = scheduler.shutdown_handle();
    let app = server::router(router_state);
    let server_task = LxTask::spawn("status-server", async move {
        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            server_shutdown.recv().await;
        })
        .await;
        if let Err(e) = result {
            tracing::error!(error = %e, "status server exited with an error");
        }
    });

    let scheduler_for_ctrlc = Arc::clone(&scheduler);
    LxTask::spawn("ctrlc-handler", async move {
        use tokio::signal::ctrl_c;

        info!("Ctrl+C handler ready, press Ctrl+C to shut down.");
        ctrl_c().await.expect("error receiving first CTRL+C");

        info!(
            "CTRL+C received, starting graceful shutdown. \
             Hit CTRL+C again to quit immediately."
        );
        scheduler_for_ctrlc.request_shutdown();
        ctrl_c().await.expect("error receiving second CTRL+C");
        std::process::exit(1);
    })
    .detach();

    let scheduler_for_sigterm = Arc::clone(&scheduler);
    LxTask::spawn("sigterm-handler", async move {
        wait_for_sigterm().await;
        info!("SIGTERM received, starting graceful shutdown.");
        scheduler_for_sigterm.request_shutdown();
    })
    .detach();

    let scheduler_for_run = Arc::clone(&scheduler);
    let scheduler_task = LxTask::spawn("scheduler", async move {
        if let Err(e) = scheduler_for_run.run().await {
            tracing::error!(error = %e, "scheduler exited with an error");
        }
    });

    const SHUTDOWN_TIME_LIMIT: std::time::Duration = std::time::Duration::from_secs(40);
    let (_eph_tasks_tx, eph_tasks_rx) = tokio::sync::mpsc::channel(1);
    try_join_tasks_and_shutdown(
        vec![server_task, scheduler_task],
        eph_tasks_rx,
        scheduler.shutdown_handle(),
        SHUTDOWN_TIME_LIMIT,
    )
    .await
    .context("error awaiting tasks")?;

    Ok(())
}
