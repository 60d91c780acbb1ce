//! Terminal Bridge Binary
//!
//! Checks that the terminal answers, logs the account, then polls the last
//! tick for each configured symbol until shut down.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin terminal-bridge
//! ```
//!
//! # Environment Variables
//!
//! ## Optional
//! - `TERMINAL_HOST`: Terminal host (default: 127.0.0.1)
//! - `TERMINAL_REPLY_PORT`: Reply channel port (default: 15556)
//! - `TERMINAL_STREAM_PORT`: Stream channel port (default: 15557)
//! - `TERMINAL_WIRE_MODE`: plain | legacy (default: plain)
//! - `TERMINAL_AUTH_CODE`: Code appended to every request
//! - `BRIDGE_STREAM_SYMBOLS`: Comma-separated symbols to poll
//! - `BRIDGE_STREAM_INTERVAL_MS`: Poll interval per symbol (default: 1000)
//! - `BRIDGE_USE_STREAM_CHANNEL`: Open the push stream (default: false)
//! - `BRIDGE_HEALTH_PORT`: Health check HTTP port, 0 disables (default: 8083)
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use terminal_bridge::infrastructure::terminal::{
    ReconnectConfig, ReconnectPolicy, retry_with_backoff,
};
use terminal_bridge::{
    BridgeConfig, CommandClient, Connection, ConnectionConfig, HealthServer, HealthServerState,
    StreamEvent, StreamPayload, StreamTaskManager, StreamUpdate, TickFetcher, TickInfo,
    init_metrics, init_telemetry, new_request_id,
};
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Interval between background liveness checks.
const LIVENESS_INTERVAL: Duration = Duration::from_secs(30);

/// Stream channel event buffer.
const STREAM_EVENT_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();

    let _telemetry_guard = init_telemetry();

    tracing::info!("Starting Terminal Bridge");

    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Prometheus recorder not installed");
    }

    let config = BridgeConfig::from_env().context("invalid configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let connection = Arc::new(Connection::new(ConnectionConfig::from_settings(
        &config.terminal,
    )));
    let client = CommandClient::new(Arc::clone(&connection))
        .with_auth_code(config.terminal.auth_code.clone());

    let (sink_tx, sink_rx) = mpsc::channel::<StreamUpdate<TickInfo>>(config.stream.sink_capacity);
    let manager = StreamTaskManager::new(sink_tx);

    // Health server
    let stream_status = config
        .stream
        .use_stream_channel
        .then(|| connection.stream_status());
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        stream_status,
        manager.stats(),
    ));
    if config.server.health_port != 0 {
        let health_server = HealthServer::new(
            config.server.health_port,
            Arc::clone(&health_state),
            shutdown_token.clone(),
        );
        tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        });
    }

    // Wait for the terminal
    let mut policy = ReconnectPolicy::new(ReconnectConfig::with_max_attempts(
        config.stream.liveness_max_attempts,
    ));
    let client_ref = &client;
    let liveness = retry_with_backoff(&mut policy, &shutdown_token, move || async move {
        match client_ref.check_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(anyhow::anyhow!("terminal replied out of protocol")),
            Err(e) => Err(anyhow::Error::from(e)),
        }
    })
    .await;

    match liveness {
        Some(Ok(())) => health_state.set_terminal_reachable(true),
        Some(Err(e)) => {
            shutdown_token.cancel();
            return Err(e.context("terminal did not answer the liveness check"));
        }
        None => {
            tracing::info!("Shutdown requested before the terminal answered");
            return Ok(());
        }
    }

    log_terminal(&client).await;

    // Push stream
    if config.stream.use_stream_channel {
        let (event_tx, event_rx) = mpsc::channel(STREAM_EVENT_CAPACITY);
        tokio::spawn(handle_stream_events(event_rx));
        if let Err(e) = connection.open_stream(event_tx).await {
            tracing::error!(error = %e, "Stream channel unavailable");
        }
    }

    // Polling tasks
    tokio::spawn(handle_updates(sink_rx));
    if config.stream.symbols.is_empty() {
        tracing::info!("No symbols configured, polling disabled");
    } else {
        let request_id = new_request_id();
        let source = Arc::new(TickFetcher::new(client.clone()));
        let started = manager
            .start(
                &request_id,
                &config.stream.symbols,
                config.stream.interval,
                source,
            )
            .context("failed to start stream tasks")?;
        tracing::info!(request_id = %request_id, tasks = started.len(), "Polling started");
    }

    tokio::spawn(monitor_liveness(
        client.clone(),
        Arc::clone(&health_state),
        shutdown_token.clone(),
    ));

    tracing::info!("Terminal bridge ready");

    await_shutdown(shutdown_token).await;

    manager.shutdown().await;
    connection.close_stream().await;

    tracing::info!("Terminal bridge stopped");
    Ok(())
}

/// Log account, license and clock details once the terminal answers.
async fn log_terminal(client: &CommandClient) {
    match client.static_account_info().await {
        Ok(account) => tracing::info!(
            login = ?account.login,
            name = %account.name,
            currency = %account.currency,
            company = %account.company,
            "Account"
        ),
        Err(e) => tracing::warn!(error = %e, "Static account info unavailable"),
    }

    match client.license().await {
        Ok(license) => tracing::info!(license = ?license, "License"),
        Err(e) => tracing::warn!(error = %e, "License check failed"),
    }

    match client.broker_server_time().await {
        Ok(time) => tracing::info!(server_time = %time.time, "Broker server time"),
        Err(e) => tracing::warn!(error = %e, "Broker server time unavailable"),
    }
}

/// Log updates delivered by the stream tasks.
async fn handle_updates(mut rx: mpsc::Receiver<StreamUpdate<TickInfo>>) {
    while let Some(update) = rx.recv().await {
        match update.payload {
            StreamPayload::Data(tick) => tracing::debug!(
                request_id = %update.request_id,
                instrument = %tick.instrument,
                bid = ?tick.bid,
                ask = ?tick.ask,
                "Tick"
            ),
            StreamPayload::Error(error) => tracing::warn!(
                request_id = %update.request_id,
                symbol = ?update.symbol,
                error = %error,
                "Tick fetch failed"
            ),
        }
    }
}

/// Log events from the push stream.
async fn handle_stream_events(mut rx: mpsc::Receiver<StreamEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            StreamEvent::Connected => tracing::info!("Stream channel connected"),
            StreamEvent::Frame(frame) => tracing::debug!(
                command = %frame.command,
                fields = frame.fields.len(),
                "Stream frame"
            ),
            StreamEvent::Malformed { raw, error } => {
                tracing::warn!(raw = %raw, error = %error, "Malformed stream frame");
            }
            StreamEvent::Error(msg) => tracing::error!(error = %msg, "Stream channel error"),
            StreamEvent::Disconnected => tracing::warn!("Stream channel disconnected"),
        }
    }
}

/// Re-check liveness periodically for the readiness probe.
async fn monitor_liveness(
    client: CommandClient,
    health_state: Arc<HealthServerState>,
    shutdown_token: CancellationToken,
) {
    let mut ticker = tokio::time::interval(LIVENESS_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            () = shutdown_token.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let reachable = client.check_connection().await.unwrap_or(false);
        if reachable != health_state.terminal_reachable() {
            tracing::warn!(reachable, "Terminal liveness changed");
        }
        health_state.set_terminal_reachable(reachable);
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &BridgeConfig) {
    tracing::info!(
        reply = %config.reply_address(),
        stream = %config.stream_address(),
        wire_mode = %config.terminal.wire_mode,
        symbols = config.stream.symbols.len(),
        interval_ms = u64::try_from(config.stream.interval.as_millis()).unwrap_or(u64::MAX),
        health_port = config.server.health_port,
        "Configuration loaded"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
