//! Process wiring: gateway → processor → bus → orchestrator.
//!
//! The gateway task only filters and enqueues. A single dispatch task owns
//! the orchestrator and drains the bus, so every alert is handled in
//! delivery order.

use std::sync::{Arc, Mutex};

use reqwest::Client;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::bus::EventBus;
use crate::clock::{Clock, SystemClock};
use crate::config::{AppConfig, ListenerConfig};
use crate::error::{ConfigError, GatewayError, PipelineError};
use crate::events::RawEvent;
use crate::exchange::build_backend;
use crate::gateway::{
    discover_gateway_url, gateway_url_with_query, CallbackError, EventCallback, GatewayConnection,
    GatewayEvent, SessionSettings, WsTransport,
};
use crate::ingest::MessageProcessor;
use crate::services::stats_reporter::BreakerStates;
use crate::services::{Orchestrator, StatsReporter, TradeJournal};

pub async fn run(config: AppConfig) -> Result<(), PipelineError> {
    if config.listener.token.trim().is_empty() {
        return Err(ConfigError::Invalid {
            field: "listener.token".to_string(),
            reason: "set it in the config file or DISCORD_TOKEN".to_string(),
        }
        .into());
    }

    let backend = build_backend(&config.broker)?;
    let url = resolve_gateway_url(&config.listener).await?;
    info!("🌐 [RUNTIME] Gateway endpoint: {}", url);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let mut orchestrator = Orchestrator::new(
        config.clone(),
        backend.execution.clone(),
        backend.accounts.clone(),
        clock,
    );

    if let Some(path) = &config.reporting.journal_path {
        let journal = TradeJournal::new(path);
        orchestrator.add_order_callback(journal.callback());
    }

    if !orchestrator.start().await {
        warn!("⚠️ [RUNTIME] Backend not connected yet; execution will retry on first order");
    }

    let breaker_states: BreakerStates = Arc::new(Mutex::new(orchestrator.breaker_states()));
    let mut reporter = StatsReporter::new(
        orchestrator.stats_handle(),
        breaker_states.clone(),
        config.reporting.stats_cron.clone(),
    );
    if let Err(e) = reporter.start().await {
        warn!("⚠️ [RUNTIME] Stats reporter disabled: {}", e);
    }

    let (bus, rx) = EventBus::new();
    let dispatcher = tokio::spawn(dispatch_loop(orchestrator, rx, breaker_states));

    let connection = GatewayConnection::new(
        SessionSettings::from_listener(&config.listener),
        WsTransport::new(url),
        ingest_callback(MessageProcessor::from_config(&config.listener), bus),
    );
    let handle = connection.spawn();

    let mut state_rx = handle.subscribe_state();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("🛑 [RUNTIME] Ctrl-C received, shutting down");
            handle.stop();
        }
        _ = async { while state_rx.changed().await.is_ok() {} } => {
            warn!("⚠️ [RUNTIME] Gateway task ended on its own");
        }
    }

    let gateway_result = handle.join().await;

    // The bus closes once the gateway callback is dropped; the dispatcher
    // drains what is queued and hands the orchestrator back.
    match dispatcher.await {
        Ok(mut orchestrator) => orchestrator.stop().await,
        Err(e) => error!("💥 [RUNTIME] Dispatch task failed: {}", e),
    }
    reporter.stop().await;

    match gateway_result {
        Ok(()) => {
            info!("👋 [RUNTIME] Shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!("❌ [RUNTIME] Gateway failed: {}", e);
            Err(e.into())
        }
    }
}

/// Configured URL if present, otherwise ask the REST API.
pub async fn resolve_gateway_url(listener: &ListenerConfig) -> Result<String, GatewayError> {
    match &listener.gateway_url {
        Some(url) => gateway_url_with_query(url),
        None => {
            let client = Client::builder()
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .map_err(|e| GatewayError::GatewayUrl(e.to_string()))?;
            discover_gateway_url(&client, &listener.api_base, &listener.token).await
        }
    }
}

/// Gateway callback: filter the dispatch and enqueue what survives.
pub fn ingest_callback(mut processor: MessageProcessor, bus: EventBus) -> EventCallback {
    Box::new(move |event: GatewayEvent| {
        if let Some(raw) = processor.process(&event) {
            bus.publish(raw).map_err(|e| Box::new(e) as CallbackError)?;
        }
        Ok(())
    })
}

/// Drain the bus through the orchestrator until every producer is gone.
pub async fn dispatch_loop(
    mut orchestrator: Orchestrator,
    mut rx: mpsc::UnboundedReceiver<RawEvent>,
    breakers: BreakerStates,
) -> Orchestrator {
    info!("📬 [DISPATCH] Consumer started");
    while let Some(event) = rx.recv().await {
        let placed = orchestrator.handle(&event.content, event.metadata()).await;
        debug!(
            "[DISPATCH] Message {} from {} handled (order placed: {})",
            event.event_id, event.author_name, placed
        );
        if let Ok(mut states) = breakers.lock() {
            *states = orchestrator.breaker_states();
        }
    }
    info!("📭 [DISPATCH] Queue closed");
    orchestrator
}
