//! `AppState` construction, extracted from `main.rs` so `serve` and `doctor`
//! share one boot path (§5, §6.5).

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sha2::{Digest, Sha256};

use fleet_domain::config::Config;

use crate::agents::dispatch::Dispatcher;
use crate::agents::power::PowerEngine;
use crate::agents::registry::AgentRegistry;
use crate::audit::AuditLog;
use crate::mcp::sse::SseHub;
use crate::persistence::Persistence;
use crate::state::AppState;

/// Validate config, open the persistence gateway and wire every in-memory
/// subsystem. Shared by the `serve` and `doctor` CLI commands.
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            fleet_domain::config::ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            fleet_domain::config::ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues
        .iter()
        .any(|i| i.severity == fleet_domain::config::ConfigSeverity::Error)
    {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == fleet_domain::config::ConfigSeverity::Error)
                .count()
        );
    }

    let data_dir = std::path::Path::new(&config.persistence.data_dir);
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("creating data dir {}", data_dir.display()))?;
    let persistence = Arc::new(Persistence::open(data_dir).context("opening persistence gateway")?);
    tracing::info!(path = %data_dir.display(), "persistence gateway ready");

    let registry = Arc::new(AgentRegistry::new());
    let dispatcher = Arc::new(Dispatcher::new(
        registry.clone(),
        Duration::from_millis(config.heartbeat.command_timeout_ms),
    ));
    let power = Arc::new(PowerEngine::new(config.heartbeat.clone()));
    let sse = Arc::new(SseHub::new(
        config.mcp_relay.sse_buffer_events,
        config.mcp_relay.sse_buffer_ttl_secs,
    ));
    let audit = AuditLog::spawn(persistence.audit.clone());
    tracing::info!("agent registry, dispatcher, power engine, SSE hub and audit log ready");

    let admin_token_hash = {
        let env_var = &config.admin.token_env;
        match std::env::var(env_var) {
            Ok(token) if !token.is_empty() => {
                tracing::info!(env_var = %env_var, "admin bearer-token auth enabled");
                Some(Sha256::digest(token.as_bytes()).to_vec())
            }
            _ => {
                tracing::warn!(
                    env_var = %env_var,
                    "admin bearer-token auth DISABLED — set {env_var} to enable"
                );
                None
            }
        }
    };

    Ok(AppState {
        config,
        persistence,
        registry,
        dispatcher,
        power,
        audit,
        sse,
        admin_token_hash,
    })
}

/// Spawn the long-running background tasks. Offline detection and
/// power-state decisions are made inline on each agent's WebSocket task
/// (`agents::ws`) as heartbeats arrive or lapse, so the only sweep needed
/// here is bounding the in-memory OAuth code/token indices (§4.6).
pub fn spawn_background_tasks(state: &AppState) {
    let persistence = state.persistence.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            interval.tick().await;
            let now = chrono::Utc::now();
            let codes = persistence.oauth_codes.evict_expired(now);
            let tokens = persistence.oauth_tokens.evict_expired(now);
            if codes > 0 || tokens > 0 {
                tracing::debug!(codes, tokens, "evicted expired oauth entries from memory");
            }
        }
    });

    tracing::info!("background tasks spawned");
}
