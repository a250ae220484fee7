//! Agent WebSocket handler (C4, §4.4). `/ws`. Each connection is a pair of
//! cooperative tasks — a reader that parses frames and dispatches, and a
//! writer that serialises outbound sends over a bounded mailbox — so no two
//! writers ever touch the socket simultaneously.

use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use chrono::Utc;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use fleet_domain::model::{Agent, AgentState, MachineFacts};
use fleet_protocol::{AgentFrame, ServerFrame};

use crate::agents::fingerprint::{self, Classification};
use crate::state::AppState;

/// GET /ws — upgrade to WebSocket and hand off to the per-connection loop.
pub async fn agent_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut ws_sink, mut ws_stream) = socket.split();

    let idle_timeout = Duration::from_millis(state.config.heartbeat.active_ms * 3);
    let register = match tokio::time::timeout(idle_timeout, wait_for_register(&mut ws_stream)).await {
        Ok(Some(frame)) => frame,
        Ok(None) => {
            send_registration_error(&mut ws_sink, "INVALID_REGISTRATION", "expected register frame").await;
            return;
        }
        Err(_) => {
            let _ = ws_sink.send(Message::Close(None)).await;
            return;
        }
    };

    let AgentFrame::Register {
        customer_id,
        machine_id,
        fingerprint: presented_fingerprint,
        license_uuid,
        machine_info,
        status,
        tools,
    } = register
    else {
        unreachable!("wait_for_register only returns Register frames")
    };

    let facts = MachineFacts {
        hostname: machine_info.hostname.clone(),
        os_type: machine_info.os_type,
        os_version: machine_info.os_version,
        arch: machine_info.arch,
        cpu_model: machine_info.cpu_model,
        cpu_id: machine_info.cpu_id,
        disk_serial: machine_info.disk_serial,
        motherboard_uuid: machine_info.motherboard_uuid,
        mac_address: machine_info.mac_address,
        total_ram_mb: machine_info.total_ram_mb,
        local_username: machine_info.local_username,
        local_ip_address: machine_info.local_ip_address.clone(),
        os_installation_id: machine_info.os_installation_id,
    };

    let owner_user_id = customer_id.clone();
    let agents = &state.persistence.agents;

    let (agent, created) = match agents.find_or_create(&owner_user_id, &customer_id, &machine_id) {
        Ok(pair) => pair,
        Err(err) => {
            tracing::warn!(error = %err, "register rejected: store error");
            send_registration_error(&mut ws_sink, "INVALID_REGISTRATION", &err.to_string()).await;
            return;
        }
    };

    let license_owner = license_uuid
        .as_deref()
        .and_then(|uuid| agents.find_by_license(uuid));

    let classification = fingerprint::classify(
        if created { None } else { Some(&agent) },
        license_owner.as_ref(),
        license_uuid.as_deref(),
        &facts,
    );

    let agent = match apply_classification(&state, &agent, &classification, &facts, license_uuid.as_deref()) {
        Ok(agent) => agent,
        Err(code) => {
            send_registration_error(&mut ws_sink, code, "registration rejected").await;
            return;
        }
    };

    if matches!(agent.state, AgentState::Blocked | AgentState::Expired) {
        send_registration_error(&mut ws_sink, "LICENSE_INVALID", "license blocked or expired").await;
        return;
    }

    let _ = presented_fingerprint;

    let pattern = state
        .persistence
        .activity
        .get_or_default(&owner_user_id, "UTC");
    let decision = state.power.decide(&agent.id, agent.pending_commands, false, &pattern, Utc::now());

    if let Err(err) = agents.record_heartbeat(&agent.id, status.screen_locked, status.current_task.clone()) {
        tracing::warn!(agent_id = %agent.id, error = %err, "failed to record register-time status");
    }
    if let Err(err) = agents.mark_online(&agent.id, true) {
        tracing::warn!(agent_id = %agent.id, error = %err, "failed to mark agent online");
    }
    let _ = agents.set_power_state(&agent.id, decision.power_state);

    let registered = ServerFrame::Registered {
        agent_id: agent.id.clone(),
        license_status: agent.license_status().to_string(),
        license_uuid: agent.license_uuid.clone(),
        license_expires_at: None,
        heartbeat_interval: decision.heartbeat_interval_ms,
        server_time: Utc::now().to_rfc3339(),
    };
    if send_ws_frame(&mut ws_sink, &registered).await.is_err() {
        return;
    }

    tracing::info!(agent_id = %agent.id, customer_id = %customer_id, machine_id = %machine_id, "agent registered");

    let (outbound_tx, mut outbound_rx) = mpsc::channel::<ServerFrame>(64);
    state
        .registry
        .register(&agent.id, &owner_user_id, &machine_info.hostname, tools, outbound_tx);

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            if send_ws_frame(&mut ws_sink, &frame).await.is_err() {
                break;
            }
        }
    });

    let agent_id = agent.id.clone();

    // The idle-read deadline is sized from the agent's *current* power
    // state, not a fixed constant: a PASSIVE or SLEEP agent heartbeats far
    // less often than an ACTIVE one, and holding it to ACTIVE's budget
    // would drop it offline between its own scheduled heartbeats (§4.4,
    // §4.5's offline-after ladder).
    let mut idle_timeout = Duration::from_millis(state.power.interval_for(decision.power_state) * 3);
    let mut missed_deadline = tokio::time::Instant::now() + idle_timeout;

    loop {
        tokio::select! {
            frame = tokio::time::timeout_at(missed_deadline, ws_stream.next()) => {
                let Ok(next) = frame else {
                    tracing::info!(agent_id = %agent_id, "heartbeat window elapsed, marking offline");
                    break;
                };
                match next {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<AgentFrame>(&text) {
                            Ok(frame) => {
                                if let Some(power_state) = handle_inbound(&state, &agent_id, &owner_user_id, frame).await {
                                    idle_timeout = Duration::from_millis(state.power.interval_for(power_state) * 3);
                                }
                                missed_deadline = tokio::time::Instant::now() + idle_timeout;
                            }
                            Err(_) => {
                                tracing::warn!(agent_id = %agent_id, "unknown message, closing 1003");
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        missed_deadline = tokio::time::Instant::now() + idle_timeout;
                    }
                    Some(Err(err)) => {
                        tracing::warn!(agent_id = %agent_id, error = %err, "websocket read error");
                        break;
                    }
                }
            }
        }
    }

    // Drain any already-in-flight responses for up to 1s, then unregister
    // without deleting the Agent row (§4.4).
    tokio::time::sleep(Duration::from_millis(200)).await;
    let failed = state.dispatcher.fail_pending_for_agent(&agent_id);
    writer.abort();
    state.registry.unregister(&agent_id);
    if let Err(err) = agents.mark_online(&agent_id, false) {
        tracing::warn!(agent_id = %agent_id, error = %err, "failed to mark agent offline on disconnect");
    }
    tracing::info!(agent_id = %agent_id, failed_in_flight = failed, "agent disconnected");
}

/// Applies a [`Classification`] to C1, returning the resulting [`Agent`] row
/// or a close code when the connection must be rejected (§4.2).
fn apply_classification(
    state: &AppState,
    agent: &Agent,
    classification: &Classification,
    facts: &MachineFacts,
    presented_license_uuid: Option<&str>,
) -> Result<Agent, &'static str> {
    let agents = &state.persistence.agents;
    let computed_fingerprint = fingerprint::compute(facts, presented_license_uuid);
    match classification {
        Classification::NewAgent | Classification::Match => agents
            .set_fingerprint(&agent.id, computed_fingerprint, facts.clone())
            .map_err(|_| "INVALID_REGISTRATION"),
        Classification::MinorDrift { change_type } => {
            let updated = agents
                .set_fingerprint(&agent.id, computed_fingerprint.clone(), facts.clone())
                .map_err(|_| "INVALID_REGISTRATION")?;
            let _ = agents.append_fingerprint_change(
                &agent.id,
                *change_type,
                agent.fingerprint.clone(),
                Some(computed_fingerprint),
                "soft-field drift on register".to_string(),
            );
            Ok(updated)
        }
        Classification::MajorDrift => {
            let _ = agents.transition_state(&agent.id, agent.state, AgentState::Pending);
            let updated = agents
                .set_fingerprint(&agent.id, computed_fingerprint.clone(), facts.clone())
                .map_err(|_| "INVALID_REGISTRATION")?;
            let _ = agents.append_fingerprint_change(
                &agent.id,
                fleet_domain::model::FingerprintChangeType::HardwareChange,
                agent.fingerprint.clone(),
                Some(computed_fingerprint),
                "hardware component changed, forcing re-activation".to_string(),
            );
            Ok(updated)
        }
        Classification::Duplicate => {
            // `find_or_create` already inserted this row (PENDING, fresh
            // fingerprint slot) if `(customerId, machineId)` was new, so the
            // duplicate is flagged on that same row rather than re-inserted.
            let duplicate = agents.mark_duplicate(&agent.id).map_err(|_| "INVALID_REGISTRATION")?;
            let _ = agents.append_fingerprint_change(
                &agent.id,
                fleet_domain::model::FingerprintChangeType::DuplicateDetected,
                agent.fingerprint.clone(),
                None,
                "presented licenseUuid already owned by a different (customerId, machineId)".to_string(),
            );
            state.audit.info(
                "duplicate_detected",
                serde_json::json!({
                    "agentId": duplicate.id,
                    "licenseUuid": presented_license_uuid,
                }),
            );
            Err("DUPLICATE")
        }
    }
}

/// Handle one parsed inbound frame. Returns the agent's newly-decided power
/// state when the frame was a heartbeat, so the caller can resize the
/// idle-read deadline to `3 × interval_for(power_state)` (§4.4/§4.5) —
/// `None` otherwise, leaving the caller's current deadline untouched.
async fn handle_inbound(
    state: &AppState,
    agent_id: &str,
    owner_user_id: &str,
    frame: AgentFrame,
) -> Option<fleet_domain::model::PowerState> {
    match frame {
        AgentFrame::Heartbeat { status } => {
            if let Err(err) = state.persistence.agents.record_heartbeat(
                agent_id,
                status.screen_locked,
                status.current_task.clone(),
            ) {
                tracing::warn!(agent_id, error = %err, "heartbeat update failed");
                return None;
            }
            if let Err(err) = state.persistence.agents.mark_online(agent_id, true) {
                tracing::warn!(agent_id, error = %err, "heartbeat online-flag update failed");
                return None;
            }
            let Some(agent) = state.persistence.agents.get(agent_id) else {
                return None;
            };
            let pattern = state
                .persistence
                .activity
                .get_or_default(owner_user_id, "UTC");
            let ai_connected = state.dispatcher.pending_count() > 0;
            let decision = state.power.decide(
                agent_id,
                agent.pending_commands,
                ai_connected,
                &pattern,
                Utc::now(),
            );
            let _ = state
                .persistence
                .agents
                .set_power_state(agent_id, decision.power_state);

            let pending_commands = agent.pending_commands > 0;
            if pending_commands {
                state.persistence.agents.drain_pending_commands(agent_id).ok();
            }

            let ack = ServerFrame::HeartbeatAck {
                license_status: agent.license_status().to_string(),
                target_state: format!("{:?}", decision.power_state).to_uppercase(),
                heartbeat_interval: decision.heartbeat_interval_ms,
                pending_commands,
                wake_at: decision.wake_at.map(|t| t.to_rfc3339()),
            };
            if let Some(sink) = state.registry.lookup(agent_id) {
                let _ = sink.try_send(ack);
            }
            Some(decision.power_state)
        }
        AgentFrame::Response {
            request_id,
            success,
            result,
            error,
            ..
        } => {
            state.dispatcher.complete(&request_id, success, result, error);
            None
        }
        AgentFrame::Pong => None,
        AgentFrame::Register { .. } => {
            tracing::warn!(agent_id, "unexpected re-register on an established connection");
            None
        }
    }
}

async fn wait_for_register(
    stream: &mut (impl StreamExt<Item = Result<Message, axum::Error>> + Unpin),
) -> Option<AgentFrame> {
    while let Some(Ok(msg)) = stream.next().await {
        if let Message::Text(text) = msg {
            if let Ok(frame @ AgentFrame::Register { .. }) = serde_json::from_str::<AgentFrame>(&text) {
                return Some(frame);
            }
            return None;
        }
    }
    None
}

async fn send_ws_frame(
    sink: &mut (impl SinkExt<Message> + Unpin),
    frame: &ServerFrame,
) -> Result<(), ()> {
    let json = serde_json::to_string(frame).map_err(|_| ())?;
    sink.send(Message::Text(json)).await.map_err(|_| ())
}

async fn send_registration_error(
    sink: &mut (impl SinkExt<Message> + Unpin),
    code: &str,
    message: &str,
) {
    let frame = ServerFrame::Error {
        code: code.to_string(),
        message: message.to_string(),
    };
    let _ = send_ws_frame(sink, &frame).await;
    let close_code = frame.close_code().unwrap_or(1003);
    let _ = sink
        .send(Message::Close(Some(axum::extract::ws::CloseFrame {
            code: close_code,
            reason: message.to_string().into(),
        })))
        .await;
}
