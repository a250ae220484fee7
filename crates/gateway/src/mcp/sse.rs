//! Per-session SSE buffering and resumption (§4.7, §6.2).
//!
//! Each session owns a bounded ring buffer of past events (default 256 /
//! 5 min, `SSE_BUFFER_EVENTS`) plus a broadcast channel for events emitted
//! while a GET stream is attached. A reconnect carrying `Last-Event-ID`
//! replays everything still buffered with a strictly greater id; if the
//! requested id has already been evicted the relay emits a single
//! `session-reset` event instead of silently resuming from the wrong
//! point (§4.7).

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub struct SseEvent {
    pub id: u64,
    pub event: &'static str,
    pub data: Value,
}

struct SessionState {
    buffer: VecDeque<(SseEvent, Instant)>,
    next_id: u64,
    sender: broadcast::Sender<SseEvent>,
}

/// Shared across every MCP connection's sessions on this process. Session
/// contents are ephemeral (§5): a restart loses buffered history, same as
/// every other in-memory structure here.
pub struct SseHub {
    sessions: Mutex<HashMap<String, Arc<Mutex<SessionState>>>>,
    capacity: usize,
    ttl: Duration,
}

pub enum Replay {
    Events(Vec<SseEvent>),
    /// The requested `Last-Event-ID` has already been evicted from the
    /// buffer; the caller should emit a session-reset event instead.
    Reset,
}

impl SseHub {
    pub fn new(capacity: usize, ttl_secs: u64) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            capacity,
            ttl: Duration::from_secs(ttl_secs),
        }
    }

    fn session(&self, session_id: &str) -> Arc<Mutex<SessionState>> {
        self.sessions
            .lock()
            .entry(session_id.to_string())
            .or_insert_with(|| {
                let (sender, _) = broadcast::channel(self.capacity.max(16));
                Arc::new(Mutex::new(SessionState {
                    buffer: VecDeque::new(),
                    next_id: 1,
                    sender,
                }))
            })
            .clone()
    }

    /// Publish a progress/notification event for `session_id`, assigning
    /// the next monotonic id. Never a JSON-RPC response — those go back
    /// directly on the POST that triggered them (§4.7).
    pub fn publish(&self, session_id: &str, event_name: &'static str, data: Value) {
        let session = self.session(session_id);
        let mut guard = session.lock();
        self.evict_expired(&mut guard);

        let id = guard.next_id;
        guard.next_id += 1;
        let event = SseEvent {
            id,
            event: event_name,
            data,
        };
        if guard.buffer.len() >= self.capacity {
            guard.buffer.pop_front();
        }
        guard.buffer.push_back((event.clone(), Instant::now()));
        let _ = guard.sender.send(event);
    }

    fn evict_expired(&self, guard: &mut SessionState) {
        let ttl = self.ttl;
        guard.buffer.retain(|(_, at)| at.elapsed() < ttl);
    }

    /// Replay buffered events with id strictly greater than `last_event_id`.
    /// Returns [`Replay::Reset`] when `last_event_id` no longer exists in
    /// the buffer (already evicted).
    pub fn replay_since(&self, session_id: &str, last_event_id: u64) -> Replay {
        let session = self.session(session_id);
        let mut guard = session.lock();
        self.evict_expired(&mut guard);

        let oldest_buffered = guard.buffer.front().map(|(e, _)| e.id);
        match oldest_buffered {
            Some(oldest) if last_event_id + 1 < oldest && last_event_id != 0 => Replay::Reset,
            _ => Replay::Events(
                guard
                    .buffer
                    .iter()
                    .map(|(e, _)| e.clone())
                    .filter(|e| e.id > last_event_id)
                    .collect(),
            ),
        }
    }

    pub fn subscribe(&self, session_id: &str) -> broadcast::Receiver<SseEvent> {
        self.session(session_id).lock().sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replay_returns_events_strictly_after_last_seen() {
        let hub = SseHub::new(256, 300);
        hub.publish("s1", "progress", serde_json::json!({"n": 1}));
        hub.publish("s1", "progress", serde_json::json!({"n": 2}));
        hub.publish("s1", "progress", serde_json::json!({"n": 3}));

        match hub.replay_since("s1", 1) {
            Replay::Events(events) => {
                let ids: Vec<u64> = events.iter().map(|e| e.id).collect();
                assert_eq!(ids, vec![2, 3]);
            }
            Replay::Reset => panic!("expected events"),
        }
    }

    #[test]
    fn replay_with_evicted_id_resets() {
        let hub = SseHub::new(2, 300);
        hub.publish("s1", "progress", serde_json::json!({"n": 1}));
        hub.publish("s1", "progress", serde_json::json!({"n": 2}));
        hub.publish("s1", "progress", serde_json::json!({"n": 3}));
        // Capacity 2: event id 1 has been evicted.
        match hub.replay_since("s1", 1) {
            Replay::Reset => {}
            Replay::Events(_) => panic!("expected reset"),
        }
    }

    #[test]
    fn replay_from_zero_returns_everything_buffered() {
        let hub = SseHub::new(256, 300);
        hub.publish("s1", "progress", serde_json::json!({"n": 1}));
        match hub.replay_since("s1", 0) {
            Replay::Events(events) => assert_eq!(events.len(), 1),
            Replay::Reset => panic!("expected events"),
        }
    }
}
