//! Agent-facing subsystems: the WebSocket handler (C4), the in-process
//! registry (C3), command dispatch/correlation, fingerprinting (C2), and
//! the power-state engine (C5).

pub mod dispatch;
pub mod fingerprint;
pub mod power;
pub mod registry;
pub mod ws;
