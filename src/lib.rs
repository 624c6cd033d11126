//! Kairo bridge: relays WhatsApp conversations to the Kairo backend.
//!
//! The bridge sits between a WhatsApp sidecar (which owns the chat session)
//! and the Kairo backend (reachable over plain HTTP request/response).
//! Outbound messages are pulled from the backend's queue, delivered at least
//! once, and acknowledged; inbound messages are forwarded best-effort.
//!
//! See `DESIGN.md` for the architecture notes.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod backend;
pub mod config;
pub mod delivery;
pub mod lifecycle;
pub mod logging;
pub mod relay;
pub mod report;
pub mod transport;
