//! Wire types for the OpenAI-compatible chat-completions surface.
//!
//! This crate intentionally does **not** depend on any HTTP framework or
//! client; it only defines the JSON shapes the gateway accepts and emits,
//! plus the SSE line codec used on both the upstream and downstream side
//! of a streaming call.

pub mod chat;
pub mod error;
pub mod models;
pub mod sse;
