//! WebSocket layer: connection handling, command routing, subscriptions.
//!
//! The endpoint at `/ws` pushes each stored notification to the live
//! connections of its recipient and accepts a small set of commands for
//! narrowing the feed and marking notifications read.

pub mod connection;
pub mod handler;
pub mod messages;
pub mod subscription;
