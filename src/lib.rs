//! HTTP and SSE control surface for terminal coding agents.
//!
//! An agent REPL (Claude Code, Goose, Aider, Codex) runs under a PTY; its
//! output feeds a virtual screen whose snapshots are sampled, classified as
//! stable or changing, and segmented into a conversational transcript that
//! remote clients read over REST and a server-sent-events stream.

pub mod attach;
pub mod bus;
pub mod config;
pub mod coordinator;
pub mod format;
pub mod logging;
pub mod pty;
pub mod screen;
pub mod server;
pub mod session;
pub mod tracker;
pub mod transcript;
