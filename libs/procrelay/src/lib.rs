// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! procrelay - launch child processes wired to loopback endpoints and relay
//! their output upstream.
//!
//! A spawn request names an executable, its arguments and environment, and a
//! list of ports. The child gets its stdout/stderr captured through pipes and
//! one connected socket per port at descriptors `3, 4, 5, ...`; the first
//! socket receives the child's pid. A single-threaded [`EventLoop`] then
//! relays every child's output through the [`HostChannel`] and reaps children
//! whose streams have closed.
//!
//! Every failure is a [`Status`] from one flat, stable code space. Failures
//! after fork travel as the child's exit status.

pub mod config;
pub mod event_loop;
pub mod host;
pub mod pid_message;
pub mod poll_set;
pub mod process;
pub mod request;
pub mod spawner;
pub mod status;
pub mod sys;
pub mod table;

pub use config::RelayConfig;
pub use event_loop::EventLoop;
pub use host::{FramedHost, HostChannel, Relay, Wake};
pub use poll_set::PollSet;
pub use process::{Drained, ProcessRecord, StreamKind};
pub use request::{LaunchPlan, Protocol, SpawnRequest};
pub use spawner::spawn;
pub use status::Status;
pub use table::{ProcessTable, Reaped};
