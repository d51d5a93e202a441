// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Connection lifecycle of the mailbox watcher as a pure state machine.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    IdleWatching,
    ReconnectPending,
}

impl Default for ConnectionState {
    fn default() -> Self {
        ConnectionState::Disconnected
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::IdleWatching => "idle_watching",
            ConnectionState::ReconnectPending => "reconnect_pending",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionInput {
    Start,
    ConnectSucceeded,
    ConnectFailed,
    ConnectionLost,
    RefreshDue,
    ReconnectTimerFired,
    StopRequested,
}

/// Side effect the driver must perform after a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Open a new session.
    Connect,
    /// Arm push listening, the fallback poll and the refresh deadline, then
    /// run an initial scan.
    BeginWatching,
    /// Close the current session and open a new one.
    Reconnect,
    /// Arm the reconnect timer.
    ScheduleReconnect,
    /// Cancel timers and drop the session.
    Shutdown,
    /// Input does not apply in the current state.
    Ignore,
}

/// Applies `input` to `state`, returning the next state and the action to take.
pub fn transition(state: ConnectionState, input: ConnectionInput) -> (ConnectionState, Action) {
    use ConnectionInput::*;
    use ConnectionState::*;

    match (state, input) {
        (Disconnected, StopRequested) => (Disconnected, Action::Ignore),
        (_, StopRequested) => (Disconnected, Action::Shutdown),

        (Disconnected, Start) => (Connecting, Action::Connect),

        (Connecting, ConnectSucceeded) => (IdleWatching, Action::BeginWatching),
        (Connecting, ConnectFailed) => (ReconnectPending, Action::ScheduleReconnect),

        (IdleWatching, ConnectionLost) => (ReconnectPending, Action::ScheduleReconnect),
        (IdleWatching, RefreshDue) => (Connecting, Action::Reconnect),

        (ReconnectPending, ReconnectTimerFired) => (Connecting, Action::Connect),

        (state, _) => (state, Action::Ignore),
    }
}
