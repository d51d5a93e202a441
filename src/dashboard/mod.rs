// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

// Admin HTTP surface: filter settings, credential usage, health.
// Unauthenticated; bind it to a trusted interface.

use std::sync::Arc;

use tokio::sync::watch;

use crate::credentials::CredentialPool;
use crate::filter::SharedFilter;
use crate::notify::Notifier;
use crate::watcher::ConnectionState;

pub mod api;

/// Shared handles the admin handlers operate on.
#[derive(Clone)]
pub struct DashboardState {
    pub filter: SharedFilter,
    pub pool: Arc<CredentialPool>,
    pub notifier: Arc<dyn Notifier>,
    pub watcher_state: watch::Receiver<ConnectionState>,
}
