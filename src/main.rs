// Copyright (c) 2025 TexasFortress.AI
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::sync::Arc;
use std::time::Duration;

use actix_web::middleware::Logger;
use actix_web::{web, App, HttpServer};
use clap::Parser;
use env_logger::Env;
use log::{error, info, warn};

use alertmail::analysis::AnalysisCoordinator;
use alertmail::app::{build_notifier, build_strategies};
use alertmail::config::Settings;
use alertmail::credentials::{CredentialPool, JsonFileQuotaStore};
use alertmail::dashboard::{api, DashboardState};
use alertmail::dispatcher::Dispatcher;
use alertmail::error::AppError;
use alertmail::filter::SharedFilter;
use alertmail::imap::ImapConnector;
use alertmail::watcher::MailWatcher;

#[derive(Parser)]
#[command(name = "alertmail-server", about = "Camera alert email to push notification gateway")]
struct Cli {
    /// Path to a TOML config file (without extension is fine)
    #[arg(long, short, env = "ALERTMAIL_CONFIG")]
    config: Option<String>,
}

#[actix_web::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = Settings::new(cli.config.as_deref())?;
    env_logger::Builder::from_env(Env::default().default_filter_or(settings.log.level.as_str())).init();
    info!("Starting alertmail-server");

    let http_client = reqwest::Client::builder().build()?;
    let notifier = build_notifier(&settings, http_client.clone());

    let store = Arc::new(JsonFileQuotaStore::new(&settings.credentials.state_path));
    let pool = Arc::new(CredentialPool::new(
        settings.api_keys(),
        settings.quota_policy()?,
        store,
        notifier.clone(),
    ));
    if let Err(e) = pool.initialize().await {
        warn!("Could not restore quota state, starting with empty usage: {}", e);
    }

    let strategies = build_strategies(&settings, http_client.clone());
    if strategies.is_empty() && settings.analysis.ai_enabled {
        warn!("AI analysis is enabled but no provider is configured; every alert will be dropped");
    }
    let coordinator = Arc::new(AnalysisCoordinator::new(strategies, pool.clone()));

    let filter = SharedFilter::new(settings.filter.clone(), settings.analysis.ai_enabled);
    let dispatcher = Arc::new(Dispatcher::new(filter.clone(), coordinator, notifier.clone()));

    let connector = Arc::new(ImapConnector::new(
        settings.imap_endpoint(),
        Duration::from_secs(settings.watcher.operation_timeout_secs),
    )?);
    let watcher = MailWatcher::new(connector, settings.watcher_config());
    watcher.start(dispatcher).await;

    #[cfg(unix)]
    actix_web::rt::spawn(reload_on_hangup(cli.config.clone(), pool.clone(), filter.clone()));

    let server_handle = if settings.admin.enabled {
        let state = DashboardState {
            filter: filter.clone(),
            pool: pool.clone(),
            notifier: notifier.clone(),
            watcher_state: watcher.subscribe(),
        };
        info!("Admin API listening on http://{}:{}", settings.admin.host, settings.admin.port);
        let server = HttpServer::new(move || {
            App::new()
                .wrap(Logger::default())
                .app_data(web::Data::new(state.clone()))
                .configure(api::configure)
        })
        .bind((settings.admin.host.as_str(), settings.admin.port))?
        .disable_signals()
        .run();
        let handle = server.handle();
        actix_web::rt::spawn(async move {
            if let Err(e) = server.await {
                error!("Admin API server failed: {}", e);
            }
        });
        Some(handle)
    } else {
        None
    };

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    watcher.stop().await;
    if let Some(handle) = server_handle {
        handle.stop(true).await;
    }
    info!("alertmail-server stopped");
    Ok(())
}

/// Re-reads settings on SIGHUP: credentials, quota policy and filter rules.
#[cfg(unix)]
async fn reload_on_hangup(config_path: Option<String>, pool: Arc<CredentialPool>, filter: SharedFilter) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(stream) => stream,
        Err(e) => {
            warn!("Could not install SIGHUP handler, hot reload disabled: {}", e);
            return;
        }
    };

    while hangup.recv().await.is_some() {
        info!("SIGHUP received, reloading configuration");
        dotenvy::dotenv_override().ok();
        let settings = match Settings::new(config_path.as_deref()) {
            Ok(settings) => settings,
            Err(e) => {
                error!("Reload failed, keeping current settings: {}", e);
                continue;
            }
        };
        match settings.quota_policy() {
            Ok(policy) => pool.reload(settings.api_keys(), policy).await,
            Err(e) => {
                error!("Reload failed, keeping current settings: {}", e);
                continue;
            }
        }
        filter.update_filter(settings.filter.clone()).await;
        info!("Configuration reloaded");
    }
}
