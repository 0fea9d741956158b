//! Connect command implementation

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

use crate::output::{print_event, print_info};
use ep_core::config::AppConfig;
use ep_core::{ProfileError, ProfileStore};
use ep_supervisor::{
    ConnectionEvent, ConnectionOrchestrator, ConnectionState, EventSink, InstanceRole,
    ProcessSupervisor, SingleInstanceGuard,
};

/// Connect with a profile and stay in the foreground until interrupted
///
/// A second launch wakes the first and returns immediately. The core is
/// killed on every way out of this function.
pub async fn connect_command(
    config: &AppConfig,
    profiles_path: &Path,
    profile_key: Option<&str>,
) -> Result<()> {
    let mut guard = match SingleInstanceGuard::acquire(config.instance_port, &config.wake_token)
        .await
    {
        InstanceRole::Primary(guard) => guard,
        InstanceRole::Secondary => {
            print_info("echpilot is already running; asked it to come forward");
            return Ok(());
        }
    };

    let store = ProfileStore::load(profiles_path)?;
    let profile = match profile_key {
        Some(key) => store
            .find(key)
            .cloned()
            .ok_or_else(|| ProfileError::NotFound(key.to_string()))?,
        None => store.current().clone(),
    };

    let supervisor =
        Arc::new(ProcessSupervisor::with_tokio_launcher().with_pid_path(&config.pid_path));
    supervisor.install_shutdown_hook();

    let (events, mut event_rx) = EventSink::channel();
    let orchestrator = ConnectionOrchestrator::from_config(config, Arc::clone(&supervisor), events);

    let cancel = CancellationToken::new();
    spawn_signal_handler(cancel.clone());

    print_info(&format!("Connecting with profile '{}'", profile.name));
    orchestrator.start(profile).await;

    let outcome = loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                print_info("Shutting down...");
                break ConnectionState::Idle;
            }
            true = guard.woken() => {
                print_info(&format!("Already connected ({})", orchestrator.state()));
            }
            event = event_rx.recv() => match event {
                Some(event) => {
                    print_event(&event);
                    if let ConnectionEvent::StateChanged(state) = event {
                        if state.is_settled() {
                            break state;
                        }
                    }
                }
                None => break orchestrator.state(),
            },
        }
    };

    orchestrator.stop().await;
    supervisor.kill_current();
    while let Ok(event) = event_rx.try_recv() {
        if !matches!(event, ConnectionEvent::StateChanged(_)) {
            print_event(&event);
        }
    }

    match outcome {
        ConnectionState::Failed(kind) => anyhow::bail!("Connection failed: {}", kind),
        _ => Ok(()),
    }
}

/// Cancel `cancel` on Ctrl+C, or SIGTERM on unix
fn spawn_signal_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel.cancel();
    });
}
