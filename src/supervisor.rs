//! Process lifecycle: status endpoint, topic monitor and signal handling.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::agent::{AnalysisEngine, EngineSettings};
use crate::backstage::{CatalogClient, NotificationClient};
use crate::config::Config;
use crate::fallback::NotificationFallback;
use crate::monitor::{BusError, MessageSource, MonitorHandle, MonitorStats, TopicMonitor};
use crate::providers::openai::OpenAiProvider;
use crate::server::{self, KafkaStatus, StatusState};
use crate::tools::BackstageTools;

/// Wire the production engine: OpenAI-compatible provider, Backstage tools
/// and fallback.
///
/// # Errors
///
/// Returns an error if an HTTP client cannot be built.
pub fn build_engine(config: &Config) -> Result<AnalysisEngine> {
    let provider =
        OpenAiProvider::new(&config.model).context("failed to create inference client")?;
    let catalog =
        CatalogClient::new(&config.backstage).context("failed to create catalog client")?;
    let notifier = Arc::new(
        NotificationClient::new(&config.backstage)
            .context("failed to create notification client")?,
    );

    let tools = BackstageTools::new(Arc::new(catalog), notifier.clone());
    let fallback = NotificationFallback::new(notifier);

    info!(
        model = %config.model.name,
        endpoint = %provider.endpoint(),
        tool_mode = config.model.tool_mode.as_str(),
        native_tool_calling = config.model.native_tool_calling,
        max_iterations = config.model.max_iterations,
        "analysis engine ready"
    );

    Ok(AnalysisEngine::new(
        Arc::new(provider),
        Arc::new(tools),
        fallback,
        EngineSettings::from_config(config),
    ))
}

/// Owns the running flag and the stop signals of every component.
pub struct ServiceSupervisor {
    config: Arc<Config>,
    engine: AnalysisEngine,
    running: Arc<AtomicBool>,
    shutdown_tx: watch::Sender<bool>,
    monitor: Mutex<Option<MonitorHandle>>,
}

impl std::fmt::Debug for ServiceSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceSupervisor")
            .field("service", &self.config.service.name)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl ServiceSupervisor {
    /// Create a supervisor in the running state.
    pub fn new(config: Arc<Config>, engine: AnalysisEngine) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            config,
            engine,
            running: Arc::new(AtomicBool::new(true)),
            shutdown_tx,
            monitor: Mutex::new(None),
        }
    }

    /// Status routes bound to this supervisor's running flag.
    pub fn router(&self) -> Router {
        server::router(StatusState::new(
            Arc::clone(&self.running),
            self.config.service.name.clone(),
            self.engine.status(),
            KafkaStatus::from(&self.config.kafka),
        ))
    }

    /// Whether [`stop`](Self::stop) has not been called yet.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the topic monitor on `source`, dispatching to the engine.
    pub fn start_monitor<S>(&self, source: S) -> JoinHandle<Result<MonitorStats, BusError>>
    where
        S: MessageSource + 'static,
    {
        let (monitor, handle) = TopicMonitor::new(
            source,
            self.config.kafka.monitored_topic.clone(),
            Arc::new(self.engine.clone()),
        );
        if !self.is_running() {
            handle.stop();
        }
        if let Ok(mut slot) = self.monitor.lock() {
            *slot = Some(handle);
        }
        tokio::spawn(monitor.start_monitoring())
    }

    /// Serve the status routes on `listener` until [`stop`](Self::stop).
    pub fn serve_status(&self, listener: TcpListener) -> JoinHandle<std::io::Result<()>> {
        let app = self.router();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            axum::serve(listener, app)
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.wait_for(|stopped| *stopped).await;
                })
                .await
        })
    }

    /// Mark the service stopped, stop the monitor and shut the status
    /// server down. Idempotent.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("stopping service");
        }
        if let Ok(slot) = self.monitor.lock() {
            if let Some(handle) = slot.as_ref() {
                handle.stop();
            }
        }
        self.shutdown_tx.send_replace(true);
    }

    /// Run until SIGINT/SIGTERM or the monitor ends.
    ///
    /// # Errors
    ///
    /// Returns an error if the status endpoint cannot bind, or if monitoring
    /// ended on a fatal bus error.
    pub async fn run<S>(&self, source: S) -> Result<MonitorStats>
    where
        S: MessageSource + 'static,
    {
        let addr: SocketAddr = self.config.health.socket_addr()?;
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind status endpoint on {addr}"))?;
        info!(%addr, "status endpoint listening");

        let server = self.serve_status(listener);
        let mut monitor = self.start_monitor(source);

        let joined = tokio::select! {
            joined = &mut monitor => joined,
            () = shutdown_signal() => {
                info!("received shutdown signal, initiating graceful shutdown");
                self.stop();
                monitor.await
            }
        };
        self.stop();

        match server.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "status endpoint failed"),
            Err(e) => warn!(error = %e, "status endpoint task failed"),
        }

        match joined {
            Ok(Ok(stats)) => {
                info!("service shut down cleanly");
                Ok(stats)
            }
            Ok(Err(e)) => {
                error!(error = %e, "monitoring ended on a fatal bus error");
                Err(anyhow::Error::new(e).context("message monitoring failed"))
            }
            Err(e) => Err(anyhow::anyhow!("monitor task failed: {e}")),
        }
    }
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
