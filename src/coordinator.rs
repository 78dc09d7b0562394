//! System coordinator for managing service lifecycle and dependency injection.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use log::{debug, error, info, warn};
use tokio::signal::unix::{SignalKind, signal};

use crate::{
    app_context::AppState,
    config::ConfigManager,
    event::{ConfigChangeType, Event, EventBus},
    providers::{
        AppStateProvider, AsyncProvider, BrightnessServiceProvider, ConfigWatcherServiceProvider,
        FadeServiceProvider, LivenessServiceProvider, ServiceProvider,
    },
    task_manager::TaskManager,
};

/// Owns the services of the daemon and reacts to signals and events.
///
/// Critical services must start; a failing non-critical service is logged
/// and skipped.
pub struct SystemCoordinator {
    task_manager: TaskManager,
    event_bus: EventBus,
    shared_state: Option<Arc<AppState>>,
    service_providers: Vec<Box<dyn ServiceProvider>>,
}

impl Default for SystemCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemCoordinator {
    pub fn new() -> Self {
        Self {
            task_manager: TaskManager::new(),
            event_bus: EventBus::new(),
            shared_state: None,
            service_providers: Vec::new(),
        }
    }

    /// Builds the application state and registers the services.
    ///
    /// Fails if the LED driver cannot be opened or initialized.
    pub async fn initialize(&mut self, config_manager: ConfigManager) -> Result<()> {
        info!("Initializing SystemCoordinator...");

        let state = AppStateProvider::new(config_manager)
            .provide()
            .await
            .context("Failed to initialize application state")?;

        self.initialize_with_state(state).await
    }

    /// Registers the services around an already built state.
    pub async fn initialize_with_state(&mut self, state: Arc<AppState>) -> Result<()> {
        self.shared_state = Some(state.clone());
        self.register_service_providers(state).await;

        info!("SystemCoordinator initialization completed");
        Ok(())
    }

    async fn register_service_providers(&mut self, state: Arc<AppState>) {
        let mut providers: Vec<Box<dyn ServiceProvider>> = vec![
            Box::new(BrightnessServiceProvider::new(
                state.clone(),
                self.event_bus.clone(),
            )),
            Box::new(FadeServiceProvider::new(
                state.clone(),
                self.event_bus.clone(),
            )),
            Box::new(LivenessServiceProvider::new(
                state.clone(),
                self.event_bus.clone(),
            )),
        ];

        if state.config().await.watch_config {
            providers.push(Box::new(ConfigWatcherServiceProvider::new(
                state.config_manager().clone(),
                self.event_bus.clone(),
            )));
        }

        providers.sort_by_key(|p| std::cmp::Reverse(p.priority()));
        self.service_providers = providers;

        info!(
            "Registered {} service providers in priority order",
            self.service_providers.len()
        );
    }

    /// Starts all registered services in priority order.
    pub async fn start_all_services(&mut self) -> Result<()> {
        info!(
            "Starting {} services in priority order...",
            self.service_providers.len()
        );

        for provider in &self.service_providers {
            let is_critical = provider.is_critical();

            match provider.start(&mut self.task_manager).await {
                Ok(()) => {
                    info!(
                        "Service '{}' started (priority: {}, critical: {})",
                        provider.name(),
                        provider.priority(),
                        is_critical
                    );
                }
                Err(e) if is_critical => {
                    if let Err(stop_error) = self.task_manager.shutdown_all().await {
                        warn!("Cleanup after failed startup: {stop_error:#}");
                    }
                    return Err(e).with_context(|| {
                        format!("Critical service '{}' failed to start", provider.name())
                    });
                }
                Err(e) => {
                    warn!(
                        "Non-critical service '{}' failed to start: {e:#}",
                        provider.name()
                    );
                }
            }
        }

        info!("All critical services started successfully");
        Ok(())
    }

    /// Waits for signals and events until the daemon must stop.
    ///
    /// SIGINT, SIGTERM and SIGQUIT stop gracefully; SIGHUP reloads the
    /// coordinates. Returns an error when a service requested the shutdown.
    pub async fn run_main_loop(&mut self) -> Result<()> {
        let mut event_rx = self.event_bus.subscribe();
        let mut sigterm = signal(SignalKind::terminate()).context("Failed to listen for SIGTERM")?;
        let mut sigquit = signal(SignalKind::quit()).context("Failed to listen for SIGQUIT")?;
        let mut sighup = signal(SignalKind::hangup()).context("Failed to listen for SIGHUP")?;
        info!("Starting main event loop");

        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    result.context("Failed to listen for SIGINT")?;
                    info!("Received SIGINT, initiating graceful shutdown...");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown...");
                    break;
                }
                _ = sigquit.recv() => {
                    info!("Received SIGQUIT, initiating graceful shutdown...");
                    break;
                }
                _ = sighup.recv() => {
                    info!("Received SIGHUP");
                    self.reload_coordinates().await;
                }
                event = event_rx.recv() => {
                    self.handle_event(event).await?;
                }
            }
        }

        self.shutdown().await;
        info!("Main event loop terminated");
        Ok(())
    }

    async fn handle_event(
        &mut self,
        event_result: Result<Event, tokio::sync::broadcast::error::RecvError>,
    ) -> Result<()> {
        match event_result {
            Ok(Event::ConfigChangeDetected(change_type)) => {
                if let ConfigChangeType::ColdRestart { changed_sections } = change_type {
                    warn!("Changes to {changed_sections:?} need a daemon restart to take effect");
                }
                self.apply_coordinates().await;
            }
            Ok(Event::SystemShutdown) => {
                info!("Processing SystemShutdown event");
                self.shutdown().await;
                return Err(anyhow!("System shutdown requested"));
            }
            Ok(Event::LivenessChanged(state)) => {
                debug!("Watched host is now {state:?}");
            }
            Ok(Event::ScheduleUpdated(schedule)) => {
                debug!("Schedule updated: {schedule:?}");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                bail!("Event bus channel closed unexpectedly");
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                warn!("Event bus lagged by {n} messages");
            }
        }
        Ok(())
    }

    /// SIGHUP path: report settings that need a restart, then swap in the
    /// coordinates.
    async fn reload_coordinates(&self) {
        let Some(state) = &self.shared_state else {
            warn!("Cannot reload config: system state not initialized");
            return;
        };
        match state.config_manager().analyze_config_changes().await {
            Ok(ConfigChangeType::ColdRestart { changed_sections }) => {
                warn!("Changes to {changed_sections:?} need a daemon restart to take effect");
            }
            Ok(ConfigChangeType::HotReload) => {}
            Err(e) => {
                error!("Keeping previous configuration: {e:#}");
                return;
            }
        }
        self.apply_coordinates().await;
    }

    async fn apply_coordinates(&self) {
        let Some(state) = &self.shared_state else {
            warn!("Cannot reload config: system state not initialized");
            return;
        };
        if let Err(e) = state.config_manager().reload_coordinates().await {
            error!("Keeping previous configuration: {e:#}");
        }
    }

    async fn shutdown(&mut self) {
        info!("Initiating graceful shutdown...");

        if let Err(e) = self.task_manager.shutdown_all().await {
            error!("Error during task shutdown: {e:#}");
        }

        info!("Shutdown complete");
    }

    pub const fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    pub fn running_services(&self) -> Vec<&'static str> {
        self.service_providers.iter().map(|p| p.name()).collect()
    }
}
