use anyhow::{Context, Result};
use async_trait::async_trait;
use log::{debug, error, info, warn};
use notify::{Event, EventHandler, RecursiveMode, Watcher, recommended_watcher};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::{
    config::ConfigManager,
    event::{Event as AppEvent, EventBus},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

/// Quiet period after the last filesystem event before the file is re-read.
const DEBOUNCE: Duration = Duration::from_millis(2000);

/// Configuration file monitoring service provider.
///
/// Watches the directory holding the config file and publishes
/// [`AppEvent::ConfigChangeDetected`] once writes settle. The coordinator
/// decides what to reload.
///
/// # Priority and Criticality
///
/// - **Priority**: 2 (lowest)
/// - **Critical**: No; without it, SIGHUP still reloads coordinates
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use glow_ambientd::providers::ConfigWatcherServiceProvider;
/// use glow_ambientd::event::EventBus;
/// use glow_ambientd::config::ConfigManager;
///
/// # async fn example(config_manager: Arc<ConfigManager>) -> anyhow::Result<()> {
/// let event_bus = EventBus::new();
/// let provider = ConfigWatcherServiceProvider::new(config_manager, event_bus);
/// # Ok(())
/// # }
/// ```
pub struct ConfigWatcherServiceProvider {
    config_manager: Arc<ConfigManager>,
    event_bus: EventBus,
    debounce: Duration,
}

impl ConfigWatcherServiceProvider {
    pub fn new(config_manager: Arc<ConfigManager>, event_bus: EventBus) -> Self {
        Self {
            config_manager,
            event_bus,
            debounce: DEBOUNCE,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }
}

#[async_trait]
impl ServiceProvider for ConfigWatcherServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let config_manager = self.config_manager.clone();
        let event_bus = self.event_bus.clone();
        let debounce = self.debounce;

        task_manager
            .spawn_task(self.name().to_string(), move |cancel_token| async move {
                run_config_watcher_service(config_manager, event_bus, debounce, cancel_token)
                    .await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "ConfigWatcherService"
    }

    fn priority(&self) -> i32 {
        2
    }

    fn is_critical(&self) -> bool {
        false
    }
}

/// Forwards notify callbacks into the async task.
#[derive(Debug)]
struct ChannelEventHandler {
    sender: mpsc::UnboundedSender<notify::Result<Event>>,
}

impl EventHandler for ChannelEventHandler {
    fn handle_event(&mut self, event: notify::Result<Event>) {
        if let Err(e) = self.sender.send(event) {
            error!("Failed to forward filesystem event: {e}");
        }
    }
}

fn touches_config(event: &Event, config_path: &Path) -> bool {
    let names_config = event
        .paths
        .iter()
        .any(|path| path == config_path || path.file_name() == config_path.file_name());
    names_config && (event.kind.is_modify() || event.kind.is_create())
}

async fn run_config_watcher_service(
    config_manager: Arc<ConfigManager>,
    event_bus: EventBus,
    debounce: Duration,
    cancel_token: CancellationToken,
) -> Result<()> {
    let config_path = config_manager.path().to_path_buf();
    let watch_path = config_path
        .parent()
        .map_or_else(|| config_path.clone(), Path::to_path_buf);

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut watcher = recommended_watcher(ChannelEventHandler { sender: event_tx })
        .context("Failed to create filesystem watcher")?;
    watcher
        .watch(&watch_path, RecursiveMode::NonRecursive)
        .with_context(|| format!("Failed to watch {}", watch_path.display()))?;
    info!("Watching {} for changes", config_path.display());

    let mut pending = false;
    let settle = tokio::time::sleep(debounce);
    tokio::pin!(settle);

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Config watcher service cancelled");
                break;
            }

            event_result = event_rx.recv() => {
                match event_result {
                    Some(Ok(event)) => {
                        if touches_config(&event, &config_path) {
                            debug!("Config file event: {:?}", event.kind);
                            pending = true;
                            settle.as_mut().reset(tokio::time::Instant::now() + debounce);
                        }
                    }
                    Some(Err(e)) => warn!("Filesystem watcher error: {e}"),
                    None => {
                        warn!("Filesystem event channel closed, exiting");
                        break;
                    }
                }
            }

            () = &mut settle, if pending => {
                pending = false;
                if !config_path.exists() {
                    warn!("Configuration file {} no longer exists", config_path.display());
                    continue;
                }

                match config_manager.analyze_config_changes().await {
                    Ok(change_type) => {
                        info!("Configuration file changed: {change_type:?}");
                        if let Err(e) = event_bus.publish(AppEvent::ConfigChangeDetected(change_type)) {
                            error!("Failed to publish config change event: {e}");
                        }
                    }
                    Err(e) => error!("Ignoring config change: {e:#}"),
                }
            }
        }
    }

    if let Err(e) = watcher.unwatch(&watch_path) {
        warn!("Failed to unwatch path during cleanup: {e}");
    }

    info!("Config watcher service stopped");
    Ok(())
}
