use anyhow::{Result, anyhow};
use async_trait::async_trait;
use log::error;
use std::sync::Arc;

use crate::{
    app_context::AppState,
    event::{Event, EventBus},
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

/// Runs the single owner of the LED brightness.
///
/// # Priority and Criticality
///
/// - **Priority**: 20 (highest; every other service sends it commands)
/// - **Critical**: Yes
///
/// When the worker gives up on the driver it publishes
/// [`Event::SystemShutdown`] so the coordinator stops the daemon.
pub struct BrightnessServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
}

impl BrightnessServiceProvider {
    pub fn new(state: Arc<AppState>, event_bus: EventBus) -> Self {
        Self { state, event_bus }
    }
}

#[async_trait]
impl ServiceProvider for BrightnessServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let worker = self
            .state
            .take_brightness_worker()
            .await
            .ok_or_else(|| anyhow!("Brightness worker already started"))?;
        let event_bus = self.event_bus.clone();

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                let result = worker.run(cancel_token).await;
                if let Err(e) = &result {
                    error!("Brightness service stopped: {e:#}");
                    if let Err(e) = event_bus.publish(Event::SystemShutdown) {
                        error!("Failed to request shutdown: {e}");
                    }
                }
                result
            })
            .await
    }

    fn name(&self) -> &'static str {
        "BrightnessService"
    }

    fn priority(&self) -> i32 {
        20
    }

    fn is_critical(&self) -> bool {
        true
    }
}
