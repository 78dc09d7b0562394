use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;
use std::sync::Arc;

use crate::{
    app_context::AppState,
    event::EventBus,
    liveness::{LivenessMonitor, resolve_target},
    pause::PauseController,
    providers::traits::ServiceProvider,
    task_manager::TaskManager,
};

/// Watched-host liveness service provider.
///
/// Resolves the configured ping host once. Without a usable address the
/// service starts nothing and the solar cycle is never paused.
///
/// # Priority and Criticality
///
/// - **Priority**: 5
/// - **Critical**: Yes; a probe that cannot run at all aborts startup
pub struct LivenessServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
}

impl LivenessServiceProvider {
    pub fn new(state: Arc<AppState>, event_bus: EventBus) -> Self {
        Self { state, event_bus }
    }
}

#[async_trait]
impl ServiceProvider for LivenessServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let probe = self.state.liveness_probe.clone();
        let Some(target) = resolve_target(&self.state.ping_host, probe.as_ref())
            .await
            .context("Liveness setup failed")?
        else {
            info!("Liveness gating disabled");
            return Ok(());
        };

        let handler = Arc::new(PauseController::new(
            self.state.run_state.clone(),
            self.state.brightness.clone(),
        ));
        let monitor = LivenessMonitor::new(target, probe, handler, self.event_bus.clone());

        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                monitor.run(cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "LivenessService"
    }

    fn priority(&self) -> i32 {
        5
    }

    fn is_critical(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::test_support::{self, StaticProbe};
    use std::net::{IpAddr, Ipv4Addr};

    const ADDR: IpAddr = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10));

    #[tokio::test]
    async fn empty_host_disables_gating() {
        let state = test_support::app_state_with_log_driver("").await;
        let mut task_manager = TaskManager::new();

        LivenessServiceProvider::new(state, EventBus::new())
            .start(&mut task_manager)
            .await
            .unwrap();

        assert_eq!(task_manager.active_count(), 0);
    }

    #[tokio::test]
    async fn unresolvable_host_disables_gating() {
        let state = test_support::app_state_with_probe(
            "nas.invalid",
            StaticProbe {
                addr: None,
                check_ok: true,
                reply: true,
            },
        )
        .await;
        let mut task_manager = TaskManager::new();

        LivenessServiceProvider::new(state, EventBus::new())
            .start(&mut task_manager)
            .await
            .unwrap();

        assert_eq!(task_manager.active_count(), 0);
    }

    #[tokio::test]
    async fn failed_self_check_is_fatal() {
        let state = test_support::app_state_with_probe(
            "nas.local",
            StaticProbe {
                addr: Some(ADDR),
                check_ok: false,
                reply: true,
            },
        )
        .await;
        let mut task_manager = TaskManager::new();

        let result = LivenessServiceProvider::new(state, EventBus::new())
            .start(&mut task_manager)
            .await;

        assert!(result.is_err());
        assert_eq!(task_manager.active_count(), 0);
    }

    #[tokio::test]
    async fn resolved_host_starts_monitor() {
        let state = test_support::app_state_with_probe(
            "nas.local",
            StaticProbe {
                addr: Some(ADDR),
                check_ok: true,
                reply: true,
            },
        )
        .await;
        let mut task_manager = TaskManager::new();

        LivenessServiceProvider::new(state.clone(), EventBus::new())
            .start(&mut task_manager)
            .await
            .unwrap();

        assert!(task_manager.is_running("LivenessService"));
        assert!(!state.run_state.is_paused());
        task_manager.shutdown_all().await.unwrap();
    }
}
