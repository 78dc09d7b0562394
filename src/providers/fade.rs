use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use log::{debug, info};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::{
    app_context::AppState,
    event::{Event, EventBus},
    providers::traits::ServiceProvider,
    scheduler::{FadeSchedule, TransitionScheduler, format_instant},
    task_manager::TaskManager,
};

/// Solar fade service provider.
///
/// Owns the main loop: every tick it asks the [`TransitionScheduler`] for the
/// levels due at the current wall-clock time and queues them on the brightness
/// service. Ticks are skipped while the solar cycle is paused.
///
/// # Priority and Criticality
///
/// - **Priority**: 10
/// - **Critical**: Yes
pub struct FadeServiceProvider {
    state: Arc<AppState>,
    event_bus: EventBus,
}

impl FadeServiceProvider {
    pub fn new(state: Arc<AppState>, event_bus: EventBus) -> Self {
        Self { state, event_bus }
    }
}

#[async_trait]
impl ServiceProvider for FadeServiceProvider {
    async fn start(&self, task_manager: &mut TaskManager) -> Result<()> {
        let coordinates = self.state.coordinates().await;
        let scheduler = TransitionScheduler::new(
            self.state.transition,
            self.state.solar_clock.clone(),
            Utc::now(),
            coordinates,
        );

        let period = scheduler.period();
        info!(
            "Transition: {}s, tick every {:?}",
            period.as_secs(),
            period.tick_interval()
        );
        info!(
            "Latitude: {:.6}, Longitude: {:.6}",
            coordinates.latitude, coordinates.longitude
        );
        log_schedule(scheduler.schedule());

        let state = self.state.clone();
        let event_bus = self.event_bus.clone();
        task_manager
            .spawn_task(self.name().to_string(), |cancel_token| async move {
                run_fade_service(state, scheduler, event_bus, cancel_token).await
            })
            .await
    }

    fn name(&self) -> &'static str {
        "FadeService"
    }

    fn priority(&self) -> i32 {
        10
    }

    fn is_critical(&self) -> bool {
        true
    }
}

fn log_schedule(schedule: FadeSchedule) {
    info!("Next fade in at {}", format_instant(schedule.fade_in));
    info!("Next fade out at {}", format_instant(schedule.fade_out));
}

async fn run_fade_service(
    state: Arc<AppState>,
    mut scheduler: TransitionScheduler,
    event_bus: EventBus,
    cancel_token: CancellationToken,
) -> Result<()> {
    let mut interval = tokio::time::interval(scheduler.period().tick_interval());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel_token.cancelled() => {
                info!("Fade service cancelled");
                break;
            }
            _instant = interval.tick() => {
                if state.run_state.is_paused() {
                    continue;
                }
                run_tick(&state, &mut scheduler, &event_bus).await?;
            }
        }
    }
    Ok(())
}

async fn run_tick(
    state: &AppState,
    scheduler: &mut TransitionScheduler,
    event_bus: &EventBus,
) -> Result<()> {
    let coordinates = state.coordinates().await;
    let outcome = scheduler.tick(Utc::now(), coordinates);

    for level in &outcome.levels {
        state
            .brightness
            .set(*level)
            .await
            .context("Fade tick could not reach the brightness service")?;
    }

    if let Some(fade_in) = outcome.fade_in_rescheduled {
        info!("Fade in complete, next at {}", format_instant(fade_in));
    }
    if let Some(fade_out) = outcome.fade_out_rescheduled {
        info!("Fade out complete, next at {}", format_instant(fade_out));
    }
    if outcome.rescheduled() {
        if let Err(e) = event_bus.publish(Event::ScheduleUpdated(scheduler.schedule())) {
            debug!("No subscribers for schedule update: {e}");
        }
    }
    Ok(())
}
