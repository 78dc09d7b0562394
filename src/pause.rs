//! Liveness-gated suspension of the solar cycle.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use async_trait::async_trait;
use log::info;

use crate::{
    app_context::RunState,
    brightness::{BrightnessHandle, BrightnessLevel},
    liveness::LivenessHandler,
};

/// Wait between flipping the paused flag and starting the quick fade.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

/// Delay after each one-unit step of a quick fade (a full ramp takes ~9s).
pub const QUICK_FADE_STEP: Duration = Duration::from_millis(35);

/// Suspends the fade loop while the watched host is down.
///
/// `pause` fades the fixture to off, `resume` fades it to full. Both use the
/// fixed quick-fade step, independent of the solar transition period.
pub struct PauseController {
    run_state: Arc<RunState>,
    brightness: BrightnessHandle,
    settle_delay: Duration,
    step_delay: Duration,
}

impl PauseController {
    pub fn new(run_state: Arc<RunState>, brightness: BrightnessHandle) -> Self {
        Self {
            run_state,
            brightness,
            settle_delay: SETTLE_DELAY,
            step_delay: QUICK_FADE_STEP,
        }
    }

    pub fn with_timing(mut self, settle_delay: Duration, step_delay: Duration) -> Self {
        self.settle_delay = settle_delay;
        self.step_delay = step_delay;
        self
    }

    async fn quick_fade(&self, target: BrightnessLevel) -> Result<BrightnessLevel> {
        self.brightness
            .ramp_to(target, self.settle_delay, self.step_delay)
            .await
            .with_context(|| format!("Quick fade to {target} failed"))
    }
}

#[async_trait]
impl LivenessHandler for PauseController {
    async fn pause(&self) -> Result<()> {
        self.run_state.set_paused(true);
        info!("Pausing solar cycle");
        let level = self.quick_fade(BrightnessLevel::OFF).await?;
        info!("Paused at brightness {level}");
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.run_state.set_paused(false);
        info!("Resuming solar cycle");
        let level = self.quick_fade(BrightnessLevel::FULL).await?;
        info!("Resumed at brightness {level}");
        Ok(())
    }
}
