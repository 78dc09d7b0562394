//! Application state and global context management.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use anyhow::{Context, Result};
use log::{info, warn};
use tokio::sync::Mutex;

use crate::{
    brightness::{self, BrightnessDriver, BrightnessHandle, BrightnessLevel, BrightnessWorker},
    config::{Config, ConfigManager},
    drivers,
    liveness::{LivenessProbe, PingProbe},
    scheduler::TransitionPeriod,
    solar::{Coordinates, SolarClock, SunriseClock},
};

/// Transitions longer than this make the two daily fades overlap at most
/// latitudes for part of the year.
const LONG_TRANSITION_SECS: u32 = 12 * 3600;

/// Flags shared between the fade loop and the pause controller.
#[derive(Debug, Default)]
pub struct RunState {
    paused: AtomicBool,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, the fade loop skips its brightness computation.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::SeqCst);
    }
}

/// Shared application state containing all runtime data.
///
/// Everything read only at startup (transition, ping host, driver) is fixed
/// here; the coordinates stay behind the config manager so a reload is seen
/// by the next tick.
pub struct AppState {
    /// Configuration manager for centralized config handling
    pub config_manager: Arc<ConfigManager>,
    /// Solar fade length
    pub transition: TransitionPeriod,
    /// Host gating the solar cycle, empty when disabled
    pub ping_host: String,
    /// Sender side of the brightness owner
    pub brightness: BrightnessHandle,
    /// Receiver side, taken once by the brightness service
    brightness_worker: Mutex<Option<BrightnessWorker>>,
    /// Paused flag
    pub run_state: Arc<RunState>,
    pub solar_clock: Arc<dyn SolarClock>,
    pub liveness_probe: Arc<dyn LivenessProbe>,
}

impl AppState {
    /// Creates the state with the hardware driver named in the configuration.
    pub async fn new(config_manager: ConfigManager) -> Result<Self> {
        let driver_cfg = config_manager.get().await.driver.clone();
        let driver = drivers::open(&driver_cfg)?;
        Self::with_parts(
            config_manager,
            driver,
            Arc::new(SunriseClock),
            Arc::new(PingProbe::default()),
        )
        .await
    }

    /// Creates the state from explicit collaborators.
    ///
    /// The driver is initialized and switched off before anything else runs.
    pub async fn with_parts(
        config_manager: ConfigManager,
        driver: Box<dyn BrightnessDriver>,
        solar_clock: Arc<dyn SolarClock>,
        liveness_probe: Arc<dyn LivenessProbe>,
    ) -> Result<Self> {
        let config = config_manager.clone_config().await;
        let transition = config.transition_period()?;
        if transition.as_secs() > LONG_TRANSITION_SECS {
            warn!(
                "Transition of {}s is longer than 12h; fade-in and fade-out may overlap",
                transition.as_secs()
            );
        }

        driver.init().await.context("Failed to initialize LED driver")?;
        driver
            .apply(BrightnessLevel::OFF)
            .await
            .context("Failed to switch LEDs off")?;
        info!("LED driver ready: {:?}", config.driver);

        let (brightness, worker) = brightness::channel(driver, BrightnessLevel::OFF);

        Ok(Self {
            config_manager: Arc::new(config_manager),
            transition,
            ping_host: config.ping_host,
            brightness,
            brightness_worker: Mutex::new(Some(worker)),
            run_state: Arc::new(RunState::new()),
            solar_clock,
            liveness_probe,
        })
    }

    /// Gets a read-only reference to the current configuration.
    pub async fn config(&self) -> tokio::sync::RwLockReadGuard<'_, Config> {
        self.config_manager.get().await
    }

    pub fn config_manager(&self) -> &Arc<ConfigManager> {
        &self.config_manager
    }

    /// Coordinates as of now; changes after a reload.
    pub async fn coordinates(&self) -> Coordinates {
        self.config_manager.coordinates().await
    }

    /// Hands the brightness worker to its service. Returns `None` once taken.
    pub async fn take_brightness_worker(&self) -> Option<BrightnessWorker> {
        self.brightness_worker.lock().await.take()
    }
}
