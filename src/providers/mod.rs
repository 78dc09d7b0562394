//! Dependency injection providers for service management.
//!
//! Each long-running activity of the daemon is started by one provider; the
//! coordinator starts them in priority order.

pub mod app_state;
pub mod brightness;
pub mod config_watcher;
pub mod fade;
pub mod liveness;
pub mod traits;

pub use app_state::AppStateProvider;
pub use brightness::BrightnessServiceProvider;
pub use config_watcher::ConfigWatcherServiceProvider;
pub use fade::FadeServiceProvider;
pub use liveness::LivenessServiceProvider;
pub use traits::{AsyncProvider, ServiceProvider};
