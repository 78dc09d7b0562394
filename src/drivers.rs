//! LED fixture drivers.

pub mod log_driver;
pub mod piglow;

use anyhow::{Context, Result};

use crate::{brightness::BrightnessDriver, config::DriverCfg};

/// Opens the driver selected in the configuration.
pub fn open(cfg: &DriverCfg) -> Result<Box<dyn BrightnessDriver>> {
    match cfg {
        DriverCfg::Piglow { bus, address } => {
            let glow = piglow::PiGlow::open(bus, *address).with_context(|| {
                format!("Could not open PiGlow at {} (0x{address:02x})", bus.display())
            })?;
            Ok(Box::new(glow))
        }
        DriverCfg::Log => Ok(Box::new(log_driver::LogDriver::default())),
    }
}
