mod device_io;
pub mod protocol;

use std::{fmt, path::Path};

use anyhow::{Result, bail};
use async_trait::async_trait;
use log::info;

use crate::brightness::{BrightnessDriver, BrightnessLevel};

pub use device_io::{DeviceIO, I2cDevice};
use protocol::Command;

/// PiGlow board: 18 LEDs driven together at one brightness.
#[derive(Debug)]
pub struct PiGlow<Io: DeviceIO> {
    dev: Io,
}

impl PiGlow<I2cDevice> {
    pub fn open(bus: &Path, address: u16) -> Result<Self> {
        Ok(Self::new(I2cDevice::open(bus, address)?))
    }
}

impl<Io: DeviceIO> PiGlow<Io> {
    pub fn new(dev: Io) -> Self {
        Self { dev }
    }

    fn send(&self, cmd: Command) -> Result<()> {
        let pkt = cmd.to_bytes();
        let written = self.dev.write(&pkt)?;
        if written != pkt.len() {
            bail!("Short I2C write for {cmd:?}: {written} of {} bytes", pkt.len());
        }
        Ok(())
    }
}

#[async_trait]
impl<Io: DeviceIO + fmt::Debug> BrightnessDriver for PiGlow<Io> {
    async fn init(&self) -> Result<()> {
        info!("Initializing PiGlow");
        self.send(Command::Reset)?;
        self.send(Command::EnableOutput)?;
        self.send(Command::EnableLeds)?;
        self.send(Command::Update)
    }

    async fn apply(&self, level: BrightnessLevel) -> Result<()> {
        self.send(Command::SetAll(level.value()))?;
        self.send(Command::Update)
    }
}
