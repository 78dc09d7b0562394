use std::{
    fs::{File, OpenOptions},
    io::Write,
    os::fd::AsRawFd,
    path::Path,
};

use anyhow::{Context, Result, anyhow};

const I2C_SLAVE: u16 = 0x0703;

nix::ioctl_write_int_bad!(i2c_set_slave_address, I2C_SLAVE);

pub trait DeviceIO: Send + Sync + 'static {
    fn write(&self, buf: &[u8]) -> Result<usize>;
}

/// Linux `i2c-dev` character device bound to one slave address.
#[derive(Debug)]
pub struct I2cDevice {
    file: File,
}

impl I2cDevice {
    pub fn open(bus: &Path, address: u16) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(bus)
            .with_context(|| format!("Failed to open {}", bus.display()))?;

        // SAFETY: the descriptor is owned by `file` and stays open for the call;
        // I2C_SLAVE takes the address by value.
        unsafe { i2c_set_slave_address(file.as_raw_fd(), i32::from(address)) }
            .with_context(|| format!("Failed to select I2C address 0x{address:02x}"))?;

        Ok(Self { file })
    }
}

impl DeviceIO for I2cDevice {
    fn write(&self, buf: &[u8]) -> Result<usize> {
        (&self.file).write(buf).map_err(|e| anyhow!("{e}"))
    }
}
