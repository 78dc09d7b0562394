use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use log::info;

use crate::brightness::{BrightnessDriver, BrightnessLevel};

/// Driver for setups without hardware: remembers and logs each level.
#[derive(Debug, Default)]
pub struct LogDriver {
    last: AtomicU8,
    applied: AtomicUsize,
}

impl LogDriver {
    pub fn last(&self) -> BrightnessLevel {
        BrightnessLevel::new(self.last.load(Ordering::Relaxed))
    }

    pub fn applied_count(&self) -> usize {
        self.applied.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl BrightnessDriver for LogDriver {
    async fn apply(&self, level: BrightnessLevel) -> Result<()> {
        let previous = self.last.swap(level.value(), Ordering::Relaxed);
        self.applied.fetch_add(1, Ordering::Relaxed);
        if previous != level.value() {
            info!("Brightness {previous} -> {level}");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::{Level, LevelFilter, Log, Metadata, Record};
    use std::sync::Mutex;

    struct CaptureLogger(Mutex<Vec<(Level, String)>>);

    impl Log for CaptureLogger {
        fn enabled(&self, _metadata: &Metadata) -> bool {
            true
        }

        fn log(&self, record: &Record) {
            if record.level() <= log::max_level() {
                let line = record.args().to_string();
                self.0.lock().unwrap().push((record.level(), line));
            }
        }

        fn flush(&self) {}
    }

    static CAPTURE: CaptureLogger = CaptureLogger(Mutex::new(Vec::new()));

    #[tokio::test]
    async fn level_changes_are_logged_at_daemon_level() {
        // Same cap as the syslog logger installed by the binary.
        log::set_logger(&CAPTURE).unwrap();
        log::set_max_level(LevelFilter::Info);

        let driver = LogDriver::default();
        driver.apply(BrightnessLevel::new(203)).await.unwrap();

        let lines = CAPTURE.0.lock().unwrap();
        assert!(lines.contains(&(Level::Info, "Brightness 0 -> 203".to_string())));
    }

    #[tokio::test]
    async fn remembers_last_level() {
        let driver = LogDriver::default();
        driver.init().await.unwrap();
        driver.apply(BrightnessLevel::new(7)).await.unwrap();
        driver.apply(BrightnessLevel::new(9)).await.unwrap();

        assert_eq!(driver.last().value(), 9);
        assert_eq!(driver.applied_count(), 2);
    }
}
