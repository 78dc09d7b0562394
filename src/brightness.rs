//! Brightness levels, the hardware driver seam, and the single brightness owner.
//!
//! Every brightness change in the daemon goes through a [`BrightnessHandle`].
//! The matching [`BrightnessWorker`] is the only code that talks to the
//! [`BrightnessDriver`], so solar fades and pause/resume ramps are serialized
//! instead of racing on the current level.

use std::{fmt, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use log::{debug, error, warn};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// Consecutive driver failures after which the hardware is considered lost.
pub const MAX_CONSECUTIVE_DRIVER_FAILURES: u32 = 10;

const COMMAND_CHANNEL_SIZE: usize = 64;

/// Brightness applied to every LED of the fixture (0 = off, 255 = full).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct BrightnessLevel(u8);

impl BrightnessLevel {
    pub const OFF: Self = Self(0);
    pub const FULL: Self = Self(u8::MAX);

    pub const fn new(value: u8) -> Self {
        Self(value)
    }

    /// Builds a level from an unbounded value, clamping it into 0..=255.
    pub fn clamped(value: i64) -> Self {
        Self(value.clamp(0, i64::from(u8::MAX)) as u8)
    }

    pub const fn value(self) -> u8 {
        self.0
    }

    /// One unit closer to `target`, or `self` when already there.
    fn step_towards(self, target: Self) -> Self {
        match self.0.cmp(&target.0) {
            std::cmp::Ordering::Less => Self(self.0 + 1),
            std::cmp::Ordering::Greater => Self(self.0 - 1),
            std::cmp::Ordering::Equal => self,
        }
    }
}

impl From<u8> for BrightnessLevel {
    fn from(value: u8) -> Self {
        Self(value)
    }
}

impl fmt::Display for BrightnessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Trait for LED fixture hardware.
///
/// # Example
///
/// ```no_run
/// use glow_ambientd::brightness::{BrightnessDriver, BrightnessLevel};
/// use anyhow::Result;
///
/// #[derive(Debug)]
/// struct Console;
///
/// #[async_trait::async_trait]
/// impl BrightnessDriver for Console {
///     async fn apply(&self, level: BrightnessLevel) -> Result<()> {
///         println!("brightness -> {level}");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait BrightnessDriver: Send + Sync + fmt::Debug {
    /// Prepares the hardware. Called once before the first [`apply`](Self::apply).
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    /// Applies `level` to the whole fixture.
    async fn apply(&self, level: BrightnessLevel) -> Result<()>;
}

/// Commands accepted by the brightness owner.
#[derive(Debug)]
pub enum BrightnessCommand {
    /// Apply a level immediately.
    Set(BrightnessLevel),
    /// Wait `settle`, then step one unit at a time towards `target`, sleeping
    /// `step_delay` after each step. `done` receives the level reached.
    RampTo {
        target: BrightnessLevel,
        settle: Duration,
        step_delay: Duration,
        done: oneshot::Sender<BrightnessLevel>,
    },
    /// Report the last applied level.
    Current(oneshot::Sender<BrightnessLevel>),
}

/// Cloneable sender side of the brightness owner.
#[derive(Debug, Clone)]
pub struct BrightnessHandle {
    tx: mpsc::Sender<BrightnessCommand>,
}

impl BrightnessHandle {
    /// Queues an immediate level change.
    pub async fn set(&self, level: BrightnessLevel) -> Result<()> {
        self.send(BrightnessCommand::Set(level)).await
    }

    /// Ramps to `target` after `settle` and waits until the ramp has finished.
    ///
    /// The command is queued before the settle delay starts, so a ramp
    /// requested before shutdown is still carried out.
    pub async fn ramp_to(
        &self,
        target: BrightnessLevel,
        settle: Duration,
        step_delay: Duration,
    ) -> Result<BrightnessLevel> {
        let (done, reached) = oneshot::channel();
        self.send(BrightnessCommand::RampTo {
            target,
            settle,
            step_delay,
            done,
        })
        .await?;
        reached
            .await
            .context("Brightness ramp aborted before completion")
    }

    /// Returns the last level the driver accepted.
    pub async fn current(&self) -> Result<BrightnessLevel> {
        let (reply, level) = oneshot::channel();
        self.send(BrightnessCommand::Current(reply)).await?;
        level.await.context("Brightness service dropped the request")
    }

    async fn send(&self, command: BrightnessCommand) -> Result<()> {
        self.tx
            .send(command)
            .await
            .map_err(|_| anyhow!("Brightness service is not running"))
    }
}

/// Receiver side of the brightness owner. Owns the driver and `currentPower`.
#[derive(Debug)]
pub struct BrightnessWorker {
    rx: mpsc::Receiver<BrightnessCommand>,
    driver: Box<dyn BrightnessDriver>,
    current: BrightnessLevel,
    consecutive_failures: u32,
}

/// Creates a connected handle/worker pair.
///
/// `initial` is the level the driver currently shows.
pub fn channel(
    driver: Box<dyn BrightnessDriver>,
    initial: BrightnessLevel,
) -> (BrightnessHandle, BrightnessWorker) {
    let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
    (
        BrightnessHandle { tx },
        BrightnessWorker {
            rx,
            driver,
            current: initial,
            consecutive_failures: 0,
        },
    )
}

impl BrightnessWorker {
    /// Processes commands until cancelled or every handle is dropped.
    ///
    /// Cancellation is only observed between commands. On cancel the queue is
    /// closed and the commands already in it are still carried out, so a
    /// ramp that was requested always runs to its target.
    pub async fn run(mut self, cancel_token: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    debug!("Brightness worker cancelled at level {}", self.current);
                    self.drain().await?;
                    break;
                }
                command = self.rx.recv() => {
                    let Some(command) = command else {
                        debug!("All brightness handles dropped");
                        break;
                    };
                    self.handle(command).await?;
                }
            }
        }
        Ok(())
    }

    async fn drain(&mut self) -> Result<()> {
        self.rx.close();
        while let Some(command) = self.rx.recv().await {
            self.handle(command).await?;
        }
        Ok(())
    }

    async fn handle(&mut self, command: BrightnessCommand) -> Result<()> {
        match command {
            BrightnessCommand::Set(level) => self.apply(level).await,
            BrightnessCommand::RampTo {
                target,
                settle,
                step_delay,
                done,
            } => {
                tokio::time::sleep(settle).await;
                self.ramp(target, step_delay).await?;
                let _ = done.send(self.current);
                Ok(())
            }
            BrightnessCommand::Current(reply) => {
                let _ = reply.send(self.current);
                Ok(())
            }
        }
    }

    async fn ramp(&mut self, target: BrightnessLevel, step_delay: Duration) -> Result<()> {
        let mut level = self.current;
        while level != target {
            level = level.step_towards(target);
            self.apply(level).await?;
            tokio::time::sleep(step_delay).await;
        }
        Ok(())
    }

    /// Applies one level. Single failures are logged and skipped; a run of
    /// [`MAX_CONSECUTIVE_DRIVER_FAILURES`] is fatal.
    async fn apply(&mut self, level: BrightnessLevel) -> Result<()> {
        match self.driver.apply(level).await {
            Ok(()) => {
                self.current = level;
                self.consecutive_failures = 0;
                Ok(())
            }
            Err(e) => {
                self.consecutive_failures += 1;
                if self.consecutive_failures >= MAX_CONSECUTIVE_DRIVER_FAILURES {
                    error!("Brightness driver failed {} times in a row", self.consecutive_failures);
                    bail!("Brightness driver lost: {e}");
                }
                warn!(
                    "Failed to apply brightness {level} ({}/{}): {e}",
                    self.consecutive_failures, MAX_CONSECUTIVE_DRIVER_FAILURES
                );
                Ok(())
            }
        }
    }
}
