//! Reachability tracking for the watched host.
//!
//! Each probe round yields a [`RoundOutcome`]; [`transition`] folds it into the
//! current [`LivenessState`] and says whether the solar cycle must be paused or
//! resumed. No network I/O happens outside the [`LivenessProbe`] seam.

use std::{net::IpAddr, process::Stdio, sync::Arc, time::Duration};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use log::{debug, info, warn};
use tokio::{process::Command, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::event::{Event, EventBus};

/// Time between the start of two probe rounds.
pub const ROUND_INTERVAL: Duration = Duration::from_secs(60);

/// How long a round waits for an echo reply.
pub const REPLY_WINDOW: Duration = Duration::from_secs(1);

/// Extra time granted to the probe process on top of the reply window.
const PROBE_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LivenessState {
    #[default]
    Unknown,
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundOutcome {
    Reply,
    NoReply,
}

impl From<bool> for RoundOutcome {
    fn from(got_reply: bool) -> Self {
        if got_reply { Self::Reply } else { Self::NoReply }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LivenessAction {
    Pause,
    Resume,
}

/// Next state after a round, plus the action owed to the pause controller.
///
/// Only Down→Up resumes; Up→Down and Unknown→Down pause. Repeating the same
/// state never produces an action.
pub fn transition(
    previous: LivenessState,
    outcome: RoundOutcome,
) -> (LivenessState, Option<LivenessAction>) {
    match (previous, outcome) {
        (LivenessState::Down, RoundOutcome::Reply) => {
            (LivenessState::Up, Some(LivenessAction::Resume))
        }
        (_, RoundOutcome::Reply) => (LivenessState::Up, None),
        (LivenessState::Up | LivenessState::Unknown, RoundOutcome::NoReply) => {
            (LivenessState::Down, Some(LivenessAction::Pause))
        }
        (LivenessState::Down, RoundOutcome::NoReply) => (LivenessState::Down, None),
    }
}

/// Echo probe used by the monitor.
#[async_trait]
pub trait LivenessProbe: Send + Sync {
    /// Verifies the probe mechanism works at all.
    async fn check(&self) -> Result<()>;

    /// Resolves `host` to one address. `Ok(None)` when it has no address.
    async fn resolve(&self, host: &str) -> Result<Option<IpAddr>>;

    /// Sends one echo request and reports whether a reply arrived in `window`.
    async fn probe(&self, addr: IpAddr, window: Duration) -> Result<bool>;
}

/// Receiver of liveness transitions.
#[async_trait]
pub trait LivenessHandler: Send + Sync {
    async fn pause(&self) -> Result<()>;
    async fn resume(&self) -> Result<()>;
}

/// [`LivenessProbe`] running the system `ping` binary.
#[derive(Debug, Clone)]
pub struct PingProbe {
    program: String,
}

impl Default for PingProbe {
    fn default() -> Self {
        Self::new("ping")
    }
}

impl PingProbe {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    async fn ping(&self, addr: IpAddr, window: Duration) -> Result<Option<i32>> {
        let wait_secs = window.as_secs().max(1);
        let status = tokio::time::timeout(
            window + PROBE_GRACE,
            Command::new(&self.program)
                .arg("-c")
                .arg("1")
                .arg("-W")
                .arg(wait_secs.to_string())
                .arg(addr.to_string())
                .stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status(),
        )
        .await
        .with_context(|| format!("{} {addr} timed out", self.program))?
        .with_context(|| format!("Failed to run {}", self.program))?;

        Ok(status.code())
    }
}

#[async_trait]
impl LivenessProbe for PingProbe {
    async fn check(&self) -> Result<()> {
        let loopback = IpAddr::from([127, 0, 0, 1]);
        match self.ping(loopback, REPLY_WINDOW).await? {
            Some(0) => Ok(()),
            code => bail!("{} cannot reach the loopback address (exit {code:?})", self.program),
        }
    }

    async fn resolve(&self, host: &str) -> Result<Option<IpAddr>> {
        if let Ok(addr) = host.parse::<IpAddr>() {
            return Ok(Some(addr));
        }

        let addrs: Vec<IpAddr> = tokio::net::lookup_host((host, 0))
            .await
            .with_context(|| format!("Failed to resolve {host}"))?
            .map(|socket| socket.ip())
            .collect();

        Ok(addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| addrs.first())
            .copied())
    }

    async fn probe(&self, addr: IpAddr, window: Duration) -> Result<bool> {
        match self.ping(addr, window).await? {
            Some(0) => Ok(true),
            Some(1) => Ok(false),
            code => bail!("{} {addr} failed (exit {code:?})", self.program),
        }
    }
}

/// Resolves the watched host once at startup.
///
/// Returns `Ok(None)` when liveness gating is disabled: no host configured, no
/// address, or a resolver error. A failing probe self-check is an error.
pub async fn resolve_target(host: &str, probe: &dyn LivenessProbe) -> Result<Option<IpAddr>> {
    let host = host.trim();
    if host.is_empty() {
        info!("No ping host configured, disabling liveness check");
        return Ok(None);
    }

    let addr = match probe.resolve(host).await {
        Ok(Some(addr)) => addr,
        Ok(None) => {
            warn!("Ping host {host} has no address, disabling liveness check");
            return Ok(None);
        }
        Err(e) => {
            warn!("{e:#}, disabling liveness check");
            return Ok(None);
        }
    };

    probe
        .check()
        .await
        .context("Liveness probe cannot send echo requests")?;

    info!("Watching liveness of {host} ({addr})");
    Ok(Some(addr))
}

/// Periodically probes one address and drives a [`LivenessHandler`].
pub struct LivenessMonitor {
    target: IpAddr,
    probe: Arc<dyn LivenessProbe>,
    handler: Arc<dyn LivenessHandler>,
    event_bus: EventBus,
    state: LivenessState,
    round_interval: Duration,
    reply_window: Duration,
}

impl LivenessMonitor {
    pub fn new(
        target: IpAddr,
        probe: Arc<dyn LivenessProbe>,
        handler: Arc<dyn LivenessHandler>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            target,
            probe,
            handler,
            event_bus,
            state: LivenessState::Unknown,
            round_interval: ROUND_INTERVAL,
            reply_window: REPLY_WINDOW,
        }
    }

    /// Overrides the round cadence.
    pub fn with_timing(mut self, round_interval: Duration, reply_window: Duration) -> Self {
        self.round_interval = round_interval;
        self.reply_window = reply_window;
        self
    }

    pub const fn state(&self) -> LivenessState {
        self.state
    }

    /// Runs one probe round and performs the resulting action.
    ///
    /// A probe error leaves the state untouched; the round is inconclusive.
    /// Pause and resume run to completion before this returns.
    pub async fn run_round(&mut self) -> Result<Option<LivenessAction>> {
        let got_reply = match self.probe.probe(self.target, self.reply_window).await {
            Ok(got_reply) => got_reply,
            Err(e) => {
                warn!("Liveness round for {} skipped: {e:#}", self.target);
                return Ok(None);
            }
        };

        let (next, action) = transition(self.state, got_reply.into());
        if next != self.state {
            debug!("Liveness of {}: {:?} -> {:?}", self.target, self.state, next);
            if let Err(e) = self.event_bus.publish(Event::LivenessChanged(next)) {
                debug!("No subscribers for liveness event: {e}");
            }
        }
        self.state = next;

        match action {
            Some(LivenessAction::Pause) => {
                info!("Remote {} went down", self.target);
                self.handler.pause().await?;
            }
            Some(LivenessAction::Resume) => {
                info!("Remote {} came up", self.target);
                self.handler.resume().await?;
            }
            None => {}
        }

        Ok(action)
    }

    /// Probes every round interval until cancelled. The first round is immediate.
    pub async fn run(mut self, cancel_token: CancellationToken) -> Result<()> {
        let mut interval = tokio::time::interval(self.round_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    info!("Liveness monitor cancelled");
                    break;
                }
                _instant = interval.tick() => {
                    // A round cut short after queueing its fade still has the
                    // fade carried out by the brightness owner.
                    tokio::select! {
                        biased;
                        () = cancel_token.cancelled() => {
                            info!("Liveness monitor cancelled mid-round");
                            break;
                        }
                        result = self.run_round() => {
                            result?;
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::{
        collections::VecDeque,
        sync::{
            Mutex,
            atomic::{AtomicU32, Ordering},
        },
    };

    struct ScriptedProbe {
        rounds: Mutex<VecDeque<Result<bool>>>,
        resolved: Option<IpAddr>,
        resolve_fails: bool,
        check_fails: bool,
    }

    impl ScriptedProbe {
        fn replies(rounds: &[bool]) -> Self {
            Self {
                rounds: Mutex::new(rounds.iter().map(|got| Ok(*got)).collect()),
                resolved: Some(IpAddr::from([192, 168, 1, 10])),
                resolve_fails: false,
                check_fails: false,
            }
        }
    }

    #[async_trait]
    impl LivenessProbe for ScriptedProbe {
        async fn check(&self) -> Result<()> {
            if self.check_fails {
                bail!("operation not permitted");
            }
            Ok(())
        }

        async fn resolve(&self, _host: &str) -> Result<Option<IpAddr>> {
            if self.resolve_fails {
                bail!("Failed to resolve nowhere.invalid");
            }
            Ok(self.resolved)
        }

        async fn probe(&self, _addr: IpAddr, _window: Duration) -> Result<bool> {
            self.rounds
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Ok(false))
        }
    }

    #[derive(Default)]
    struct CountingHandler {
        pauses: AtomicU32,
        resumes: AtomicU32,
    }

    #[async_trait]
    impl LivenessHandler for CountingHandler {
        async fn pause(&self) -> Result<()> {
            self.pauses.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn resume(&self) -> Result<()> {
            self.resumes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn monitor(probe: ScriptedProbe, handler: Arc<CountingHandler>) -> LivenessMonitor {
        LivenessMonitor::new(
            IpAddr::from([192, 168, 1, 10]),
            Arc::new(probe),
            handler,
            EventBus::new(),
        )
    }

    #[test]
    fn transition_table() {
        use LivenessAction::*;
        use LivenessState::*;
        use RoundOutcome::*;

        assert_eq!(transition(Unknown, Reply), (Up, None));
        assert_eq!(transition(Unknown, NoReply), (Down, Some(Pause)));
        assert_eq!(transition(Up, Reply), (Up, None));
        assert_eq!(transition(Up, NoReply), (Down, Some(Pause)));
        assert_eq!(transition(Down, Reply), (Up, Some(Resume)));
        assert_eq!(transition(Down, NoReply), (Down, None));
    }

    #[tokio::test]
    async fn up_up_down_down_up_pauses_and_resumes_once() {
        let handler = Arc::new(CountingHandler::default());
        let mut monitor = monitor(
            ScriptedProbe::replies(&[true, true, false, false, true]),
            handler.clone(),
        );

        let mut actions = Vec::new();
        for _ in 0..5 {
            actions.push(monitor.run_round().await.unwrap());
        }

        assert_eq!(
            actions,
            vec![
                None,
                None,
                Some(LivenessAction::Pause),
                None,
                Some(LivenessAction::Resume)
            ]
        );
        assert_eq!(handler.pauses.load(Ordering::SeqCst), 1);
        assert_eq!(handler.resumes.load(Ordering::SeqCst), 1);
        assert_eq!(monitor.state(), LivenessState::Up);
    }

    #[tokio::test]
    async fn first_silent_round_pauses() {
        let handler = Arc::new(CountingHandler::default());
        let mut monitor = monitor(ScriptedProbe::replies(&[false]), handler.clone());

        assert_eq!(
            monitor.run_round().await.unwrap(),
            Some(LivenessAction::Pause)
        );
        assert_eq!(monitor.state(), LivenessState::Down);
    }

    #[tokio::test]
    async fn probe_error_keeps_state() {
        let handler = Arc::new(CountingHandler::default());
        let probe = ScriptedProbe::replies(&[true]);
        probe
            .rounds
            .lock()
            .unwrap()
            .push_back(Err(anyhow::anyhow!("sendto: network unreachable")));
        let mut monitor = monitor(probe, handler.clone());

        monitor.run_round().await.unwrap();
        assert_eq!(monitor.run_round().await.unwrap(), None);

        assert_eq!(monitor.state(), LivenessState::Up);
        assert_eq!(handler.pauses.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn liveness_change_is_published() {
        let handler = Arc::new(CountingHandler::default());
        let event_bus = EventBus::new();
        let mut events = event_bus.subscribe();
        let mut monitor = LivenessMonitor::new(
            IpAddr::from([10, 0, 0, 1]),
            Arc::new(ScriptedProbe::replies(&[true, true])),
            handler,
            event_bus,
        );

        monitor.run_round().await.unwrap();
        monitor.run_round().await.unwrap();

        match events.try_recv() {
            Ok(Event::LivenessChanged(LivenessState::Up)) => {}
            other => panic!("Expected LivenessChanged(Up), got {other:?}"),
        }
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn empty_host_disables_gating() {
        let probe = ScriptedProbe::replies(&[]);
        assert_eq!(resolve_target("  ", &probe).await.unwrap(), None);
    }

    #[tokio::test]
    async fn unresolvable_host_disables_gating() {
        let mut probe = ScriptedProbe::replies(&[]);
        probe.resolve_fails = true;
        assert_eq!(resolve_target("nowhere.invalid", &probe).await.unwrap(), None);

        probe.resolve_fails = false;
        probe.resolved = None;
        assert_eq!(resolve_target("nowhere.invalid", &probe).await.unwrap(), None);
    }

    #[tokio::test]
    async fn failing_self_check_is_fatal() {
        let mut probe = ScriptedProbe::replies(&[]);
        probe.check_fails = true;
        assert!(resolve_target("192.168.1.10", &probe).await.is_err());
    }

    #[tokio::test]
    async fn ping_probe_parses_literal_addresses() {
        let probe = PingProbe::default();
        assert_eq!(
            probe.resolve("10.1.2.3").await.unwrap(),
            Some(IpAddr::from([10, 1, 2, 3]))
        );
    }

    #[tokio::test]
    async fn ping_probe_reports_missing_binary() {
        let probe = PingProbe::new("/nonexistent/ping");
        assert!(probe.check().await.is_err());
        assert!(
            probe
                .probe(IpAddr::from([127, 0, 0, 1]), REPLY_WINDOW)
                .await
                .is_err()
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancellation() {
        let handler = Arc::new(CountingHandler::default());
        let monitor = monitor(ScriptedProbe::replies(&[true]), handler)
            .with_timing(Duration::from_secs(60), Duration::from_secs(1));
        let token = CancellationToken::new();

        let task = tokio::spawn(monitor.run(token.clone()));
        tokio::time::sleep(Duration::from_secs(150)).await;
        token.cancel();

        tokio_test::assert_ok!(task.await.unwrap());
    }

    struct HangingProbe;

    #[async_trait]
    impl LivenessProbe for HangingProbe {
        async fn check(&self) -> Result<()> {
            Ok(())
        }

        async fn resolve(&self, _host: &str) -> Result<Option<IpAddr>> {
            Ok(None)
        }

        async fn probe(&self, _addr: IpAddr, _window: Duration) -> Result<bool> {
            tokio::time::sleep(Duration::from_secs(3)).await;
            Ok(false)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_probe_skips_the_round() {
        let handler = Arc::new(CountingHandler::default());
        let monitor = LivenessMonitor::new(
            IpAddr::from([192, 168, 1, 10]),
            Arc::new(HangingProbe),
            handler.clone(),
            EventBus::new(),
        );
        let token = CancellationToken::new();

        let started = tokio::time::Instant::now();
        let task = tokio::spawn(monitor.run(token.clone()));
        tokio::time::sleep(Duration::from_millis(500)).await;
        token.cancel();

        tokio_test::assert_ok!(task.await.unwrap());
        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(handler.pauses.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn shutdown_timeout_covers_a_full_round() {
        use crate::{
            pause::{QUICK_FADE_STEP, SETTLE_DELAY},
            task_manager::TASK_SHUTDOWN_TIMEOUT,
        };

        let worst_round = REPLY_WINDOW + PROBE_GRACE + SETTLE_DELAY + QUICK_FADE_STEP * 255;
        assert!(TASK_SHUTDOWN_TIMEOUT > worst_round);
    }
}
