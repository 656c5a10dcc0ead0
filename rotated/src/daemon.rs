//! The countdown state machine.
//!
//! ```text
//!            pause              stop / interrupt
//! Running ----------> Paused ------------------> Terminating(UserStop | Interrupted)
//!    ^                  |
//!    +------ resume ----+
//!    |
//!    +-- remaining hits 0 --> Terminating(Expired)
//!    +-- write fails -------> Terminating(IoFailure)
//! ```
//!
//! Every tick first drains the command mailbox, then (while running) derives
//! the remaining time from the countdown and writes it back to the rotation
//! file.

use crate::countdown::Countdown;
use crate::error::DaemonError;
use crate::hooks::{Hooks, EXPIRE_EVENT};
use crate::persistence::Persistence;
use rotate_ipc::{Command, RotationPolicy, RotationState, Span};
use std::future::Future;
use std::path::Path;
use std::time::{Duration, Instant};
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Running,
    Paused,
    Terminating(Exit),
}

/// Why a daemon run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exit {
    /// A `stop` command arrived.
    UserStop,
    Expired,
    /// SIGINT/SIGTERM.
    Interrupted,
    IoFailure,
}

impl Exit {
    pub fn is_failure(self) -> bool {
        matches!(self, Exit::IoFailure)
    }
}

pub struct Daemon<P> {
    store: Persistence,
    hooks: Hooks,
    policy: P,
    state: RotationState,
    countdown: Countdown,
    phase: Phase,
}

impl<P: RotationPolicy> Daemon<P> {
    /// Loads the rotation file and discards any command left over from an
    /// earlier run. The countdown starts at `now`.
    pub async fn start(
        store: Persistence,
        hooks: Hooks,
        policy: P,
        now: Instant,
    ) -> Result<Self, DaemonError> {
        let state = store.load().await?;
        info!("Initial content loaded from: {}", store.path().display());
        rotate_ipc::clear(store.path()).await?;

        let countdown = Countdown::start(state.timer.remaining.as_duration(), now);
        info!(
            "Initial values: Remaining: {}, Total: {}",
            state.timer.remaining, state.timer.total
        );
        Ok(Self {
            store,
            hooks,
            policy,
            state,
            countdown,
            phase: Phase::Running,
        })
    }

    pub fn target(&self) -> &Path {
        self.store.path()
    }

    /// One iteration of the poll loop.
    pub async fn tick(&mut self, now: Instant) -> Phase {
        if matches!(self.phase, Phase::Terminating(_)) {
            return self.phase;
        }

        if let Some(command) = rotate_ipc::poll(self.target()).await {
            info!("Received command: {}", command);
            if let Some(exit) = self.apply(command, now) {
                return Phase::Terminating(self.stop_early(exit).await);
            }
        }

        if self.countdown.is_paused() {
            return self.phase;
        }

        let remaining = self.countdown.remaining(now);
        self.state = self
            .state
            .with_remaining(Span::from_duration_ceil(remaining));
        if let Err(e) = self.store.save(&self.state).await {
            return self.fail(e);
        }

        let elapsed = self
            .state
            .timer
            .total
            .as_secs()
            .saturating_sub(self.state.timer.remaining.as_secs());
        info!(
            "Updated: Remaining: {}, Elapsed: {}",
            self.state.timer.remaining,
            Span::from_secs(elapsed)
        );

        if remaining.is_zero() {
            self.expire().await;
        }
        self.phase
    }

    /// Applies a command to the countdown. Returns the exit reason if the
    /// command ends the run.
    fn apply(&mut self, command: Command, now: Instant) -> Option<Exit> {
        match command {
            Command::Pause => {
                if self.countdown.pause(now) {
                    self.phase = Phase::Paused;
                    info!("Timer paused");
                }
                None
            }
            Command::Resume => {
                if let Some(paused_for) = self.countdown.resume(now) {
                    self.phase = Phase::Running;
                    info!("Timer resumed (paused for {:.1}s)", paused_for.as_secs_f64());
                }
                None
            }
            Command::Stop => {
                info!("Stopping daemon...");
                Some(Exit::UserStop)
            }
        }
    }

    async fn expire(&mut self) {
        info!("Timer expired! Triggering rotation...");
        self.hooks.run(EXPIRE_EVENT, self.store.path()).await;

        let rotated = self.policy.apply(&self.state);
        self.state = rotated.with_remaining(rotated.timer.total);
        if let Err(e) = self.store.save(&self.state).await {
            self.fail(e);
            return;
        }
        info!("Rotation complete. Use 'rotatectl start' to start the next timer.");
        self.phase = Phase::Terminating(Exit::Expired);
    }

    /// Handles an interrupt signal: listeners still hear `expire`, but the
    /// team does not rotate and the timer keeps its current value.
    pub async fn interrupt(&mut self) -> Exit {
        if let Phase::Terminating(exit) = self.phase {
            return exit;
        }
        info!("Daemon stopping...");
        self.stop_early(Exit::Interrupted).await
    }

    async fn stop_early(&mut self, exit: Exit) -> Exit {
        info!("Triggering expire hook before exit...");
        self.hooks.run(EXPIRE_EVENT, self.store.path()).await;
        self.phase = Phase::Terminating(exit);
        exit
    }

    fn fail(&mut self, e: DaemonError) -> Phase {
        error!("Error in daemon: {}", e);
        self.phase = Phase::Terminating(Exit::IoFailure);
        self.phase
    }

    /// Ticks every `interval` until the run ends or `shutdown` resolves.
    ///
    /// `shutdown` is checked before every tick, the first one included.
    pub async fn run<F>(mut self, interval: Duration, shutdown: F) -> Exit
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut wait = Duration::ZERO;
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => return self.interrupt().await,
                _ = tokio::time::sleep(wait) => {}
            }
            if let Phase::Terminating(exit) = self.tick(Instant::now()).await {
                return exit;
            }
            wait = interval;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rotate_ipc::{command_path, send, RoundRobin};
    use tempfile::TempDir;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    struct Fixture {
        dir: TempDir,
        target: std::path::PathBuf,
    }

    impl Fixture {
        fn new(content: &str) -> Self {
            let dir = TempDir::new().unwrap();
            let target = dir.path().join("rotation");
            std::fs::write(&target, content).unwrap();
            Self { dir, target }
        }

        fn hooks(&self) -> Hooks {
            Hooks::new(self.dir.path().join("hooks"), secs(5))
        }

        fn hook_log(&self) -> std::path::PathBuf {
            self.dir.path().join("hook.log")
        }

        fn hook_calls(&self) -> usize {
            std::fs::read_to_string(self.hook_log())
                .map(|s| s.lines().count())
                .unwrap_or(0)
        }

        #[cfg(unix)]
        fn install_expire_hook(&self) {
            crate::hooks::tests::recording_hook(
                &self.dir.path().join("hooks").join(EXPIRE_EVENT),
                &self.hook_log(),
            );
        }

        #[cfg(not(unix))]
        fn install_expire_hook(&self) {}

        fn on_disk(&self) -> RotationState {
            RotationState::decode(&std::fs::read_to_string(&self.target).unwrap()).unwrap()
        }

        async fn daemon(&self, t0: Instant) -> Daemon<RoundRobin> {
            Daemon::start(Persistence::new(&self.target), self.hooks(), RoundRobin, t0)
                .await
                .unwrap()
        }
    }

    /// Counts how often the policy is consulted.
    #[derive(Default)]
    struct CountingPolicy(std::cell::Cell<usize>);

    impl RotationPolicy for CountingPolicy {
        fn rotate(
            &self,
            roles: &[rotate_ipc::Assignment],
            tail: &[String],
        ) -> (Vec<rotate_ipc::Assignment>, Vec<String>) {
            self.0.set(self.0.get() + 1);
            RoundRobin.rotate(roles, tail)
        }
    }

    #[tokio::test]
    async fn test_expires_after_remaining_runs_out() {
        let fx = Fixture::new("0:03 / 5:00\nTyping: Ann\n");
        fx.install_expire_hook();
        let t0 = Instant::now();
        let mut daemon = fx.daemon(t0).await;

        for (tick, left) in [(0, "0:03"), (1, "0:02"), (2, "0:01")] {
            assert_eq!(daemon.tick(t0 + secs(tick)).await, Phase::Running);
            assert_eq!(fx.on_disk().timer.remaining.to_string(), left);
        }
        assert_eq!(fx.hook_calls(), 0);

        assert_eq!(
            daemon.tick(t0 + secs(3)).await,
            Phase::Terminating(Exit::Expired)
        );
        let state = fx.on_disk();
        assert_eq!(state.timer.remaining, Span::from_secs(300));
        assert_eq!(state.timer.total, Span::from_secs(300));
        assert_eq!(state.roles[0].member, "Ann");
        if cfg!(unix) {
            assert_eq!(fx.hook_calls(), 1);
        }

        // Terminating is absorbing.
        assert_eq!(
            daemon.tick(t0 + secs(4)).await,
            Phase::Terminating(Exit::Expired)
        );
        if cfg!(unix) {
            assert_eq!(fx.hook_calls(), 1);
        }
    }

    #[tokio::test]
    async fn test_expiry_rotates_team() {
        let fx = Fixture::new("0:01 / 5:00\nTyping: Ann\nTalking: Ben\nCat\n");
        let t0 = Instant::now();
        let mut daemon = fx.daemon(t0).await;

        assert_eq!(
            daemon.tick(t0 + secs(2)).await,
            Phase::Terminating(Exit::Expired)
        );
        assert_eq!(
            std::fs::read_to_string(&fx.target).unwrap(),
            "5:00 / 5:00\nTyping: Ben\nTalking: Cat\nAnn\n"
        );
    }

    #[tokio::test]
    async fn test_remaining_is_monotonic_and_never_negative() {
        let fx = Fixture::new("0:10 / 0:10\nAnn\n");
        let t0 = Instant::now();
        let mut daemon = fx.daemon(t0).await;

        let interval = Duration::from_millis(700);
        let mut last = Span::from_secs(10);
        let mut ticks = 0u32;
        loop {
            let phase = daemon.tick(t0 + interval * ticks).await;
            ticks += 1;
            if phase != Phase::Running {
                assert_eq!(phase, Phase::Terminating(Exit::Expired));
                break;
            }
            let remaining = daemon.state.timer.remaining;
            assert!(remaining <= last);
            last = remaining;
        }
        // ceil(10s / 0.7s) = 15 ticks of countdown plus the first one at t0.
        assert!((15..=17).contains(&ticks), "took {ticks} ticks");
    }

    #[tokio::test]
    async fn test_pause_and_resume_skip_paused_time() {
        let fx = Fixture::new("1:00 / 5:00\nTyping: Ann\n");
        let t0 = Instant::now();
        let mut daemon = fx.daemon(t0).await;

        for tick in 0..2 {
            daemon.tick(t0 + secs(tick)).await;
        }
        send(&fx.target, Command::Pause).await.unwrap();
        assert_eq!(daemon.tick(t0 + secs(2)).await, Phase::Paused);
        // Paused ticks leave the file alone.
        std::fs::write(&fx.target, "9:99 garbage").unwrap();
        for tick in 3..5 {
            assert_eq!(daemon.tick(t0 + secs(tick)).await, Phase::Paused);
        }
        assert_eq!(std::fs::read_to_string(&fx.target).unwrap(), "9:99 garbage");

        send(&fx.target, Command::Resume).await.unwrap();
        assert_eq!(daemon.tick(t0 + secs(5)).await, Phase::Running);
        // 5s of wall time, 3s of it paused.
        assert_eq!(fx.on_disk().timer.remaining, Span::from_secs(58));

        daemon.tick(t0 + secs(10)).await;
        assert_eq!(fx.on_disk().timer.remaining, Span::from_secs(53));
    }

    #[tokio::test]
    async fn test_repeated_commands_are_idempotent() {
        let fx = Fixture::new("1:00 / 5:00\n");
        let t0 = Instant::now();
        let mut daemon = fx.daemon(t0).await;

        send(&fx.target, Command::Resume).await.unwrap();
        assert_eq!(daemon.tick(t0 + secs(1)).await, Phase::Running);
        assert_eq!(daemon.state.timer.remaining, Span::from_secs(59));

        send(&fx.target, Command::Pause).await.unwrap();
        assert_eq!(daemon.tick(t0 + secs(2)).await, Phase::Paused);
        send(&fx.target, Command::Pause).await.unwrap();
        assert_eq!(daemon.tick(t0 + secs(4)).await, Phase::Paused);

        send(&fx.target, Command::Resume).await.unwrap();
        daemon.tick(t0 + secs(6)).await;
        // The second pause did not move the pause start.
        assert_eq!(daemon.state.timer.remaining, Span::from_secs(58));
    }

    #[tokio::test]
    async fn test_stop_runs_hook_without_rotating() {
        let fx = Fixture::new("2:00 / 5:00\nTyping: Ann\nBen\n");
        fx.install_expire_hook();
        let t0 = Instant::now();
        let policy = CountingPolicy::default();
        let mut daemon = Daemon::start(Persistence::new(&fx.target), fx.hooks(), policy, t0)
            .await
            .unwrap();

        daemon.tick(t0).await;
        daemon.tick(t0 + secs(30)).await;
        send(&fx.target, Command::Stop).await.unwrap();
        assert_eq!(
            daemon.tick(t0 + secs(31)).await,
            Phase::Terminating(Exit::UserStop)
        );

        assert_eq!(daemon.policy.0.get(), 0);
        let state = fx.on_disk();
        assert_eq!(state.timer.remaining, Span::from_secs(90));
        assert_eq!(state.roles[0].member, "Ann");
        if cfg!(unix) {
            assert_eq!(fx.hook_calls(), 1);
        }
    }

    #[tokio::test]
    async fn test_stop_while_paused() {
        let fx = Fixture::new("2:00 / 5:00\n");
        let t0 = Instant::now();
        let mut daemon = fx.daemon(t0).await;

        send(&fx.target, Command::Pause).await.unwrap();
        daemon.tick(t0).await;
        send(&fx.target, Command::Stop).await.unwrap();
        assert_eq!(
            daemon.tick(t0 + secs(1)).await,
            Phase::Terminating(Exit::UserStop)
        );
    }

    #[tokio::test]
    async fn test_malformed_command_changes_nothing() {
        let fx = Fixture::new("1:00 / 5:00\n");
        let t0 = Instant::now();
        let mut daemon = fx.daemon(t0).await;

        std::fs::write(command_path(&fx.target), "bogus").unwrap();
        assert_eq!(daemon.tick(t0 + secs(1)).await, Phase::Running);
        assert_eq!(daemon.state.timer.remaining, Span::from_secs(59));
        assert!(!command_path(&fx.target).exists());
    }

    #[tokio::test]
    async fn test_stale_command_cleared_on_start() {
        let fx = Fixture::new("1:00 / 5:00\n");
        std::fs::write(command_path(&fx.target), "stop").unwrap();
        let t0 = Instant::now();
        let mut daemon = fx.daemon(t0).await;

        assert!(!command_path(&fx.target).exists());
        assert_eq!(daemon.tick(t0).await, Phase::Running);
    }

    #[tokio::test]
    async fn test_vanished_target_is_fatal() {
        let fx = Fixture::new("1:00 / 5:00\n");
        let t0 = Instant::now();
        let mut daemon = fx.daemon(t0).await;

        std::fs::remove_file(&fx.target).unwrap();
        assert_eq!(
            daemon.tick(t0 + secs(1)).await,
            Phase::Terminating(Exit::IoFailure)
        );
        assert!(!fx.target.exists());
        assert!(Exit::IoFailure.is_failure());
    }

    #[tokio::test]
    async fn test_start_requires_valid_file() {
        let fx = Fixture::new("not a timer\n");
        let err = Daemon::start(
            Persistence::new(&fx.target),
            fx.hooks(),
            RoundRobin,
            Instant::now(),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, DaemonError::Parse { .. }));

        let missing = fx.dir.path().join("missing");
        let err = Daemon::start(Persistence::new(&missing), fx.hooks(), RoundRobin, Instant::now())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, DaemonError::MissingTarget(_)));
    }

    #[tokio::test]
    async fn test_interrupt_runs_hook_once() {
        let fx = Fixture::new("1:00 / 5:00\nTyping: Ann\nBen\n");
        fx.install_expire_hook();
        let t0 = Instant::now();
        let mut daemon = fx.daemon(t0).await;

        daemon.tick(t0 + secs(10)).await;
        assert_eq!(daemon.interrupt().await, Exit::Interrupted);
        assert_eq!(daemon.interrupt().await, Exit::Interrupted);

        let state = fx.on_disk();
        assert_eq!(state.timer.remaining, Span::from_secs(50));
        assert_eq!(state.roles[0].member, "Ann");
        if cfg!(unix) {
            assert_eq!(fx.hook_calls(), 1);
        }
    }

    #[tokio::test]
    async fn test_run_until_expired() {
        let fx = Fixture::new("0:01 / 0:02\nTyping: Ann\nBen\n");
        fx.install_expire_hook();
        let daemon = fx.daemon(Instant::now()).await;

        let exit = daemon
            .run(Duration::from_millis(100), std::future::pending())
            .await;

        assert_eq!(exit, Exit::Expired);
        assert_eq!(
            std::fs::read_to_string(&fx.target).unwrap(),
            "0:02 / 0:02\nTyping: Ben\nAnn\n"
        );
        if cfg!(unix) {
            assert_eq!(fx.hook_calls(), 1);
        }
    }

    #[tokio::test]
    async fn test_run_until_shutdown() {
        let fx = Fixture::new("5:00 / 5:00\nTyping: Ann\n");
        let daemon = fx.daemon(Instant::now()).await;

        let exit = daemon
            .run(
                Duration::from_millis(50),
                tokio::time::sleep(Duration::from_millis(200)),
            )
            .await;

        assert_eq!(exit, Exit::Interrupted);
        assert_eq!(fx.on_disk().timer.remaining, Span::from_secs(300));
    }

    #[tokio::test]
    async fn test_shutdown_before_first_tick_runs_hooks() {
        let fx = Fixture::new("0:01 / 5:00\nTyping: Ann\nTalking: Ben\n");
        fx.install_expire_hook();
        let daemon = fx.daemon(Instant::now()).await;

        let exit = daemon.run(secs(1), std::future::ready(())).await;

        assert_eq!(exit, Exit::Interrupted);
        // No tick ran: the file is neither counted down nor rotated.
        assert_eq!(
            std::fs::read_to_string(&fx.target).unwrap(),
            "0:01 / 5:00\nTyping: Ann\nTalking: Ben\n"
        );
        if cfg!(unix) {
            assert_eq!(fx.hook_calls(), 1);
        }
    }
}
