//! Virtual controller state machines
//!
//! When no panel drives a pump or chlorinator, the engine does: pumps drop
//! back to local control if they stop hearing from us, and chlorinators
//! stop generating. These machines only decide *what* to send on each
//! tick; the service supplies the ticks and the engine turns the returned
//! commands into queued frames.
//!
//! # Architecture
//!
//! ```text
//! PumpTimer:
//!   Idle ──start──► Running(remaining) ──tick: remaining -= 0.5──► ...
//!    ▲                   │  remaining == -1: never decrements
//!    └──stop / 0 ────────┘
//!
//! ChlorinatorTimer:
//!   desired in 1..=101 ──► every 4s
//!   desired == 0       ──► every 30min
//!   desired changed    ──► due now, then restart interval
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::commands::{ChlorinatorCommand, PumpCommand, CHLOR_MAX_OUTPUT};
use crate::config::TimerConfig;
use crate::constants::{PUMP_TICK_MINUTES, RUN_INDEFINITELY};
use crate::error::{PoolBusError, Result};

/// What a running pump is told to do on every tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunKind {
    Rpm(u16),
    Gpm(u8),
    Program(u8),
}

impl RunKind {
    pub fn command(self) -> PumpCommand {
        match self {
            RunKind::Rpm(rpm) => PumpCommand::RunRpm(rpm),
            RunKind::Gpm(gpm) => PumpCommand::RunGpm(gpm),
            RunKind::Program(program) => PumpCommand::RunProgram(program),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PumpTimerState {
    /// Status polling only
    Idle,
    Running {
        run: RunKind,
        /// Minutes left; [`RUN_INDEFINITELY`] never counts down
        remaining: f64,
    },
}

/// Run-duration countdown and keep-alive for one virtual pump
#[derive(Debug, Clone)]
pub struct PumpTimer {
    index: u8,
    state: PumpTimerState,
}

impl PumpTimer {
    pub fn new(index: u8) -> Self {
        Self {
            index,
            state: PumpTimerState::Idle,
        }
    }

    pub fn index(&self) -> u8 {
        self.index
    }

    pub fn state(&self) -> PumpTimerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        matches!(self.state, PumpTimerState::Running { .. })
    }

    /// Minutes left, 0 when idle
    pub fn remaining(&self) -> f64 {
        match self.state {
            PumpTimerState::Running { remaining, .. } => remaining,
            PumpTimerState::Idle => 0.0,
        }
    }

    /// Start (or replace) a run. Returns the commands to send right away.
    ///
    /// `duration_minutes` must be positive, or [`RUN_INDEFINITELY`].
    pub fn start(&mut self, run: RunKind, duration_minutes: f64) -> Result<Vec<PumpCommand>> {
        let indefinite = duration_minutes == RUN_INDEFINITELY;
        if !indefinite && !(duration_minutes > 0.0 && duration_minutes.is_finite()) {
            return Err(PoolBusError::invalid_command(format!(
                "pump run duration {} must be > 0 or -1",
                duration_minutes
            )));
        }
        info!("Pump {} timer start: {:?} for {} min", self.index, run, duration_minutes);
        self.state = PumpTimerState::Running {
            run,
            remaining: duration_minutes,
        };
        Ok(run_sequence(run))
    }

    /// Cancel a run. Returns the stop sequence, or nothing when idle.
    pub fn stop(&mut self) -> Vec<PumpCommand> {
        if !self.is_running() {
            return Vec::new();
        }
        info!("Pump {} timer stopped", self.index);
        self.state = PumpTimerState::Idle;
        stop_sequence()
    }

    /// Advance one 30 second tick
    pub fn tick(&mut self) -> Vec<PumpCommand> {
        let PumpTimerState::Running { run, remaining } = self.state else {
            return vec![PumpCommand::Remote, PumpCommand::Status];
        };

        if remaining < 0.0 {
            return run_sequence(run);
        }

        let left = (remaining - PUMP_TICK_MINUTES).max(0.0);
        if left > 0.0 {
            self.state = PumpTimerState::Running { run, remaining: left };
            debug!("Pump {} {:?}: {} min left", self.index, run, left);
            return run_sequence(run);
        }

        info!("Pump {} run finished", self.index);
        self.state = PumpTimerState::Idle;
        stop_sequence()
    }
}

fn run_sequence(run: RunKind) -> Vec<PumpCommand> {
    vec![PumpCommand::Remote, PumpCommand::PowerOn, run.command(), PumpCommand::Status]
}

fn stop_sequence() -> Vec<PumpCommand> {
    vec![
        PumpCommand::Remote,
        PumpCommand::StopProgram,
        PumpCommand::PowerOff,
        PumpCommand::Status,
    ]
}

/// Keep-alive for a virtual chlorinator
#[derive(Debug, Clone)]
pub struct ChlorinatorTimer {
    desired_output: u8,
    active_interval: Duration,
    idle_interval: Duration,
    next_due: Option<Instant>,
    version_requested: bool,
}

impl ChlorinatorTimer {
    pub fn new(config: &TimerConfig) -> Self {
        Self {
            desired_output: 0,
            active_interval: config.chlorinator_active(),
            idle_interval: config.chlorinator_idle(),
            next_due: None,
            version_requested: false,
        }
    }

    pub fn desired_output(&self) -> u8 {
        self.desired_output
    }

    /// Interval for the current desired output
    pub fn interval(&self) -> Duration {
        if self.desired_output == 0 {
            self.idle_interval
        } else {
            self.active_interval
        }
    }

    /// Change the output; a change makes the next poll due immediately
    pub fn set_desired_output(&mut self, output: u8) -> Result<bool> {
        if output > CHLOR_MAX_OUTPUT {
            return Err(PoolBusError::invalid_command(format!(
                "chlorinator output {} above {}",
                output, CHLOR_MAX_OUTPUT
            )));
        }
        if output == self.desired_output {
            return Ok(false);
        }
        info!("Chlorinator desired output {} -> {}", self.desired_output, output);
        self.desired_output = output;
        self.next_due = None;
        Ok(true)
    }

    /// When the next poll should run; `None` means now
    pub fn next_due(&self) -> Option<Instant> {
        self.next_due
    }

    /// Commands due at `now`, rescheduling the next poll
    pub fn poll(&mut self, now: Instant) -> Vec<ChlorinatorCommand> {
        if matches!(self.next_due, Some(due) if now < due) {
            return Vec::new();
        }
        self.next_due = Some(now + self.interval());

        let mut commands = Vec::with_capacity(2);
        if !self.version_requested {
            self.version_requested = true;
            commands.push(ChlorinatorCommand::GetVersion);
        }
        commands.push(ChlorinatorCommand::SetOutput(self.desired_output));
        commands
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    // ========== pump ==========

    #[test]
    fn test_idle_tick_polls_status() {
        let mut timer = PumpTimer::new(1);
        assert_eq!(timer.tick(), vec![PumpCommand::Remote, PumpCommand::Status]);
        assert!(!timer.is_running());
    }

    #[test]
    fn test_rpm_countdown_to_stop() {
        let mut timer = PumpTimer::new(1);
        let first = timer.start(RunKind::Rpm(2000), 2.0).unwrap();
        assert_eq!(first[2], PumpCommand::RunRpm(2000));

        let mut seen = Vec::new();
        for _ in 0..3 {
            let cmds = timer.tick();
            assert_eq!(cmds[2], PumpCommand::RunRpm(2000));
            seen.push(timer.remaining());
        }
        assert_eq!(seen, vec![1.5, 1.0, 0.5]);

        let last = timer.tick();
        assert_eq!(last, stop_sequence());
        assert_eq!(timer.remaining(), 0.0);
        assert!(!timer.is_running());

        // never below zero, back to idle polling
        assert_eq!(timer.tick(), vec![PumpCommand::Remote, PumpCommand::Status]);
        assert_eq!(timer.remaining(), 0.0);
    }

    #[test]
    fn test_indefinite_run_never_decrements() {
        let mut timer = PumpTimer::new(2);
        timer.start(RunKind::Program(3), RUN_INDEFINITELY).unwrap();
        for _ in 0..10 {
            let cmds = timer.tick();
            assert_eq!(cmds[2], PumpCommand::RunProgram(3));
        }
        assert_eq!(timer.remaining(), RUN_INDEFINITELY);
    }

    #[test]
    fn test_invalid_duration() {
        let mut timer = PumpTimer::new(1);
        assert!(timer.start(RunKind::Gpm(30), 0.0).is_err());
        assert!(timer.start(RunKind::Gpm(30), -2.0).is_err());
        assert!(timer.start(RunKind::Gpm(30), f64::NAN).is_err());
        assert!(!timer.is_running());
    }

    #[test]
    fn test_stop() {
        let mut timer = PumpTimer::new(1);
        assert!(timer.stop().is_empty());
        timer.start(RunKind::Gpm(30), 10.0).unwrap();
        assert_eq!(timer.stop()[1], PumpCommand::StopProgram);
        assert!(!timer.is_running());
    }

    // ========== chlorinator ==========

    #[test]
    fn test_chlorinator_intervals() {
        let mut timer = ChlorinatorTimer::new(&TimerConfig::default());
        assert_eq!(timer.interval(), Duration::from_secs(1800));
        timer.set_desired_output(50).unwrap();
        assert_eq!(timer.interval(), Duration::from_secs(4));
        timer.set_desired_output(101).unwrap();
        assert_eq!(timer.interval(), Duration::from_secs(4));
        assert!(timer.set_desired_output(102).is_err());
    }

    #[test]
    fn test_chlorinator_poll_schedule() {
        let start = Instant::now();
        let mut timer = ChlorinatorTimer::new(&TimerConfig::default());
        timer.set_desired_output(20).unwrap();

        let first = timer.poll(start);
        assert_eq!(first, vec![ChlorinatorCommand::GetVersion, ChlorinatorCommand::SetOutput(20)]);
        assert!(timer.poll(start + Duration::from_secs(3)).is_empty());
        assert_eq!(
            timer.poll(start + Duration::from_secs(4)),
            vec![ChlorinatorCommand::SetOutput(20)]
        );
    }

    #[test]
    fn test_chlorinator_change_restarts_interval() {
        let start = Instant::now();
        let mut timer = ChlorinatorTimer::new(&TimerConfig::default());
        timer.poll(start);
        assert_eq!(timer.next_due(), Some(start + Duration::from_secs(1800)));

        assert!(timer.set_desired_output(10).unwrap());
        assert_eq!(timer.next_due(), None);
        assert_eq!(timer.poll(start + Duration::from_secs(1)), vec![ChlorinatorCommand::SetOutput(10)]);
        assert_eq!(timer.next_due(), Some(start + Duration::from_secs(5)));
        assert!(!timer.set_desired_output(10).unwrap());
    }
}
