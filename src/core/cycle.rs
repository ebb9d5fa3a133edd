//! Thermal cycling
//!
//! Programs are driven entirely from this side: nothing is stored on or loaded
//! from the chamber. A program is a number of cycles over two steps followed by
//! an optional final step, each step being a ramp to a target temperature and
//! a dwell once the target is reached.
//!
//! Cancellation is cooperative through a [`CancellationToken`]. Once a program
//! has passed the availability gate the chamber is always stopped before
//! [`ThermalCycleController::cycle`] returns, whatever the outcome.

use super::chamber::{Chamber, ChamberError, Gate};
use super::transport::{TcpTransport, Transport};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Cycling error types
#[derive(Error, Debug)]
pub enum CycleError {
    /// A chamber command failed
    #[error(transparent)]
    Chamber(#[from] ChamberError),

    /// Cancelled by the caller
    #[error("thermal cycling cancelled")]
    Cancelled,

    /// Program parameters are out of range
    #[error("Invalid program: {0}")]
    InvalidProgram(String),

    /// Program completed but the trailing stop failed
    #[error("failed to stop the chamber: {0}")]
    StopFailed(#[source] ChamberError),

    /// Program was interrupted and the trailing stop failed as well
    #[error("{cause} (stopping the chamber also failed: {stop})")]
    Interrupted {
        /// What interrupted the program
        #[source]
        cause: Box<CycleError>,
        /// Why the trailing stop failed
        stop: ChamberError,
    },
}

impl CycleError {
    /// The error that ended the program, looking through a failed stop
    pub fn cause(&self) -> &CycleError {
        match self {
            Self::Interrupted { cause, .. } => cause.cause(),
            other => other,
        }
    }

    /// Check if the program was cancelled
    pub fn is_cancelled(&self) -> bool {
        matches!(self.cause(), Self::Cancelled)
    }
}

/// Step position within a program
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepKind {
    /// Step 1 of every cycle
    First,
    /// Step 2 of every cycle
    Second,
    /// Run once after the last cycle
    Final,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::First => write!(f, "step 1"),
            Self::Second => write!(f, "step 2"),
            Self::Final => write!(f, "final step"),
        }
    }
}

/// Target temperature and dwell time
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Target temperature [°C]
    pub temperature: f64,
    /// Dwell time once the target is reached [min]; 0 skips the step
    pub dwell_minutes: u32,
}

impl Step {
    /// Create a new step
    pub fn new(temperature: f64, dwell_minutes: u32) -> Self {
        Self {
            temperature,
            dwell_minutes,
        }
    }

    /// Whether the step runs at all
    pub fn is_active(&self) -> bool {
        self.dwell_minutes > 0
    }

    /// Dwell as a duration
    pub fn dwell(&self) -> Duration {
        Duration::from_secs(u64::from(self.dwell_minutes) * 60)
    }
}

/// Thermal cycling program
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleProgram {
    cycles: u32,
    steps: [Step; 3],
    tolerance: f64,
    refresh: Duration,
}

impl CycleProgram {
    /// Create a program, validating tolerance, refresh interval and temperatures
    pub fn new(cycles: u32, steps: [Step; 3], tolerance: f64, refresh_secs: f64) -> Result<Self, CycleError> {
        let (tolerance, refresh) = parameters(tolerance, refresh_secs)?;
        if let Some(step) = steps.iter().find(|s| !s.temperature.is_finite()) {
            return Err(CycleError::InvalidProgram(format!(
                "temperature {} is not finite",
                step.temperature
            )));
        }

        Ok(Self {
            cycles,
            steps,
            tolerance,
            refresh,
        })
    }

    /// Number of cycles over steps 1 and 2
    pub fn cycles(&self) -> u32 {
        self.cycles
    }

    /// Step by position
    pub fn step(&self, kind: StepKind) -> Step {
        match kind {
            StepKind::First => self.steps[0],
            StepKind::Second => self.steps[1],
            StepKind::Final => self.steps[2],
        }
    }

    /// Temperature tolerance [°C]
    pub fn tolerance(&self) -> f64 {
        self.tolerance
    }

    /// Poll interval while ramping
    pub fn refresh(&self) -> Duration {
        self.refresh
    }

    /// Steps in execution order, inactive steps left out
    pub fn schedule(&self) -> Vec<StepKind> {
        let mut schedule = Vec::new();
        for _ in 0..self.cycles {
            schedule.extend(
                [StepKind::First, StepKind::Second]
                    .into_iter()
                    .filter(|k| self.step(*k).is_active()),
            );
        }
        if self.step(StepKind::Final).is_active() {
            schedule.push(StepKind::Final);
        }
        schedule
    }

    /// Total dwell time, ramps excluded
    pub fn total_dwell(&self) -> Duration {
        self.schedule().iter().map(|k| self.step(*k).dwell()).sum()
    }
}

impl fmt::Display for CycleProgram {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} cycles", self.cycles)?;
        for (i, step) in self.steps.iter().enumerate() {
            write!(f, ", t{}={}C i{}={}'", i + 1, step.temperature, i + 1, step.dwell_minutes)?;
        }
        Ok(())
    }
}

/// Controller state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CycleState {
    /// Nothing running
    Idle,
    /// Waiting for the actual temperature to reach the target
    RampingToTarget,
    /// Holding at the target
    DwellingAtTarget,
    /// Cycles done, final step about to run
    FinalStep,
    /// Chamber stopped
    Stopped,
}

/// State transition record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateTransition {
    /// Previous state
    pub from: CycleState,
    /// New state
    pub to: CycleState,
    /// Timestamp
    pub timestamp: DateTime<Local>,
    /// Reason for transition
    pub reason: Option<String>,
}

type StateCallback = Box<dyn Fn(CycleState, CycleState) + Send + Sync>;

/// Controller state machine
pub struct CycleStateMachine {
    state: CycleState,
    history: Vec<StateTransition>,
    max_history: usize,
    rejected: usize,
    on_state_change: Option<StateCallback>,
}

impl Default for CycleStateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl CycleStateMachine {
    /// Create a new state machine
    pub fn new() -> Self {
        Self {
            state: CycleState::Idle,
            history: Vec::new(),
            max_history: 256,
            rejected: 0,
            on_state_change: None,
        }
    }

    /// Get current state
    pub fn state(&self) -> CycleState {
        self.state
    }

    /// Get state history
    pub fn history(&self) -> &[StateTransition] {
        &self.history
    }

    /// Number of transitions refused since creation
    pub fn rejected_transitions(&self) -> usize {
        self.rejected
    }

    /// Set state change callback
    pub fn on_state_change<F>(&mut self, callback: F)
    where
        F: Fn(CycleState, CycleState) + Send + Sync + 'static,
    {
        self.on_state_change = Some(Box::new(callback));
    }

    /// Transition to a new state
    pub fn transition(&mut self, new_state: CycleState, reason: Option<&str>) -> Result<(), String> {
        if !self.is_valid_transition(new_state) {
            self.rejected += 1;
            return Err(format!("Invalid transition from {:?} to {:?}", self.state, new_state));
        }

        self.history.push(StateTransition {
            from: self.state,
            to: new_state,
            timestamp: Local::now(),
            reason: reason.map(String::from),
        });
        if self.history.len() > self.max_history {
            self.history.remove(0);
        }

        let old_state = self.state;
        self.state = new_state;

        if let Some(ref callback) = self.on_state_change {
            callback(old_state, new_state);
        }

        Ok(())
    }

    fn is_valid_transition(&self, new_state: CycleState) -> bool {
        use CycleState::*;

        match (self.state, new_state) {
            (_, Stopped) => true,

            (Idle, RampingToTarget) => true,
            (Idle, FinalStep) => true,

            (RampingToTarget, DwellingAtTarget) => true,

            // Next step, or the final one
            (DwellingAtTarget, RampingToTarget) => true,
            (DwellingAtTarget, FinalStep) => true,

            (FinalStep, RampingToTarget) => true,

            (Stopped, Idle) => true,

            _ => false,
        }
    }

    /// Return to idle, keeping the history
    pub fn reset(&mut self) {
        if self.state != CycleState::Idle {
            let _ = self.transition(CycleState::Stopped, None);
            let _ = self.transition(CycleState::Idle, Some("reset"));
        }
    }
}

/// One completed ramp-and-dwell
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRun {
    /// Step position
    pub step: StepKind,
    /// Cycle index, `None` for the final step
    pub cycle: Option<u32>,
    /// Target temperature
    pub target: f64,
    /// Temperature read when the target was reached
    pub reached: f64,
    /// Ramp start
    pub started: DateTime<Local>,
}

/// Summary of a `cycle` call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CycleReport {
    /// Skipped because the chamber was busy
    pub skipped: bool,
    /// Cycles fully completed
    pub cycles_completed: u32,
    /// Completed ramp-and-dwells in order
    pub steps: Vec<StepRun>,
    /// Start time
    pub started: DateTime<Local>,
    /// End time
    pub finished: Option<DateTime<Local>>,
}

impl CycleReport {
    fn new() -> Self {
        Self {
            skipped: false,
            cycles_completed: 0,
            steps: Vec::new(),
            started: Local::now(),
            finished: None,
        }
    }

    fn skipped() -> Self {
        Self {
            skipped: true,
            finished: Some(Local::now()),
            ..Self::new()
        }
    }

    /// Completed runs of a step
    pub fn runs_of(&self, kind: StepKind) -> usize {
        self.steps.iter().filter(|s| s.step == kind).count()
    }
}

fn parameters(tolerance: f64, refresh_secs: f64) -> Result<(f64, Duration), CycleError> {
    if !(tolerance.is_finite() && tolerance > 0.0) {
        return Err(CycleError::InvalidProgram(format!(
            "tolerance must be positive, got {}",
            tolerance
        )));
    }
    if !(refresh_secs.is_finite() && refresh_secs > 0.0) {
        return Err(CycleError::InvalidProgram(format!(
            "refresh interval must be positive, got {}",
            refresh_secs
        )));
    }
    Ok((tolerance, Duration::from_secs_f64(refresh_secs)))
}

fn interrupted(cause: CycleError, stopped: Result<(), ChamberError>) -> CycleError {
    match stopped {
        Ok(()) => cause,
        Err(stop) => CycleError::Interrupted {
            cause: Box::new(cause),
            stop,
        },
    }
}

async fn until_cancelled<F, R>(cancel: &CancellationToken, fut: F) -> Result<R, CycleError>
where
    F: Future<Output = Result<R, CycleError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CycleError::Cancelled),
        result = fut => result,
    }
}

/// Ramp, dwell and cycling on top of a [`Chamber`]
pub struct ThermalCycleController<T: Transport = TcpTransport> {
    chamber: Chamber<T>,
    machine: CycleStateMachine,
}

impl<T: Transport> ThermalCycleController<T> {
    /// Create a new controller
    pub fn new(chamber: Chamber<T>) -> Self {
        Self {
            chamber,
            machine: CycleStateMachine::new(),
        }
    }

    /// Get chamber
    pub fn chamber(&self) -> &Chamber<T> {
        &self.chamber
    }

    /// Current state
    pub fn state(&self) -> CycleState {
        self.machine.state()
    }

    /// Get state history
    pub fn history(&self) -> &[StateTransition] {
        self.machine.history()
    }

    /// Set state change callback
    pub fn on_state_change<F>(&mut self, callback: F)
    where
        F: Fn(CycleState, CycleState) + Send + Sync + 'static,
    {
        self.machine.on_state_change(callback);
    }

    /// Number of state transitions the controller attempted out of order
    pub fn rejected_transitions(&self) -> usize {
        self.machine.rejected_transitions()
    }

    /// Release the chamber
    pub fn into_chamber(self) -> Chamber<T> {
        self.chamber
    }

    fn enter(&mut self, state: CycleState, reason: &str) {
        if let Err(e) = self.machine.transition(state, Some(reason)) {
            tracing::warn!("{}", e);
        }
    }

    async fn ramp_and_dwell_inner(
        &mut self,
        target: f64,
        dwell: Duration,
        tolerance: f64,
        refresh: Duration,
    ) -> Result<f64, CycleError> {
        tracing::info!("ramping to {:.2} C", target);
        self.enter(CycleState::RampingToTarget, "ramp");

        self.chamber.set_nominal_temperature(target, true).await?;
        self.chamber.start(true).await?;

        let reached = loop {
            let actual = self.chamber.actual_temperature().await?;
            if (actual - target).abs() <= tolerance {
                break actual;
            }
            tracing::debug!("actual {:.2} C, target {:.2} C", actual, target);
            tokio::time::sleep(refresh).await;
        };

        tracing::info!("reached {:.2} C", reached);
        tracing::info!("dwelling for {:.0}'", dwell.as_secs_f64() / 60.0);
        self.enter(CycleState::DwellingAtTarget, "target reached");
        tokio::time::sleep(dwell).await;

        Ok(reached)
    }

    /// Ramp to `target` and hold it for `dwell_minutes` once within `tolerance`.
    ///
    /// The chamber is left running at the target on success. If the wait is
    /// cancelled or a command fails, the chamber is stopped before returning.
    pub async fn ramp_and_dwell(
        &mut self,
        target: f64,
        dwell_minutes: u32,
        tolerance: f64,
        refresh_secs: f64,
        cancel: &CancellationToken,
    ) -> Result<f64, CycleError> {
        let (tolerance, refresh) = parameters(tolerance, refresh_secs)?;
        let dwell = Step::new(target, dwell_minutes).dwell();

        let result = until_cancelled(
            cancel,
            self.ramp_and_dwell_inner(target, dwell, tolerance, refresh),
        )
        .await;

        match result {
            Ok(reached) => Ok(reached),
            Err(cause) => {
                tracing::warn!("ramp to {:.2} C interrupted: {}", target, cause);
                let stopped = self.shut_down(true).await;
                Err(interrupted(cause, stopped))
            }
        }
    }

    async fn run_program(&mut self, program: &CycleProgram, report: &mut CycleReport) -> Result<(), CycleError> {
        let tolerance = program.tolerance();
        let refresh = program.refresh();

        for cycle in 0..program.cycles() {
            tracing::info!("cycle {}", cycle);

            for kind in [StepKind::First, StepKind::Second] {
                let step = program.step(kind);
                if !step.is_active() {
                    continue;
                }
                let started = Local::now();
                let reached = self
                    .ramp_and_dwell_inner(step.temperature, step.dwell(), tolerance, refresh)
                    .await?;
                report.steps.push(StepRun {
                    step: kind,
                    cycle: Some(cycle),
                    target: step.temperature,
                    reached,
                    started,
                });
            }

            report.cycles_completed += 1;
        }

        let last = program.step(StepKind::Final);
        if last.is_active() {
            tracing::info!("final step");
            self.enter(CycleState::FinalStep, "cycles done");
            let started = Local::now();
            let reached = self
                .ramp_and_dwell_inner(last.temperature, last.dwell(), tolerance, refresh)
                .await?;
            report.steps.push(StepRun {
                step: StepKind::Final,
                cycle: None,
                target: last.temperature,
                reached,
                started,
            });
        }

        Ok(())
    }

    async fn shut_down(&mut self, after_failure: bool) -> Result<(), ChamberError> {
        if after_failure {
            tracing::warn!("stopping climate chamber");
        }

        self.enter(CycleState::Stopped, "stop");
        let stopped = self.chamber.stop().await.map(|_| ());
        self.enter(CycleState::Idle, "stopped");

        if let Err(ref e) = stopped {
            tracing::error!("failed to stop the chamber: {}", e);
        }
        stopped
    }

    /// Run a thermal cycling program.
    ///
    /// A busy chamber is left alone unless `force` is set, in which case it is
    /// stopped first. Once started, the chamber is stopped exactly once before
    /// returning, also on cancellation and command failures.
    pub async fn cycle(
        &mut self,
        program: &CycleProgram,
        force: bool,
        cancel: &CancellationToken,
    ) -> Result<CycleReport, CycleError> {
        if self.chamber.ensure_available("perform the thermal cycling", force, true).await? == Gate::Skip {
            return Ok(CycleReport::skipped());
        }

        tracing::info!("thermal cycling");
        tracing::info!("program: {}", program);
        tracing::info!("tolerance: {:.2} C", program.tolerance());

        let mut report = CycleReport::new();
        let result = until_cancelled(cancel, self.run_program(program, &mut report)).await;

        if let Err(ref cause) = result {
            tracing::warn!("thermal cycling interrupted: {}", cause);
        }
        let stopped = self.shut_down(result.is_err()).await;

        match result {
            Ok(()) => stopped.map_err(CycleError::StopFailed)?,
            Err(cause) => return Err(interrupted(cause, stopped)),
        }

        report.finished = Some(Local::now());
        Ok(report)
    }
}
