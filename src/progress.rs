//! Nested process/iteration timing with ETA estimates.
//!
//! A [`ProgressTracker`] holds one [`ProcessInfo`] per named phase. Each
//! phase goes *not started → started → (iterating) → finished*. While
//! iterating, every [`next_iteration`](ProgressTracker::next_iteration)
//! closes the current slot and refreshes the running average and the
//! remaining-time estimate:
//!
//! ```text
//! average   = sum(finished durations) / finished count
//! pending   = pending - 1
//! remaining = pending × average
//! ```
//!
//! Every transition is broadcast to an optional observer as
//! `(event, process name, full state)`. The tracker is bookkeeping only;
//! nothing in the pipeline branches on it.

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProgressError {
    #[error("missing process name")]
    MissingName,
    #[error("process {0} already started")]
    AlreadyStarted(String),
    #[error("process {0} already finished")]
    AlreadyFinished(String),
    #[error("unknown process {0}")]
    Unknown(String),
    #[error("process {0}: iteration ended before iterations were started")]
    IterationsNotStarted(String),
    #[error("process {0}: current iteration slot is missing")]
    MissingIteration(String),
    #[error("process {0}: no pending iterations left")]
    NoPendingIterations(String),
}

/// Source of monotonic timestamps, relative to an arbitrary origin.
pub trait Clock: Send + Sync {
    fn now(&self) -> Duration;
}

/// Wall clock measured from tracker creation.
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

fn millis<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis() as u64)
}

fn opt_millis<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
    match d {
        Some(d) => millis(d, s),
        None => s.serialize_none(),
    }
}

/// Timing of one iteration slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IterationInfo {
    #[serde(serialize_with = "millis")]
    pub start: Duration,
    #[serde(serialize_with = "opt_millis")]
    pub end: Option<Duration>,
    #[serde(serialize_with = "millis")]
    pub duration: Duration,
}

impl IterationInfo {
    fn open(now: Duration) -> Self {
        Self {
            start: now,
            end: None,
            duration: Duration::ZERO,
        }
    }

    fn finish(&mut self, now: Duration) {
        if self.end.is_none() {
            self.end = Some(now);
            self.duration = now.saturating_sub(self.start);
        }
    }
}

/// Timing and ETA for one named phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProcessInfo {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(serialize_with = "millis")]
    pub start: Duration,
    #[serde(serialize_with = "opt_millis")]
    pub end: Option<Duration>,
    #[serde(serialize_with = "millis")]
    pub duration: Duration,
    pub itmax: usize,
    pub iterations: Vec<IterationInfo>,
    pub itcurrent: usize,
    pub itpending: usize,
    #[serde(serialize_with = "millis")]
    pub averagetime: Duration,
    #[serde(serialize_with = "millis")]
    pub remainingtime: Duration,
    #[serde(skip)]
    iterating: bool,
}

impl ProcessInfo {
    fn new(name: &str, comment: Option<&str>, now: Duration) -> Self {
        Self {
            name: name.to_string(),
            comment: comment.map(str::to_string),
            start: now,
            end: None,
            duration: Duration::ZERO,
            itmax: 0,
            iterations: Vec::new(),
            itcurrent: 0,
            itpending: 0,
            averagetime: Duration::ZERO,
            remainingtime: Duration::ZERO,
            iterating: false,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.end.is_some()
    }

    fn finished_iterations(&self) -> impl Iterator<Item = &IterationInfo> {
        self.iterations.iter().filter(|it| it.end.is_some())
    }
}

/// All phases of a run, by name.
pub type ProcessState = BTreeMap<String, ProcessInfo>;

/// Transition kinds broadcast to the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    StartProcess,
    EndProcess,
    StartIteration,
    NextIteration,
    EndIteration,
}

impl ProgressEvent {
    pub fn as_str(self) -> &'static str {
        match self {
            ProgressEvent::StartProcess => "start-process",
            ProgressEvent::EndProcess => "end-process",
            ProgressEvent::StartIteration => "start-iteration",
            ProgressEvent::NextIteration => "next-iteration",
            ProgressEvent::EndIteration => "end-iteration",
        }
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type Observer = Box<dyn Fn(ProgressEvent, &str, &ProcessState) + Send + Sync>;

pub struct ProgressTracker {
    clock: Box<dyn Clock>,
    state: ProcessState,
    observer: Option<Observer>,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::with_clock(Box::new(SystemClock::new()))
    }

    pub fn with_clock(clock: Box<dyn Clock>) -> Self {
        Self {
            clock,
            state: ProcessState::new(),
            observer: None,
        }
    }

    pub fn set_observer(&mut self, observer: Observer) {
        self.observer = Some(observer);
    }

    pub fn state(&self) -> &ProcessState {
        &self.state
    }

    pub fn into_state(self) -> ProcessState {
        self.state
    }

    pub fn process(&self, name: &str) -> Option<&ProcessInfo> {
        self.state.get(name)
    }

    fn broadcast(&self, event: ProgressEvent, name: &str) {
        if let Some(observer) = &self.observer {
            observer(event, name, &self.state);
        }
    }

    fn active(&mut self, name: &str) -> Result<&mut ProcessInfo, ProgressError> {
        if name.is_empty() {
            return Err(ProgressError::MissingName);
        }
        let info = self
            .state
            .get_mut(name)
            .ok_or_else(|| ProgressError::Unknown(name.to_string()))?;
        if info.is_finished() {
            return Err(ProgressError::AlreadyFinished(name.to_string()));
        }
        Ok(info)
    }

    /// Begin a phase. Rejected, with state untouched, if already started.
    pub fn start_process(&mut self, name: &str, comment: Option<&str>) -> Result<(), ProgressError> {
        if name.is_empty() {
            return Err(ProgressError::MissingName);
        }
        if self.state.contains_key(name) {
            return Err(ProgressError::AlreadyStarted(name.to_string()));
        }
        let now = self.clock.now();
        self.state
            .insert(name.to_string(), ProcessInfo::new(name, comment, now));
        self.broadcast(ProgressEvent::StartProcess, name);
        Ok(())
    }

    /// Finish a phase. Pending iterations are reported but do not fail.
    pub fn end_process(&mut self, name: &str) -> Result<(), ProgressError> {
        let now = self.clock.now();
        let info = self.active(name)?;
        if let Some(slot) = info.iterations.get_mut(info.itcurrent) {
            slot.finish(now);
        }
        info.end = Some(now);
        info.duration = now.saturating_sub(info.start);
        if info.iterating && info.itpending > 0 {
            warn!(
                process = name,
                pending = info.itpending,
                "finishing process with pending iterations"
            );
        }
        self.broadcast(ProgressEvent::EndProcess, name);
        Ok(())
    }

    /// Declare `count` iterations and open the first slot.
    pub fn start_iterations(&mut self, name: &str, count: usize) -> Result<(), ProgressError> {
        let now = self.clock.now();
        let info = self.active(name)?;
        info.iterating = true;
        info.itmax = count;
        info.itpending = count;
        info.itcurrent = 0;
        info.averagetime = Duration::ZERO;
        info.remainingtime = Duration::ZERO;
        info.iterations = vec![IterationInfo::open(now)];
        self.broadcast(ProgressEvent::StartIteration, name);
        Ok(())
    }

    /// Close the current slot, refresh the ETA and open the next slot.
    pub fn next_iteration(&mut self, name: &str) -> Result<(), ProgressError> {
        let now = self.clock.now();
        let info = self.active(name)?;
        if !info.iterating {
            return Err(ProgressError::IterationsNotStarted(name.to_string()));
        }
        if info.itpending == 0 {
            return Err(ProgressError::NoPendingIterations(name.to_string()));
        }
        let slot = info
            .iterations
            .get_mut(info.itcurrent)
            .ok_or_else(|| ProgressError::MissingIteration(name.to_string()))?;
        slot.finish(now);

        let (sum, finished) = info
            .finished_iterations()
            .fold((Duration::ZERO, 0u32), |(sum, n), it| (sum + it.duration, n + 1));
        info.averagetime = sum / finished.max(1);
        info.itpending -= 1;
        info.remainingtime = info.averagetime * info.itpending as u32;
        info.itcurrent += 1;
        info.iterations.push(IterationInfo::open(now));

        self.broadcast(ProgressEvent::NextIteration, name);
        Ok(())
    }

    /// Close the current slot without opening another.
    pub fn end_iteration(&mut self, name: &str) -> Result<(), ProgressError> {
        let now = self.clock.now();
        let info = self.active(name)?;
        if !info.iterating {
            return Err(ProgressError::IterationsNotStarted(name.to_string()));
        }
        let slot = info
            .iterations
            .get_mut(info.itcurrent)
            .ok_or_else(|| ProgressError::MissingIteration(name.to_string()))?;
        slot.finish(now);
        self.broadcast(ProgressEvent::EndIteration, name);
        Ok(())
    }
}
