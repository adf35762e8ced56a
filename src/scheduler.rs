//! Cooperative periodic scheduler.
//!
//! The main loop is a single round-robin: every iteration asks the
//! scheduler which tasks are due and runs them in table order.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      Task table                              │
//! │                                                              │
//! │  Sensors ─▶ Control ─▶ Alarm ─▶ Profile ─▶ DataLog ─▶        │
//! │  Snapshot ─▶ Housekeeping                                    │
//! │        │                                                     │
//! │        ▼                                                     │
//! │   due(now) ──▶ AppService::tick() runs each task once        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The control period is adaptive: the controller pushes its current
//! interval back through [`Scheduler::set_period`] after each run.

use heapless::Vec as BoundedVec;
use log::{debug, info};

use crate::config::SystemConfig;

// ═══════════════════════════════════════════════════════════════
//  Task types
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Read and fuse both sensors.
    Sensors,
    /// Heater PWM, humidity and turner.
    Control,
    /// Alarm evaluation.
    Alarm,
    /// Stage transitions of the active profile.
    Profile,
    /// Append a sample to the data log.
    DataLog,
    /// Recovery snapshot and power-on heartbeat.
    Snapshot,
    /// Memory guard, metrics, log flush.
    Housekeeping,
}

impl Task {
    pub const ALL: [Self; TASK_COUNT] = [
        Self::Sensors,
        Self::Control,
        Self::Alarm,
        Self::Profile,
        Self::DataLog,
        Self::Snapshot,
        Self::Housekeeping,
    ];

    const fn slot(self) -> usize {
        self as usize
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Sensors => "sensors",
            Self::Control => "control",
            Self::Alarm => "alarm",
            Self::Profile => "profile",
            Self::DataLog => "datalog",
            Self::Snapshot => "snapshot",
            Self::Housekeeping => "housekeeping",
        }
    }
}

pub const TASK_COUNT: usize = 7;

/// Housekeeping period (ms).
pub const HOUSEKEEPING_INTERVAL_MS: u32 = 10_000;

/// Tasks due in one loop iteration, in table order.
pub type DueTasks = BoundedVec<Task, TASK_COUNT>;

// ═══════════════════════════════════════════════════════════════
//  Scheduler engine
// ═══════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
struct TaskEntry {
    period_ms: u32,
    last_run_ms: Option<u64>,
    enabled: bool,
}

impl TaskEntry {
    fn is_due(&self, now_ms: u64) -> bool {
        self.enabled
            && self
                .last_run_ms
                .is_none_or(|last| now_ms.saturating_sub(last) >= u64::from(self.period_ms))
    }
}

pub struct Scheduler {
    entries: [TaskEntry; TASK_COUNT],
    enabled: bool,
}

impl Scheduler {
    /// Task table with the periods from `config`.  Every task is due on
    /// the first iteration.
    pub fn new(config: &SystemConfig) -> Self {
        let period = |task: Task| match task {
            Task::Sensors => config.sensor_read_interval_ms,
            Task::Control => config.control_interval_max_ms,
            Task::Alarm => config.alarm_interval_ms,
            Task::Profile => config.profile_interval_ms,
            Task::DataLog => config.datalog_interval_ms,
            Task::Snapshot => config.snapshot_interval_ms,
            Task::Housekeeping => HOUSEKEEPING_INTERVAL_MS,
        };
        Self {
            entries: Task::ALL.map(|t| TaskEntry {
                period_ms: period(t),
                last_run_ms: None,
                enabled: true,
            }),
            enabled: true,
        }
    }

    pub fn period(&self, task: Task) -> u32 {
        self.entries[task.slot()].period_ms
    }

    pub fn set_period(&mut self, task: Task, period_ms: u32) {
        let entry = &mut self.entries[task.slot()];
        if entry.period_ms != period_ms {
            debug!("Scheduler: {} every {} ms", task.label(), period_ms);
            entry.period_ms = period_ms;
        }
    }

    pub fn set_task_enabled(&mut self, task: Task, enabled: bool) {
        self.entries[task.slot()].enabled = enabled;
        info!(
            "Scheduler: {} {}",
            task.label(),
            if enabled { "enabled" } else { "disabled" }
        );
    }

    pub fn is_task_enabled(&self, task: Task) -> bool {
        self.entries[task.slot()].enabled
    }

    /// Enable or disable the entire scheduler.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Make `task` due on the next call to [`due`](Self::due).
    pub fn trigger(&mut self, task: Task) {
        self.entries[task.slot()].last_run_ms = None;
    }

    /// Collect the tasks due at `now_ms` and mark them as run.
    pub fn due(&mut self, now_ms: u64) -> DueTasks {
        let mut due = DueTasks::new();
        if !self.enabled {
            return due;
        }
        for task in Task::ALL {
            let entry = &mut self.entries[task.slot()];
            if entry.is_due(now_ms) {
                entry.last_run_ms = Some(now_ms);
                let _ = due.push(task);
            }
        }
        due
    }

    /// Milliseconds until the next task is due, for sleeping between
    /// iterations.
    pub fn next_due_in(&self, now_ms: u64) -> u64 {
        if !self.enabled {
            return u64::from(HOUSEKEEPING_INTERVAL_MS);
        }
        self.entries
            .iter()
            .filter(|e| e.enabled)
            .map(|e| match e.last_run_ms {
                Some(last) => (last + u64::from(e.period_ms)).saturating_sub(now_ms),
                None => 0,
            })
            .min()
            .unwrap_or(u64::from(HOUSEKEEPING_INTERVAL_MS))
    }
}

// ═══════════════════════════════════════════════════════════════
//  Tests
// ═══════════════════════════════════════════════════════════════

#[cfg(test)]
mod tests {
    use super::*;

    fn sched() -> Scheduler {
        Scheduler::new(&SystemConfig::default())
    }

    #[test]
    fn everything_due_on_first_iteration() {
        let mut s = sched();
        assert_eq!(s.due(0).as_slice(), &Task::ALL);
        assert!(s.due(1).is_empty());
    }

    #[test]
    fn periodic_fires_at_interval() {
        let mut s = sched();
        s.due(0);
        assert!(!s.due(1_999).contains(&Task::Sensors));
        let due = s.due(2_000);
        assert!(due.contains(&Task::Sensors));
        assert!(due.contains(&Task::Control));
        assert!(!due.contains(&Task::Alarm));
        assert!(s.due(5_000).contains(&Task::Alarm));
    }

    #[test]
    fn adaptive_control_period() {
        let mut s = sched();
        s.due(0);
        s.set_period(Task::Control, 500);
        assert_eq!(s.period(Task::Control), 500);
        assert_eq!(s.due(500).as_slice(), &[Task::Control]);
    }

    #[test]
    fn trigger_forces_run() {
        let mut s = sched();
        s.due(0);
        s.trigger(Task::Snapshot);
        assert_eq!(s.due(10).as_slice(), &[Task::Snapshot]);
    }

    #[test]
    fn disabled_task_and_scheduler() {
        let mut s = sched();
        s.set_task_enabled(Task::DataLog, false);
        assert!(!s.due(0).contains(&Task::DataLog));
        s.set_enabled(false);
        assert!(s.due(1_000_000).is_empty());
    }

    #[test]
    fn next_due_in_reports_nearest() {
        let mut s = sched();
        assert_eq!(s.next_due_in(0), 0);
        s.due(0);
        assert_eq!(s.next_due_in(1_500), 500);
    }
}
