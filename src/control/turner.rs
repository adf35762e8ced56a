//! Egg-turner scheduling.
//!
//! The motor runs for `duration`, then rests until `interval` has elapsed
//! since its last activation.  Natural completion and manual stop both
//! restart the interval clock.

use log::info;

use crate::config::TurnerSettings;

/// What [`Turner::update`] did this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnerAction {
    Started,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct Turner {
    settings: TurnerSettings,
    enabled: bool,
    running: bool,
    last_activation_ms: u64,
    running_until_ms: u64,
}

impl Turner {
    /// The first periodic turn falls one full interval after `now_ms`.
    pub fn new(settings: TurnerSettings, enabled: bool, now_ms: u64) -> Self {
        Self {
            settings,
            enabled,
            running: false,
            last_activation_ms: now_ms,
            running_until_ms: 0,
        }
    }

    pub fn settings(&self) -> TurnerSettings {
        self.settings
    }

    pub fn set_settings(&mut self, settings: TurnerSettings) {
        self.settings = settings;
        info!(
            "Control: turner {:.1}s every {:.1}min",
            settings.duration as f32 / 1000.0,
            settings.interval as f32 / 60_000.0
        );
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Periodic turning on/off.  Manual control is unaffected.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn update(&mut self, now_ms: u64) -> Option<TurnerAction> {
        if self.running {
            if now_ms >= self.running_until_ms {
                self.running = false;
                self.last_activation_ms = now_ms;
                info!("Control: turner stopped, next turn in {} min", self.settings.interval / 60_000);
                return Some(TurnerAction::Stopped);
            }
            return None;
        }
        if self.enabled
            && now_ms.saturating_sub(self.last_activation_ms) >= u64::from(self.settings.interval)
        {
            self.start(now_ms);
            return Some(TurnerAction::Started);
        }
        None
    }

    fn start(&mut self, now_ms: u64) {
        self.running = true;
        self.last_activation_ms = now_ms;
        self.running_until_ms = now_ms + u64::from(self.settings.duration);
        info!("Control: turner running for {} s", self.settings.duration / 1000);
    }

    /// Manual control.  Turning on takes the periodic path; turning off
    /// restarts the interval clock.
    pub fn manual(&mut self, on: bool, now_ms: u64) {
        if on {
            self.start(now_ms);
        } else {
            self.running = false;
            self.last_activation_ms = now_ms;
            info!("Control: turner stopped manually");
        }
    }

    /// Whole minutes until the next periodic turn, 0 when due.
    pub fn countdown_minutes(&self, now_ms: u64) -> u32 {
        let since = now_ms.saturating_sub(self.last_activation_ms);
        let interval = u64::from(self.settings.interval);
        if since >= interval {
            return 0;
        }
        ((interval - since) / 60_000) as u32
    }
}
