//! Solid-state relay outputs for heater, humidifier and egg turner.
//!
//! The driver remembers the commanded level so reads never touch the
//! pin.  Relay statistics (on-time, activations) are a domain concern
//! and live in the controller.
//!
//! ## Dual-target design
//!
//! On ESP-IDF: drives GPIO via hw_init helpers.
//! On host/test: tracks state in-memory only.

use log::debug;

use crate::drivers::hw_init;
use crate::pins;

pub struct Relay {
    name: &'static str,
    gpio: i32,
    on: bool,
}

impl Relay {
    pub const fn new(name: &'static str, gpio: i32) -> Self {
        Self {
            name,
            gpio,
            on: false,
        }
    }

    pub fn set(&mut self, on: bool) {
        let level = if pins::RELAY_ACTIVE_HIGH { on } else { !on };
        hw_init::gpio_write(self.gpio, level);
        if self.on != on {
            debug!("Relay: {} {}", self.name, if on { "on" } else { "off" });
        }
        self.on = on;
    }

    pub fn is_on(&self) -> bool {
        self.on
    }
}

/// The three incubator relays.
pub struct RelayBank {
    pub heater: Relay,
    pub humidifier: Relay,
    pub turner: Relay,
}

impl Default for RelayBank {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayBank {
    pub const fn new() -> Self {
        Self {
            heater: Relay::new("heater", pins::RELAY_HEATER_GPIO),
            humidifier: Relay::new("humidifier", pins::RELAY_HUMIDIFIER_GPIO),
            turner: Relay::new("turner", pins::RELAY_TURNER_GPIO),
        }
    }

    /// Every relay is written even if it already reads off.
    pub fn all_off(&mut self) {
        self.heater.set(false);
        self.humidifier.set(false);
        self.turner.set(false);
    }
}
