//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter        | Implements         | Connects to                 |
//! |----------------|--------------------|-----------------------------|
//! | `hardware`     | SensorPort         | SHT31 ×2 on I2C             |
//! |                | ClockPort          | DS3231 on I2C               |
//! |                | ActuatorPort       | Relay and buzzer GPIOs      |
//! | `log_sink`     | EventSink          | Serial log output           |
//! | `nvs`          | ConfigPort         | NVS / in-memory store       |
//! |                | StoragePort        |                             |
//! | `time`         | (none)             | ESP32 high-resolution timer |

pub mod hardware;
pub mod log_sink;
pub mod nvs;
pub mod time;
