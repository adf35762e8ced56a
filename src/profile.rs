//! Incubation profiles and the profile engine.
//!
//! A profile is an ordered list of day-range stages, each with its own
//! temperature / humidity / turner policy.  Profiles are data: the nine
//! species presets live in a static table and a JSON library may replace
//! them at runtime, so adding a species never touches control code.
//!
//! ```text
//!   day 1 ─────── 9 │ 10 ─────── 17 │ 18 ──── 21
//!   37.8°C 55% ↻    │ 37.5°C 60% ↻  │ 37.2°C 70%     (chicken)
//! ```

use core::fmt;

use heapless::{String, Vec};
use log::{info, warn};
use serde::{Deserialize, Serialize};

use crate::clock;
use crate::error::CodecError;

pub const MAX_STAGES: usize = 5;
pub const MAX_PROFILES: usize = 9;
pub const PROFILE_NAME_LEN: usize = 24;

// ───────────────────────────────────────────────────────────────
// Profile type
// ───────────────────────────────────────────────────────────────

/// Species preset.  Serialised as its integer code; any unknown code
/// (including the `-1` some documents use) decodes as [`ProfileType::None`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum ProfileType {
    Chicken,
    Goose,
    Quail,
    Duck,
    Manual,
    Turkey,
    Partridge,
    Pigeon,
    Pheasant,
    None,
}

impl ProfileType {
    pub const ALL: [Self; MAX_PROFILES] = [
        Self::Chicken,
        Self::Goose,
        Self::Quail,
        Self::Duck,
        Self::Manual,
        Self::Turkey,
        Self::Partridge,
        Self::Pigeon,
        Self::Pheasant,
    ];

    pub const fn code(self) -> i32 {
        match self {
            Self::Chicken => 0,
            Self::Goose => 1,
            Self::Quail => 2,
            Self::Duck => 3,
            Self::Manual => 4,
            Self::Turkey => 5,
            Self::Partridge => 6,
            Self::Pigeon => 7,
            Self::Pheasant => 8,
            Self::None => 255,
        }
    }

    /// Table index for the species presets; `None` has no slot.
    pub fn index(self) -> Option<usize> {
        Self::ALL.iter().position(|t| *t == self)
    }
}

impl From<i32> for ProfileType {
    fn from(code: i32) -> Self {
        usize::try_from(code)
            .ok()
            .and_then(|i| Self::ALL.get(i).copied())
            .unwrap_or(Self::None)
    }
}

impl From<ProfileType> for i32 {
    fn from(t: ProfileType) -> Self {
        t.code()
    }
}

impl fmt::Display for ProfileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Chicken => "chicken",
            Self::Goose => "goose",
            Self::Quail => "quail",
            Self::Duck => "duck",
            Self::Manual => "manual",
            Self::Turkey => "turkey",
            Self::Partridge => "partridge",
            Self::Pigeon => "pigeon",
            Self::Pheasant => "pheasant",
            Self::None => "none",
        };
        f.write_str(name)
    }
}

// ───────────────────────────────────────────────────────────────
// Stage / profile
// ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProfileStage {
    #[serde(rename = "temp")]
    pub temperature: f32,
    pub humidity: f32,
    pub motor_active: bool,
    pub start_day: u16,
    pub end_day: u16,
}

impl ProfileStage {
    const fn new(start_day: u16, end_day: u16, temperature: f32, humidity: f32, motor: bool) -> Self {
        Self {
            temperature,
            humidity,
            motor_active: motor,
            start_day,
            end_day,
        }
    }

    pub fn contains(&self, day: u16) -> bool {
        day >= self.start_day && day <= self.end_day
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    #[serde(rename = "type")]
    pub profile_type: ProfileType,
    pub name: String<PROFILE_NAME_LEN>,
    pub total_days: u16,
    pub stages: Vec<ProfileStage, MAX_STAGES>,
}

/// Result of a stage lookup.  `fallback` is set when no range contained
/// the day and stage 0 was returned in its place.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageLookup {
    pub index: usize,
    pub stage: ProfileStage,
    pub fallback: bool,
}

impl Profile {
    fn preset(profile_type: ProfileType, name: &str, total_days: u16, stages: &[ProfileStage]) -> Self {
        let mut n = String::new();
        // Preset names are all shorter than the buffer.
        let _ = n.push_str(name);
        Self {
            profile_type,
            name: n,
            total_days,
            stages: stages.iter().copied().take(MAX_STAGES).collect(),
        }
    }

    /// First stage whose `[start_day, end_day]` contains `day`, falling
    /// back to stage 0 with `fallback` set.  `None` only for a profile
    /// without stages.  [`ProfileEngine::update`] never asks for a day past
    /// `total_days`, so a finished run holds its last applied stage.
    pub fn stage_for_day(&self, day: u16) -> Option<StageLookup> {
        if let Some((index, stage)) = self.stages.iter().enumerate().find(|(_, s)| s.contains(day)) {
            return Some(StageLookup {
                index,
                stage: *stage,
                fallback: false,
            });
        }
        self.stages.first().map(|stage| StageLookup {
            index: 0,
            stage: *stage,
            fallback: true,
        })
    }

    /// True when the stages are contiguous and exactly tile `1..=total_days`.
    pub fn tiles_full_range(&self) -> bool {
        let mut next = 1;
        for s in &self.stages {
            if s.start_day != next || s.end_day < s.start_day {
                return false;
            }
            next = s.end_day + 1;
        }
        !self.stages.is_empty() && next == self.total_days + 1
    }
}

// ───────────────────────────────────────────────────────────────
// Species presets
// ───────────────────────────────────────────────────────────────

type Preset = (ProfileType, &'static str, u16, &'static [ProfileStage]);

#[rustfmt::skip]
fn preset_table() -> [Preset; MAX_PROFILES] {
    static CHICKEN: [ProfileStage; 3] = [ProfileStage::new(1, 9, 37.8, 55.0, true), ProfileStage::new(10, 17, 37.5, 60.0, true), ProfileStage::new(18, 21, 37.2, 70.0, false)];
    static GOOSE: [ProfileStage; 3] = [ProfileStage::new(1, 14, 37.7, 60.0, true), ProfileStage::new(15, 24, 37.5, 65.0, true), ProfileStage::new(25, 30, 37.2, 75.0, false)];
    static QUAIL: [ProfileStage; 3] = [ProfileStage::new(1, 6, 37.7, 60.0, true), ProfileStage::new(7, 14, 37.5, 65.0, true), ProfileStage::new(15, 18, 37.2, 75.0, false)];
    static DUCK: [ProfileStage; 3] = [ProfileStage::new(1, 9, 37.7, 65.0, true), ProfileStage::new(10, 24, 37.5, 70.0, true), ProfileStage::new(25, 28, 37.2, 80.0, false)];
    static MANUAL: [ProfileStage; 1] = [ProfileStage::new(1, 21, 37.5, 65.0, true)];
    static TURKEY: [ProfileStage; 3] = [ProfileStage::new(1, 10, 37.8, 58.0, true), ProfileStage::new(11, 24, 37.5, 63.0, true), ProfileStage::new(25, 28, 37.2, 75.0, false)];
    static PARTRIDGE: [ProfileStage; 3] = [ProfileStage::new(1, 8, 37.7, 62.0, true), ProfileStage::new(9, 20, 37.5, 65.0, true), ProfileStage::new(21, 24, 37.2, 72.0, false)];
    static PIGEON: [ProfileStage; 3] = [ProfileStage::new(1, 5, 37.8, 65.0, true), ProfileStage::new(6, 14, 37.5, 60.0, true), ProfileStage::new(15, 18, 37.2, 70.0, false)];
    static PHEASANT: [ProfileStage; 3] = [ProfileStage::new(1, 8, 37.7, 60.0, true), ProfileStage::new(9, 21, 37.5, 55.0, true), ProfileStage::new(22, 25, 37.2, 70.0, false)];
    [
        (ProfileType::Chicken, "Chicken", 21, &CHICKEN),
        (ProfileType::Goose, "Goose", 30, &GOOSE),
        (ProfileType::Quail, "Quail", 18, &QUAIL),
        (ProfileType::Duck, "Duck", 28, &DUCK),
        (ProfileType::Manual, "Manual", 21, &MANUAL),
        (ProfileType::Turkey, "Turkey", 28, &TURKEY),
        (ProfileType::Partridge, "Partridge", 24, &PARTRIDGE),
        (ProfileType::Pigeon, "Pigeon", 18, &PIGEON),
        (ProfileType::Pheasant, "Pheasant", 25, &PHEASANT),
    ]
}

/// The full set of selectable profiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileLibrary {
    pub profiles: Vec<Profile, MAX_PROFILES>,
}

impl Default for ProfileLibrary {
    fn default() -> Self {
        Self::presets()
    }
}

impl ProfileLibrary {
    pub fn presets() -> Self {
        let profiles = preset_table()
            .iter()
            .map(|(t, name, days, stages)| Profile::preset(*t, name, *days, stages))
            .collect();
        Self { profiles }
    }

    pub fn get(&self, profile_type: ProfileType) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.profile_type == profile_type)
    }

    fn get_mut(&mut self, profile_type: ProfileType) -> Option<&mut Profile> {
        self.profiles.iter_mut().find(|p| p.profile_type == profile_type)
    }

    /// Parse a stored library.  Entries with no stages are dropped; if
    /// nothing usable remains the presets are returned.
    pub fn from_json(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut lib: Self = serde_json::from_slice(bytes).map_err(|_| CodecError::Json)?;
        lib.profiles.retain(|p| !p.stages.is_empty() && p.profile_type != ProfileType::None);
        if lib.profiles.is_empty() {
            warn!("Profile: stored library empty, using presets");
            return Ok(Self::presets());
        }
        Ok(lib)
    }

    pub fn to_json(&self) -> Result<std::vec::Vec<u8>, CodecError> {
        serde_json::to_vec(self).map_err(|_| CodecError::Json)
    }
}

// ───────────────────────────────────────────────────────────────
// Profile engine
// ───────────────────────────────────────────────────────────────

/// Targets the engine hands to the environmental controller.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageTargets {
    pub temperature: f32,
    pub humidity: f32,
    pub motor_active: bool,
}

impl From<ProfileStage> for StageTargets {
    fn from(s: ProfileStage) -> Self {
        Self {
            temperature: s.temperature,
            humidity: s.humidity,
            motor_active: s.motor_active,
        }
    }
}

/// Emitted by [`ProfileEngine::update`] on a stage transition.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StageChange {
    pub profile: ProfileType,
    pub day: u32,
    pub from_stage: Option<usize>,
    pub to_stage: usize,
    pub targets: StageTargets,
}

pub struct ProfileEngine {
    library: ProfileLibrary,
    active: ProfileType,
    current_stage: Option<usize>,
}

impl Default for ProfileEngine {
    fn default() -> Self {
        Self::new(ProfileLibrary::presets())
    }
}

impl ProfileEngine {
    pub fn new(library: ProfileLibrary) -> Self {
        Self {
            library,
            active: ProfileType::None,
            current_stage: None,
        }
    }

    pub fn library(&self) -> &ProfileLibrary {
        &self.library
    }

    pub fn set_library(&mut self, library: ProfileLibrary) {
        self.library = library;
        self.current_stage = None;
    }

    pub fn active_type(&self) -> ProfileType {
        self.active
    }

    /// Select the active profile without touching the timeline (used on
    /// boot and after a recovery restore).
    pub fn set_active(&mut self, profile_type: ProfileType) {
        if self.active != profile_type {
            self.current_stage = None;
        }
        self.active = profile_type;
    }

    pub fn current_profile(&self) -> Option<&Profile> {
        self.library.get(self.active)
    }

    pub fn current_stage_index(&self) -> Option<usize> {
        self.current_stage
    }

    /// Stage lookup on the active profile for an explicit day.
    pub fn current_stage(&self, day: u16) -> Option<StageLookup> {
        self.current_profile()?.stage_for_day(day)
    }

    /// Begin a run: returns the first-stage targets the caller must persist
    /// together with `start_time = now`.
    pub fn start(&mut self, profile_type: ProfileType) -> Option<(StageTargets, u16)> {
        let profile = self.library.get(profile_type)?;
        let first = *profile.stages.first()?;
        let total_days = profile.total_days;
        self.active = profile_type;
        self.current_stage = Some(0);
        info!("Profile: started {} ({} days)", profile_type, total_days);
        Some((first.into(), total_days))
    }

    pub fn end(&mut self) {
        info!("Profile: incubation ended ({})", self.active);
        self.active = ProfileType::None;
        self.current_stage = None;
    }

    /// Recompute the stage for the elapsed run.  Returns a change only when
    /// the stage index moved; days outside `1..=total_days` are ignored.
    pub fn update(&mut self, start_time: u32, now: u32) -> Option<StageChange> {
        if start_time == 0 || self.active == ProfileType::None {
            return None;
        }
        let day = clock::incubation_day(start_time, now);
        let profile = self.library.get(self.active)?;
        if day == 0 || day > u32::from(profile.total_days) {
            return None;
        }
        let lookup = profile.stage_for_day(day as u16)?;
        if self.current_stage == Some(lookup.index) {
            return None;
        }
        let change = StageChange {
            profile: self.active,
            day,
            from_stage: self.current_stage,
            to_stage: lookup.index,
            targets: lookup.stage.into(),
        };
        self.current_stage = Some(lookup.index);
        info!(
            "Profile: day {} -> stage {} ({:.1}C / {:.0}%)",
            day,
            lookup.index + 1,
            lookup.stage.temperature,
            lookup.stage.humidity
        );
        Some(change)
    }

    /// Days left including today, 0 when no run is active.
    pub fn remaining_days(&self, start_time: u32, now: u32) -> u32 {
        let Some(profile) = self.current_profile() else {
            return 0;
        };
        let day = clock::incubation_day(start_time, now);
        if day == 0 {
            return 0;
        }
        (u32::from(profile.total_days) + 1).saturating_sub(day)
    }

    /// Replace one stage's targets on a profile (operator override).
    pub fn set_stage_override(
        &mut self,
        profile_type: ProfileType,
        stage: usize,
        targets: StageTargets,
    ) -> bool {
        let Some(profile) = self.library.get_mut(profile_type) else {
            return false;
        };
        let Some(s) = profile.stages.get_mut(stage) else {
            return false;
        };
        s.temperature = targets.temperature;
        s.humidity = targets.humidity;
        s.motor_active = targets.motor_active;
        if profile_type == self.active && self.current_stage == Some(stage) {
            // Force the next update to push the new targets.
            self.current_stage = None;
        }
        info!("Profile: override {} stage {}", profile_type, stage + 1);
        true
    }
}
