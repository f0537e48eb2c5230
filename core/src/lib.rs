//! Fusion core for the two-sensor ball mixer.
//!
//! Combines relative motion reports from two optical sensors mounted on a
//! spherical trackball into pointer motion and scroll-wheel events. Built to
//! run equally on an embedded target (`no_std`) and on the host for testing.
#![cfg_attr(not(target_arch = "x86_64"), no_std)]

mod log;
mod math;

pub mod accumulator;
pub mod config;
pub mod error;
pub mod feedback;
pub mod geometry;
pub mod mixer;
pub mod persistence;
pub mod pointer;
pub mod scheduler;
pub mod sensitivity;
pub mod twist;

pub use config::{BallConfig, BehaviorConfig, Tunables};
pub use error::MixerError;
pub use mixer::{EventSink, Mixer};
pub use persistence::{PersistedAccel, PersistedSensitivity, PersistenceStore};
pub use scheduler::{Scheduler, WorkHandle};
pub use sensitivity::SensitivityStore;

/// Sensor identifier: which of the two mounted sensors produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorId {
    One,
    Two,
}

/// Axis of a relative motion event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Axis {
    X,
    Y,
}

/// Output axis of an emitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OutAxis {
    RelX,
    RelY,
    RelWheel,
}

/// Direction of a sensitivity/acceleration adjustment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Direction {
    Inc,
    Dec,
}

/// Which coefficient a sensitivity adjustment targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Scope {
    Pointer,
    Scroll,
}

/// Three-state toggle action as used by shell/keymap commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ToggleAction {
    Enable,
    Disable,
    Toggle,
}
