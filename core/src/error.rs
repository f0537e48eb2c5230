//! Error taxonomy for the ball mixer.
//!
//! Only [`MixerError::ConfigInvalid`] and [`MixerError::AlreadyInitialized`]
//! are ever returned as `Err` from a public constructor. The other three
//! kinds are not fatal: callers that hit them log and fall back to a
//! default, per the propagation policy of the mixer design.

#[cfg(not(target_arch = "x86_64"))]
use core::fmt;
#[cfg(target_arch = "x86_64")]
use std::fmt;

/// What was wrong with a [`crate::BallConfig`] or [`crate::BehaviorConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigField {
    BallRadius,
    SensorPositionsCoincide,
    BehaviorStep,
    BehaviorMinStep,
    BehaviorMaxStep,
    BehaviorMaxMultiplier,
    BehaviorMinGeMax,
}

/// Errors produced by the mixer core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MixerError {
    /// A `BallConfig` or `BehaviorConfig` failed validation at construction time.
    ConfigInvalid(ConfigField),
    /// Sensor positions are (anti)parallel to the ball-frame axis; the
    /// rotation matrix could not be derived and was left unchanged.
    DegenerateGeometry(crate::SensorId),
    /// A second `Mixer` was constructed while one already exists.
    AlreadyInitialized,
    /// A sensitivity getter/setter was invoked before the mixer was initialized.
    NotInitialized,
    /// A persistence load or save failed.
    PersistenceIo,
}

impl fmt::Display for MixerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MixerError::ConfigInvalid(field) => write!(f, "invalid configuration: {:?}", field),
            MixerError::DegenerateGeometry(sensor) => {
                write!(f, "degenerate geometry for sensor {:?}", sensor)
            }
            MixerError::AlreadyInitialized => write!(f, "mixer already initialized"),
            MixerError::NotInitialized => write!(f, "mixer not initialized"),
            MixerError::PersistenceIo => write!(f, "persistence I/O error"),
        }
    }
}

#[cfg(target_arch = "x86_64")]
impl std::error::Error for MixerError {}
