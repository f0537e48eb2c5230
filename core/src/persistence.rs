//! Persistence is an external collaborator (a flash-backed settings store);
//! the core only needs the typed blob shapes and the trait it loads/saves
//! through. Keys mirror the original device's settings prefixes so an
//! adapter can map them onto a real store without re-deriving the layout.

/// Blob stored under the `p2sm_sens` prefix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PersistedSensitivity {
    pub move_coef: f32,
    pub twist_coef: f32,
    pub twist_reversed: bool,
}

/// Blob stored under the `p2sm_accel` prefix.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PersistedAccel {
    pub enabled: bool,
    pub value: f32,
}

/// Settings-store prefix for sensitivity coefficients.
pub const SENS_SETTINGS_PREFIX: &str = "p2sm_sens";
/// Settings-store prefix for the acceleration multiplier.
pub const ACCEL_SETTINGS_PREFIX: &str = "p2sm_accel";

/// External persistence collaborator. Loads are best-effort: a failure or
/// missing value means the caller falls back to defaults, per the mixer's
/// non-fatal `PersistenceIo` handling.
///
/// `load_sensitivity` is responsible for the `global`-vs-legacy key
/// fallback of §3/§6.4: a concrete adapter tries the `global` key first and
/// falls back to the old unnamed key so settings saved by a prior firmware
/// revision still load. The core only ever sees the resolved value.
pub trait PersistenceStore {
    fn load_sensitivity(&mut self) -> Option<PersistedSensitivity>;
    fn save_sensitivity(&mut self, value: PersistedSensitivity) -> Result<(), ()>;

    fn load_accel(&mut self) -> Option<PersistedAccel>;
    fn save_accel(&mut self, value: PersistedAccel) -> Result<(), ()>;
}

#[cfg(any(test, feature = "test-util"))]
pub mod fake {
    use super::*;

    /// In-memory persistence store for tests, with knobs to simulate I/O
    /// failure on the next save.
    #[derive(Default)]
    pub struct FakeStore {
        pub sensitivity: Option<PersistedSensitivity>,
        pub accel: Option<PersistedAccel>,
        pub fail_next_save: bool,
    }

    impl PersistenceStore for FakeStore {
        fn load_sensitivity(&mut self) -> Option<PersistedSensitivity> {
            self.sensitivity
        }

        fn save_sensitivity(&mut self, value: PersistedSensitivity) -> Result<(), ()> {
            if self.fail_next_save {
                self.fail_next_save = false;
                return Err(());
            }
            self.sensitivity = Some(value);
            Ok(())
        }

        fn load_accel(&mut self) -> Option<PersistedAccel> {
            self.accel
        }

        fn save_accel(&mut self, value: PersistedAccel) -> Result<(), ()> {
            if self.fail_next_save {
                self.fail_next_save = false;
                return Err(());
            }
            self.accel = Some(value);
            Ok(())
        }
    }
}
