//! Dual-targeted structured logging: `defmt` on the embedded target (gated
//! behind the `defmt` feature so a bare `no_std` build without it still
//! links), the `log` facade on host test builds. Mirrors the shape `utils`
//! uses for the rest of this codebase so a reader sees the same pattern at
//! every layer.

#[cfg(all(not(target_arch = "x86_64"), feature = "defmt"))]
pub use defmt::{debug, error, info, trace, warn};

#[cfg(target_arch = "x86_64")]
pub use log::{debug, error, info, trace, warn};

#[cfg(all(not(target_arch = "x86_64"), not(feature = "defmt")))]
pub use crate::{debug, error, info, trace, warn};

#[cfg(all(not(target_arch = "x86_64"), not(feature = "defmt")))]
#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => {{}};
}

#[cfg(all(not(target_arch = "x86_64"), not(feature = "defmt")))]
#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => {{}};
}

#[cfg(all(not(target_arch = "x86_64"), not(feature = "defmt")))]
#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => {{}};
}

#[cfg(all(not(target_arch = "x86_64"), not(feature = "defmt")))]
#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => {{}};
}

#[cfg(all(not(target_arch = "x86_64"), not(feature = "defmt")))]
#[macro_export]
macro_rules! trace {
    ($($arg:tt)*) => {{}};
}
