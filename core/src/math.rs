//! Float primitives not in `core` on the embedded (no `std`) target. `sqrt`,
//! `trunc`, `floor` and `round` all lower to a libm call on targets without a
//! hardware FPU instruction for them (e.g. the Cortex-M0+ in this codebase's
//! boards); on bare metal that symbol only exists if something provides it,
//! so we route through the `libm` crate explicitly instead of the `f32`
//! inherent methods.

#[cfg(target_arch = "x86_64")]
pub fn sqrtf(v: f32) -> f32 {
    v.sqrt()
}

#[cfg(not(target_arch = "x86_64"))]
pub fn sqrtf(v: f32) -> f32 {
    libm::sqrtf(v)
}

#[cfg(target_arch = "x86_64")]
pub fn truncf(v: f32) -> f32 {
    v.trunc()
}

#[cfg(not(target_arch = "x86_64"))]
pub fn truncf(v: f32) -> f32 {
    libm::truncf(v)
}

#[cfg(target_arch = "x86_64")]
pub fn floorf(v: f32) -> f32 {
    v.floor()
}

#[cfg(not(target_arch = "x86_64"))]
pub fn floorf(v: f32) -> f32 {
    libm::floorf(v)
}

#[cfg(target_arch = "x86_64")]
pub fn roundf(v: f32) -> f32 {
    v.round()
}

#[cfg(not(target_arch = "x86_64"))]
pub fn roundf(v: f32) -> f32 {
    libm::roundf(v)
}
