//! PMW3360-class register map and tracking firmware (SROM) image.
//!
//! The SROM image is a vendor-supplied binary blob uploaded to the sensor on
//! every power-up (see `Trackball::upload_fw`); PixArt does not permit
//! redistributing it in public source trees, so boards that ship this sensor
//! vendor it out-of-tree and splice it in at build time. Left empty here:
//! `upload_fw` still runs the handshake sequence correctly against an empty
//! image, it just doesn't load a cursor-motion firmware onto the sensor, so
//! `check_signature`'s SROM-ID/product-ID read will not match until a real
//! image is supplied.
pub static SROM_TRACKING_FW: &[u8] = &[];

/// PMW3360-class register addresses used by this driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Register {
    ProductId = 0x00,
    Motion = 0x02,
    DeltaXL = 0x03,
    DeltaXH = 0x04,
    DeltaYL = 0x05,
    DeltaYH = 0x06,
    Config1 = 0x0F,
    Config2 = 0x10,
    AngleTune = 0x11,
    SromEnable = 0x13,
    SromId = 0x2A,
    PowerUpReset = 0x3A,
    InverseProductId = 0x3F,
    MotionBurst = 0x50,
    SromLoadBurst = 0x62,
    LiftConfig = 0x63,
}
