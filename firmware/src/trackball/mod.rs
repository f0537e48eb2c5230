#![allow(dead_code)]

use embassy_futures::select::{select4, Either4};
use embassy_rp::gpio::Output;
use embassy_rp::peripherals::{SPI0, SPI1, USB};
use embassy_rp::spi::{Async, Error as SpiError, Instance as SpiInstance, Mode, Spi};
use embassy_rp::usb::Driver;
use embassy_sync::{blocking_mutex::raw::ThreadModeRawMutex, channel::Channel};
use embassy_time::{Duration, Ticker, Timer};
use embassy_usb::class::hid::HidWriter;
use embedded_hal::spi::SpiBus;
use p2sm_core::{
    Axis, BallConfig, Direction, EventSink, Mixer, OutAxis, Scheduler, Scope, SensorId,
    ToggleAction, Tunables, WorkHandle,
};
use utils::log::{error, info};

use crate::hid::MouseReport;

mod firmware;

use firmware::Register;

/// Maximum number of commands in the channel
pub const NB_CMD: usize = 64;

/// Channel to send CPI commands to either sensor
pub static SENSOR_CMD_CHANNEL: Channel<ThreadModeRawMutex, SensorCommand, NB_CMD> = Channel::new();

/// Channel carrying pointer/twist adjustment commands from the keymap into
/// the mixer task.
pub static MIXER_CMD_CHANNEL: Channel<ThreadModeRawMutex, MixerCommand, 16> = Channel::new();

/// Channel carrying the current mouse-button bitmask, set from keymap
/// custom-event handlers in `core.rs`. Buttons aren't otherwise fused by
/// the mixer; they're merged into the same HID report here because this
/// task owns the pointer's HID endpoint.
pub static BUTTON_CHANNEL: Channel<ThreadModeRawMutex, u8, 4> = Channel::new();

const DEFAULT_CPI: u16 = 800;

/// Default angle tune value, the sensor will be turned 32 degrees
const DEFAULT_ANGLE_TUNE: u8 = 32;

/// Sensor refresh rate, in ms. Drives both the sensor poll and the mixer
/// tick; the mixer's own `sync_report_ms`/`sync_scroll_report_ms` tunables
/// further decimate this into pointer/scroll report cadences.
const REFRESH_RATE_MS: u64 = 4;

/// Ball radius, in millimeters. Its absolute value doesn't matter for the
/// fusion math, only that both sensor mount vectors below are expressed
/// relative to the same sphere.
const BALL_RADIUS_MM: f32 = 8.0;

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorCommand {
    IncreaseCpi,
    DecreaseCpi,
}

/// Commands forwarded from keymap custom events to the mixer's
/// action-command facade.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MixerCommand {
    Adjust { scope: Scope, direction: Direction },
    AdjustAccel { direction: Direction },
    ToggleAccel(ToggleAction),
    ToggleTwist,
    ToggleTwistReverse,
}

#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BurstData {
    pub motion: bool,
    pub dx: i16,
    pub dy: i16,
}

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TrackballError {
    InvalidSignature,
    Spi(SpiError),
}
impl From<SpiError> for TrackballError {
    fn from(e: SpiError) -> Self {
        TrackballError::Spi(e)
    }
}

pub struct Trackball<'a, T: SpiInstance, M: Mode> {
    /// The SPI bus
    spi: Spi<'a, T, M>,
    /// The CS pin
    cs: Output<'a>,
    // in_burst is set if any writes or reads were performed
    in_burst: bool,
}

pub type TrackballDev0 = Trackball<'static, SPI0, Async>;
pub type TrackballDev1 = Trackball<'static, SPI1, Async>;

impl<'a, I: SpiInstance, M: Mode> Trackball<'a, I, M> {
    /// Create a new Trackball driver
    pub fn new(spi: Spi<'a, I, M>, cs: Output<'a>) -> Self {
        Self {
            spi,
            cs,
            in_burst: false,
        }
    }

    pub async fn burst_get(&mut self) -> Result<BurstData, TrackballError> {
        // Write any value to Motion_burst register
        // if any write occured before
        if !self.in_burst {
            self.write(Register::MotionBurst, 0x00).await?;
        }

        // Lower NCS
        self.cs.set_low();
        // Send Motion_burst address
        self.spi
            .transfer_in_place(&mut [Register::MotionBurst as u8])?;

        // Read the 6 bytes of burst data
        let mut buf = [0u8; 6];
        for b in buf.iter_mut() {
            let t_buf = &mut [0x00];
            match self.spi.transfer_in_place(t_buf) {
                Ok(()) => *b = *t_buf.first().unwrap(),
                Err(_) => *b = 0,
            }
        }

        // Raise NCS
        self.cs.set_high();

        //combine the register values
        let mut data = BurstData {
            motion: (buf[0] & 0x80) != 0,
            dy: ((buf[3] as i16) << 8) | (buf[2] as i16),
            dx: ((buf[5] as i16) << 8) | (buf[4] as i16),
        };
        if buf[0] & 0b111 != 0 {
            error!("Motion burst error");
            self.in_burst = false;
        }
        // if the motion bit is not set, the dx and dy values are not valid
        if !data.motion {
            data.dx = 0;
            data.dy = 0;
        }
        // avoid small glitches
        if data.dx == 1 || data.dx == -1 {
            data.dx = 0;
        }
        if data.dy == 1 || data.dy == -1 {
            data.dy = 0;
        }
        // if the dx or dy values are 0, the sensor is not moving
        if data.dx == 0 && data.dy == 0 {
            data.motion = false;
        }

        Ok(data)
    }

    pub async fn set_cpi(&mut self, cpi: u16) -> Result<(), TrackballError> {
        info!("Setting CPI to {}", cpi);
        let val: u8 = if cpi < 100 {
            0
        } else if cpi > 12000 {
            0x77
        } else {
            ((cpi - 100) / 100) as u8
        };
        self.write(Register::Config1, val).await
    }

    pub async fn get_cpi(&mut self) -> Result<u16, TrackballError> {
        let val = self.read(Register::Config1).await.unwrap_or_default() as u16;
        Ok((val + 1) * 100)
    }

    /// Write to a register on the sensor
    async fn write(&mut self, register: Register, data: u8) -> Result<(), TrackballError> {
        self.cs.set_low();
        // tNCS-SCLK
        Timer::after_micros(1).await;

        self.in_burst = register == Register::MotionBurst;

        // send adress of the register, with MSBit = 1 to indicate it's a write
        self.spi.transfer_in_place(&mut [register as u8 | 0x80])?;
        // send data
        self.spi.transfer_in_place(&mut [data])?;

        // tSCLK-NCS (write)
        Timer::after_micros(35).await;
        self.cs.set_high();

        // tSWW/tSWR minus tSCLK-NCS (write)
        Timer::after_micros(145).await;

        Ok(())
    }

    /// Read from a register on the sensor
    async fn read(&mut self, register: Register) -> Result<u8, TrackballError> {
        self.cs.set_low();
        // tNCS-SCLK
        Timer::after_micros(1).await;

        // send adress of the register, with MSBit = 0 to indicate it's a read
        self.spi.transfer_in_place(&mut [register as u8 & 0x7f])?;

        // tSRAD
        Timer::after_micros(160).await;

        let mut ret = 0;
        let mut buf = [0x00];
        if self.spi.transfer_in_place(&mut buf).is_ok() {
            ret = *buf.first().unwrap();
        }

        // tSCLK-NCS (read)
        Timer::after_micros(1).await;
        self.cs.set_high();

        //  tSRW/tSRR minus tSCLK-NCS
        Timer::after_micros(20).await;

        Ok(ret)
    }

    /// Check if the sensor is connected and has the correct signature
    pub async fn check_signature(&mut self) -> Result<(), TrackballError> {
        let srom = self.read(Register::SromId).await.unwrap_or(0);
        let pid = self.read(Register::ProductId).await.unwrap_or(0);
        let ipid = self.read(Register::InverseProductId).await.unwrap_or(0);

        // signature for SROM 0x04
        if srom != 0x04 || pid != 0x42 || ipid != 0xBD {
            Err(TrackballError::InvalidSignature)
        } else {
            Ok(())
        }
    }

    /// Power up the sensor
    async fn power_up(&mut self) -> Result<(), TrackballError> {
        // reset the spi bus on the sensor
        self.cs.set_high();
        Timer::after_micros(50).await;
        self.cs.set_low();
        Timer::after_micros(50).await;

        // Write to reset register
        self.write(Register::PowerUpReset, 0x5A).await?;
        // 100 ms delay
        Timer::after_micros(100).await;

        // read registers 0x02 to 0x06 (and discard the data)
        self.read(Register::Motion).await?;
        self.read(Register::DeltaXL).await?;
        self.read(Register::DeltaXH).await?;
        self.read(Register::DeltaYL).await?;
        self.read(Register::DeltaYH).await?;

        // upload the firmware
        self.upload_fw().await?;

        let is_valid_signature = self.check_signature().await;

        // Write 0x00 (rest disable) to Config2 register for wired mouse or 0x20 for
        // wireless mouse design.
        self.write(Register::Config2, 0x00).await?;
        // Tune the angle
        self.write(Register::AngleTune, DEFAULT_ANGLE_TUNE).await?;
        self.write(Register::LiftConfig, 0x02).await?;

        Timer::after_micros(100).await;

        is_valid_signature
    }

    pub async fn start(&mut self) -> Result<(), TrackballError> {
        self.power_up().await?;
        Timer::after_millis(35).await;
        self.set_cpi(DEFAULT_CPI).await?;
        Ok(())
    }

    async fn upload_fw(&mut self) -> Result<(), TrackballError> {
        // Write 0 to Rest_En bit of Config2 register to disable Rest mode.
        self.write(Register::Config2, 0x00).await?;

        // write 0x1d in SROM_enable reg for initializing
        self.write(Register::SromEnable, 0x1d).await?;

        // wait for 10 ms
        Timer::after_micros(10000).await;

        // write 0x18 to SROM_enable to start SROM download
        self.write(Register::SromEnable, 0x18).await?;

        // lower CS
        self.cs.set_low();

        // first byte is address
        self.spi
            .transfer_in_place(&mut [Register::SromLoadBurst as u8 | 0x80])?;
        Timer::after_micros(15).await;

        // send the rest of the firmware
        for element in firmware::SROM_TRACKING_FW.iter() {
            self.spi.transfer_in_place(&mut [*element])?;
            Timer::after_micros(15).await;
        }

        Timer::after_micros(2).await;
        self.cs.set_high();
        Timer::after_micros(200).await;
        Ok(())
    }
}

/// Geometric layout of the two sensors on the ball housing. Mount vectors
/// point from the ball's center through each sensor's optical window; the
/// mixer rotates each sensor's raw (x, y) reading from its own tangent
/// plane into a shared ball-frame before fusing the two into one
/// pointer/twist stream. Mounted at right angles to each other on the
/// equator, matching this board's PMW3360 pair placement.
fn ball_config() -> BallConfig {
    use p2sm_core::geometry::Vec3;
    BallConfig::new(
        BALL_RADIUS_MM,
        Vec3 {
            x: 1.0,
            y: 0.0,
            z: 0.0,
        },
        Vec3 {
            x: 0.0,
            y: 1.0,
            z: 0.0,
        },
    )
    .expect("ball sensor mounts are fixed at build time and never coincide")
}

/// Pointer-sensitivity step behavior for `MixerCommand::Adjust { scope:
/// Scope::Pointer, .. }`: 1% steps, wraps, capped at 1.0x.
fn pointer_behavior() -> p2sm_core::BehaviorConfig {
    p2sm_core::BehaviorConfig::new(10, 1, 100, 1.0, true, false)
        .expect("fixed behavior constants are always valid")
}

/// Scroll-sensitivity step behavior: same step size, allowed up to 2x.
fn scroll_behavior() -> p2sm_core::BehaviorConfig {
    p2sm_core::BehaviorConfig::new(10, 1, 200, 2.0, true, true)
        .expect("fixed behavior constants are always valid")
}

/// Acceleration-multiplier step behavior: coarser steps, up to 3x, no wrap.
fn accel_behavior() -> p2sm_core::BehaviorConfig {
    p2sm_core::BehaviorConfig::new(50, 1, 60, 3.0, false, true)
        .expect("fixed behavior constants are always valid")
}

/// Deferred-work queue driving [`p2sm_core::Scheduler`] off `embassy_time`.
/// Deadlines are polled once per tick rather than backed by individual
/// `Timer` futures, since this task already runs a fixed-rate loop and a
/// handful of pending `u64` deadlines is cheaper than spawning an embassy
/// timer per feedback pulse.
struct EmbassyScheduler {
    deadlines: heapless::FnvIndexMap<WorkHandle, u64, 8>,
}

impl EmbassyScheduler {
    fn new() -> Self {
        Self {
            deadlines: heapless::FnvIndexMap::new(),
        }
    }

    /// Returns the handles whose deadline has passed, removing them.
    fn poll_due(&mut self, now: u64) -> heapless::Vec<WorkHandle, 8> {
        let due: heapless::Vec<WorkHandle, 8> = self
            .deadlines
            .iter()
            .filter(|(_, &deadline)| deadline <= now)
            .map(|(&h, _)| h)
            .collect();
        for h in &due {
            self.deadlines.remove(h);
        }
        due
    }
}

impl Scheduler for EmbassyScheduler {
    fn schedule(&mut self, handle: WorkHandle, after_ms: u64) {
        let _ = self.deadlines.insert(handle, self.now_ms() + after_ms);
    }

    fn cancel(&mut self, handle: WorkHandle) {
        let _ = self.deadlines.remove(&handle);
    }

    fn now_ms(&self) -> u64 {
        embassy_time::Instant::now().as_millis()
    }
}

/// In-RAM sensitivity/acceleration persistence. This board has no flash
/// settings store wired up yet, so values reset to the mixer's defaults on
/// every boot; the mixer itself treats a missing value as "keep defaults"
/// (`Mixer::load_from_store`), so this is safe, just not durable.
#[derive(Default)]
struct RamPersistence {
    sensitivity: Option<p2sm_core::PersistedSensitivity>,
    accel: Option<p2sm_core::PersistedAccel>,
}

impl p2sm_core::PersistenceStore for RamPersistence {
    fn load_sensitivity(&mut self) -> Option<p2sm_core::PersistedSensitivity> {
        self.sensitivity
    }
    fn save_sensitivity(&mut self, value: p2sm_core::PersistedSensitivity) -> Result<(), ()> {
        self.sensitivity = Some(value);
        Ok(())
    }
    fn load_accel(&mut self) -> Option<p2sm_core::PersistedAccel> {
        self.accel
    }
    fn save_accel(&mut self, value: p2sm_core::PersistedAccel) -> Result<(), ()> {
        self.accel = Some(value);
        Ok(())
    }
}

/// Accumulates one tick's worth of mixer output into a single HID report.
struct ReportSink {
    report: MouseReport,
}

impl EventSink for ReportSink {
    fn emit_rel(&mut self, axis: OutAxis, value: i32, _sync: bool) {
        match axis {
            OutAxis::RelX => {
                let clamped = value.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
                self.report.x = self.report.x.saturating_add(clamped);
            }
            OutAxis::RelY => {
                let clamped = value.clamp(i16::MIN as i32, i16::MAX as i32) as i16;
                self.report.y = self.report.y.saturating_add(clamped);
            }
            OutAxis::RelWheel => {
                let clamped = value.clamp(i8::MIN as i32, i8::MAX as i32) as i8;
                self.report.wheel = self.report.wheel.saturating_add(clamped);
            }
        }
    }
}

fn feed<Sink: EventSink, Sch: Scheduler, Pins: p2sm_core::feedback::FeedbackPins>(
    mixer: &mut Mixer,
    sensor: SensorId,
    burst: BurstData,
    sink: &mut Sink,
    scheduler: &mut Sch,
    pins: &mut Pins,
) {
    if !burst.motion {
        return;
    }
    let mut dx = burst.dx as i32;
    let mut sync_x = true;
    mixer.on_event(sensor, Axis::X, &mut dx, &mut sync_x, sink, scheduler, pins);
    let mut dy = burst.dy as i32;
    let mut sync_y = true;
    mixer.on_event(sensor, Axis::Y, &mut dy, &mut sync_y, sink, scheduler, pins);
}

/// Runs both PMW3360 sensors, fuses their output through the mixer, and
/// writes HID mouse reports on `hid_writer`. There is no feedback GPIO
/// wired up on this board revision, so haptics are a no-op
/// (`p2sm_core::feedback::NoFeedbackPins`).
#[embassy_executor::task]
pub async fn run(
    mut sensor1: TrackballDev0,
    mut sensor2: TrackballDev1,
    mut hid_writer: HidWriter<'static, Driver<'static, USB>, 7>,
) {
    if let Err(_e) = sensor1.start().await {
        error!("Sensor 1 init error: {:?}", utils::log::Debug2Format(&_e));
    }
    if let Err(_e) = sensor2.start().await {
        error!("Sensor 2 init error: {:?}", utils::log::Debug2Format(&_e));
    }

    let mut mixer = Mixer::new(ball_config(), Tunables::default());
    let mut scheduler = EmbassyScheduler::new();
    let mut persistence = RamPersistence::default();
    let mut pins = p2sm_core::feedback::NoFeedbackPins;
    mixer.load_from_store(&mut persistence);

    let mut buttons: u8 = 0;
    let mut ticker = Ticker::every(Duration::from_millis(REFRESH_RATE_MS));

    loop {
        match select4(
            ticker.next(),
            SENSOR_CMD_CHANNEL.receive(),
            MIXER_CMD_CHANNEL.receive(),
            BUTTON_CHANNEL.receive(),
        )
        .await
        {
            Either4::First(_) => {
                let b1 = sensor1.burst_get().await.unwrap_or(BurstData {
                    motion: false,
                    dx: 0,
                    dy: 0,
                });
                let b2 = sensor2.burst_get().await.unwrap_or(BurstData {
                    motion: false,
                    dx: 0,
                    dy: 0,
                });

                let mut sink = ReportSink {
                    report: MouseReport {
                        buttons,
                        x: 0,
                        y: 0,
                        wheel: 0,
                        pan: 0,
                    },
                };

                feed(&mut mixer, SensorId::One, b1, &mut sink, &mut scheduler, &mut pins);
                feed(&mut mixer, SensorId::Two, b2, &mut sink, &mut scheduler, &mut pins);

                let now = scheduler.now_ms();
                for handle in scheduler.poll_due(now) {
                    mixer.on_work(handle, &mut pins, &mut scheduler, &mut persistence);
                }

                if sink.report != MouseReport::default() {
                    let raw = sink.report.serialize();
                    let _ = hid_writer.write(&raw).await;
                }
            }
            Either4::Second(cmd) => {
                let delta: i32 = match cmd {
                    SensorCommand::IncreaseCpi => 100,
                    SensorCommand::DecreaseCpi => -100,
                };
                let cpi = sensor1.get_cpi().await.unwrap_or(DEFAULT_CPI);
                let new_cpi = (cpi as i32 + delta).clamp(100, 12000) as u16;
                let _ = sensor1.set_cpi(new_cpi).await;
                let _ = sensor2.set_cpi(new_cpi).await;
            }
            Either4::Third(cmd) => match cmd {
                MixerCommand::Adjust { scope, direction } => {
                    let behavior = match scope {
                        Scope::Pointer => pointer_behavior(),
                        Scope::Scroll => scroll_behavior(),
                    };
                    mixer.adjust_sensitivity(&mut scheduler, &mut pins, &behavior, scope, direction, 1);
                }
                MixerCommand::AdjustAccel { direction } => {
                    mixer.adjust_accel(&mut scheduler, &mut pins, &accel_behavior(), direction, 1);
                }
                MixerCommand::ToggleAccel(action) => mixer.toggle_accel(action),
                MixerCommand::ToggleTwist => mixer.toggle_twist(),
                MixerCommand::ToggleTwistReverse => mixer.toggle_twist_reverse(),
            },
            Either4::Fourth(b) => buttons = b,
        }
    }
}
