//! Board adapters that implement the `discbot-core` hardware traits.

use discbot_core::color::{
    CHANNEL_COUNT, ColorFrame, ColorSampler, FRAME_LEN, MAX_CHANNEL_VALUE, SENSOR_COUNT,
};
use discbot_core::motion::{DirectionBits, MAX_DUTY, MotorDriver, Wheel};
use embassy_futures::select::select;
use embassy_stm32::Peri;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::flash::{Blocking, Flash};
use embassy_stm32::gpio::{Level, Output};
use embassy_stm32::peripherals::TIM3;
use embassy_stm32::timer::Channel;
use embassy_stm32::timer::simple_pwm::SimplePwm;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};

use crate::storage::STORE_SIZE;

mod accessories;

pub use accessories::{BoardAccessories, RangeRequest, Sonar};

/// Calibration page: the last 2 KiB page of the 512 KiB flash.
const CALIBRATION_PAGE_OFFSET: u32 = 0x7_F800;
const FLASH_PAGE_SIZE: u32 = 2048;

/// Sensor gate timing is stored in 0.5 us timer ticks.
const GATE_TICKS_PER_US: u64 = 2;
/// Upper bound for one channel's gate; erased timing reads as 0xFFFF.
const MAX_GATE_US: u64 = 4_000;

/// TIM3 PWM plus the four H-bridge inputs.
pub struct HBridgeDriver {
    pwm: SimplePwm<'static, TIM3>,
    left: [Output<'static>; 2],
    right: [Output<'static>; 2],
}

impl HBridgeDriver {
    pub fn new(
        mut pwm: SimplePwm<'static, TIM3>,
        left: [Output<'static>; 2],
        right: [Output<'static>; 2],
    ) -> Self {
        for channel in [Channel::Ch1, Channel::Ch2] {
            let mut output = pwm.channel(channel);
            output.set_duty_cycle(0);
            output.enable();
        }
        Self { pwm, left, right }
    }

    const fn pwm_channel(wheel: Wheel) -> Channel {
        match wheel {
            Wheel::Left => Channel::Ch1,
            Wheel::Right => Channel::Ch2,
        }
    }
}

impl MotorDriver for HBridgeDriver {
    fn set_duty(&mut self, wheel: Wheel, duty: u16) {
        // Regulator duty is expressed against a MAX_DUTY period.
        let top = u32::from(self.pwm.max_duty_cycle());
        let scaled = u32::from(duty.min(MAX_DUTY)) * top / u32::from(MAX_DUTY);
        let scaled = u16::try_from(scaled).unwrap_or(u16::MAX);
        self.pwm
            .channel(Self::pwm_channel(wheel))
            .set_duty_cycle(scaled);
    }

    fn set_direction(&mut self, wheel: Wheel, bits: DirectionBits) {
        let [in1, in2] = match wheel {
            Wheel::Left => &mut self.left,
            Wheel::Right => &mut self.right,
        };
        in1.set_level(Level::from(bits.in1));
        in2.set_level(Level::from(bits.in2));
    }
}

/// Conversion requests from the colour measurement timer to the sensor task.
pub type ColorRequest = Signal<CriticalSectionRawMutex, ()>;

/// [`ColorSampler`] that wakes the sensor task.
pub struct SignalSampler(pub &'static ColorRequest);

impl ColorSampler for SignalSampler {
    fn trigger(&mut self) {
        self.0.signal(());
    }
}

/// Light-to-frequency colour sensors behind a shared multiplexer.
///
/// Two select lines pick the sensor, two pick the colour filter and the
/// selected sensor's frequency output is counted for a calibrated gate time.
pub struct ColorProbe {
    sensor_select: [Output<'static>; 2],
    channel_select: [Output<'static>; 2],
    leds: Output<'static>,
    frequency: ExtiInput<'static>,
}

impl ColorProbe {
    pub fn new(
        sensor_select: [Output<'static>; 2],
        channel_select: [Output<'static>; 2],
        leds: Output<'static>,
        frequency: ExtiInput<'static>,
    ) -> Self {
        Self {
            sensor_select,
            channel_select,
            leds,
            frequency,
        }
    }

    /// Measures all sensors and channels in frame order.
    pub async fn acquire(&mut self, timing: &[u16; FRAME_LEN]) -> ColorFrame {
        let mut raw = [0u8; FRAME_LEN];
        self.leds.set_high();
        for sensor in 0..SENSOR_COUNT {
            for channel in 0..CHANNEL_COUNT {
                let slot = sensor * CHANNEL_COUNT + channel;
                select_lines(&mut self.sensor_select, sensor);
                select_lines(&mut self.channel_select, channel);
                raw[slot] = self.count_pulses(gate_time(timing[slot])).await;
            }
        }
        self.leds.set_low();
        ColorFrame::from_raw(raw)
    }

    async fn count_pulses(&mut self, gate: Duration) -> u8 {
        let mut pulses: u8 = 0;
        let counting = async {
            loop {
                self.frequency.wait_for_rising_edge().await;
                pulses = pulses.saturating_add(1);
            }
        };
        select(Timer::after(gate), counting).await;
        pulses.min(MAX_CHANNEL_VALUE)
    }
}

fn select_lines(lines: &mut [Output<'static>; 2], index: usize) {
    lines[0].set_level(Level::from(index & 0b01 != 0));
    lines[1].set_level(Level::from(index & 0b10 != 0));
}

fn gate_time(ticks: u16) -> Duration {
    Duration::from_micros((u64::from(ticks) / GATE_TICKS_PER_US).min(MAX_GATE_US))
}

/// The flash page holding the calibration image.
pub struct CalibrationFlash {
    flash: Flash<'static, Blocking>,
}

impl CalibrationFlash {
    pub fn new(flash: Peri<'static, embassy_stm32::peripherals::FLASH>) -> Self {
        Self {
            flash: Flash::new_blocking(flash),
        }
    }

    /// Reads the stored image; a failed read yields an erased image.
    pub fn load(&mut self) -> [u8; STORE_SIZE] {
        let mut image = [0xFF; STORE_SIZE];
        if self
            .flash
            .blocking_read(CALIBRATION_PAGE_OFFSET, &mut image)
            .is_err()
        {
            defmt::warn!("flash: calibration read failed");
            image = [0xFF; STORE_SIZE];
        }
        image
    }

    /// Erases the page and writes `image`.
    pub fn commit(&mut self, image: &[u8; STORE_SIZE]) -> Result<(), embassy_stm32::flash::Error> {
        self.flash.blocking_erase(
            CALIBRATION_PAGE_OFFSET,
            CALIBRATION_PAGE_OFFSET + FLASH_PAGE_SIZE,
        )?;
        self.flash.blocking_write(CALIBRATION_PAGE_OFFSET, image)
    }
}
