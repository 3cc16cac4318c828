//! Range finder, buzzer and corner LEDs.
//!
//! Only the front ultrasonic sensor is populated on this board. The two
//! corner LEDs stand in for the lamp chain and follow its outer lamps.

use discbot_core::lights::{Lamp, LampFrame, LightBar};
use discbot_core::range::{RangeSampler, RangeSensors};
use discbot_core::rfid::CardReader;
use discbot_core::tune::Speaker;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Level, Output};
use embassy_stm32::peripherals::TIM2;
use embassy_stm32::time::hz;
use embassy_stm32::timer::Channel;
use embassy_stm32::timer::simple_pwm::SimplePwm;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Instant, Timer, with_timeout};

/// Longest echo worth waiting for, about four metres.
const ECHO_TIMEOUT: Duration = Duration::from_millis(25);
const TRIGGER_PULSE: Duration = Duration::from_micros(10);
const BUZZER_CHANNEL: Channel = Channel::Ch1;

/// Measurement requests from the range timer to the sensor task.
pub type RangeRequest = Signal<CriticalSectionRawMutex, RangeSensors>;

/// HC-SR04 style ultrasonic sensor.
pub struct Sonar {
    trigger: Output<'static>,
    echo: ExtiInput<'static>,
}

impl Sonar {
    pub fn new(trigger: Output<'static>, echo: ExtiInput<'static>) -> Self {
        Self { trigger, echo }
    }

    /// Fires one ping; `None` when no echo came back.
    pub async fn echo_mm(&mut self) -> Option<u16> {
        self.trigger.set_high();
        Timer::after(TRIGGER_PULSE).await;
        self.trigger.set_low();

        with_timeout(ECHO_TIMEOUT, self.echo.wait_for_high()).await.ok()?;
        let start = Instant::now();
        with_timeout(ECHO_TIMEOUT, self.echo.wait_for_low()).await.ok()?;

        // 343 m/s, out and back.
        let micros = start.elapsed().as_micros();
        u16::try_from(micros * 343 / 2000).ok()
    }
}

pub struct BoardAccessories {
    ranges: &'static RangeRequest,
    buzzer: SimplePwm<'static, TIM2>,
    /// Left and right corner LEDs.
    corners: [Output<'static>; 2],
}

impl BoardAccessories {
    pub fn new(
        ranges: &'static RangeRequest,
        mut buzzer: SimplePwm<'static, TIM2>,
        corners: [Output<'static>; 2],
    ) -> Self {
        let mut output = buzzer.channel(BUZZER_CHANNEL);
        output.set_duty_cycle(0);
        output.enable();
        Self {
            ranges,
            buzzer,
            corners,
        }
    }
}

impl RangeSampler for BoardAccessories {
    fn ping(&mut self, sensors: RangeSensors) {
        self.ranges.signal(sensors);
    }
}

// No tag reader is fitted; detection runs but never sees a card.
impl CardReader for BoardAccessories {
    fn scan(&mut self) {}
}

impl Speaker for BoardAccessories {
    fn sound(&mut self, frequency: u16) {
        if frequency == 0 {
            self.mute();
            return;
        }
        self.buzzer.set_frequency(hz(u32::from(frequency)));
        let half = self.buzzer.max_duty_cycle() / 2;
        self.buzzer.channel(BUZZER_CHANNEL).set_duty_cycle(half);
    }

    fn mute(&mut self) {
        self.buzzer.channel(BUZZER_CHANNEL).set_duty_cycle(0);
    }
}

impl LightBar for BoardAccessories {
    fn show(&mut self, frame: &LampFrame) {
        let lit = |lamps: [Lamp; 2]| lamps.iter().any(|&lamp| frame.get(lamp).is_lit());
        let [left, right] = &mut self.corners;
        left.set_level(Level::from(lit([Lamp::FrontLeftOut, Lamp::BackLeftOut])));
        right.set_level(Level::from(lit([Lamp::FrontRightOut, Lamp::BackRightOut])));
    }
}
