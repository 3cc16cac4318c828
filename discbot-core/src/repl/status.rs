//! Status surface for the console.
//!
//! [`StatusSnapshot`] copies the interesting parts of a running robot so it
//! can be rendered after the robot lock is released. [`StatusFormatter`]
//! keeps the textual rendering consistent across front-ends.

use core::fmt;

use crate::button::Button;
use crate::color::{ColorSampler, SENSOR_COUNT};
use crate::lights::{CarLight, Indicator};
use crate::motion::{DirectionBits, MotorDriver, Wheel};
use crate::range::Distances;
use crate::robot::{Accessories, DiscBot, Task};
use crate::storage::NvStore;
use crate::timebase::{SlotInfo, Timebase};

/// Per-wheel regulator state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WheelSnapshot {
    pub speed: i16,
    pub target_rate: u16,
    pub duty: u16,
    pub bits: DirectionBits,
    pub remaining_pulses: u32,
}

/// Snapshot of the status information surfaced by the console.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub time_ms: u32,
    pub speed: i16,
    pub direction: i8,
    pub step: u16,
    pub circumference_mm: u16,
    pub wheels: [WheelSnapshot; 2],
    pub pressed: [bool; 3],
    pub colors: [Option<u8>; SENSOR_COUNT],
    pub references: usize,
    pub measuring_ms: Option<u16>,
    pub distances: Distances,
    pub ranging_ms: Option<u16>,
    pub cards: usize,
    /// Current note and tune length.
    pub tune: Option<(usize, usize)>,
    pub buzzing_hz: Option<u16>,
    pub lights: [bool; 4],
    pub indicator: Indicator,
    pub live_timers: usize,
    pub timer_capacity: usize,
}

impl StatusSnapshot {
    #[must_use]
    pub fn capture<M, S, C, A, const SLOTS: usize>(bot: &DiscBot<M, S, C, A, SLOTS>) -> Self
    where
        M: MotorDriver,
        S: NvStore,
        C: ColorSampler,
        A: Accessories,
    {
        let motion = bot.motion();
        let wheel = |wheel: Wheel| WheelSnapshot {
            speed: motion.wheel_speed(wheel),
            target_rate: motion.target_rate(wheel),
            duty: motion.duty(wheel),
            bits: motion.direction_bits(wheel),
            remaining_pulses: motion.remaining_pulses(wheel),
        };

        Self {
            time_ms: bot.timebase().time_ms(),
            speed: motion.speed(),
            direction: motion.direction(),
            step: motion.step(),
            circumference_mm: motion.wheel_circumference_mm(),
            wheels: [wheel(Wheel::Left), wheel(Wheel::Right)],
            pressed: Button::ALL.map(|button| bot.buttons().is_pressed(button)),
            colors: bot.colors().current(),
            references: bot.colors().references().len(),
            measuring_ms: bot.colors().measuring_period(),
            distances: bot.ranges().distances(),
            ranging_ms: bot.ranges().measuring_period(),
            cards: bot.cards().cards().len(),
            tune: bot.tunes().position(),
            buzzing_hz: bot.tunes().buzzing(),
            lights: CarLight::ALL.map(|light| bot.lights().is_on(light)),
            indicator: bot.lights().indicator(),
            live_timers: bot.timebase().live_count(),
            timer_capacity: bot.timebase().capacity(),
        }
    }
}

/// Helper that renders a [`StatusSnapshot`] into human-readable lines.
#[derive(Clone, Copy, Debug)]
pub struct StatusFormatter<'a> {
    snapshot: &'a StatusSnapshot,
}

impl<'a> StatusFormatter<'a> {
    #[must_use]
    pub const fn new(snapshot: &'a StatusSnapshot) -> Self {
        Self { snapshot }
    }

    /// Writes every status line, each terminated by `\r\n`.
    pub fn write_all<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        self.write_drive_line(writer)?;
        writer.write_str("\r\n")?;
        for wheel in Wheel::BOTH {
            self.write_wheel_line(writer, wheel)?;
            writer.write_str("\r\n")?;
        }
        self.write_sensor_line(writer)?;
        writer.write_str("\r\n")?;
        self.write_accessory_line(writer)?;
        writer.write_str("\r\n")
    }

    /// e.g. `drive t=1200ms speed=80 dir=0 step=27 circ=217mm timers=2/8`
    pub fn write_drive_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let s = self.snapshot;
        write!(
            writer,
            "drive t={}ms speed={} dir={} step={} circ={}mm timers={}/{}",
            s.time_ms,
            s.speed,
            s.direction,
            s.step,
            s.circumference_mm,
            s.live_timers,
            s.timer_capacity
        )
    }

    /// e.g. `left speed=80 rate=43 duty=12000 fwd left=0`
    pub fn write_wheel_line<W: fmt::Write>(&self, writer: &mut W, wheel: Wheel) -> fmt::Result {
        let w = &self.snapshot.wheels[wheel.index()];
        write!(
            writer,
            "{wheel} speed={} rate={} duty={} {}",
            w.speed,
            w.target_rate,
            w.duty,
            w.bits.label()
        )?;
        if w.remaining_pulses > 0 {
            write!(writer, " left={}", w.remaining_pulses)?;
        }
        Ok(())
    }

    /// e.g. `sensors buttons=red colors=0,-,1 refs=2 measure=20ms`
    pub fn write_sensor_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let s = self.snapshot;
        writer.write_str("sensors buttons=")?;
        let mut any = false;
        for (button, pressed) in Button::ALL.iter().zip(s.pressed) {
            if pressed {
                if any {
                    writer.write_char('+')?;
                }
                writer.write_str(button.label())?;
                any = true;
            }
        }
        if !any {
            writer.write_str("none")?;
        }

        writer.write_str(" colors=")?;
        for (position, index) in s.colors.iter().enumerate() {
            if position > 0 {
                writer.write_char(',')?;
            }
            match index {
                Some(index) => write!(writer, "{index}")?,
                None => writer.write_char('-')?,
            }
        }

        write!(writer, " refs={} measure=", s.references)?;
        match s.measuring_ms {
            Some(ms) => write!(writer, "{ms}ms"),
            None => writer.write_str("off"),
        }
    }

    /// e.g. `accessories front=42 back=- left=- right=- range=100ms cards=2
    /// tune=3/24 lights=head+brake indicator=left`
    pub fn write_accessory_line<W: fmt::Write>(&self, writer: &mut W) -> fmt::Result {
        let s = self.snapshot;
        write!(writer, "accessories {} range=", s.distances)?;
        match s.ranging_ms {
            Some(ms) => write!(writer, "{ms}ms")?,
            None => writer.write_str("off")?,
        }

        write!(writer, " cards={} tune=", s.cards)?;
        match s.tune {
            Some((note, length)) => write!(writer, "{}/{length}", note + 1)?,
            None => writer.write_str("off")?,
        }
        if let Some(hz) = s.buzzing_hz {
            write!(writer, " buzz={hz}Hz")?;
        }

        writer.write_str(" lights=")?;
        let mut any = false;
        for (light, on) in CarLight::ALL.iter().zip(s.lights) {
            if on {
                if any {
                    writer.write_char('+')?;
                }
                writer.write_str(light.label())?;
                any = true;
            }
        }
        if !any {
            writer.write_str("none")?;
        }
        write!(writer, " indicator={}", s.indicator.label())
    }
}

/// Writes one line per occupied timer slot, or `no timers`.
pub fn write_timers<W, const N: usize>(timebase: &Timebase<Task, N>, writer: &mut W) -> fmt::Result
where
    W: fmt::Write,
{
    let base = timebase.base_time_ms().unwrap_or(0);
    let mut any = false;
    for slot in timebase.occupied() {
        write_timer_line(writer, &slot, base)?;
        writer.write_str("\r\n")?;
        any = true;
    }
    if !any {
        writer.write_str("no timers\r\n")?;
    }
    Ok(())
}

/// e.g. `#1 regulate active every 50ms (1 ticks) elapsed=0 running`
fn write_timer_line<W: fmt::Write>(writer: &mut W, slot: &SlotInfo<Task>, base: u16) -> fmt::Result {
    write!(
        writer,
        "#{} {} {} every {}ms ({} ticks) elapsed={} {}",
        slot.handle,
        slot.task,
        slot.state.label(),
        u32::from(slot.interval_ticks) * u32::from(base),
        slot.interval_ticks,
        slot.elapsed_ticks,
        if slot.running { "running" } else { "stopped" }
    )
}

#[cfg(test)]
mod tests {
    extern crate std;

    use std::string::String;

    use super::*;
    use crate::button::ALL_RELEASED;
    use crate::color::NoopColorSampler;
    use crate::motion::LatchedMotorDriver;
    use crate::robot::NoAccessories;
    use crate::storage::RamStore;
    use crate::timebase::BaseTime;

    type Bot = DiscBot<LatchedMotorDriver, RamStore<512>, NoopColorSampler, NoAccessories, 4>;

    fn bot() -> Bot {
        let mut bot = Bot::new(
            LatchedMotorDriver::new(),
            RamStore::new(),
            NoopColorSampler,
            NoAccessories,
        );
        bot.init(BaseTime::Ms50, ALL_RELEASED).unwrap();
        bot
    }

    #[test]
    fn renders_idle_robot() {
        let bot = bot();
        let snapshot = StatusSnapshot::capture(&bot);
        let mut out = String::new();
        StatusFormatter::new(&snapshot).write_all(&mut out).unwrap();
        assert_eq!(
            out,
            "drive t=0ms speed=0 dir=0 step=15 circ=217mm timers=1/4\r\n\
             left speed=0 rate=0 duty=0 coast\r\n\
             right speed=0 rate=0 duty=0 coast\r\n\
             sensors buttons=none colors=-,-,- refs=0 measure=off\r\n\
             accessories front=- back=- left=- right=- range=off cards=0 tune=off \
             lights=none indicator=off\r\n"
        );
    }

    #[test]
    fn renders_running_accessories() {
        let mut bot = bot();
        bot.start_ranging(crate::range::RangeSensors::ULTRASONIC, 100)
            .unwrap();
        bot.on_ultrasonic([None, None, None, Some(420)]);
        bot.play(crate::tune::Tune::Siren.notes(), crate::tune::PlayMode::Regular, true)
            .unwrap();
        bot.buzz(880).unwrap();
        bot.set_light(CarLight::Headlight, true);
        bot.set_light(CarLight::Brakelight, true);
        let snapshot = StatusSnapshot::capture(&bot);

        let mut line = String::new();
        StatusFormatter::new(&snapshot)
            .write_accessory_line(&mut line)
            .unwrap();
        assert_eq!(
            line,
            "accessories front=42 back=- left=- right=- range=100ms cards=0 tune=1/2 \
             buzz=880Hz lights=head+brake indicator=off"
        );
    }

    #[test]
    fn renders_pressed_buttons_and_maneuver() {
        let mut bot = bot();
        bot.on_button_levels(0b010);
        bot.move_distance(217, 100).unwrap();
        let snapshot = StatusSnapshot::capture(&bot);

        let mut line = String::new();
        StatusFormatter::new(&snapshot)
            .write_sensor_line(&mut line)
            .unwrap();
        assert!(line.starts_with("sensors buttons=red+blue "));

        line.clear();
        StatusFormatter::new(&snapshot)
            .write_wheel_line(&mut line, Wheel::Left)
            .unwrap();
        assert_eq!(line, "left speed=100 rate=53 duty=0 fwd left=234");
    }

    #[test]
    fn timers_dump_lists_live_slots() {
        let mut bot = bot();
        bot.start_measuring(100).unwrap();
        bot.tick();

        let mut out = String::new();
        write_timers(bot.timebase(), &mut out).unwrap();
        assert_eq!(
            out,
            "#1 regulate active every 50ms (1 ticks) elapsed=0 running\r\n\
             #2 color active every 100ms (2 ticks) elapsed=1 running\r\n"
        );
    }
}
