//! Car-style lighting on the eight corner LEDs.
//!
//! Each corner has an inner and an outer LED. Steady lights are combined
//! into one [`LampFrame`] whenever something changes; the indicator toggles
//! the outer LEDs from a timebase task every [`BLINK_MS`].

use crate::timebase::{Handle, Reschedule, Timebase, TimebaseError};

pub const LAMP_COUNT: usize = 8;
/// Indicator half period.
pub const BLINK_MS: u16 = 400;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Rgb {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
}

impl Rgb {
    pub const OFF: Self = Self::new(0, 0, 0);
    pub const WHITE: Self = Self::new(255, 255, 255);
    pub const RED: Self = Self::new(255, 0, 0);
    pub const AMBER: Self = Self::new(255, 50, 0);
    const DIM_WHITE: Self = Self::new(64, 64, 64);
    const DIM_RED: Self = Self::new(64, 0, 0);

    #[must_use]
    pub const fn new(red: u8, green: u8, blue: u8) -> Self {
        Self { red, green, blue }
    }

    #[must_use]
    pub const fn is_lit(self) -> bool {
        self.red != 0 || self.green != 0 || self.blue != 0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Lamp {
    FrontRightOut,
    FrontRightIn,
    FrontLeftIn,
    FrontLeftOut,
    BackLeftOut,
    BackLeftIn,
    BackRightIn,
    BackRightOut,
}

impl Lamp {
    /// In LED chain order.
    pub const ALL: [Lamp; LAMP_COUNT] = [
        Lamp::FrontRightOut,
        Lamp::FrontRightIn,
        Lamp::FrontLeftIn,
        Lamp::FrontLeftOut,
        Lamp::BackLeftOut,
        Lamp::BackLeftIn,
        Lamp::BackRightIn,
        Lamp::BackRightOut,
    ];
    const FRONT: [Lamp; 4] = [
        Lamp::FrontRightOut,
        Lamp::FrontRightIn,
        Lamp::FrontLeftIn,
        Lamp::FrontLeftOut,
    ];
    const BACK: [Lamp; 4] = [
        Lamp::BackLeftOut,
        Lamp::BackLeftIn,
        Lamp::BackRightIn,
        Lamp::BackRightOut,
    ];

    #[must_use]
    pub const fn index(self) -> usize {
        match self {
            Lamp::FrontRightOut => 0,
            Lamp::FrontRightIn => 1,
            Lamp::FrontLeftIn => 2,
            Lamp::FrontLeftOut => 3,
            Lamp::BackLeftOut => 4,
            Lamp::BackLeftIn => 5,
            Lamp::BackRightIn => 6,
            Lamp::BackRightOut => 7,
        }
    }
}

/// Colour of every lamp.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LampFrame {
    pub lamps: [Rgb; LAMP_COUNT],
}

impl LampFrame {
    #[must_use]
    pub const fn get(&self, lamp: Lamp) -> Rgb {
        self.lamps[lamp.index()]
    }

    pub fn set(&mut self, lamp: Lamp, color: Rgb) {
        self.lamps[lamp.index()] = color;
    }
}

/// Steady lights, switched independently.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CarLight {
    /// Dimmed position lights front and back.
    Light,
    Headlight,
    Brakelight,
    /// Reversing light.
    Backlight,
}

impl CarLight {
    pub const ALL: [CarLight; 4] = [
        CarLight::Light,
        CarLight::Headlight,
        CarLight::Brakelight,
        CarLight::Backlight,
    ];

    #[must_use]
    pub const fn mask(self) -> u8 {
        match self {
            CarLight::Light => 0x01,
            CarLight::Headlight => 0x02,
            CarLight::Brakelight => 0x04,
            CarLight::Backlight => 0x08,
        }
    }

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            CarLight::Light => "light",
            CarLight::Headlight => "head",
            CarLight::Brakelight => "brake",
            CarLight::Backlight => "back",
        }
    }

    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|light| light.label().eq_ignore_ascii_case(label))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Indicator {
    #[default]
    Off,
    Left,
    Right,
    /// Hazard lights.
    Both,
}

impl Indicator {
    pub const ALL: [Indicator; 4] = [
        Indicator::Off,
        Indicator::Left,
        Indicator::Right,
        Indicator::Both,
    ];

    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Indicator::Off => "off",
            Indicator::Left => "left",
            Indicator::Right => "right",
            Indicator::Both => "both",
        }
    }

    #[must_use]
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|indicator| indicator.label().eq_ignore_ascii_case(label))
    }

    const fn lamps(self) -> &'static [Lamp] {
        match self {
            Indicator::Off => &[],
            Indicator::Left => &[Lamp::FrontLeftOut, Lamp::BackLeftOut],
            Indicator::Right => &[Lamp::FrontRightOut, Lamp::BackRightOut],
            Indicator::Both => &[
                Lamp::FrontRightOut,
                Lamp::FrontLeftOut,
                Lamp::BackLeftOut,
                Lamp::BackRightOut,
            ],
        }
    }
}

/// Pushes a complete frame to the LEDs.
pub trait LightBar {
    fn show(&mut self, frame: &LampFrame);
}

impl<L: LightBar + ?Sized> LightBar for &mut L {
    fn show(&mut self, frame: &LampFrame) {
        (**self).show(frame);
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopLightBar;

impl LightBar for NoopLightBar {
    fn show(&mut self, _frame: &LampFrame) {}
}

#[derive(Debug, Default)]
pub struct CarLights {
    state: u8,
    indicator: Indicator,
    blink_on: bool,
    blinking: Option<Handle>,
}

impl CarLights {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            state: 0,
            indicator: Indicator::Off,
            blink_on: false,
            blinking: None,
        }
    }

    pub fn set<L: LightBar>(&mut self, light: CarLight, on: bool, bar: &mut L) {
        if on {
            self.state |= light.mask();
        } else {
            self.state &= !light.mask();
        }
        self.refresh(bar);
    }

    #[must_use]
    pub const fn is_on(&self, light: CarLight) -> bool {
        self.state & light.mask() != 0
    }

    /// Steady lights as a bit set of [`CarLight::mask`] values.
    #[must_use]
    pub const fn state(&self) -> u8 {
        self.state
    }

    #[must_use]
    pub const fn indicator(&self) -> Indicator {
        self.indicator
    }

    /// Switches the indicator. Blinking restarts dark and the first flash
    /// comes after [`BLINK_MS`].
    ///
    /// # Errors
    ///
    /// When the blink task cannot be registered the indicator stays off.
    pub fn set_indicator<T, L, const N: usize>(
        &mut self,
        indicator: Indicator,
        timebase: &mut Timebase<T, N>,
        task: T,
        bar: &mut L,
    ) -> Result<(), TimebaseError>
    where
        T: Copy,
        L: LightBar,
    {
        if let Some(handle) = self.blinking.take() {
            timebase.unregister(handle)?;
        }
        self.indicator = Indicator::Off;
        self.blink_on = false;

        let result = if indicator == Indicator::Off {
            Ok(())
        } else {
            timebase.register(task, BLINK_MS).map(|handle| {
                self.blinking = Some(handle);
                self.indicator = indicator;
            })
        };
        self.refresh(bar);
        result
    }

    /// Timebase expiry of the blink task.
    pub fn on_blink<L: LightBar>(&mut self, bar: &mut L) -> Reschedule {
        if self.blinking.is_none() {
            return Reschedule::Cancel;
        }
        self.blink_on = !self.blink_on;
        self.refresh(bar);
        Reschedule::After(BLINK_MS)
    }

    /// Combines the steady lights and the indicator phase.
    #[must_use]
    pub fn frame(&self) -> LampFrame {
        let mut frame = LampFrame::default();
        if self.is_on(CarLight::Light) {
            frame.set(Lamp::FrontRightIn, Rgb::DIM_WHITE);
            frame.set(Lamp::FrontLeftIn, Rgb::DIM_WHITE);
            frame.set(Lamp::BackRightIn, Rgb::DIM_RED);
            frame.set(Lamp::BackLeftIn, Rgb::DIM_RED);
        }
        if self.is_on(CarLight::Headlight) {
            for lamp in Lamp::FRONT {
                frame.set(lamp, Rgb::WHITE);
            }
        }
        if self.is_on(CarLight::Backlight) {
            frame.set(Lamp::BackRightIn, Rgb::WHITE);
            frame.set(Lamp::BackLeftIn, Rgb::WHITE);
        }
        if self.is_on(CarLight::Brakelight) {
            for lamp in Lamp::BACK {
                frame.set(lamp, Rgb::RED);
            }
        }
        if self.blink_on {
            for &lamp in self.indicator.lamps() {
                frame.set(lamp, Rgb::AMBER);
            }
        }
        frame
    }

    pub fn refresh<L: LightBar>(&self, bar: &mut L) {
        bar.show(&self.frame());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timebase::BaseTime;

    #[derive(Default)]
    struct LastFrame(Option<LampFrame>, usize);

    impl LightBar for LastFrame {
        fn show(&mut self, frame: &LampFrame) {
            self.0 = Some(*frame);
            self.1 += 1;
        }
    }

    fn timebase() -> Timebase<u8, 2> {
        let mut timebase = Timebase::new();
        timebase.init(BaseTime::Ms100, 2).unwrap();
        timebase
    }

    #[test]
    fn steady_lights_layer_in_order() {
        let mut bar = LastFrame::default();
        let mut lights = CarLights::new();
        lights.set(CarLight::Light, true, &mut bar);
        let frame = bar.0.unwrap();
        assert_eq!(frame.get(Lamp::FrontLeftIn), Rgb::new(64, 64, 64));
        assert_eq!(frame.get(Lamp::BackRightIn), Rgb::new(64, 0, 0));
        assert_eq!(frame.get(Lamp::FrontLeftOut), Rgb::OFF);

        lights.set(CarLight::Backlight, true, &mut bar);
        assert_eq!(bar.0.unwrap().get(Lamp::BackLeftIn), Rgb::WHITE);

        // Brake lights win over the reversing light.
        lights.set(CarLight::Brakelight, true, &mut bar);
        let frame = bar.0.unwrap();
        assert!(Lamp::BACK.iter().all(|&lamp| frame.get(lamp) == Rgb::RED));

        lights.set(CarLight::Light, false, &mut bar);
        assert!(!lights.is_on(CarLight::Light));
        assert_eq!(lights.state(), 0x0C);
        assert_eq!(bar.1, 4);
    }

    #[test]
    fn indicator_blinks_outer_lamps() {
        let mut timebase = timebase();
        let mut bar = LastFrame::default();
        let mut lights = CarLights::new();
        lights.set(CarLight::Headlight, true, &mut bar);

        lights
            .set_indicator(Indicator::Left, &mut timebase, 7, &mut bar)
            .unwrap();
        assert_eq!(timebase.live_count(), 1);
        assert_eq!(bar.0.unwrap().get(Lamp::FrontLeftOut), Rgb::WHITE);

        assert_eq!(lights.on_blink(&mut bar), Reschedule::After(BLINK_MS));
        let frame = bar.0.unwrap();
        assert_eq!(frame.get(Lamp::FrontLeftOut), Rgb::AMBER);
        assert_eq!(frame.get(Lamp::BackLeftOut), Rgb::AMBER);
        assert_eq!(frame.get(Lamp::FrontRightOut), Rgb::WHITE);
        assert_eq!(frame.get(Lamp::BackRightOut), Rgb::OFF);

        lights.on_blink(&mut bar);
        assert_eq!(bar.0.unwrap().get(Lamp::FrontLeftOut), Rgb::WHITE);
    }

    #[test]
    fn switching_indicator_replaces_the_blink_task() {
        let mut timebase = timebase();
        let mut lights = CarLights::new();
        let mut bar = NoopLightBar;

        lights
            .set_indicator(Indicator::Both, &mut timebase, 7, &mut bar)
            .unwrap();
        lights.on_blink(&mut bar);
        lights
            .set_indicator(Indicator::Right, &mut timebase, 7, &mut bar)
            .unwrap();
        assert_eq!(timebase.live_count(), 1);
        assert_eq!(lights.frame(), LampFrame::default());

        lights
            .set_indicator(Indicator::Off, &mut timebase, 7, &mut bar)
            .unwrap();
        assert_eq!(timebase.live_count(), 0);
        assert_eq!(lights.on_blink(&mut bar), Reschedule::Cancel);
    }

    #[test]
    fn indicator_needs_a_compatible_base() {
        let mut timebase: Timebase<u8, 2> = Timebase::new();
        timebase.init(BaseTime::Ms500, 2).unwrap();
        let mut lights = CarLights::new();
        assert_eq!(
            lights.set_indicator(Indicator::Left, &mut timebase, 7, &mut NoopLightBar),
            Err(TimebaseError::InvalidPeriod)
        );
        assert_eq!(lights.indicator(), Indicator::Off);
    }
}
