use discbot_core::button::Button;
use discbot_core::range::{RangeKind, RangeSensors, Readings, SIDE_COUNT, Side};
use embassy_futures::select::select3;
use embassy_stm32::exti::ExtiInput;

use super::{COLOR_REQUEST, RANGE_REQUEST, with_robot};
use crate::hw::{ColorProbe, Sonar};

/// Current button levels; a set bit means released (pins idle high).
pub(super) fn button_levels(
    red: &ExtiInput<'static>,
    green: &ExtiInput<'static>,
    blue: &ExtiInput<'static>,
) -> u8 {
    [(red, Button::Red), (green, Button::Green), (blue, Button::Blue)]
        .into_iter()
        .filter(|(input, _)| input.is_high())
        .fold(0, |levels, (_, button)| levels | button.mask())
}

/// Feeds every button edge to the debouncer.
#[embassy_executor::task]
pub async fn buttons(
    mut red: ExtiInput<'static>,
    mut green: ExtiInput<'static>,
    mut blue: ExtiInput<'static>,
) -> ! {
    loop {
        select3(
            red.wait_for_any_edge(),
            green.wait_for_any_edge(),
            blue.wait_for_any_edge(),
        )
        .await;
        let levels = button_levels(&red, &green, &blue);
        with_robot(|robot| robot.on_button_levels(levels));
    }
}

/// Runs one conversion per request from the measurement timer.
#[embassy_executor::task]
pub async fn colors(mut probe: ColorProbe) -> ! {
    loop {
        COLOR_REQUEST.wait().await;
        let Some(timing) = with_robot(|robot| *robot.colors().timing()) else {
            continue;
        };

        let frame = probe.acquire(&timing).await;
        let changed = with_robot(|robot| robot.on_color_frame(frame))
            .filter(|report| report.changed);
        if let Some(report) = changed {
            let [left, middle, right] = report.classification.indexes;
            defmt::info!("colors: {} {} {}", left, middle, right);
        }
    }
}

/// Answers range pings from the measurement timer.
#[embassy_executor::task]
pub async fn ranges(mut sonar: Sonar) -> ! {
    loop {
        let sensors = RANGE_REQUEST.wait().await;

        if sensors.intersects(RangeSensors::ULTRASONIC) {
            let mut echoes: Readings = [None; SIDE_COUNT];
            if sensors.contains(RangeKind::Ultrasonic, Side::Front) {
                echoes[Side::Front.index()] = sonar.echo_mm().await;
            }
            if let Some(Some(event)) = with_robot(|robot| robot.on_ultrasonic(echoes)) {
                defmt::debug!("range: {}", event);
            }
        }
        // Infrared sensors are not populated.
        if sensors.intersects(RangeSensors::INFRARED) {
            with_robot(|robot| robot.on_infrared([None; SIDE_COUNT]));
        }
    }
}
