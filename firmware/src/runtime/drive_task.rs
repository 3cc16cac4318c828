use discbot_core::motion::Wheel;
use embassy_stm32::exti::ExtiInput;
use embassy_time::{Duration, Ticker};

use super::{BASE_TIME, with_robot};

/// Drives the scheduler at the base time and reports what the pass produced.
#[embassy_executor::task]
pub async fn tick() -> ! {
    let mut ticker = Ticker::every(Duration::from_millis(u64::from(BASE_TIME.as_millis())));
    loop {
        ticker.next().await;

        let Some((completions, buttons)) = with_robot(|robot| {
            robot.tick();
            (robot.take_completions(), robot.take_button_events())
        }) else {
            continue;
        };

        for done in completions {
            defmt::debug!("motion: {=str} finished", done.label());
        }
        for event in buttons {
            defmt::debug!(
                "button: {=str} {=str}",
                event.button.label(),
                if event.pressed { "pressed" } else { "released" }
            );
        }
    }
}

/// Counts encoder edges for one wheel.
#[embassy_executor::task(pool_size = 2)]
pub async fn encoder(wheel: Wheel, mut input: ExtiInput<'static>) -> ! {
    loop {
        input.wait_for_rising_edge().await;
        with_robot(|robot| robot.on_encoder_pulse(wheel));
    }
}
