use embassy_time::{Duration, Ticker};

use super::with_robot;
use crate::hw::CalibrationFlash;
use crate::telemetry::{TelemetryDrain, log_drained};

const TELEMETRY_PERIOD: Duration = Duration::from_millis(250);
const PERSIST_PERIOD: Duration = Duration::from_secs(2);

/// Forwards new telemetry records to the log.
#[embassy_executor::task]
pub async fn telemetry() -> ! {
    let mut ticker = Ticker::every(TELEMETRY_PERIOD);
    let mut drain = TelemetryDrain::new();
    loop {
        ticker.next().await;
        if let Some(drained) = with_robot(|robot| drain.drain(robot.telemetry())) {
            log_drained(&drained);
        }
    }
}

/// Writes the calibration mirror back to flash after it changed.
#[embassy_executor::task]
pub async fn persist(mut flash: CalibrationFlash) -> ! {
    let mut ticker = Ticker::every(PERSIST_PERIOD);
    loop {
        ticker.next().await;
        let Some(image) = with_robot(|robot| robot.store_mut().take_commit()).flatten() else {
            continue;
        };

        match flash.commit(&image) {
            Ok(()) => defmt::info!("flash: calibration saved"),
            Err(_) => defmt::warn!("flash: calibration write failed"),
        }
    }
}
