use core::cell::RefCell;

use cortex_m::interrupt;
use cortex_m::register::primask;
use critical_section::{self, RawRestoreState};
use defmt_rtt as _;
use discbot_core::motion::Wheel;
use discbot_core::robot::DiscBot;
use discbot_core::timebase::BaseTime;
use embassy_executor::Spawner;
use embassy_stm32 as hal;
use embassy_stm32::exti::ExtiInput;
use embassy_stm32::gpio::{Level, Output, OutputType, Pull, Speed};
use embassy_stm32::time::hz;
use embassy_stm32::timer::simple_pwm::{PwmPin, SimplePwm};
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;

use crate::hw::{
    BoardAccessories, CalibrationFlash, ColorProbe, ColorRequest, HBridgeDriver, RangeRequest,
    SignalSampler, Sonar,
};
use crate::storage::FlashMirror;

mod console_task;
mod drive_task;
mod sensor_task;
mod service_task;

critical_section::set_impl!(InterruptCriticalSection);

struct InterruptCriticalSection;

unsafe impl critical_section::Impl for InterruptCriticalSection {
    unsafe fn acquire() -> RawRestoreState {
        let primask = primask::read();
        interrupt::disable();
        primask.is_active()
    }

    unsafe fn release(restore_state: RawRestoreState) {
        if restore_state {
            unsafe {
                interrupt::enable();
            }
        }
    }
}

pub(super) type Robot = DiscBot<HBridgeDriver, FlashMirror, SignalSampler, BoardAccessories>;

/// Scheduler base time; every registered period is a multiple of it.
pub(super) const BASE_TIME: BaseTime = BaseTime::Ms10;

/// H-bridge PWM frequency (20 ms period).
const MOTOR_PWM_HZ: u32 = 50;
/// Buzzer start frequency; every note retunes the timer.
const BUZZER_PWM_HZ: u32 = 440;

pub(super) static ROBOT: Mutex<CriticalSectionRawMutex, RefCell<Option<Robot>>> =
    Mutex::new(RefCell::new(None));
pub(super) static COLOR_REQUEST: ColorRequest = ColorRequest::new();
pub(super) static RANGE_REQUEST: RangeRequest = RangeRequest::new();

/// Runs `f` against the robot; `None` until bring-up finished.
pub(super) fn with_robot<R>(f: impl FnOnce(&mut Robot) -> R) -> Option<R> {
    ROBOT.lock(|cell| cell.borrow_mut().as_mut().map(f))
}

#[embassy_executor::main]
pub async fn main(spawner: Spawner) {
    let config = hal::Config::default();
    let hal::Peripherals {
        PA0,
        PA1,
        PA2,
        PA3,
        PA4,
        PA5,
        PA6,
        PA7,
        PA8,
        PA9,
        PA10,
        PA11,
        PA12,
        PA15,
        PB0,
        PB1,
        PB2,
        PB3,
        PB4,
        PB5,
        PB6,
        PB7,
        PB8,
        PB9,
        EXTI0,
        EXTI3,
        EXTI4,
        EXTI5,
        EXTI6,
        EXTI7,
        EXTI9,
        TIM2,
        TIM3,
        USART2,
        FLASH,
        ..
    } = hal::init(config);

    let pwm = SimplePwm::new(
        TIM3,
        Some(PwmPin::new(PA6, OutputType::PushPull)),
        Some(PwmPin::new(PA7, OutputType::PushPull)),
        None,
        None,
        hz(MOTOR_PWM_HZ),
        Default::default(),
    );
    let driver = HBridgeDriver::new(
        pwm,
        [
            Output::new(PA0, Level::Low, Speed::Low),
            Output::new(PA1, Level::Low, Speed::Low),
        ],
        [
            Output::new(PA4, Level::Low, Speed::Low),
            Output::new(PA5, Level::Low, Speed::Low),
        ],
    );

    let mut flash = CalibrationFlash::new(FLASH);
    let store = FlashMirror::from_bytes(flash.load());

    let red = ExtiInput::new(PB5, EXTI5, Pull::Up);
    let green = ExtiInput::new(PB6, EXTI6, Pull::Up);
    let blue = ExtiInput::new(PB7, EXTI7, Pull::Up);
    let levels = sensor_task::button_levels(&red, &green, &blue);

    let buzzer = SimplePwm::new(
        TIM2,
        Some(PwmPin::new(PA15, OutputType::PushPull)),
        None,
        None,
        None,
        hz(BUZZER_PWM_HZ),
        Default::default(),
    );
    let accessories = BoardAccessories::new(
        &RANGE_REQUEST,
        buzzer,
        [
            Output::new(PA11, Level::Low, Speed::Low),
            Output::new(PA12, Level::Low, Speed::Low),
        ],
    );

    let mut robot = DiscBot::new(driver, store, SignalSampler(&COLOR_REQUEST), accessories);
    if let Err(error) = robot.init(BASE_TIME, levels) {
        defmt::error!("robot bring-up failed: {}", error);
    }
    ROBOT.lock(|cell| *cell.borrow_mut() = Some(robot));
    defmt::info!(
        "discbot up, base time {=u16} ms, buttons {=u8:b}",
        BASE_TIME.as_millis(),
        levels
    );

    let probe = ColorProbe::new(
        [
            Output::new(PB1, Level::Low, Speed::Low),
            Output::new(PB2, Level::Low, Speed::Low),
        ],
        [
            Output::new(PA8, Level::Low, Speed::Low),
            Output::new(PA9, Level::Low, Speed::Low),
        ],
        Output::new(PA10, Level::Low, Speed::Low),
        ExtiInput::new(PB0, EXTI0, Pull::None),
    );

    spawner
        .spawn(drive_task::tick())
        .expect("failed to spawn timebase task");
    spawner
        .spawn(drive_task::encoder(
            Wheel::Left,
            ExtiInput::new(PB3, EXTI3, Pull::None),
        ))
        .expect("failed to spawn left encoder task");
    spawner
        .spawn(drive_task::encoder(
            Wheel::Right,
            ExtiInput::new(PB4, EXTI4, Pull::None),
        ))
        .expect("failed to spawn right encoder task");
    spawner
        .spawn(sensor_task::buttons(red, green, blue))
        .expect("failed to spawn button task");
    spawner
        .spawn(sensor_task::colors(probe))
        .expect("failed to spawn colour sensor task");
    spawner
        .spawn(sensor_task::ranges(Sonar::new(
            Output::new(PB8, Level::Low, Speed::Low),
            ExtiInput::new(PB9, EXTI9, Pull::Down),
        )))
        .expect("failed to spawn range task");
    spawner
        .spawn(console_task::run(USART2, PA2, PA3))
        .expect("failed to spawn console task");
    spawner
        .spawn(service_task::telemetry())
        .expect("failed to spawn telemetry task");
    spawner
        .spawn(service_task::persist(flash))
        .expect("failed to spawn calibration task");

    core::future::pending::<()>().await;
}
