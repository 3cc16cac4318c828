use core::fmt::Write as _;

use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_stm32::usart::{
    BufferedUart, BufferedUartTx, Config as UartConfig, DataBits, Parity, StopBits,
};
use embassy_time::{Duration, Timer};
use embedded_io_async::{Read, Write};

use super::with_robot;
use crate::repl::{LineHandler, MAX_LINE_LEN, PROMPT, Reply, ReplSession};

const CONSOLE_UART_BUFFER_SIZE: usize = 256;
const CONSOLE_UART_BAUD: u32 = 115_200;

static mut UART_TX_BUFFER: [u8; CONSOLE_UART_BUFFER_SIZE] = [0; CONSOLE_UART_BUFFER_SIZE];
static mut UART_RX_BUFFER: [u8; CONSOLE_UART_BUFFER_SIZE] = [0; CONSOLE_UART_BUFFER_SIZE];

embassy_stm32::bind_interrupts!(struct UartIrqs {
    USART2_LPUART2 => embassy_stm32::usart::BufferedInterruptHandler<hal::peripherals::USART2>;
});

/// Console lines run against the shared robot.
struct SharedRobot;

impl LineHandler for SharedRobot {
    fn handle_line(&mut self, line: &str, reply: &mut Reply) {
        if with_robot(|robot| robot.handle_line(line, reply)).is_none() {
            let _ = reply.push_str("robot not ready\r\n");
        }
    }
}

#[embassy_executor::task]
pub async fn run(
    usart: Peri<'static, hal::peripherals::USART2>,
    tx_pin: Peri<'static, hal::peripherals::PA2>,
    rx_pin: Peri<'static, hal::peripherals::PA3>,
) -> ! {
    let mut config = UartConfig::default();
    config.baudrate = CONSOLE_UART_BAUD;
    config.data_bits = DataBits::DataBits8;
    config.stop_bits = StopBits::STOP1;
    config.parity = Parity::ParityNone;

    let uart = unsafe {
        BufferedUart::new(
            usart,
            rx_pin,
            tx_pin,
            &mut UART_TX_BUFFER,
            &mut UART_RX_BUFFER,
            UartIrqs,
            config,
        )
        .expect("failed to initialize console UART")
    };

    let (mut uart_tx, mut uart_rx) = uart.split();
    let mut session = ReplSession::new(SharedRobot);
    let mut reply = Reply::new();

    session.greet(&mut reply);
    send(&mut uart_tx, &mut reply).await;

    let mut ingress = [0u8; MAX_LINE_LEN];
    loop {
        match uart_rx.read(&mut ingress).await {
            Ok(count) if count > 0 => {
                for byte in &ingress[..count] {
                    if let Err(error) = session.ingest(*byte, &mut reply) {
                        defmt::warn!("console: line dropped");
                        let _ = write!(reply, "\r\nerror: {error}\r\n{PROMPT}");
                    }
                    if !reply.is_empty() {
                        send(&mut uart_tx, &mut reply).await;
                    }
                }
            }
            Ok(_) => {}
            Err(_) => {
                defmt::warn!("console: UART read error");
                Timer::after(Duration::from_millis(5)).await;
            }
        }
    }
}

/// Writes and clears the pending reply.
async fn send(uart_tx: &mut BufferedUartTx<'static>, reply: &mut Reply) {
    let data = reply.as_bytes();
    let mut written = 0usize;

    while written < data.len() {
        match uart_tx.write(&data[written..]).await {
            Ok(count) if count > 0 => {
                written += count;
            }
            Ok(_) => {}
            Err(_) => {
                defmt::warn!("console: UART write error");
                Timer::after(Duration::from_millis(5)).await;
                break;
            }
        }
    }

    if written == data.len() && uart_tx.flush().await.is_err() {
        defmt::warn!("console: UART flush error");
    }
    reply.clear();
}
