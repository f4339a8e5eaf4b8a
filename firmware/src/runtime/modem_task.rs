use embassy_futures::join::join;
use embassy_futures::select::{Either, select};
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_stm32::usart::{
    BufferedInterruptHandler, BufferedUart, Config as UartConfig, DataBits, Parity, StopBits,
};
use embassy_time::{Duration, Instant, Timer, with_timeout};
use embedded_io_async::{Read, Write};
use sampler_core::protocol::{CommandLine, LineAssembler, ModemCommand, ModemEvent};
use static_cell::StaticCell;

use super::Readiness;
use crate::config;
use crate::modem::{self, LineOutcome, ModemError, ModemLink, Responses};

const MODEM_UART_BAUD: u32 = 115_200;
const MODEM_UART_BUFFER_SIZE: usize = 256;
const UART_ERROR_BACKOFF: Duration = Duration::from_millis(5);
const BRING_UP_RETRY: Duration = Duration::from_secs(10);
const COMMAND_TIMEOUT: Duration = Duration::from_secs(5);
const JOIN_TIMEOUT: Duration = Duration::from_secs(20);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

static UART_TX_BUFFER: StaticCell<[u8; MODEM_UART_BUFFER_SIZE]> = StaticCell::new();
static UART_RX_BUFFER: StaticCell<[u8; MODEM_UART_BUFFER_SIZE]> = StaticCell::new();

embassy_stm32::bind_interrupts!(struct UartIrqs {
    USART3_4_5_6_LPUART1 => BufferedInterruptHandler<hal::peripherals::USART5>;
});

#[embassy_executor::task]
pub async fn run(
    link: &'static ModemLink,
    readiness: &'static Readiness,
    usart: Peri<'static, hal::peripherals::USART5>,
    tx_pin: Peri<'static, hal::peripherals::PB0>,
    rx_pin: Peri<'static, hal::peripherals::PB1>,
) -> ! {
    let mut config = UartConfig::default();
    config.baudrate = MODEM_UART_BAUD;
    config.data_bits = DataBits::DataBits8;
    config.stop_bits = StopBits::STOP1;
    config.parity = Parity::ParityNone;

    let uart = BufferedUart::new(
        usart,
        rx_pin,
        tx_pin,
        UART_TX_BUFFER.init([0; MODEM_UART_BUFFER_SIZE]),
        UART_RX_BUFFER.init([0; MODEM_UART_BUFFER_SIZE]),
        UartIrqs,
        config,
    )
    .expect("failed to initialize modem UART");

    let (mut uart_tx, mut uart_rx) = uart.split();
    let responses = Responses::new();

    let modem_to_core = async {
        let mut assembler: LineAssembler = LineAssembler::new();
        let mut ingress = [0u8; 64];
        loop {
            let count = match uart_rx.read(&mut ingress).await {
                Ok(count) => count,
                Err(_) => {
                    defmt::warn!("modem: UART read error");
                    Timer::after(UART_ERROR_BACKOFF).await;
                    continue;
                }
            };

            for &byte in &ingress[..count] {
                match assembler.push(byte) {
                    Ok(Some(line)) => handle_line(line, readiness, &responses),
                    Ok(None) => {}
                    Err(err) => defmt::warn!("modem: {}", defmt::Display2Format(&err)),
                }
            }
        }
    };

    let core_to_modem = async {
        while let Err(err) = bring_up(&mut uart_tx, &responses).await {
            defmt::warn!("modem: bring-up failed ({})", defmt::Display2Format(&err));
            Timer::after(BRING_UP_RETRY).await;
        }
        defmt::info!("modem: bring-up complete");

        let requests = link.requests();
        let mut next_sntp_query = Instant::now();
        loop {
            match select(requests.receive(), Timer::at(next_sntp_query)).await {
                Either::First(request) => {
                    let command = ModemCommand::MqttPublish {
                        topic: &request.topic,
                        payload: &request.payload,
                        qos: request.qos,
                        retain: request.retain,
                    };
                    let result = exchange(&mut uart_tx, &responses, &command).await;
                    if let Err(err) = result {
                        defmt::warn!("modem: publish failed ({})", defmt::Display2Format(&err));
                    }
                    link.complete(request.seq, result);
                }
                Either::Second(()) => {
                    if let Err(err) =
                        exchange(&mut uart_tx, &responses, &ModemCommand::QuerySntpTime).await
                    {
                        defmt::warn!("modem: time query failed ({})", defmt::Display2Format(&err));
                    }
                    next_sntp_query = Instant::now() + config::SNTP_QUERY_INTERVAL;
                }
            }
        }
    };

    join(modem_to_core, core_to_modem).await;
    loop {
        core::future::pending::<()>().await;
    }
}

fn handle_line(line: &str, readiness: &Readiness, responses: &Responses) {
    let event = match ModemEvent::parse(line) {
        Ok(event) => event,
        Err(err) => {
            defmt::warn!("modem: {}", defmt::Display2Format(&err));
            return;
        }
    };

    if let LineOutcome::Ignored(text) =
        modem::route_event(event, readiness, responses, Instant::now())
    {
        defmt::trace!("modem: ignored {=str}", text);
    }
}

async fn bring_up<W: Write>(uart_tx: &mut W, responses: &Responses) -> Result<(), ModemError> {
    let script = [
        ModemCommand::Attention,
        ModemCommand::EchoOff,
        ModemCommand::StationMode,
        ModemCommand::JoinAccessPoint {
            ssid: config::WIFI_SSID,
            password: config::WIFI_PASSWORD,
        },
        ModemCommand::ConfigureSntp {
            utc_offset_hours: config::UTC_OFFSET_HOURS,
            server: config::SNTP_SERVER,
        },
        ModemCommand::MqttUserConfig {
            client_id: config::MQTT_CLIENT_ID,
            username: config::MQTT_USER,
            password: config::MQTT_PASSWORD,
        },
        ModemCommand::MqttConnect {
            host: config::MQTT_HOST,
            port: config::MQTT_PORT,
        },
    ];

    for command in &script {
        exchange(uart_tx, responses, command).await?;
    }
    Ok(())
}

/// Sends one command and waits for its final result line.
async fn exchange<W: Write>(
    uart_tx: &mut W,
    responses: &Responses,
    command: &ModemCommand<'_>,
) -> Result<(), ModemError> {
    let mut line = CommandLine::new();
    command.render(&mut line)?;

    while responses.try_receive().is_ok() {}

    uart_tx
        .write_all(line.as_bytes())
        .await
        .map_err(|_| ModemError::Transport)?;
    uart_tx.flush().await.map_err(|_| ModemError::Transport)?;

    match with_timeout(command_timeout(command), responses.receive()).await {
        Ok(true) => Ok(()),
        Ok(false) => Err(ModemError::Rejected),
        Err(_) => Err(ModemError::Timeout),
    }
}

fn command_timeout(command: &ModemCommand<'_>) -> Duration {
    match command {
        ModemCommand::JoinAccessPoint { .. } => JOIN_TIMEOUT,
        ModemCommand::MqttConnect { .. } => CONNECT_TIMEOUT,
        _ => COMMAND_TIMEOUT,
    }
}
