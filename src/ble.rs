use bt_hci::controller::ExternalController;
use embassy_futures::join::join;
use embassy_futures::select::{Either, select};
use embassy_sync::{blocking_mutex::raw::CriticalSectionRawMutex, channel::Receiver};
use embassy_time::{Duration, Timer};
use esp_radio::{Controller, ble::controller::BleConnector};
use heapless::String;
use log::{debug, error, info, warn};
use trouble_host::prelude::*;
use trouble_host::{
    Address,
    gatt::{GattConnection, GattConnectionEvent, GattEvent},
    prelude::{AdStructure, gatt_service},
};

use crate::protocol::MAX_LINE_LEN;

const CONNECTIONS_MAX: usize = 1;
const L2CAP_CHANNELS_MAX: usize = 1;

const DEVICE_NAME: &str = "ESP32-LoRa-Relay";

/// Nordic UART Service UUID, little-endian, for the advertising payload.
const UART_SERVICE_UUID: [u8; 16] = [
    0x9e, 0xca, 0xdc, 0x24, 0x0e, 0xe5, 0xa9, 0xe0, 0x93, 0xf3, 0xa3, 0xb5, 0x01, 0x00, 0x40, 0x6e,
];

#[embassy_executor::task]
/// BLE task that exposes the relay as a serial endpoint: a Nordic UART
/// Service whose TX characteristic notifies one line per parsed packet.
/// Advertises until a central connects and returns to advertising when it
/// disconnects. Lines keep arriving from the LoRa task either way; the
/// channel buffers a few while no one is listening.
pub async fn ble_task(
    radio: &'static Controller<'static>,
    bt_peripheral: esp_hal::peripherals::BT<'static>,
    mut lora_to_ble: Receiver<'static, CriticalSectionRawMutex, String<MAX_LINE_LEN>, 10>,
) {
    info!("BLE task starting...");

    // Initialize BLE controller
    let transport = match BleConnector::new(radio, bt_peripheral, Default::default()) {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to create BLE connector: {:?}", e);
            return; // Exit the task
        }
    };
    let controller = ExternalController::<_, 20>::new(transport);
    // Set a random address for the BLE device
    let address: Address = Address::random([0xff, 0x8f, 0x1a, 0x05, 0xe4, 0xff]);
    // Initialize host resources for BLE stack
    let mut resources: HostResources<DefaultPacketPool, CONNECTIONS_MAX, L2CAP_CHANNELS_MAX> =
        HostResources::new();
    let stack = trouble_host::new(controller, &mut resources).set_random_address(address);
    let Host {
        mut peripheral,
        runner,
        ..
    } = stack.build();

    // Create the GATT server with peripheral configuration
    let server = match Server::new_with_config(GapConfig::Peripheral(PeripheralConfig {
        name: DEVICE_NAME,
        appearance: &appearance::power_device::GENERIC_POWER_DEVICE,
    })) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create GATT server: {:?}", e);
            return;
        }
    };
    info!("GATT server created with UART service");

    // Prepare advertising data; the 128-bit service UUID leaves no room for
    // the name, which goes in the scan response instead.
    let mut adv_data = [0; 31];
    let adv_data_len = match AdStructure::encode_slice(
        &[
            AdStructure::Flags(LE_GENERAL_DISCOVERABLE | BR_EDR_NOT_SUPPORTED),
            AdStructure::ServiceUuids128(&[UART_SERVICE_UUID]),
        ],
        &mut adv_data[..],
    ) {
        Ok(len) => len,
        Err(e) => {
            error!("Failed to encode advertising data: {:?}", e);
            return;
        }
    };

    let mut scan_data = [0; 31];
    let scan_data_len = match AdStructure::encode_slice(
        &[AdStructure::CompleteLocalName(DEVICE_NAME.as_bytes())],
        &mut scan_data[..],
    ) {
        Ok(len) => len,
        Err(e) => {
            error!("Failed to encode scan data: {:?}", e);
            return;
        }
    };

    // Run the BLE runner and advertising loop concurrently
    join(ble_runner(runner), async {
        loop {
            info!("Starting BLE advertising as {}", DEVICE_NAME);
            // Advertise and wait for connection
            let acceptor = match peripheral
                .advertise(
                    &Default::default(),
                    Advertisement::ConnectableScannableUndirected {
                        adv_data: &adv_data[..adv_data_len],
                        scan_data: &scan_data[..scan_data_len],
                    },
                )
                .await
            {
                Ok(a) => a,
                Err(e) => {
                    error!("Failed to start BLE advertising: {:?}", e);
                    Timer::after(Duration::from_secs(1)).await;
                    continue;
                }
            };
            let conn = match acceptor.accept().await {
                Ok(c) => {
                    info!("BLE connection accepted");
                    c
                }
                Err(e) => {
                    error!("Failed to accept BLE connection: {:?}", e);
                    continue;
                }
            };
            let conn = match conn.with_attribute_server(&server) {
                Ok(c) => c,
                Err(e) => {
                    error!("Failed to attach GATT server to connection: {:?}", e);
                    continue;
                }
            };

            // Handle the GATT connection
            gatt_events_task(&server, &conn, &mut lora_to_ble).await;
            warn!("BLE connection closed, restarting advertising");
        }
    })
    .await;
}

/// Background task that runs the BLE stack's event loop.
/// This must run continuously alongside other BLE tasks.
async fn ble_runner(
    runner: Runner<'_, ExternalController<BleConnector<'static>, 20>, DefaultPacketPool>,
) {
    let mut runner = runner;
    runner.run().await.unwrap();
}

/// Serves one GATT connection: forwards every line from the LoRa task as a
/// TX notification and drains connection events until the central leaves.
/// The relay is one-way, so writes to the RX characteristic are ignored.
async fn gatt_events_task(
    server: &Server<'_>,
    conn: &GattConnection<'_, '_, DefaultPacketPool>,
    lora_to_ble: &mut Receiver<'static, CriticalSectionRawMutex, String<MAX_LINE_LEN>, 10>,
) {
    info!("GATT event handler started");
    loop {
        match select(conn.next(), lora_to_ble.receive()).await {
            Either::First(event) => match event {
                GattConnectionEvent::Disconnected { .. } => {
                    info!("BLE client disconnected");
                    break;
                }
                GattConnectionEvent::Gatt { event } => match &event {
                    GattEvent::Write(write_event)
                        if write_event.handle() == server.uart_service.rx.handle =>
                    {
                        debug!(
                            "Ignoring {} bytes written to RX characteristic (one-way relay)",
                            write_event.data().len()
                        );
                    }
                    GattEvent::Read(read_event) => {
                        debug!("Read event - handle: {:?}", read_event.handle());
                    }
                    _ => {}
                },
                _ => {}
            },
            Either::Second(line) => {
                // The stack negotiates the MTU; a default 23-byte MTU will
                // truncate long lines, Android centrals negotiate 247+.
                let mut value = [0u8; MAX_LINE_LEN];
                value[..line.len()].copy_from_slice(line.as_bytes());
                match server.uart_service.tx.notify(conn, &value).await {
                    Ok(_) => info!("Line forwarded to BLE central ({} bytes)", line.len()),
                    Err(e) => error!("Failed to send BLE notification: {:?}", e),
                }
            }
        }
    }
}

// GATT Server definition
/// GATT server exposing the Nordic UART Service as the relay's serial port.
#[gatt_server]
struct Server {
    uart_service: UartService,
}

/// Nordic UART Service: TX notifies outbound lines, RX accepts writes from
/// the central (unused by the relay but part of the service contract).
#[gatt_service(uuid = "6e400001-b5a3-f393-e0a9-e50e24dcca9e")]
struct UartService {
    /// TX characteristic: one notification per relayed line.
    #[characteristic(uuid = "6e400003-b5a3-f393-e0a9-e50e24dcca9e", read, notify, value = [0u8; 261])]
    tx: [u8; 261],
    /// RX characteristic: inbound writes from the central.
    #[characteristic(uuid = "6e400002-b5a3-f393-e0a9-e50e24dcca9e", write, value = [0u8; 261])]
    rx: [u8; 261],
}
