//! ESP32 firmware relaying LoRa packets to a BLE serial channel.
//!
//! A single SX1276 receive task splits each comma-delimited packet into
//! three fields and hands the composed semicolon-delimited line to a BLE
//! task, which notifies it over a Nordic UART Service to whichever central
//! is connected.

#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]

use embassy_executor::Spawner;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, Timer};
use esp_backtrace as _;
use esp_hal::clock::CpuClock;
use esp_hal::timer::timg::TimerGroup;
use heapless::String;
use log::info;
use lora_ble_relay::ble::ble_task;
use lora_ble_relay::lora::{LoraGpios, lora_task};
use lora_ble_relay::protocol::MAX_LINE_LEN;
use static_cell::StaticCell;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    // Initialize ESP32 peripherals and clock
    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    // Heap is needed by the BLE radio stack
    esp_alloc::heap_allocator!(size: 72 * 1024);

    esp_println::logger::init_logger_from_env();
    info!("LoRa receiver starting");

    // Initialize the RTOS timer
    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    // Initialize the BLE radio
    let radio_init = esp_radio::init().expect("Failed to initialize BLE controller");
    let radio = RADIO.init(radio_init);

    // Channel carrying composed serial lines from the radio to the BLE side
    let lora_to_ble = LORA_TO_BLE.init(Channel::new());

    // Spawn the BLE task to handle BLE communication
    spawner
        .spawn(ble_task(radio, peripherals.BT, lora_to_ble.receiver()))
        .unwrap();

    // SX1276 wiring: VSPI plus the transceiver's control pins
    let gpios = LoraGpios {
        cs: peripherals.GPIO5.into(),
        reset: peripherals.GPIO14.into(),
        dio0: peripherals.GPIO2.into(),
        sck: peripherals.GPIO18.into(),
        miso: peripherals.GPIO19.into(),
        mosi: peripherals.GPIO23.into(),
    };

    spawner
        .spawn(lora_task(peripherals.SPI2, gpios, lora_to_ble.sender()))
        .unwrap();

    // Main loop: keep the system running
    loop {
        Timer::after(Duration::from_secs(1)).await;
    }
}

static RADIO: StaticCell<esp_radio::Controller<'static>> = StaticCell::new();
static LORA_TO_BLE: StaticCell<Channel<CriticalSectionRawMutex, String<MAX_LINE_LEN>, 10>> =
    StaticCell::new();
