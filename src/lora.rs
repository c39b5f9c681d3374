use embassy_embedded_hal::shared_bus::asynch::spi::SpiDevice;
use embassy_sync::{
    blocking_mutex::raw::CriticalSectionRawMutex, channel::Sender, mutex::Mutex,
};
use embassy_time::{Delay, Timer};
use esp_hal::{
    Async,
    gpio::{AnyPin, Input, InputConfig, Output, OutputConfig},
    time::Rate,
};
use heapless::String;
use log::{error, info, warn};
use lora_phy::mod_params::*;
use lora_phy::{
    LoRa, RxMode,
    iv::GenericSx127xInterfaceVariant,
    sx127x::{Config, Sx127x, Sx1276},
};
use static_cell::StaticCell;

use crate::protocol::{MAX_LINE_LEN, MAX_PACKET_LEN, Record};

/// LoRa GPIO pins configuration
pub struct LoraGpios<'a> {
    pub cs: AnyPin<'a>,
    pub reset: AnyPin<'a>,
    pub dio0: AnyPin<'a>,
    pub sck: AnyPin<'a>,
    pub miso: AnyPin<'a>,
    pub mosi: AnyPin<'a>,
}

#[embassy_executor::task]
/// LoRa task that owns the SX1276 radio and runs continuous receive.
/// Each packet is split into its three comma-separated fields and forwarded
/// to the BLE task as a composed serial line. Forwarding is non-blocking:
/// when the channel is full the line is dropped, never the radio.
pub async fn lora_task(
    spi_peripheral: esp_hal::peripherals::SPI2<'static>,
    gpios: LoraGpios<'static>,
    lora_to_ble: Sender<'static, CriticalSectionRawMutex, String<MAX_LINE_LEN>, 10>,
) {
    info!("LoRa task starting...");

    // Initialize SPI
    let spi = esp_hal::spi::master::Spi::new(
        spi_peripheral,
        esp_hal::spi::master::Config::default().with_frequency(Rate::from_mhz(1)),
    )
    .unwrap()
    .with_sck(gpios.sck)
    .with_mosi(gpios.mosi)
    .with_miso(gpios.miso)
    .into_async();

    let spi_bus = SPI_BUS.init(Mutex::new(spi));

    let cs = Output::new(
        gpios.cs,
        esp_hal::gpio::Level::High,
        OutputConfig::default(),
    );
    let spi_device = SpiDevice::new(spi_bus, cs);

    let config = Config {
        chip: Sx1276,
        tcxo_used: false,
        tx_boost: false,
        rx_boost: true,
    };

    let reset = Output::new(
        gpios.reset,
        esp_hal::gpio::Level::High,
        OutputConfig::default(),
    );
    let dio0 = Input::new(gpios.dio0, InputConfig::default());

    let iv = match GenericSx127xInterfaceVariant::new(reset, dio0, None, None) {
        Ok(i) => i,
        Err(e) => {
            error!("Failed to create LoRa interface: {:?}", e);
            return;
        }
    };

    // Private-network sync word: this is a point-to-point link, not LoRaWAN.
    let radio = Sx127x::new(spi_device, iv, config);
    let mut lora: LoraRadio = match LoRa::new(radio, false, Delay).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to create LoRa radio: {:?}", e);
            return;
        }
    };

    // Radio bring-up is retried forever: the relay is useless without it and
    // a power-cycle of the module is the only cure for a dead chip.
    while let Err(e) = lora.init().await {
        info!(". (radio init failed: {:?})", e);
        Timer::after_millis(500).await;
    }
    info!("LoRa radio initialized");

    // Configure carrier frequency from environment variable (set in .cargo/config.toml)
    // Default: 915 MHz - standard frequency for the US 915 MHz ISM band
    let frequency: u32 = if let Some(freq_str) = option_env!("LORA_RX_FREQUENCY") {
        match freq_str.parse::<u32>() {
            Ok(v)
                if (433_050_000..=434_790_000).contains(&v)
                    || (863_000_000..=870_000_000).contains(&v)
                    || (902_000_000..=928_000_000).contains(&v) =>
            {
                info!(
                    "Using frequency from config: {} Hz ({:.2} MHz)",
                    v,
                    v as f32 / 1_000_000.0
                );
                v
            }
            Ok(v) => {
                warn!(
                    "Frequency {} Hz ({:.2} MHz) outside common ISM bands, using default 915 MHz",
                    v,
                    v as f32 / 1_000_000.0
                );
                915_000_000
            }
            Err(_) => {
                warn!(
                    "Invalid frequency value '{}', using default 915 MHz",
                    freq_str
                );
                915_000_000
            }
        }
    } else {
        info!("Frequency not configured, using default 915 MHz");
        915_000_000
    };

    // SF7 + BW125 matches the sender module's default air settings
    let modulation_params = match lora.create_modulation_params(
        SpreadingFactor::_7,
        Bandwidth::_125KHz,
        CodingRate::_4_5,
        frequency,
    ) {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to create LoRa modulation parameters: {:?}", e);
            return;
        }
    };

    // Create RX packet parameters; the relay never transmits
    let rx_packet_params = match lora.create_rx_packet_params(
        8,
        false,
        MAX_PACKET_LEN as u8,
        true,
        false,
        &modulation_params,
    ) {
        Ok(p) => p,
        Err(e) => {
            error!("Failed to create LoRa RX packet parameters: {:?}", e);
            return;
        }
    };

    // Prepare for continuous receive
    if let Err(e) = lora
        .prepare_for_rx(RxMode::Continuous, &modulation_params, &rx_packet_params)
        .await
    {
        error!("Failed to prepare LoRa for RX: {:?}", e);
        return;
    }
    info!("LoRa radio ready, listening for packets");

    let mut rx_buffer = [0u8; MAX_PACKET_LEN];

    loop {
        match lora.rx(&rx_packet_params, &mut rx_buffer).await {
            Ok((len, status)) => {
                info!("LoRa RX: received {} bytes, RSSI: {:?}", len, status.rssi);
                forward_packet(&rx_buffer[..len as usize], &lora_to_ble);
            }
            Err(e) => warn!("LoRa RX error: {:?}", e),
        }
    }
}

/// Parses one received packet and hands the composed line to the BLE task.
/// Packets that are not UTF-8 or carry fewer than two commas are dropped
/// without output, matching the sender's fire-and-forget contract.
fn forward_packet(
    data: &[u8],
    lora_to_ble: &Sender<'static, CriticalSectionRawMutex, String<MAX_LINE_LEN>, 10>,
) {
    let Ok(text) = core::str::from_utf8(data) else {
        return;
    };
    let Some(record) = Record::parse(text) else {
        return;
    };

    info!("Data 1: {}", record.data1);
    info!("Data 2: {}", record.data2);
    info!("Data 3: {}", record.data3);

    match record.to_line() {
        Ok(line) => match lora_to_ble.try_send(line) {
            Ok(_) => info!("Record forwarded from LoRa to BLE"),
            Err(_) => warn!("BLE line buffer full - record dropped"),
        },
        Err(e) => error!("Failed to compose serial line: {:?}", e),
    }
}

pub type LoraRadio = LoRa<
    Sx127x<
        SpiDevice<
            'static,
            CriticalSectionRawMutex,
            esp_hal::spi::master::Spi<'static, Async>,
            Output<'static>,
        >,
        GenericSx127xInterfaceVariant<Output<'static>, Input<'static>>,
        Sx1276,
    >,
    Delay,
>;

static SPI_BUS: StaticCell<
    Mutex<CriticalSectionRawMutex, esp_hal::spi::master::Spi<'static, Async>>,
> = StaticCell::new();
