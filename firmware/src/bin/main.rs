#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]

use clipbox::player::{self, AdpcmCodec};
use clipbox::sd;
use clipbox::system::EspSystem;
use clipbox::web::WebTransport;
use clipbox::wifi::{self, Credentials};
use clipbox::{mk_static, Clipbox, PrintErr};
use clipbox_engine::{Devices, Jukebox};
use defmt::{error, info};
use embassy_executor::Spawner;
use embassy_time::{Instant, Timer};
use esp_hal::gpio::{Input, InputConfig, Level, Output, OutputConfig, Pull};
use esp_hal::spi::master::Spi;
use esp_hal::time::Rate;
use esp_hal::timer::timg::TimerGroup;
use esp_hal::uart::{self, UartRx};
use esp_hal::{clock::CpuClock, spi};
use esp_wifi::EspWifiController;
use {esp_backtrace as _, esp_println as _};

extern crate alloc;

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

#[esp_hal_embassy::main]
async fn main(spawner: Spawner) {
    let config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(config);

    esp_alloc::heap_allocator!(size: 64 * 1024);
    // Wi-Fi needs more RAM - so we've added some more
    esp_alloc::heap_allocator!(#[unsafe(link_section = ".dram2_uninit")] size: 64 * 1024);

    let timer0 = TimerGroup::new(peripherals.TIMG1);
    esp_hal_embassy::init(timer0.timer0);

    info!("Embassy initialized!");

    let Some(spi_bus) = Spi::new(
        peripherals.SPI2,
        spi::master::Config::default()
            .with_frequency(Rate::from_khz(400))
            .with_mode(spi::Mode::_0),
    )
    .print_err("SPI configuration") else {
        halt().await
    };
    let spi_bus = spi_bus
        .with_sck(peripherals.GPIO18)
        .with_mosi(peripherals.GPIO23)
        .with_miso(peripherals.GPIO19);
    let sd_cs = Output::new(peripherals.GPIO5, Level::High, OutputConfig::default());

    let Some((storage, device_config)) = sd::mount(spi_bus, sd_cs).print_err("Mounting SD card")
    else {
        halt().await
    };
    let device_config = device_config.unwrap_or_default();
    info!("Config: {:?}", &device_config);

    let Some(dma_transfer) = player::start_output(
        peripherals.I2S0.into(),
        peripherals.DMA_I2S0.into(),
        peripherals.GPIO26.into(),
        peripherals.GPIO25.into(),
        peripherals.GPIO22.into(),
    )
    .print_err("Audio output") else {
        halt().await
    };
    spawner.must_spawn(player::audio_task(dma_transfer));

    let mut rng = esp_hal::rng::Rng::new(peripherals.RNG);
    let timer1 = TimerGroup::new(peripherals.TIMG0);
    let wifi_ctrl = esp_wifi::init(timer1.timer0, rng)
        .print_err("Initializing Wi-Fi controller")
        .map(|ctrl| &*mk_static!(EspWifiController<'static>, ctrl));

    if let Some(wifi_ctrl) = wifi_ctrl {
        let wifi_led = Output::new(peripherals.GPIO2, Level::Low, OutputConfig::default());
        spawner.must_spawn(wifi::network_task(
            spawner,
            wifi_ctrl,
            peripherals.WIFI,
            wifi_led,
            rng,
            Credentials::from_config(&device_config),
        ));
    }

    let Some(console) = UartRx::new(peripherals.UART0, uart::Config::default())
        .print_err("Console UART")
        .map(|rx| rx.with_rx(peripherals.GPIO3))
    else {
        halt().await
    };

    let devices = Devices::<Clipbox> {
        play: Input::new(peripherals.GPIO32, InputConfig::default().with_pull(Pull::Up)),
        reset: Input::new(peripherals.GPIO33, InputConfig::default().with_pull(Pull::Up)),
        storage,
        codec: AdpcmCodec,
        console,
        transport: WebTransport::new(wifi_ctrl.is_some()),
        system: EspSystem,
    };

    let seed = rng.random() as u64 | ((rng.random() as u64) << 32);
    let Some(mut jukebox) = Jukebox::new(&device_config.engine_config(), devices, seed)
        .print_err("Invalid configuration")
    else {
        halt().await
    };
    info!("Ready, {} clips", jukebox.catalog().size().get());

    loop {
        jukebox.tick(Instant::now());
        Timer::after_millis(1).await;
    }
}

async fn halt() -> ! {
    error!("Halted");
    loop {
        Timer::after_secs(60).await;
    }
}
