#![no_std]
#![feature(impl_trait_in_assoc_type)]

use alloc::string::String;
use clipbox_engine::{Board, Config};
use esp_hal::gpio::Input;
use esp_hal::uart::UartRx;
use esp_hal::Blocking;
use serde::Deserialize;

pub mod player;
pub mod sd;
pub mod system;
pub mod web;
pub mod wifi;

extern crate alloc;

#[macro_export]
macro_rules! mk_static {
    ($t:ty,$val:expr) => {{
        static STATIC_CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        #[deny(unused_attributes)]
        let x = STATIC_CELL.uninit().write(($val));
        x
    }};
}

/// Number of clips, `clip1.wav` up to `clip10.wav`.
pub const CATALOG_SIZE: u32 = 10;
pub const DEBOUNCE_MS: u64 = 50;

/// Access point the management service joins when the card has no `config.jsn`.
const BUILD_SSID: Option<&str> = option_env!("CLIPBOX_SSID");
const BUILD_PASSWORD: Option<&str> = option_env!("CLIPBOX_PASSWORD");

/// Settings read from `config.jsn` on the card.
#[derive(Deserialize, Default)]
pub struct DeviceConfig {
    #[serde(default, alias = "SSID")]
    pub ssid: String,

    #[serde(default, alias = "PASSWORD")]
    pub password: String,

    /// Overrides the built-in engine settings.
    #[serde(default)]
    pub engine: Option<Config>,
}

impl DeviceConfig {
    /// Station credentials, from the card or else from the build environment.
    pub fn credentials(&self) -> Option<(&str, &str)> {
        if !self.ssid.is_empty() {
            return Some((&self.ssid, &self.password));
        }
        BUILD_SSID.map(|ssid| (ssid, BUILD_PASSWORD.unwrap_or("")))
    }

    pub fn engine_config(&self) -> Config {
        self.engine.clone().unwrap_or_else(|| {
            Config::default()
                .with_catalog_size(CATALOG_SIZE)
                .with_debounce_ms(DEBOUNCE_MS)
        })
    }
}

impl defmt::Format for DeviceConfig {
    fn format(&self, fmt: defmt::Formatter) {
        defmt::write!(
            fmt,
            "DeviceConfig {{ SSID: {}, engine override: {} }}",
            self.ssid.as_str(),
            self.engine.is_some(),
        )
    }
}

/// The clipbox board: ESP32 with an SD card on SPI, an I2S DAC and two push buttons.
pub struct Clipbox;

impl Board for Clipbox {
    type PlayPin = Input<'static>;
    type ResetPin = Input<'static>;
    type Storage = sd::SdStorage;
    type Codec = player::AdpcmCodec;
    type Console = UartRx<'static, Blocking>;
    type Transport = web::WebTransport;
    type System = system::EspSystem;
}

pub trait PrintErr<T> {
    fn print_err(self, msg: &str) -> Option<T>;
}

impl<T, E: defmt::Format> PrintErr<T> for Result<T, E> {
    fn print_err(self, msg: &str) -> Option<T> {
        match self {
            Ok(value) => Some(value),
            Err(err) => {
                defmt::error!("{}: {}", msg, err);
                None
            }
        }
    }
}
