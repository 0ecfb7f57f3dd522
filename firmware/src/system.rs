use clipbox_engine::System;
use defmt::warn;
use esp_hal::delay::Delay;

/// Time given to the log transport to drain before the reset.
const FLUSH_DELAY_MS: u32 = 100;

pub struct EspSystem;

impl System for EspSystem {
    fn restart(&mut self) {
        warn!("Restarting device");
        Delay::new().delay_millis(FLUSH_DELAY_MS);
        esp_hal::system::software_reset();
    }
}
