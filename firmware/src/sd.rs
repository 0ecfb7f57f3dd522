use core::fmt::Write as _;

use alloc::vec::Vec;
use clipbox_engine::error::StorageError;
use clipbox_engine::storage::{ClipWriter, Entry, ResourceName, Storage};
use defmt::{info, warn};
use embassy_time::Delay;
use embedded_hal_bus::spi::ExclusiveDevice;
use embedded_sdmmc::{
    Directory, File, Mode, SdCard, SdCardError, TimeSource, Timestamp, Volume, VolumeIdx,
    VolumeManager,
};
use esp_hal::gpio::Output;
use esp_hal::spi::master::{Config, Spi};
use esp_hal::spi::Mode as SpiMode;
use esp_hal::time::Rate;
use esp_hal::Blocking;
use thiserror::Error;

use crate::{mk_static, DeviceConfig};

const CONFIG_FILE: &str = "config.jsn";

pub type Card = SdCard<ExclusiveDevice<Spi<'static, Blocking>, Output<'static>, Delay>, Delay>;
type Manager = VolumeManager<Card, DummyTimesource, 4, 4, 1>;
type ClipFile = File<'static, Card, DummyTimesource, 4, 4, 1>;
type SdError = embedded_sdmmc::Error<SdCardError>;

/// Code from https://github.com/rp-rs/rp-hal-boards/blob/main/boards/rp-pico/examples/pico_spi_sd_card.rs
/// A dummy timesource, which is mostly important for creating files.
#[derive(Default)]
pub struct DummyTimesource();

impl TimeSource for DummyTimesource {
    fn get_timestamp(&self) -> Timestamp {
        Timestamp {
            year_since_1970: 0,
            zero_indexed_month: 0,
            zero_indexed_day: 0,
            hours: 0,
            minutes: 0,
            seconds: 0,
        }
    }
}

#[derive(Error, Debug, defmt::Format)]
pub enum MountError {
    #[error("SD card not detected")]
    NoCard,
    #[error("cannot open the FAT volume")]
    Volume,
    #[error("cannot open the root directory")]
    RootDir,
}

/// Mounts the first FAT volume of the card and reads `config.jsn` from its root.
pub fn mount(
    spi_bus: Spi<'static, Blocking>,
    cs: Output<'static>,
) -> Result<(SdStorage, Option<DeviceConfig>), MountError> {
    let spi_dev = ExclusiveDevice::new(spi_bus, cs, Delay).map_err(|_| MountError::NoCard)?;

    let sdcard = SdCard::new(spi_dev, Delay);
    let sd_size = sdcard.num_bytes().map_err(|_| MountError::NoCard)?;
    info!("Card size is {} bytes", sd_size);

    sdcard
        .spi(|spi| {
            spi.bus_mut().apply_config(
                &Config::default()
                    .with_frequency(Rate::from_mhz(8))
                    .with_mode(SpiMode::_0),
            )
        })
        .map_err(|_| MountError::NoCard)?;

    let volume_mgr = &*mk_static!(Manager, VolumeManager::new(sdcard, DummyTimesource::default()));
    let volume = volume_mgr
        .open_volume(VolumeIdx(0))
        .map_err(|_| MountError::Volume)?;
    let root = volume.open_root_dir().map_err(|_| MountError::RootDir)?;

    let mut storage = SdStorage {
        _volume: volume,
        root,
    };
    let config = storage.read_config();

    Ok((storage, config))
}

/// Root directory of the SD card.
pub struct SdStorage {
    _volume: Volume<'static, Card, DummyTimesource, 4, 4, 1>,
    root: Directory<'static, Card, DummyTimesource, 4, 4, 1>,
}

impl SdStorage {
    fn read_config(&mut self) -> Option<DeviceConfig> {
        let file = self.root.open_file_in_dir(CONFIG_FILE, Mode::ReadOnly).ok()?;

        let mut bytes = Vec::new();
        let mut buffer = [0u8; 128];
        while !file.is_eof() {
            match file.read(&mut buffer) {
                Ok(n) => bytes.extend(&buffer[..n]),
                Err(err) => {
                    warn!("Reading {}: {:?}", CONFIG_FILE, err);
                    return None;
                }
            }
        }

        match serde_json::from_slice(&bytes) {
            Ok(config) => Some(config),
            Err(_) => {
                warn!("Ignoring malformed {}", CONFIG_FILE);
                None
            }
        }
    }
}

fn storage_error(err: SdError) -> StorageError {
    match err {
        embedded_sdmmc::Error::NotFound => StorageError::NotFound,
        embedded_sdmmc::Error::DiskFull => StorageError::Full,
        embedded_sdmmc::Error::FilenameError(_) => StorageError::InvalidName,
        err => {
            warn!("SD card error: {:?}", err);
            StorageError::Io
        }
    }
}

impl Storage for SdStorage {
    type Reader = SdReader;
    type Writer = SdWriter;

    fn exists(&mut self, name: &str) -> Result<bool, StorageError> {
        match self.root.find_directory_entry(name) {
            Ok(_) => Ok(true),
            Err(embedded_sdmmc::Error::NotFound) => Ok(false),
            Err(err) => Err(storage_error(err)),
        }
    }

    fn open(&mut self, name: &str) -> Result<SdReader, StorageError> {
        self.root
            .open_file_in_dir(name, Mode::ReadOnly)
            .map(SdReader)
            .map_err(storage_error)
    }

    fn create(&mut self, name: &str) -> Result<SdWriter, StorageError> {
        self.root
            .open_file_in_dir(name, Mode::ReadWriteCreateOrTruncate)
            .map(SdWriter)
            .map_err(storage_error)
    }

    fn remove(&mut self, name: &str) -> Result<(), StorageError> {
        self.root.delete_file_in_dir(name).map_err(storage_error)
    }

    fn list(&mut self) -> Result<Vec<Entry>, StorageError> {
        let mut entries = Vec::new();
        self.root
            .iterate_dir(|entry| {
                if entry.attributes.is_directory() || entry.attributes.is_volume() {
                    return;
                }
                let mut name = ResourceName::new();
                if write!(name, "{}", entry.name).is_ok() {
                    entries.push(Entry {
                        name,
                        size: entry.size,
                    });
                }
            })
            .map_err(storage_error)?;
        Ok(entries)
    }
}

/// A clip opened for reading. The file is closed on drop.
pub struct SdReader(ClipFile);

impl embedded_io::ErrorType for SdReader {
    type Error = embedded_io::ErrorKind;
}

impl embedded_io::Read for SdReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        self.0.read(buf).map_err(|err| {
            warn!("Reading clip: {:?}", err);
            embedded_io::ErrorKind::Other
        })
    }
}

/// An upload target. Committing closes the file and flushes its directory entry.
pub struct SdWriter(ClipFile);

impl ClipWriter for SdWriter {
    fn write(&mut self, data: &[u8]) -> Result<(), StorageError> {
        self.0.write(data).map_err(storage_error)
    }

    fn commit(self) -> Result<(), StorageError> {
        self.0.close().map_err(storage_error)
    }
}
