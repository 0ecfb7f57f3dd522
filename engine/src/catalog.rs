use alloc::vec::Vec;
use core::fmt::{self, Write};
use core::num::NonZeroU32;

use crate::config::Config;
use crate::error::ConfigError;
use crate::storage::{is_valid_name, ResourceName, Storage};

/// 1-based clip identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClipId(NonZeroU32);

impl ClipId {
    pub const MIN: Self = Self(NonZeroU32::MIN);

    pub const fn new(id: u32) -> Option<Self> {
        match NonZeroU32::new(id) {
            Some(id) => Some(Self(id)),
            None => None,
        }
    }

    pub const fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for ClipId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// The fixed set of clips `[1, N]` and how they are named on storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Catalog {
    size: NonZeroU32,
    prefix: heapless::String<16>,
    extension: heapless::String<8>,
}

impl Catalog {
    pub fn new(size: u32, prefix: &str, extension: &str) -> Result<Self, ConfigError> {
        let size = NonZeroU32::new(size).ok_or(ConfigError::EmptyCatalog)?;
        let catalog = Self {
            size,
            prefix: prefix.try_into().map_err(|_| ConfigError::InvalidClipName)?,
            extension: extension.try_into().map_err(|_| ConfigError::InvalidClipName)?,
        };

        // The longest name belongs to the largest id.
        let mut longest = ResourceName::new();
        catalog
            .write_name(&mut longest, size.get())
            .map_err(|_| ConfigError::InvalidClipName)?;
        if !is_valid_name(&longest) {
            return Err(ConfigError::InvalidClipName);
        }

        Ok(catalog)
    }

    pub fn from_config(config: &Config) -> Result<Self, ConfigError> {
        Self::new(
            config.catalog_size,
            config.clip_prefix.trim(),
            config.clip_extension.trim(),
        )
    }

    pub fn size(&self) -> NonZeroU32 {
        self.size
    }

    pub fn ids(&self) -> impl Iterator<Item = ClipId> {
        (1..=self.size.get()).filter_map(ClipId::new)
    }

    pub fn contains(&self, id: ClipId) -> bool {
        id.get() <= self.size.get()
    }

    /// Resource name of `id`, e.g. `clip3.wav`.
    pub fn name_of(&self, id: ClipId) -> ResourceName {
        let mut name = ResourceName::new();
        // Cannot overflow for ids in the catalog: `new` checked the longest name.
        let _ = self.write_name(&mut name, id.get());
        name
    }

    /// Inverse of [`Catalog::name_of`], ignoring ASCII case the way FAT does.
    pub fn id_of(&self, name: &str) -> Option<ClipId> {
        let stem = strip_prefix_ignore_case(name, &self.prefix)?;
        let digits = if self.extension.is_empty() {
            stem
        } else {
            let (digits, extension) = stem.rsplit_once('.')?;
            if !extension.eq_ignore_ascii_case(&self.extension) {
                return None;
            }
            digits
        };
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }

        let id = ClipId::new(digits.parse().ok()?)?;
        if self.contains(id) && self.name_of(id).eq_ignore_ascii_case(name) {
            Some(id)
        } else {
            None
        }
    }

    /// Checks every catalog entry against storage.
    ///
    /// Entries whose existence cannot be determined count as missing.
    pub fn audit<S: Storage>(&self, storage: &mut S) -> Audit {
        let mut missing = Vec::new();
        for id in self.ids() {
            let name = self.name_of(id);
            match storage.exists(&name) {
                Ok(true) => {}
                Ok(false) => missing.push(id),
                Err(err) => {
                    warn!("Checking {} failed: {}", name.as_str(), err);
                    missing.push(id);
                }
            }
        }

        let audit = Audit { missing };
        if audit.is_complete() {
            info!("Catalog complete: {} clips", self.size.get());
        } else {
            warn!(
                "Catalog incomplete: {} of {} clips missing",
                audit.missing.len(),
                self.size.get()
            );
        }
        audit
    }

    fn write_name(&self, out: &mut ResourceName, id: u32) -> fmt::Result {
        out.clear();
        write!(out, "{}{}", self.prefix, id)?;
        if !self.extension.is_empty() {
            write!(out, ".{}", self.extension)?;
        }
        Ok(())
    }
}

fn strip_prefix_ignore_case<'a>(name: &'a str, prefix: &str) -> Option<&'a str> {
    let head = name.get(..prefix.len())?;
    if head.eq_ignore_ascii_case(prefix) {
        name.get(prefix.len()..)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Audit {
    pub missing: Vec<ClipId>,
}

impl Audit {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockStorage;

    fn catalog(size: u32) -> Catalog {
        Catalog::new(size, "clip", "wav").unwrap()
    }

    #[test]
    fn test_names_follow_the_template() {
        let catalog = catalog(12);
        assert_eq!(catalog.name_of(ClipId::new(1).unwrap()).as_str(), "clip1.wav");
        assert_eq!(catalog.name_of(ClipId::new(12).unwrap()).as_str(), "clip12.wav");

        let bare = Catalog::new(2, "track", "").unwrap();
        assert_eq!(bare.name_of(ClipId::new(2).unwrap()).as_str(), "track2");
    }

    #[test]
    fn test_id_of_inverts_name_of() {
        let catalog = catalog(12);
        for id in catalog.ids() {
            assert_eq!(catalog.id_of(&catalog.name_of(id)), Some(id));
        }
        assert_eq!(catalog.id_of("CLIP7.WAV"), ClipId::new(7));

        assert_eq!(catalog.id_of("clip13.wav"), None, "outside the catalog");
        assert_eq!(catalog.id_of("clip0.wav"), None);
        assert_eq!(catalog.id_of("clip07.wav"), None, "not a generated name");
        assert_eq!(catalog.id_of("clip1.mp3"), None);
        assert_eq!(catalog.id_of("clip.wav"), None);
        assert_eq!(catalog.id_of("other.wav"), None);
    }

    #[test]
    fn test_zero_size_is_a_configuration_error() {
        assert_eq!(
            Catalog::new(0, "clip", "wav"),
            Err(ConfigError::EmptyCatalog)
        );
    }

    #[test]
    fn test_audit_reports_missing_entries() {
        let storage = MockStorage::with_files(&[("clip1.wav", "x"), ("clip3.wav", "x")]);
        let audit = catalog(4).audit(&mut storage.clone());

        assert!(!audit.is_complete());
        assert_eq!(audit.missing, [ClipId::new(2).unwrap(), ClipId::new(4).unwrap()]);

        let audit = catalog(1).audit(&mut storage.clone());
        assert!(audit.is_complete());
    }
}
