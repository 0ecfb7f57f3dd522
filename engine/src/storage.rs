use alloc::vec::Vec;

use crate::error::StorageError;

pub const NAME_CAPACITY: usize = 32;

/// Name of a root-level storage resource.
pub type ResourceName = heapless::String<NAME_CAPACITY>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub name: ResourceName,
    pub size: u32,
}

/// The flat filesystem the clips live on.
///
/// Every call must return after a bounded amount of work. Handles returned by
/// [`Storage::open`] and [`Storage::create`] release the underlying file when dropped.
pub trait Storage {
    type Reader: embedded_io::Read;
    type Writer: ClipWriter;

    fn exists(&mut self, name: &str) -> Result<bool, StorageError>;

    fn open(&mut self, name: &str) -> Result<Self::Reader, StorageError>;

    /// Creates `name`, truncating an existing resource of that name.
    fn create(&mut self, name: &str) -> Result<Self::Writer, StorageError>;

    fn remove(&mut self, name: &str) -> Result<(), StorageError>;

    fn list(&mut self) -> Result<Vec<Entry>, StorageError>;
}

/// An open write handle. Dropping it without [`ClipWriter::commit`] closes the file as-is.
pub trait ClipWriter {
    fn write(&mut self, data: &[u8]) -> Result<(), StorageError>;

    fn commit(self) -> Result<(), StorageError>;
}

/// Whether `name` can address a root-level resource.
///
/// Only ASCII letters, digits, `.`, `_` and `-` are accepted, so names never need escaping
/// in a query string or an HTML attribute.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= NAME_CAPACITY
        && name != "."
        && name != ".."
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'.' | b'_' | b'-'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_validation() {
        assert!(is_valid_name("clip1.wav"));
        assert!(is_valid_name("CLIP12.WAV"));
        assert!(is_valid_name("intro_2-b.wav"));

        assert!(!is_valid_name(""));
        assert!(!is_valid_name(".."));
        assert!(!is_valid_name("files/clip1.wav"));
        assert!(!is_valid_name("..\\clip1.wav"));
        assert!(!is_valid_name("clip 1.wav"));
        assert!(!is_valid_name("<script>.wav"));
        assert!(!is_valid_name(&"x".repeat(NAME_CAPACITY + 1)));
    }
}
