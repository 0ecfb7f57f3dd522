use thiserror::Error;

/// Failure kinds reported by a [`Storage`](crate::storage::Storage) backend.
///
/// Board adapters map their driver errors onto these.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum StorageError {
    #[error("resource not found")]
    NotFound,
    #[error("storage is full")]
    Full,
    #[error("invalid resource name")]
    InvalidName,
    #[error("storage I/O error")]
    Io,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CodecError {
    #[error("unsupported stream format")]
    Format,
    #[error("reading the stream failed")]
    Read,
    #[error("audio output failed")]
    Output,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionError {
    #[error("a clip is already playing")]
    Busy,
    #[error("clip resource is unavailable")]
    ResourceUnavailable,
    #[error("clip could not be opened")]
    OpenFailed,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NetworkError {
    #[error("network bring-up failed")]
    BringUp,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MultipartError {
    #[error("malformed multipart body")]
    Malformed,
    #[error("part headers too large")]
    HeadersTooLarge,
    #[error("multipart body ended early")]
    Truncated,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    #[error("catalog size must be at least 1")]
    EmptyCatalog,
    #[error("clip names for this catalog are not valid resource names")]
    InvalidClipName,
    #[error("enable command must be 1 to 16 characters")]
    InvalidCommand,
}
