use embedded_io::Read;

use crate::catalog::Catalog;
use crate::error::StorageError;
use crate::storage::{is_valid_name, ClipWriter, ResourceName, Storage};

use super::{Response, StatusCode, UploadPart};

/// Scratch resource every transfer is received into. The target is only touched at End.
pub const STAGING_NAME: &str = "upload.tmp";

/// Bytes moved from the staging file into place per [`Uploads::promote`] call.
const COPY_CHUNK: usize = 512;

struct Transfer<W> {
    name: ResourceName,
    writer: W,
    bytes: u32,
    /// Data was dropped because a clip started playing.
    tainted: bool,
}

/// A complete transfer being copied over its target.
struct Promotion<R, W> {
    name: ResourceName,
    staged: R,
    writer: W,
    bytes: u32,
}

/// Upload state machine: idle, receiving one transfer, or promoting a received one.
pub(super) struct Uploads<S: Storage> {
    transfer: Option<Transfer<S::Writer>>,
    promotion: Option<Promotion<S::Reader, S::Writer>>,
}

impl<S: Storage> Uploads<S> {
    pub(super) fn new() -> Self {
        Self {
            transfer: None,
            promotion: None,
        }
    }

    pub(super) fn target(&self) -> Option<&str> {
        self.transfer
            .as_ref()
            .map(|transfer| transfer.name.as_str())
            .or(self.replacing())
    }

    /// Target whose contents are being rewritten right now.
    pub(super) fn replacing(&self) -> Option<&str> {
        self.promotion
            .as_ref()
            .map(|promotion| promotion.name.as_str())
    }

    pub(super) fn is_promoting(&self) -> bool {
        self.promotion.is_some()
    }

    /// Whether `name` is held open by the upload in progress.
    pub(super) fn holds(&self, name: &str) -> bool {
        match self.target() {
            Some(target) => {
                target.eq_ignore_ascii_case(name) || STAGING_NAME.eq_ignore_ascii_case(name)
            }
            None => false,
        }
    }

    /// Feeds one piece of an upload. `None` means "keep sending", or after `End`, that the
    /// response waits for [`Uploads::promote`].
    pub(super) fn handle(
        &mut self,
        part: UploadPart,
        storage: &mut S,
        busy: bool,
    ) -> Option<Response> {
        match part {
            UploadPart::Start { filename } => self.start(storage, &filename, busy),
            UploadPart::Data(data) => self.append(storage, &data, busy),
            UploadPart::End => self.finish(storage, busy),
            UploadPart::Aborted => {
                if let Some(transfer) = self.transfer.take() {
                    warn!("Upload of {} aborted", transfer.name.as_str());
                    discard(storage, transfer);
                }
                None
            }
        }
    }

    fn start(&mut self, storage: &mut S, filename: &str, busy: bool) -> Option<Response> {
        if let Some(stale) = self.transfer.take() {
            warn!("Upload of {} superseded", stale.name.as_str());
            discard(storage, stale);
        }

        if busy {
            return Some(Response::text(StatusCode::CONFLICT, "A clip is playing"));
        }
        let name = match ResourceName::try_from(filename) {
            Ok(name) if is_valid_name(&name) && !name.eq_ignore_ascii_case(STAGING_NAME) => name,
            _ => {
                return Some(Response::text(
                    StatusCode::BAD_REQUEST,
                    "Invalid filename",
                ))
            }
        };

        match storage.create(STAGING_NAME) {
            Ok(writer) => {
                info!("Receiving {}", name.as_str());
                self.transfer = Some(Transfer {
                    name,
                    writer,
                    bytes: 0,
                    tainted: false,
                });
                None
            }
            Err(err) => {
                warn!("Creating {} failed: {}", STAGING_NAME, err);
                Some(Response::storage_failure(err))
            }
        }
    }

    fn append(&mut self, storage: &mut S, data: &[u8], busy: bool) -> Option<Response> {
        let transfer = self.transfer.as_mut()?;
        if busy || transfer.tainted {
            if !transfer.tainted {
                warn!("Playback started, dropping upload data for {}", transfer.name.as_str());
            }
            transfer.tainted = true;
            return None;
        }

        match transfer.writer.write(data) {
            Ok(()) => {
                transfer.bytes = transfer.bytes.saturating_add(data.len() as u32);
                None
            }
            Err(err) => {
                let transfer = self.transfer.take()?;
                warn!("Writing {} failed: {}", transfer.name.as_str(), err);
                discard(storage, transfer);
                Some(Response::storage_failure(err))
            }
        }
    }

    fn finish(&mut self, storage: &mut S, busy: bool) -> Option<Response> {
        let Some(transfer) = self.transfer.take() else {
            return Some(Response::text(
                StatusCode::BAD_REQUEST,
                "No upload in progress",
            ));
        };

        if busy || transfer.tainted {
            warn!("Discarding upload of {}: playback interrupted it", transfer.name.as_str());
            discard(storage, transfer);
            return Some(Response::text(
                StatusCode::CONFLICT,
                "Playback started during the upload",
            ));
        }

        let Transfer {
            name,
            writer,
            bytes,
            ..
        } = transfer;
        let promotion = writer
            .commit()
            .and_then(|()| begin_promotion(storage, name.clone(), bytes));
        match promotion {
            Ok(promotion) => {
                self.promotion = Some(promotion);
                None
            }
            Err(err) => {
                warn!("Storing {} failed: {}", name.as_str(), err);
                remove_partial(storage, STAGING_NAME);
                Some(Response::storage_failure(err))
            }
        }
    }

    /// Copies one chunk of the staged file into place. Returns the deferred response of
    /// the `End` once the copy is done or has failed.
    pub(super) fn promote(&mut self, storage: &mut S, catalog: &Catalog) -> Option<Response> {
        let promotion = self.promotion.as_mut()?;
        let mut chunk = [0u8; COPY_CHUNK];
        let step = match promotion.staged.read(&mut chunk) {
            Ok(0) => Ok(true),
            Ok(n) => promotion.writer.write(&chunk[..n]).map(|()| false),
            Err(_) => Err(StorageError::Io),
        };

        match step {
            Ok(false) => None,
            Ok(true) => {
                let Promotion {
                    name,
                    staged,
                    writer,
                    bytes,
                } = self.promotion.take()?;
                drop(staged);
                let response = match writer.commit() {
                    Ok(()) => {
                        info!("Stored {} ({} bytes)", name.as_str(), bytes);
                        if let Some(clip) = catalog.id_of(&name) {
                            info!("Clip {} replaced", clip);
                        }
                        Response::see_other("/")
                    }
                    Err(err) => {
                        warn!("Committing {} failed: {}", name.as_str(), err);
                        remove_partial(storage, &name);
                        Response::storage_failure(err)
                    }
                };
                remove_partial(storage, STAGING_NAME);
                catalog.audit(storage);
                Some(response)
            }
            Err(err) => {
                let Promotion {
                    name,
                    staged,
                    writer,
                    ..
                } = self.promotion.take()?;
                warn!("Copying {} into place failed: {}", name.as_str(), err);
                drop(staged);
                drop(writer);
                remove_partial(storage, &name);
                remove_partial(storage, STAGING_NAME);
                catalog.audit(storage);
                Some(Response::storage_failure(err))
            }
        }
    }
}

/// Opens the committed staging file and swaps the target for an empty writer.
fn begin_promotion<S: Storage>(
    storage: &mut S,
    name: ResourceName,
    bytes: u32,
) -> Result<Promotion<S::Reader, S::Writer>, StorageError> {
    let staged = storage.open(STAGING_NAME)?;
    // No rename on FAT: the old file goes, then the staged bytes are copied in.
    match storage.remove(&name) {
        Ok(()) => info!("Replacing {}", name.as_str()),
        Err(StorageError::NotFound) => {}
        Err(err) => return Err(err),
    }
    let writer = storage.create(&name)?;
    Ok(Promotion {
        name,
        staged,
        writer,
        bytes,
    })
}

/// Closes the write handle and removes the staging file. The target is untouched.
fn discard<S: Storage>(storage: &mut S, transfer: Transfer<S::Writer>) {
    drop(transfer.writer);
    remove_partial(storage, STAGING_NAME);
}

fn remove_partial<S: Storage>(storage: &mut S, name: &str) {
    match storage.remove(name) {
        Ok(()) | Err(StorageError::NotFound) => {}
        Err(err) => error!("Removing partial {} failed: {}", name, err),
    }
}
