use crate::catalog::ClipId;
use crate::codec::{Codec, Pump};
use crate::error::{CodecError, SessionError, StorageError};
use crate::storage::{ResourceName, Storage};

/// The single playback session.
///
/// The open stream lives inside `Active`, so "busy" and "holds a stream" cannot disagree.
pub enum Session<C: Codec> {
    Idle,
    Active(Playing<C::Stream>),
}

pub struct Playing<S> {
    clip: ClipId,
    name: ResourceName,
    stream: S,
}

impl<S> Playing<S> {
    pub fn clip(&self) -> ClipId {
        self.clip
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    Idle,
    Playing,
    Finished(ClipId),
    Failed(ClipId, CodecError),
}

impl<C: Codec> Default for Session<C> {
    fn default() -> Self {
        Self::Idle
    }
}

impl<C: Codec> Session<C> {
    pub fn new() -> Self {
        Self::Idle
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }

    pub fn playing(&self) -> Option<&Playing<C::Stream>> {
        match self {
            Self::Active(playing) => Some(playing),
            Self::Idle => None,
        }
    }

    /// Opens `name` and starts streaming it.
    ///
    /// Rejected with [`SessionError::Busy`] while a clip plays; the running stream is left
    /// alone. On any failure the session stays idle and nothing stays open: the reader is
    /// owned by the codec call and dropped with it.
    pub fn start<S>(
        &mut self,
        storage: &mut S,
        codec: &mut C,
        clip: ClipId,
        name: &str,
    ) -> Result<(), SessionError>
    where
        S: Storage<Reader = C::Reader>,
    {
        if self.is_active() {
            return Err(SessionError::Busy);
        }
        let resource: ResourceName = name
            .try_into()
            .map_err(|_| SessionError::ResourceUnavailable)?;

        match storage.exists(name) {
            Ok(true) => {}
            Ok(false) => return Err(SessionError::ResourceUnavailable),
            Err(err) => {
                warn!("Looking up {} failed: {}", name, err);
                return Err(SessionError::ResourceUnavailable);
            }
        }

        let reader = storage.open(name).map_err(|err| match err {
            StorageError::NotFound => SessionError::ResourceUnavailable,
            _ => SessionError::OpenFailed,
        })?;
        let stream = codec.open(reader).map_err(|err| {
            warn!("Opening {} as audio failed: {}", name, err);
            SessionError::OpenFailed
        })?;

        *self = Self::Active(Playing {
            clip,
            name: resource,
            stream,
        });
        Ok(())
    }

    /// Advances playback by one unit. Exhaustion or a stream error ends the session in the
    /// same call.
    pub fn step(&mut self, codec: &mut C) -> Step {
        let Self::Active(playing) = self else {
            return Step::Idle;
        };

        let clip = playing.clip;
        match codec.pump(&mut playing.stream) {
            Ok(Pump::Streaming) => Step::Playing,
            Ok(Pump::Exhausted) => {
                *self = Self::Idle;
                Step::Finished(clip)
            }
            Err(err) => {
                *self = Self::Idle;
                Step::Failed(clip, err)
            }
        }
    }

    /// Forced stop. Returns the clip that was playing.
    pub fn stop(&mut self) -> Option<ClipId> {
        match core::mem::take(self) {
            Self::Active(playing) => Some(playing.clip),
            Self::Idle => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{MockCodec, MockStorage};

    fn clip(id: u32) -> ClipId {
        ClipId::new(id).unwrap()
    }

    #[test]
    fn test_start_then_play_to_exhaustion() {
        let mut storage = MockStorage::with_files(&[("clip1.wav", "abcdefgh")]);
        let mut codec = MockCodec::new();
        let mut session = Session::<MockCodec>::new();

        session
            .start(&mut storage, &mut codec, clip(1), "clip1.wav")
            .unwrap();
        assert!(session.is_active());
        assert_eq!(session.playing().map(|p| p.name()), Some("clip1.wav"));
        assert_eq!(storage.open_readers(), 1);

        assert_eq!(session.step(&mut codec), Step::Playing);
        assert_eq!(session.step(&mut codec), Step::Playing);
        assert_eq!(session.step(&mut codec), Step::Finished(clip(1)));
        assert!(!session.is_active());
        assert_eq!(storage.open_readers(), 0, "stream released on exhaustion");
        assert_eq!(session.step(&mut codec), Step::Idle);
    }

    #[test]
    fn test_start_while_active_is_rejected() {
        let mut storage =
            MockStorage::with_files(&[("clip1.wav", "abcdefgh"), ("clip2.wav", "abcd")]);
        let mut codec = MockCodec::new();
        let mut session = Session::<MockCodec>::new();

        session
            .start(&mut storage, &mut codec, clip(1), "clip1.wav")
            .unwrap();
        session.step(&mut codec);

        assert_eq!(
            session.start(&mut storage, &mut codec, clip(2), "clip2.wav"),
            Err(SessionError::Busy)
        );
        assert_eq!(codec.opens(), 1, "no second open");
        assert_eq!(storage.open_readers(), 1);
        assert_eq!(session.playing().map(|p| p.clip()), Some(clip(1)));

        // The first stream continues where it was.
        assert_eq!(session.step(&mut codec), Step::Playing);
        assert_eq!(session.step(&mut codec), Step::Finished(clip(1)));
    }

    #[test]
    fn test_missing_resource_leaves_session_idle() {
        let mut storage = MockStorage::with_files(&[]);
        let mut codec = MockCodec::new();
        let mut session = Session::<MockCodec>::new();

        assert_eq!(
            session.start(&mut storage, &mut codec, clip(1), "clip1.wav"),
            Err(SessionError::ResourceUnavailable)
        );
        assert!(!session.is_active());
        assert_eq!(storage.open_readers(), 0);
        assert_eq!(codec.opens(), 0);
    }

    #[test]
    fn test_undecodable_resource_does_not_leak_its_reader() {
        let mut storage = MockStorage::with_files(&[("clip1.wav", "BAD header")]);
        let mut codec = MockCodec::new();
        let mut session = Session::<MockCodec>::new();

        assert_eq!(
            session.start(&mut storage, &mut codec, clip(1), "clip1.wav"),
            Err(SessionError::OpenFailed)
        );
        assert!(!session.is_active());
        assert_eq!(storage.open_readers(), 0, "reader dropped with the failed open");
    }

    #[test]
    fn test_unopenable_resource_reports_open_failure() {
        let mut storage = MockStorage::with_files(&[("clip1.wav", "abcd")]);
        storage.fail_opens(StorageError::Io);
        let mut codec = MockCodec::new();
        let mut session = Session::<MockCodec>::new();

        assert_eq!(
            session.start(&mut storage, &mut codec, clip(1), "clip1.wav"),
            Err(SessionError::OpenFailed)
        );
        assert!(!session.is_active());
        assert_eq!(storage.open_readers(), 0);
    }

    #[test]
    fn test_stream_error_ends_the_session() {
        let mut storage = MockStorage::with_files(&[("clip1.wav", "abcd!!!!")]);
        let mut codec = MockCodec::new();
        let mut session = Session::<MockCodec>::new();

        session
            .start(&mut storage, &mut codec, clip(1), "clip1.wav")
            .unwrap();
        assert_eq!(session.step(&mut codec), Step::Playing);
        assert_eq!(
            session.step(&mut codec),
            Step::Failed(clip(1), CodecError::Read)
        );
        assert!(!session.is_active());
        assert_eq!(storage.open_readers(), 0);
    }

    #[test]
    fn test_stop_releases_the_stream() {
        let mut storage = MockStorage::with_files(&[("clip1.wav", "abcdefgh")]);
        let mut codec = MockCodec::new();
        let mut session = Session::<MockCodec>::new();

        assert_eq!(session.stop(), None);
        session
            .start(&mut storage, &mut codec, clip(1), "clip1.wav")
            .unwrap();
        assert_eq!(session.stop(), Some(clip(1)));
        assert!(!session.is_active());
        assert_eq!(storage.open_readers(), 0);
    }
}
