use crate::error::CodecError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Pump {
    /// The stream has more to play.
    Streaming,
    Exhausted,
}

/// Streaming decoder in front of the audio output.
///
/// `open` takes ownership of the clip reader; dropping the returned stream releases it.
pub trait Codec {
    type Reader;
    type Stream;

    fn open(&mut self, reader: Self::Reader) -> Result<Self::Stream, CodecError>;

    /// Decodes and queues at most one bounded unit of audio. Never waits for output room.
    fn pump(&mut self, stream: &mut Self::Stream) -> Result<Pump, CodecError>;

    /// Called on iterations where nothing plays.
    fn idle(&mut self) {}
}
