use core::iter::repeat_n;

use audio_codec_algorithms::{decode_adpcm_ima, AdpcmImaState};
use clipbox_engine::codec::{Codec, Pump};
use clipbox_engine::error::CodecError;
use defmt::{debug, warn};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embedded_io::{Read, ReadExactError};
use esp_hal::dma::AnyI2sDmaChannel;
use esp_hal::dma_buffers;
use esp_hal::gpio::AnyPin;
use esp_hal::i2s::master::asynch::I2sWriteDmaTransferAsync;
use esp_hal::i2s::master::{DataFormat, I2s, Standard};
use esp_hal::i2s::AnyI2s;
use esp_hal::time::Rate;
use thiserror::Error;

use crate::sd::SdReader;
use crate::PrintErr;

extern crate alloc;

use alloc::vec::Vec;

const DMA_SIZE: usize = 4 * 4096;
const SAMPLE_RATE: u32 = 44100;

const WAVE_FORMAT_IMA_ADPCM: u16 = 0x11;
const MAX_BLOCK_ALIGN: usize = 2048;
const MAX_CHUNKS: usize = 16;

/// Samples decoded from one ADPCM block: the header sample plus two per data byte.
const FRAME_CAPACITY: usize = 4096;
const _: () = assert!(1 + 2 * (MAX_BLOCK_ALIGN - 4) <= FRAME_CAPACITY);

/// Silence pushed when no frame is queued, ~10ms.
const SILENCE_SAMPLES: usize = SAMPLE_RATE as usize / 100;

type Frame = heapless::Vec<i16, FRAME_CAPACITY>;
type Transfer = I2sWriteDmaTransferAsync<'static, &'static mut [u8; DMA_SIZE]>;

/// Decoded blocks waiting for the I2S task.
static FRAMES: Channel<CriticalSectionRawMutex, Frame, 2> = Channel::new();

#[derive(Error, Debug, defmt::Format)]
#[error("cannot start the I2S DMA transfer")]
pub struct OutputError;

/// Starts the circular I2S transfer that [`audio_task`] keeps fed.
pub fn start_output(
    i2s: AnyI2s<'static>,
    dma: AnyI2sDmaChannel<'static>,
    bclk: AnyPin<'static>,
    ws: AnyPin<'static>,
    dout: AnyPin<'static>,
) -> Result<Transfer, OutputError> {
    let (_, _, tx_buffer, tx_descriptors) = dma_buffers!(0, DMA_SIZE);

    let i2s = I2s::new(
        i2s,
        Standard::Philips,
        DataFormat::Data16Channel16,
        Rate::from_hz(SAMPLE_RATE),
        dma,
    )
    .into_async();

    let i2s_tx = i2s
        .i2s_tx
        .with_bclk(bclk)
        .with_ws(ws)
        .with_dout(dout)
        .build(tx_descriptors);

    i2s_tx
        .write_dma_circular_async::<&'static mut [u8; DMA_SIZE]>(tx_buffer)
        .map_err(|_| OutputError)
}

#[embassy_executor::task]
pub async fn audio_task(mut dma_transfer: Transfer) {
    loop {
        match FRAMES.try_receive() {
            Ok(frame) => play_samples_from_iterator(frame, &mut dma_transfer).await,
            Err(_) => {
                play_samples_from_iterator(repeat_n(0, SILENCE_SAMPLES), &mut dma_transfer).await
            }
        }
    }
}

async fn play_samples_from_iterator(
    iter: impl IntoIterator<Item = i16>,
    dma_transfer: &mut Transfer,
) {
    let mut done = false;
    let mut iter = iter.into_iter();
    while !done {
        dma_transfer
            .push_with(|buf: &mut [u8]| {
                let n_samples = buf.len() / 4;
                for n in 0..n_samples {
                    if let Some(sample) = iter.next() {
                        buf[n * 4] = sample as u8;
                        buf[n * 4 + 1] = (sample >> 8) as u8;
                        buf[n * 4 + 2] = 0;
                        buf[n * 4 + 3] = 0;
                    } else {
                        done = true;
                        return n * 4;
                    }
                }

                n_samples * 4
            })
            .await
            .print_err("I2S DMA transfer");
    }
}

/// Mono IMA ADPCM WAV decoder feeding [`audio_task`].
#[derive(Default)]
pub struct AdpcmCodec;

pub struct AdpcmStream {
    reader: SdReader,
    block: Vec<u8>,
    /// Bytes left in the `data` chunk.
    remaining: u32,
}

impl Codec for AdpcmCodec {
    type Reader = SdReader;
    type Stream = AdpcmStream;

    fn open(&mut self, mut reader: SdReader) -> Result<AdpcmStream, CodecError> {
        let (block_align, data_len) = read_header(&mut reader)?;
        debug!("ADPCM clip: {} byte blocks, {} bytes", block_align, data_len);

        Ok(AdpcmStream {
            reader,
            block: alloc::vec![0; block_align],
            remaining: data_len,
        })
    }

    fn pump(&mut self, stream: &mut AdpcmStream) -> Result<Pump, CodecError> {
        if FRAMES.is_full() {
            return Ok(Pump::Streaming);
        }
        if stream.remaining == 0 {
            return Ok(Pump::Exhausted);
        }

        let want = stream.block.len().min(stream.remaining as usize);
        let n = read_block(&mut stream.reader, &mut stream.block[..want])?;
        if n < 4 {
            // would crash the decoder
            return Ok(Pump::Exhausted);
        }
        stream.remaining -= n as u32;

        FRAMES
            .try_send(decode_block(&stream.block[..n]))
            .map_err(|_| CodecError::Output)?;
        Ok(Pump::Streaming)
    }
}

fn decode_block(block: &[u8]) -> Frame {
    let mut frame = Frame::new();
    let mut state = AdpcmImaState::new();
    state.predictor = i16::from_le_bytes([block[0], block[1]]);
    state.step_index = block[2].min(88);

    // Capacity covers MAX_BLOCK_ALIGN, so the pushes cannot fail.
    let _ = frame.push(state.predictor);
    for b in &block[4..] {
        let _ = frame.push(decode_adpcm_ima(*b & 0x0f, &mut state));
        let _ = frame.push(decode_adpcm_ima(*b >> 4, &mut state));
    }
    frame
}

/// Fills `buf` unless the clip ends first. Returns the number of bytes read.
fn read_block(reader: &mut SdReader, buf: &mut [u8]) -> Result<usize, CodecError> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(_) => return Err(CodecError::Read),
        }
    }
    Ok(filled)
}

fn read_exact(reader: &mut SdReader, buf: &mut [u8]) -> Result<(), CodecError> {
    reader.read_exact(buf).map_err(|err| match err {
        ReadExactError::UnexpectedEof => CodecError::Format,
        ReadExactError::Other(_) => CodecError::Read,
    })
}

fn skip(reader: &mut SdReader, mut size: usize) -> Result<(), CodecError> {
    let mut buf = [0u8; 16];
    while size > 0 {
        let to_read = size.min(16);
        read_exact(reader, &mut buf[..to_read])?;
        size -= to_read;
    }

    Ok(())
}

/// Walks the RIFF chunks up to `data`. Returns the block size and the data length.
fn read_header(reader: &mut SdReader) -> Result<(usize, u32), CodecError> {
    let mut buf = [0u8; 12];
    read_exact(reader, &mut buf)?;
    if &buf[0..4] != b"RIFF" || &buf[8..12] != b"WAVE" {
        return Err(CodecError::Format);
    }

    let mut block_align = None;
    for _ in 0..MAX_CHUNKS {
        let mut chunk_header = [0u8; 8];
        read_exact(reader, &mut chunk_header)?;
        let chunk_id = &chunk_header[0..4];
        let chunk_size = u32::from_le_bytes([
            chunk_header[4],
            chunk_header[5],
            chunk_header[6],
            chunk_header[7],
        ]);
        // RIFF chunks are word aligned.
        let padded = chunk_size as usize + (chunk_size as usize & 1);

        match chunk_id {
            b"fmt " => {
                if chunk_size < 16 {
                    return Err(CodecError::Format);
                }
                let mut fmt = [0u8; 16];
                read_exact(reader, &mut fmt)?;
                skip(reader, padded - 16)?;

                let format_tag = u16::from_le_bytes([fmt[0], fmt[1]]);
                let channels = u16::from_le_bytes([fmt[2], fmt[3]]);
                let sample_rate = u32::from_le_bytes([fmt[4], fmt[5], fmt[6], fmt[7]]);
                let align = u16::from_le_bytes([fmt[12], fmt[13]]) as usize;

                if format_tag != WAVE_FORMAT_IMA_ADPCM || channels != 1 {
                    warn!("Unsupported WAV format {} with {} channels", format_tag, channels);
                    return Err(CodecError::Format);
                }
                if align <= 4 || align > MAX_BLOCK_ALIGN {
                    warn!("Unsupported ADPCM block size {}", align);
                    return Err(CodecError::Format);
                }
                if sample_rate != SAMPLE_RATE {
                    warn!("Clip sample rate is {} Hz, playing at {} Hz", sample_rate, SAMPLE_RATE);
                }
                block_align = Some(align);
            }
            b"data" => {
                return block_align
                    .map(|align| (align, chunk_size))
                    .ok_or(CodecError::Format);
            }
            _ => skip(reader, padded)?,
        }
    }

    Err(CodecError::Format)
}
