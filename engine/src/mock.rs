//! In-memory stand-ins for the board capabilities.
//!
//! Every mock is a cheap handle onto shared state, so a test keeps a clone to drive and
//! inspect the device after moving the other clone into the engine.

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::convert::Infallible;
use std::rc::Rc;
use std::string::{String, ToString};
use std::vec::Vec;

use crate::codec::{Codec, Pump};
use crate::error::{CodecError, NetworkError, StorageError};
use crate::management::{Increment, Method, Response, Transport, UploadPart};
use crate::scheduler::{Board, System};
use crate::storage::{ClipWriter, Entry, Storage};

#[derive(Clone)]
pub struct MockPin {
    low: Rc<Cell<bool>>,
}

impl MockPin {
    pub fn released() -> Self {
        Self {
            low: Rc::new(Cell::new(false)),
        }
    }

    pub fn press(&self) {
        self.low.set(true);
    }

    pub fn release(&self) {
        self.low.set(false);
    }
}

impl embedded_hal::digital::ErrorType for MockPin {
    type Error = Infallible;
}

impl embedded_hal::digital::InputPin for MockPin {
    fn is_high(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.low.get())
    }

    fn is_low(&mut self) -> Result<bool, Self::Error> {
        Ok(self.low.get())
    }
}

#[derive(Default)]
struct MockFs {
    files: BTreeMap<String, Vec<u8>>,
    open_readers: usize,
    open_writers: usize,
    fail_opens: Option<StorageError>,
    fail_writes: Option<StorageError>,
    capacity: Option<usize>,
}

impl MockFs {
    fn used(&self) -> usize {
        self.files.values().map(Vec::len).sum()
    }
}

#[derive(Clone, Default)]
pub struct MockStorage {
    fs: Rc<RefCell<MockFs>>,
}

impl MockStorage {
    pub fn with_files(files: &[(&str, &str)]) -> Self {
        let storage = Self::default();
        for (name, content) in files {
            storage.put(name, content.as_bytes());
        }
        storage
    }

    pub fn put(&self, name: &str, content: &[u8]) {
        self.fs
            .borrow_mut()
            .files
            .insert(name.to_string(), content.to_vec());
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fs.borrow().files.contains_key(name)
    }

    pub fn content(&self, name: &str) -> Option<Vec<u8>> {
        self.fs.borrow().files.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.fs.borrow().files.keys().cloned().collect()
    }

    pub fn open_readers(&self) -> usize {
        self.fs.borrow().open_readers
    }

    pub fn open_writers(&self) -> usize {
        self.fs.borrow().open_writers
    }

    pub fn fail_opens(&self, err: StorageError) {
        self.fs.borrow_mut().fail_opens = Some(err);
    }

    pub fn fail_writes(&self, err: StorageError) {
        self.fs.borrow_mut().fail_writes = Some(err);
    }

    /// Total bytes the card holds before writes fail with [`StorageError::Full`].
    pub fn set_capacity(&self, bytes: usize) {
        self.fs.borrow_mut().capacity = Some(bytes);
    }
}

impl Storage for MockStorage {
    type Reader = MockReader;
    type Writer = MockWriter;

    fn exists(&mut self, name: &str) -> Result<bool, StorageError> {
        Ok(self.contains(name))
    }

    fn open(&mut self, name: &str) -> Result<MockReader, StorageError> {
        let mut fs = self.fs.borrow_mut();
        if let Some(err) = fs.fail_opens {
            return Err(err);
        }
        let data = fs.files.get(name).cloned().ok_or(StorageError::NotFound)?;
        fs.open_readers += 1;
        Ok(MockReader {
            data,
            pos: 0,
            fs: self.fs.clone(),
        })
    }

    fn create(&mut self, name: &str) -> Result<MockWriter, StorageError> {
        let mut fs = self.fs.borrow_mut();
        fs.files.insert(name.to_string(), Vec::new());
        fs.open_writers += 1;
        Ok(MockWriter {
            name: name.to_string(),
            fs: self.fs.clone(),
        })
    }

    fn remove(&mut self, name: &str) -> Result<(), StorageError> {
        self.fs
            .borrow_mut()
            .files
            .remove(name)
            .map(|_| ())
            .ok_or(StorageError::NotFound)
    }

    fn list(&mut self) -> Result<Vec<Entry>, StorageError> {
        Ok(self
            .fs
            .borrow()
            .files
            .iter()
            .filter_map(|(name, data)| {
                Some(Entry {
                    name: name.as_str().try_into().ok()?,
                    size: data.len() as u32,
                })
            })
            .collect())
    }
}

pub struct MockReader {
    data: Vec<u8>,
    pos: usize,
    fs: Rc<RefCell<MockFs>>,
}

impl MockReader {
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.pos..]
    }
}

impl Drop for MockReader {
    fn drop(&mut self) {
        self.fs.borrow_mut().open_readers -= 1;
    }
}

impl embedded_io::ErrorType for MockReader {
    type Error = Infallible;
}

impl embedded_io::Read for MockReader {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let n = buf.len().min(self.remaining().len());
        buf[..n].copy_from_slice(&self.data[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

pub struct MockWriter {
    name: String,
    fs: Rc<RefCell<MockFs>>,
}

impl ClipWriter for MockWriter {
    fn write(&mut self, data: &[u8]) -> Result<(), StorageError> {
        let mut fs = self.fs.borrow_mut();
        if let Some(err) = fs.fail_writes {
            return Err(err);
        }
        if fs.capacity.is_some_and(|capacity| fs.used() + data.len() > capacity) {
            return Err(StorageError::Full);
        }
        fs.files
            .get_mut(&self.name)
            .ok_or(StorageError::NotFound)?
            .extend_from_slice(data);
        Ok(())
    }

    fn commit(self) -> Result<(), StorageError> {
        Ok(())
    }
}

impl Drop for MockWriter {
    fn drop(&mut self) {
        self.fs.borrow_mut().open_writers -= 1;
    }
}

/// Frames are 4 bytes; a `!` in a frame is a read error and data starting with `BAD` does
/// not open.
#[derive(Clone, Default)]
pub struct MockCodec {
    opens: Rc<Cell<usize>>,
    frames: Rc<Cell<usize>>,
    idles: Rc<Cell<usize>>,
}

impl MockCodec {
    pub const FRAME: usize = 4;

    pub fn new() -> Self {
        Self::default()
    }

    pub fn opens(&self) -> usize {
        self.opens.get()
    }

    pub fn frames(&self) -> usize {
        self.frames.get()
    }

    pub fn idles(&self) -> usize {
        self.idles.get()
    }
}

impl Codec for MockCodec {
    type Reader = MockReader;
    type Stream = MockReader;

    fn open(&mut self, reader: MockReader) -> Result<MockReader, CodecError> {
        self.opens.set(self.opens.get() + 1);
        if reader.remaining().starts_with(b"BAD") {
            return Err(CodecError::Format);
        }
        Ok(reader)
    }

    fn pump(&mut self, stream: &mut MockReader) -> Result<Pump, CodecError> {
        let mut frame = [0u8; Self::FRAME];
        let n = embedded_io::Read::read(stream, &mut frame).map_err(|_| CodecError::Read)?;
        if n == 0 {
            return Ok(Pump::Exhausted);
        }
        if frame[..n].contains(&b'!') {
            return Err(CodecError::Read);
        }
        self.frames.set(self.frames.get() + 1);
        Ok(Pump::Streaming)
    }

    fn idle(&mut self) {
        self.idles.set(self.idles.get() + 1);
    }
}

#[derive(Clone, Default)]
pub struct MockConsole {
    input: Rc<RefCell<VecDeque<u8>>>,
}

impl MockConsole {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn type_text(&self, text: &str) {
        self.input.borrow_mut().extend(text.bytes());
    }

    pub fn pending(&self) -> usize {
        self.input.borrow().len()
    }
}

impl embedded_io::ErrorType for MockConsole {
    type Error = Infallible;
}

impl embedded_io::Read for MockConsole {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut input = self.input.borrow_mut();
        let mut n = 0;
        while n < buf.len() {
            let Some(byte) = input.pop_front() else { break };
            buf[n] = byte;
            n += 1;
        }
        Ok(n)
    }
}

impl embedded_io::ReadReady for MockConsole {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.input.borrow().is_empty())
    }
}

#[derive(Default)]
struct Network {
    enabled: bool,
    enable_calls: usize,
    fail_enable: bool,
    inbox: VecDeque<Increment>,
    replies: Vec<Option<Response>>,
}

#[derive(Clone, Default)]
pub struct MockTransport {
    network: Rc<RefCell<Network>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_enable(&self, fail: bool) {
        self.network.borrow_mut().fail_enable = fail;
    }

    pub fn is_enabled(&self) -> bool {
        self.network.borrow().enabled
    }

    pub fn enable_calls(&self) -> usize {
        self.network.borrow().enable_calls
    }

    pub fn send(&self, increment: Increment) {
        self.network.borrow_mut().inbox.push_back(increment);
    }

    pub fn request(&self, method: Method, target: &str) {
        self.send(Increment::Request {
            method,
            target: target.to_string(),
        });
    }

    pub fn upload_start(&self, filename: &str) {
        self.send(Increment::Upload(UploadPart::Start {
            filename: filename.to_string(),
        }));
    }

    pub fn upload_data(&self, data: &str) {
        self.send(Increment::Upload(UploadPart::Data(data.as_bytes().to_vec())));
    }

    pub fn upload_end(&self) {
        self.send(Increment::Upload(UploadPart::End));
    }

    pub fn pending(&self) -> usize {
        self.network.borrow().inbox.len()
    }

    pub fn replies(&self) -> Vec<Option<Response>> {
        self.network.borrow().replies.clone()
    }

    /// The last reply that carried a response.
    pub fn last_response(&self) -> Option<Response> {
        self.network
            .borrow()
            .replies
            .iter()
            .rev()
            .find_map(Clone::clone)
    }
}

impl Transport for MockTransport {
    fn enable(&mut self) -> Result<(), NetworkError> {
        let mut network = self.network.borrow_mut();
        network.enable_calls += 1;
        if network.fail_enable {
            return Err(NetworkError::BringUp);
        }
        network.enabled = true;
        Ok(())
    }

    fn poll(&mut self) -> Option<Increment> {
        self.network.borrow_mut().inbox.pop_front()
    }

    fn reply(&mut self, response: Option<Response>) {
        self.network.borrow_mut().replies.push(response);
    }
}

#[derive(Clone, Default)]
pub struct MockSystem {
    restarts: Rc<Cell<usize>>,
}

impl MockSystem {
    pub fn restarts(&self) -> usize {
        self.restarts.get()
    }
}

impl System for MockSystem {
    fn restart(&mut self) {
        self.restarts.set(self.restarts.get() + 1);
    }
}

pub struct MockBoard;

impl Board for MockBoard {
    type PlayPin = MockPin;
    type ResetPin = MockPin;
    type Storage = MockStorage;
    type Codec = MockCodec;
    type Console = MockConsole;
    type Transport = MockTransport;
    type System = MockSystem;
}
