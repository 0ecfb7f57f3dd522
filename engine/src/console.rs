use embedded_io::{Read, ReadReady};

pub const LINE_CAPACITY: usize = 64;
pub const COMMAND_CAPACITY: usize = 16;

/// Upper bound on bytes taken from the console in one poll.
const MAX_BYTES_PER_POLL: usize = LINE_CAPACITY + 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Command {
    EnableManagement,
}

/// Line reader over the serial console.
///
/// Only the configured enable command is recognised; everything else is dropped. Lines end
/// at `\r`, `\n` or `\r\n`. Lines longer than [`LINE_CAPACITY`] are discarded as a whole.
pub struct Console<R> {
    reader: R,
    line: heapless::Vec<u8, LINE_CAPACITY>,
    overflowed: bool,
    /// The last byte was `\r`, so a following `\n` belongs to the same terminator.
    after_cr: bool,
    enable_command: heapless::String<COMMAND_CAPACITY>,
}

impl<R: Read + ReadReady> Console<R> {
    /// `enable_command` is trimmed; longer commands than [`COMMAND_CAPACITY`] never match.
    pub fn new(reader: R, enable_command: &str) -> Self {
        Self {
            reader,
            line: heapless::Vec::new(),
            overflowed: false,
            after_cr: false,
            enable_command: enable_command.trim().try_into().unwrap_or_default(),
        }
    }

    /// Takes whatever input is ready, up to and including at most one line terminator.
    pub fn poll(&mut self) -> Option<Command> {
        for _ in 0..MAX_BYTES_PER_POLL {
            if !matches!(self.reader.read_ready(), Ok(true)) {
                return None;
            }

            let mut byte = [0u8; 1];
            match self.reader.read(&mut byte) {
                Ok(1) => {}
                _ => return None,
            }

            let byte = byte[0];
            if byte == b'\n' && core::mem::take(&mut self.after_cr) {
                continue;
            }
            self.after_cr = byte == b'\r';
            if matches!(byte, b'\r' | b'\n') {
                return self.finish_line();
            }
            if self.line.push(byte).is_err() {
                self.overflowed = true;
            }
        }
        None
    }

    fn finish_line(&mut self) -> Option<Command> {
        let overflowed = core::mem::take(&mut self.overflowed);
        let command = if overflowed {
            warn!("Console line too long, ignored");
            None
        } else {
            self.parse()
        };
        self.line.clear();
        command
    }

    fn parse(&self) -> Option<Command> {
        let line = core::str::from_utf8(&self.line).ok()?.trim();
        if line.is_empty() {
            return None;
        }

        if !self.enable_command.is_empty() && line.eq_ignore_ascii_case(&self.enable_command) {
            Some(Command::EnableManagement)
        } else {
            debug!("Ignoring console input: {}", line);
            None
        }
    }
}
