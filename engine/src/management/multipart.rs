//! Streaming `multipart/form-data` splitter.
//!
//! The HTTP side feeds body chunks of any size as they arrive; the splitter turns the first
//! file part into [`UploadPart`] increments without ever holding the whole body. Other
//! form fields are skipped.

use alloc::string::{String, ToString};
use alloc::vec::Vec;

use crate::error::MultipartError;

use super::UploadPart;

/// Part headers larger than this are rejected.
pub const HEADER_LIMIT: usize = 1024;

/// Boundary parameter of a `multipart/form-data` content type.
pub fn boundary_from_content_type(content_type: &str) -> Option<&str> {
    let mut params = content_type.split(';');
    let mime = params.next()?.trim();
    if !mime.eq_ignore_ascii_case("multipart/form-data") {
        return None;
    }
    params
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("boundary"))
        .map(|(_, value)| value.trim().trim_matches('"'))
        .filter(|boundary| !boundary.is_empty() && boundary.len() <= 70)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Preamble,
    /// Right after a delimiter: either `--` (end of body) or CRLF (headers follow).
    AfterDelimiter,
    Headers,
    Body { file: bool },
    Done,
}

pub struct MultipartSplitter {
    /// `--boundary`.
    delimiter: Vec<u8>,
    state: State,
    buffer: Vec<u8>,
    file_seen: bool,
}

impl MultipartSplitter {
    pub fn new(boundary: &str) -> Self {
        let mut delimiter = Vec::with_capacity(boundary.len() + 2);
        delimiter.extend_from_slice(b"--");
        delimiter.extend_from_slice(boundary.as_bytes());
        Self {
            delimiter,
            state: State::Preamble,
            buffer: Vec::new(),
            file_seen: false,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state == State::Done
    }

    /// Feeds the next body chunk and returns the increments it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<UploadPart>, MultipartError> {
        let mut parts = Vec::new();
        if self.state == State::Done {
            return Ok(parts);
        }
        self.buffer.extend_from_slice(chunk);

        while self.advance(&mut parts)? {}
        Ok(parts)
    }

    /// Checks the body ended at its closing delimiter after a file part.
    pub fn finish(&self) -> Result<(), MultipartError> {
        if self.state != State::Done {
            Err(MultipartError::Truncated)
        } else if !self.file_seen {
            Err(MultipartError::Malformed)
        } else {
            Ok(())
        }
    }

    /// One state transition. Returns whether another one may be possible without more input.
    fn advance(&mut self, parts: &mut Vec<UploadPart>) -> Result<bool, MultipartError> {
        match self.state {
            State::Preamble => match find(&self.buffer, &self.delimiter) {
                Some(at) => {
                    self.buffer.drain(..at + self.delimiter.len());
                    self.state = State::AfterDelimiter;
                    Ok(true)
                }
                None => {
                    let keep = self.delimiter.len() - 1;
                    let scanned = self.buffer.len().saturating_sub(keep);
                    self.buffer.drain(..scanned);
                    Ok(false)
                }
            },
            State::AfterDelimiter => {
                if self.buffer.len() < 2 {
                    return Ok(false);
                }
                match &self.buffer[..2] {
                    b"--" => {
                        self.buffer.clear();
                        self.state = State::Done;
                        Ok(false)
                    }
                    b"\r\n" => {
                        self.buffer.drain(..2);
                        self.state = State::Headers;
                        Ok(true)
                    }
                    _ => Err(MultipartError::Malformed),
                }
            }
            State::Headers => {
                let Some(at) = find(&self.buffer, b"\r\n\r\n") else {
                    return if self.buffer.len() > HEADER_LIMIT {
                        Err(MultipartError::HeadersTooLarge)
                    } else {
                        Ok(false)
                    };
                };
                if at > HEADER_LIMIT {
                    return Err(MultipartError::HeadersTooLarge);
                }

                let headers = core::str::from_utf8(&self.buffer[..at])
                    .map_err(|_| MultipartError::Malformed)?;
                let file = match filename_of(headers) {
                    Some(filename) if !self.file_seen => {
                        parts.push(UploadPart::Start { filename });
                        self.file_seen = true;
                        true
                    }
                    _ => false,
                };
                self.buffer.drain(..at + 4);
                self.state = State::Body { file };
                Ok(true)
            }
            State::Body { file } => {
                // Part data ends at CRLF followed by the delimiter.
                let end = find_part_end(&self.buffer, &self.delimiter);
                let take = match end {
                    Some(at) => at,
                    None => self.buffer.len().saturating_sub(self.delimiter.len() + 1),
                };
                if file && take > 0 {
                    parts.push(UploadPart::Data(self.buffer[..take].to_vec()));
                }

                match end {
                    Some(at) => {
                        if file {
                            parts.push(UploadPart::End);
                        }
                        self.buffer.drain(..at + 2 + self.delimiter.len());
                        self.state = State::AfterDelimiter;
                        Ok(true)
                    }
                    None => {
                        self.buffer.drain(..take);
                        Ok(false)
                    }
                }
            }
            State::Done => Ok(false),
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn find_part_end(haystack: &[u8], delimiter: &[u8]) -> Option<usize> {
    haystack
        .windows(delimiter.len() + 2)
        .position(|window| window.starts_with(b"\r\n") && &window[2..] == delimiter)
}

/// `filename` parameter of the part's `Content-Disposition`, without any client-side path.
fn filename_of(headers: &str) -> Option<String> {
    let (_, value) = headers
        .split("\r\n")
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-disposition"))?;

    let filename = value
        .split(';')
        .skip(1)
        .filter_map(|param| param.split_once('='))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("filename"))?
        .1
        .trim()
        .trim_matches('"');
    let basename = filename.rsplit(|c| c == '/' || c == '\\').next().unwrap_or(filename);
    Some(basename.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str = "preamble\r\n\
        --XyZ\r\n\
        Content-Disposition: form-data; name=\"note\"\r\n\r\n\
        ignored\r\n\
        --XyZ\r\n\
        Content-Disposition: form-data; name=\"file\"; filename=\"C:\\\\music\\\\clip2.wav\"\r\n\
        Content-Type: audio/wav\r\n\r\n\
        RIFF\r\n--Xy data\r\n\
        --XyZ--\r\n";

    /// Feeds `body` in chunks of `size` and merges adjacent data increments.
    fn split(body: &[u8], size: usize) -> (Vec<UploadPart>, Result<(), MultipartError>) {
        let mut splitter = MultipartSplitter::new("XyZ");
        let mut parts: Vec<UploadPart> = Vec::new();
        for chunk in body.chunks(size) {
            for part in splitter.push(chunk).unwrap() {
                if let (Some(UploadPart::Data(data)), UploadPart::Data(more)) =
                    (parts.last_mut(), &part)
                {
                    data.extend_from_slice(more);
                    continue;
                }
                parts.push(part);
            }
        }
        (parts, splitter.finish())
    }

    #[test]
    fn test_boundary_from_content_type() {
        assert_eq!(
            boundary_from_content_type("multipart/form-data; boundary=----abc"),
            Some("----abc")
        );
        assert_eq!(
            boundary_from_content_type("Multipart/Form-Data; charset=utf-8; boundary=\"q r\""),
            Some("q r")
        );
        assert_eq!(boundary_from_content_type("multipart/form-data"), None);
        assert_eq!(boundary_from_content_type("application/json; boundary=x"), None);
    }

    #[test]
    fn test_file_part_is_split_out() {
        let (parts, finished) = split(BODY.as_bytes(), BODY.len());

        assert_eq!(
            parts,
            [
                UploadPart::Start {
                    filename: "clip2.wav".into()
                },
                UploadPart::Data(b"RIFF\r\n--Xy data".to_vec()),
                UploadPart::End,
            ]
        );
        assert_eq!(finished, Ok(()));
    }

    #[test]
    fn test_any_chunking_gives_the_same_parts() {
        let (expected, _) = split(BODY.as_bytes(), BODY.len());
        for size in 1..BODY.len() {
            let (parts, finished) = split(BODY.as_bytes(), size);
            assert_eq!(parts, expected, "chunk size {size}");
            assert_eq!(finished, Ok(()), "chunk size {size}");
        }
    }

    #[test]
    fn test_truncated_body() {
        let cut = BODY.find("--XyZ--").unwrap();
        let (parts, finished) = split(&BODY.as_bytes()[..cut], 7);

        assert!(!parts.contains(&UploadPart::End));
        assert_eq!(finished, Err(MultipartError::Truncated));
    }

    #[test]
    fn test_closing_delimiter_ends_the_body() {
        let cut = BODY.find("--XyZ--").unwrap();
        let mut splitter = MultipartSplitter::new("XyZ");

        splitter.push(&BODY.as_bytes()[..cut]).unwrap();
        assert!(!splitter.is_done());
        splitter.push(&BODY.as_bytes()[cut..]).unwrap();
        assert!(splitter.is_done());

        // The epilogue is ignored.
        assert_eq!(splitter.push(b"trailing junk"), Ok(Vec::new()));
        assert_eq!(splitter.finish(), Ok(()));
    }

    #[test]
    fn test_body_without_file_part() {
        let body = "--XyZ\r\nContent-Disposition: form-data; name=\"a\"\r\n\r\n1\r\n--XyZ--";
        let (parts, finished) = split(body.as_bytes(), 5);

        assert!(parts.is_empty());
        assert_eq!(finished, Err(MultipartError::Malformed));
    }

    #[test]
    fn test_oversized_headers_are_rejected() {
        let mut body = String::from("--XyZ\r\nX-Padding: ");
        body.push_str(&"a".repeat(HEADER_LIMIT + 1));
        let mut splitter = MultipartSplitter::new("XyZ");

        assert_eq!(
            splitter.push(body.as_bytes()),
            Err(MultipartError::HeadersTooLarge)
        );
    }

    #[test]
    fn test_garbage_after_delimiter() {
        let mut splitter = MultipartSplitter::new("XyZ");
        assert_eq!(
            splitter.push(b"--XyZxx"),
            Err(MultipartError::Malformed)
        );
    }
}
