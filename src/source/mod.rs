//! CODA buffer files
//!
//! A file is a plain sequence of event buffers, each a little-endian u32
//! length word followed by that many words. No file header or footer.

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use thiserror::Error;
use tracing::{debug, warn};

/// Source errors
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("File ends inside a buffer: expected {expected} bytes, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("Buffer of {declared} words exceeds the {max}-word limit, skipped")]
    TooLong { declared: usize, max: usize },
}

impl SourceError {
    /// True when the reader can continue with the next buffer
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::TooLong { .. })
    }
}

/// Reads event buffers from a CODA buffer stream
pub struct CodaFileReader<R> {
    reader: R,
    max_event_length: usize,
    buffers_read: u64,
    words_read: u64,
    done: bool,
}

impl CodaFileReader<BufReader<File>> {
    /// Open a buffer file
    pub fn open<P: AsRef<Path>>(path: P, max_event_length: usize) -> Result<Self, SourceError> {
        let file = File::open(path.as_ref())?;
        debug!(path = %path.as_ref().display(), "opened buffer file");
        Ok(Self::new(BufReader::new(file), max_event_length))
    }
}

impl<R: Read> CodaFileReader<R> {
    pub fn new(reader: R, max_event_length: usize) -> Self {
        Self {
            reader,
            max_event_length,
            buffers_read: 0,
            words_read: 0,
            done: false,
        }
    }

    /// Read the next buffer, length word included
    ///
    /// Returns `Ok(None)` at a clean end of file. An over-long buffer is
    /// skipped and reported as `TooLong`; the next call continues after it.
    pub fn next_buffer(&mut self) -> Result<Option<Vec<u32>>, SourceError> {
        if self.done {
            return Ok(None);
        }

        let mut len_bytes = [0u8; 4];
        match read_full(&mut self.reader, &mut len_bytes)? {
            0 => {
                self.done = true;
                return Ok(None);
            }
            4 => {}
            got => {
                self.done = true;
                return Err(SourceError::Truncated { expected: 4, got });
            }
        }

        let len = u32::from_le_bytes(len_bytes) as usize;
        let declared = len + 1;
        let payload_bytes = len * 4;

        if declared > self.max_event_length {
            let skipped = io::copy(
                &mut (&mut self.reader).take(payload_bytes as u64),
                &mut io::sink(),
            )?;
            if skipped < payload_bytes as u64 {
                self.done = true;
                return Err(SourceError::Truncated {
                    expected: payload_bytes,
                    got: skipped as usize,
                });
            }
            warn!(
                declared,
                max = self.max_event_length,
                "skipping over-long buffer"
            );
            return Err(SourceError::TooLong {
                declared,
                max: self.max_event_length,
            });
        }

        let mut bytes = vec![0u8; payload_bytes];
        let got = read_full(&mut self.reader, &mut bytes)?;
        if got < payload_bytes {
            self.done = true;
            return Err(SourceError::Truncated {
                expected: payload_bytes,
                got,
            });
        }

        let mut buffer = Vec::with_capacity(declared);
        buffer.push(len as u32);
        buffer.extend(
            bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]])),
        );

        self.buffers_read += 1;
        self.words_read += declared as u64;
        Ok(Some(buffer))
    }

    pub fn buffers_read(&self) -> u64 {
        self.buffers_read
    }

    pub fn words_read(&self) -> u64 {
        self.words_read
    }
}

impl<R: Read> Iterator for CodaFileReader<R> {
    type Item = Result<Vec<u32>, SourceError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_buffer().transpose()
    }
}

/// Read until `buf` is full or the stream ends; returns bytes read
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Writes event buffers in the format `CodaFileReader` reads
pub struct CodaFileWriter<W: Write> {
    writer: W,
    buffers_written: u64,
}

impl CodaFileWriter<BufWriter<File>> {
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self, SourceError> {
        Ok(Self::new(BufWriter::new(File::create(path)?)))
    }
}

impl<W: Write> CodaFileWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            buffers_written: 0,
        }
    }

    /// Write one buffer as-is; word 0 must already hold the length
    pub fn write_buffer(&mut self, buffer: &[u32]) -> Result<(), SourceError> {
        for word in buffer {
            self.writer.write_all(&word.to_le_bytes())?;
        }
        self.buffers_written += 1;
        Ok(())
    }

    pub fn buffers_written(&self) -> u64 {
        self.buffers_written
    }

    /// Flush and return the inner writer
    pub fn finish(mut self) -> Result<W, SourceError> {
        self.writer.flush()?;
        Ok(self.writer)
    }
}
