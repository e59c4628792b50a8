use std::io::{BufReader, ErrorKind, Read};
use std::path::{Path, PathBuf};

use crate::trace::{DataSourceError, DataSourceResult, StreamType};

const WORD_BYTES: usize = 8;

/// Lazy reader of little-endian 64-bit words.
///
/// Yields one `Ok(word)` per complete record. A trailing partial word is
/// reported once as [`DataSourceError::TruncatedRecord`], after which the
/// stream is exhausted.
pub struct HashStream<R: Read> {
    reader: BufReader<R>,
    dir: PathBuf,
    stream: StreamType,
    offset: u64,
    done: bool,
}

impl<R: Read> HashStream<R> {
    pub fn new(reader: R, dir: &Path, stream: StreamType) -> Self {
        Self {
            reader: BufReader::new(reader),
            dir: dir.to_path_buf(),
            stream,
            offset: 0,
            done: false,
        }
    }

    pub fn stream_type(&self) -> StreamType {
        self.stream
    }

    /// Byte offset of the next record.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Read a fixed-size group of words, such as an edge record.
    ///
    /// `Ok(None)` at a clean end of stream. A stream that ends inside the
    /// group is truncated even when the last word itself is complete.
    pub fn next_record<const N: usize>(&mut self) -> DataSourceResult<Option<[u64; N]>> {
        let start = self.offset;
        let mut record = [0u64; N];
        for (idx, slot) in record.iter_mut().enumerate() {
            match self.next() {
                Some(Ok(word)) => *slot = word,
                Some(Err(err)) => return Err(err),
                None if idx == 0 => return Ok(None),
                None => {
                    return Err(DataSourceError::TruncatedRecord {
                        dir: self.dir.clone(),
                        stream: self.stream,
                        offset: start,
                        trailing: (self.offset - start) as usize,
                    })
                }
            }
        }
        Ok(Some(record))
    }

    fn read_word(&mut self) -> DataSourceResult<Option<u64>> {
        let mut buf = [0u8; WORD_BYTES];
        let mut filled = 0;
        while filled < WORD_BYTES {
            match self.reader.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(source) => {
                    return Err(DataSourceError::Io { dir: self.dir.clone(), stream: self.stream, source })
                }
            }
        }

        match filled {
            0 => Ok(None),
            WORD_BYTES => {
                self.offset += WORD_BYTES as u64;
                Ok(Some(u64::from_le_bytes(buf)))
            }
            trailing => Err(DataSourceError::TruncatedRecord {
                dir: self.dir.clone(),
                stream: self.stream,
                offset: self.offset,
                trailing,
            }),
        }
    }
}

impl<R: Read> Iterator for HashStream<R> {
    type Item = DataSourceResult<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.read_word() {
            Ok(Some(word)) => Some(Ok(word)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }
}
