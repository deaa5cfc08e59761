//! Random IO utilities

use std::io::{ErrorKind, Read};

use bytes::Bytes;
use tracing::warn;

/// Cap on the up-front allocation. Larger entries grow their buffer as data arrives, so a bogus
/// declared length cannot reserve memory on its own.
const PREALLOC_LIMIT: usize = 64 * 1024;

/// Read up to `declared` bytes from `reader` into memory, `chunk_size` bytes per call at most.
///
/// Some decoders return short reads well before the end of an entry. This keeps reading until
/// either `declared` bytes have arrived or the reader reports end of data. If the data ends early
/// the buffer is truncated to what was actually read.
///
/// Once `declared` bytes are in, one more read is issued at the end of the data. Readers that
/// verify a checksum there (zip entries do) surface a mismatch as an error from this call.
pub fn read_declared<R: Read + ?Sized>(
    reader: &mut R,
    declared: usize,
    chunk_size: usize,
) -> std::io::Result<Bytes> {
    let mut buf = Vec::with_capacity(declared.min(PREALLOC_LIMIT));
    let mut chunk = vec![0u8; chunk_size.clamp(1, PREALLOC_LIMIT)];

    while buf.len() < declared {
        let want = chunk.len().min(declared - buf.len());
        match reader.read(&mut chunk[..want]) {
            Ok(0) => break,
            Ok(n) => buf.extend_from_slice(&chunk[..n]),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }

    if buf.len() < declared {
        warn!(declared, read = buf.len(), "data ended before its declared length");
    } else if has_trailing_data(reader)? {
        warn!(declared, "data continues past its declared length");
    }

    Ok(Bytes::from(buf))
}

fn has_trailing_data<R: Read + ?Sized>(reader: &mut R) -> std::io::Result<bool> {
    let mut byte = [0u8; 1];
    loop {
        match reader.read(&mut byte) {
            Ok(n) => return Ok(n > 0),
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{self, Cursor};

    use super::*;

    /// Hands out at most one byte per call and fails with `Interrupted` every other call.
    struct Trickle {
        data: Vec<u8>,
        pos: usize,
        interrupt: bool,
    }

    impl Read for Trickle {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.interrupt = !self.interrupt;
            if self.interrupt {
                return Err(io::Error::from(ErrorKind::Interrupted));
            }
            if self.pos == self.data.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.data[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    #[test]
    fn short_reads_are_retried_until_declared_length() {
        let mut reader = Trickle {
            data: b"0123456789".to_vec(),
            pos: 0,
            interrupt: false,
        };
        let bytes = read_declared(&mut reader, 10, 4).unwrap();
        assert_eq!(&bytes[..], b"0123456789");
    }

    #[test]
    fn early_end_truncates() {
        let mut reader = Cursor::new(b"abc".to_vec());
        let bytes = read_declared(&mut reader, 8, 1024).unwrap();
        assert_eq!(&bytes[..], b"abc");
    }

    #[test]
    fn trailing_data_is_left_out() {
        let mut reader = Cursor::new(b"abcdef".to_vec());
        let bytes = read_declared(&mut reader, 4, 3).unwrap();
        assert_eq!(&bytes[..], b"abcd");
        // One byte past the declared end is read to look for trailing data.
        assert_eq!(reader.position(), 5);
    }

    #[test]
    fn zero_length_reads_nothing() {
        let mut reader = Cursor::new(Vec::new());
        let bytes = read_declared(&mut reader, 0, 0).unwrap();
        assert!(bytes.is_empty());
    }

    #[test]
    fn bogus_declared_length_is_not_preallocated() {
        let mut reader = Cursor::new(b"abc".to_vec());
        let bytes = read_declared(&mut reader, usize::MAX, usize::MAX).unwrap();
        assert_eq!(&bytes[..], b"abc");
    }

    #[test]
    fn error_at_end_of_data_propagates() {
        /// Serves its data, then fails the read that would report end of data, the way a
        /// checksumming decoder does on a mismatch.
        struct Checksummed(Cursor<Vec<u8>>);
        impl Read for Checksummed {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                match self.0.read(buf)? {
                    0 if !buf.is_empty() => Err(io::Error::other("Invalid checksum")),
                    n => Ok(n),
                }
            }
        }

        let mut reader = Checksummed(Cursor::new(b"abcd".to_vec()));
        let err = read_declared(&mut reader, 4, 2).unwrap_err();
        assert_eq!(err.to_string(), "Invalid checksum");
    }

    #[test]
    fn hard_errors_propagate() {
        struct Broken;
        impl Read for Broken {
            fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::other("bad sector"))
            }
        }
        let err = read_declared(&mut Broken, 4, 4).unwrap_err();
        assert_eq!(err.to_string(), "bad sector");
    }
}
