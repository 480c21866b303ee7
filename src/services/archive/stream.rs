use crate::services::config::RetryPolicy;
use crate::services::core::retry::{attempt, Clock};
use crate::types::errors::{ExtractError, ExtractResult};
use std::fmt;
use std::io::{self, Read, Write};

/// A read returned zero bytes although the entry promised more.
#[derive(Debug)]
struct Stalled;

impl fmt::Display for Stalled {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("stream returned no data")
    }
}

/// Copy one entry of `expected` bytes from `reader` to `writer`.
///
/// Zero-byte reads before `expected` is reached are retried under
/// `stall`; when those run out the copy fails with `UnexpectedEnd`
/// carrying the byte count received so far. Once `expected` is reached the
/// reader is still read to its end, so an oversized entry shows up in the
/// returned count instead of being cut silently.
pub fn copy_entry<R, W>(
    reader: &mut R,
    writer: &mut W,
    expected: u64,
    key: &str,
    stall: &RetryPolicy,
    clock: &dyn Clock,
    buffer_size: usize,
) -> ExtractResult<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = vec![0u8; buffer_size.max(512)];
    let mut written: u64 = 0;
    let what = format!("Reading '{key}'");

    loop {
        let n = if written < expected {
            let outcome = attempt(stall, clock, &what, |_| match read_some(reader, &mut buf) {
                Ok(0) => Err(Stalled),
                other => Ok(other),
            });
            match outcome {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => return Err(ExtractError::read(key, e)),
                Err(Stalled) => {
                    return Err(ExtractError::UnexpectedEnd {
                        key: key.to_string(),
                        expected,
                        received: written,
                        dump_path: None,
                    })
                }
            }
        } else {
            match read_some(reader, &mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) => return Err(ExtractError::read(key, e)),
            }
        };

        writer.write_all(&buf[..n])?;
        written += n as u64;
    }

    Ok(written)
}

fn read_some<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(buf) {
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            other => return other,
        }
    }
}

#[cfg(test)]
#[path = "tests/stream_tests.rs"]
mod tests;
