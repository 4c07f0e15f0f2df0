//! Byte-range file delivery
//!
//! Only the single-range forms `bytes=start-` and `bytes=start-end` are
//! served partially. Suffix ranges (`bytes=-N`), multi-range requests and
//! anything unparseable are ignored and the whole file is sent, which HTTP
//! permits for range forms a server does not support.

use std::io::{self, SeekFrom};
use std::path::Path;
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_stream::Stream;

/// Upper bound on bytes held in memory per streamed read.
pub const STREAM_BLOCK_SIZE: usize = 256 * 1024;

#[derive(Error, Debug)]
pub enum RangeError {
    #[error("File not found: {0}")]
    NotFound(String),
    #[error("Requested range not satisfiable (size {size})")]
    NotSatisfiable { size: u64 },
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// A requested `start-[end]` span, end inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

impl ByteRange {
    /// Parse a `Range` header value. `None` means "serve the whole file".
    pub fn parse(header: &str) -> Option<Self> {
        let ranges = header.trim().strip_prefix("bytes=")?;
        if ranges.contains(',') {
            return None;
        }
        let (start, end) = ranges.split_once('-')?;
        let start = parse_offset(start.trim())?;
        let end = match end.trim() {
            "" => None,
            end => Some(parse_offset(end)?),
        };
        Some(Self { start, end })
    }
}

fn parse_offset(value: &str) -> Option<u64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

/// What part of the file a response carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Served {
    Full,
    Partial { start: u64, end: u64 },
}

/// Boundary arithmetic for a file of `size` bytes.
pub fn plan(size: u64, range: Option<ByteRange>) -> Result<Served, RangeError> {
    let Some(range) = range else {
        return Ok(Served::Full);
    };
    if range.start >= size {
        return Err(RangeError::NotSatisfiable { size });
    }
    let last = size - 1;
    let end = range.end.map_or(last, |end| end.min(last));
    if end < range.start {
        return Err(RangeError::NotSatisfiable { size });
    }
    Ok(Served::Partial {
        start: range.start,
        end,
    })
}

/// An opened file positioned for a full or partial response.
pub struct RangeBody {
    file: tokio::fs::File,
    pub size: u64,
    pub served: Served,
    pub start: u64,
    /// Exact number of bytes the stream yields
    pub length: u64,
}

impl RangeBody {
    /// `Content-Range` value for partial responses.
    pub fn content_range(&self) -> Option<String> {
        match self.served {
            Served::Full => None,
            Served::Partial { start, end } => Some(format!("bytes {}-{}/{}", start, end, self.size)),
        }
    }

    /// Stream the selected bytes in blocks of at most [`STREAM_BLOCK_SIZE`].
    pub fn into_stream(self) -> impl Stream<Item = io::Result<Vec<u8>>> {
        let RangeBody {
            mut file,
            start,
            length,
            ..
        } = self;

        async_stream::stream! {
            if let Err(e) = file.seek(SeekFrom::Start(start)).await {
                yield Err(e);
                return;
            }

            let mut buf = vec![0u8; STREAM_BLOCK_SIZE.min(length as usize).max(1)];
            let mut remaining = length;
            let mut served = 0u64;
            while remaining > 0 {
                let want = remaining.min(buf.len() as u64) as usize;
                match file.read(&mut buf[..want]).await {
                    Ok(0) => {
                        tracing::warn!(served, expected = length, "File shrank while streaming");
                        break;
                    }
                    Ok(n) => {
                        remaining -= n as u64;
                        served += n as u64;
                        yield Ok(buf[..n].to_vec());
                    }
                    Err(e) => {
                        tracing::error!("Failed to read file range: {}", e);
                        yield Err(e);
                        return;
                    }
                }
            }
            tracing::debug!(start, served, "Finished streaming file");
        }
    }
}

/// Open `path` for delivery of `range`.
pub async fn open_range(path: &Path, range: Option<ByteRange>) -> Result<RangeBody, RangeError> {
    let meta = match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => meta,
        _ => return Err(RangeError::NotFound(path.display().to_string())),
    };
    let size = meta.len();
    let served = plan(size, range)?;
    let file = tokio::fs::File::open(path).await?;

    let (start, length) = match served {
        Served::Full => (0, size),
        Served::Partial { start, end } => (start, end - start + 1),
    };
    Ok(RangeBody {
        file,
        size,
        served,
        start,
        length,
    })
}
