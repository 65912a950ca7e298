//! File-backed block log.
//!
//! One append-only data file. Layout:
//!
//! ```text
//! +--------------------+
//! | file header (16 B) |
//! +--------------------+
//! | record frame       |  len: u32 LE | crc32(payload): u32 LE | payload
//! | record frame       |
//! | ...                |
//! +--------------------+
//! ```
//!
//! Record offsets are rebuilt by scanning the file on open. A torn or
//! checksum-corrupt tail (an interrupted append) is truncated away, so
//! the log always reopens to a prefix of fully appended records.

use crate::BlockLog;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::SeekFrom;
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use trellis_common::{LogConfig, Result, Seq, TrellisError};

/// Size of a record frame header (len + crc).
const FRAME_HEADER_SIZE: usize = 8;

/// Maximum record payload size (16 MB). A larger length field on disk
/// is treated as corruption.
const MAX_RECORD_SIZE: usize = 16 * 1024 * 1024;

/// Header at the beginning of the data file.
///
/// Layout (16 bytes):
/// - magic: 4 bytes ("TLOG")
/// - version: 4 bytes
/// - flags: 4 bytes
/// - checksum: 4 bytes (CRC32 of the first 12 bytes)
#[derive(Debug, Clone, Copy)]
struct FileHeader {
    magic: [u8; 4],
    version: u32,
    flags: u32,
    checksum: u32,
}

impl FileHeader {
    const MAGIC: [u8; 4] = *b"TLOG";
    const VERSION: u32 = 1;
    const SIZE: usize = 16;

    fn new() -> Self {
        let mut header = Self {
            magic: Self::MAGIC,
            version: Self::VERSION,
            flags: 0,
            checksum: 0,
        };
        header.checksum = header.compute_checksum();
        header
    }

    fn compute_checksum(&self) -> u32 {
        let mut data = [0u8; Self::SIZE - 4];
        data[0..4].copy_from_slice(&self.magic);
        data[4..8].copy_from_slice(&self.version.to_le_bytes());
        data[8..12].copy_from_slice(&self.flags.to_le_bytes());
        crc32fast::hash(&data)
    }

    fn validate(&self) -> Result<()> {
        if self.magic != Self::MAGIC {
            return Err(TrellisError::corrupt(0, "invalid log file magic"));
        }
        if self.version != Self::VERSION {
            return Err(TrellisError::corrupt(
                0,
                format!("unsupported log file version: {}", self.version),
            ));
        }
        if self.checksum != self.compute_checksum() {
            return Err(TrellisError::corrupt(0, "log file header checksum mismatch"));
        }
        Ok(())
    }

    fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut data = [0u8; Self::SIZE];
        data[0..4].copy_from_slice(&self.magic);
        data[4..8].copy_from_slice(&self.version.to_le_bytes());
        data[8..12].copy_from_slice(&self.flags.to_le_bytes());
        data[12..16].copy_from_slice(&self.checksum.to_le_bytes());
        data
    }

    fn from_bytes(data: &[u8; Self::SIZE]) -> Self {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&data[0..4]);

        Self {
            magic,
            version: u32::from_le_bytes([data[4], data[5], data[6], data[7]]),
            flags: u32::from_le_bytes([data[8], data[9], data[10], data[11]]),
            checksum: u32::from_le_bytes([data[12], data[13], data[14], data[15]]),
        }
    }
}

/// Open data file plus its current append position.
struct LogFile {
    file: File,
    tail: u64,
}

/// Durable block log backed by a single append-only file.
pub struct FileLog {
    config: LogConfig,
    inner: Mutex<Option<LogFile>>,
    offsets: parking_lot::RwLock<Vec<u64>>,
}

impl FileLog {
    /// Creates a handle over `config.data_file()`. Nothing is opened
    /// until `ready` is called.
    pub fn new(config: LogConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(None),
            offsets: parking_lot::RwLock::new(Vec::new()),
        }
    }

    /// Returns the configuration this log was built with.
    pub fn config(&self) -> &LogConfig {
        &self.config
    }

    /// Syncs and closes the data file. Subsequent operations fail with
    /// `LogClosed` until `ready` is called again.
    pub async fn close(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if let Some(log_file) = inner.take() {
            log_file.file.sync_all().await?;
        }
        self.offsets.write().clear();
        Ok(())
    }

    /// Scans record frames from `pos` to `file_len`, collecting start
    /// offsets. Returns the offsets and the position of the first byte
    /// that does not begin a fully intact record.
    async fn scan_records(file: &mut File, file_len: u64) -> Result<(Vec<u64>, u64)> {
        let mut offsets = Vec::new();
        let mut pos = FileHeader::SIZE as u64;

        while pos + FRAME_HEADER_SIZE as u64 <= file_len {
            file.seek(SeekFrom::Start(pos)).await?;
            let mut frame_header = [0u8; FRAME_HEADER_SIZE];
            file.read_exact(&mut frame_header).await?;

            let mut buf = &frame_header[..];
            let len = buf.get_u32_le() as usize;
            let crc = buf.get_u32_le();

            if len > MAX_RECORD_SIZE {
                break;
            }
            let end = pos + (FRAME_HEADER_SIZE + len) as u64;
            if end > file_len {
                break;
            }

            let mut payload = vec![0u8; len];
            file.read_exact(&mut payload).await?;
            if crc32fast::hash(&payload) != crc {
                break;
            }

            offsets.push(pos);
            pos = end;
        }

        Ok((offsets, pos))
    }
}

impl BlockLog for FileLog {
    async fn ready(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.is_some() {
            return Ok(());
        }

        tokio::fs::create_dir_all(&self.config.dir).await?;
        let path = self.config.data_file();
        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)
            .await?;

        let file_len = file.seek(SeekFrom::End(0)).await?;
        let (offsets, tail) = if file_len == 0 {
            let header = FileHeader::new();
            file.seek(SeekFrom::Start(0)).await?;
            file.write_all(&header.to_bytes()).await?;
            file.sync_all().await?;
            tracing::info!(path = %path.display(), "created log file");
            (Vec::new(), FileHeader::SIZE as u64)
        } else {
            if file_len < FileHeader::SIZE as u64 {
                return Err(TrellisError::corrupt(0, "log file shorter than header"));
            }
            file.seek(SeekFrom::Start(0)).await?;
            let mut header_bytes = [0u8; FileHeader::SIZE];
            file.read_exact(&mut header_bytes).await?;
            FileHeader::from_bytes(&header_bytes).validate()?;

            let (offsets, tail) = Self::scan_records(&mut file, file_len).await?;
            if tail < file_len {
                tracing::warn!(
                    path = %path.display(),
                    dropped = file_len - tail,
                    "truncating torn log tail"
                );
                file.set_len(tail).await?;
                file.sync_all().await?;
            }
            tracing::info!(
                path = %path.display(),
                records = offsets.len(),
                "opened log file"
            );
            (offsets, tail)
        };

        *self.offsets.write() = offsets;
        *inner = Some(LogFile { file, tail });
        Ok(())
    }

    fn length(&self) -> Seq {
        self.offsets.read().len() as Seq
    }

    async fn read(&self, seq: Seq) -> Result<Bytes> {
        let offset = {
            let offsets = self.offsets.read();
            match offsets.get(seq as usize) {
                Some(&offset) => offset,
                None => {
                    return Err(TrellisError::SeqOutOfRange {
                        seq,
                        length: offsets.len() as Seq,
                    })
                }
            }
        };

        let mut inner = self.inner.lock().await;
        let log_file = inner.as_mut().ok_or(TrellisError::LogClosed)?;

        log_file.file.seek(SeekFrom::Start(offset)).await?;
        let mut frame_header = [0u8; FRAME_HEADER_SIZE];
        log_file.file.read_exact(&mut frame_header).await?;

        let mut buf = &frame_header[..];
        let len = buf.get_u32_le() as usize;
        let crc = buf.get_u32_le();
        if len > MAX_RECORD_SIZE {
            return Err(TrellisError::corrupt(seq, "record length exceeds maximum"));
        }

        let mut payload = vec![0u8; len];
        log_file.file.read_exact(&mut payload).await?;
        if crc32fast::hash(&payload) != crc {
            return Err(TrellisError::corrupt(seq, "record checksum mismatch"));
        }

        Ok(Bytes::from(payload))
    }

    async fn append(&self, payload: Bytes) -> Result<Seq> {
        if payload.len() > MAX_RECORD_SIZE {
            return Err(TrellisError::invariant(format!(
                "record of {} bytes exceeds maximum {}",
                payload.len(),
                MAX_RECORD_SIZE
            )));
        }

        let mut inner = self.inner.lock().await;
        let log_file = inner.as_mut().ok_or(TrellisError::LogClosed)?;

        let mut frame = BytesMut::with_capacity(FRAME_HEADER_SIZE + payload.len());
        frame.put_u32_le(payload.len() as u32);
        frame.put_u32_le(crc32fast::hash(&payload));
        frame.put_slice(&payload);

        log_file.file.seek(SeekFrom::Start(log_file.tail)).await?;
        log_file.file.write_all(&frame).await?;
        if self.config.fsync_enabled {
            log_file.file.sync_all().await?;
        }

        let seq = {
            let mut offsets = self.offsets.write();
            let seq = offsets.len() as Seq;
            offsets.push(log_file.tail);
            seq
        };
        log_file.tail += frame.len() as u64;

        Ok(seq)
    }
}
