/*
    commit_log.rs - Append-only record log

    Durable, sequential storage for operation log records.
    Replayed on open to rebuild the in-memory index.

    Features:
    - Append-only writes (no in-place updates)
    - Sequential read for replay
    - Atomic rewrite for compaction
    - CRC32 checksums for corruption detection
*/

use super::errors::{StoreError, StoreResult};
use crate::core_oplog::now_millis;
use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

/// Bytes of framing around each record: seq, timestamp, length, checksum
const FRAME_OVERHEAD: usize = 8 + 8 + 4 + 4;

/// Entry in the commit log
#[derive(Debug, Clone)]
pub struct LogEntry {
    /// Record number within this file
    pub seq: u64,

    /// Write time in milliseconds
    pub timestamp: u64,

    /// Record payload
    pub data: Vec<u8>,

    /// CRC32 checksum
    pub checksum: u32,
}

impl LogEntry {
    pub fn new(seq: u64, timestamp: u64, data: Vec<u8>) -> Self {
        let checksum = Self::calculate_checksum(&data);
        LogEntry { seq, timestamp, data, checksum }
    }

    fn calculate_checksum(data: &[u8]) -> u32 {
        crc32fast::hash(data)
    }

    pub fn verify_checksum(&self) -> bool {
        Self::calculate_checksum(&self.data) == self.checksum
    }

    fn write_to<W: Write>(&self, out: &mut W) -> std::io::Result<()> {
        // [seq:8][timestamp:8][len:4][data:len][checksum:4]
        out.write_all(&self.seq.to_le_bytes())?;
        out.write_all(&self.timestamp.to_le_bytes())?;
        out.write_all(&(self.data.len() as u32).to_le_bytes())?;
        out.write_all(&self.data)?;
        out.write_all(&self.checksum.to_le_bytes())
    }
}

/// Append-only commit log
pub struct CommitLog {
    path: PathBuf,
    file: BufWriter<File>,
    seq: u64,
    size: usize,
}

impl CommitLog {
    /// Create or open a commit log, resuming the record sequence
    pub fn new(path: PathBuf) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).read(true).open(&path)?;
        let size = file.metadata()?.len() as usize;

        let mut log = CommitLog { path, file: BufWriter::new(file), seq: 0, size };
        if size > 0 {
            let entries = log.read_all()?;
            let valid_len: usize = entries.iter().map(|e| FRAME_OVERHEAD + e.data.len()).sum();
            if valid_len < size {
                // Drop the torn tail so new records are not appended after garbage
                log.file.get_mut().set_len(valid_len as u64)?;
                log.size = valid_len;
            }
            log.seq = entries.last().map(|e| e.seq + 1).unwrap_or(0);
        }
        Ok(log)
    }

    /// Append a record and flush it
    pub fn append(&mut self, data: &[u8]) -> StoreResult<u64> {
        let entry = LogEntry::new(self.seq, now_millis(), data.to_vec());
        entry.write_to(&mut self.file)?;
        self.file.flush()?;

        self.size += FRAME_OVERHEAD + entry.data.len();
        self.seq += 1;

        Ok(entry.seq)
    }

    /// Read all records.
    ///
    /// A record cut short at the end of the file (crash during append) ends
    /// the read. A checksum mismatch is corruption and fails the read.
    pub fn read_all(&self) -> StoreResult<Vec<LogEntry>> {
        let file = File::open(&self.path)?;
        let mut reader = BufReader::new(file);
        let mut entries = Vec::new();

        loop {
            match read_entry(&mut reader) {
                Ok(Some(entry)) => {
                    if !entry.verify_checksum() {
                        return Err(StoreError::CorruptedData(format!(
                            "Invalid checksum at seq {} in {}",
                            entry.seq,
                            self.path.display()
                        )));
                    }
                    entries.push(entry);
                }
                Ok(None) => break,
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                    tracing::warn!(
                        path = %self.path.display(),
                        records = entries.len(),
                        "Ignoring truncated record at end of commit log"
                    );
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        Ok(entries)
    }

    /// Replace the whole log with `records`, atomically
    pub fn rewrite<'a>(&mut self, records: impl IntoIterator<Item = &'a [u8]>) -> StoreResult<()> {
        self.file.flush()?;

        let temp_path = temp_path_for(&self.path);
        let mut size = 0;
        let mut seq = 0;
        {
            let mut out = BufWriter::new(File::create(&temp_path)?);
            let timestamp = now_millis();
            for data in records {
                let entry = LogEntry::new(seq, timestamp, data.to_vec());
                entry.write_to(&mut out)?;
                size += FRAME_OVERHEAD + data.len();
                seq += 1;
            }
            out.flush()?;
            out.get_ref().sync_all()?;
        }
        std::fs::rename(&temp_path, &self.path)?;

        let file = OpenOptions::new().append(true).read(true).open(&self.path)?;
        self.file = BufWriter::new(file);
        self.seq = seq;
        self.size = size;
        Ok(())
    }

    /// Truncate the log (remove all records)
    pub fn truncate(&mut self) -> StoreResult<()> {
        self.rewrite(std::iter::empty())
    }

    /// Current size of the log in bytes
    pub fn size(&self) -> usize {
        self.size
    }

    /// Sequence number the next record will get
    pub fn current_seq(&self) -> u64 {
        self.seq
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Read one record. `Ok(None)` at a clean end of file.
fn read_entry<R: Read>(reader: &mut R) -> std::io::Result<Option<LogEntry>> {
    let mut seq_buf = [0u8; 8];
    let read = reader.read(&mut seq_buf)?;
    if read == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut seq_buf[read..])?;
    let seq = u64::from_le_bytes(seq_buf);

    let mut ts_buf = [0u8; 8];
    reader.read_exact(&mut ts_buf)?;
    let timestamp = u64::from_le_bytes(ts_buf);

    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_le_bytes(len_buf) as usize;

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data)?;

    let mut checksum_buf = [0u8; 4];
    reader.read_exact(&mut checksum_buf)?;
    let checksum = u32::from_le_bytes(checksum_buf);

    Ok(Some(LogEntry { seq, timestamp, data, checksum }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_commit_log_creation() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("ops.log");

        let log = CommitLog::new(path);
        assert!(log.is_ok());
    }

    #[test]
    fn test_append_and_read() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ops.log");

        let mut log = CommitLog::new(path.clone()).unwrap();
        assert_eq!(log.append(b"record 1").unwrap(), 0);
        assert_eq!(log.append(b"record 2").unwrap(), 1);
        drop(log);

        let log = CommitLog::new(path).unwrap();
        let entries = log.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].data, b"record 1");
        assert_eq!(entries[1].data, b"record 2");
    }

    #[test]
    fn test_reopen_resumes_sequence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ops.log");

        let mut log = CommitLog::new(path.clone()).unwrap();
        log.append(b"a").unwrap();
        log.append(b"b").unwrap();
        drop(log);

        let mut log = CommitLog::new(path).unwrap();
        assert_eq!(log.current_seq(), 2);
        assert_eq!(log.append(b"c").unwrap(), 2);
    }

    #[test]
    fn test_checksum_mismatch_is_corruption() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ops.log");

        let mut log = CommitLog::new(path.clone()).unwrap();
        log.append(b"some data").unwrap();
        drop(log);

        let mut bytes = std::fs::read(&path).unwrap();
        bytes[20] ^= 0xFF;
        std::fs::write(&path, bytes).unwrap();

        let err = CommitLog::new(path).err().unwrap();
        assert!(matches!(err, StoreError::CorruptedData(_)));
    }

    #[test]
    fn test_truncated_tail_is_ignored() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ops.log");

        let mut log = CommitLog::new(path.clone()).unwrap();
        log.append(b"complete").unwrap();
        log.append(b"torn record").unwrap();
        drop(log);

        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 5]).unwrap();

        let mut log = CommitLog::new(path).unwrap();
        assert_eq!(log.read_all().unwrap().len(), 1);
        assert_eq!(log.current_seq(), 1);

        log.append(b"after recovery").unwrap();
        let entries = log.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].data, b"after recovery");
    }

    #[test]
    fn test_rewrite_and_truncate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ops.log");

        let mut log = CommitLog::new(path.clone()).unwrap();
        for i in 0..5u8 {
            log.append(&[i]).unwrap();
        }
        log.rewrite([&[7u8][..], &[8u8][..]]).unwrap();
        assert_eq!(log.current_seq(), 2);
        assert_eq!(log.size(), 2 * (FRAME_OVERHEAD + 1));

        log.append(&[9]).unwrap();
        let data: Vec<_> = log.read_all().unwrap().into_iter().map(|e| e.data).collect();
        assert_eq!(data, vec![vec![7], vec![8], vec![9]]);

        log.truncate().unwrap();
        assert_eq!(log.size(), 0);
        assert_eq!(log.current_seq(), 0);
        assert!(log.read_all().unwrap().is_empty());
    }
}
