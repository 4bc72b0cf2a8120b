use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use crate::model::Event;

/// Upper bound on a single encoded event. A length prefix above this is
/// treated as corruption rather than allocated.
const MAX_ENTRY_LEN: usize = 16 * 1024 * 1024;

/// Encode a single event to [len][bincode][crc32] format.
fn encode_event(writer: &mut impl Write, event: &Event) -> io::Result<()> {
    let payload =
        bincode::serialize(event).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let len = payload.len() as u32;
    let crc = crc32fast::hash(&payload);
    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.write_all(&crc.to_le_bytes())?;
    Ok(())
}

/// Read one framed entry. `Ok(None)` means clean EOF, a torn tail, or a
/// CRC/decode mismatch.
fn read_entry(reader: &mut impl Read) -> io::Result<Option<Event>> {
    let mut len_buf = [0u8; 4];
    if !read_or_eof(reader, &mut len_buf)? {
        return Ok(None);
    }
    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_ENTRY_LEN {
        return Ok(None);
    }

    let mut payload = vec![0u8; len];
    if !read_or_eof(reader, &mut payload)? {
        return Ok(None);
    }

    let mut crc_buf = [0u8; 4];
    if !read_or_eof(reader, &mut crc_buf)? {
        return Ok(None);
    }
    if u32::from_le_bytes(crc_buf) != crc32fast::hash(&payload) {
        return Ok(None);
    }

    Ok(bincode::deserialize::<Event>(&payload).ok())
}

fn read_or_eof(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

/// The file underneath a [`Wal`]. Only `File` in production; tests plug in
/// sinks that fail on demand.
pub trait LogFile: Write + Send {
    fn sync(&mut self) -> io::Result<()>;
    /// Cut the file back to `len` bytes. Later writes land at the new end.
    fn truncate(&mut self, len: u64) -> io::Result<()>;
}

impl LogFile for File {
    fn sync(&mut self) -> io::Result<()> {
        self.sync_all()
    }

    fn truncate(&mut self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }
}

/// Append-only write-ahead log of booking events.
///
/// Format per entry: `[u32: len][bincode: Event][u32: crc32]`
/// - `len` is the byte length of the bincode payload (not including the CRC).
/// - A truncated last entry (crash mid-write) is discarded on replay, so a
///   cancellation and its evictions come back together or not at all.
///
/// Appends are staged in memory and reach the file only in `flush_sync`.
/// A failed flush must be followed by `discard_uncommitted`, which drops the
/// staged frames and cuts the file back to the last synced length, so a
/// rejected event can never be written by a later flush. If that cut fails
/// the log is poisoned and refuses every further append.
pub struct Wal {
    file: Box<dyn LogFile>,
    path: PathBuf,
    pending: Vec<u8>,
    pending_events: u64,
    /// File length after the last successful `flush_sync`.
    committed_len: u64,
    appends_since_compact: u64,
    poisoned: bool,
}

impl Wal {
    /// Open (or create) the WAL file at `path`.
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let len = file.metadata()?.len();
        Ok(Self::from_parts(path, Box::new(file), len))
    }

    /// Wrap an already-open log file whose current length is `len`.
    pub fn from_parts(path: &Path, file: Box<dyn LogFile>, len: u64) -> Self {
        Self {
            file,
            path: path.to_path_buf(),
            pending: Vec::new(),
            pending_events: 0,
            committed_len: len,
            appends_since_compact: 0,
            poisoned: false,
        }
    }

    /// Append and fsync a single event. Production code batches through
    /// `append_buffered` + `flush_sync` instead.
    #[cfg(test)]
    pub fn append(&mut self, event: &Event) -> io::Result<()> {
        self.append_buffered(event)?;
        self.flush_sync()
    }

    /// Stage an event without writing it. Durable only after `flush_sync()`.
    pub fn append_buffered(&mut self, event: &Event) -> io::Result<()> {
        self.check_poisoned()?;
        let mark = self.pending.len();
        if let Err(e) = encode_event(&mut self.pending, event) {
            self.pending.truncate(mark);
            return Err(e);
        }
        self.pending_events += 1;
        Ok(())
    }

    /// Write and fsync everything staged. On error nothing is committed and
    /// the caller must call `discard_uncommitted`.
    pub fn flush_sync(&mut self) -> io::Result<()> {
        self.check_poisoned()?;
        if !self.pending.is_empty() {
            self.file.write_all(&self.pending)?;
            self.file.flush()?;
        }
        self.file.sync()?;
        self.committed_len += self.pending.len() as u64;
        self.appends_since_compact += self.pending_events;
        self.pending.clear();
        self.pending_events = 0;
        Ok(())
    }

    /// Drop staged frames and cut off anything a failed flush left on disk.
    pub fn discard_uncommitted(&mut self) -> io::Result<()> {
        self.pending.clear();
        self.pending_events = 0;
        if let Err(e) = self.file.truncate(self.committed_len).and_then(|()| self.file.sync()) {
            self.poisoned = true;
            return Err(e);
        }
        Ok(())
    }

    pub fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    fn check_poisoned(&self) -> io::Result<()> {
        if self.poisoned {
            return Err(io::Error::other("WAL poisoned by an earlier failed rollback"));
        }
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn compact_tmp_path(path: &Path) -> PathBuf {
        path.with_extension("wal.tmp")
    }

    /// Write the compacted event set to a sibling temp file and fsync it.
    pub fn write_compact_file(path: &Path, events: &[Event]) -> io::Result<()> {
        let file = File::create(Self::compact_tmp_path(path))?;
        let mut writer = BufWriter::new(file);
        for event in events {
            encode_event(&mut writer, event)?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()
    }

    /// Rename the temp file over the live log and reopen it for appends.
    pub fn swap_compact_file(&mut self) -> io::Result<()> {
        self.check_poisoned()?;
        fs::rename(Self::compact_tmp_path(&self.path), &self.path)?;
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.committed_len = file.metadata()?.len();
        self.file = Box::new(file);
        self.pending.clear();
        self.pending_events = 0;
        self.appends_since_compact = 0;
        Ok(())
    }

    #[cfg(test)]
    pub fn compact(&mut self, events: &[Event]) -> io::Result<()> {
        Self::write_compact_file(&self.path, events)?;
        self.swap_compact_file()
    }

    /// Events durably appended since the last compaction.
    pub fn appends_since_compact(&self) -> u64 {
        self.appends_since_compact
    }

    /// Replay the WAL from disk, returning all valid events in append order.
    /// Replay stops at the first truncated or corrupt entry.
    pub fn replay(path: &Path) -> io::Result<Vec<Event>> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };
        Self::replay_from(BufReader::new(file))
    }

    pub fn replay_from(mut reader: impl Read) -> io::Result<Vec<Event>> {
        let mut events = Vec::new();
        while let Some(event) = read_entry(&mut reader)? {
            events.push(event);
        }
        Ok(events)
    }
}

/// In-memory log file with switchable write and truncate failures.
#[cfg(test)]
pub(crate) mod flaky {
    use std::io::{self, Write};
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use super::LogFile;

    #[derive(Clone, Default)]
    pub(crate) struct FlakyFile {
        pub bytes: Arc<Mutex<Vec<u8>>>,
        pub fail_writes: Arc<AtomicBool>,
        pub fail_truncate: Arc<AtomicBool>,
    }

    impl FlakyFile {
        pub fn contents(&self) -> Vec<u8> {
            self.bytes.lock().unwrap().clone()
        }
    }

    impl Write for FlakyFile {
        /// A failing write still lands a few bytes, like a disk filling up
        /// mid-frame.
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            let mut bytes = self.bytes.lock().unwrap();
            if self.fail_writes.load(Ordering::SeqCst) {
                bytes.extend_from_slice(&buf[..buf.len().min(3)]);
                return Err(io::Error::other("no space left on device"));
            }
            bytes.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl LogFile for FlakyFile {
        fn sync(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn truncate(&mut self, len: u64) -> io::Result<()> {
            if self.fail_truncate.load(Ordering::SeqCst) {
                return Err(io::Error::other("I/O error"));
            }
            self.bytes.lock().unwrap().truncate(len as usize);
            Ok(())
        }
    }
}
