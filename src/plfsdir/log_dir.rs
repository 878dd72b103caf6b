//! Local log-structured directory engine
//!
//! ランクごとに1つのパーティションを持つ:
//! - data log `L-<rank>.dat` (rotation有効時は `L-<rank>.dat.<epoch>`)
//! - index log `L-<rank>.idx`
//!
//! Records are buffered in a memtable of `data_buffer` bytes. A full
//! memtable is encoded into a data block, either inline or on the
//! background pool; blocks reach the data log strictly in submission order.
//! `epoch_flush` writes one index block per epoch, `finish` writes the
//! footer.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex};

use super::env::{Env, LocalEnv, WritableFile};
use super::filter::BloomFilter;
use super::options::DirOptions;
use super::{DirEngine, DirHandle, ErrPrinter, OpenMode, ThreadPool};
use crate::constants::{LOG_BLOCK_SIZE, LOG_TAIL_ALIGNMENT};
use crate::session::SessionConfig;

/// Index block magic ("EPOC")
pub const EPOCH_BLOCK_MAGIC: u32 = 0x4550_4F43;

/// Footer magic ("PLFSDIR\0")
pub const FOOTER_MAGIC: u64 = 0x504C_4653_4449_5200;

/// Engine creating [`LogDirHandle`]s
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDirEngine;

impl DirEngine for LogDirEngine {
    type Handle = LogDirHandle;

    fn create_handle(&self, conf: &SessionConfig, mode: OpenMode) -> io::Result<LogDirHandle> {
        if mode != OpenMode::WriteOnly {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                "log directory only supports write-only handles",
            ));
        }

        let options = DirOptions::parse(conf.as_str())?;
        Ok(LogDirHandle {
            options,
            err_printer: None,
            pool: None,
            env: Arc::new(LocalEnv),
            dir: None,
            finished: false,
        })
    }
}

/// One index entry per record
#[derive(Debug, Clone)]
struct IndexEntry {
    key: String,
    epoch: u32,
    offset: u64,
    len: u32,
}

/// Encoded data block plus entries with block-relative offsets
struct EncodedBlock {
    bytes: Vec<u8>,
    entries: Vec<IndexEntry>,
}

fn encode_block(records: Vec<(String, u32, Vec<u8>)>) -> EncodedBlock {
    let size: usize = records.iter().map(|(k, _, v)| 8 + k.len() + v.len()).sum();
    let mut bytes = Vec::with_capacity(size);
    let mut entries = Vec::with_capacity(records.len());

    for (key, epoch, value) in records {
        let offset = bytes.len() as u64;
        bytes.extend_from_slice(&(key.len() as u32).to_le_bytes());
        bytes.extend_from_slice(key.as_bytes());
        bytes.extend_from_slice(&(value.len() as u32).to_le_bytes());
        bytes.extend_from_slice(&value);
        entries.push(IndexEntry {
            len: (bytes.len() as u64 - offset) as u32,
            key,
            epoch,
            offset,
        });
    }

    EncodedBlock { bytes, entries }
}

/// Ordered writer for the data log
///
/// Blocks may be encoded out of order by the pool; `submit` buffers them
/// until every earlier sequence number has been written.
struct LogSink {
    file: Box<dyn WritableFile>,
    offset: u64,
    next_seq: u64,
    pending: BTreeMap<u64, EncodedBlock>,
    index: Vec<IndexEntry>,
    block_padding: bool,
}

impl LogSink {
    fn submit(&mut self, seq: u64, block: EncodedBlock) -> io::Result<()> {
        self.pending.insert(seq, block);

        while let Some(block) = self.pending.remove(&self.next_seq) {
            self.next_seq += 1;

            let base = self.offset;
            self.file.append(&block.bytes)?;
            self.offset += block.bytes.len() as u64;
            self.index.extend(block.entries.into_iter().map(|mut e| {
                e.offset += base;
                e
            }));

            if self.block_padding {
                self.pad_to(LOG_BLOCK_SIZE)?;
            }
        }
        Ok(())
    }

    fn pad_to(&mut self, unit: u64) -> io::Result<()> {
        let rem = self.offset % unit;
        if rem != 0 {
            let padding = unit - rem;
            self.file.append(&vec![0u8; padding as usize])?;
            self.offset += padding;
        }
        Ok(())
    }
}

/// State of an opened directory partition
struct OpenDir {
    path: PathBuf,
    sink: Arc<Mutex<LogSink>>,
    index_file: Box<dyn WritableFile>,
    memtable: Vec<(String, u32, Vec<u8>)>,
    memtable_bytes: usize,
    next_seq: u64,
    done_tx: Sender<io::Result<()>>,
    done_rx: Receiver<io::Result<()>>,
    outstanding: usize,
    /// Lowest epoch that may still receive records
    current_epoch: u32,
    /// Data log was closed by a rotating flush; the next append opens a new one
    rotate_pending: bool,
    epochs_flushed: u32,
    records: u64,
}

/// Handle on one rank's partition
pub struct LogDirHandle {
    options: DirOptions,
    err_printer: Option<ErrPrinter>,
    pool: Option<Arc<ThreadPool>>,
    env: Arc<dyn Env>,
    dir: Option<OpenDir>,
    finished: bool,
}

impl LogDirHandle {
    fn data_log_name(&self, epoch: u32) -> String {
        if self.options.epoch_log_rotation {
            format!("L-{:08x}.dat.{}", self.options.rank, epoch)
        } else {
            format!("L-{:08x}.dat", self.options.rank)
        }
    }

    fn index_log_name(&self) -> String {
        format!("L-{:08x}.idx", self.options.rank)
    }

    /// Report an error through the printer and hand it back
    fn complain(&self, op: &str, err: io::Error) -> io::Error {
        if let Some(printer) = &self.err_printer {
            printer(&format!("{}: {}", op, err));
        }
        err
    }

    fn open_dir(&mut self) -> io::Result<&mut OpenDir> {
        if self.finished {
            return Err(io::Error::new(io::ErrorKind::Other, "directory already finished"));
        }
        self.dir
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "directory not opened"))
    }

    /// Hand the memtable to the sink, on the pool if one is attached
    fn compact_memtable(&mut self) -> io::Result<()> {
        let pool = self.pool.clone();
        let dir = self.open_dir()?;
        if dir.memtable.is_empty() {
            return Ok(());
        }

        let records = std::mem::take(&mut dir.memtable);
        dir.memtable_bytes = 0;
        let seq = dir.next_seq;
        dir.next_seq += 1;

        let sink = dir.sink.clone();
        let job = move || {
            let block = encode_block(records);
            match sink.lock() {
                Ok(mut sink) => sink.submit(seq, block),
                Err(_) => Err(io::Error::new(io::ErrorKind::Other, "data log poisoned")),
            }
        };

        match pool {
            Some(pool) => {
                let done = dir.done_tx.clone();
                pool.schedule(move || {
                    let _ = done.send(job());
                })?;
                dir.outstanding += 1;
                Ok(())
            }
            None => job(),
        }
    }

    /// Wait for every scheduled block write, returning the first failure
    fn wait_outstanding(&mut self) -> io::Result<()> {
        let dir = self.open_dir()?;
        let mut result = Ok(());
        while dir.outstanding > 0 {
            let done = dir
                .done_rx
                .recv()
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "background worker lost"))?;
            dir.outstanding -= 1;
            if result.is_ok() {
                result = done;
            }
        }
        result
    }

    fn write_epoch_index(&mut self, epoch: u32) -> io::Result<()> {
        let bits_per_key = self.options.bf_bits_per_key;
        let tail_padding = self.options.tail_padding;
        let rotate = self.options.epoch_log_rotation;

        let dir = self.open_dir()?;
        let mut sink = dir
            .sink
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "data log poisoned"))?;

        // Built first so an oversized filter leaves the epoch untouched
        let filter = if bits_per_key > 0 {
            let mut filter = BloomFilter::new(sink.index.len(), bits_per_key)?;
            for entry in &sink.index {
                filter.insert(entry.key.as_bytes());
            }
            Some(filter.encode())
        } else {
            None
        };

        if tail_padding {
            sink.pad_to(LOG_TAIL_ALIGNMENT)?;
        }
        sink.file.flush()?;
        let entries = std::mem::take(&mut sink.index);

        if rotate {
            sink.file.sync()?;
            dir.rotate_pending = true;
        }
        drop(sink);

        let mut block = Vec::new();
        block.extend_from_slice(&EPOCH_BLOCK_MAGIC.to_le_bytes());
        block.extend_from_slice(&epoch.to_le_bytes());
        block.extend_from_slice(&(entries.len() as u32).to_le_bytes());

        match filter {
            Some(encoded) => {
                block.extend_from_slice(&(encoded.len() as u32).to_le_bytes());
                block.extend_from_slice(&encoded);
            }
            None => block.extend_from_slice(&0u32.to_le_bytes()),
        }

        for entry in &entries {
            block.extend_from_slice(&(entry.key.len() as u32).to_le_bytes());
            block.extend_from_slice(entry.key.as_bytes());
            block.extend_from_slice(&entry.epoch.to_le_bytes());
            block.extend_from_slice(&entry.offset.to_le_bytes());
            block.extend_from_slice(&entry.len.to_le_bytes());
        }

        dir.index_file.append(&block)?;
        dir.index_file.flush()?;
        dir.records += entries.len() as u64;
        dir.epochs_flushed += 1;
        dir.current_epoch = epoch.saturating_add(1);

        tracing::debug!(
            "epoch {} flushed: {} records, {} epochs total",
            epoch,
            entries.len(),
            dir.epochs_flushed
        );
        Ok(())
    }

    fn do_append(&mut self, key: &str, epoch: u32, value: &[u8]) -> io::Result<()> {
        let data_buffer = self.options.data_buffer;
        let data_log = self.data_log_name(epoch);
        let env = self.env.clone();
        let dir = self.open_dir()?;
        if epoch < dir.current_epoch {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("epoch {} already flushed", epoch),
            ));
        }

        if dir.rotate_pending {
            let file = env.new_writable_file(&dir.path.join(data_log))?;
            let mut sink = dir
                .sink
                .lock()
                .map_err(|_| io::Error::new(io::ErrorKind::Other, "data log poisoned"))?;
            sink.file = file;
            sink.offset = 0;
            drop(sink);
            dir.rotate_pending = false;
        }

        dir.memtable_bytes += key.len() + value.len() + 8;
        dir.memtable.push((key.to_string(), epoch, value.to_vec()));

        if dir.memtable_bytes >= data_buffer {
            self.compact_memtable()?;
        }
        Ok(())
    }

    fn do_epoch_flush(&mut self, epoch: u32) -> io::Result<()> {
        let dir = self.open_dir()?;
        if epoch < dir.current_epoch {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("epoch {} already flushed", epoch),
            ));
        }
        if let Some((_, newest, _)) = dir.memtable.iter().find(|(_, e, _)| *e > epoch) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("flush of epoch {} with pending records of epoch {}", epoch, newest),
            ));
        }

        self.compact_memtable()?;
        self.wait_outstanding()?;
        self.write_epoch_index(epoch)
    }

    fn do_finish(&mut self) -> io::Result<()> {
        let dir = self.open_dir()?;
        if !dir.memtable.is_empty() {
            let epoch = dir.memtable.iter().map(|(_, e, _)| *e).max().unwrap_or(dir.current_epoch);
            self.do_epoch_flush(epoch)?;
        }
        self.wait_outstanding()?;

        let rank = self.options.rank;
        let key_size = self.options.key_size as u32;
        let value_size = self.options.value_size as u32;

        let dir = self.open_dir()?;
        {
            let mut sink = dir
                .sink
                .lock()
                .map_err(|_| io::Error::new(io::ErrorKind::Other, "data log poisoned"))?;
            sink.file.sync()?;
        }

        let mut footer = Vec::with_capacity(32);
        footer.extend_from_slice(&rank.to_le_bytes());
        footer.extend_from_slice(&dir.epochs_flushed.to_le_bytes());
        footer.extend_from_slice(&dir.records.to_le_bytes());
        footer.extend_from_slice(&key_size.to_le_bytes());
        footer.extend_from_slice(&value_size.to_le_bytes());
        footer.extend_from_slice(&FOOTER_MAGIC.to_le_bytes());
        dir.index_file.append(&footer)?;
        dir.index_file.sync()?;

        tracing::debug!(
            "plfsdir {} finished: {} epochs, {} records",
            dir.path.display(),
            dir.epochs_flushed,
            dir.records
        );

        self.finished = true;
        Ok(())
    }
}

impl DirHandle for LogDirHandle {
    fn set_err_printer(&mut self, printer: ErrPrinter) {
        self.err_printer = Some(printer);
    }

    fn set_thread_pool(&mut self, pool: Arc<ThreadPool>) {
        self.pool = Some(pool);
    }

    fn set_env(&mut self, env: Arc<dyn Env>) {
        self.env = env;
    }

    fn open(&mut self, path: &Path) -> io::Result<()> {
        if self.dir.is_some() || self.finished {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "handle already opened"));
        }

        let result = (|| {
            self.env.create_dir(path)?;
            let data_file = self.env.new_writable_file(&path.join(self.data_log_name(0)))?;
            let index_file = self.env.new_writable_file(&path.join(self.index_log_name()))?;
            Ok::<_, io::Error>((data_file, index_file))
        })();

        let (data_file, index_file) =
            result.map_err(|e| self.complain(&format!("open {}", path.display()), e))?;

        let (done_tx, done_rx) = mpsc::channel();
        self.dir = Some(OpenDir {
            path: path.to_path_buf(),
            sink: Arc::new(Mutex::new(LogSink {
                file: data_file,
                offset: 0,
                next_seq: 0,
                pending: BTreeMap::new(),
                index: Vec::new(),
                block_padding: self.options.block_padding,
            })),
            index_file,
            memtable: Vec::new(),
            memtable_bytes: 0,
            next_seq: 0,
            done_tx,
            done_rx,
            outstanding: 0,
            current_epoch: 0,
            rotate_pending: false,
            epochs_flushed: 0,
            records: 0,
        });

        tracing::debug!(
            "plfsdir {} opened by rank {} on {} env",
            path.display(),
            self.options.rank,
            self.env.name()
        );
        Ok(())
    }

    fn append(&mut self, key: &str, epoch: u32, value: &[u8]) -> io::Result<()> {
        self.do_append(key, epoch, value)
            .map_err(|e| self.complain(&format!("append {}", key), e))
    }

    fn epoch_flush(&mut self, epoch: u32) -> io::Result<()> {
        self.do_epoch_flush(epoch)
            .map_err(|e| self.complain(&format!("epoch flush {}", epoch), e))
    }

    fn finish(&mut self) -> io::Result<()> {
        self.do_finish().map_err(|e| self.complain("finish", e))
    }
}

impl Drop for LogDirHandle {
    fn drop(&mut self) {
        if self.dir.is_some() && !self.finished {
            if self.wait_outstanding().is_err() {
                tracing::warn!("plfsdir rank {} released with failed writes", self.options.rank);
            }
            tracing::warn!(
                "plfsdir rank {} released without finish, footer not written",
                self.options.rank
            );
        }
    }
}
