use crate::model::Message;
use crate::{RelaymqError, Result};
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Queue log record format (big-endian):
/// [crc: 4 bytes][valid: 1 byte][delivery_mode: 1 byte][id_len: 2 bytes][id]
/// [key_len: 4 bytes][routing_key][body: remaining bytes]
///
/// The CRC covers everything after the CRC field. In the data file every record is
/// preceded by a 4-byte big-endian length prefix.
const RECORD_HEADER_SIZE: usize = 12; // 4 + 1 + 1 + 2 + 4
const LENGTH_PREFIX_SIZE: u64 = 4;

const DATA_FILE: &str = "queue_data.txt";
const COMPACT_FILE: &str = "queue_data_new.txt";
const STAT_FILE: &str = "queue_stat.txt";

#[derive(Debug, Clone, PartialEq)]
pub struct MessageRecord {
    pub valid: bool,
    pub delivery_mode: u8,
    pub message_id: String,
    pub routing_key: String,
    pub body: Bytes,
}

impl MessageRecord {
    pub fn from_message(message: &Message) -> Self {
        Self {
            valid: message.is_valid,
            delivery_mode: message.properties.delivery_mode,
            message_id: message.properties.message_id.clone(),
            routing_key: message.properties.routing_key.clone(),
            body: message.body.clone(),
        }
    }

    pub fn into_message(self, offset_beg: u64, offset_end: u64) -> Message {
        Message {
            properties: crate::model::BasicProperties {
                message_id: self.message_id,
                routing_key: self.routing_key,
                delivery_mode: self.delivery_mode,
            },
            body: self.body,
            offset_beg,
            offset_end,
            is_valid: self.valid,
        }
    }

    /// Size of the encoded record, identical for the valid and invalid forms
    pub fn serialized_size(&self) -> usize {
        RECORD_HEADER_SIZE + self.message_id.len() + self.routing_key.len() + self.body.len()
    }

    pub fn serialize(&self) -> Result<Vec<u8>> {
        let id_len = u16::try_from(self.message_id.len()).map_err(|_| {
            RelaymqError::Storage(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Message id exceeds u16::MAX bytes",
            ))
        })?;
        let key_len = u32::try_from(self.routing_key.len()).map_err(|_| {
            RelaymqError::Storage(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Routing key exceeds u32::MAX bytes",
            ))
        })?;
        if u32::try_from(self.serialized_size()).is_err() {
            return Err(RelaymqError::Storage(io::Error::new(
                io::ErrorKind::InvalidInput,
                "Message record exceeds u32::MAX bytes",
            )));
        }

        let mut payload = Vec::with_capacity(self.serialized_size() - 4);
        payload.push(u8::from(self.valid));
        payload.push(self.delivery_mode);
        payload.extend_from_slice(&id_len.to_be_bytes());
        payload.extend_from_slice(self.message_id.as_bytes());
        payload.extend_from_slice(&key_len.to_be_bytes());
        payload.extend_from_slice(self.routing_key.as_bytes());
        payload.extend_from_slice(&self.body);

        let crc = crc32fast::hash(&payload);
        let mut buf = Vec::with_capacity(payload.len() + 4);
        buf.extend_from_slice(&crc.to_be_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Decodes one record (without its length prefix)
    pub fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < RECORD_HEADER_SIZE {
            return Err(RelaymqError::Corruption(format!(
                "record of {} bytes is shorter than the header",
                data.len()
            )));
        }

        let crc = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let payload = &data[4..];
        if crc != crc32fast::hash(payload) {
            return Err(RelaymqError::Corruption(
                "CRC mismatch in queue log record".to_string(),
            ));
        }

        let valid = payload[0] != 0;
        let delivery_mode = payload[1];
        let id_len = u16::from_be_bytes([payload[2], payload[3]]) as usize;
        let mut pos = 4;
        if payload.len() < pos + id_len + 4 {
            return Err(RelaymqError::Corruption(
                "Insufficient data for message id".to_string(),
            ));
        }
        let message_id = decode_str(&payload[pos..pos + id_len])?;
        pos += id_len;

        let key_len = u32::from_be_bytes([
            payload[pos],
            payload[pos + 1],
            payload[pos + 2],
            payload[pos + 3],
        ]) as usize;
        pos += 4;
        if payload.len() < pos + key_len {
            return Err(RelaymqError::Corruption(
                "Insufficient data for routing key".to_string(),
            ));
        }
        let routing_key = decode_str(&payload[pos..pos + key_len])?;
        pos += key_len;

        Ok(MessageRecord {
            valid,
            delivery_mode,
            message_id,
            routing_key,
            body: Bytes::copy_from_slice(&payload[pos..]),
        })
    }
}

fn decode_str(bytes: &[u8]) -> Result<String> {
    String::from_utf8(bytes.to_vec())
        .map_err(|e| RelaymqError::Corruption(format!("invalid utf-8 in record: {}", e)))
}

/// Record counters kept next to each queue log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QueueStat {
    pub total_count: u64,
    pub valid_count: u64,
}

/// When a queue log is rewritten to drop invalidated records
#[derive(Debug, Clone, Copy)]
pub struct CompactionPolicy {
    /// Compaction is considered only once the log holds more records than this
    pub min_records: u64,
    /// Compact when `valid / total` falls below this ratio
    pub valid_ratio: f64,
}

impl Default for CompactionPolicy {
    fn default() -> Self {
        Self {
            min_records: 2000,
            valid_ratio: 0.5,
        }
    }
}

/// Whether `queue_name` names exactly one directory directly under the data directory
pub fn is_safe_queue_name(queue_name: &str) -> bool {
    let mut components = Path::new(queue_name).components();
    matches!(components.next(), Some(Component::Normal(segment)) if segment == queue_name)
        && components.next().is_none()
}

/// Per-queue log state guarded by the queue's file lock.
///
/// `locations` maps each live message id to the byte range of its record, so deletes
/// keep addressing the right bytes after a compaction has moved them.
#[derive(Debug, Default)]
struct QueueLog {
    locations: HashMap<String, (u64, u64)>,
}

/// Append-only message logs, one directory per queue under `base_dir`
#[derive(Debug)]
pub struct MessageStore {
    base_dir: PathBuf,
    policy: CompactionPolicy,
    logs: DashMap<String, Arc<Mutex<QueueLog>>>,
}

impl MessageStore {
    pub fn new<P: AsRef<Path>>(base_dir: P, policy: CompactionPolicy) -> Result<Self> {
        let base_dir = base_dir.as_ref().to_path_buf();
        fs::create_dir_all(&base_dir)?;
        Ok(Self {
            base_dir,
            policy,
            logs: DashMap::new(),
        })
    }

    pub fn queue_dir(&self, queue_name: &str) -> PathBuf {
        self.base_dir.join(queue_name)
    }

    fn data_path(&self, queue_name: &str) -> PathBuf {
        self.queue_dir(queue_name).join(DATA_FILE)
    }

    fn compact_path(&self, queue_name: &str) -> PathBuf {
        self.queue_dir(queue_name).join(COMPACT_FILE)
    }

    fn stat_path(&self, queue_name: &str) -> PathBuf {
        self.queue_dir(queue_name).join(STAT_FILE)
    }

    fn log(&self, queue_name: &str) -> Arc<Mutex<QueueLog>> {
        self.logs
            .entry(queue_name.to_string())
            .or_default()
            .value()
            .clone()
    }

    /// Creates the queue directory with an empty log and zeroed stats
    pub fn create_queue_files(&self, queue_name: &str) -> Result<()> {
        if !is_safe_queue_name(queue_name) {
            return Err(RelaymqError::InvalidName(queue_name.to_string()));
        }
        let log = self.log(queue_name);
        let mut log = log.lock();

        fs::create_dir_all(self.queue_dir(queue_name))?;
        File::create(self.data_path(queue_name))?;
        self.write_stat(queue_name, QueueStat::default())?;
        log.locations.clear();

        debug!("Created log files for queue {}", queue_name);
        Ok(())
    }

    pub fn destroy_queue_files(&self, queue_name: &str) -> Result<()> {
        if !is_safe_queue_name(queue_name) {
            return Err(RelaymqError::InvalidName(queue_name.to_string()));
        }
        let log = self.log(queue_name);
        let _guard = log.lock();

        match fs::remove_dir_all(self.queue_dir(queue_name)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!("Log directory for queue {} was already gone", queue_name);
            }
            Err(e) => return Err(e.into()),
        }
        self.logs.remove(queue_name);

        debug!("Destroyed log files for queue {}", queue_name);
        Ok(())
    }

    pub fn files_exist(&self, queue_name: &str) -> bool {
        self.data_path(queue_name).is_file() && self.stat_path(queue_name).is_file()
    }

    pub fn read_stat(&self, queue_name: &str) -> Result<QueueStat> {
        let text = fs::read_to_string(self.stat_path(queue_name))?;
        let mut fields = text.trim().split('\t');
        let mut next = |what: &str| -> Result<u64> {
            fields
                .next()
                .and_then(|f| f.parse().ok())
                .ok_or_else(|| {
                    RelaymqError::Corruption(format!(
                        "unreadable {} in stat file of queue {}",
                        what, queue_name
                    ))
                })
        };
        Ok(QueueStat {
            total_count: next("total count")?,
            valid_count: next("valid count")?,
        })
    }

    fn write_stat(&self, queue_name: &str, stat: QueueStat) -> Result<()> {
        let line = format!("{}\t{}", stat.total_count, stat.valid_count);
        fs::write(self.stat_path(queue_name), line)?;
        Ok(())
    }

    /// Appends `message` to the queue log, filling in its offset range
    pub fn append(&self, queue_name: &str, message: &mut Message) -> Result<()> {
        if !self.files_exist(queue_name) {
            return Err(RelaymqError::QueueNotFound(queue_name.to_string()));
        }
        let log = self.log(queue_name);
        let mut log = log.lock();

        let record = MessageRecord::from_message(message).serialize()?;
        let mut file = OpenOptions::new()
            .append(true)
            .open(self.data_path(queue_name))?;
        let file_len = file.metadata()?.len();

        message.offset_beg = file_len + LENGTH_PREFIX_SIZE;
        message.offset_end = message.offset_beg + record.len() as u64;

        let mut framed = Vec::with_capacity(record.len() + LENGTH_PREFIX_SIZE as usize);
        framed.extend_from_slice(&(record.len() as u32).to_be_bytes());
        framed.extend_from_slice(&record);
        file.write_all(&framed)?;
        file.sync_data()?;

        let mut stat = self.read_stat(queue_name)?;
        stat.total_count += 1;
        stat.valid_count += 1;
        if let Err(e) = self.write_stat(queue_name, stat) {
            error!(
                "Queue {} log holds message {} but its stat file was not updated: {}",
                queue_name,
                message.id(),
                e
            );
            return Err(e);
        }

        log.locations.insert(
            message.id().to_string(),
            (message.offset_beg, message.offset_end),
        );
        Ok(())
    }

    /// Flips the validity flag of `message`'s record in place
    pub fn logical_delete(&self, queue_name: &str, message: &Message) -> Result<()> {
        let log = self.log(queue_name);
        let mut log = log.lock();

        let (beg, end) = log
            .locations
            .get(message.id())
            .copied()
            .unwrap_or((message.offset_beg, message.offset_end));
        if end <= beg {
            return Err(RelaymqError::Corruption(format!(
                "message {} has no recorded location in queue {}",
                message.id(),
                queue_name
            )));
        }

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(self.data_path(queue_name))?;
        let mut buf = vec![0u8; (end - beg) as usize];
        file.seek(SeekFrom::Start(beg))?;
        file.read_exact(&mut buf)?;

        let mut record = MessageRecord::deserialize(&buf)?;
        if record.message_id != message.id() {
            return Err(RelaymqError::Corruption(format!(
                "expected message {} at [{}, {}) in queue {}, found {}",
                message.id(),
                beg,
                end,
                queue_name,
                record.message_id
            )));
        }
        if !record.valid {
            warn!(
                "Message {} in queue {} was already invalidated",
                message.id(),
                queue_name
            );
            log.locations.remove(message.id());
            return Ok(());
        }

        record.valid = false;
        let rewritten = record.serialize()?;
        if rewritten.len() != buf.len() {
            return Err(RelaymqError::Corruption(format!(
                "record size changed from {} to {} bytes for message {}",
                buf.len(),
                rewritten.len(),
                message.id()
            )));
        }
        file.seek(SeekFrom::Start(beg))?;
        file.write_all(&rewritten)?;
        file.sync_data()?;

        let mut stat = self.read_stat(queue_name)?;
        stat.valid_count = stat.valid_count.saturating_sub(1);
        self.write_stat(queue_name, stat)?;

        log.locations.remove(message.id());
        Ok(())
    }

    /// Reads every valid message of the queue log in file order
    pub fn replay(&self, queue_name: &str) -> Result<Vec<Message>> {
        let log = self.log(queue_name);
        let mut log = log.lock();

        let messages = self.scan(queue_name)?;
        log.locations = messages
            .iter()
            .map(|m| (m.id().to_string(), (m.offset_beg, m.offset_end)))
            .collect();
        Ok(messages)
    }

    fn scan(&self, queue_name: &str) -> Result<Vec<Message>> {
        let data = fs::read(self.data_path(queue_name))?;
        let mut messages = Vec::new();
        let mut pos = 0usize;

        while pos < data.len() {
            if pos + LENGTH_PREFIX_SIZE as usize > data.len() {
                warn!(
                    "Truncated length prefix at byte {} of queue {} log, ignoring tail",
                    pos, queue_name
                );
                break;
            }
            let record_len =
                u32::from_be_bytes([data[pos], data[pos + 1], data[pos + 2], data[pos + 3]])
                    as usize;
            let beg = pos + LENGTH_PREFIX_SIZE as usize;
            let end = beg + record_len;
            if end > data.len() {
                warn!(
                    "Truncated record at byte {} of queue {} log, ignoring tail",
                    pos, queue_name
                );
                break;
            }

            let record = MessageRecord::deserialize(&data[beg..end])?;
            if record.valid {
                messages.push(record.into_message(beg as u64, end as u64));
            }
            pos = end;
        }

        Ok(messages)
    }

    pub fn should_compact(&self, queue_name: &str) -> Result<bool> {
        let stat = self.read_stat(queue_name)?;
        Ok(stat.total_count > self.policy.min_records
            && (stat.valid_count as f64 / stat.total_count as f64) < self.policy.valid_ratio)
    }

    /// Rewrites the queue log with only its valid records.
    ///
    /// The new log is written beside the old one, synced, then renamed over it.
    pub fn compact(&self, queue_name: &str) -> Result<()> {
        let log = self.log(queue_name);
        let mut log = log.lock();
        let start = Instant::now();

        let new_path = self.compact_path(queue_name);
        if new_path.exists() {
            warn!(
                "Removing leftover {} of queue {} from an interrupted compaction",
                COMPACT_FILE, queue_name
            );
            fs::remove_file(&new_path)?;
        }

        let old_size = fs::metadata(self.data_path(queue_name))?.len();
        let messages = self.scan(queue_name)?;

        let mut locations = HashMap::with_capacity(messages.len());
        let mut writer = BufWriter::new(File::create(&new_path)?);
        let mut pos = 0u64;
        for message in &messages {
            let record = MessageRecord::from_message(message).serialize()?;
            writer.write_all(&(record.len() as u32).to_be_bytes())?;
            writer.write_all(&record)?;
            let beg = pos + LENGTH_PREFIX_SIZE;
            let end = beg + record.len() as u64;
            locations.insert(message.id().to_string(), (beg, end));
            pos = end;
        }
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        drop(file);

        fs::rename(&new_path, self.data_path(queue_name))?;

        let valid = messages.len() as u64;
        self.write_stat(
            queue_name,
            QueueStat {
                total_count: valid,
                valid_count: valid,
            },
        )?;
        log.locations = locations;

        info!(
            "Compacted queue {} log: {} -> {} bytes, {} valid records, took {:?}",
            queue_name,
            old_size,
            pos,
            valid,
            start.elapsed()
        );
        Ok(())
    }

    /// Current size of the queue's data file in bytes
    pub fn data_size(&self, queue_name: &str) -> Result<u64> {
        Ok(fs::metadata(self.data_path(queue_name))?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PERSISTENT;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn persistent(key: &str, body: &str) -> Message {
        let mut props = crate::model::BasicProperties::default();
        props.delivery_mode = PERSISTENT;
        Message::new(key, Some(props), body.to_string())
    }

    fn store(dir: &Path) -> MessageStore {
        MessageStore::new(dir, CompactionPolicy::default()).unwrap()
    }

    #[test]
    fn test_record_invalidation_keeps_size() {
        let message = persistent("a.b", "payload");
        let mut record = MessageRecord::from_message(&message);
        let valid = record.serialize().unwrap();
        record.valid = false;
        let invalid = record.serialize().unwrap();

        assert_eq!(valid.len(), invalid.len());
        assert_eq!(valid.len(), record.serialized_size());
        assert!(!MessageRecord::deserialize(&invalid).unwrap().valid);
    }

    #[test]
    fn test_record_crc_mismatch_is_corruption() {
        let message = persistent("a", "payload");
        let mut bytes = MessageRecord::from_message(&message).serialize().unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(matches!(
            MessageRecord::deserialize(&bytes),
            Err(RelaymqError::Corruption(_))
        ));
    }

    #[test]
    fn test_create_and_stat() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        assert!(!store.files_exist("q"));

        store.create_queue_files("q").unwrap();
        assert!(store.files_exist("q"));
        assert_eq!(store.read_stat("q").unwrap(), QueueStat::default());

        let mut message = persistent("k", "hello");
        store.append("q", &mut message).unwrap();
        assert_eq!(message.offset_beg, 4);
        assert_eq!(
            fs::read_to_string(dir.path().join("q").join(STAT_FILE)).unwrap(),
            "1\t1"
        );

        store.destroy_queue_files("q").unwrap();
        assert!(!store.files_exist("q"));
        assert!(!dir.path().join("q").exists());
    }

    #[test]
    fn test_append_to_missing_queue() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        let mut message = persistent("k", "x");
        assert!(matches!(
            store.append("nope", &mut message),
            Err(RelaymqError::QueueNotFound(_))
        ));
    }

    #[test]
    fn test_append_delete_replay_preserves_order() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.create_queue_files("q").unwrap();

        let mut messages: Vec<Message> = (0..5)
            .map(|i| persistent("k", &format!("message {}", i)))
            .collect();
        for message in messages.iter_mut() {
            store.append("q", message).unwrap();
        }

        store.logical_delete("q", &messages[1]).unwrap();
        store.logical_delete("q", &messages[3]).unwrap();

        let replayed = store.replay("q").unwrap();
        let bodies: Vec<&[u8]> = replayed.iter().map(|m| &m.body[..]).collect();
        assert_eq!(
            bodies,
            vec![&b"message 0"[..], &b"message 2"[..], &b"message 4"[..]]
        );
        assert_eq!(replayed[0].offset_beg, messages[0].offset_beg);
        assert_eq!(replayed[2].offset_end, messages[4].offset_end);

        let stat = store.read_stat("q").unwrap();
        assert_eq!(stat.total_count, 5);
        assert_eq!(stat.valid_count, 3);
    }

    #[test]
    fn test_replay_survives_reopen_and_truncated_tail() {
        let dir = tempdir().unwrap();
        {
            let store = store(dir.path());
            store.create_queue_files("q").unwrap();
            for i in 0..3 {
                store
                    .append("q", &mut persistent("k", &format!("m{}", i)))
                    .unwrap();
            }
        }

        // Simulate a crash halfway through writing a record
        let data_path = dir.path().join("q").join(DATA_FILE);
        let mut file = OpenOptions::new().append(true).open(&data_path).unwrap();
        file.write_all(&100u32.to_be_bytes()).unwrap();
        file.write_all(b"partial").unwrap();
        drop(file);

        let store = store(dir.path());
        let replayed = store.replay("q").unwrap();
        assert_eq!(replayed.len(), 3);
        assert_eq!(&replayed[2].body[..], b"m2");

        // Locations learned by replay allow acknowledging a recovered message
        store.logical_delete("q", &replayed[0]).unwrap();
        assert_eq!(store.replay("q").unwrap().len(), 2);
    }

    #[test]
    fn test_compaction_threshold() {
        let dir = tempdir().unwrap();
        let store = MessageStore::new(
            dir.path(),
            CompactionPolicy {
                min_records: 4,
                valid_ratio: 0.5,
            },
        )
        .unwrap();
        store.create_queue_files("q").unwrap();

        let mut messages: Vec<Message> = (0..5).map(|_| persistent("k", "x")).collect();
        for message in messages.iter_mut() {
            store.append("q", message).unwrap();
        }
        assert!(!store.should_compact("q").unwrap());

        store.logical_delete("q", &messages[0]).unwrap();
        store.logical_delete("q", &messages[1]).unwrap();
        // 3 / 5 valid
        assert!(!store.should_compact("q").unwrap());
        store.logical_delete("q", &messages[2]).unwrap();
        assert!(store.should_compact("q").unwrap());
    }

    #[test]
    fn test_compaction_shrinks_log_and_keeps_order() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.create_queue_files("q").unwrap();

        let mut messages: Vec<Message> = (0..2100)
            .map(|i| persistent("k", &format!("message {}", i)))
            .collect();
        for message in messages.iter_mut() {
            store.append("q", message).unwrap();
        }
        for message in messages.iter().filter(|m| {
            let n: usize = std::str::from_utf8(&m.body[8..]).unwrap().parse().unwrap();
            n % 3 != 0
        }) {
            store.logical_delete("q", message).unwrap();
        }
        assert!(store.should_compact("q").unwrap());

        let expected: Vec<Bytes> = store.replay("q").unwrap().into_iter().map(|m| m.body).collect();
        let before = store.data_size("q").unwrap();

        store.compact("q").unwrap();

        assert!(store.data_size("q").unwrap() < before);
        let after: Vec<Message> = store.replay("q").unwrap();
        let bodies: Vec<Bytes> = after.iter().map(|m| m.body.clone()).collect();
        assert_eq!(bodies, expected);
        assert_eq!(
            store.read_stat("q").unwrap(),
            QueueStat {
                total_count: 700,
                valid_count: 700
            }
        );
        assert!(!store.should_compact("q").unwrap());

        // A message read before compaction still resolves to its moved record
        store.logical_delete("q", &messages[3]).unwrap();
        assert_eq!(store.replay("q").unwrap().len(), 699);
    }

    #[test]
    fn test_compaction_removes_stale_temp_file() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.create_queue_files("q").unwrap();
        store.append("q", &mut persistent("k", "keep")).unwrap();

        fs::write(dir.path().join("q").join(COMPACT_FILE), b"garbage").unwrap();
        store.compact("q").unwrap();

        assert!(!dir.path().join("q").join(COMPACT_FILE).exists());
        let replayed = store.replay("q").unwrap();
        assert_eq!(replayed.len(), 1);
        assert_eq!(&replayed[0].body[..], b"keep");
    }

    #[test]
    fn test_delete_with_wrong_location_is_corruption() {
        let dir = tempdir().unwrap();
        let store = store(dir.path());
        store.create_queue_files("q").unwrap();

        let mut first = persistent("k", "aaaa");
        let mut second = persistent("k", "bbbb");
        store.append("q", &mut first).unwrap();
        store.append("q", &mut second).unwrap();

        // A message this store never wrote, pointing at someone else's bytes
        let mut stranger = persistent("k", "cccc");
        stranger.offset_beg = first.offset_beg;
        stranger.offset_end = first.offset_end;
        assert!(matches!(
            store.logical_delete("q", &stranger),
            Err(RelaymqError::Corruption(_))
        ));
    }

    proptest! {
        #[test]
        fn prop_record_fields_survive_encoding(
            key in "[a-z.]{0,32}",
            body in proptest::collection::vec(any::<u8>(), 0..512),
            mode in 1u8..=2,
        ) {
            let mut props = crate::model::BasicProperties::default();
            props.delivery_mode = mode;
            let message = Message::new(key.clone(), Some(props), body.clone());
            let bytes = MessageRecord::from_message(&message).serialize().unwrap();
            let record = MessageRecord::deserialize(&bytes).unwrap();

            prop_assert_eq!(bytes.len(), record.serialized_size());
            prop_assert_eq!(&record.message_id, message.id());
            prop_assert_eq!(&record.routing_key, &key);
            prop_assert_eq!(record.delivery_mode, mode);
            prop_assert_eq!(&record.body[..], &body[..]);
        }
    }
}
