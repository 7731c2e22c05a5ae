//! C4 — memory-mapped, cursor-based, one-writer/many-readers event log.
//!
//! Every frame published on the ring is also appended here so the UI
//! gateway and a restarted OEMS can reconstruct state without touching the
//! hot bus. The file is a fixed-size page: a 64-byte header holding the
//! write cursor, followed by a flat run of `FrameHeader + payload` tuples.
//! Grounded on the append-then-publish mmap WAL pattern (header cast over
//! raw mmap bytes, release-store cursor as the single publication point),
//! generalized here to multiple page rotation and a page-follow reader.

mod header;
mod reader;
mod writer;

pub use header::{FrameHeader, PageHeader, FRAME_HEADER_SIZE, PAGE_HEADER_SIZE};
pub use reader::JournalReader;
pub use writer::JournalWriter;

use crate::frames::MsgType;

pub const DEFAULT_PAGE_SIZE: u64 = 128 * 1024 * 1024;

/// Payload carried by a `PAGE_ROLL` frame: the file name of the next page,
/// NUL-padded. 4 KiB path budget is generous for any real deployment.
pub const PAGE_ROLL_NAME_MAX: usize = 256;

pub fn page_file_name(prefix: &str, seq: u64) -> String {
    format!("{prefix}.{seq}.journal")
}

/// One decoded record handed back by [`JournalReader::poll`].
#[derive(Debug)]
pub struct JournalRecord {
    pub msg_type: MsgType,
    pub gen_time_ns: u64,
    pub trigger_time_ns: u64,
    pub source: u32,
    pub dest: u32,
    pub payload: Vec<u8>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn writer_then_reader_sees_frames_in_order() {
        let dir = tempdir().unwrap();
        let mut writer =
            JournalWriter::open(dir.path(), "test", 1024 * 1024).expect("open writer");
        writer
            .append(MsgType::Ticker, 1, 1, 0, 0, b"hello")
            .unwrap();
        writer
            .append(MsgType::Trade, 2, 2, 0, 0, b"world")
            .unwrap();

        let mut reader = JournalReader::open(dir.path(), "test", 0).expect("open reader");
        let recs = reader.poll(10);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].msg_type, MsgType::Ticker);
        assert_eq!(recs[0].payload, b"hello");
        assert_eq!(recs[1].msg_type, MsgType::Trade);
        assert_eq!(recs[1].payload, b"world");
    }

    #[test]
    fn reader_resumes_from_local_cursor_across_polls() {
        let dir = tempdir().unwrap();
        let mut writer =
            JournalWriter::open(dir.path(), "resume", 1024 * 1024).expect("open writer");
        writer.append(MsgType::Ticker, 1, 1, 0, 0, b"a").unwrap();

        let mut reader = JournalReader::open(dir.path(), "resume", 0).expect("open reader");
        let first = reader.poll(10);
        assert_eq!(first.len(), 1);
        assert!(reader.poll(10).is_empty());

        writer.append(MsgType::Ticker, 2, 2, 0, 0, b"b").unwrap();
        let second = reader.poll(10);
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].payload, b"b");
    }

    #[test]
    fn writer_reopen_resumes_at_prior_cursor() {
        let dir = tempdir().unwrap();
        {
            let mut writer =
                JournalWriter::open(dir.path(), "crash", 1024 * 1024).expect("open writer");
            writer.append(MsgType::Ticker, 1, 1, 0, 0, b"first").unwrap();
        }
        {
            let mut writer =
                JournalWriter::open(dir.path(), "crash", 1024 * 1024).expect("reopen writer");
            writer.append(MsgType::Ticker, 2, 2, 0, 0, b"second").unwrap();
        }

        let mut reader = JournalReader::open(dir.path(), "crash", 0).expect("open reader");
        let recs = reader.poll(10);
        assert_eq!(recs.len(), 2);
        assert_eq!(recs[0].payload, b"first");
        assert_eq!(recs[1].payload, b"second");
    }

    #[test]
    fn rotation_crosses_pages_transparently() {
        let dir = tempdir().unwrap();
        // Small page: header (64) + a handful of small frames before roll.
        let page_size = PAGE_HEADER_SIZE as u64 + (FRAME_HEADER_SIZE as u64 + 8) * 2;
        let mut writer =
            JournalWriter::open(dir.path(), "roll", page_size).expect("open writer");

        let mut reader = JournalReader::open(dir.path(), "roll", 0).expect("open reader");

        for i in 0..5u64 {
            writer
                .append(MsgType::Ticker, i, i, 0, 0, &i.to_le_bytes())
                .unwrap();
        }

        let recs = reader.poll(100);
        assert_eq!(recs.len(), 5);
        for (i, rec) in recs.iter().enumerate() {
            assert_eq!(rec.payload, (i as u64).to_le_bytes());
        }
    }
}
