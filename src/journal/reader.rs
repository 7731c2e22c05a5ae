use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use memmap2::Mmap;

use super::header::{FrameHeader, PageHeader, FRAME_HEADER_SIZE, PAGE_HEADER_SIZE};
use super::page_file_name;
use super::JournalRecord;
use crate::frames::MsgType;

/// A page-following read cursor into a journal run. Entirely independent
/// of the writer and of any other reader: each holds its own mapping and
/// its own `cursor`, mapped read-only so a crash in this process can never
/// corrupt the page.
pub struct JournalReader {
    mmap: Mmap,
    dir: PathBuf,
    prefix: String,
    seq: u64,
    capacity: u32,
    cursor: u32,
}

impl JournalReader {
    pub fn open(dir: impl AsRef<Path>, prefix: &str, start_seq: u64) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let (mmap, capacity) = open_page_ro(&dir, prefix, start_seq)?;
        Ok(Self {
            mmap,
            dir,
            prefix: prefix.to_string(),
            seq: start_seq,
            capacity,
            cursor: 0,
        })
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Drains up to `max` frames, transparently following `PAGE_ROLL`
    /// markers across page boundaries. Unknown `msg_type`s are skipped
    /// using the frame's `length` rather than rejected, so new frame
    /// types can be added without breaking older readers.
    pub fn poll(&mut self, max: usize) -> Vec<JournalRecord> {
        let mut out = Vec::with_capacity(max.min(64));
        while out.len() < max {
            let write_cursor = unsafe {
                PageHeader::write_cursor(self.mmap.as_ptr() as *mut u8).load(Ordering::Acquire)
            };
            if self.cursor >= write_cursor {
                // A page whose cursor has reached capacity can never
                // receive another frame (the writer always rotates
                // first) — try the next page even if no `PAGE_ROLL`
                // marker made it in before the old page filled up.
                if write_cursor >= self.capacity && self.follow_roll(&[]) {
                    continue;
                }
                break;
            }

            let offset = PAGE_HEADER_SIZE + self.cursor as usize;
            let header = FrameHeader::read_from(&self.mmap[offset..offset + FRAME_HEADER_SIZE]);
            let payload_off = offset + FRAME_HEADER_SIZE;
            let payload = self.mmap[payload_off..payload_off + header.length as usize].to_vec();
            self.cursor += FRAME_HEADER_SIZE as u32 + header.length;

            match MsgType::from_u32(header.msg_type) {
                Some(MsgType::PageRoll) => {
                    if !self.follow_roll(&payload) {
                        break;
                    }
                }
                Some(kind) => out.push(JournalRecord {
                    msg_type: kind,
                    gen_time_ns: header.gen_time_ns,
                    trigger_time_ns: header.trigger_time_ns,
                    source: header.source,
                    dest: header.dest,
                    payload,
                }),
                None => {}
            }
        }
        out
    }

    fn follow_roll(&mut self, _payload: &[u8]) -> bool {
        let next_seq = self.seq + 1;
        match open_page_ro(&self.dir, &self.prefix, next_seq) {
            Ok((mmap, capacity)) => {
                self.mmap = mmap;
                self.capacity = capacity;
                self.seq = next_seq;
                self.cursor = 0;
                true
            }
            // Next page not written yet; caller retries on its own cadence.
            Err(_) => false,
        }
    }
}

fn open_page_ro(dir: &Path, prefix: &str, seq: u64) -> io::Result<(Mmap, u32)> {
    let path = dir.join(page_file_name(prefix, seq));
    let file = File::open(path)?;
    let mmap = unsafe { Mmap::map(&file)? };
    let capacity = unsafe { PageHeader::capacity(mmap.as_ptr()) };
    Ok((mmap, capacity))
}
