use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;

use memmap2::MmapMut;

use super::header::{FrameHeader, PageHeader, FRAME_HEADER_SIZE, PAGE_HEADER_SIZE, PAGE_VERSION};
use super::page_file_name;
use crate::frames::MsgType;

/// The sole writer for a run of journal pages. Resumes at the existing
/// write cursor on restart rather than truncating — frames whose memcpy
/// completed but whose cursor store did not survive a crash are lost,
/// which matches reality (they never had a sequel either).
pub struct JournalWriter {
    mmap: MmapMut,
    dir: PathBuf,
    prefix: String,
    seq: u64,
    page_size: u64,
    capacity: u32,
    cursor: u32,
    sync_on_rotate: bool,
}

impl JournalWriter {
    pub fn open(dir: impl AsRef<Path>, prefix: &str, page_size: u64) -> io::Result<Self> {
        Self::open_with_options(dir, prefix, page_size, true)
    }

    /// As [`Self::open`], but `sync_on_rotate` controls whether a page
    /// rotation forces `msync` before the next page is mapped (config
    /// `journal.sync_on_rotate`). Disabling it trades crash-durability of
    /// the last page for rotation latency.
    pub fn open_with_options(
        dir: impl AsRef<Path>,
        prefix: &str,
        page_size: u64,
        sync_on_rotate: bool,
    ) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let seq = find_latest_seq(&dir, prefix).unwrap_or(0);
        let (mmap, capacity, cursor) = open_page_rw(&dir, prefix, seq, page_size)?;
        Ok(Self {
            mmap,
            dir,
            prefix: prefix.to_string(),
            seq,
            page_size,
            capacity,
            cursor,
            sync_on_rotate,
        })
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    /// Appends one frame. Rotates to a fresh page first if it would not
    /// fit in the remainder of the current one.
    #[allow(clippy::too_many_arguments)]
    pub fn append(
        &mut self,
        msg_type: MsgType,
        gen_time_ns: u64,
        trigger_time_ns: u64,
        source: u32,
        dest: u32,
        payload: &[u8],
    ) -> io::Result<()> {
        let frame_len = FRAME_HEADER_SIZE + payload.len();
        if self.cursor as usize + frame_len > self.capacity as usize {
            self.rotate()?;
        }
        self.write_frame(msg_type as u32, gen_time_ns, trigger_time_ns, source, dest, payload);
        Ok(())
    }

    fn write_frame(
        &mut self,
        msg_type: u32,
        gen_time_ns: u64,
        trigger_time_ns: u64,
        source: u32,
        dest: u32,
        payload: &[u8],
    ) {
        let header = FrameHeader::new(
            payload.len() as u32,
            msg_type,
            gen_time_ns,
            trigger_time_ns,
            source,
            dest,
        );
        let offset = PAGE_HEADER_SIZE + self.cursor as usize;
        header.write_into(&mut self.mmap[offset..offset + FRAME_HEADER_SIZE]);
        let payload_off = offset + FRAME_HEADER_SIZE;
        self.mmap[payload_off..payload_off + payload.len()].copy_from_slice(payload);

        // The release store is the publication point: any reader that
        // observes the new cursor is guaranteed to see the bytes above.
        let new_cursor = self.cursor + FRAME_HEADER_SIZE as u32 + payload.len() as u32;
        self.cursor = new_cursor;
        unsafe {
            PageHeader::write_cursor(self.mmap.as_mut_ptr()).store(new_cursor, Ordering::Release);
        }
    }

    fn rotate(&mut self) -> io::Result<()> {
        let next_seq = self.seq + 1;
        let next_name = page_file_name(&self.prefix, next_seq);

        // Best-effort trailing marker so readers can follow transparently;
        // if even the marker doesn't fit, readers stall here until they
        // notice the next page exists on their own retry cadence.
        let marker_len = FRAME_HEADER_SIZE + next_name.len();
        if self.cursor as usize + marker_len <= self.capacity as usize {
            self.write_frame(MsgType::PageRoll as u32, 0, 0, 0, 0, next_name.as_bytes());
        }
        if self.sync_on_rotate {
            self.mmap.flush()?;
        }

        let (mmap, capacity, cursor) = open_page_rw(&self.dir, &self.prefix, next_seq, self.page_size)?;
        self.mmap = mmap;
        self.capacity = capacity;
        self.cursor = cursor;
        self.seq = next_seq;
        Ok(())
    }

    /// Forces `msync`. Called at rotation and on shutdown; frames are
    /// otherwise left to the kernel's own writeback schedule.
    pub fn sync(&self) -> io::Result<()> {
        self.mmap.flush()
    }
}

impl Drop for JournalWriter {
    fn drop(&mut self) {
        let _ = self.mmap.flush();
    }
}

fn open_page_rw(
    dir: &Path,
    prefix: &str,
    seq: u64,
    page_size: u64,
) -> io::Result<(MmapMut, u32, u32)> {
    let path = dir.join(page_file_name(prefix, seq));
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(&path)?;
    if file.metadata()?.len() < page_size {
        file.set_len(page_size)?;
    }
    let mut mmap = unsafe { MmapMut::map_mut(&file)? };
    advise_hugepage(&mmap);

    let base = mmap.as_mut_ptr();
    let version = unsafe { PageHeader::version(base) };
    let (capacity, cursor) = if version == PAGE_VERSION {
        let capacity = unsafe { PageHeader::capacity(base) };
        let cursor = unsafe { PageHeader::write_cursor(base).load(Ordering::Acquire) };
        (capacity, cursor)
    } else {
        let capacity = (page_size - PAGE_HEADER_SIZE as u64) as u32;
        unsafe {
            PageHeader::set_capacity(base, capacity);
            PageHeader::set_version(base, PAGE_VERSION);
            PageHeader::write_cursor(base).store(0, Ordering::Release);
            PageHeader::read_cursor(base).store(0, Ordering::Release);
        }
        (capacity, 0)
    };
    Ok((mmap, capacity, cursor))
}

#[cfg(target_os = "linux")]
fn advise_hugepage(mmap: &MmapMut) {
    unsafe {
        // Advisory only: EINVAL/ENOSYS on kernels without transparent
        // huge pages is expected and ignored.
        libc::madvise(
            mmap.as_ptr() as *mut libc::c_void,
            mmap.len(),
            libc::MADV_HUGEPAGE,
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn advise_hugepage(_mmap: &MmapMut) {}

fn find_latest_seq(dir: &Path, prefix: &str) -> Option<u64> {
    let want_prefix = format!("{prefix}.");
    fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().into_string().ok())
        .filter_map(|name| {
            let rest = name.strip_prefix(&want_prefix)?;
            let seq_str = rest.strip_suffix(".journal")?;
            seq_str.parse::<u64>().ok()
        })
        .max()
}
