//! Thread-level CPU pinning and realtime scheduling shared by every
//! pinned worker (C5/C6/C7/C9). Pinning is advisory per `enable_cpu_pinning`;
//! `SCHED_FIFO` is only requested on top of a successful pin, and only
//! when realtime mode is on — never on its own.

use tracing::{info, warn};

pub const REALTIME_PRIORITY: i32 = 50;

#[cfg(target_os = "linux")]
pub fn apply(core: Option<usize>, realtime: bool, label: &str) {
    let Some(core) = core else { return };

    let Some(core_ids) = core_affinity::get_core_ids() else {
        warn!(worker = label, "could not enumerate core ids, pinning skipped");
        return;
    };
    let Some(id) = core_ids.get(core) else {
        warn!(worker = label, core, "requested core out of range, pinning skipped");
        return;
    };
    core_affinity::set_for_current(*id);
    info!(worker = label, core, "pinned worker thread");

    if realtime {
        let param = libc::sched_param {
            sched_priority: REALTIME_PRIORITY,
        };
        let ret = unsafe { libc::sched_setscheduler(0, libc::SCHED_FIFO, &param) };
        if ret != 0 {
            warn!(worker = label, error = %std::io::Error::last_os_error(), "failed to set SCHED_FIFO priority");
        } else {
            info!(worker = label, priority = REALTIME_PRIORITY, "requested SCHED_FIFO");
        }
    }
}

#[cfg(not(target_os = "linux"))]
pub fn apply(_core: Option<usize>, _realtime: bool, _label: &str) {}
