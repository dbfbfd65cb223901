//! Interact with the process table, `madvise` and related calls.
use core::ffi::c_int;
use std::io;
use std::path::Path;
use std::sync::OnceLock;

/// Outcome of probing whether a process exists.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Liveness {
    Alive,
    /// The process table has no such entry.
    Dead,
    /// We could not tell, for example because the process belongs to another user.
    Indeterminate,
}

/// The physical-page drop hint the OS accepted in a punch.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PunchHint {
    /// Pages and their backing store are freed right away (`MADV_REMOVE`).
    Remove,
    /// Pages are reclaimed lazily under memory pressure (`MADV_FREE`).
    Free,
    /// This process drops its pages (`MADV_DONTNEED`).
    DontNeed,
}

pub fn page_size() -> usize {
    static PAGE_SIZE: OnceLock<usize> = OnceLock::new();

    *PAGE_SIZE.get_or_init(|| {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        usize::try_from(size).ok().filter(|&s| s > 0).unwrap_or(4096)
    })
}

/// Round up to the next multiple of the page size, `None` on overflow.
pub(crate) fn page_align_up(n: usize) -> Option<usize> {
    let mask = page_size() - 1;
    n.checked_add(mask).map(|v| v & !mask)
}

pub(crate) fn page_align_down(n: usize) -> usize {
    n & !(page_size() - 1)
}

pub(crate) fn is_page_aligned(n: usize) -> bool {
    n & (page_size() - 1) == 0
}

/// Non-destructively check whether a process with this id exists.
///
/// Only the existence of the pid is checked. A pid recycled by the OS for an unrelated process
/// is reported as alive.
pub fn probe_pid(pid: u32) -> Liveness {
    // Zero and negative values address process groups, never probe those.
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return Liveness::Indeterminate;
    };

    if pid <= 0 {
        return Liveness::Indeterminate;
    }

    if 0 == unsafe { libc::kill(pid, 0) } {
        return Liveness::Alive;
    }

    match io::Error::last_os_error().raw_os_error() {
        Some(libc::ESRCH) => Liveness::Dead,
        _ => Liveness::Indeterminate,
    }
}

/// Remove a backing object by path.
///
/// Returns `Ok(false)` if it was already gone, which callers treat as success.
pub(crate) fn unlink(path: &Path) -> io::Result<bool> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Ask the OS to drop the physical pages of a range, strongest hint first.
///
/// # Safety
///
/// `ptr..ptr+len` must be page aligned and lie within a single live mapping owned by the caller.
/// The contents of the range are unspecified afterwards.
pub(crate) unsafe fn drop_pages(ptr: *mut u8, len: usize) -> Option<PunchHint> {
    unsafe fn advise(ptr: *mut u8, len: usize, advice: c_int) -> bool {
        0 == libc::madvise(ptr.cast(), len, advice)
    }

    #[cfg(any(target_os = "linux", target_os = "android"))]
    if advise(ptr, len, libc::MADV_REMOVE) {
        return Some(PunchHint::Remove);
    }

    #[cfg(any(
        target_os = "linux",
        target_os = "android",
        target_os = "freebsd",
        target_os = "macos",
        target_os = "ios",
    ))]
    if advise(ptr, len, libc::MADV_FREE) {
        return Some(PunchHint::Free);
    }

    if advise(ptr, len, libc::MADV_DONTNEED) {
        return Some(PunchHint::DontNeed);
    }

    None
}
