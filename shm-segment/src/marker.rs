//! The tail record naming the process that created a shared segment.
//!
//! The marker occupies the last [`MARKER_SIZE`] bytes of the backing object, directly after the
//! page aligned payload. Its layout does not depend on the platform word size:
//!
//! | bytes     | content                 |
//! |-----------|-------------------------|
//! | `[0, 4)`  | [`MARKER_MAGIC`]        |
//! | `[4, 8)`  | pid of the creator      |
//! | `[8, 32)` | zero                    |
//!
//! A creator stores the pid before the magic, an observer loads the magic before the pid. Any
//! observer which sees the magic hence also sees the pid of the creator, and a segment whose
//! marker is not yet published looks exactly like one that is not ours at all.
use core::sync::atomic::{AtomicU32, Ordering};

/// Identifies a published marker.
pub const MARKER_MAGIC: u32 = 0xbeef_cafe;

/// Bytes reserved for the marker at the end of each shared segment.
pub const MARKER_SIZE: usize = 32;

/// Do not change without checking `MARKER_SIZE` and the offset table above.
#[repr(C)]
pub(crate) struct Marker {
    magic: AtomicU32,
    owner_pid: AtomicU32,
    _reserved: [AtomicU32; 6],
}

const _: () = assert!(core::mem::size_of::<Marker>() == MARKER_SIZE);

impl Marker {
    /// View the marker at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be 4-byte aligned and valid for reads of `MARKER_SIZE` bytes for all of `'lt`.
    /// The marker is only ever accessed atomically so other processes may modify it
    /// concurrently. Calling `publish` additionally requires the memory to be writable.
    pub(crate) unsafe fn from_ptr<'lt>(ptr: *const u8) -> &'lt Marker {
        debug_assert_eq!(ptr as usize % core::mem::align_of::<Marker>(), 0);
        &*(ptr as *const Marker)
    }

    /// Claim the segment for `pid`. The magic is stored last.
    pub(crate) fn publish(&self, pid: u32) {
        self.owner_pid.store(pid, Ordering::Relaxed);
        self.magic.store(MARKER_MAGIC, Ordering::Release);
    }

    /// The pid of the creator, if the marker has been published.
    ///
    /// A zero pid never names a process and is treated like a missing marker.
    pub(crate) fn observe(&self) -> Option<u32> {
        if self.magic.load(Ordering::Acquire) != MARKER_MAGIC {
            return None;
        }

        Some(self.owner_pid.load(Ordering::Relaxed)).filter(|&pid| pid != 0)
    }
}
