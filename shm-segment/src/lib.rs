//! Shared memory segments for exchanging large buffers between processes without copies.
//!
//! A segment is created by one process, optionally under a random id in a shared namespace, and
//! attached to by id from others. Every shared segment carries a small marker after its payload
//! recording the process that created it. When that process dies without releasing the segment,
//! any later [`cleanup`] removes the leftover object. This works without any coordinating
//! process: exclusive creation, unlinking and probing the process table are all the
//! synchronization there is.
//!
//! ```no_run
//! let mut owner = shm_segment::create(4096, true, 0o600)?;
//! owner.write_at(0, b"samples")?;
//!
//! // Typically in another process, after learning the id.
//! let view = shm_segment::attach(owner.id(), false)?;
//! let mut buf = [0; 7];
//! view.read_at(0, &mut buf)?;
//! assert_eq!(&buf, b"samples");
//! # Ok::<(), shm_segment::Error>(())
//! ```
//!
//! ## Not a lock, not an allocator
//!
//! The contents of the payload are never interpreted here. Who writes which part of a segment
//! and when is for the users of the segment to agree on.
//!
//! ## Recycled process ids
//!
//! The creator is identified only by its pid. If the OS hands the pid of a crashed creator to a
//! new process before a cleanup ran, the segment is considered alive and is kept until that
//! process exits as well.
mod attach;
mod create;
mod error;
mod marker;
mod namespace;
mod punch;
mod reap;
mod segment;
mod sys;

pub use error::{Error, Result};
pub use marker::{MARKER_MAGIC, MARKER_SIZE};
pub use namespace::{Namespace, DEFAULT_PREFIX, MAX_SEGMENT_SIZE};
pub use reap::SegmentInfo;
pub use segment::Segment;
pub use sys::{page_size, probe_pid, Liveness, PunchHint};

/// Create a segment in the system namespace, see [`Namespace::create`].
pub fn create(size: usize, shared: bool, mode: u32) -> Result<Segment> {
    Namespace::default().create(size, shared, mode)
}

/// Attach to a segment of the system namespace, see [`Namespace::attach`].
pub fn attach(id: u32, writable: bool) -> Result<Segment> {
    Namespace::default().attach(id, writable)
}

/// Unmap a segment and delete it if owned, see [`Segment::release`].
pub fn release(segment: Segment) -> Result<()> {
    segment.release()
}

/// Drop the physical pages of a payload range, see [`Segment::punch`].
pub fn punch(segment: &Segment, offset: usize, len: usize) {
    let _ = segment.punch(offset, len);
}

/// Remove orphaned segments of the system namespace, see [`Namespace::cleanup`].
pub fn cleanup() -> usize {
    Namespace::default().cleanup()
}
