//! Allocate new segments.
use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::path::Path;

use memmap2::MmapOptions;
use rand::Rng;

use crate::marker::{Marker, MARKER_SIZE};
use crate::segment::{HeapBlock, Memory};
use crate::{sys, Error, Namespace, Result, Segment};

/// Permission bits an owner needs on its own segment.
const OWNER_RW: u32 = 0o600;

impl Namespace {
    /// Create a new segment with at least `size` bytes of payload.
    ///
    /// A shared segment is published under a fresh random id with permissions `mode` and can be
    /// attached to by other processes until it is released. A private segment is not visible to
    /// other processes and ignores `mode`.
    ///
    /// Before allocating, stale segments of crashed processes are removed from the namespace.
    ///
    /// An id collision is reported as an error for which [`Error::is_collision`] holds; simply
    /// try again. A namespace directory that does not exist is an [`Error::Os`] failure, one the
    /// caller may not write to is [`Error::PermissionDenied`].
    pub fn create(&self, size: usize, shared: bool, mode: u32) -> Result<Segment> {
        if size == 0 || size > self.max_size() {
            return Err(Error::InvalidArgument);
        }

        if shared && (mode & !0o777 != 0 || mode & OWNER_RW != OWNER_RW) {
            return Err(Error::InvalidArgument);
        }

        let size = sys::page_align_up(size).ok_or(Error::InvalidArgument)?;

        // Housekeeping only, its outcome does not matter to us.
        let _ = self.cleanup();

        if shared {
            self.create_shared(size, mode)
        } else {
            create_private(size)
        }
    }

    fn create_shared(&self, size: usize, mode: u32) -> Result<Segment> {
        let total = size.checked_add(MARKER_SIZE).ok_or(Error::InvalidArgument)?;
        let id = random_id();
        let path = self.path_for(id);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(mode)
            .open(&path)
            .map_err(create_error)?;

        // From here on, a failure must not leave the object behind.
        let undo = UnlinkOnDrop { path: Some(path.as_path()) };
        let map = map_for_owner(&file, total)?;

        // Safety: the marker lies within the mapping, after the page aligned payload.
        let marker = unsafe { Marker::from_ptr(map.as_ptr().add(size)) };
        marker.publish(std::process::id());

        // The mapping keeps the object alive on its own.
        drop(file);
        undo.disarm();

        tracing::debug!(id, size, "created shared segment");
        Ok(Segment {
            id,
            size,
            shared: true,
            owns_deletion: true,
            memory: Memory::Shared { map, writable: true },
            path: Some(path),
        })
    }
}

/// Nothing is looked up by name when creating, a missing path is the namespace itself.
fn create_error(err: std::io::Error) -> Error {
    match err.raw_os_error() {
        Some(libc::ENOENT) => Error::Os(err),
        _ => Error::from_io(err),
    }
}

fn map_for_owner(file: &File, total: usize) -> Result<memmap2::MmapRaw> {
    let len = u64::try_from(total).map_err(|_| Error::InvalidArgument)?;
    file.set_len(len).map_err(Error::from_io)?;
    MmapOptions::new()
        .len(total)
        .map_raw(file)
        .map_err(Error::from_io)
}

fn create_private(size: usize) -> Result<Segment> {
    let memory = match MmapOptions::new().len(size).map_anon() {
        Ok(map) => Memory::Anonymous(map),
        Err(err) => {
            tracing::debug!(%err, "anonymous mapping unavailable, using the heap");
            Memory::Heap(HeapBlock::zeroed(size)?)
        }
    };

    tracing::debug!(size, "created private segment");
    Ok(Segment {
        id: 0,
        size,
        shared: false,
        owns_deletion: true,
        memory,
        path: None,
    })
}

fn random_id() -> u32 {
    rand::thread_rng().gen_range(1..=u32::MAX)
}

/// Removes a half-constructed backing object unless disarmed.
struct UnlinkOnDrop<'lt> {
    path: Option<&'lt Path>,
}

impl UnlinkOnDrop<'_> {
    fn disarm(mut self) {
        self.path = None;
    }
}

impl Drop for UnlinkOnDrop<'_> {
    fn drop(&mut self) {
        if let Some(path) = self.path {
            let _ = sys::unlink(path);
        }
    }
}
