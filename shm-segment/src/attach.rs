//! Map segments created by another process.
use std::fs::OpenOptions;
use std::io;
use std::os::unix::fs::OpenOptionsExt;

use memmap2::MmapOptions;

use crate::marker::MARKER_SIZE;
use crate::segment::Memory;
use crate::{sys, Error, Namespace, Result, Segment};

impl Namespace {
    /// Map the shared segment `id`, read-only unless `writable`.
    ///
    /// The returned view never deletes the segment, it only unmaps itself on release. The backing
    /// object is validated to have the shape of a segment before mapping it, other files that
    /// happen to share the naming convention are reported as [`Error::Corrupt`].
    pub fn attach(&self, id: u32, writable: bool) -> Result<Segment> {
        // No segment is ever created with id zero.
        if id == 0 {
            return Err(Error::NotFound);
        }

        let path = self.path_for(id);
        // Never block on a fifo and never follow a link planted under a segment name.
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .custom_flags(libc::O_NONBLOCK | libc::O_NOFOLLOW | libc::O_CLOEXEC)
            .open(&path)
            .map_err(open_error)?;

        let meta = file.metadata().map_err(Error::from_io)?;
        if !meta.is_file() {
            return Err(Error::Corrupt);
        }

        let total = usize::try_from(meta.len()).map_err(|_| Error::Corrupt)?;
        let size = self.payload_of(total).ok_or(Error::Corrupt)?;

        let mut options = MmapOptions::new();
        options.len(total);
        let map = if writable {
            options.map_raw(&file)
        } else {
            options.map_raw_read_only(&file)
        }
        .map_err(Error::from_io)?;

        tracing::debug!(id, size, writable, "attached to segment");
        Ok(Segment {
            id,
            size,
            shared: true,
            owns_deletion: false,
            memory: Memory::Shared { map, writable },
            path: Some(path),
        })
    }

    /// The payload length of a backing object of `total` bytes, if it is a valid length at all.
    pub(crate) fn payload_of(&self, total: usize) -> Option<usize> {
        let size = total.checked_sub(MARKER_SIZE).filter(|&size| size > 0)?;

        if size > self.max_payload() || !sys::is_page_aligned(size) {
            return None;
        }

        Some(size)
    }
}

/// Symbolic links and fifos without a peer are foreign objects, not missing ones.
fn open_error(err: io::Error) -> Error {
    match err.raw_os_error() {
        Some(libc::ELOOP | libc::ENXIO) => Error::Corrupt,
        _ => Error::from_io(err),
    }
}
