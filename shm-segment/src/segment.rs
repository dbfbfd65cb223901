use std::alloc::{self, Layout};
use std::path::PathBuf;
use std::ptr::NonNull;

use memmap2::{MmapMut, MmapRaw};

use crate::{sys, Error, Result};

/// A mapped segment of memory, optionally shared with other processes under an id.
///
/// The value returned by [`create`](crate::Namespace::create) is the owner: releasing it also
/// deletes the backing object of a shared segment. Values returned by
/// [`attach`](crate::Namespace::attach) only ever unmap their own view.
///
/// Dropping a segment releases it as well; use [`Segment::release`] to observe errors.
pub struct Segment {
    pub(crate) id: u32,
    /// The caller-visible payload, a multiple of the page size.
    pub(crate) size: usize,
    pub(crate) shared: bool,
    pub(crate) owns_deletion: bool,
    pub(crate) memory: Memory,
    /// The backing object of a shared segment, taken on release.
    pub(crate) path: Option<PathBuf>,
}

pub(crate) enum Memory {
    /// A named object, mapped with its trailing marker.
    Shared { map: MmapRaw, writable: bool },
    Anonymous(MmapMut),
    /// Used when anonymous mappings are not available.
    Heap(HeapBlock),
    Released,
}

/// A zeroed, page aligned heap allocation.
pub(crate) struct HeapBlock {
    ptr: NonNull<u8>,
    layout: Layout,
}

// Safety: the block is uniquely owned, as a `Box<[u8]>` would be.
unsafe impl Send for HeapBlock {}
unsafe impl Sync for HeapBlock {}

impl HeapBlock {
    pub(crate) fn zeroed(size: usize) -> Result<Self> {
        let layout =
            Layout::from_size_align(size, sys::page_size()).map_err(|_| Error::InvalidArgument)?;
        // Safety: size is nonzero, checked by all callers.
        let ptr = unsafe { alloc::alloc_zeroed(layout) };
        let ptr = NonNull::new(ptr).ok_or(Error::Exhausted)?;
        Ok(HeapBlock { ptr, layout })
    }
}

impl Drop for HeapBlock {
    fn drop(&mut self) {
        unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

impl Memory {
    fn as_ptr(&self) -> *const u8 {
        match self {
            Memory::Shared { map, .. } => map.as_ptr(),
            Memory::Anonymous(map) => map.as_ptr(),
            Memory::Heap(block) => block.ptr.as_ptr(),
            Memory::Released => core::ptr::null(),
        }
    }

    fn as_mut_ptr(&mut self) -> Option<*mut u8> {
        match self {
            Memory::Shared { map, writable: true } => Some(map.as_mut_ptr()),
            Memory::Shared { writable: false, .. } => None,
            Memory::Anonymous(map) => Some(map.as_mut_ptr()),
            Memory::Heap(block) => Some(block.ptr.as_ptr()),
            Memory::Released => None,
        }
    }

    fn is_writable(&self) -> bool {
        match self {
            Memory::Shared { writable, .. } => *writable,
            Memory::Anonymous(_) | Memory::Heap(_) => true,
            Memory::Released => false,
        }
    }

    /// The start of a mapping the OS may drop pages from.
    ///
    /// Heap memory is not a mapping of its own, the allocator may share its pages.
    pub(crate) fn advisable_base(&self) -> Option<*mut u8> {
        match self {
            Memory::Shared { map, .. } => Some(map.as_mut_ptr()),
            Memory::Anonymous(map) => Some(map.as_ptr() as *mut u8),
            Memory::Heap(_) | Memory::Released => None,
        }
    }
}

impl Segment {
    /// The id under which other processes attach, `0` for private segments.
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Payload length in bytes, always a multiple of the page size.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    /// Whether releasing this value deletes the backing object.
    pub fn owns_deletion(&self) -> bool {
        self.owns_deletion
    }

    pub fn is_writable(&self) -> bool {
        self.memory.is_writable()
    }

    /// Start of the payload.
    ///
    /// The memory may be modified by other processes at any time. Coordinating access to the
    /// payload is up to the users of the segment.
    pub fn as_ptr(&self) -> *const u8 {
        self.memory.as_ptr()
    }

    /// Start of the payload, if the segment is mapped writable.
    pub fn as_mut_ptr(&mut self) -> Option<*mut u8> {
        self.memory.as_mut_ptr()
    }

    /// Copy payload bytes starting at `offset` into `buf`.
    pub fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.check_range(offset, buf.len())?;
        // Safety: in bounds of the live mapping, checked above.
        unsafe {
            core::ptr::copy_nonoverlapping(self.as_ptr().add(offset), buf.as_mut_ptr(), buf.len())
        };
        Ok(())
    }

    /// Copy `data` into the payload starting at `offset`.
    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.check_range(offset, data.len())?;
        let ptr = self.as_mut_ptr().ok_or(Error::PermissionDenied)?;
        // Safety: in bounds of the live, writable mapping.
        unsafe { core::ptr::copy_nonoverlapping(data.as_ptr(), ptr.add(offset), data.len()) };
        Ok(())
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(Error::InvalidArgument),
        }
    }

    /// Unmap the segment, and delete its backing object if this value owns it.
    ///
    /// A backing object that is already gone, for example removed by a cleanup in another
    /// process, is not an error.
    pub fn release(mut self) -> Result<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> Result<()> {
        // Unmap first, the object must not be deleted under our own view.
        drop(core::mem::replace(&mut self.memory, Memory::Released));

        let Some(path) = self.path.take() else {
            return Ok(());
        };

        if !(self.shared && self.owns_deletion) {
            tracing::debug!(id = self.id, "detached from segment");
            return Ok(());
        }

        match sys::unlink(&path) {
            Ok(true) => tracing::debug!(id = self.id, "released and unlinked segment"),
            Ok(false) => tracing::debug!(id = self.id, "segment was already unlinked"),
            Err(err) => return Err(Error::from_io(err)),
        }

        Ok(())
    }
}

impl Drop for Segment {
    fn drop(&mut self) {
        if let Err(err) = self.release_inner() {
            tracing::warn!(id = self.id, %err, "failed to release segment");
        }
    }
}

impl core::fmt::Debug for Segment {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("shared", &self.shared)
            .field("owns_deletion", &self.owns_deletion)
            .field("writable", &self.is_writable())
            .finish()
    }
}
