//! Where backing objects live and how they are named.
use std::ffi::OsStr;
use std::path::{Path, PathBuf};

use crate::sys;

/// Prefix of the backing object names.
pub const DEFAULT_PREFIX: &str = "pulse-shm-";

/// Policy cap on the payload of a single segment.
pub const MAX_SEGMENT_SIZE: usize = 1 << 30;

/// Width of the hexadecimal id suffix of every name.
const ID_DIGITS: usize = 8;

/// A directory of shared memory objects and the naming convention used inside it.
///
/// The directory is the only state. Nothing about the segments in it is cached, every operation
/// goes back to the file system.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Namespace {
    dir: PathBuf,
    prefix: String,
    max_size: usize,
}

impl Namespace {
    /// A namespace rooted at `dir`, with the default prefix and size cap.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Namespace {
            dir: dir.into(),
            prefix: DEFAULT_PREFIX.to_owned(),
            max_size: MAX_SEGMENT_SIZE,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    /// The largest payload an attacher accepts, the cap rounded up to whole pages.
    pub(crate) fn max_payload(&self) -> usize {
        sys::page_align_up(self.max_size).unwrap_or_else(|| sys::page_align_down(usize::MAX))
    }

    /// The file name of the object for `id`.
    pub fn name_for(&self, id: u32) -> String {
        format!("{}{:0width$x}", self.prefix, id, width = ID_DIGITS)
    }

    pub fn path_for(&self, id: u32) -> PathBuf {
        self.dir.join(self.name_for(id))
    }

    /// Recover the id from a file name, `None` for names that do not follow the convention.
    pub fn parse_name(&self, name: &OsStr) -> Option<u32> {
        let digits = name.to_str()?.strip_prefix(self.prefix.as_str())?;

        let lower_hex = |b: u8| matches!(b, b'0'..=b'9' | b'a'..=b'f');
        if digits.len() != ID_DIGITS || !digits.bytes().all(lower_hex) {
            return None;
        }

        u32::from_str_radix(digits, 16).ok().filter(|&id| id != 0)
    }
}

impl Default for Namespace {
    /// The system shared memory directory.
    ///
    /// - Linux: `/dev/shm`, the directory backing `shm_open`.
    /// - Elsewhere: the temporary directory of the user.
    fn default() -> Self {
        #[cfg(any(target_os = "linux", target_os = "android"))]
        {
            Namespace::new("/dev/shm")
        }

        #[cfg(not(any(target_os = "linux", target_os = "android")))]
        {
            Namespace::new(std::env::temp_dir())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_ids() {
        let ns = Namespace::new("/nonexistent");

        assert_eq!(ns.name_for(0xabc), "pulse-shm-00000abc");
        assert_eq!(ns.parse_name(OsStr::new("pulse-shm-00000abc")), Some(0xabc));
        assert_eq!(ns.parse_name(OsStr::new(&ns.name_for(u32::MAX))), Some(u32::MAX));
        assert_eq!(ns.path_for(1), Path::new("/nonexistent/pulse-shm-00000001"));
    }

    #[test]
    fn foreign_names_are_rejected() {
        let ns = Namespace::new("/nonexistent");

        for name in [
            "pulse-shm-",
            "pulse-shm-00000000",
            "pulse-shm-0000abc",
            "pulse-shm-000000abc",
            "pulse-shm-0000ABCD",
            "pulse-shm-+000abcd",
            "pulse-shm-0000abcd.lock",
            "other-shm-0000abcd",
            "sem.pulse-shm-0000abcd",
        ] {
            assert_eq!(ns.parse_name(OsStr::new(name)), None, "{name}");
        }
    }

    #[test]
    fn custom_prefix() {
        let ns = Namespace::new("/nonexistent").with_prefix("mixer-");

        assert_eq!(ns.name_for(7), "mixer-00000007");
        assert_eq!(ns.parse_name(OsStr::new("mixer-00000007")), Some(7));
        assert_eq!(ns.parse_name(OsStr::new("pulse-shm-00000007")), None);
    }

    #[test]
    fn max_payload_is_page_aligned() {
        let page = sys::page_size();
        let ns = Namespace::new("/nonexistent").with_max_size(page + 1);
        assert_eq!(ns.max_payload(), 2 * page);

        let ns = Namespace::new("/nonexistent").with_max_size(usize::MAX);
        assert!(sys::is_page_aligned(ns.max_payload()));
    }
}
