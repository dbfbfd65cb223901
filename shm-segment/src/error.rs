use std::io;

/// An error returned when creating, attaching or releasing a segment.
///
/// None of these are fatal to the process. In particular a colliding `create` surfaces as
/// [`Error::Os`] with kind [`io::ErrorKind::AlreadyExists`] and the caller is expected to simply
/// try again, which draws a new id.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A size, offset or mode that can never be valid.
    #[error("invalid argument")]
    InvalidArgument,
    #[error("permission denied")]
    PermissionDenied,
    /// The segment to attach to does not exist (anymore).
    #[error("no such segment")]
    NotFound,
    /// The backing object exists but does not have the shape of a segment.
    #[error("backing object is not a valid segment")]
    Corrupt,
    /// Out of memory, descriptors or space in the shared memory file system.
    #[error("shared memory resources exhausted")]
    Exhausted,
    #[error("shared memory operation failed: {0}")]
    Os(#[source] io::Error),
}

pub type Result<T, E = Error> = core::result::Result<T, E>;

impl Error {
    /// Classify an OS error into the taxonomy of segment errors.
    pub fn from_io(err: io::Error) -> Self {
        match err.raw_os_error() {
            Some(libc::ENOENT) => Error::NotFound,
            Some(libc::EACCES | libc::EPERM) => Error::PermissionDenied,
            Some(libc::ENOMEM | libc::ENOSPC | libc::EMFILE | libc::ENFILE | libc::EFBIG) => {
                Error::Exhausted
            }
            _ => Error::Os(err),
        }
    }

    /// Whether a `create` failed only because the drawn id was already taken.
    pub fn is_collision(&self) -> bool {
        matches!(self, Error::Os(err) if err.kind() == io::ErrorKind::AlreadyExists)
    }
}

#[test]
fn classify_errno() {
    let from = |code| Error::from_io(io::Error::from_raw_os_error(code));

    assert!(matches!(from(libc::ENOENT), Error::NotFound));
    assert!(matches!(from(libc::EACCES), Error::PermissionDenied));
    assert!(matches!(from(libc::EPERM), Error::PermissionDenied));
    assert!(matches!(from(libc::EMFILE), Error::Exhausted));
    assert!(matches!(from(libc::ENOSPC), Error::Exhausted));
    assert!(matches!(from(libc::EIO), Error::Os(_)));

    assert!(from(libc::EEXIST).is_collision());
    assert!(!from(libc::EIO).is_collision());
}
