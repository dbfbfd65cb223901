#![cfg(target_family = "unix")]
use std::fs::OpenOptions;
use std::os::unix::fs::FileExt;

use shm_segment::{page_size, probe_pid, Error, Liveness, Namespace, MARKER_SIZE};
use tempfile::TempDir;

fn namespace() -> (TempDir, Namespace) {
    let dir = tempfile::tempdir().expect("to create a namespace directory");
    let ns = Namespace::new(dir.path());
    (dir, ns)
}

/// The pid of a process that has exited and been waited for.
fn dead_pid() -> u32 {
    let mut child = std::process::Command::new("true").spawn().unwrap();
    let pid = child.id();
    child.wait().unwrap();
    pid
}

/// Rewrite the owner recorded in the marker, as if another process had created the segment.
fn set_marker_owner(ns: &Namespace, id: u32, size: usize, pid: u32) {
    let file = OpenOptions::new().write(true).open(ns.path_for(id)).unwrap();
    file.write_at(&pid.to_ne_bytes(), (size + 4) as u64).unwrap();
}

#[test]
fn scenario_owner_attacher_release() {
    let (_dir, ns) = namespace();

    let mut owner = ns.create(4096, true, 0o600).unwrap();
    assert_ne!(owner.id(), 0);
    assert_eq!(owner.size(), page_size().max(4096));
    assert!(owner.is_shared());
    assert!(owner.owns_deletion());

    let view = ns.attach(owner.id(), false).unwrap();
    assert!(!view.owns_deletion());
    assert!(!view.is_writable());

    const GREETING: &[u8] = b"Hello, world";
    owner.write_at(128, GREETING).unwrap();

    let mut buf = [0; GREETING.len()];
    view.read_at(128, &mut buf).unwrap();
    assert_eq!(buf, GREETING);

    let id = owner.id();
    owner.release().unwrap();

    // The earlier view keeps its mapping, the name is gone.
    view.read_at(128, &mut buf).unwrap();
    assert_eq!(buf, GREETING);
    assert!(matches!(ns.attach(id, false), Err(Error::NotFound)));
    view.release().unwrap();
}

#[test]
fn payload_is_page_rounded() {
    let (_dir, ns) = namespace();
    let page = page_size();

    for size in [1, page - 1, page, page + 1, 3 * page + 17] {
        let owner = ns.create(size, true, 0o600).unwrap();
        let expected = size.div_ceil(page) * page;
        assert_eq!(owner.size(), expected);

        let view = ns.attach(owner.id(), false).unwrap();
        assert_eq!(view.size(), expected);

        let backing = std::fs::metadata(ns.path_for(owner.id())).unwrap().len();
        assert_eq!(backing as usize, expected + MARKER_SIZE);
    }
}

#[test]
fn invalid_sizes_and_modes() {
    let (_dir, ns) = namespace();
    let ns = ns.with_max_size(4 * page_size());

    assert!(matches!(ns.create(0, true, 0o600), Err(Error::InvalidArgument)));
    assert!(matches!(ns.create(0, false, 0o600), Err(Error::InvalidArgument)));
    assert!(matches!(ns.create(4 * page_size() + 1, true, 0o600), Err(Error::InvalidArgument)));
    assert!(matches!(ns.create(1, true, 0o400), Err(Error::InvalidArgument)));
    assert!(matches!(ns.create(1, true, 0o1600), Err(Error::InvalidArgument)));
    assert!(std::fs::read_dir(ns.dir()).unwrap().next().is_none());
}

#[test]
fn writable_attach_shares_writes_back() {
    let (_dir, ns) = namespace();

    let owner = ns.create(1, true, 0o600).unwrap();
    let mut peer = ns.attach(owner.id(), true).unwrap();
    assert!(peer.is_writable());
    peer.write_at(0, b"from the peer").unwrap();

    let mut buf = [0; 13];
    owner.read_at(0, &mut buf).unwrap();
    assert_eq!(&buf, b"from the peer");

    // Releasing a view never deletes the segment.
    peer.release().unwrap();
    assert!(ns.path_for(owner.id()).exists());
}

#[test]
fn read_only_view_refuses_writes() {
    let (_dir, ns) = namespace();

    let owner = ns.create(1, true, 0o600).unwrap();
    let mut view = ns.attach(owner.id(), false).unwrap();
    assert!(view.as_mut_ptr().is_none());
    assert!(matches!(view.write_at(0, b"x"), Err(Error::PermissionDenied)));
}

#[test]
fn released_segments_are_not_found_again() {
    let (_dir, ns) = namespace();

    let owner = ns.create(1, true, 0o600).unwrap();
    let id = owner.id();
    owner.release().unwrap();

    assert_eq!(ns.cleanup(), 0);
    assert!(ns.list().is_empty());
    assert!(matches!(ns.attach(id, false), Err(Error::NotFound)));
}

#[test]
fn dropping_the_owner_unlinks() {
    let (_dir, ns) = namespace();

    let owner = ns.create(1, true, 0o600).unwrap();
    let path = ns.path_for(owner.id());
    assert!(path.exists());
    drop(owner);
    assert!(!path.exists());
}

#[test]
fn orphans_are_reaped() {
    let (_dir, ns) = namespace();

    let owner = ns.create(1, true, 0o600).unwrap();
    let id = owner.id();
    set_marker_owner(&ns, id, owner.size(), dead_pid());

    let listed = ns.list();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].liveness, Some(Liveness::Dead));

    assert_eq!(ns.cleanup(), 1);
    assert!(!ns.path_for(id).exists());
    assert!(matches!(ns.attach(id, false), Err(Error::NotFound)));

    // The object is already gone, which is fine for its owner.
    owner.release().unwrap();
}

#[test]
fn live_owners_are_kept() {
    let (_dir, ns) = namespace();

    let owner = ns.create(1, true, 0o600).unwrap();
    assert_eq!(ns.cleanup(), 0);
    assert!(ns.path_for(owner.id()).exists());

    let listed = ns.list();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].owner, Some(std::process::id()));
    assert_eq!(listed[0].liveness, Some(Liveness::Alive));
}

#[test]
fn indeterminate_owners_are_kept() {
    let (_dir, ns) = namespace();

    // Unprivileged users can not signal init, so its liveness is unknown to them.
    if unsafe { libc::geteuid() } == 0 {
        return;
    }
    assert_eq!(probe_pid(1), Liveness::Indeterminate);

    let owner = ns.create(1, true, 0o600).unwrap();
    set_marker_owner(&ns, owner.id(), owner.size(), 1);

    assert_eq!(ns.cleanup(), 0);
    assert!(ns.path_for(owner.id()).exists());
}

#[test]
fn creation_cleans_up_first() {
    let (_dir, ns) = namespace();

    let orphan = ns.create(1, true, 0o600).unwrap();
    let orphan_path = ns.path_for(orphan.id());
    set_marker_owner(&ns, orphan.id(), orphan.size(), dead_pid());
    // Leak the mapping so only the cleanup can remove the object.
    std::mem::forget(orphan);

    let _fresh = ns.create(1, true, 0o600).unwrap();
    assert!(!orphan_path.exists());
}

#[test]
fn truncated_object_is_corrupt() {
    let (_dir, ns) = namespace();

    let owner = ns.create(1, true, 0o600).unwrap();
    let file = OpenOptions::new().write(true).open(ns.path_for(owner.id())).unwrap();
    file.set_len((owner.size() + MARKER_SIZE + 7) as u64).unwrap();

    assert!(matches!(ns.attach(owner.id(), false), Err(Error::Corrupt)));

    file.set_len(MARKER_SIZE as u64).unwrap();
    assert!(matches!(ns.attach(owner.id(), false), Err(Error::Corrupt)));
    // Unreadable segments are never reaped, but their owner still removes them.
    assert_eq!(ns.cleanup(), 0);
    assert!(ns.path_for(owner.id()).exists());
    owner.release().unwrap();
}

#[test]
fn foreign_objects_are_left_alone() {
    let (_dir, ns) = namespace();
    let page = page_size();

    // Right shape, but no marker was ever published.
    let unmarked = ns.path_for(0xabcd);
    std::fs::write(&unmarked, vec![0; page + MARKER_SIZE]).unwrap();
    // Wrong shape entirely.
    let odd = ns.path_for(0xabce);
    std::fs::write(&odd, b"not a segment").unwrap();
    // Not following the naming convention.
    let other = ns.dir().join("pulse-shm-config");
    std::fs::write(&other, vec![0; page + MARKER_SIZE]).unwrap();

    assert_eq!(ns.cleanup(), 0);
    assert!(unmarked.exists() && odd.exists() && other.exists());

    let listed = ns.list();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, 0xabcd);
    assert_eq!(listed[0].owner, None);
    assert!(!listed[0].is_orphan());

    assert!(matches!(ns.attach(0xabce, false), Err(Error::Corrupt)));
}

#[test]
fn special_files_do_not_stall_the_scan() {
    let (_dir, ns) = namespace();

    let fifo = ns.path_for(0xabcd);
    let c_path = std::ffi::CString::new(fifo.as_os_str().as_encoded_bytes()).unwrap();
    assert_eq!(unsafe { libc::mkfifo(c_path.as_ptr(), 0o600) }, 0);

    let target = ns.dir().join("elsewhere");
    std::fs::write(&target, vec![0; page_size() + MARKER_SIZE]).unwrap();
    let link = ns.path_for(0xabce);
    std::os::unix::fs::symlink(&target, &link).unwrap();

    let (send, recv) = std::sync::mpsc::channel();
    let scan = ns.clone();
    std::thread::spawn(move || {
        let removed = scan.cleanup();
        let created = scan.create(1, true, 0o600).map(|segment| segment.id());
        let _ = send.send((removed, created));
    });

    let (removed, created) = recv
        .recv_timeout(std::time::Duration::from_secs(10))
        .expect("cleanup and create to return");
    assert_eq!(removed, 0);
    assert!(created.is_ok());

    assert!(matches!(ns.attach(0xabcd, false), Err(Error::Corrupt)));
    assert!(matches!(ns.attach(0xabce, false), Err(Error::Corrupt)));
    assert!(fifo.exists() && target.exists());
}

#[test]
fn punch_keeps_marker_and_neighbours() {
    let (_dir, ns) = namespace();
    let page = page_size();

    let mut owner = ns.create(3 * page, true, 0o600).unwrap();
    owner.write_at(0, b"first").unwrap();
    owner.write_at(2 * page, b"last").unwrap();

    owner.punch(page, page);
    owner.punch(0, usize::MAX - 1);
    // Everything but the payload is out of reach.
    owner.punch(3 * page, page);

    let listed = ns.list();
    assert_eq!(listed[0].owner, Some(std::process::id()));

    // The mapping is intact for further writers.
    owner.write_at(page, b"middle").unwrap();
    let mut buf = [0; 6];
    owner.read_at(page, &mut buf).unwrap();
    assert_eq!(&buf, b"middle");
}

#[test]
fn concurrent_reapers_agree() {
    let (_dir, ns) = namespace();

    // Orphan them only after all creations, each of which cleans up first.
    let orphans: Vec<_> = (0..8).map(|_| ns.create(1, true, 0o600).unwrap()).collect();
    let pid = dead_pid();
    let mut ids = vec![];
    for orphan in orphans {
        set_marker_owner(&ns, orphan.id(), orphan.size(), pid);
        ids.push(orphan.id());
        std::mem::forget(orphan);
    }

    let reapers: Vec<_> = (0..4)
        .map(|_| {
            let ns = ns.clone();
            std::thread::spawn(move || ns.cleanup())
        })
        .collect();

    let removed: usize = reapers.into_iter().map(|r| r.join().unwrap()).sum();
    assert_eq!(removed, ids.len());
    assert!(ids.iter().all(|&id| !ns.path_for(id).exists()));
}
