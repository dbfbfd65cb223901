//! Find and remove segments whose creating process died without releasing them.
//!
//! There is no coordinator. Each process may scan the namespace and every scan works only from
//! the file system and the process table. Concurrent scans are harmless, the second unlink of an
//! orphan finds nothing to do.
use std::fs;

use crate::marker::Marker;
use crate::sys::{self, Liveness};
use crate::Namespace;

/// What a scan found out about one segment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SegmentInfo {
    pub id: u32,
    /// Payload length in bytes.
    pub size: usize,
    /// The creator recorded in the marker, `None` if the marker is not published.
    pub owner: Option<u32>,
    pub liveness: Option<Liveness>,
}

impl SegmentInfo {
    /// An orphan is a published segment whose creator is known to be dead.
    pub fn is_orphan(&self) -> bool {
        self.liveness == Some(Liveness::Dead)
    }
}

impl Namespace {
    /// Remove all segments whose creator is dead, returning how many were removed.
    ///
    /// Segments whose marker is missing or unreadable, and segments whose creator's liveness is
    /// indeterminate, are never touched. Failures with individual entries do not stop the scan.
    pub fn cleanup(&self) -> usize {
        self.cleanup_with(sys::probe_pid)
    }

    /// Remove the segments whose creator `liveness_of` reports dead.
    pub(crate) fn cleanup_with(&self, liveness_of: impl Fn(u32) -> Liveness) -> usize {
        let mut removed = 0;

        for id in self.ids() {
            let Some(info) = self.inspect(id, &liveness_of) else {
                continue;
            };

            if !info.is_orphan() {
                let (owner, liveness) = (info.owner, info.liveness);
                tracing::trace!(id, ?owner, ?liveness, "keeping segment");
                continue;
            }

            match sys::unlink(&self.path_for(id)) {
                Ok(true) => {
                    tracing::info!(id, owner = ?info.owner, "removed orphaned segment");
                    removed += 1;
                }
                // Reaped concurrently.
                Ok(false) => {}
                Err(err) => tracing::debug!(id, %err, "failed to remove orphaned segment"),
            }
        }

        removed
    }

    /// Describe every segment in the namespace, sorted by id. Nothing is removed.
    pub fn list(&self) -> Vec<SegmentInfo> {
        let mut found: Vec<_> = self
            .ids()
            .filter_map(|id| self.inspect(id, sys::probe_pid))
            .collect();
        found.sort_by_key(|info| info.id);
        found
    }

    /// Ids of all entries following the naming convention.
    fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        let entries = match fs::read_dir(self.dir()) {
            Ok(entries) => Some(entries),
            Err(err) => {
                tracing::debug!(dir = %self.dir().display(), %err, "can not scan namespace");
                None
            }
        };

        entries
            .into_iter()
            .flatten()
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| self.parse_name(&entry.file_name()))
    }

    /// Read the marker of `id` through a transient read-only view.
    ///
    /// Attaching fails routinely when the owner released the segment since the directory was
    /// read, such entries are skipped.
    fn inspect(&self, id: u32, liveness_of: impl Fn(u32) -> Liveness) -> Option<SegmentInfo> {
        let view = match self.attach(id, false) {
            Ok(view) => view,
            Err(err) => {
                tracing::trace!(id, %err, "skipping segment");
                return None;
            }
        };

        // Safety: the marker lies within the mapping, after the page aligned payload. The view
        // outlives the reference.
        let owner = unsafe { Marker::from_ptr(view.as_ptr().add(view.size())) }.observe();
        let info = SegmentInfo {
            id,
            size: view.size(),
            owner,
            liveness: owner.map(liveness_of),
        };

        // A read-only view that does not own deletion, releasing only unmaps.
        let _ = view.release();
        Some(info)
    }
}
