//! Global identity allocation.
//!
//! Local IDs are slice-scoped and tombstoned with 0 when an object is
//! retired; the unique IDs issued here are strictly increasing across
//! the whole run and never reused, so cross-slice bookkeeping stays
//! valid after retirement and compaction.

use std::sync::atomic::{AtomicI32, Ordering};

/// Allocator for run-wide unique IDs.
///
/// One instance is shared by every slice worker; the counters are
/// atomic so parallel slice processing needs no locking.
#[derive(Debug, Default)]
pub struct IdAllocator {
    traj: AtomicI32,
    vertex: AtomicI32,
    pfp: AtomicI32,
    shower: AtomicI32,
}

impl IdAllocator {
    /// Creates an allocator with all counters at zero; the first ID
    /// issued is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next trajectory UID.
    pub fn next_traj(&self) -> i32 {
        self.traj.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Next vertex UID (shared by 2D and 3D vertices).
    pub fn next_vertex(&self) -> i32 {
        self.vertex.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Next PFP UID.
    pub fn next_pfp(&self) -> i32 {
        self.pfp.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Next shower UID (shared by 2D and 3D showers).
    pub fn next_shower(&self) -> i32 {
        self.shower.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Count of trajectory UIDs issued so far.
    #[must_use]
    pub fn trajs_issued(&self) -> i32 {
        self.traj.load(Ordering::Relaxed)
    }
}
