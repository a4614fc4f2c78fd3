//! Capability table
//!
//! The authoritative record of which guest descriptors resolve to which
//! host resources. Built once from the declared preopens, immutable
//! afterward, and handed to the syscall backend as the authorization
//! context for every descriptor-scoped request.
//!
//! Descriptor assignment is deterministic and load-bearing: guests and
//! WASI test fixtures enumerate preopens by probing descriptors upward
//! from 3, so the Nth declared preopen must always answer on `3 + N`.
//! The table itself never touches the filesystem.

use crate::options::Preopen;

/// Descriptors 0-2 are the standard streams; preopens start here.
pub const FIRST_PREOPEN_FD: u32 = 3;

/// One row of the capability table. Created during environment
/// construction, never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityEntry {
    /// Path the guest addresses this capability by.
    pub guest_path: String,
    /// Host directory the backend is permitted to resolve against.
    pub host_path: String,
    /// The guest file descriptor assigned to this entry.
    pub fd: u32,
}

/// Ordered table of capability grants, indexed by guest descriptor.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CapabilityTable {
    entries: Vec<CapabilityEntry>,
}

impl CapabilityTable {
    /// Assign descriptors `3..3+N` to the preopens in declaration order.
    pub fn from_preopens(preopens: &[Preopen]) -> Self {
        let entries = preopens
            .iter()
            .enumerate()
            .map(|(i, p)| CapabilityEntry {
                guest_path: p.guest.clone(),
                host_path: p.host.clone(),
                fd: FIRST_PREOPEN_FD + i as u32,
            })
            .collect();
        Self { entries }
    }

    /// Look up the capability behind a guest descriptor. `None` for the
    /// standard streams and for anything never granted.
    pub fn get(&self, fd: u32) -> Option<&CapabilityEntry> {
        let index = fd.checked_sub(FIRST_PREOPEN_FD)? as usize;
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[CapabilityEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
