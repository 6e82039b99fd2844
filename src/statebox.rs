/*!
 * StateBox: the only mutable source of truth for "who do I believe is
 * primary right now." Reads are lock-free atomic snapshots; writes are
 * serialized by the caller (the ReplSet write lock).
 */

use crate::model::MemberState;
use arc_swap::ArcSwap;
use std::sync::Arc;

/// Atomic snapshot of (state, primary member id).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Snapshot {
    pub state: MemberState,
    pub primary: Option<u32>,
}

pub struct StateBox {
    inner: ArcSwap<Snapshot>,
    self_id: u32,
}

impl StateBox {
    pub fn new(self_id: u32) -> Self {
        Self {
            inner: ArcSwap::new(Arc::new(Snapshot {
                state: MemberState::Startup,
                primary: None,
            })),
            self_id,
        }
    }

    /// Lock-free atomic read. Never returns a torn pair.
    pub fn get(&self) -> Snapshot {
        **self.inner.load()
    }

    /// Replaces both fields as one atomic publish. No callbacks fire from
    /// inside `set`.
    pub fn set(&self, state: MemberState, primary: Option<u32>) {
        self.inner.store(Arc::new(Snapshot { state, primary }));
    }

    /// `(Primary, self)`.
    pub fn set_self_primary(&self) {
        self.set(MemberState::Primary, Some(self.self_id));
    }

    /// Preserves the local state but sets primary to `m` (or clears it).
    pub fn set_other_primary(&self, member_id: Option<u32>) {
        let cur = self.get();
        self.set(cur.state, member_id);
    }

    /// Preserves primary if it is self and state remains Primary-compatible,
    /// otherwise clears it.
    pub fn change(&self, state: MemberState) {
        let cur = self.get();
        let primary = if cur.primary == Some(self.self_id) && state.primary() {
            cur.primary
        } else if state.primary() {
            Some(self.self_id)
        } else {
            None
        };
        self.set(state, primary);
    }
}
