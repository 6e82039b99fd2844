/*!
 * Member Table: ordered collection of peer entries. The self entry is
 * owned by the enclosing ReplSet, not the table.
 *
 * Mutated only by the Configuration Loader (under the ReplSet write
 * lock); readers (manager, diagnostics) iterate freely once they hold
 * that same lock for the duration of their read.
 */

use crate::model::Member;

/// Generation-tagged so heartbeat workers can detect they were orphaned
/// without needing a direct pointer back into the table.
pub struct MemberTable {
    members: Vec<Member>,
    generation: u64,
}

impl MemberTable {
    pub fn new() -> Self {
        Self {
            members: Vec::new(),
            generation: 0,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Iteration in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = &Member> {
        self.members.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Member> {
        self.members.iter_mut()
    }

    pub fn find_by_id(&self, id: u32) -> Option<&Member> {
        self.members.iter().find(|m| m.id() == id)
    }

    pub fn find_by_id_mut(&mut self, id: u32) -> Option<&mut Member> {
        self.members.iter_mut().find(|m| m.id() == id)
    }

    pub fn push(&mut self, m: Member) {
        self.members.push(m);
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Detaches every peer from the active table and bumps the
    /// generation so any in-flight heartbeat worker keyed to the old
    /// generation notices it has been orphaned and terminates.
    pub fn orphan_all(&mut self) -> Vec<Member> {
        self.generation += 1;
        std::mem::take(&mut self.members)
    }
}

impl Default for MemberTable {
    fn default() -> Self {
        Self::new()
    }
}
