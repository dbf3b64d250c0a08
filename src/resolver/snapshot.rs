//! Snapshot stack for speculative resolver probing (§4.5 stage C, §9
//! design note).
//!
//! The contract is LIFO push/pop with exact restoration of bit contents.
//! This implementation stores full copies rather than deltas — simpler to
//! get exactly right, and `gconstr` vectors are small (one bool per
//! version) so the copy cost stays modest even for deep speculative
//! recursion.

use crate::id::PackageId;
use std::collections::HashMap;

pub struct SnapshotStack {
    stack: Vec<HashMap<PackageId, Vec<bool>>>,
}

impl SnapshotStack {
    pub fn new() -> Self {
        SnapshotStack { stack: Vec::new() }
    }

    pub fn push(&mut self, gconstr: &HashMap<PackageId, Vec<bool>>) {
        self.stack.push(gconstr.clone());
    }

    /// Restores `gconstr` to exactly the state it was in at the matching
    /// `push`.
    pub fn pop(&mut self, gconstr: &mut HashMap<PackageId, Vec<bool>>) {
        if let Some(saved) = self.stack.pop() {
            *gconstr = saved;
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }
}

impl Default for SnapshotStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_restores_exact_contents() {
        let mut stack = SnapshotStack::new();
        let id = PackageId(uuid::Uuid::nil());
        let mut gconstr = HashMap::new();
        gconstr.insert(id, vec![true, true, false]);
        stack.push(&gconstr);

        gconstr.get_mut(&id).unwrap()[1] = false;
        assert_eq!(gconstr[&id], vec![true, false, false]);

        stack.pop(&mut gconstr);
        assert_eq!(gconstr[&id], vec![true, true, false]);
        assert_eq!(stack.depth(), 0);
    }

    #[test]
    fn lifo_ordering() {
        let mut stack = SnapshotStack::new();
        let id = PackageId(uuid::Uuid::nil());
        let mut gconstr = HashMap::new();
        gconstr.insert(id, vec![true]);
        stack.push(&gconstr);
        gconstr.insert(id, vec![false]);
        stack.push(&gconstr);
        gconstr.insert(id, vec![true, true]);

        stack.pop(&mut gconstr);
        assert_eq!(gconstr[&id], vec![false]);
        stack.pop(&mut gconstr);
        assert_eq!(gconstr[&id], vec![true]);
    }
}
