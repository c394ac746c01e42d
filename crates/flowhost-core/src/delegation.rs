use std::collections::HashSet;

use crate::error::{FlowhostError, Result};

pub const DEFAULT_MAX_DEPTH: usize = 5;

/// Recursion guard threaded through delegated agent runs.
///
/// Contexts are never mutated after creation. Each delegation derives a
/// child with [`DelegationContext::enter`], so sibling delegations from the
/// same node see the same parent state.
#[derive(Debug, Clone)]
pub struct DelegationContext {
    visited: HashSet<String>,
    chain: Vec<String>,
    depth: usize,
    max_depth: usize,
}

impl DelegationContext {
    /// Context for the top-level run of `agent_id`.
    pub fn root(agent_id: &str, max_depth: usize) -> Self {
        Self {
            visited: HashSet::from([agent_id.to_string()]),
            chain: vec![agent_id.to_string()],
            depth: 0,
            max_depth,
        }
    }

    /// Derive the context for a delegated run of `agent_id`.
    pub fn enter(&self, agent_id: &str) -> Result<Self> {
        if self.visited.contains(agent_id) {
            return Err(FlowhostError::DelegationCycle {
                agent_id: agent_id.to_string(),
                chain: self.chain.clone(),
            });
        }
        if self.depth >= self.max_depth {
            return Err(FlowhostError::DelegationDepthExceeded {
                depth: self.depth,
                max_depth: self.max_depth,
            });
        }

        let mut visited = self.visited.clone();
        visited.insert(agent_id.to_string());
        let mut chain = self.chain.clone();
        chain.push(agent_id.to_string());

        Ok(Self {
            visited,
            chain,
            depth: self.depth + 1,
            max_depth: self.max_depth,
        })
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Agent ids from the root to the current run.
    pub fn chain(&self) -> &[String] {
        &self.chain
    }

    /// Id of the agent currently running.
    pub fn current(&self) -> Option<&str> {
        self.chain.last().map(String::as_str)
    }

    pub fn has_visited(&self, agent_id: &str) -> bool {
        self.visited.contains(agent_id)
    }
}

impl Default for DelegationContext {
    fn default() -> Self {
        Self {
            visited: HashSet::new(),
            chain: Vec::new(),
            depth: 0,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enter_derives_child_without_touching_parent() {
        let root = DelegationContext::root("coordinator", 5);
        let child = root.enter("researcher").unwrap();

        assert_eq!(child.depth(), 1);
        assert_eq!(child.chain(), ["coordinator", "researcher"]);
        assert_eq!(root.depth(), 0);
        assert!(!root.has_visited("researcher"));
    }

    #[test]
    fn test_enter_rejects_cycle() {
        let root = DelegationContext::root("coordinator", 5);
        let a = root.enter("agent_a").unwrap();
        let err = a.enter("coordinator").unwrap_err();
        assert!(matches!(err, FlowhostError::DelegationCycle { ref agent_id, .. } if agent_id == "coordinator"));
    }

    #[test]
    fn test_enter_rejects_depth_ceiling() {
        let mut ctx = DelegationContext::root("a0", 2);
        ctx = ctx.enter("a1").unwrap();
        ctx = ctx.enter("a2").unwrap();
        let err = ctx.enter("a3").unwrap_err();
        assert!(matches!(
            err,
            FlowhostError::DelegationDepthExceeded { depth: 2, max_depth: 2 }
        ));
    }

    #[test]
    fn test_siblings_share_parent_state() {
        let root = DelegationContext::root("coordinator", 5);
        let a = root.enter("agent_a").unwrap();
        let b = root.enter("agent_b").unwrap();
        assert!(!a.has_visited("agent_b"));
        assert!(!b.has_visited("agent_a"));
    }
}
