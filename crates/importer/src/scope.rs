//! Scoped maps for tracking value bindings through nested regions.
//!
//! A [`ScopedMap`] is an arena of scopes, each of which holds its own entries
//! and a non-owning link to its parent. Lookups start in the innermost open
//! scope and walk outward through the parents, so a child scope shadows its
//! parent without ever modifying it. Exiting a scope discards everything that
//! was bound in it.
//!
//! Scopes are opened and closed in strict stack order, which is how nested
//! graphs are walked. The arena is therefore indexed by nesting depth.

use std::{collections::HashMap, hash::Hash};

use graft_errors::import::{Error, Result};
use graft_ir::module::ValueId as IrValue;
use graft_trace::graph::ValueId as SourceValue;

/// A reference to one scope in a [`ScopedMap`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ScopeId(usize);

#[derive(Clone, Debug)]
struct Scope<K, V> {
    parent:  Option<ScopeId>,
    entries: HashMap<K, V>,
}

/// A map whose bindings are organised into nested scopes.
#[derive(Clone, Debug)]
pub struct ScopedMap<K, V> {
    scopes: Vec<Scope<K, V>>,
}

/// The mapping from traced values to the IR values that represent them.
pub type TranslationMap = ScopedMap<SourceValue, IrValue>;

impl<K, V> ScopedMap<K, V>
where
    K: Eq + Hash,
{
    /// Creates a map with only its root scope open.
    #[must_use]
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope {
                parent:  None,
                entries: HashMap::new(),
            }],
        }
    }

    /// Gets the outermost scope, which can never be exited.
    #[must_use]
    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    /// Gets the innermost open scope.
    #[must_use]
    pub fn current(&self) -> ScopeId {
        ScopeId(self.scopes.len() - 1)
    }

    /// Gets the number of scopes nested inside the root scope.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.scopes.len() - 1
    }

    /// Opens a new scope as a child of the current one, making it current.
    pub fn enter(&mut self) -> ScopeId {
        let parent = Some(self.current());
        self.scopes.push(Scope {
            parent,
            entries: HashMap::new(),
        });
        self.current()
    }

    /// Closes `scope`, discarding every binding made in it.
    ///
    /// # Errors
    ///
    /// - [`Error::InternalConsistency`] if `scope` is not the innermost open
    ///   scope, or is the root scope.
    pub fn exit(&mut self, scope: ScopeId) -> Result<()> {
        if scope != self.current() || scope == self.root() {
            Err(Error::InternalConsistency(format!(
                "Attempted to exit scope {} while scope {} is innermost",
                scope.0,
                self.current().0
            )))?;
        }

        self.scopes.pop();
        Ok(())
    }

    /// Binds `key` to `value` in the current scope, returning the value
    /// previously bound to `key` in that same scope, if any.
    ///
    /// Bindings of `key` in enclosing scopes are shadowed, not replaced.
    pub fn insert(&mut self, key: K, value: V) -> Option<V> {
        let ix = self.current().0;
        self.scopes[ix].entries.insert(key, value)
    }

    /// Looks `key` up starting at the current scope and proceeding outward.
    #[must_use]
    pub fn lookup(&self, key: &K) -> Option<&V> {
        let mut scope = Some(self.current());
        while let Some(ScopeId(ix)) = scope {
            let current = &self.scopes[ix];
            if let Some(value) = current.entries.get(key) {
                return Some(value);
            }
            scope = current.parent;
        }
        None
    }
}

impl<K, V> Default for ScopedMap<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use crate::scope::ScopedMap;

    #[test]
    fn child_scopes_shadow_without_mutating_parents() -> anyhow::Result<()> {
        let mut map: ScopedMap<&str, i32> = ScopedMap::new();
        map.insert("a", 1);
        map.insert("b", 2);

        let child = map.enter();
        map.insert("a", 10);
        assert_eq!(map.lookup(&"a"), Some(&10));
        assert_eq!(map.lookup(&"b"), Some(&2));
        assert_eq!(map.depth(), 1);

        map.exit(child)?;
        assert_eq!(map.lookup(&"a"), Some(&1));
        assert_eq!(map.depth(), 0);
        Ok(())
    }

    #[test]
    fn exiting_discards_local_bindings() -> anyhow::Result<()> {
        let mut map: ScopedMap<u32, u32> = ScopedMap::new();
        let outer = map.enter();
        let inner = map.enter();
        map.insert(7, 7);
        assert_eq!(map.depth(), 2);

        map.exit(inner)?;
        assert_eq!(map.lookup(&7), None);
        map.exit(outer)?;
        Ok(())
    }

    #[test]
    fn scopes_exit_in_stack_order() {
        let mut map: ScopedMap<u32, u32> = ScopedMap::new();
        let outer = map.enter();
        let _inner = map.enter();

        assert!(map.exit(outer).is_err());
        assert!(map.exit(map.root()).is_err());
    }

    #[test]
    fn inserting_twice_in_one_scope_reports_the_old_value() {
        let mut map: ScopedMap<u32, u32> = ScopedMap::new();
        assert_eq!(map.insert(1, 1), None);
        assert_eq!(map.insert(1, 2), Some(1));
    }
}
