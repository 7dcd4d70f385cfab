//! Identifiers handed out by the [`crate::FieldStore`].
//!
//! Ids are sequential and never reused within a store, so two scenes built
//! the same way get the same ids and a stale id can never alias a new field.

use std::fmt;

macro_rules! sequential_id {
    ($(#[$doc:meta])* $name:ident, $prefix:literal) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(u64);

        impl $name {
            pub fn index(&self) -> u64 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

sequential_id!(
    /// Untyped handle of a field (port) in a [`crate::FieldStore`].
    FieldId,
    "field"
);
sequential_id!(
    /// Identity of a module instance.
    ModuleId,
    "module"
);
sequential_id!(
    /// Identity of a node in the scene forest.
    NodeId,
    "node"
);

/// Monotonic counters for the three id spaces.
#[derive(Debug, Default)]
pub(crate) struct IdAllocator {
    next_field: u64,
    next_module: u64,
    next_node: u64,
}

impl IdAllocator {
    pub fn field(&mut self) -> FieldId {
        self.next_field += 1;
        FieldId(self.next_field)
    }

    pub fn module(&mut self) -> ModuleId {
        self.next_module += 1;
        ModuleId(self.next_module)
    }

    pub fn node(&mut self) -> NodeId {
        self.next_node += 1;
        NodeId(self.next_node)
    }

    /// Highest module id handed out so far (0 if none).
    pub fn last_module(&self) -> u64 {
        self.next_module
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_sequential_per_space() {
        let mut ids = IdAllocator::default();
        let f1 = ids.field();
        let m1 = ids.module();
        let f2 = ids.field();
        assert!(f2 > f1);
        assert_eq!(m1.index(), 1);
        assert_eq!(f2.to_string(), "field#2");
        assert_eq!(ids.node().to_string(), "node#1");
    }
}
