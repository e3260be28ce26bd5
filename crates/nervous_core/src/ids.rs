//! Identifier newtypes.
//!
//! Neurons and mycelia are named by the host (an endpoint name, a routing
//! domain); every other entity gets a sequential integer from its arena.

use core::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

macro_rules! sequential_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub u64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "-{}"), self.0)
            }
        }
    };
}

macro_rules! named_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new(name: impl Into<String>) -> Self {
                Self(name.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }
    };
}

named_id!(
    /// A delivery endpoint name.
    NeuronId
);
named_id!(
    /// A logical routing domain.
    MyceliumId
);

sequential_id!(SynapseId, "syn");
sequential_id!(ReflexArcId, "arc");
sequential_id!(AntigenId, "ag");
sequential_id!(AntibodyId, "ab");
sequential_id!(MemoryCellId, "mem");
sequential_id!(HyphaId, "hy");
sequential_id!(TrailId, "trail");
sequential_id!(AntId, "ant");

/// Monotonic id source shared by an arena.
#[derive(Debug)]
pub struct IdSequence(AtomicU64);

impl Default for IdSequence {
    fn default() -> Self {
        Self::new()
    }
}

impl IdSequence {
    pub fn new() -> Self {
        Self(AtomicU64::new(1))
    }

    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_prefixes() {
        assert_eq!(HyphaId(7).to_string(), "hy-7");
        assert_eq!(NeuronId::from("billing").to_string(), "billing");
    }

    #[test]
    fn test_sequence_is_monotonic() {
        let seq = IdSequence::new();
        let a = seq.next();
        let b = seq.next();
        assert!(b > a);
    }
}
