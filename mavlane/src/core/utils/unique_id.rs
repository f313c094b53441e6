use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, Ordering};

/// <sup>[`serde`](https://serde.rs)</sup>
/// Unique identifier.
///
/// Identifier which is guaranteed to be unique during the program run. It is intentionally kept
/// opaque and is dedicated for comparison of runtime entities like connections or handler owners.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct UniqueId(u64);

static NEXT_UNIQUE_ID: AtomicU64 = AtomicU64::new(1);

impl UniqueId {
    /// Generates unique identifier.
    pub fn new() -> Self {
        Self(NEXT_UNIQUE_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn value(&self) -> u64 {
        self.0
    }
}

impl Default for UniqueId {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for UniqueId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("UniqueId").field(&self.0).finish()
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Tests                                               //
///////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::thread;

    #[test]
    fn unique_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|_| thread::spawn(|| (0..1000).map(|_| UniqueId::new()).collect::<Vec<_>>()))
            .collect();

        let mut ids = HashSet::new();
        for handle in handles {
            for id in handle.join().unwrap() {
                assert!(ids.insert(id));
            }
        }
        assert_eq!(ids.len(), 4000);
    }
}
