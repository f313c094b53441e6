//! Generational arena.
//!
//! Entries are addressed by a [`Cookie`] made of a slot index and the generation of that slot.
//! Removing an entry bumps the generation, so a stale cookie never reaches an entry that later
//! reuses the slot.

use std::fmt::{Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Handle to an entry of an [`Arena`].
///
/// Cookies are typed by the entry they point to, so a cookie of one arena can't be passed to an
/// arena of a different kind.
pub struct Cookie<T> {
    index: u32,
    generation: u32,
    _marker: PhantomData<fn() -> T>,
}

// Manual impls: derives would require `T` to implement the traits.
impl<T> Copy for Cookie<T> {}

impl<T> Clone for Cookie<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> PartialEq for Cookie<T> {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index && self.generation == other.generation
    }
}

impl<T> Eq for Cookie<T> {}

impl<T> Hash for Cookie<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.index.hash(state);
        self.generation.hash(state);
    }
}

impl<T> Debug for Cookie<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "Cookie({}v{})", self.index, self.generation)
    }
}

enum Slot<T> {
    Occupied { value: T, generation: u32 },
    Free { next: Option<u32>, generation: u32 },
}

/// Growable slab of entries addressed by [`Cookie`]s.
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free_head: Option<u32>,
    len: usize,
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_head: None,
            len: 0,
        }
    }

    /// Number of occupied entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Stores a value and returns its cookie.
    pub fn insert(&mut self, value: T) -> Cookie<T> {
        self.len += 1;

        if let Some(index) = self.free_head {
            let slot = &mut self.slots[index as usize];
            if let Slot::Free { next, generation } = *slot {
                self.free_head = next;
                *slot = Slot::Occupied { value, generation };
                return Cookie::new(index, generation);
            }
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot::Occupied {
            value,
            generation: 0,
        });
        Cookie::new(index, 0)
    }

    /// Returns `true` if the cookie points to a live entry.
    pub fn contains(&self, cookie: Cookie<T>) -> bool {
        self.get(cookie).is_some()
    }

    /// Entry by cookie.
    pub fn get(&self, cookie: Cookie<T>) -> Option<&T> {
        match self.slots.get(cookie.index as usize) {
            Some(Slot::Occupied { value, generation }) if *generation == cookie.generation => {
                Some(value)
            }
            _ => None,
        }
    }

    /// Mutable entry by cookie.
    pub fn get_mut(&mut self, cookie: Cookie<T>) -> Option<&mut T> {
        match self.slots.get_mut(cookie.index as usize) {
            Some(Slot::Occupied { value, generation }) if *generation == cookie.generation => {
                Some(value)
            }
            _ => None,
        }
    }

    /// Removes the entry and returns its value.
    ///
    /// Returns `None` for stale cookies.
    pub fn remove(&mut self, cookie: Cookie<T>) -> Option<T> {
        if !self.contains(cookie) {
            return None;
        }

        let index = cookie.index as usize;
        let freed = Slot::Free {
            next: self.free_head,
            generation: cookie.generation.wrapping_add(1),
        };
        match std::mem::replace(&mut self.slots[index], freed) {
            Slot::Occupied { value, .. } => {
                self.free_head = Some(cookie.index);
                self.len -= 1;
                Some(value)
            }
            slot => {
                self.slots[index] = slot;
                None
            }
        }
    }

    /// Iterates over live entries with their cookies.
    pub fn iter(&self) -> impl Iterator<Item = (Cookie<T>, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Occupied { value, generation } => {
                    Some((Cookie::new(index as u32, *generation), value))
                }
                Slot::Free { .. } => None,
            })
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Cookie<T> {
    fn new(index: u32, generation: u32) -> Self {
        Self {
            index,
            generation,
            _marker: PhantomData,
        }
    }
}

///////////////////////////////////////////////////////////////////////////////////////////////////
//                                           Tests                                               //
///////////////////////////////////////////////////////////////////////////////////////////////////

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_cookie_does_not_reach_reused_slot() {
        let mut arena = Arena::new();
        let first = arena.insert("first");
        assert_eq!(arena.remove(first), Some("first"));

        let second = arena.insert("second");
        assert_ne!(first, second);
        assert_eq!(arena.get(first), None);
        assert_eq!(arena.remove(first), None);
        assert_eq!(arena.get(second), Some(&"second"));
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn iterates_over_live_entries() {
        let mut arena = Arena::new();
        let a = arena.insert(1);
        let b = arena.insert(2);
        let c = arena.insert(3);
        arena.remove(b);

        let cookies: Vec<_> = arena.iter().map(|(cookie, _)| cookie).collect();
        assert_eq!(cookies, vec![a, c]);
    }
}
