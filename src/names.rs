//! Cheap string interning for source labels.
//!
//! Source labels annotate who is calling through a [`crate::ChannelInterface`]
//! for diagnostic purposes only; interning keeps handles small and copyable
//! instead of embedding an owned `String` in every handle. The table is
//! process-wide but thread-local, matching the bus's single-threaded
//! contract: no locking is required, and a `Registrar` (and everything
//! reachable from it) is `!Send`, so the table never needs to cross threads.

use std::cell::RefCell;
use std::collections::HashMap;

struct Interner {
    strings: Vec<String>,
    by_value: HashMap<String, u32>,
}

impl Interner {
    fn new() -> Self {
        // id 0 is always the empty string, matching an unlabeled source.
        Interner {
            strings: vec![String::new()],
            by_value: HashMap::new(),
        }
    }

    fn intern(&mut self, s: &str) -> u32 {
        if s.is_empty() {
            return 0;
        }
        if let Some(&id) = self.by_value.get(s) {
            return id;
        }
        let id = self.strings.len() as u32;
        self.strings.push(s.to_string());
        self.by_value.insert(s.to_string(), id);
        id
    }

    fn resolve(&self, id: u32) -> &str {
        self.strings
            .get(id as usize)
            .map(String::as_str)
            .unwrap_or("")
    }
}

thread_local! {
    static TABLE: RefCell<Interner> = RefCell::new(Interner::new());
}

/// Interns `s`, returning a stable id for later resolution via [`resolve`].
pub fn intern(s: &str) -> u32 {
    TABLE.with(|t| t.borrow_mut().intern(s))
}

/// Resolves a previously interned id back to its string. Returns an empty
/// string for id `0` or any id never produced by [`intern`].
pub fn resolve(id: u32) -> String {
    TABLE.with(|t| t.borrow().resolve(id).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_id_zero() {
        assert_eq!(intern(""), 0);
        assert_eq!(resolve(0), "");
    }

    #[test]
    fn interning_is_stable_and_deduplicates() {
        let a = intern("physics");
        let b = intern("physics");
        let c = intern("render");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(resolve(a), "physics");
        assert_eq!(resolve(c), "render");
    }

    #[test]
    fn unknown_id_resolves_to_empty() {
        assert_eq!(resolve(u32::MAX), "");
    }
}
