//! Process-wide atom table.
//!
//! Atom names are interned once in a shared [`lasso::ThreadedRodeo`] and
//! referenced by [`lasso::Spur`] keys, so atoms are `Copy`, compare by key,
//! and resolve to `&'static str` without holding a lock. Like a Prolog atom
//! table, entries are never reclaimed.

use lasso::{Spur, ThreadedRodeo};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::OnceLock;

use crate::ast::{Compound, Term};

static ATOMS: OnceLock<ThreadedRodeo> = OnceLock::new();

fn table() -> &'static ThreadedRodeo {
    ATOMS.get_or_init(ThreadedRodeo::new)
}

/// An interned atom name.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Atom(Spur);

impl Atom {
    pub fn new(name: &str) -> Self {
        Atom(table().get_or_intern(name))
    }

    pub fn as_str(&self) -> &'static str {
        table().resolve(&self.0)
    }

    /// Build the compound `self(args...)`. With no arguments this is the atom itself.
    pub fn of(self, args: Vec<Term>) -> Term {
        if args.is_empty() {
            Term::Atom(self)
        } else {
            Term::Compound(Compound {
                functor: self,
                args,
            })
        }
    }
}

impl fmt::Debug for Atom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Atom({:?})", self.as_str())
    }
}

impl From<&str> for Atom {
    fn from(name: &str) -> Self {
        Atom::new(name)
    }
}

impl From<String> for Atom {
    fn from(name: String) -> Self {
        Atom::new(&name)
    }
}

impl PartialEq<&str> for Atom {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl Serialize for Atom {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Atom {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        Ok(Atom::new(&name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_name_same_key() {
        let a = Atom::new("hello");
        let b = Atom::from("hello");
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "hello");
    }

    #[test]
    fn distinct_names_distinct_keys() {
        assert_ne!(Atom::new("foo"), Atom::new("bar"));
    }

    #[test]
    fn unicode_names_resolve() {
        let a = Atom::new("世界");
        assert_eq!(a.as_str(), "世界");
        assert_eq!(a, "世界");
    }

    #[test]
    fn of_without_args_is_atom() {
        assert_eq!(Atom::new("x").of(vec![]), Term::Atom(Atom::new("x")));
    }

    #[test]
    fn atoms_are_shared_across_threads() {
        let handle = std::thread::spawn(|| Atom::new("threaded"));
        let remote = handle.join().unwrap();
        assert_eq!(remote, Atom::new("threaded"));
    }
}
