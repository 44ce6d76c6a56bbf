use std::rc::Rc;

use crate::common::{object::ObjString, value::Value};

/// Grow once three quarters of the slots are in use (tombstones included).
const MAX_LOAD: (usize, usize) = (3, 4);

/// Capacity starts here and doubles; always a power of two,
/// so probing can mask instead of dividing.
const FIRST_CAPACITY: usize = 8;

/// An open-addressing hash map from interned strings to values,
/// probing linearly.
/// Because keys are interned, identity comparison is all lookup needs;
/// the one place that must compare bytes (interning itself)
/// goes through [`Table::find_string`] instead.
///
/// Deleted slots become tombstones (no key, value `true`)
/// so probe chains stay intact; `find_entry` hands a tombstone back
/// for reuse only after confirming the key is absent.
/// Iteration order is unspecified.
#[derive(Debug, Clone, Default)]
pub struct Table {
    /// Live entries plus tombstones.
    count: usize,
    entries: Vec<Entry>,
}

#[derive(Debug, Clone)]
struct Entry {
    key: Option<Rc<ObjString>>,
    value: Value,
}

impl Entry {
    fn vacant() -> Entry {
        Entry { key: None, value: Value::Nil }
    }

    fn is_tombstone(&self) -> bool {
        self.key.is_none() && !matches!(self.value, Value::Nil)
    }
}

impl Table {
    pub fn new() -> Table {
        Table { count: 0, entries: vec![] }
    }

    /// The slot `key` lives in, or the slot it would live in.
    /// Returns the first tombstone passed on the way, if any,
    /// so `set` can reuse it.
    /// The load factor cap guarantees a vacant slot exists,
    /// so probing always terminates.
    fn find_entry(&self, key: &Rc<ObjString>) -> usize {
        let mask = self.entries.len() - 1;
        let mut index = key.hash as usize & mask;
        let mut tombstone = None;

        loop {
            let entry = &self.entries[index];
            match &entry.key {
                None if !entry.is_tombstone() => return tombstone.unwrap_or(index),
                None => tombstone = tombstone.or(Some(index)),
                Some(found) if Rc::ptr_eq(found, key) => return index,
                Some(_) => {}
            }

            index = (index + 1) & mask;
        }
    }

    pub fn get(&self, key: &Rc<ObjString>) -> Option<&Value> {
        if self.entries.is_empty() {
            return None;
        }

        let entry = &self.entries[self.find_entry(key)];
        entry.key.as_ref().map(|_| &entry.value)
    }

    /// Inserts or overwrites, reporting whether the key was new.
    pub fn set(&mut self, key: Rc<ObjString>, value: Value) -> bool {
        if (self.count + 1) * MAX_LOAD.1 > self.entries.len() * MAX_LOAD.0 {
            self.grow();
        }

        let index = self.find_entry(&key);
        let entry = &mut self.entries[index];
        let is_new = entry.key.is_none();

        // a reused tombstone is already in the count
        if is_new && !entry.is_tombstone() {
            self.count += 1;
        }

        entry.key = Some(key);
        entry.value = value;
        is_new
    }

    /// Removes a key, reporting whether it was present.
    /// The slot becomes a tombstone, not a vacancy,
    /// so later probes still walk past it.
    pub fn delete(&mut self, key: &Rc<ObjString>) -> bool {
        if self.entries.is_empty() {
            return false;
        }

        let index = self.find_entry(key);
        let entry = &mut self.entries[index];
        if entry.key.is_none() {
            return false;
        }

        entry.key = None;
        entry.value = Value::Boolean(true);
        true
    }

    /// The byte-comparing lookup interning is built on: finds a live key
    /// equal to `chars`, checking length, then hash, then bytes.
    pub fn find_string(&self, chars: &str, hash: u32) -> Option<Rc<ObjString>> {
        if self.entries.is_empty() {
            return None;
        }

        let mask = self.entries.len() - 1;
        let mut index = hash as usize & mask;

        loop {
            let entry = &self.entries[index];
            match &entry.key {
                None if !entry.is_tombstone() => return None,
                None => {}
                Some(key) => {
                    if key.chars.len() == chars.len()
                        && key.hash == hash
                        && &*key.chars == chars
                    {
                        return Some(Rc::clone(key));
                    }
                }
            }

            index = (index + 1) & mask;
        }
    }

    /// Doubles capacity and reinserts every live entry.
    /// Tombstones are dropped here, so the count is recomputed.
    fn grow(&mut self) {
        let capacity = (self.entries.len() * 2).max(FIRST_CAPACITY);
        let mut entries = vec![Entry::vacant(); capacity];
        let mask = capacity - 1;
        let mut count = 0;

        for entry in self.entries.drain(..) {
            let key = match entry.key {
                Some(key) => key,
                None => continue,
            };

            let mut index = key.hash as usize & mask;
            while entries[index].key.is_some() {
                index = (index + 1) & mask;
            }

            entries[index] = Entry { key: Some(key), value: entry.value };
            count += 1;
        }

        self.entries = entries;
        self.count = count;
    }
}

/// The string interner: a `Table` used as a set,
/// mapping every live string to `nil` purely for deduplication.
/// Every string construction site in the whole system funnels through
/// [`Strings::intern`], which is what makes identity equality sound.
#[derive(Debug, Clone, Default)]
pub struct Strings {
    table: Table,
}

impl Strings {
    pub fn new() -> Strings {
        Strings { table: Table::new() }
    }

    /// The one copy of `chars` the system is allowed to hold.
    /// Returns the existing string when there is one,
    /// and allocates (and remembers) a fresh one otherwise.
    pub fn intern(&mut self, chars: &str) -> Rc<ObjString> {
        let hash = ObjString::hash_of(chars);
        if let Some(existing) = self.table.find_string(chars, hash) {
            return existing;
        }

        let string = Rc::new(ObjString { chars: chars.into(), hash });
        self.table.set(Rc::clone(&string), Value::Nil);
        string
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use proptest::prelude::*;
    use std::collections::HashMap;

    fn key(strings: &mut Strings, chars: &str) -> Rc<ObjString> {
        strings.intern(chars)
    }

    #[test]
    fn set_get() {
        let mut strings = Strings::new();
        let mut table = Table::new();
        let heck = key(&mut strings, "heck");

        assert!(table.set(Rc::clone(&heck), Value::Number(1.0)));
        assert_eq!(table.get(&heck), Some(&Value::Number(1.0)));

        // overwriting is not a new key
        assert!(!table.set(Rc::clone(&heck), Value::Number(2.0)));
        assert_eq!(table.get(&heck), Some(&Value::Number(2.0)));
    }

    #[test]
    fn missing_key() {
        let mut strings = Strings::new();
        let table = Table::new();
        assert_eq!(table.get(&key(&mut strings, "nope")), None);
    }

    #[test]
    fn delete_leaves_probes_intact() {
        let mut strings = Strings::new();
        let mut table = Table::new();

        // enough keys to force collisions at capacity 8
        let keys: Vec<_> = (0..6)
            .map(|i| key(&mut strings, &format!("key-{}", i)))
            .collect();
        for (i, k) in keys.iter().enumerate() {
            table.set(Rc::clone(k), Value::Number(i as f64));
        }

        assert!(table.delete(&keys[2]));
        assert!(!table.delete(&keys[2]));

        // everything else still reachable past the tombstone
        for (i, k) in keys.iter().enumerate() {
            if i == 2 {
                assert_eq!(table.get(k), None);
            } else {
                assert_eq!(table.get(k), Some(&Value::Number(i as f64)));
            }
        }
    }

    #[test]
    fn tombstone_slot_is_reused() {
        let mut strings = Strings::new();
        let mut table = Table::new();
        let a = key(&mut strings, "a");

        table.set(Rc::clone(&a), Value::Nil);
        table.delete(&a);
        assert!(table.set(Rc::clone(&a), Value::Boolean(false)));
        assert_eq!(table.get(&a), Some(&Value::Boolean(false)));
    }

    #[test]
    fn interning_dedupes() {
        let mut strings = Strings::new();
        let a = strings.intern("fledgling");
        let b = strings.intern("fledgling");
        let c = strings.intern("fledglinG");

        assert!(Rc::ptr_eq(&a, &b));
        assert!(!Rc::ptr_eq(&a, &c));
    }

    #[test]
    fn interning_survives_growth() {
        let mut strings = Strings::new();
        let early = strings.intern("early bird");
        for i in 0..100 {
            strings.intern(&format!("filler-{}", i));
        }
        assert!(Rc::ptr_eq(&early, &strings.intern("early bird")));
    }

    proptest! {
        /// The table agrees with a model `HashMap` under any
        /// interleaving of inserts and deletes.
        #[test]
        fn behaves_like_a_map(
            ops in proptest::collection::vec(
                (0u8..32, proptest::option::of(0f64..100.0)),
                0..300,
            )
        ) {
            let mut strings = Strings::new();
            let mut table = Table::new();
            let mut model: HashMap<u8, f64> = HashMap::new();

            for (slot, op) in ops {
                let k = strings.intern(&format!("slot-{}", slot));
                match op {
                    Some(number) => {
                        let new = table.set(Rc::clone(&k), Value::Number(number));
                        prop_assert_eq!(new, model.insert(slot, number).is_none());
                    }
                    None => {
                        let existed = table.delete(&k);
                        prop_assert_eq!(existed, model.remove(&slot).is_some());
                    }
                }
            }

            for (slot, number) in model {
                let k = strings.intern(&format!("slot-{}", slot));
                prop_assert_eq!(table.get(&k), Some(&Value::Number(number)));
            }
        }
    }
}
