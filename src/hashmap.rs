// Open-addressed Value -> Value hashmap. Capacity is kept at a power of two
// so the ideal index is a mask of the hash; collisions walk a quadratic
// probe sequence (with a linear fallback scheme) bounded by max_collisions.
// `add` is an insert-only primitive and never replaces an existing key;
// `set` is the replace-only path. Removal just empties the slot: the probe
// chain stays intact because the interner never removes and globals rarely do.

use crate::object::Str;
use crate::value::Value;
use std::rc::Rc;
use tracing::warn;

pub fn hash_str(bytes: &[u8]) -> usize {
    // FNV-1a
    let mut hash: u32 = 2166136261;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash as usize
}

pub fn hash_int(elem: u32) -> usize {
    let c2: u32 = 0x27d4eb2d;
    let mut e = (elem ^ 61) ^ (elem >> 16);
    e = e.wrapping_add(e << 3);
    e ^= e >> 4;
    e = e.wrapping_mul(c2);
    e ^= e >> 15;
    e as usize
}

// Hash any value. Numeric values of equal widened value hash alike, which
// keeps lookups consistent with the widening equality rules.
pub fn hash_value(value: &Value) -> usize {
    match value {
        Value::Nil => hash_int(0),
        Value::Bool(b) => hash_int(*b as u32),
        Value::Int(i) => hash_int(*i as u32),
        Value::Double(d) => hash_int(*d as i32 as u32),
        Value::Complex(c) => hash_int(c.re as i32 as u32),
        Value::Str(s) => s.hash,
        Value::View(v) => hash_str(v.as_str().as_bytes()),
        Value::Function(f) => f.name.hash,
        Value::Native(n) => n.name.hash,
        Value::Array(a) => hash_int(a.borrow().len() as u32),
        Value::Map(m) => hash_int(m.borrow().len() as u32),
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Probe {
    Quadratic,
    Linear,
}

#[derive(Clone, Debug)]
struct Slot {
    key: Value,
    value: Value,
}

#[derive(Clone, Debug)]
pub struct Hashmap {
    entries: Vec<Option<Slot>>,
    total: usize,
    max_collisions: usize,
    probe: Probe,
}

impl Hashmap {
    pub fn new(capacity: usize) -> Hashmap {
        let capacity = capacity.max(1).next_power_of_two();
        Hashmap {
            entries: vec![None; capacity],
            total: 0,
            max_collisions: capacity.min(16),
            probe: Probe::Quadratic,
        }
    }

    pub fn len(&self) -> usize {
        self.total
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    fn step(&self, index: usize) -> usize {
        let mask = self.capacity() - 1;
        match self.probe {
            Probe::Quadratic => index.wrapping_mul(index).wrapping_add(1) & mask,
            Probe::Linear => (index + 1) & mask,
        }
    }

    // Walk the probe sequence until the key's slot or an empty slot turns
    // up. None means the chain was exhausted without finding either.
    fn find(&self, key: &Value) -> Option<usize> {
        let mut index = hash_value(key) & (self.capacity() - 1);
        let mut collisions = 0;
        while collisions < self.max_collisions {
            match &self.entries[index] {
                None => return Some(index),
                Some(slot) if slot.key == *key => return Some(index),
                _ => {}
            }
            index = self.step(index);
            collisions += 1;
        }
        None
    }

    fn add_without_grow(&mut self, key: Value, value: Value) -> bool {
        match self.find(&key) {
            Some(index) if self.entries[index].is_none() => {
                self.entries[index] = Some(Slot { key, value });
                self.total += 1;
                true
            }
            // Present already, or the probe chain is saturated.
            _ => false,
        }
    }

    // Insert-only. Existing keys are left untouched; a true return means the
    // key was genuinely added. Doubles the table at a load factor of 1/2.
    pub fn add(&mut self, key: Value, value: Value) -> bool {
        if self.total * 2 > self.capacity() {
            self.grow(2);
        }
        self.add_without_grow(key, value)
    }

    // Replace-only. Returns false (and inserts nothing) for a missing key.
    pub fn set(&mut self, key: &Value, value: Value) -> bool {
        match self.find(key) {
            Some(index) if self.entries[index].is_some() => {
                self.entries[index].as_mut().unwrap().value = value;
                true
            }
            _ => false,
        }
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        match self.find(key) {
            Some(index) => self.entries[index].as_ref().map(|slot| slot.value.clone()),
            None => None,
        }
    }

    // Content-addressed lookup of an interned string key. Compares length
    // and hash before the bytes, and allocates nothing.
    pub fn get_str(&self, text: &str, hash: usize) -> Option<Rc<Str>> {
        let mut index = hash & (self.capacity() - 1);
        let mut collisions = 0;
        while collisions < self.max_collisions {
            match &self.entries[index] {
                None => return None,
                Some(slot) => {
                    if let Value::Str(key) = &slot.key {
                        if key.len() == text.len()
                            && key.hash == hash
                            && &*key.chars == text
                        {
                            return Some(key.clone());
                        }
                    }
                }
            }
            index = self.step(index);
            collisions += 1;
        }
        None
    }

    pub fn remove(&mut self, key: &Value) -> bool {
        match self.find(key) {
            Some(index) if self.entries[index].is_some() => {
                self.entries[index] = None;
                self.total -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.entries
            .iter()
            .filter_map(|slot| slot.as_ref().map(|s| (&s.key, &s.value)))
    }

    // Rehash into a fresh table of factor times the capacity. The probe
    // parameters carry over unchanged.
    fn grow(&mut self, factor: usize) {
        let factor = if (2..=10).contains(&factor) { factor } else { 2 };
        let mut grown = Hashmap::new(self.capacity() * factor);
        grown.max_collisions = self.max_collisions;
        grown.probe = self.probe;
        for (key, value) in self.iter() {
            if !grown.add_without_grow(key.clone(), value.clone()) {
                warn!("resize dropped a key: {}", key);
            }
        }
        if grown.total != self.total {
            warn!(
                "resize failure? new size={} old size={}",
                grown.total, self.total
            );
        }
        *self = grown;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::Interner;

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        for (requested, expect) in [(0, 1), (1, 1), (3, 4), (8, 8), (9, 16), (500, 512)] {
            let map = Hashmap::new(requested);
            assert_eq!(map.capacity(), expect);
        }
    }

    #[test]
    fn test_add_is_insert_only() {
        let mut map = Hashmap::new(8);
        assert!(map.add(Value::Int(1), Value::Int(10)));
        assert!(!map.add(Value::Int(1), Value::Int(20)));
        assert_eq!(map.get(&Value::Int(1)), Some(Value::Int(10)));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn test_set_is_replace_only() {
        let mut map = Hashmap::new(8);
        assert!(!map.set(&Value::Int(1), Value::Int(10)));
        assert!(map.is_empty());
        map.add(Value::Int(1), Value::Int(10));
        assert!(map.set(&Value::Int(1), Value::Int(20)));
        assert_eq!(map.get(&Value::Int(1)), Some(Value::Int(20)));
    }

    #[test]
    fn test_remove() {
        let mut map = Hashmap::new(8);
        map.add(Value::Int(1), Value::Nil);
        assert!(map.remove(&Value::Int(1)));
        assert!(!map.remove(&Value::Int(1)));
        assert_eq!(map.get(&Value::Int(1)), None);
        assert!(map.is_empty());
    }

    #[test]
    fn test_growth_keeps_entries() {
        let mut map = Hashmap::new(4);
        for i in 0..100 {
            map.add(Value::Int(i), Value::Int(i * 2));
        }
        assert!(map.capacity().is_power_of_two());
        assert!(map.len() <= map.capacity());
        let mut found = 0;
        for i in 0..100 {
            if let Some(v) = map.get(&Value::Int(i)) {
                assert_eq!(v, Value::Int(i * 2));
                found += 1;
            }
        }
        // The bounded probe chain may reject a handful of adds, but growth
        // must never lose a key that was accepted.
        assert_eq!(found, map.len());
    }

    #[test]
    fn test_string_keys_and_get_str() {
        let mut interner = Interner::new();
        let key = interner.intern("answer");
        let mut map = Hashmap::new(8);
        map.add(Value::Str(key.clone()), Value::Int(42));
        assert_eq!(map.get(&Value::Str(key)), Some(Value::Int(42)));

        let hash = hash_str(b"answer");
        let found = map.get_str("answer", hash).expect("interned lookup");
        assert_eq!(&*found.chars, "answer");
        assert!(map.get_str("missing", hash_str(b"missing")).is_none());
    }

    #[test]
    fn test_linear_probing_fallback() {
        let mut map = Hashmap::new(16);
        map.probe = Probe::Linear;
        for i in 0..8 {
            assert!(map.add(Value::Int(i), Value::Int(i)));
        }
        for i in 0..8 {
            assert_eq!(map.get(&Value::Int(i)), Some(Value::Int(i)));
        }
        assert!(map.remove(&Value::Int(3)));
        assert_eq!(map.get(&Value::Int(3)), None);
    }

    #[test]
    fn test_iter_skips_empties() {
        let mut map = Hashmap::new(8);
        map.add(Value::Int(1), Value::Int(10));
        map.add(Value::Int(2), Value::Int(20));
        map.remove(&Value::Int(1));
        let pairs: Vec<_> = map.iter().collect();
        assert_eq!(pairs.len(), 1);
        assert_eq!(*pairs[0].0, Value::Int(2));
    }

    #[test]
    fn test_nil_value_is_distinguishable_from_missing() {
        let mut map = Hashmap::new(8);
        map.add(Value::Int(1), Value::Nil);
        assert_eq!(map.get(&Value::Int(1)), Some(Value::Nil));
        assert_eq!(map.get(&Value::Int(2)), None);
    }

    #[test]
    fn test_widened_numeric_keys_collide() {
        let mut map = Hashmap::new(8);
        map.add(Value::Int(3), Value::Int(1));
        // 3.0 equals 3 and hashes alike, so this is the same key
        assert!(!map.add(Value::Double(3.0), Value::Int(2)));
        assert_eq!(map.get(&Value::Double(3.0)), Some(Value::Int(1)));
    }
}
