// Heap-backed objects. Strings are interned through the Interner so equal
// literals share one allocation; views borrow a window of an interned base.
// Functions own their bytecode chunk; natives wrap a host function pointer.

use crate::chunk::Chunk;
use crate::hashmap::{hash_str, Hashmap};
use crate::value::Value;
use crate::vm::{RuntimeError, Vm};
use std::rc::Rc;

#[derive(Debug)]
pub struct Str {
    pub chars: Box<str>,
    pub hash: usize,
}

impl Str {
    pub fn len(&self) -> usize {
        self.chars.len()
    }
}

// A non-owning slice of an interned string, produced by slicing.
#[derive(Debug)]
pub struct StrView {
    pub base: Rc<Str>,
    pub start: usize,
    pub len: usize,
}

impl StrView {
    pub fn as_str(&self) -> &str {
        &self.base.chars[self.start..self.start + self.len]
    }
}

#[derive(Debug)]
pub struct Function {
    pub name: Rc<Str>,
    pub arity: usize,
    pub chunk: Chunk,
}

impl Function {
    pub fn new(name: Rc<Str>) -> Function {
        Function {
            name,
            arity: 0,
            chunk: Chunk::new(),
        }
    }
}

pub type NativeFn = fn(&mut Vm, &[Value]) -> Result<Value, RuntimeError>;

// arity < 0 means variadic.
#[derive(Debug)]
pub struct Native {
    pub name: Rc<Str>,
    pub arity: i32,
    pub function: NativeFn,
}

// The interning table. Keys are Str values, payloads are unused; lookup by
// raw text goes through the content-addressed get_str path so no allocation
// happens for an already-interned string.
#[derive(Debug)]
pub struct Interner {
    map: Hashmap,
}

impl Interner {
    pub fn new() -> Interner {
        Interner {
            map: Hashmap::new(1024),
        }
    }

    pub fn intern(&mut self, text: &str) -> Rc<Str> {
        let hash = hash_str(text.as_bytes());
        if let Some(existing) = self.map.get_str(text, hash) {
            return existing;
        }
        let string = Rc::new(Str {
            chars: text.into(),
            hash,
        });
        self.map.add(Value::Str(string.clone()), Value::Nil);
        string
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interning_dedupes() {
        let mut interner = Interner::new();
        let a = interner.intern("abc");
        let b = interner.intern("abc");
        let c = interner.intern("abd");
        assert!(Rc::ptr_eq(&a, &b));
        assert!(!Rc::ptr_eq(&a, &c));
        assert_eq!(interner.len(), 2);
    }

    #[test]
    fn test_view_window() {
        let mut interner = Interner::new();
        let base = interner.intern("hello world");
        let view = StrView {
            base,
            start: 6,
            len: 5,
        };
        assert_eq!(view.as_str(), "world");
    }
}
