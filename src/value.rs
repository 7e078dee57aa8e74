// Runtime values. A Value is a small tagged union; everything heap-backed
// sits behind an Rc so the stack can copy values freely. Numeric operands
// widen int -> double -> complex, and bool shares the int representation.

use crate::complex::Complex;
use crate::hashmap::Hashmap;
use crate::object::{Function, Native, Str, StrView};
use enumflags2::BitFlags;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

// Discriminant of a Value, usable in sets for type errors.
#[derive(BitFlags, Copy, Clone, Debug, PartialEq)]
#[repr(u16)]
pub enum TypeTag {
    Nil = 0b00000000001,
    Bool = 0b00000000010,
    Int = 0b00000000100,
    Double = 0b00000001000,
    Complex = 0b00000010000,
    Str = 0b00000100000,
    StrView = 0b00001000000,
    Array = 0b00010000000,
    Map = 0b00100000000,
    Function = 0b01000000000,
    Native = 0b10000000000,
}

pub type TypeSet = BitFlags<TypeTag>;

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            TypeTag::Nil => "nil",
            TypeTag::Bool => "bool",
            TypeTag::Int => "int",
            TypeTag::Double => "double",
            TypeTag::Complex => "complex",
            TypeTag::Str => "string",
            TypeTag::StrView => "string view",
            TypeTag::Array => "array",
            TypeTag::Map => "hashmap",
            TypeTag::Function => "function",
            TypeTag::Native => "native",
        };
        write!(f, "{}", name)
    }
}

// Render a TypeSet for error messages, e.g. "int or double".
pub fn describe_set(set: TypeSet) -> String {
    let names: Vec<String> = set.iter().map(|t| t.to_string()).collect();
    names.join(" or ")
}

#[derive(Clone, Debug)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i32),
    Double(f64),
    Complex(Complex),
    Str(Rc<Str>),
    View(Rc<StrView>),
    Array(Rc<RefCell<Vec<Value>>>),
    Map(Rc<RefCell<Hashmap>>),
    Function(Rc<Function>),
    Native(Rc<Native>),
}

impl Value {
    pub fn array(values: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(values)))
    }

    pub fn map(map: Hashmap) -> Value {
        Value::Map(Rc::new(RefCell::new(map)))
    }

    pub fn type_tag(&self) -> TypeTag {
        match self {
            Value::Nil => TypeTag::Nil,
            Value::Bool(_) => TypeTag::Bool,
            Value::Int(_) => TypeTag::Int,
            Value::Double(_) => TypeTag::Double,
            Value::Complex(_) => TypeTag::Complex,
            Value::Str(_) => TypeTag::Str,
            Value::View(_) => TypeTag::StrView,
            Value::Array(_) => TypeTag::Array,
            Value::Map(_) => TypeTag::Map,
            Value::Function(_) => TypeTag::Function,
            Value::Native(_) => TypeTag::Native,
        }
    }

    // Only nil and false are falsey; 0, "" and [] are all truthy.
    pub fn is_falsey(&self) -> bool {
        matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Value::Bool(_) | Value::Int(_) | Value::Double(_) | Value::Complex(_)
        )
    }

    // Numeric zero of any width. Used by the division guard.
    pub fn is_zero(&self) -> bool {
        match self {
            Value::Bool(b) => !b,
            Value::Int(i) => *i == 0,
            Value::Double(d) => *d == 0.0,
            Value::Complex(c) => c.is_zero(),
            _ => false,
        }
    }

    pub fn coerce_int(&self) -> Option<i32> {
        match self {
            Value::Bool(b) => Some(*b as i32),
            Value::Int(i) => Some(*i),
            Value::Double(d) => Some(*d as i32),
            _ => None,
        }
    }

    pub fn coerce_double(&self) -> Option<f64> {
        match self {
            Value::Bool(b) => Some(*b as i32 as f64),
            Value::Int(i) => Some(*i as f64),
            Value::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn coerce_complex(&self) -> Option<Complex> {
        match self {
            Value::Complex(c) => Some(*c),
            _ => self.coerce_double().map(|d| Complex::new(d as f32, 0.0)),
        }
    }

    // Shared view of the text of either string flavor.
    pub fn string_slice(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(&s.chars),
            Value::View(v) => Some(v.as_str()),
            _ => None,
        }
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Value::Str(_) | Value::View(_))
    }

    fn fmt_value(&self, f: &mut fmt::Formatter, quoted: bool) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Double(d) => fmt_double(f, *d),
            Value::Complex(c) => fmt_complex(f, *c),
            Value::Str(_) | Value::View(_) => {
                let text = self.string_slice().unwrap();
                if quoted {
                    fmt_quoted(f, text)
                } else {
                    write!(f, "{}", text)
                }
            }
            Value::Array(values) => {
                write!(f, "[")?;
                let values = values.borrow();
                for (i, v) in values.iter().enumerate() {
                    v.fmt_value(f, true)?;
                    if i + 1 < values.len() {
                        write!(f, ", ")?;
                    }
                }
                write!(f, "]")
            }
            Value::Map(map) => {
                write!(f, "{{")?;
                let map = map.borrow();
                let total = map.len();
                for (i, (k, v)) in map.iter().enumerate() {
                    k.fmt_value(f, true)?;
                    write!(f, ": ")?;
                    v.fmt_value(f, true)?;
                    if i + 1 < total {
                        write!(f, ", ")?;
                    }
                }
                write!(f, "}}")
            }
            Value::Function(func) => write!(f, "<fn {}>", func.name.chars),
            Value::Native(native) => write!(f, "<native {}>", native.name.chars),
        }
    }
}

fn fmt_double(f: &mut fmt::Formatter, d: f64) -> fmt::Result {
    if d.is_nan() {
        write!(f, "nan")
    } else if d.is_infinite() {
        write!(f, "{}", if d > 0.0 { "inf" } else { "-inf" })
    } else {
        write!(f, "{}", d)
    }
}

fn fmt_complex(f: &mut fmt::Formatter, c: Complex) -> fmt::Result {
    if c.re == 0.0 {
        write!(f, "{}j", c.im)
    } else {
        write!(f, "({}{:+}j)", c.re, c.im)
    }
}

// Strings nested inside arrays and hashmaps print quoted. Prefer double
// quotes, switch to single quotes if the text contains a double quote, and
// fall back to escaping when it contains both.
fn fmt_quoted(f: &mut fmt::Formatter, text: &str) -> fmt::Result {
    let has_double = text.contains('"');
    let has_single = text.contains('\'');
    if has_double && has_single {
        write!(f, "\"")?;
        for c in text.chars() {
            if c == '"' {
                write!(f, "\\\"")?;
            } else {
                write!(f, "{}", c)?;
            }
        }
        write!(f, "\"")
    } else if has_double {
        write!(f, "'{}'", text)
    } else {
        write!(f, "\"{}\"", text)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        self.fmt_value(f, false)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Nil, Nil) => true,
            (Bool(a), Bool(b)) => a == b,
            (Int(a), Int(b)) => a == b,
            (Double(a), Double(b)) => a == b,
            (Complex(a), Complex(b)) => a == b,
            // Mixed numeric widths compare by widened value. Bool only
            // matches int, with which it shares a representation.
            (Int(a), Double(b)) | (Double(b), Int(a)) => *a as f64 == *b,
            (Int(a), Complex(c)) | (Complex(c), Int(a)) => c.im == 0.0 && c.re == *a as f32,
            (Double(d), Complex(c)) | (Complex(c), Double(d)) => {
                c.im == 0.0 && c.re == *d as f32
            }
            (Bool(b), Int(i)) | (Int(i), Bool(b)) => *b as i32 == *i,
            (Str(_), Str(_)) | (Str(_), View(_)) | (View(_), Str(_)) | (View(_), View(_)) => {
                self.string_slice() == other.string_slice()
            }
            (Array(a), Array(b)) => Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow(),
            (Map(a), Map(b)) => Rc::ptr_eq(a, b) || maps_equal(&a.borrow(), &b.borrow()),
            (Function(a), Function(b)) => Rc::ptr_eq(a, b),
            (Native(a), Native(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

fn maps_equal(a: &Hashmap, b: &Hashmap) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().all(|(k, v)| b.get(k).map_or(false, |bv| bv == *v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hashmap::hash_value;
    use crate::object::Interner;

    #[test]
    fn test_truthiness() {
        assert!(Value::Nil.is_falsey());
        assert!(Value::Bool(false).is_falsey());
        assert!(!Value::Bool(true).is_falsey());
        assert!(!Value::Int(0).is_falsey());
        assert!(!Value::Double(0.0).is_falsey());
        assert!(!Value::array(vec![]).is_falsey());
    }

    #[test]
    fn test_numeric_equality_widens() {
        assert_eq!(Value::Int(3), Value::Double(3.0));
        assert_eq!(Value::Double(2.0), Value::Complex(Complex::new(2.0, 0.0)));
        assert_eq!(Value::Int(1), Value::Bool(true));
        assert_eq!(Value::Int(0), Value::Bool(false));
        assert_ne!(Value::Int(3), Value::Double(3.5));
        // bool only shares representation with int
        assert_ne!(Value::Bool(true), Value::Double(1.0));
        assert_ne!(Value::Nil, Value::Int(0));
    }

    #[test]
    fn test_string_equality_by_content() {
        let mut interner = Interner::new();
        let a = interner.intern("hello");
        let b = interner.intern("hello");
        assert!(Rc::ptr_eq(&a, &b));
        assert_eq!(Value::Str(a), Value::Str(b));
    }

    #[test]
    fn test_equal_values_hash_alike() {
        let pairs = [
            (Value::Int(7), Value::Double(7.0)),
            (Value::Bool(true), Value::Int(1)),
            (Value::Nil, Value::Nil),
        ];
        for (a, b) in &pairs {
            assert_eq!(a, b);
            assert_eq!(hash_value(a), hash_value(b));
        }
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::Int(42).to_string(), "42");
        assert_eq!(Value::Double(1.5).to_string(), "1.5");
        assert_eq!(Value::Double(7.0).to_string(), "7");
        assert_eq!(Value::Double(f64::NAN).to_string(), "nan");
        assert_eq!(Value::Double(f64::INFINITY).to_string(), "inf");
        assert_eq!(Value::Complex(Complex::new(0.0, 1.0)).to_string(), "1j");
        assert_eq!(Value::Complex(Complex::new(3.0, -4.0)).to_string(), "(3-4j)");
        let mut interner = Interner::new();
        let s = Value::Str(interner.intern("ab"));
        assert_eq!(s.to_string(), "ab");
        assert_eq!(
            Value::array(vec![Value::Int(1), s]).to_string(),
            "[1, \"ab\"]"
        );
    }
}
