// Native functions registered into the global table at VM startup: the
// clock, call-site introspection, variadic printing, hashmap introspection,
// array mutation, the real math library, and the complex math library.

use crate::clock::PROCESS_CLOCK;
use crate::complex::{Complex, I};
use crate::object::NativeFn;
use crate::value::Value;
use crate::vm::{RuntimeError, Vm};
use std::f64::consts::PI;
use std::io::Write;

fn numeric_arg(name: &str, args: &[Value], index: usize) -> Result<f64, RuntimeError> {
    let value = args
        .get(index)
        .ok_or_else(|| RuntimeError::Message(format!("{} expects at least 1 argument", name)))?;
    value
        .coerce_double()
        .ok_or_else(|| RuntimeError::Message(format!("{} expects a number", name)))
}

fn complex_arg(name: &str, args: &[Value], index: usize) -> Result<Complex, RuntimeError> {
    let value = args
        .get(index)
        .ok_or_else(|| RuntimeError::Message(format!("{} expects at least 1 argument", name)))?;
    value
        .coerce_complex()
        .ok_or_else(|| RuntimeError::Message(format!("{} expects a number", name)))
}

// One double in, one double out.
macro_rules! double_native {
    ($fname:ident, $name:expr, |$x:ident| $body:expr) => {
        fn $fname(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
            let $x = numeric_arg($name, args, 0)?;
            Ok(Value::Double($body))
        }
    };
}

macro_rules! double_native2 {
    ($fname:ident, $name:expr, |$a:ident, $b:ident| $body:expr) => {
        fn $fname(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
            let $a = numeric_arg($name, args, 0)?;
            let $b = numeric_arg($name, args, 1)?;
            Ok(Value::Double($body))
        }
    };
}

// One complex in, any value out.
macro_rules! complex_native {
    ($fname:ident, $name:expr, |$z:ident| $body:expr) => {
        fn $fname(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
            let $z = complex_arg($name, args, 0)?;
            Ok($body)
        }
    };
}

// ---- position and output natives ------------------------------------

fn native_clock(_vm: &mut Vm, _args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::Double(PROCESS_CLOCK.seconds()))
}

fn native_line(vm: &mut Vm, _args: &[Value]) -> Result<Value, RuntimeError> {
    let (line, _) = vm.current_position();
    Ok(Value::Int(line as i32))
}

fn native_col(vm: &mut Vm, _args: &[Value]) -> Result<Value, RuntimeError> {
    let (_, column) = vm.current_position();
    Ok(Value::Int(column as i32))
}

fn native_prints(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    for value in args {
        let _ = write!(vm.output(), "{}", value);
    }
    Ok(Value::Nil)
}

// ---- introspection ---------------------------------------------------

fn native_globals(vm: &mut Vm, _args: &[Value]) -> Result<Value, RuntimeError> {
    Ok(Value::map(vm.globals_snapshot()))
}

fn native_keys_and_values(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    match args.get(0) {
        Some(Value::Map(map)) => {
            let map = map.borrow();
            let mut keys = Vec::with_capacity(map.len());
            let mut values = Vec::with_capacity(map.len());
            for (k, v) in map.iter() {
                keys.push(k.clone());
                values.push(v.clone());
            }
            Ok(Value::array(vec![
                Value::array(keys),
                Value::array(values),
            ]))
        }
        _ => Ok(Value::Nil),
    }
}

fn native_keys(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    match native_keys_and_values(vm, args)? {
        Value::Array(pair) => Ok(pair.borrow()[0].clone()),
        other => Ok(other),
    }
}

fn native_values(vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    match native_keys_and_values(vm, args)? {
        Value::Array(pair) => Ok(pair.borrow()[1].clone()),
        other => Ok(other),
    }
}

// ---- array mutation --------------------------------------------------

// setArray(array, index, value): replace in range, append at the end.
fn native_set_array(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let values = match args.get(0) {
        Some(Value::Array(values)) => values,
        _ => {
            return Err(RuntimeError::Message(
                "setArray expects an array".to_string(),
            ))
        }
    };
    let mut values = values.borrow_mut();
    let length = values.len() as i32;
    let mut index = match args.get(1) {
        Some(Value::Int(i)) => *i,
        _ => {
            return Err(RuntimeError::Message(
                "setArray expects an integer index".to_string(),
            ))
        }
    };
    if index < 0 {
        index += length;
    }
    let value = args[2].clone();
    if index == length {
        values.push(value);
    } else if index >= 0 && index < length {
        values[index as usize] = value;
    }
    Ok(Value::Nil)
}

fn native_rm_array_top(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    if let Some(Value::Array(values)) = args.get(0) {
        values.borrow_mut().pop();
    }
    Ok(Value::Nil)
}

// ---- real math -------------------------------------------------------

double_native!(native_sqrt, "sqrt", |x| x.sqrt());
double_native!(native_exp, "exp", |x| x.exp());
double_native!(native_exp2, "exp2", |x| x.exp2());
double_native!(native_expm1, "expm1", |x| x.exp_m1());
double_native!(native_log, "log", |x| x.ln());
double_native!(native_log10, "log10", |x| x.log10());
double_native!(native_log2, "log2", |x| x.log2());
double_native!(native_log1p, "log1p", |x| x.ln_1p());
double_native!(native_fabs, "fabs", |x| x.abs());
double_native!(native_cbrt, "cbrt", |x| x.cbrt());
double_native!(native_sin, "sin", |x| x.sin());
double_native!(native_cos, "cos", |x| x.cos());
double_native!(native_tan, "tan", |x| x.tan());
double_native!(native_asin, "asin", |x| x.asin());
double_native!(native_acos, "acos", |x| x.acos());
double_native!(native_atan, "atan", |x| x.atan());
double_native!(native_sinh, "sinh", |x| x.sinh());
double_native!(native_cosh, "cosh", |x| x.cosh());
double_native!(native_tanh, "tanh", |x| x.tanh());
double_native!(native_asinh, "asinh", |x| x.asinh());
double_native!(native_acosh, "acosh", |x| x.acosh());
double_native!(native_atanh, "atanh", |x| x.atanh());
double_native!(native_erf, "erf", |x| erf(x));
double_native!(native_erfc, "erfc", |x| 1.0 - erf(x));
double_native!(native_tgamma, "tgamma", |x| tgamma(x));
double_native!(native_lgamma, "lgamma", |x| lgamma(x));

double_native2!(native_fmod, "fmod", |a, b| a % b);
double_native2!(native_remainder, "remainder", |a, b| ieee_remainder(a, b));
double_native2!(native_fmax, "fmax", |a, b| a.max(b));
double_native2!(native_fmin, "fmin", |a, b| a.min(b));
double_native2!(native_fdim, "fdim", |a, b| (a - b).max(0.0));
double_native2!(native_pow, "pow", |a, b| a.powf(b));
double_native2!(native_hypot, "hypot", |a, b| a.hypot(b));
double_native2!(native_atan2, "atan2", |a, b| a.atan2(b));

fn native_fma(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let a = numeric_arg("fma", args, 0)?;
    let b = numeric_arg("fma", args, 1)?;
    let c = numeric_arg("fma", args, 2)?;
    Ok(Value::Double(a.mul_add(b, c)))
}

// IEEE remainder: the quotient rounds to the nearest integer, ties to even.
fn ieee_remainder(a: f64, b: f64) -> f64 {
    let q = a / b;
    let mut n = q.round();
    if (q - q.trunc()).abs() == 0.5 {
        n = 2.0 * (q / 2.0).round();
    }
    a - b * n
}

// Abramowitz & Stegun 7.1.26, good to about 1.5e-7.
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.3275911 * x);
    let poly = ((((1.061405429 * t - 1.453152027) * t + 1.421413741) * t - 0.284496736) * t
        + 0.254829592)
        * t;
    sign * (1.0 - poly * (-x * x).exp())
}

// Lanczos approximation, g = 7.
const LANCZOS: [f64; 9] = [
    0.99999999999980993,
    676.5203681218851,
    -1259.1392167224028,
    771.32342877765313,
    -176.61502916214059,
    12.507343278686905,
    -0.13857109526572012,
    9.9843695780195716e-6,
    1.5056327351493116e-7,
];

fn tgamma(x: f64) -> f64 {
    if x < 0.5 {
        PI / ((PI * x).sin() * tgamma(1.0 - x))
    } else {
        let x = x - 1.0;
        let mut a = LANCZOS[0];
        let t = x + 7.5;
        for (i, &c) in LANCZOS.iter().enumerate().skip(1) {
            a += c / (x + i as f64);
        }
        (2.0 * PI).sqrt() * t.powf(x + 0.5) * (-t).exp() * a
    }
}

fn lgamma(x: f64) -> f64 {
    if x < 0.5 {
        (PI / (PI * x).sin()).abs().ln() - lgamma(1.0 - x)
    } else {
        tgamma(x).abs().ln()
    }
}

// ---- complex math ----------------------------------------------------

complex_native!(native_cabs, "cabs", |z| Value::Double(z.abs()));
complex_native!(native_carg, "carg", |z| Value::Double(z.arg()));
complex_native!(native_cimag, "cimag", |z| Value::Double(z.im as f64));
complex_native!(native_creal, "creal", |z| Value::Complex(Complex::new(
    z.re, 0.0
)));
complex_native!(native_conj, "conj", |z| Value::Complex(z.conj()));
complex_native!(native_cproj, "cproj", |z| Value::Complex(z.proj()));
complex_native!(native_cexp, "cexp", |z| Value::Complex(z.exp()));
complex_native!(native_clog, "clog", |z| Value::Complex(z.ln()));
complex_native!(native_csqrt, "csqrt", |z| Value::Complex(z.sqrt()));
complex_native!(native_csin, "csin", |z| Value::Complex(z.sin()));
complex_native!(native_ccos, "ccos", |z| Value::Complex(z.cos()));
complex_native!(native_ctan, "ctan", |z| Value::Complex(z.tan()));
complex_native!(native_csinh, "csinh", |z| Value::Complex(z.sinh()));
complex_native!(native_ccosh, "ccosh", |z| Value::Complex(z.cosh()));
complex_native!(native_ctanh, "ctanh", |z| Value::Complex(z.tanh()));
complex_native!(native_casin, "casin", |z| Value::Complex(z.asin()));
complex_native!(native_cacos, "cacos", |z| Value::Complex(z.acos()));
complex_native!(native_catan, "catan", |z| Value::Complex(z.atan()));
complex_native!(native_casinh, "casinh", |z| Value::Complex(z.asinh()));
complex_native!(native_cacosh, "cacosh", |z| Value::Complex(z.acosh()));
complex_native!(native_catanh, "catanh", |z| Value::Complex(z.atanh()));

fn native_cpow(_vm: &mut Vm, args: &[Value]) -> Result<Value, RuntimeError> {
    let a = complex_arg("cpow", args, 0)?;
    let b = complex_arg("cpow", args, 1)?;
    Ok(Value::Complex(a.pow(b)))
}

// ---- registration ----------------------------------------------------

pub fn install(vm: &mut Vm) {
    // Touch the clock so its epoch is interpreter startup
    let _ = PROCESS_CLOCK.seconds();

    vm.define_constant(
        "sizeofValue",
        Value::Int(std::mem::size_of::<Value>() as i32),
    );
    vm.define_constant("sizeofInt", Value::Int(std::mem::size_of::<i32>() as i32));
    vm.define_constant(
        "sizeofDouble",
        Value::Int(std::mem::size_of::<f64>() as i32),
    );
    vm.define_constant("pi", Value::Double(PI));
    vm.define_constant("e", Value::Double(std::f64::consts::E));
    vm.define_constant("I", Value::Complex(I));

    vm.define_native("clock", 0, native_clock);
    vm.define_native("__line__", 0, native_line);
    vm.define_native("__col__", 0, native_col);
    vm.define_native("prints", -1, native_prints);
    vm.define_native("globals", 0, native_globals);
    vm.define_native("keys", 1, native_keys);
    vm.define_native("values", 1, native_values);
    vm.define_native("keys_and_values", 1, native_keys_and_values);
    vm.define_native("setArray", 3, native_set_array);
    vm.define_native("rmArrayTop", 1, native_rm_array_top);

    let one_arg: &[(&str, NativeFn)] = &[
        ("sqrt", native_sqrt),
        ("exp", native_exp),
        ("exp2", native_exp2),
        ("expm1", native_expm1),
        ("log", native_log),
        ("log10", native_log10),
        ("log2", native_log2),
        ("log1p", native_log1p),
        ("fabs", native_fabs),
        ("cbrt", native_cbrt),
        ("sin", native_sin),
        ("cos", native_cos),
        ("tan", native_tan),
        ("asin", native_asin),
        ("acos", native_acos),
        ("atan", native_atan),
        ("sinh", native_sinh),
        ("cosh", native_cosh),
        ("tanh", native_tanh),
        ("asinh", native_asinh),
        ("acosh", native_acosh),
        ("atanh", native_atanh),
        ("erf", native_erf),
        ("erfc", native_erfc),
        ("tgamma", native_tgamma),
        ("lgamma", native_lgamma),
    ];
    for (name, function) in one_arg {
        vm.define_native(name, 1, *function);
    }

    let two_arg: &[(&str, NativeFn)] = &[
        ("fmod", native_fmod),
        ("remainder", native_remainder),
        ("fmax", native_fmax),
        ("fmin", native_fmin),
        ("fdim", native_fdim),
        ("pow", native_pow),
        ("hypot", native_hypot),
        ("atan2", native_atan2),
    ];
    for (name, function) in two_arg {
        vm.define_native(name, 2, *function);
    }
    vm.define_native("fma", 3, native_fma);

    let complex_one: &[(&str, NativeFn)] = &[
        ("cabs", native_cabs),
        ("carg", native_carg),
        ("cimag", native_cimag),
        ("creal", native_creal),
        ("conj", native_conj),
        ("cproj", native_cproj),
        ("cexp", native_cexp),
        ("clog", native_clog),
        ("csqrt", native_csqrt),
        ("csin", native_csin),
        ("ccos", native_ccos),
        ("ctan", native_ctan),
        ("csinh", native_csinh),
        ("ccosh", native_ccosh),
        ("ctanh", native_ctanh),
        ("casin", native_casin),
        ("cacos", native_cacos),
        ("catan", native_catan),
        ("casinh", native_casinh),
        ("cacosh", native_cacosh),
        ("catanh", native_catanh),
    ];
    for (name, function) in complex_one {
        vm.define_native(name, 1, *function);
    }
    vm.define_native("cpow", 2, native_cpow);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::vm::InterpretResult;
    use std::cell::RefCell;
    use std::io;
    use std::rc::Rc;

    #[derive(Clone)]
    struct SharedBuf(Rc<RefCell<Vec<u8>>>);

    impl Write for SharedBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn run(source: &str) -> (InterpretResult, String) {
        let config = Config::default();
        let buf = SharedBuf(Rc::new(RefCell::new(Vec::new())));
        let mut vm = Vm::with_output(&config, Box::new(buf.clone()));
        let result = vm.interpret_source(source);
        let text = String::from_utf8(buf.0.borrow().clone()).unwrap();
        (result, text)
    }

    fn assert_prints(source: &str, expect: &str) {
        let (result, text) = run(source);
        assert_eq!(result, InterpretResult::Ok, "source: {}", source);
        assert_eq!(text, expect, "source: {}", source);
    }

    #[test]
    fn test_math_natives() {
        assert_prints("print sqrt(16);", "4\n");
        assert_prints("print pow(2, 10);", "1024\n");
        assert_prints("print fabs(-3);", "3\n");
        assert_prints("print fmax(1, 2) + fmin(1, 2);", "3\n");
        assert_prints("print log2(8);", "3\n");
        assert_prints("print hypot(3, 4);", "5\n");
        assert_prints("print fmod(7, 3);", "1\n");
        assert_prints("print fma(2, 3, 4);", "10\n");
    }

    #[test]
    fn test_constants() {
        assert_prints("print pi > 3.14 and pi < 3.15;", "true\n");
        assert_prints("print e > 2.7 and e < 2.72;", "true\n");
        assert_prints("print sizeofInt;", "4\n");
        assert_prints("print sizeofDouble;", "8\n");
    }

    #[test]
    fn test_clock_and_position() {
        assert_prints("print clock() >= 0;", "true\n");
        assert_prints("print __line__;", "1\n");
        assert_prints("\n\nprint __line__;", "3\n");
    }

    #[test]
    fn test_prints_variadic() {
        assert_prints("prints(\"a\", 1, true);", "a1true");
        assert_prints("prints();", "");
    }

    #[test]
    fn test_introspection() {
        assert_prints("var m = {\"a\": 1}; print keys(m);", "[\"a\"]\n");
        assert_prints("var m = {\"a\": 1}; print values(m);", "[1]\n");
        assert_prints("var m = {\"a\": 1}; print #keys_and_values(m);", "2\n");
        assert_prints("print keys(5);", "nil\n");
        assert_prints("var g = globals(); print #g > 10;", "true\n");
    }

    #[test]
    fn test_array_mutation_natives() {
        assert_prints("var a = [1, 2]; setArray(a, 0, 9); print a;", "[9, 2]\n");
        assert_prints("var a = [1, 2]; setArray(a, 2, 3); print a;", "[1, 2, 3]\n");
        assert_prints("var a = [1, 2]; rmArrayTop(a); print a;", "[1]\n");
    }

    #[test]
    fn test_complex_natives() {
        assert_prints("print cabs(I);", "1\n");
        assert_prints("print cabs(3 + 4 * I);", "5\n");
        assert_prints("print cimag(2 * I);", "2\n");
        assert_prints("print conj(I);", "-1j\n");
        // i^2 through cpow
        assert_prints("print cabs(cpow(I, 2) + 1) < 0.0001;", "true\n");
    }

    #[test]
    fn test_native_arity_checking() {
        let (result, _) = run("sqrt();");
        assert_eq!(result, InterpretResult::RuntimeError);
        let (result, _) = run("sqrt(1, 2);");
        assert_eq!(result, InterpretResult::RuntimeError);
    }

    #[test]
    fn test_native_type_errors() {
        let (result, _) = run("sqrt(\"no\");");
        assert_eq!(result, InterpretResult::RuntimeError);
    }

    #[test]
    fn test_special_functions() {
        assert!((erf(0.0)).abs() < 1e-9);
        assert!((erf(1.0) - 0.8427007929).abs() < 1e-6);
        assert!((erf(-1.0) + 0.8427007929).abs() < 1e-6);
        assert!((tgamma(5.0) - 24.0).abs() < 1e-6);
        assert!((tgamma(0.5) - PI.sqrt()).abs() < 1e-6);
        assert!(lgamma(1.0).abs() < 1e-6);
        assert!((lgamma(10.0) - tgamma(10.0).ln()).abs() < 1e-6);
        assert!((ieee_remainder(5.0, 2.0) - 1.0).abs() < 1e-9);
    }
}
