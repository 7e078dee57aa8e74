// Single-precision complex numbers and the math kernels backing the
// c-prefixed natives. Values widen int -> double -> complex, so every
// arithmetic opcode can land here when either operand is complex.

use std::ops::{Add, Div, Mul, Neg, Sub};

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Complex {
    pub re: f32,
    pub im: f32,
}

// The imaginary unit, exposed to scripts as the global `I`.
pub const I: Complex = Complex { re: 0.0, im: 1.0 };

impl Complex {
    pub fn new(re: f32, im: f32) -> Complex {
        Complex { re, im }
    }

    pub fn is_zero(&self) -> bool {
        self.re == 0.0 && self.im == 0.0
    }

    // Modulus |z|. Returned as f64 to match the double-valued natives.
    pub fn abs(&self) -> f64 {
        (self.re as f64).hypot(self.im as f64)
    }

    // Argument in (-pi, pi].
    pub fn arg(&self) -> f64 {
        (self.im as f64).atan2(self.re as f64)
    }

    pub fn conj(&self) -> Complex {
        Complex::new(self.re, -self.im)
    }

    // Projection onto the Riemann sphere: any infinity collapses to the
    // single point at infinity.
    pub fn proj(&self) -> Complex {
        if self.re.is_infinite() || self.im.is_infinite() {
            Complex::new(f32::INFINITY, 0.0_f32.copysign(self.im))
        } else {
            *self
        }
    }

    pub fn exp(&self) -> Complex {
        let r = self.re.exp();
        Complex::new(r * self.im.cos(), r * self.im.sin())
    }

    pub fn ln(&self) -> Complex {
        Complex::new(self.abs().ln() as f32, self.arg() as f32)
    }

    pub fn sqrt(&self) -> Complex {
        let r = self.abs().sqrt();
        let theta = self.arg() / 2.0;
        Complex::new((r * theta.cos()) as f32, (r * theta.sin()) as f32)
    }

    pub fn pow(&self, exponent: Complex) -> Complex {
        if self.is_zero() {
            return if exponent.is_zero() {
                Complex::new(1.0, 0.0)
            } else {
                Complex::new(0.0, 0.0)
            };
        }
        (exponent * self.ln()).exp()
    }

    pub fn sin(&self) -> Complex {
        Complex::new(
            self.re.sin() * self.im.cosh(),
            self.re.cos() * self.im.sinh(),
        )
    }

    pub fn cos(&self) -> Complex {
        Complex::new(
            self.re.cos() * self.im.cosh(),
            -self.re.sin() * self.im.sinh(),
        )
    }

    pub fn tan(&self) -> Complex {
        self.sin() / self.cos()
    }

    pub fn sinh(&self) -> Complex {
        Complex::new(
            self.re.sinh() * self.im.cos(),
            self.re.cosh() * self.im.sin(),
        )
    }

    pub fn cosh(&self) -> Complex {
        Complex::new(
            self.re.cosh() * self.im.cos(),
            self.re.sinh() * self.im.sin(),
        )
    }

    pub fn tanh(&self) -> Complex {
        self.sinh() / self.cosh()
    }

    // The inverse functions go through their logarithmic identities.
    pub fn asin(&self) -> Complex {
        let z = *self;
        -I * (I * z + (Complex::new(1.0, 0.0) - z * z).sqrt()).ln()
    }

    pub fn acos(&self) -> Complex {
        let z = *self;
        -I * (z + I * (Complex::new(1.0, 0.0) - z * z).sqrt()).ln()
    }

    pub fn atan(&self) -> Complex {
        let z = *self;
        let half_i = Complex::new(0.0, 0.5);
        half_i * ((I + z) / (I - z)).ln()
    }

    pub fn asinh(&self) -> Complex {
        let z = *self;
        (z + (z * z + Complex::new(1.0, 0.0)).sqrt()).ln()
    }

    pub fn acosh(&self) -> Complex {
        let z = *self;
        (z + (z * z - Complex::new(1.0, 0.0)).sqrt()).ln()
    }

    pub fn atanh(&self) -> Complex {
        let z = *self;
        let one = Complex::new(1.0, 0.0);
        ((one + z) / (one - z)).ln() * Complex::new(0.5, 0.0)
    }
}

impl Add for Complex {
    type Output = Complex;
    fn add(self, rhs: Complex) -> Complex {
        Complex::new(self.re + rhs.re, self.im + rhs.im)
    }
}

impl Sub for Complex {
    type Output = Complex;
    fn sub(self, rhs: Complex) -> Complex {
        Complex::new(self.re - rhs.re, self.im - rhs.im)
    }
}

impl Mul for Complex {
    type Output = Complex;
    fn mul(self, rhs: Complex) -> Complex {
        Complex::new(
            self.re * rhs.re - self.im * rhs.im,
            self.re * rhs.im + self.im * rhs.re,
        )
    }
}

impl Div for Complex {
    type Output = Complex;
    fn div(self, rhs: Complex) -> Complex {
        let denom = rhs.re * rhs.re + rhs.im * rhs.im;
        Complex::new(
            (self.re * rhs.re + self.im * rhs.im) / denom,
            (self.im * rhs.re - self.re * rhs.im) / denom,
        )
    }
}

impl Neg for Complex {
    type Output = Complex;
    fn neg(self) -> Complex {
        Complex::new(-self.re, -self.im)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: Complex, b: Complex) -> bool {
        (a.re - b.re).abs() < 1e-4 && (a.im - b.im).abs() < 1e-4
    }

    #[test]
    fn test_arithmetic() {
        let a = Complex::new(1.0, 2.0);
        let b = Complex::new(3.0, -1.0);
        assert_eq!(a + b, Complex::new(4.0, 1.0));
        assert_eq!(a - b, Complex::new(-2.0, 3.0));
        assert_eq!(a * b, Complex::new(5.0, 5.0));
        assert!(close(a * b / b, a));
        assert_eq!(-a, Complex::new(-1.0, -2.0));
    }

    #[test]
    fn test_modulus_and_argument() {
        let z = Complex::new(3.0, 4.0);
        assert!((z.abs() - 5.0).abs() < 1e-9);
        assert!((Complex::new(0.0, 1.0).arg() - std::f64::consts::FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn test_exp_log_roundtrip() {
        let z = Complex::new(0.5, -1.25);
        assert!(close(z.exp().ln(), z));
        assert!(close(z.sqrt() * z.sqrt(), z));
    }

    #[test]
    fn test_pow() {
        // i^2 == -1
        assert!(close(I.pow(Complex::new(2.0, 0.0)), Complex::new(-1.0, 0.0)));
        assert!(close(
            Complex::new(2.0, 0.0).pow(Complex::new(10.0, 0.0)),
            Complex::new(1024.0, 0.0)
        ));
    }

    #[test]
    fn test_trig_identity() {
        // sin^2 + cos^2 == 1 holds for complex arguments too
        let z = Complex::new(0.7, 0.3);
        let s = z.sin();
        let c = z.cos();
        assert!(close(s * s + c * c, Complex::new(1.0, 0.0)));
    }

    #[test]
    fn test_inverse_functions() {
        let z = Complex::new(0.3, 0.4);
        assert!(close(z.sin().asin(), z));
        assert!(close(z.sinh().asinh(), z));
        assert!(close(z.tanh().atanh(), z));
    }
}
