//! Shared helpers for tests.
use num::Float;

/// Poor man's approx assertion for slices of floats, either in absolute terms or relative to the largest
/// entry of the right-hand side.
#[macro_export]
macro_rules! assert_approx_slice_eq {
    ($x:expr, $y:expr, abstol = $tol:expr) => {{
        match (&$x, &$y) {
            (x, y) => {
                let (x, y) = (&x[..], &y[..]);
                assert_eq!(x.len(), y.len(), "Slices must have the same length");
                let tol = $tol;
                let max_absdiff = $crate::max_abs_diff(x, y);
                if !(max_absdiff <= tol) {
                    println!("abstol: {:e}", tol);
                    println!("max abs diff: {:e}", max_absdiff);
                    println!("left: {:?}", x);
                    println!("right: {:?}", y);
                    panic!("assert_approx_slice_eq!({}, {}) failed.", stringify!($x), stringify!($y));
                }
            }
        }
    }};
    ($x:expr, $y:expr, reltol = $tol:expr) => {{
        match (&$x, &$y) {
            (x, y) => {
                let scale = $crate::max_abs(&y[..]);
                $crate::assert_approx_slice_eq!(x, y, abstol = $tol * scale);
            }
        }
    }};
}

pub fn max_abs<T: Float>(x: &[T]) -> T {
    x.iter().fold(T::zero(), |max, x_i| max.max(x_i.abs()))
}

pub fn max_abs_diff<T: Float>(x: &[T], y: &[T]) -> T {
    x.iter()
        .zip(y)
        .fold(T::zero(), |max, (&x_i, &y_i)| max.max((x_i - y_i).abs()))
}

pub fn dot<T: Float>(x: &[T], y: &[T]) -> T {
    x.iter().zip(y).fold(T::zero(), |sum, (&x_i, &y_i)| sum + x_i * y_i)
}

/// Computes `a * x + b * y`.
pub fn linear_combination<T: Float>(a: T, x: &[T], b: T, y: &[T]) -> Vec<T> {
    assert_eq!(x.len(), y.len());
    x.iter().zip(y).map(|(&x_i, &y_i)| a * x_i + b * y_i).collect()
}
