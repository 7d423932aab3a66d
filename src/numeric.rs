//! Basic numerical concepts used throughout the crate

#![allow(missing_docs)]

// Floating-point precision of histograms, fits and curves is configured here.
// Tree branches are always stored in double precision.
#[cfg(feature = "f32")]
pub type Float = f32;
#[cfg(feature = "f32")]
pub use std::f32 as reals;
#[cfg(not(feature = "f32"))]
pub type Float = f64;
#[cfg(not(feature = "f32"))]
pub use std::f64 as reals;

/// Mathematical functions
pub mod functions {
    use num_traits::Float as NumFloat;

    /// Unnormalized Gaussian kernel exp(-(x-mean)²/2σ²)
    ///
    /// A vanishing width yields a kernel that is zero everywhere, so that a
    /// fit component which collapsed onto its lower width bound does not
    /// poison the whole model with infinities.
    pub fn gaus<T: NumFloat>(x: T, mean: T, sigma: T) -> T {
        if sigma == T::zero() {
            return T::zero();
        }
        let u = (x - mean) / sigma;
        (-(u * u) / (T::one() + T::one())).exp()
    }

    /// Square of a number
    pub fn sqr<T: NumFloat>(x: T) -> T {
        x * x
    }
}

#[cfg(test)]
mod tests {
    use super::functions::*;
    use approx::assert_relative_eq;

    #[test]
    fn gaussian_kernel_is_unnormalized() {
        assert_relative_eq!(gaus(0.0_f64, 0.0, 3.0), 1.0);
        assert_relative_eq!(gaus(2.0_f64, 0.0, 2.0), (-0.5_f64).exp());
        assert_relative_eq!(gaus(-2.0_f64, 0.0, 2.0), gaus(2.0, 0.0, 2.0));
    }

    #[test]
    fn zero_width_kernel_vanishes() {
        assert_eq!(gaus(1.0_f64, 1.0, 0.0), 0.0);
    }
}
