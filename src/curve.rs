//! Point sequences with vertical error bars

use crate::numeric::{functions::sqr, Float};
use prefix_num_ops::real::*;
use serde::Serialize;

/// One point of a curve. Horizontal errors are always zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize)]
pub struct CurvePoint {
    /// Abscissa (bin center)
    pub x: Float,

    /// Ordinate
    pub y: Float,

    /// Vertical uncertainty
    pub ey: Float,
}

/// Ordered sequence of (x, y, y error) points
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct Curve {
    points: Vec<CurvePoint>,
}
//
impl Curve {
    /// Create a curve of `n` points, all at the origin with no error
    pub fn new(n: usize) -> Self {
        Self {
            points: vec![CurvePoint::default(); n],
        }
    }

    /// Build a curve from existing points
    pub fn from_points(points: Vec<CurvePoint>) -> Self {
        Self { points }
    }

    /// Number of points
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Truth that the curve has no points
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Move a point, keeping its error
    pub fn set_point(&mut self, i: usize, x: Float, y: Float) {
        self.points[i].x = x;
        self.points[i].y = y;
    }

    /// Set the vertical error of a point
    pub fn set_point_error(&mut self, i: usize, ey: Float) {
        self.points[i].ey = ey;
    }

    /// Access a point
    pub fn point(&self, i: usize) -> CurvePoint {
        self.points[i]
    }

    /// All points
    pub fn points(&self) -> &[CurvePoint] {
        &self.points
    }

    /// Abscissae of all points
    pub fn xs(&self) -> impl Iterator<Item = Float> + '_ {
        self.points.iter().map(|p| p.x)
    }

    /// Ordinates of all points
    pub fn ys(&self) -> impl Iterator<Item = Float> + '_ {
        self.points.iter().map(|p| p.y)
    }
}

/// Uncertainty of num/den for independent uncertain num and den
///
/// First-order propagation: sqrt((σ_num/den)² + (num·σ_den/den²)²)
pub fn quotient_error(num: Float, num_err: Float, den: Float, den_err: Float) -> Float {
    sqrt(sqr(num_err / den) + sqr(num * den_err / sqr(den)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn fresh_curves_sit_at_origin() {
        let mut c = Curve::new(3);
        assert_eq!(c.len(), 3);
        assert!(c.points().iter().all(|p| *p == CurvePoint::default()));
        c.set_point(1, 2., 3.);
        c.set_point_error(1, 0.5);
        assert_eq!(c.point(1), CurvePoint { x: 2., y: 3., ey: 0.5 });
        assert_eq!(c.xs().collect::<Vec<_>>(), vec![0., 2., 0.]);
    }

    #[test]
    fn quotient_error_propagation() {
        assert_relative_eq!(quotient_error(2., 0.2, 1., 0.), 0.2);
        assert_relative_eq!(quotient_error(4., 0., 2., 0.1), 0.1);
        let expected = ((0.3_f64 / 2.).powi(2) + (3. * 0.4 / 4.0_f64).powi(2)).sqrt();
        assert_relative_eq!(quotient_error(3., 0.3, 2., 0.4) as f64, expected, max_relative = 1e-6);
    }
}
