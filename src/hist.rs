//! Fixed-width weighted histograms
//!
//! Bins are indexed from 0 to `n_bins - 1`. Entries falling outside of the
//! axis range are only accounted for in the underflow and overflow sums.

use crate::numeric::Float;
use prefix_num_ops::real::*;

/// Fixed-width binning of one axis
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Axis {
    /// Number of bins
    pub n_bins: usize,

    /// Lower edge of the first bin
    pub min: Float,

    /// Upper edge of the last bin
    pub max: Float,
}
//
impl Axis {
    /// Build an axis
    pub fn new(n_bins: usize, min: Float, max: Float) -> Self {
        Self { n_bins, min, max }
    }

    /// Width of every bin
    pub fn bin_width(&self) -> Float {
        (self.max - self.min) / (self.n_bins as Float)
    }

    /// Bin holding some value, if it is inside of the axis range
    pub fn find_bin(&self, x: Float) -> Option<usize> {
        if !(x >= self.min && x < self.max) {
            return None;
        }
        let bin = ((x - self.min) / self.bin_width()) as usize;
        // Rounding may push values right below the upper edge out of range
        Some(bin.min(self.n_bins - 1))
    }

    /// Center of a bin
    pub fn bin_center(&self, bin: usize) -> Float {
        self.min + ((bin as Float) + 0.5) * self.bin_width()
    }

    /// Lower edge of a bin
    pub fn bin_low_edge(&self, bin: usize) -> Float {
        self.min + (bin as Float) * self.bin_width()
    }
}

/// One-dimensional histogram of weighted entries
#[derive(Clone, Debug, PartialEq)]
pub struct Hist1D {
    name: String,
    axis: Axis,

    /// Sum of weights in each bin
    contents: Vec<Float>,

    /// Sum of squared weights in each bin
    sumw2: Vec<Float>,

    underflow: Float,
    overflow: Float,

    /// Number of fill calls
    entries: usize,
}
//
impl Hist1D {
    /// Create an empty histogram
    pub fn new(name: &str, n_bins: usize, min: Float, max: Float) -> Self {
        assert!(n_bins > 0, "A histogram must have at least one bin");
        assert!(max > min, "Histogram axis range must not be empty");
        Self {
            name: name.to_owned(),
            axis: Axis::new(n_bins, min, max),
            contents: vec![0.; n_bins],
            sumw2: vec![0.; n_bins],
            underflow: 0.,
            overflow: 0.,
            entries: 0,
        }
    }

    /// Name of the histogram
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Binning of the histogram
    pub fn axis(&self) -> &Axis {
        &self.axis
    }

    /// Number of bins
    pub fn n_bins(&self) -> usize {
        self.axis.n_bins
    }

    /// Number of fill calls
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Accumulate a weighted entry
    pub fn fill(&mut self, x: Float, weight: Float) {
        self.entries += 1;
        match self.axis.find_bin(x) {
            Some(bin) => {
                self.contents[bin] += weight;
                self.sumw2[bin] += weight * weight;
            }
            None if x < self.axis.min => self.underflow += weight,
            None => self.overflow += weight,
        }
    }

    /// Sum of weights in a bin
    pub fn bin_content(&self, bin: usize) -> Float {
        self.contents[bin]
    }

    /// Statistical uncertainty of a bin (square root of the sum of squared
    /// weights)
    pub fn bin_error(&self, bin: usize) -> Float {
        sqrt(self.sumw2[bin])
    }

    /// Overwrite the content of a bin
    pub fn set_bin_content(&mut self, bin: usize, content: Float) {
        self.contents[bin] = content;
    }

    /// Overwrite the uncertainty of a bin
    pub fn set_bin_error(&mut self, bin: usize, error: Float) {
        self.sumw2[bin] = error * error;
    }

    /// Center of a bin
    pub fn bin_center(&self, bin: usize) -> Float {
        self.axis.bin_center(bin)
    }

    /// Sum of weights outside of the axis range, below and above
    pub fn flows(&self) -> (Float, Float) {
        (self.underflow, self.overflow)
    }

    /// Sum of in-range bin contents
    pub fn integral(&self) -> Float {
        self.contents.iter().sum()
    }

    /// Iterate over in-range bins as (center, content, error) triples
    pub fn bins(&self) -> impl Iterator<Item = (Float, Float, Float)> + '_ {
        (0..self.n_bins()).map(|bin| (self.bin_center(bin), self.bin_content(bin), self.bin_error(bin)))
    }
}

/// Two-dimensional histogram of weighted entries
#[derive(Clone, Debug, PartialEq)]
pub struct Hist2D {
    name: String,
    x_axis: Axis,
    y_axis: Axis,

    /// Sums of weights, x-major
    contents: Vec<Float>,

    /// Sums of squared weights, x-major
    sumw2: Vec<Float>,

    entries: usize,
}
//
impl Hist2D {
    /// Create an empty histogram
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        name: &str,
        n_bins_x: usize,
        x_min: Float,
        x_max: Float,
        n_bins_y: usize,
        y_min: Float,
        y_max: Float,
    ) -> Self {
        assert!(n_bins_x > 0 && n_bins_y > 0, "A histogram needs bins");
        assert!(x_max > x_min && y_max > y_min, "Axis ranges must not be empty");
        let n = n_bins_x * n_bins_y;
        Self {
            name: name.to_owned(),
            x_axis: Axis::new(n_bins_x, x_min, x_max),
            y_axis: Axis::new(n_bins_y, y_min, y_max),
            contents: vec![0.; n],
            sumw2: vec![0.; n],
            entries: 0,
        }
    }

    /// Name of the histogram
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Binning along x
    pub fn x_axis(&self) -> &Axis {
        &self.x_axis
    }

    /// Binning along y
    pub fn y_axis(&self) -> &Axis {
        &self.y_axis
    }

    /// Number of fill calls
    pub fn entries(&self) -> usize {
        self.entries
    }

    fn index(&self, x_bin: usize, y_bin: usize) -> usize {
        x_bin * self.y_axis.n_bins + y_bin
    }

    /// Accumulate a weighted entry. Out-of-range entries are dropped.
    pub fn fill(&mut self, x: Float, y: Float, weight: Float) {
        self.entries += 1;
        if let (Some(x_bin), Some(y_bin)) = (self.x_axis.find_bin(x), self.y_axis.find_bin(y)) {
            let idx = self.index(x_bin, y_bin);
            self.contents[idx] += weight;
            self.sumw2[idx] += weight * weight;
        }
    }

    /// Sum of weights in a bin
    pub fn bin_content(&self, x_bin: usize, y_bin: usize) -> Float {
        self.contents[self.index(x_bin, y_bin)]
    }

    /// Center of an x bin
    pub fn x_bin_center(&self, x_bin: usize) -> Float {
        self.x_axis.bin_center(x_bin)
    }

    /// Project the y distribution of one x bin into a 1-D histogram
    pub fn projection_y(&self, name: &str, x_bin: usize) -> Hist1D {
        let y = self.y_axis;
        let mut proj = Hist1D::new(name, y.n_bins, y.min, y.max);
        for y_bin in 0..y.n_bins {
            let idx = self.index(x_bin, y_bin);
            proj.contents[y_bin] = self.contents[idx];
            proj.sumw2[y_bin] = self.sumw2[idx];
        }
        proj.entries = proj.contents.iter().filter(|&&c| c != 0.).count();
        proj
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn weighted_fills_track_squared_weights() {
        let mut h = Hist1D::new("h", 4, 0., 4.);
        h.fill(0.5, 2.);
        h.fill(0.7, 3.);
        h.fill(3.99, -1.);
        h.fill(-1., 5.);
        h.fill(4., 7.);
        assert_eq!(h.entries(), 5);
        assert_relative_eq!(h.bin_content(0), 5.);
        assert_relative_eq!(h.bin_error(0), (13.0 as Float).sqrt());
        assert_relative_eq!(h.bin_content(3), -1.);
        assert_relative_eq!(h.bin_error(3), 1.);
        assert_eq!(h.flows(), (5., 7.));
        assert_relative_eq!(h.integral(), 4.);
    }

    #[test]
    fn setters() {
        let mut h = Hist1D::new("h", 2, 60., 120.);
        h.set_bin_content(1, 4.);
        h.set_bin_error(1, 3.);
        assert_eq!(h.bin_content(1), 4.);
        assert_relative_eq!(h.bin_error(1), 3.);
        assert_relative_eq!(h.bin_center(1), 105.);
    }

    #[test]
    fn axis_edges() {
        let axis = Axis::new(10, 0., 1.);
        assert_eq!(axis.find_bin(0.), Some(0));
        assert_eq!(axis.find_bin(0.999_999), Some(9));
        assert_eq!(axis.find_bin(1.), None);
        assert_eq!(axis.find_bin(Float::NAN), None);
        assert_relative_eq!(axis.bin_low_edge(3), 0.3);
    }

    #[test]
    fn y_projection_of_one_x_slice() {
        let mut h = Hist2D::new("h2", 2, 0., 2., 3, -3., 3.);
        h.fill(0.5, -2.5, 1.);
        h.fill(0.5, 0.5, 2.);
        h.fill(0.5, 0.5, 2.);
        h.fill(1.5, 2.5, 1.);
        h.fill(5., 0., 1.);

        let p = h.projection_y("p", 0);
        assert_eq!(p.n_bins(), 3);
        assert_eq!(p.bin_content(0), 1.);
        assert_eq!(p.bin_content(1), 4.);
        assert_relative_eq!(p.bin_error(1), (8.0 as Float).sqrt());
        assert_eq!(p.bin_content(2), 0.);

        let p = h.projection_y("p", 1);
        assert_eq!(p.bin_content(2), 1.);
        assert_relative_eq!(h.x_bin_center(1), 1.5);
    }
}
