//! Materialised binned histograms with full covariance

use faer::Mat;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::error::{Error, Result};

use super::binning::BinningDefinition;

/// Per-bin counts plus an `n_bins x n_bins` covariance matrix.
///
/// A freshly filled histogram carries its statistical covariance: the
/// diagonal holds the per-bin sum of squared weights.
#[derive(Debug, Clone)]
pub struct BinnedHistogram {
    binning: BinningDefinition,
    counts: Vec<f64>,
    covariance: Mat<f64>,
}

impl BinnedHistogram {
    /// Build from explicit counts and covariance, checking dimensions.
    pub fn new(binning: BinningDefinition, counts: Vec<f64>, covariance: Mat<f64>) -> Result<Self> {
        let n = binning.n_bins();
        if counts.len() != n {
            return Err(Error::ShapeMismatch {
                expected: n,
                found: counts.len(),
            });
        }
        check_square(&covariance, n)?;
        Ok(Self {
            binning,
            counts,
            covariance,
        })
    }

    /// Histogram from per-bin sums of weights and squared weights
    pub fn from_fill(binning: BinningDefinition, sum_w: Vec<f64>, sum_w2: &[f64]) -> Result<Self> {
        let covariance = diagonal_matrix(sum_w2);
        Self::new(binning, sum_w, covariance)
    }

    pub fn zeros(binning: BinningDefinition) -> Self {
        let n = binning.n_bins();
        Self {
            binning,
            counts: vec![0.0; n],
            covariance: Mat::zeros(n, n),
        }
    }

    pub fn binning(&self) -> &BinningDefinition {
        &self.binning
    }

    pub fn n_bins(&self) -> usize {
        self.counts.len()
    }

    pub fn counts(&self) -> &[f64] {
        &self.counts
    }

    pub fn covariance(&self) -> &Mat<f64> {
        &self.covariance
    }

    pub fn sum(&self) -> f64 {
        self.counts.iter().sum()
    }

    /// sqrt of the covariance diagonal
    pub fn bin_errors(&self) -> Vec<f64> {
        (0..self.n_bins())
            .map(|i| self.covariance[(i, i)].max(0.0).sqrt())
            .collect()
    }

    /// Uncertainty on the total, including bin-to-bin correlations
    pub fn total_error(&self) -> f64 {
        let n = self.n_bins();
        let mut total = 0.0;
        for i in 0..n {
            for j in 0..n {
                total += self.covariance[(i, j)];
            }
        }
        total.max(0.0).sqrt()
    }

    /// Bin error divided by bin content (zero for empty bins)
    pub fn fractional_errors(&self) -> Vec<f64> {
        self.bin_errors()
            .into_iter()
            .zip(self.counts.iter())
            .map(|(e, &c)| if c != 0.0 { e / c.abs() } else { 0.0 })
            .collect()
    }

    /// Correlation matrix; rows/columns of zero-variance bins are zero.
    pub fn correlation_matrix(&self) -> Mat<f64> {
        let errors = self.bin_errors();
        let n = self.n_bins();
        Mat::from_fn(n, n, |i, j| {
            let denom = errors[i] * errors[j];
            if denom > 0.0 {
                self.covariance[(i, j)] / denom
            } else {
                0.0
            }
        })
    }

    /// Bin-wise sum; covariances add as for independent samples.
    ///
    /// Both histograms must share the same edges.
    pub fn add(&self, other: &BinnedHistogram) -> Result<BinnedHistogram> {
        if other.n_bins() != self.n_bins() {
            return Err(Error::ShapeMismatch {
                expected: self.n_bins(),
                found: other.n_bins(),
            });
        }
        if other.binning.edges() != self.binning.edges() {
            return Err(Error::InvalidBinning(format!(
                "cannot add histograms of '{}' with edges {:?} and {:?}",
                self.binning.expression(),
                self.binning.edges(),
                other.binning.edges()
            )));
        }
        let counts = self
            .counts
            .iter()
            .zip(other.counts.iter())
            .map(|(a, b)| a + b)
            .collect();
        Ok(Self {
            binning: self.binning.clone(),
            counts,
            covariance: &self.covariance + &other.covariance,
        })
    }

    /// Counts times `factor`, covariance times `factor^2`
    pub fn scaled(&self, factor: f64) -> BinnedHistogram {
        let n = self.n_bins();
        let f2 = factor * factor;
        Self {
            binning: self.binning.clone(),
            counts: self.counts.iter().map(|c| c * factor).collect(),
            covariance: Mat::from_fn(n, n, |i, j| self.covariance[(i, j)] * f2),
        }
    }

    /// Same counts with a replacement covariance matrix
    pub fn with_covariance(&self, covariance: Mat<f64>) -> Result<BinnedHistogram> {
        check_square(&covariance, self.n_bins())?;
        Ok(Self {
            binning: self.binning.clone(),
            counts: self.counts.clone(),
            covariance,
        })
    }

    /// Bit-for-bit equality of counts and covariance
    pub fn identical(&self, other: &BinnedHistogram) -> bool {
        let n = self.n_bins();
        self.binning == other.binning
            && self.counts.len() == other.counts.len()
            && self
                .counts
                .iter()
                .zip(other.counts.iter())
                .all(|(a, b)| a.to_bits() == b.to_bits())
            && (0..n).all(|i| {
                (0..n).all(|j| self.covariance[(i, j)].to_bits() == other.covariance[(i, j)].to_bits())
            })
    }
}

impl Serialize for BinnedHistogram {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("BinnedHistogram", 4)?;
        state.serialize_field("edges", self.binning.edges())?;
        state.serialize_field("counts", &self.counts)?;
        state.serialize_field("errors", &self.bin_errors())?;
        state.serialize_field("covariance", &matrix_rows(&self.covariance))?;
        state.end()
    }
}

fn check_square(matrix: &Mat<f64>, n: usize) -> Result<()> {
    if matrix.nrows() != n || matrix.ncols() != n {
        return Err(Error::ShapeMismatch {
            expected: n,
            found: matrix.nrows().max(matrix.ncols()),
        });
    }
    Ok(())
}

/// Square matrix with `values` on the diagonal
pub fn diagonal_matrix(values: &[f64]) -> Mat<f64> {
    let n = values.len();
    Mat::from_fn(n, n, |i, j| if i == j { values[i] } else { 0.0 })
}

/// `a * b^T`
pub fn outer_product(a: &[f64], b: &[f64]) -> Mat<f64> {
    Mat::from_fn(a.len(), b.len(), |i, j| a[i] * b[j])
}

/// Row-major copy of a matrix for serialisation and display
pub fn matrix_rows(matrix: &Mat<f64>) -> Vec<Vec<f64>> {
    (0..matrix.nrows())
        .map(|i| (0..matrix.ncols()).map(|j| matrix[(i, j)]).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binning(n: usize) -> BinningDefinition {
        BinningDefinition::new((0..=n).map(|i| i as f64).collect(), "x", "x").unwrap()
    }

    #[test]
    fn test_from_fill_errors() {
        let h = BinnedHistogram::from_fill(binning(2), vec![4.0, 9.0], &[4.0, 9.0]).unwrap();
        assert_eq!(h.bin_errors(), vec![2.0, 3.0]);
        assert!((h.total_error() - 13.0f64.sqrt()).abs() < 1e-12);
        assert_eq!(h.sum(), 13.0);
        assert!((h.fractional_errors()[0] - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_dimension_checks() {
        assert!(BinnedHistogram::new(binning(2), vec![1.0], Mat::zeros(2, 2)).is_err());
        assert!(BinnedHistogram::new(binning(2), vec![1.0, 2.0], Mat::zeros(3, 3)).is_err());

        let a = BinnedHistogram::zeros(binning(2));
        let b = BinnedHistogram::zeros(binning(3));
        assert!(matches!(a.add(&b), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_add_rejects_other_edges() {
        let a = BinnedHistogram::from_fill(binning(2), vec![1.0, 2.0], &[1.0, 2.0]).unwrap();
        let shifted = BinningDefinition::new(vec![0.0, 0.5, 2.0], "x", "x").unwrap();
        let b = BinnedHistogram::from_fill(shifted, vec![1.0, 2.0], &[1.0, 2.0]).unwrap();
        assert!(matches!(a.add(&b), Err(Error::InvalidBinning(_))));
    }

    #[test]
    fn test_add_and_scale() {
        let a = BinnedHistogram::from_fill(binning(2), vec![1.0, 2.0], &[1.0, 2.0]).unwrap();
        let b = BinnedHistogram::from_fill(binning(2), vec![3.0, 4.0], &[3.0, 4.0]).unwrap();
        let sum = a.add(&b).unwrap();
        assert_eq!(sum.counts(), &[4.0, 6.0]);
        assert_eq!(sum.covariance()[(1, 1)], 6.0);

        let scaled = sum.scaled(0.5);
        assert_eq!(scaled.counts(), &[2.0, 3.0]);
        assert_eq!(scaled.covariance()[(0, 0)], 1.0);
    }

    #[test]
    fn test_total_error_uses_correlations() {
        let h = BinnedHistogram::from_fill(binning(2), vec![10.0, 20.0], &[0.0, 0.0])
            .unwrap()
            .with_covariance(outer_product(&[1.0, 2.0], &[1.0, 2.0]))
            .unwrap();
        // Fully correlated: sigma_total = 1 + 2
        assert!((h.total_error() - 3.0).abs() < 1e-12);
        let corr = h.correlation_matrix();
        assert!((corr[(0, 1)] - 1.0).abs() < 1e-12);
    }
}
