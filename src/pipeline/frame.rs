//! Lazy per-sample event tables
//!
//! A [`SampleFrame`] wraps a polars [`LazyFrame`] together with the sample
//! metadata the binning and systematics code needs. Nothing here collects
//! eagerly except schema lookups; histogram fills and scalar sums are booked
//! as deferred computations and run at a flush point.

use polars::prelude::*;
use serde::Serialize;

use crate::error::{Error, Result};

use super::binning::BinningDefinition;
use super::deferred::{DeferredHistogram, FillSource, HistogramFuture, WeightSpec};

/// Where a sample's events come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum SampleOrigin {
    /// Recorded data
    Data,
    /// Nominal simulation
    MonteCarlo,
    /// Alternate detector simulation; `variant` names the variation
    DetectorVariation { variant: String },
}

/// Element layout of a source column
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnKind {
    /// One numeric value per event
    Scalar(DataType),
    /// A list of numeric values per event, each filled separately
    Sequence(DataType),
}

impl ColumnKind {
    /// Numeric type of the individual elements
    pub fn element(&self) -> &DataType {
        match self {
            ColumnKind::Scalar(dtype) | ColumnKind::Sequence(dtype) => dtype,
        }
    }

    /// Sentinel values (type minimum, type maximum) used as "unset" markers.
    pub fn sentinels(&self) -> (f64, f64) {
        match self.element() {
            DataType::Float32 => (f32::MIN as f64, f32::MAX as f64),
            DataType::Int8 => (i8::MIN as f64, i8::MAX as f64),
            DataType::Int16 => (i16::MIN as f64, i16::MAX as f64),
            DataType::Int32 => (i32::MIN as f64, i32::MAX as f64),
            DataType::Int64 => (i64::MIN as f64, i64::MAX as f64),
            // Zero is a legitimate unsigned value, only the maximum is a marker
            DataType::UInt8 => (f64::NEG_INFINITY, u8::MAX as f64),
            DataType::UInt16 => (f64::NEG_INFINITY, u16::MAX as f64),
            DataType::UInt32 => (f64::NEG_INFINITY, u32::MAX as f64),
            DataType::UInt64 => (f64::NEG_INFINITY, u64::MAX as f64),
            _ => (f64::MIN, f64::MAX),
        }
    }

    pub fn is_sequence(&self) -> bool {
        matches!(self, ColumnKind::Sequence(_))
    }

    /// Expression casting the column to f64 elements
    pub(crate) fn cast_expr(&self, column: &str) -> Expr {
        match self {
            ColumnKind::Scalar(_) => col(column).cast(DataType::Float64),
            ColumnKind::Sequence(_) => col(column).cast(DataType::List(Box::new(DataType::Float64))),
        }
    }
}

/// Classify a column dtype, rejecting anything that cannot be histogrammed.
pub fn classify_dtype(column: &str, dtype: &DataType) -> Result<ColumnKind> {
    match dtype {
        dt if dt.is_primitive_numeric() => Ok(ColumnKind::Scalar(dt.clone())),
        DataType::List(inner) if inner.is_primitive_numeric() => {
            Ok(ColumnKind::Sequence(inner.as_ref().clone()))
        }
        DataType::Array(inner, _) if inner.is_primitive_numeric() => {
            Ok(ColumnKind::Sequence(inner.as_ref().clone()))
        }
        other => Err(Error::UnsupportedColumnType {
            column: column.to_string(),
            dtype: other.to_string(),
        }),
    }
}

/// One sample's lazy event table plus metadata
#[derive(Clone)]
pub struct SampleFrame {
    id: String,
    origin: SampleOrigin,
    frame: LazyFrame,
    scale: f64,
}

impl std::fmt::Debug for SampleFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleFrame")
            .field("id", &self.id)
            .field("origin", &self.origin)
            .field("scale", &self.scale)
            .finish()
    }
}

impl SampleFrame {
    pub fn new(id: impl Into<String>, origin: SampleOrigin, frame: LazyFrame) -> Self {
        Self {
            id: id.into(),
            origin,
            frame,
            scale: 1.0,
        }
    }

    /// Exposure normalisation applied to every histogram booked from this sample
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn origin(&self) -> &SampleOrigin {
        &self.origin
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn is_monte_carlo(&self) -> bool {
        self.origin == SampleOrigin::MonteCarlo
    }

    pub fn lazy(&self) -> LazyFrame {
        self.frame.clone()
    }

    pub fn schema(&self) -> Result<SchemaRef> {
        Ok(self.frame.clone().collect_schema()?)
    }

    pub fn has_column(&self, column: &str) -> Result<bool> {
        Ok(self.schema()?.get(column).is_some())
    }

    /// Element layout of `column`.
    ///
    /// Missing columns and non-numeric element types are errors; there is no
    /// fallback fill for them.
    pub fn column_kind(&self, column: &str) -> Result<ColumnKind> {
        let schema = self.schema()?;
        let dtype = schema.get(column).ok_or_else(|| Error::MissingColumn {
            column: column.to_string(),
            sample: self.id.clone(),
        })?;
        classify_dtype(column, dtype)
    }

    /// A new handle over the events passing `predicate`
    pub fn filter(&self, predicate: Expr) -> SampleFrame {
        Self {
            id: self.id.clone(),
            origin: self.origin.clone(),
            frame: self.frame.clone().filter(predicate),
            scale: self.scale,
        }
    }

    /// Book a histogram fill of the binning's expression.
    ///
    /// Nothing is read until the returned histogram is materialised. The
    /// sample's scale is carried as a pending scale factor.
    pub fn book_histogram(&self, binning: &BinningDefinition, weight: WeightSpec) -> Result<DeferredHistogram> {
        let kind = self.column_kind(binning.expression())?;
        let source = FillSource::new(self.id.as_str(), self.frame.clone(), binning.expression(), kind, weight);
        let future = HistogramFuture::new(binning.clone(), source);
        Ok(DeferredHistogram::pending(future).scaled(self.scale))
    }

    /// Deferred sum of a column
    pub fn sum(&self, column: &str) -> DeferredScalar {
        DeferredScalar {
            frame: self
                .frame
                .clone()
                .select([col(column).cast(DataType::Float64).sum().alias("__sum")]),
            scale: self.scale,
        }
    }

    /// Deferred `sum(value * weight)`
    pub fn weighted_sum(&self, value: &str, weight: &str) -> DeferredScalar {
        let product = col(value).cast(DataType::Float64) * col(weight).cast(DataType::Float64);
        DeferredScalar {
            frame: self.frame.clone().select([product.sum().alias("__sum")]),
            scale: self.scale,
        }
    }
}

/// A booked scalar aggregation
#[derive(Clone)]
pub struct DeferredScalar {
    frame: LazyFrame,
    scale: f64,
}

impl DeferredScalar {
    /// Run the aggregation; an empty selection sums to zero.
    pub fn value(&self) -> Result<f64> {
        let df = self.frame.clone().collect()?;
        let sum = df
            .column("__sum")?
            .f64()?
            .get(0)
            .unwrap_or(0.0);
        Ok(sum * self.scale)
    }
}

/// Flatten a collected value column into `(value, weight)` pairs.
///
/// Scalar columns give one pair per row; sequence columns give one pair per
/// element, each carrying the row's weight. Null values are skipped.
pub(crate) fn flatten_observations(
    df: &DataFrame,
    value_column: &str,
    kind: &ColumnKind,
    row_weights: &[f64],
) -> Result<Vec<(f64, f64)>> {
    let column = df.column(value_column)?;
    let mut out = Vec::with_capacity(row_weights.len());

    match kind {
        ColumnKind::Scalar(_) => {
            for (value, &w) in column.f64()?.iter().zip(row_weights.iter()) {
                if let Some(v) = value {
                    out.push((v, w));
                }
            }
        }
        ColumnKind::Sequence(_) => {
            for (row, &w) in column.list()?.into_iter().zip(row_weights.iter()) {
                if let Some(elements) = row {
                    for v in elements.f64()?.iter().flatten() {
                        out.push((v, w));
                    }
                }
            }
        }
    }

    Ok(out)
}

/// Read a weight column as f64, mapping nulls to NaN so they are dropped
/// downstream as non-finite.
pub(crate) fn weight_values(df: &DataFrame, column: &str) -> Result<Vec<f64>> {
    Ok(df
        .column(column)?
        .f64()?
        .iter()
        .map(|w| w.unwrap_or(f64::NAN))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> SampleFrame {
        let tracks = Series::new(
            "track_len".into(),
            &[
                Series::new("".into(), &[1.0f64, 2.0]),
                Series::new("".into(), &[3.0f64]),
                Series::new("".into(), Vec::<f64>::new()),
            ],
        );
        let mut df = df! {
            "energy" => [0.5f64, 1.5, 2.5],
            "weight" => [1.0f64, 2.0, 0.5],
            "run" => [1i32, 1, 2],
            "name" => ["a", "b", "c"],
        }
        .unwrap();
        df.with_column(tracks).unwrap();
        SampleFrame::new("mc", SampleOrigin::MonteCarlo, df.lazy())
    }

    #[test]
    fn test_column_kind_dispatch() {
        let s = sample();
        assert_eq!(s.column_kind("energy").unwrap(), ColumnKind::Scalar(DataType::Float64));
        assert_eq!(s.column_kind("run").unwrap(), ColumnKind::Scalar(DataType::Int32));
        assert!(s.column_kind("track_len").unwrap().is_sequence());
        assert!(matches!(
            s.column_kind("name"),
            Err(Error::UnsupportedColumnType { .. })
        ));
        assert!(matches!(s.column_kind("nope"), Err(Error::MissingColumn { .. })));
    }

    #[test]
    fn test_sentinels_follow_element_type() {
        let (lo, hi) = ColumnKind::Scalar(DataType::Float32).sentinels();
        assert_eq!(hi, f32::MAX as f64);
        assert_eq!(lo, f32::MIN as f64);
        let (lo, _) = ColumnKind::Scalar(DataType::UInt16).sentinels();
        assert!(lo.is_infinite());
    }

    #[test]
    fn test_deferred_sums() {
        let s = sample().with_scale(2.0);
        assert!((s.sum("weight").value().unwrap() - 7.0).abs() < 1e-12);
        // 0.5*1 + 1.5*2 + 2.5*0.5 = 4.75, scaled by 2
        assert!((s.weighted_sum("energy", "weight").value().unwrap() - 9.5).abs() < 1e-12);
    }

    #[test]
    fn test_filter_is_lazy_and_applies() {
        let s = sample().filter(col("run").eq(lit(1)));
        assert!((s.sum("weight").value().unwrap() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_flatten_sequence_column() {
        let s = sample();
        let df = s
            .lazy()
            .select([
                ColumnKind::Sequence(DataType::Float64).cast_expr("track_len"),
                col("weight"),
            ])
            .collect()
            .unwrap();
        let weights = weight_values(&df, "weight").unwrap();
        let obs = flatten_observations(
            &df,
            "track_len",
            &ColumnKind::Sequence(DataType::Float64),
            &weights,
        )
        .unwrap();
        assert_eq!(obs, vec![(1.0, 1.0), (2.0, 1.0), (3.0, 2.0)]);
    }
}
