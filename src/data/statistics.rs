//! Per-column basic statistics attached to a table.
//!
//! A table may carry pre-aggregated minimum, maximum, sum and sum of squares
//! for each column, each stored as a `1 x p` table. Algorithms that need them
//! check the slot first and compute on demand otherwise.

use std::sync::Arc;

use tracing::debug;

use super::homogen::HomogenTable;
use super::table::{NumericTable, NumericTableExt, NumericTablePtr};
use crate::error::TableError;

/// Which aggregate a statistics slot holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatisticKind {
    Minimum,
    Maximum,
    Sum,
    SumSquares,
}

impl StatisticKind {
    /// Every kind.
    pub const ALL: [StatisticKind; 4] = [
        StatisticKind::Minimum,
        StatisticKind::Maximum,
        StatisticKind::Sum,
        StatisticKind::SumSquares,
    ];
}

/// Optional per-column aggregates, each a `1 x p` table.
#[derive(Debug, Clone, Default)]
pub struct BasicStatistics {
    minimum: Option<NumericTablePtr>,
    maximum: Option<NumericTablePtr>,
    sum: Option<NumericTablePtr>,
    sum_squares: Option<NumericTablePtr>,
}

impl BasicStatistics {
    fn slot(&self, kind: StatisticKind) -> &Option<NumericTablePtr> {
        match kind {
            StatisticKind::Minimum => &self.minimum,
            StatisticKind::Maximum => &self.maximum,
            StatisticKind::Sum => &self.sum,
            StatisticKind::SumSquares => &self.sum_squares,
        }
    }

    fn slot_mut(&mut self, kind: StatisticKind) -> &mut Option<NumericTablePtr> {
        match kind {
            StatisticKind::Minimum => &mut self.minimum,
            StatisticKind::Maximum => &mut self.maximum,
            StatisticKind::Sum => &mut self.sum,
            StatisticKind::SumSquares => &mut self.sum_squares,
        }
    }

    /// Table stored for `kind`, if any.
    pub fn get(&self, kind: StatisticKind) -> Option<&NumericTablePtr> {
        self.slot(kind).as_ref()
    }

    /// Store a table for `kind`, returning the previous one.
    pub fn set(
        &mut self,
        kind: StatisticKind,
        table: impl Into<Option<NumericTablePtr>>,
    ) -> Option<NumericTablePtr> {
        std::mem::replace(self.slot_mut(kind), table.into())
    }

    /// Returns true if no slot is filled.
    pub fn is_empty(&self) -> bool {
        StatisticKind::ALL.iter().all(|&k| self.slot(k).is_none())
    }

    /// Empty every slot.
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Row of `kind`'s table as `f64`, if present.
    pub fn values(&self, kind: StatisticKind) -> Result<Option<Vec<f64>>, TableError> {
        match self.get(kind) {
            Some(table) => Ok(Some(table.get_block_of_rows::<f64>(0, 1)?.into_owned())),
            None => Ok(None),
        }
    }
}

// =============================================================================
// Computation
// =============================================================================

/// Parallelism hint for [`compute_basic_statistics`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Parallelism {
    /// Process blocks one after another on the calling thread.
    #[default]
    Sequential,
    /// Process blocks on the rayon pool when there is more than one.
    Parallel,
}

impl Parallelism {
    /// Downgrade to sequential when there is at most one block (or when the
    /// crate is built without `parallel`).
    #[inline]
    pub fn for_blocks(self, num_blocks: usize) -> Self {
        if cfg!(feature = "parallel") && self == Parallelism::Parallel && num_blocks > 1 {
            Parallelism::Parallel
        } else {
            Parallelism::Sequential
        }
    }
}

#[derive(Debug, Clone)]
struct Partial {
    min: Vec<f64>,
    max: Vec<f64>,
    sum: Vec<f64>,
    sum_squares: Vec<f64>,
}

impl Partial {
    fn identity(width: usize) -> Self {
        Self {
            min: vec![f64::INFINITY; width],
            max: vec![f64::NEG_INFINITY; width],
            sum: vec![0.0; width],
            sum_squares: vec![0.0; width],
        }
    }

    fn accumulate(mut self, values: &[f64], width: usize) -> Self {
        for row in values.chunks_exact(width.max(1)) {
            for (j, &v) in row.iter().enumerate() {
                self.min[j] = self.min[j].min(v);
                self.max[j] = self.max[j].max(v);
                self.sum[j] += v;
                self.sum_squares[j] += v * v;
            }
        }
        self
    }

    fn merge(mut self, other: Partial) -> Self {
        for j in 0..self.min.len() {
            self.min[j] = self.min[j].min(other.min[j]);
            self.max[j] = self.max[j].max(other.max[j]);
            self.sum[j] += other.sum[j];
            self.sum_squares[j] += other.sum_squares[j];
        }
        self
    }
}

fn block_partial<N: NumericTable + ?Sized>(
    table: &N,
    start: usize,
    block_rows: usize,
) -> Result<Partial, TableError> {
    let width = table.num_columns();
    let n = block_rows.min(table.num_rows() - start);
    let block = table.get_block_of_rows::<f64>(start, n)?;
    Ok(Partial::identity(width).accumulate(&block, width))
}

/// Compute per-column minimum, maximum, sum and sum of squares.
///
/// Rows are read in disjoint blocks of `block_rows` (zero means one block)
/// and the per-block aggregates reduced. For a table without rows the
/// minimum and maximum are NaN and the sums are zero.
pub fn compute_basic_statistics<N: NumericTable + ?Sized>(
    table: &N,
    block_rows: usize,
    parallelism: Parallelism,
) -> Result<BasicStatistics, TableError> {
    let num_rows = table.num_rows();
    let width = table.num_columns();
    let block_rows = if block_rows == 0 { num_rows.max(1) } else { block_rows };
    let starts: Vec<usize> = (0..num_rows).step_by(block_rows).collect();
    let parallelism = parallelism.for_blocks(starts.len());
    debug!(num_rows, width, blocks = starts.len(), ?parallelism, "computing basic statistics");

    let total = match parallelism {
        #[cfg(feature = "parallel")]
        Parallelism::Parallel => {
            use rayon::prelude::*;
            starts
                .par_iter()
                .map(|&start| block_partial(table, start, block_rows))
                .try_reduce(|| Partial::identity(width), |a, b| Ok(a.merge(b)))?
        }
        _ => starts
            .iter()
            .try_fold(Partial::identity(width), |acc, &start| {
                block_partial(table, start, block_rows).map(|p| acc.merge(p))
            })?,
    };

    let (min, max) = if num_rows == 0 {
        (vec![f64::NAN; width], vec![f64::NAN; width])
    } else {
        (total.min, total.max)
    };

    let row = |values: Vec<f64>| -> Result<NumericTablePtr, TableError> {
        Ok(Arc::new(HomogenTable::from_rows(&[values])?))
    };
    let mut stats = BasicStatistics::default();
    stats.set(StatisticKind::Minimum, row(min)?);
    stats.set(StatisticKind::Maximum, row(max)?);
    stats.set(StatisticKind::Sum, row(total.sum)?);
    stats.set(StatisticKind::SumSquares, row(total.sum_squares)?);
    Ok(stats)
}

/// Compute the statistics of `table` and store them in its slots.
pub fn attach_basic_statistics<N: NumericTable + ?Sized>(
    table: &mut N,
    block_rows: usize,
    parallelism: Parallelism,
) -> Result<(), TableError> {
    let stats = compute_basic_statistics(&*table, block_rows, parallelism)?;
    *table.basic_statistics_mut() = stats;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn table() -> HomogenTable<f32> {
        HomogenTable::from_rows(&[[1.0f32, -2.0], [3.0, 4.0], [-5.0, 6.0], [7.0, 0.5]]).unwrap()
    }

    #[test]
    fn slots_start_empty() {
        let mut stats = BasicStatistics::default();
        assert!(stats.is_empty());
        let sum: NumericTablePtr = Arc::new(HomogenTable::<f64>::new(1, 2).unwrap());
        assert!(stats.set(StatisticKind::Sum, sum).is_none());
        assert!(stats.get(StatisticKind::Sum).is_some());
        assert!(stats.get(StatisticKind::Minimum).is_none());
        stats.clear();
        assert!(stats.is_empty());
    }

    #[test]
    fn sequential_statistics() {
        let stats = compute_basic_statistics(&table(), 3, Parallelism::Sequential).unwrap();
        assert_eq!(stats.values(StatisticKind::Minimum).unwrap(), Some(vec![-5.0, -2.0]));
        assert_eq!(stats.values(StatisticKind::Maximum).unwrap(), Some(vec![7.0, 6.0]));
        assert_eq!(stats.values(StatisticKind::Sum).unwrap(), Some(vec![6.0, 8.5]));
        let squares = stats.values(StatisticKind::SumSquares).unwrap().unwrap();
        assert_relative_eq!(squares[0], 84.0);
        assert_relative_eq!(squares[1], 56.25);
    }

    #[test]
    fn parallel_matches_sequential() {
        let data = table();
        let seq = compute_basic_statistics(&data, 1, Parallelism::Sequential).unwrap();
        let par = compute_basic_statistics(&data, 1, Parallelism::Parallel).unwrap();
        for kind in StatisticKind::ALL {
            assert_eq!(seq.values(kind).unwrap(), par.values(kind).unwrap(), "{kind:?}");
        }
    }

    #[test]
    fn empty_table() {
        let empty = HomogenTable::<f64>::new(0, 3).unwrap();
        let stats = compute_basic_statistics(&empty, 0, Parallelism::Parallel).unwrap();
        let min = stats.values(StatisticKind::Minimum).unwrap().unwrap();
        assert!(min.iter().all(|v| v.is_nan()));
        assert_eq!(stats.values(StatisticKind::Sum).unwrap(), Some(vec![0.0; 3]));
    }

    #[test]
    fn attach_fills_slots() {
        let mut data = table();
        attach_basic_statistics(&mut data, 2, Parallelism::Sequential).unwrap();
        let max = data.basic_statistics().get(StatisticKind::Maximum).unwrap();
        assert_eq!(max.num_rows(), 1);
        assert_eq!(max.num_columns(), 2);
    }

    #[test]
    fn parallelism_downgrades_single_block() {
        assert_eq!(Parallelism::Parallel.for_blocks(1), Parallelism::Sequential);
        assert_eq!(Parallelism::Sequential.for_blocks(8), Parallelism::Sequential);
    }
}
