//! Parallel executor for analysis work
//!
//! Uses Rayon for work-stealing parallelism with configurable limits.

use crate::error::{Error, Result};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Configuration for parallel execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ParallelConfig {
    /// Maximum number of parallel tasks (default: num_cpus)
    pub max_parallelism: usize,
    /// Fail fast on first error vs collect all results
    pub fail_fast: bool,
}

impl Default for ParallelConfig {
    fn default() -> Self {
        Self {
            max_parallelism: num_cpus::get(),
            fail_fast: false,
        }
    }
}

impl ParallelConfig {
    /// Single-threaded configuration
    pub fn sequential() -> Self {
        Self {
            max_parallelism: 1,
            fail_fast: false,
        }
    }
}

/// Parallel map over a slice of inputs
///
/// Inputs are only borrowed, so shared read-only state (the syntax tree, the anchor
/// vocabulary) can be captured by `mapper` without copying.
///
/// # Returns
/// * `Ok(results)` - one entry per item, in input order; each carries its own outcome
/// * `Err(Error)` - pool construction failed, or the first item error when `fail_fast` is set
///
/// # Example
/// ```ignore
/// let slices = parallel_map(&anchors, |a| slicer.slice(a), &ParallelConfig::default())?;
/// ```
pub fn parallel_map<T, R, F>(items: &[T], mapper: F, config: &ParallelConfig) -> Result<Vec<Result<R>>>
where
    T: Sync,
    R: Send,
    F: Fn(&T) -> Result<R> + Send + Sync,
{
    // Empty input fast path
    if items.is_empty() {
        return Ok(Vec::new());
    }

    // Single item or single thread - no pool needed
    if items.len() == 1 || config.max_parallelism <= 1 {
        let results: Vec<Result<R>> = items.iter().map(&mapper).collect();
        if config.fail_fast {
            if let Some(Err(e)) = results.iter().find(|r| r.is_err()) {
                return Err(e.clone());
            }
        }
        return Ok(results);
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.max_parallelism.min(items.len()))
        .build()
        .map_err(|e| Error::ThreadPool(format!("Failed to create thread pool: {}", e)))?;

    pool.install(|| {
        if config.fail_fast {
            items
                .par_iter()
                .map(|item| mapper(item).map(Ok))
                .collect::<Result<Vec<Result<R>>>>()
        } else {
            Ok(items.par_iter().map(&mapper).collect())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn halve(n: &i64) -> Result<i64> {
        if n % 2 == 0 {
            Ok(n / 2)
        } else {
            Err(Error::invariant(format!("{} is odd", n)))
        }
    }

    #[test]
    fn test_parallel_map_basic() {
        let results = parallel_map(&[2i64, 4, 6], halve, &ParallelConfig::default()).unwrap();
        let values: Vec<i64> = results.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(values, vec![1, 2, 3]);
    }

    #[test]
    fn test_parallel_map_empty() {
        let items: Vec<i64> = vec![];
        let results = parallel_map(&items, halve, &ParallelConfig::default()).unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_parallel_map_error_fail_fast() {
        let config = ParallelConfig {
            fail_fast: true,
            ..Default::default()
        };
        assert!(parallel_map(&[2i64, 3, 4], halve, &config).is_err());
    }

    #[test]
    fn test_parallel_map_error_collect_all() {
        let results = parallel_map(&[2i64, 3, 4], halve, &ParallelConfig::default()).unwrap();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_err()); // error kept in its slot
        assert!(results[2].is_ok());
    }
}
