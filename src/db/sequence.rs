//! Cached sequence id allocation.
//!
//! `SequenceAllocator` trades one sequence round trip for a block of
//! `batch_size` ids. Each refill takes one base value `b` from the source and
//! caches `b..b + batch_size`, so the database sequence must advance by at
//! least `batch_size` per call for ranges never to overlap. Gaps (ids cached
//! but never handed out) are acceptable; duplicates are not.

use crate::config::{DEFAULT_ID_BATCH_SIZE, DEFAULT_ID_LOW_WATER_MARK, DEFAULT_SEQUENCE_NAME};
use crate::db::crud::CrudEngine;
use crate::db::executor::Target;
use crate::error::{DbError, DbResult};
use crate::models::{Statement, integer_column};
use crate::queue::Queue;
use std::future::Future;
use tokio::sync::Mutex;
use tracing::debug;

/// Column the next-value statement projects.
const NEXTVAL_COLUMN: &str = "nextval";

/// Provider of sequence base values.
pub trait SequenceSource: Send + Sync {
    /// Name used in logs and `Allocation` errors.
    fn name(&self) -> &str;

    /// Advance the sequence and return the value it issued.
    fn next_value(&self) -> impl Future<Output = DbResult<i64>> + Send;
}

/// Sequence backed by the database: `nextval` on MySQL/PostgreSQL, the
/// `SEQUENCE_DATA` table on SQLite.
#[derive(Debug, Clone)]
pub struct DbSequenceSource {
    engine: CrudEngine,
    sequence_name: String,
    statement: Statement,
}

impl DbSequenceSource {
    pub fn new(engine: CrudEngine, sequence_name: impl Into<String>) -> DbResult<Self> {
        let sequence_name = sequence_name.into();
        let statement = engine.builder().next_sequence_value(&sequence_name)?;
        Ok(Self {
            engine,
            sequence_name,
            statement,
        })
    }

    /// Source for the default `ID_SEQ` sequence.
    pub fn with_default_name(engine: CrudEngine) -> DbResult<Self> {
        Self::new(engine, DEFAULT_SEQUENCE_NAME)
    }
}

impl SequenceSource for DbSequenceSource {
    fn name(&self) -> &str {
        &self.sequence_name
    }

    async fn next_value(&self) -> DbResult<i64> {
        let rows = self
            .engine
            .executor()
            .fetch_all(Target::Pool(self.engine.pool()), &self.statement)
            .await?;

        rows.first()
            .and_then(|row| integer_column(row, NEXTVAL_COLUMN))
            .ok_or_else(|| {
                DbError::allocation(
                    &self.sequence_name,
                    "sequence returned no value (missing or exhausted)",
                )
            })
    }
}

/// Hands out unique ids from a locally cached block.
pub struct SequenceAllocator<S> {
    source: S,
    cache: Mutex<Queue<i64>>,
    batch_size: u32,
    low_water_mark: u32,
}

impl<S: SequenceSource> SequenceAllocator<S> {
    /// Allocator with the default batch size (500) and low-water mark (10).
    pub fn new(source: S) -> Self {
        Self {
            source,
            cache: Mutex::new(Queue::with_capacity(DEFAULT_ID_BATCH_SIZE as usize)),
            batch_size: DEFAULT_ID_BATCH_SIZE,
            low_water_mark: DEFAULT_ID_LOW_WATER_MARK,
        }
    }

    pub fn with_settings(source: S, batch_size: u32, low_water_mark: u32) -> DbResult<Self> {
        if batch_size == 0 {
            return Err(DbError::invalid_input("batch_size must be greater than 0"));
        }
        Ok(Self {
            source,
            cache: Mutex::new(Queue::with_capacity(batch_size as usize)),
            batch_size,
            low_water_mark,
        })
    }

    pub fn batch_size(&self) -> u32 {
        self.batch_size
    }

    pub fn low_water_mark(&self) -> u32 {
        self.low_water_mark
    }

    /// Next unused id. Refills the cache first when it is empty or below the
    /// low-water mark.
    ///
    /// Check, refill and dequeue happen under one lock, so concurrent callers
    /// never trigger overlapping refills.
    pub async fn get_id(&self) -> DbResult<i64> {
        let mut cache = self.cache.lock().await;
        if cache.is_empty() || cache.size() < self.low_water_mark as usize {
            self.refill(&mut cache).await?;
        }
        cache.dequeue().ok_or_else(|| {
            DbError::allocation(self.source.name(), "id cache is empty after refill")
        })
    }

    /// Number of ids currently cached.
    pub async fn cached(&self) -> usize {
        self.cache.lock().await.size()
    }

    async fn refill(&self, cache: &mut Queue<i64>) -> DbResult<()> {
        let name = self.source.name();
        let base = self.source.next_value().await.map_err(|e| match e {
            DbError::Allocation { .. } => e,
            other => DbError::allocation(name, other.to_string()),
        })?;
        let last = base
            .checked_add(i64::from(self.batch_size) - 1)
            .ok_or_else(|| DbError::allocation(name, format!("id range overflows at {}", base)))?;

        cache.extend(base..=last);
        debug!(
            sequence = %name,
            first = base,
            last = last,
            cached = cache.size(),
            "Refilled id cache"
        );
        Ok(())
    }
}

impl<S> std::fmt::Debug for SequenceAllocator<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceAllocator")
            .field("batch_size", &self.batch_size)
            .field("low_water_mark", &self.low_water_mark)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

    /// Sequence that advances by `step`, like a provisioned database sequence.
    struct StepSource {
        next: AtomicI64,
        step: i64,
        calls: Arc<AtomicUsize>,
    }

    impl StepSource {
        fn new(start: i64, step: i64) -> Self {
            Self {
                next: AtomicI64::new(start),
                step,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl SequenceSource for StepSource {
        fn name(&self) -> &str {
            "TEST_SEQ"
        }

        async fn next_value(&self) -> DbResult<i64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(self.next.fetch_add(self.step, Ordering::SeqCst))
        }
    }

    struct FailingSource;

    impl SequenceSource for FailingSource {
        fn name(&self) -> &str {
            "BROKEN_SEQ"
        }

        async fn next_value(&self) -> DbResult<i64> {
            Err(DbError::query("SELECT nextval(?)", "FUNCTION nextval does not exist", None))
        }
    }

    #[tokio::test]
    async fn test_first_call_refills_whole_batch() {
        let allocator = SequenceAllocator::new(StepSource::new(1000, 500));
        assert_eq!(allocator.cached().await, 0);
        assert_eq!(allocator.get_id().await.unwrap(), 1000);
        assert_eq!(allocator.cached().await, 499);
    }

    #[tokio::test]
    async fn test_sequential_ids_are_distinct_and_increasing() {
        let source = StepSource::new(1, 20);
        let calls = Arc::clone(&source.calls);
        let allocator = SequenceAllocator::with_settings(source, 20, 5).unwrap();

        let mut previous = 0;
        for _ in 0..200 {
            let id = allocator.get_id().await.unwrap();
            assert!(id > previous, "{} should follow {}", id, previous);
            previous = id;
        }
        // 16 calls on the first block, then one refill per 20 calls
        assert_eq!(calls.load(Ordering::SeqCst), 11);
    }

    #[tokio::test]
    async fn test_refill_only_below_low_water_mark() {
        let source = StepSource::new(1, 10);
        let calls = Arc::clone(&source.calls);
        let allocator = SequenceAllocator::with_settings(source, 10, 3).unwrap();
        for _ in 0..8 {
            allocator.get_id().await.unwrap();
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(allocator.cached().await, 2);

        allocator.get_id().await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(allocator.cached().await, 11);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_callers_never_share_an_id() {
        let source = StepSource::new(1, 25);
        let allocator = Arc::new(SequenceAllocator::with_settings(source, 25, 10).unwrap());

        let mut handles = Vec::new();
        for _ in 0..16 {
            let allocator = Arc::clone(&allocator);
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..50 {
                    ids.push(allocator.get_id().await.unwrap());
                }
                ids
            }));
        }

        let mut seen = HashSet::new();
        for handle in handles {
            for id in handle.await.unwrap() {
                assert!(seen.insert(id), "id {} issued twice", id);
            }
        }
        assert_eq!(seen.len(), 800);
    }

    #[tokio::test]
    async fn test_source_failure_is_allocation_error() {
        let allocator = SequenceAllocator::new(FailingSource);
        let err = allocator.get_id().await.unwrap_err();
        assert!(matches!(err, DbError::Allocation { ref sequence, .. } if sequence == "BROKEN_SEQ"));
        assert!(err.is_retryable());
        assert_eq!(allocator.cached().await, 0);
    }

    #[tokio::test]
    async fn test_range_overflow_is_allocation_error() {
        let allocator = SequenceAllocator::new(StepSource::new(i64::MAX - 10, 500));
        let err = allocator.get_id().await.unwrap_err();
        assert!(matches!(err, DbError::Allocation { .. }));
    }

    #[tokio::test]
    async fn test_zero_low_water_mark_refills_when_empty() {
        let source = StepSource::new(1, 4);
        let calls = Arc::clone(&source.calls);
        let allocator = SequenceAllocator::with_settings(source, 4, 0).unwrap();
        let mut issued = Vec::new();
        for _ in 0..6 {
            issued.push(allocator.get_id().await.unwrap());
        }
        assert_eq!(issued, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let result = SequenceAllocator::with_settings(StepSource::new(1, 1), 0, 10);
        assert!(matches!(result, Err(DbError::InvalidInput { .. })));
    }
}
