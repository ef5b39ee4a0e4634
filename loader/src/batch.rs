use crate::bail;
use crate::error::{ErrorKind, LoadResult};
use crate::types::{Record, RecordBatch};

/// Splits records into consecutive batches of at most `max_batch_size` rows.
///
/// Batch `i` holds records `[i * max, (i + 1) * max)` in input order, the last one may be
/// shorter, and an empty input yields no batches at all.
pub fn split(records: Vec<Record>, max_batch_size: usize) -> LoadResult<Vec<RecordBatch>> {
    if max_batch_size == 0 {
        bail!(
            ErrorKind::ConfigurationError,
            "Batch size must be greater than zero"
        );
    }

    let mut batches = Vec::with_capacity(records.len().div_ceil(max_batch_size));
    let mut rows = records.into_iter().peekable();
    while rows.peek().is_some() {
        let chunk: Vec<Record> = rows.by_ref().take(max_batch_size).collect();
        batches.push(RecordBatch::new(batches.len(), chunk));
    }

    Ok(batches)
}
