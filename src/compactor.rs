//! Shard compaction: merges every open shard for a table into one
//! (spec.md §4.11).
//!
//! Grounded on `nitrite-fjall-adapter`'s LSM compaction concerns, which
//! `fjall` performs internally but which this engine must implement by
//! hand since shards here are a hand-rolled format rather than delegated
//! to `fjall`. The merge itself follows the same tournament-over-cursors
//! shape as the teacher's `common::stream::sorted_stream` merge support,
//! generalized from a document stream to weighted packed rows.

use crate::cursor::RowCursor;
use crate::error::GnitzResult;
use crate::row_accessor::{compare_rows, OwnedRowAccessor};
use crate::schema::Schema;
use crate::shard::{ShardView, ShardWriter};
use crate::spine::Spine;
use std::cmp::Ordering;
use std::path::Path;

/// What a successful compaction replaced.
pub struct CompactOutcome {
    pub input_filenames: Vec<String>,
    pub output_filename: String,
}

/// Merges every shard currently registered for `table_id` into one new
/// shard, summing the weight of rows sharing a `(pk, payload)` and
/// dropping any whose net weight lands on zero (spec.md §4.11: "net-weight
/// for every `(pk, payload)` preserved across compaction, modulo ghost
/// removal"). Returns `Ok(None)` if there are fewer than two shards — not
/// enough to merge.
pub fn compact_table(spine: &Spine, table_id: u64, schema: &Schema, dir: &Path) -> GnitzResult<Option<CompactOutcome>> {
    let handles = spine.handles_for(table_id);
    if handles.len() < 2 {
        return Ok(None);
    }

    let mut cursors: Vec<_> = handles.iter().map(|h| h.view().cursor()).collect();
    let mut min_lsn = u64::MAX;
    let mut max_lsn = 0u64;
    for handle in &handles {
        min_lsn = min_lsn.min(handle.min_lsn());
        max_lsn = max_lsn.max(handle.max_lsn());
    }

    let mut writer = ShardWriter::new(schema.clone());
    writer.set_lsn_range(min_lsn, max_lsn);

    loop {
        let valid: Vec<usize> = cursors.iter().enumerate().filter(|(_, c)| c.is_valid()).map(|(i, _)| i).collect();
        let Some(min_key) = valid.iter().map(|&i| cursors[i].key()).min() else {
            break;
        };

        // Pull every row at `min_key` off every cursor currently parked
        // there, then consolidate by payload.
        let mut group: Vec<(OwnedRowAccessor, i64)> = Vec::new();
        for &i in &valid {
            while cursors[i].is_valid() && cursors[i].key() == min_key {
                let owned = OwnedRowAccessor::from_accessor(schema.clone(), cursors[i].accessor());
                group.push((owned, cursors[i].weight()));
                cursors[i].advance();
            }
        }
        group.sort_by(|a, b| compare_rows(&a.0, &b.0));

        let mut idx = 0;
        while idx < group.len() {
            let mut end = idx + 1;
            let mut weight = group[idx].1;
            while end < group.len() && compare_rows(&group[idx].0, &group[end].0) == Ordering::Equal {
                weight += group[end].1;
                end += 1;
            }
            if weight != 0 {
                writer.append(min_key, weight, &group[idx].0)?;
            }
            idx = end;
        }
    }

    let output_filename = format!("table-{table_id:020}-compacted-{max_lsn:010}.gnz");
    let output_path = dir.join(&output_filename);
    writer.finalize(&output_path)?;

    let view = ShardView::open(&output_path, schema.clone())?;
    let input_filenames: Vec<String> = handles.iter().map(|h| h.filename().to_string()).collect();
    spine.swap_shards(table_id, &input_filenames, output_filename.clone(), view)?;

    Ok(Some(CompactOutcome { input_filenames, output_filename }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::refcount::RefCounter;
    use crate::schema::{ColumnType, SchemaBuilder};
    use crate::value::Value;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn schema() -> Schema {
        SchemaBuilder::new().pk("id", ColumnType::U64).column("v", ColumnType::I64, false).build().unwrap()
    }

    fn write_shard(dir: &Path, name: &str, schema: &Schema, rows: &[(u128, i64, i64)]) {
        let mut w = ShardWriter::new(schema.clone());
        for &(pk, weight, v) in rows {
            let row = OwnedRowAccessor::new(schema.clone(), vec![Value::I64(v)]);
            w.append(pk, weight, &row).unwrap();
        }
        w.finalize(dir.join(name)).unwrap();
    }

    fn spine_with_shards(dir: &Path, schema: &Schema, shards: &[(&str, &[(u128, i64, i64)])]) -> Spine {
        let refcount = Arc::new(RefCounter::new(dir));
        let spine = Spine::new(refcount);
        for (name, rows) in shards {
            write_shard(dir, name, schema, rows);
            let view = ShardView::open(dir.join(name), schema.clone()).unwrap();
            spine.add_shard(1, name.to_string(), view).unwrap();
        }
        spine
    }

    #[test]
    fn merges_shards_summing_matching_rows() {
        let dir = tempdir().unwrap();
        let schema = schema();
        let spine = spine_with_shards(
            dir.path(),
            &schema,
            &[("a.gnz", &[(1, 1, 10), (2, 1, 20)]), ("b.gnz", &[(1, 1, 10), (3, 1, 30)])],
        );

        let outcome = compact_table(&spine, 1, &schema, dir.path()).unwrap().unwrap();
        assert_eq!(outcome.input_filenames.len(), 2);

        let handles = spine.handles_for(1);
        assert_eq!(handles.len(), 1);
        let view = handles[0].view();
        assert_eq!(view.row_count(), 3);

        let idx = view.find_row_index(1);
        assert_eq!(view.weight_at(idx), 2);
    }

    #[test]
    fn net_zero_weight_rows_are_dropped() {
        let dir = tempdir().unwrap();
        let schema = schema();
        let spine = spine_with_shards(dir.path(), &schema, &[("a.gnz", &[(1, 1, 10)]), ("b.gnz", &[(1, -1, 10)])]);

        let outcome = compact_table(&spine, 1, &schema, dir.path()).unwrap().unwrap();
        let handles = spine.handles_for(1);
        assert_eq!(handles[0].view().row_count(), 0);
        let _ = outcome;
    }

    #[test]
    fn fewer_than_two_shards_is_a_no_op() {
        let dir = tempdir().unwrap();
        let schema = schema();
        let spine = spine_with_shards(dir.path(), &schema, &[("a.gnz", &[(1, 1, 10)])]);
        assert!(compact_table(&spine, 1, &schema, dir.path()).unwrap().is_none());
    }
}
