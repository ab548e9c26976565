// dbsync/src/plan/logic.rs
use std::collections::BTreeMap;

use crate::inspect::TableInfo;

/// Tables whose source is ahead of the destination, with the destination's
/// current max id. Tables with a missing id on either side are skipped.
pub fn tables_to_copy(
    dest_ids: &BTreeMap<String, Option<i64>>,
    src_ids: &BTreeMap<String, Option<i64>>,
) -> Vec<(String, i64)> {
    dest_ids
        .iter()
        .filter_map(|(table, dest)| {
            let dest = (*dest)?;
            let src = src_ids.get(table).copied().flatten()?;
            if src > dest {
                Some((table.clone(), dest))
            } else {
                tracing::debug!("{} is up to date (source {}, destination {})", table, src, dest);
                None
            }
        })
        .collect()
}

/// Splits tables into `(incremental, whole)`. A table is incremental when it
/// has `timestamp_column` and its max id exceeds `threshold`.
pub fn partition_tables(
    tables: &BTreeMap<String, TableInfo>,
    timestamp_column: &str,
    threshold: i64,
) -> (Vec<String>, Vec<String>) {
    tables
        .values()
        .map(|info| {
            let eligible = info.has_column(timestamp_column)
                && info.max_id.is_some_and(|rows| rows > threshold);
            (info.name.clone(), eligible)
        })
        .fold((Vec::new(), Vec::new()), |(mut incremental, mut whole), (name, eligible)| {
            if eligible {
                incremental.push(name);
            } else {
                whole.push(name);
            }
            (incremental, whole)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(pairs: &[(&str, Option<i64>)]) -> BTreeMap<String, Option<i64>> {
        pairs.iter().map(|(t, v)| (t.to_string(), *v)).collect()
    }

    fn table(name: &str, columns: &[&str], max_id: Option<i64>) -> (String, TableInfo) {
        (
            name.to_string(),
            TableInfo {
                name: name.to_string(),
                columns: columns.iter().map(|c| c.to_string()).collect(),
                max_id,
            },
        )
    }

    #[test]
    fn test_only_tables_with_newer_source_rows_are_copied() {
        let dest = ids(&[("orders", Some(10)), ("logs", None)]);
        let src = ids(&[("orders", Some(15)), ("logs", Some(5))]);
        assert_eq!(tables_to_copy(&dest, &src), vec![("orders".to_string(), 10)]);
    }

    #[test]
    fn test_equal_behind_and_missing_tables_are_skipped() {
        let dest = ids(&[
            ("equal", Some(7)),
            ("behind", Some(9)),
            ("gone", Some(1)),
            ("empty_source", Some(1)),
        ]);
        let src = ids(&[("equal", Some(7)), ("behind", Some(3)), ("empty_source", None)]);
        assert!(tables_to_copy(&dest, &src).is_empty());
    }

    #[test]
    fn test_source_only_tables_are_ignored() {
        let dest = ids(&[]);
        let src = ids(&[("orders", Some(15))]);
        assert!(tables_to_copy(&dest, &src).is_empty());
    }

    #[test]
    fn test_partition_by_column_and_threshold() {
        let tables: BTreeMap<String, TableInfo> = [
            table("big", &["id", "created_at"], Some(5000)),
            table("small", &["id", "created_at"], Some(500)),
            table("no_column", &["id", "name"], Some(1_000_000)),
            table("empty", &["id", "created_at"], None),
            table("edge", &["id", "created_at"], Some(1000)),
        ]
        .into_iter()
        .collect();

        let (incremental, whole) = partition_tables(&tables, "created_at", 1000);
        assert_eq!(incremental, vec!["big"]);
        assert_eq!(whole, vec!["edge", "empty", "no_column", "small"]);
    }
}
