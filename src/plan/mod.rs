// dbsync/src/plan/mod.rs
pub(crate) mod logic;

use chrono::NaiveDateTime;
use serde::Serialize;
use std::collections::BTreeMap;

use crate::command::Pipeline;
use crate::config::Role;
use crate::errors::Result;
use crate::inspect::{self, Catalog, Endpoint, release};
use crate::sync::SyncContext;
use crate::tunnel::{TunnelSpec, with_tunnel};

pub use logic::{partition_tables, tables_to_copy};

/// Current max primary key per table, plus the key column it was read from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MaxIds {
    pub values: BTreeMap<String, Option<i64>>,
    pub key_columns: BTreeMap<String, String>,
}

/// One table to bring forward by id.
#[derive(Debug, Clone, Serialize)]
pub struct PlannedCopy {
    pub table: String,
    pub key_column: String,
    pub after_id: i64,
    pub command: Pipeline,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IncrementalPlan {
    pub copies: Vec<PlannedCopy>,
}

/// Outcome of a time-based plan. A side with no tables has no command.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncPlan {
    pub incremental_tables: Vec<String>,
    pub whole_tables: Vec<String>,
    pub incremental_command: Option<Pipeline>,
    pub whole_command: Option<Pipeline>,
}

/// Max id of every table except `excluded`, read with a single UNION query.
pub async fn max_ids(catalog: &mut dyn Catalog, excluded: &str) -> Result<MaxIds> {
    let tables: Vec<String> = catalog
        .tables()
        .await?
        .into_iter()
        .filter(|t| t != excluded)
        .collect();
    let mut key_columns = catalog.primary_keys().await?;
    key_columns.retain(|table, _| tables.contains(table));

    let keys: Vec<(String, String)> = key_columns
        .iter()
        .map(|(t, k)| (t.clone(), k.clone()))
        .collect();
    let found = catalog.max_values(&keys).await?;

    let values = tables
        .into_iter()
        .map(|table| {
            let value = found.get(&table).copied().flatten();
            (table, value)
        })
        .collect();
    Ok(MaxIds {
        values,
        key_columns,
    })
}

/// Commands that append the rows each destination table is missing.
pub async fn incremental_copy_plan(
    ctx: &SyncContext,
    source_name: &str,
    dest_name: &str,
) -> Result<IncrementalPlan> {
    let source = ctx.registry.get(source_name, Role::Source)?;
    let dest = ctx.registry.get(dest_name, Role::Destination)?;
    let excluded = ctx.settings.excluded_table.as_str();

    let mut dest_catalog = ctx.catalogs.connect(dest, &Endpoint::direct(dest)).await?;
    let dest_result = max_ids(dest_catalog.as_mut(), excluded).await;
    let dest_ids = release(dest_catalog, dest_result).await?;

    let spec = TunnelSpec::for_source(source, &ctx.settings);
    let src_ids = with_tunnel(ctx.tunnels.as_ref(), &spec, &ctx.cancel, |port| async move {
        let mut catalog = ctx
            .catalogs
            .connect(source, &Endpoint::tunneled(port))
            .await?;
        let result = max_ids(catalog.as_mut(), excluded).await;
        release(catalog, result).await
    })
    .await?;

    let builder = ctx.builder();
    let mut copies = Vec::new();
    for (table, after_id) in tables_to_copy(&dest_ids.values, &src_ids.values) {
        let key_column = src_ids
            .key_columns
            .get(&table)
            .or_else(|| dest_ids.key_columns.get(&table))
            .cloned()
            .unwrap_or_else(|| "id".to_string());
        let command = builder.incremental_command(source, dest, &table, &key_column, after_id)?;
        tracing::info!("{}: copying rows with {} > {}", table, key_column, after_id);
        copies.push(PlannedCopy {
            table,
            key_column,
            after_id,
            command,
        });
    }
    Ok(IncrementalPlan { copies })
}

/// Splits the source's tables into rows-since-`cutoff` and full copies.
pub async fn time_based_sync_plan(
    ctx: &SyncContext,
    source_name: &str,
    dest_name: &str,
    cutoff: NaiveDateTime,
    small_table_threshold: i64,
) -> Result<SyncPlan> {
    let source = ctx.registry.get(source_name, Role::Source)?;
    let dest = ctx.registry.get(dest_name, Role::Destination)?;

    let tables = inspect::inspect(ctx, source_name).await?;
    let (incremental_tables, whole_tables) =
        partition_tables(&tables, &ctx.settings.timestamp_column, small_table_threshold);
    tracing::info!(
        "{} tables copied since {}, {} copied whole",
        incremental_tables.len(),
        cutoff,
        whole_tables.len()
    );

    let builder = ctx.builder();
    let incremental_command = if incremental_tables.is_empty() {
        None
    } else {
        Some(builder.time_window_command(source, dest, &incremental_tables, cutoff)?)
    };
    let whole_command = if whole_tables.is_empty() {
        None
    } else {
        Some(builder.tables_copy_command(source, dest, &whole_tables)?)
    };

    Ok(SyncPlan {
        incremental_tables,
        whole_tables,
        incremental_command,
        whole_command,
    })
}
