// dbsync/src/sync/mod.rs
pub(crate) mod shortcuts;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use tokio_util::sync::CancellationToken;

use crate::command::{CUTOFF_FORMAT, CommandBuilder, Pipeline, run_pipeline};
use crate::config::{AppSettings, ConfigRegistry, Role};
use crate::inspect::{CatalogConnector, MySqlConnector};
use crate::plan;
use crate::tunnel::{SshTunnelOpener, TunnelOpener};
use crate::utils::is_valid_table_name;

pub use shortcuts::ShortcutTable;

/// Everything one invocation works with. Built once from a freshly loaded
/// registry and passed to every operation.
pub struct SyncContext {
    pub registry: ConfigRegistry,
    pub settings: AppSettings,
    pub tunnels: Box<dyn TunnelOpener>,
    pub catalogs: Box<dyn CatalogConnector>,
    pub cancel: CancellationToken,
}

impl SyncContext {
    pub fn new(registry: ConfigRegistry, settings: AppSettings, cancel: CancellationToken) -> Self {
        let tunnels = Box::new(SshTunnelOpener::new(settings.tunnel_timeout));
        SyncContext {
            registry,
            settings,
            tunnels,
            catalogs: Box::new(MySqlConnector),
            cancel,
        }
    }

    pub(crate) fn builder(&self) -> CommandBuilder {
        CommandBuilder::new(&self.settings.timestamp_column)
            .with_remote_port(self.settings.remote_port)
    }
}

/// Runs a pipeline, or only prints it (secrets hidden) under `--dry-run`.
async fn execute(ctx: &SyncContext, pipeline: &Pipeline) -> Result<()> {
    if ctx.settings.dry_run {
        println!("{}", pipeline.render(true)?);
        return Ok(());
    }
    run_pipeline(pipeline, ctx.settings.command_timeout, &ctx.cancel)
        .await
        .with_context(|| format!("{} failed", pipeline.description))
}

/// Full copy of the source database into the destination.
pub async fn copy(ctx: &SyncContext, source: &str, dest: &str) -> Result<()> {
    let src = ctx.registry.get(source, Role::Source)?;
    let dst = ctx.registry.get(dest, Role::Destination)?;
    println!("🔄 Copying {} into {}...", source, dest);
    let pipeline = ctx.builder().whole_copy_command(src, dst)?;
    execute(ctx, &pipeline).await
}

pub async fn copy_table(ctx: &SyncContext, source: &str, dest: &str, table: &str) -> Result<()> {
    if !is_valid_table_name(table) {
        anyhow::bail!("Invalid table name: {:?}", table);
    }
    let src = ctx.registry.get(source, Role::Source)?;
    let dst = ctx.registry.get(dest, Role::Destination)?;
    println!("🔄 Copying table {} from {} into {}...", table, source, dest);
    let pipeline = ctx.builder().single_table_copy_command(src, dst, table)?;
    execute(ctx, &pipeline).await
}

/// Appends the rows each destination table is missing, by primary key.
pub async fn incremental_copy(ctx: &SyncContext, source: &str, dest: &str) -> Result<()> {
    let plan = plan::incremental_copy_plan(ctx, source, dest)
        .await
        .context("Failed to plan incremental copy")?;
    if plan.copies.is_empty() {
        println!("✓ {} is already up to date with {}.", dest, source);
        return Ok(());
    }
    for copy in &plan.copies {
        println!("🔄 {}: rows with {} > {}", copy.table, copy.key_column, copy.after_id);
        execute(ctx, &copy.command).await?;
    }
    println!("✓ {} tables brought up to date.", plan.copies.len());
    Ok(())
}

/// Copies small or timestamp-less tables whole and the rest since `cutoff`.
pub async fn sync(
    ctx: &SyncContext,
    source: &str,
    dest: &str,
    cutoff: NaiveDateTime,
    small_table_threshold: i64,
) -> Result<()> {
    let plan = plan::time_based_sync_plan(ctx, source, dest, cutoff, small_table_threshold)
        .await
        .context("Failed to plan sync")?;
    println!(
        "Whole: {:?}\nSince {}: {:?}",
        plan.whole_tables,
        cutoff.format(CUTOFF_FORMAT),
        plan.incremental_tables
    );

    if let Some(whole) = &plan.whole_command {
        execute(ctx, whole).await?;
    }
    if let Some(incremental) = &plan.incremental_command {
        execute(ctx, incremental).await?;
    }
    Ok(())
}

/// Accepts RFC 3339, `YYYY-MM-DD HH:MM:SS` or a bare date (midnight).
pub fn parse_cutoff(raw: &str) -> Result<NaiveDateTime> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Ok(dt.naive_local());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(raw, CUTOFF_FORMAT) {
        return Ok(dt);
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .with_context(|| format!("Invalid cutoff time: {}", raw))
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::inspect::testing::FakeConnector;
    use crate::tunnel::testing::FakeTunnels;
    use std::path::Path;

    pub(crate) const REGISTRY: &str = r#"
development:
  adapter: mysql2
  username: root
  password: secret
  database: shop_development
  socket: /tmp/mysql.sock

production:
  adapter: mysql2
  host: db.internal
  username: shop
  password: "p@ss word"
  database: shop_production
  server: gateway.example.com
  server_username: deploy
"#;

    pub(crate) fn context(tunnels: FakeTunnels, catalogs: FakeConnector) -> SyncContext {
        SyncContext {
            registry: ConfigRegistry::from_yaml(Path::new("database.yml"), REGISTRY).unwrap(),
            settings: AppSettings::default(),
            tunnels: Box::new(tunnels),
            catalogs: Box::new(catalogs),
            cancel: CancellationToken::new(),
        }
    }
}
