// dbsync/src/command/mod.rs
pub(crate) mod exec;

use chrono::NaiveDateTime;
use serde::Serialize;
use std::borrow::Cow;

use crate::config::Environment;
use crate::errors::{AppError, Result};
use crate::inspect::Endpoint;
use crate::inspect::sql::quote_ident;

pub use exec::run_pipeline;

const REDACTED: &str = "******";
const BASE_DUMP_FLAGS: &[&str] = &["--single-transaction", "--skip-lock-tables"];
const INCREMENTAL_DUMP_FLAGS: &[&str] = &[
    "--no-create-info",
    "--skip-add-drop-table",
    "--insert-ignore",
];
pub const CUTOFF_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvVar {
    pub key: String,
    #[serde(skip)]
    pub value: String,
    pub secret: bool,
}

/// One process of a pipeline. `display_args` mirrors `args` with secrets
/// replaced, for logging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Stage {
    pub program: String,
    #[serde(skip)]
    pub args: Vec<String>,
    #[serde(rename = "args")]
    pub display_args: Vec<String>,
    pub env: Vec<EnvVar>,
}

impl Stage {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let args: Vec<String> = args.into_iter().map(Into::into).collect();
        Stage {
            program: program.to_string(),
            display_args: args.clone(),
            args,
            env: Vec::new(),
        }
    }

    pub fn with_display_args(mut self, display_args: Vec<String>) -> Self {
        self.display_args = display_args;
        self
    }

    pub fn with_env(mut self, key: &str, value: &str, secret: bool) -> Self {
        self.env.push(EnvVar {
            key: key.to_string(),
            value: value.to_string(),
            secret,
        });
        self
    }

    fn render(&self, redact: bool) -> Result<String> {
        let mut words = Vec::with_capacity(self.env.len() + 1);
        for var in &self.env {
            let value = if redact && var.secret {
                REDACTED
            } else {
                var.value.as_str()
            };
            words.push(format!("{}={}", var.key, quote(value)?));
        }
        let args = if redact { &self.display_args } else { &self.args };
        words.push(join(std::iter::once(self.program.as_str()).chain(args.iter().map(String::as_str)))?);
        Ok(words.join(" "))
    }
}

/// Processes connected stdout to stdin, in order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Pipeline {
    pub description: String,
    /// The mysqldump argument list run on the gateway, without credentials.
    pub dump_args: Vec<String>,
    pub stages: Vec<Stage>,
}

impl Pipeline {
    /// Shell-equivalent form of the pipeline.
    pub fn render(&self, redact: bool) -> Result<String> {
        let parts = self
            .stages
            .iter()
            .map(|stage| stage.render(redact))
            .collect::<Result<Vec<_>>>()?;
        Ok(parts.join(" | "))
    }
}

fn quote(word: &str) -> Result<Cow<'_, str>> {
    shlex::try_quote(word).map_err(|e| AppError::InvalidInput(format!("cannot quote argument: {}", e)))
}

fn join<'a>(words: impl IntoIterator<Item = &'a str>) -> Result<String> {
    shlex::try_join(words).map_err(|e| AppError::InvalidInput(format!("cannot quote command: {}", e)))
}

/// Assembles `ssh gateway 'mysqldump ... | gzip' | gunzip -c | mysql ...`.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    timestamp_column: String,
    /// Port passed to mysqldump for sources that set none.
    remote_port: Option<u16>,
}

impl CommandBuilder {
    pub fn new(timestamp_column: &str) -> Self {
        CommandBuilder {
            timestamp_column: timestamp_column.to_string(),
            remote_port: None,
        }
    }

    pub fn with_remote_port(mut self, port: u16) -> Self {
        self.remote_port = Some(port);
        self
    }

    /// Consistent snapshot of the whole source database.
    pub fn whole_copy_command(&self, src: &Environment, dst: &Environment) -> Result<Pipeline> {
        self.pipeline(
            format!("copy {} -> {}", src.name, dst.name),
            src,
            dst,
            self.dump_args(src, BASE_DUMP_FLAGS, None, &[]),
        )
    }

    pub fn single_table_copy_command(
        &self,
        src: &Environment,
        dst: &Environment,
        table: &str,
    ) -> Result<Pipeline> {
        self.tables_copy_command(src, dst, &[table.to_string()])
    }

    /// Whole copy restricted to `tables`. An empty list means every table.
    pub fn tables_copy_command(
        &self,
        src: &Environment,
        dst: &Environment,
        tables: &[String],
    ) -> Result<Pipeline> {
        self.pipeline(
            format!("copy {} -> {} [{}]", src.name, dst.name, tables.join(", ")),
            src,
            dst,
            self.dump_args(src, BASE_DUMP_FLAGS, None, tables),
        )
    }

    /// Rows of `table` whose `key_column` is above `after_id`, inserted with
    /// `INSERT IGNORE` and without touching the table definition.
    pub fn incremental_command(
        &self,
        src: &Environment,
        dst: &Environment,
        table: &str,
        key_column: &str,
        after_id: i64,
    ) -> Result<Pipeline> {
        let predicate = format!("{} > {}", quote_ident(key_column), after_id);
        self.pipeline(
            format!("incremental {} -> {} [{} > {}]", src.name, dst.name, table, after_id),
            src,
            dst,
            self.dump_args(
                src,
                &incremental_flags(),
                Some(predicate),
                &[table.to_string()],
            ),
        )
    }

    /// Rows created after `cutoff` across `tables`.
    pub fn time_window_command(
        &self,
        src: &Environment,
        dst: &Environment,
        tables: &[String],
        cutoff: NaiveDateTime,
    ) -> Result<Pipeline> {
        let predicate = format!(
            "{} > '{}'",
            quote_ident(&self.timestamp_column),
            cutoff.format(CUTOFF_FORMAT)
        );
        self.pipeline(
            format!(
                "time window {} -> {} since {}",
                src.name,
                dst.name,
                cutoff.format(CUTOFF_FORMAT)
            ),
            src,
            dst,
            self.dump_args(src, &incremental_flags(), Some(predicate), tables),
        )
    }

    fn dump_args(
        &self,
        src: &Environment,
        flags: &[&str],
        predicate: Option<String>,
        tables: &[String],
    ) -> Vec<String> {
        let mut args: Vec<String> = vec!["mysqldump".to_string()];
        args.extend(flags.iter().map(|f| f.to_string()));
        if let Some(predicate) = predicate {
            args.push(format!("--where={}", predicate));
        }
        args.push(format!("--user={}", src.username()));
        args.push(format!("--host={}", src.host()));
        if let Some(port) = src.port.or(self.remote_port) {
            args.push(format!("--port={}", port));
        }
        args.push(src.database().to_string());
        args.extend(tables.iter().cloned());
        args
    }

    fn pipeline(
        &self,
        description: String,
        src: &Environment,
        dst: &Environment,
        dump_args: Vec<String>,
    ) -> Result<Pipeline> {
        let remote = remote_script(&dump_args, src.password())?;
        let remote_display = remote_script(&dump_args, REDACTED)?;
        let target = format!("{}@{}", src.gateway_user(), src.gateway_host());

        let ssh = Stage::new("ssh", ["-o", "BatchMode=yes", target.as_str(), remote.as_str()])
            .with_display_args(vec![
                "-o".to_string(),
                "BatchMode=yes".to_string(),
                target.clone(),
                remote_display,
            ]);
        let gunzip = Stage::new("gunzip", ["-c"]);
        let mysql = Stage::new("mysql", restore_args(dst)).with_env("MYSQL_PWD", dst.password(), true);

        Ok(Pipeline {
            description,
            dump_args,
            stages: vec![ssh, gunzip, mysql],
        })
    }
}

fn incremental_flags() -> Vec<&'static str> {
    BASE_DUMP_FLAGS
        .iter()
        .chain(INCREMENTAL_DUMP_FLAGS)
        .copied()
        .collect()
}

/// The command line the gateway's shell runs. Every word is quoted; only the
/// pipe into gzip is left to the remote shell.
fn remote_script(dump_args: &[String], password: &str) -> Result<String> {
    Ok(format!(
        "MYSQL_PWD={} {} | gzip",
        quote(password)?,
        join(dump_args.iter().map(String::as_str))?
    ))
}

/// Connection flags for the local `mysql` client. They follow the same
/// endpoint rule as the catalog connection, so max ids are read from the
/// server the restore writes to.
fn restore_args(dst: &Environment) -> Vec<String> {
    let mut args = vec![format!("--user={}", dst.username())];
    match Endpoint::direct(dst) {
        Endpoint::Socket(socket) => args.push(format!("--socket={}", socket.display())),
        Endpoint::Tcp { host, port } => {
            // `mysql` treats "localhost" as its default socket unless told otherwise.
            args.push("--protocol=TCP".to_string());
            args.push(format!("--host={}", host));
            args.push(format!("--port={}", port));
        }
    }
    args.push(dst.database().to_string());
    args
}
