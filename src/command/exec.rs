// dbsync/src/command/exec.rs
use std::io;
use std::process::{Output, Stdio};
use std::time::Duration;
use tokio::process::Command;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::Pipeline;
use crate::errors::{AppError, Result};
use crate::utils::find_executable;

/// Running stages. Dropping this aborts the waiting tasks, which drops the
/// children and kills them (`kill_on_drop`).
struct StageTasks {
    tasks: Vec<(String, JoinHandle<io::Result<Output>>)>,
}

impl Drop for StageTasks {
    fn drop(&mut self) {
        for (_, task) in &self.tasks {
            task.abort();
        }
    }
}

/// Runs every stage of `pipeline` with stdout wired to the next stage's stdin,
/// bounded by `timeout` and `cancel`.
///
/// A non-zero exit reports the right-most failing stage, the same stage
/// `set -o pipefail` would report.
pub async fn run_pipeline(
    pipeline: &Pipeline,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<()> {
    tracing::info!("Running {}: {}", pipeline.description, pipeline.render(true)?);

    let programs = pipeline
        .stages
        .iter()
        .map(|stage| {
            find_executable(&stage.program).map_err(|e| AppError::ExternalCommand {
                stage: stage.program.clone(),
                status: "not started".to_string(),
                stderr: e.to_string(),
            })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut running = StageTasks {
        tasks: Vec::with_capacity(pipeline.stages.len()),
    };
    let mut upstream: Option<Stdio> = None;
    let last = pipeline.stages.len().saturating_sub(1);

    for (index, (stage, program)) in pipeline.stages.iter().zip(programs).enumerate() {
        let mut command = Command::new(program);
        command
            .args(&stage.args)
            .stdin(upstream.take().unwrap_or_else(Stdio::null))
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for var in &stage.env {
            command.env(&var.key, &var.value);
        }

        let mut child = command.spawn().map_err(|e| AppError::ExternalCommand {
            stage: stage.program.clone(),
            status: "not started".to_string(),
            stderr: e.to_string(),
        })?;
        if index < last {
            let stdout = child.stdout.take().ok_or_else(|| {
                AppError::Io(io::Error::other(format!("{} has no stdout", stage.program)))
            })?;
            upstream = Some(stdout.try_into()?);
        }
        running
            .tasks
            .push((stage.program.clone(), tokio::spawn(child.wait_with_output())));
    }

    let outcome = tokio::select! {
        result = wait_all(&mut running) => result,
        _ = tokio::time::sleep(timeout) => Err(AppError::Timeout(format!(
            "{} did not finish within {}s",
            pipeline.description,
            timeout.as_secs()
        ))),
        _ = cancel.cancelled() => Err(AppError::Cancelled(pipeline.description.clone())),
    };
    drop(running);

    if outcome.is_ok() {
        tracing::info!("✓ {} finished", pipeline.description);
    }
    outcome
}

async fn wait_all(running: &mut StageTasks) -> Result<()> {
    let mut failures = Vec::new();
    for (name, task) in running.tasks.iter_mut() {
        let output = task.await.map_err(|e| AppError::ExternalCommand {
            stage: name.clone(),
            status: "aborted".to_string(),
            stderr: e.to_string(),
        })??;
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        if output.status.success() {
            if !stderr.is_empty() {
                tracing::debug!("{} stderr: {}", name, stderr);
            }
            continue;
        }
        tracing::warn!("{} exited with {}: {}", name, output.status, stderr);
        failures.push(AppError::ExternalCommand {
            stage: name.clone(),
            status: output.status.to_string(),
            stderr,
        });
    }
    match failures.pop() {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::command::Stage;

    fn pipeline(stages: Vec<Stage>) -> Pipeline {
        Pipeline {
            description: "test pipeline".to_string(),
            dump_args: Vec::new(),
            stages,
        }
    }

    #[tokio::test]
    async fn test_stages_are_chained() {
        let p = pipeline(vec![
            Stage::new("sh", ["-c", "printf 'hello\\n'"]),
            Stage::new("cat", Vec::<String>::new()),
            Stage::new("sh", ["-c", "read line; test \"$line\" = hello"]),
        ]);
        run_pipeline(&p, Duration::from_secs(10), &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_secret_env_reaches_the_process() {
        let p = pipeline(vec![
            Stage::new("sh", ["-c", "test \"$MYSQL_PWD\" = 's3 cret'"]).with_env(
                "MYSQL_PWD",
                "s3 cret",
                true,
            ),
        ]);
        run_pipeline(&p, Duration::from_secs(10), &CancellationToken::new())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_failing_stage_is_reported() {
        let p = pipeline(vec![
            Stage::new("sh", ["-c", "echo broken >&2; exit 3"]),
            Stage::new("cat", Vec::<String>::new()),
        ]);
        let err = run_pipeline(&p, Duration::from_secs(10), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            AppError::ExternalCommand { stage, stderr, .. } => {
                assert_eq!(stage, "sh");
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_rightmost_failure_wins() {
        let p = pipeline(vec![
            Stage::new("sh", ["-c", "exit 1"]),
            Stage::new("sh", ["-c", "cat >/dev/null; echo restore failed >&2; exit 2"]),
        ]);
        let err = run_pipeline(&p, Duration::from_secs(10), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExternalCommand { ref stderr, .. } if stderr == "restore failed"));
    }

    #[tokio::test]
    async fn test_deadline_stops_the_pipeline() {
        let p = pipeline(vec![Stage::new("sleep", ["30"])]);
        let err = run_pipeline(&p, Duration::from_millis(200), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_cancellation_stops_the_pipeline() {
        let p = pipeline(vec![Stage::new("sleep", ["30"])]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = run_pipeline(&p, Duration::from_secs(60), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Cancelled(_)));
    }

    #[tokio::test]
    async fn test_missing_program_fails_before_spawning() {
        let p = pipeline(vec![Stage::new("definitely-not-a-real-tool-dbsync", ["x"])]);
        let err = run_pipeline(&p, Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ExternalCommand { ref status, .. } if status == "not started"));
    }
}
