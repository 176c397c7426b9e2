//! Transformation delegated to an external program.
//!
//! The program receives the source image on stdin and every command as a
//! `name=value` argument (in canonical order), and must write the derived image
//! to stdout.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::application::stream::{self, ByteStream};
use crate::application::transform::{ImageTransformer, TransformError, TransformOutput};
use crate::domain::CommandSet;

use super::{format_content_type, sniff_content_type};

const TARGET: &str = "infra::transform::cli";

#[derive(Debug, Clone)]
pub struct CliTransformer {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CliTransformer {
    /// `args` are passed before the command arguments on every invocation.
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    fn command(&self, commands: &CommandSet) -> Command {
        let mut command = Command::new(&self.program);
        command
            .args(&self.args)
            .args(commands.iter().map(|(name, value)| format!("{name}={value}")))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

#[async_trait]
impl ImageTransformer for CliTransformer {
    async fn transform(
        &self,
        source: ByteStream,
        commands: &CommandSet,
    ) -> Result<TransformOutput, TransformError> {
        let started_at = Instant::now();
        let input = stream::collect(source).await?;

        let mut child = self.command(commands).spawn().map_err(|err| {
            warn!(
                target = TARGET,
                op = "transform",
                result = "error",
                error_code = "spawn_cli",
                program = %self.program.display(),
                error = %err,
                "Failed to spawn image transformer"
            );
            if err.kind() == ErrorKind::NotFound {
                TransformError::Unavailable(err)
            } else {
                TransformError::Io(err)
            }
        })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| TransformError::Failed("transformer stdin was not captured".into()))?;
        let feed = async move {
            let written = stdin.write_all(&input).await;
            drop(stdin);
            written
        };

        let run = async move { tokio::join!(feed, child.wait_with_output()) };
        let (written, output) = tokio::time::timeout(self.timeout, run).await.map_err(|_| {
            warn!(
                target = TARGET,
                op = "transform",
                result = "timeout",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                "Image transformer timed out"
            );
            TransformError::Timeout(self.timeout)
        })?;
        let output = output?;

        if !output.status.success() {
            let exit_code = output.status.code();
            let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
            warn!(
                target = TARGET,
                op = "transform",
                result = "error",
                error_code = "transform_cli",
                elapsed_ms = started_at.elapsed().as_millis() as u64,
                exit_code = exit_code.map(i64::from).unwrap_or(-1),
                stderr = %stderr,
                "Image transformer failed"
            );
            return Err(TransformError::Cli { exit_code, stderr });
        }

        // A program may legitimately stop reading once it has what it needs.
        match written {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::BrokenPipe => {}
            Err(err) => return Err(TransformError::Io(err)),
        }

        if output.stdout.is_empty() {
            return Err(TransformError::Failed(
                "transformer produced no output".into(),
            ));
        }

        let content_type = commands
            .get("format")
            .and_then(format_content_type)
            .or_else(|| sniff_content_type(&output.stdout))
            .ok_or_else(|| {
                TransformError::Unsupported("transformer output is not a recognised image".into())
            })?;

        debug!(
            target = TARGET,
            op = "transform",
            result = "ok",
            elapsed_ms = started_at.elapsed().as_millis() as u64,
            bytes = output.stdout.len(),
            content_type,
            "Image transformed via CLI"
        );

        Ok(TransformOutput {
            body: stream::once(output.stdout.into()),
            content_type: content_type.to_string(),
        })
    }
}
