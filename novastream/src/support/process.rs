//! Generic supervised-child-process helpers shared by the HLS transcoder and the
//! subtitle extractor. Grounded on the probe-then-wait idiom used for ffmpeg
//! supervision elsewhere in the corpus: spawn with piped stdio, drain stdout/stderr
//! into structured logs on background tasks, and race `child.wait()` against a
//! cancellation token so manager shutdown can kill children promptly.

use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use process_utils::NoWindowExt;

/// A callback invoked with every stdout line a supervised child produces, in
/// addition to the structured log line it's always given. Used by callers that
/// need to react to specific output (e.g. the subtitle extractor parsing cue
/// timestamps) without re-implementing child supervision.
pub type LineSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Spawns `command` with piped stdout/stderr, draining both into structured log
/// lines tagged with `label` (typically the session id).
pub fn spawn_supervised(command: Command, label: String) -> std::io::Result<Child> {
    spawn_supervised_with_stdout_sink(command, label, None)
}

/// Like [`spawn_supervised`], but also forwards every stdout line to `on_stdout_line`
/// before it's logged.
pub fn spawn_supervised_with_stdout_sink(
    mut command: Command,
    label: String,
    on_stdout_line: Option<LineSink>,
) -> std::io::Result<Child> {
    command.no_window();
    command.stdin(Stdio::null());
    command.stdout(Stdio::piped());
    command.stderr(Stdio::piped());

    let mut child = command.spawn()?;

    if let Some(stdout) = child.stdout.take() {
        let label = label.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                info!(session = %label, "{line}");
                if let Some(sink) = &on_stdout_line {
                    sink(&line);
                }
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        let label = label.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                warn!(session = %label, "{line}");
            }
        });
    }

    Ok(child)
}

/// Waits for `child` to exit, killing it instead if `cancellation_token` fires first.
/// Mirrors the corpus's `spawn_process_waiter`: returns `Some(code)` on normal exit,
/// `None` on cancellation.
pub fn spawn_process_waiter(
    mut child: Child,
    cancellation_token: CancellationToken,
) -> oneshot::Receiver<Option<i32>> {
    let (tx, rx) = oneshot::channel();

    tokio::spawn(async move {
        let exit_code = tokio::select! {
            _ = cancellation_token.cancelled() => {
                let _ = child.kill().await;
                None
            }
            status = child.wait() => {
                match status {
                    Ok(exit_status) => exit_status.code(),
                    Err(e) => {
                        warn!(error = %e, "error waiting for child process");
                        Some(-1)
                    }
                }
            }
        };
        let _ = tx.send(exit_code);
    });

    rx
}
