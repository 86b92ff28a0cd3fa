// porter-aio/src/process.rs
use std::collections::{HashMap, VecDeque};
use std::ffi::OsString;
use std::path::PathBuf;
use std::process::{ExitStatus, Output as StdOutput, Stdio};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use porter_common::error::{PorterError, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

/// Keeps the last `capacity` lines written to it.
#[derive(Debug, Clone)]
pub struct OutputCollector {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl OutputCollector {
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    pub fn push(&self, line: impl Into<String>) {
        if self.capacity == 0 {
            return;
        }
        let mut lines = match self.lines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.into());
    }

    pub fn lines(&self) -> Vec<String> {
        let lines = match self.lines.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        lines.iter().cloned().collect()
    }
}

/// Fully resolved command line for a child process.
#[derive(Debug, Clone, Default)]
pub struct CommandSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub cwd: Option<PathBuf>,
    /// Complete environment block; the parent environment is not inherited.
    pub env: Vec<(OsString, OsString)>,
}

impl CommandSpec {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            env: std::env::vars_os().collect(),
            ..Default::default()
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Sets or replaces one variable of the environment block.
    pub fn env(mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> Self {
        let key = key.into();
        let value = value.into();
        match self.env.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.env.push((key, value)),
        }
        self
    }

    /// Prepends `program` and `args`, turning this command into an argument of
    /// another command (used for sandbox and interpreter wrappers).
    pub fn wrap(mut self, program: impl Into<OsString>, prefix: &[OsString]) -> Self {
        let original = std::mem::replace(&mut self.program, program.into());
        let mut args = prefix.to_vec();
        args.push(original);
        args.append(&mut self.args);
        self.args = args;
        self
    }

    pub fn display(&self) -> String {
        let mut out = self.program.to_string_lossy().to_string();
        for a in &self.args {
            out.push(' ');
            out.push_str(&a.to_string_lossy());
        }
        out
    }
}

/// Raw exit code of a finished process. Signals map to `128 + signal` on unix.
pub fn raw_exit_code(status: &ExitStatus) -> u32 {
    if let Some(code) = status.code() {
        return code as u32;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return 128 + sig as u32;
        }
    }
    1
}

/// How long output readers may keep going once the child has exited.
/// Descendants that inherited the pipes can hold them open indefinitely.
pub const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(500);

/// A child that ran to completion.
#[derive(Debug, Clone, Copy)]
pub struct Finished {
    pub status: ExitStatus,
    /// Time from spawn until the child itself exited.
    pub elapsed: Duration,
}

/// Spawns `spec`, feeding its stdout/stderr lines into the collectors, and
/// waits for it to exit. The child is killed if `token` fires first.
pub async fn run_collecting(
    spec: &CommandSpec,
    stdout: &OutputCollector,
    stderr: &OutputCollector,
    token: &CancellationToken,
) -> Result<Finished> {
    debug!(
        "Running command: {} (cwd: {:?})",
        spec.display(),
        spec.cwd
    );

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args);
    cmd.env_clear();
    cmd.envs(spec.env.iter().map(|(k, v)| (k, v)));
    if let Some(dir) = &spec.cwd {
        cmd.current_dir(dir);
    }
    cmd.kill_on_drop(true);
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| {
        error!("Failed to spawn {}: {}", spec.display(), e);
        PorterError::from(e)
    })?;
    let started = Instant::now();

    let out_task = child
        .stdout
        .take()
        .map(|pipe| tokio::spawn(pump_lines(pipe, stdout.clone(), "stdout")));
    let err_task = child
        .stderr
        .take()
        .map(|pipe| tokio::spawn(pump_lines(pipe, stderr.clone(), "stderr")));

    let status = tokio::select! {
        status = child.wait() => status.map_err(PorterError::from)?,
        _ = token.cancelled() => {
            debug!("Cancellation requested, killing {}", spec.display());
            if let Err(e) = child.kill().await {
                error!("Failed to kill {}: {}", spec.display(), e);
            }
            return Err(PorterError::Cancelled);
        }
    };

    let elapsed = started.elapsed();

    let mut readers: Vec<_> = [out_task, err_task].into_iter().flatten().collect();
    let drained = async {
        for task in readers.iter_mut() {
            let _ = task.await;
        }
    };
    let cancelled = tokio::select! {
        _ = drained => false,
        _ = tokio::time::sleep(OUTPUT_DRAIN_GRACE) => {
            debug!("Output of {} is still open after exit, detaching", spec.display());
            false
        }
        _ = token.cancelled() => true,
    };
    for task in &readers {
        task.abort();
    }
    if cancelled {
        return Err(PorterError::Cancelled);
    }

    debug!(
        "Command {} exited with {} after {:?}",
        spec.display(),
        status,
        elapsed
    );
    Ok(Finished { status, elapsed })
}

async fn pump_lines<R: AsyncRead + Unpin>(pipe: R, sink: OutputCollector, label: &'static str) {
    let mut lines = BufReader::new(pipe).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                trace!("[{label}] {line}");
                sink.push(line);
            }
            Ok(None) => break,
            Err(e) => {
                debug!("Stopped reading {label}: {e}");
                break;
            }
        }
    }
}

/// Asynchronously runs an external command and captures its output.
pub async fn run_command_async(
    command: &str,
    args: &[String],
    cwd: Option<PathBuf>,
    envs: Option<HashMap<String, String>>,
) -> Result<StdOutput> {
    debug!(
        "Async Running command: {} {:?} (cwd: {:?}, envs: {:?})",
        command,
        args,
        cwd,
        envs.as_ref().map(|e| e.keys().collect::<Vec<_>>())
    );

    let mut cmd = Command::new(command);
    cmd.args(args);
    cmd.kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }
    if let Some(env_map) = envs {
        cmd.envs(env_map);
    }
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.stdin(Stdio::null());

    match cmd.output().await {
        Ok(output) => {
            if !output.status.success() {
                debug!("Async Command failed with status: {}", output.status);
                let stderr = String::from_utf8_lossy(&output.stderr);
                if !stderr.trim().is_empty() {
                    debug!("Stderr:\n{}", stderr.trim());
                }
            }
            Ok(output)
        }
        Err(e) => {
            error!("Async Failed to execute command: {}", e);
            Err(PorterError::Io(Arc::new(e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collector_keeps_only_the_tail() {
        let c = OutputCollector::new(3);
        for i in 0..5 {
            c.push(format!("line {i}"));
        }
        assert_eq!(c.lines(), vec!["line 2", "line 3", "line 4"]);
    }

    #[test]
    fn wrap_moves_the_program_into_the_args() {
        let spec = CommandSpec::new("/games/foo/game.love")
            .arg("--fullscreen")
            .wrap("love", &[]);
        assert_eq!(spec.program, OsString::from("love"));
        assert_eq!(
            spec.args,
            vec![
                OsString::from("/games/foo/game.love"),
                OsString::from("--fullscreen")
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn collects_output_and_exit_code() {
        let spec = CommandSpec::new("/bin/sh")
            .arg("-c")
            .arg("echo out; echo err 1>&2; exit 3");
        let stdout = OutputCollector::new(10);
        let stderr = OutputCollector::new(10);
        let finished = run_collecting(&spec, &stdout, &stderr, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(raw_exit_code(&finished.status), 3);
        assert_eq!(stdout.lines(), vec!["out"]);
        assert_eq!(stderr.lines(), vec!["err"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn cancellation_kills_the_child() {
        let spec = CommandSpec::new("/bin/sh").arg("-c").arg("sleep 30");
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            canceller.cancel();
        });
        let out = OutputCollector::new(1);
        let err = run_collecting(&spec, &out, &out, &token).await.unwrap_err();
        assert!(err.is_cancelled());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn lingering_descendant_does_not_hold_the_exit() {
        let spec = CommandSpec::new("/bin/sh")
            .arg("-c")
            .arg("echo started; sleep 5 & exit 0");
        let out = OutputCollector::new(4);
        let err = OutputCollector::new(4);
        let wall = Instant::now();
        let finished = run_collecting(&spec, &out, &err, &CancellationToken::new())
            .await
            .unwrap();
        assert!(finished.status.success());
        assert!(finished.elapsed < Duration::from_secs(2));
        assert!(wall.elapsed() < Duration::from_secs(3));
        assert_eq!(out.lines(), vec!["started"]);
    }
}
