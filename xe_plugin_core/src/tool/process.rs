use super::{
    invocation::ToolInvocation,
    log::OperationLog,
    runner::{CacheInvalidator, RunOptions, ToolExit, ToolOutcome, ToolRunner},
};
use crate::config::{CacheConfig, ToolConfig};
use crate::error::{Error, Result};
use crate::state::ToolReport;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::fs::{self, File};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Environment variable naming the file the tool integration writes its
/// `{changed, failed}` report to.
pub const REPORT_ENV: &str = "XE_PLUGIN_REPORT";

const OUTPUT_GRACE: Duration = Duration::from_secs(5);

/// Runs the dependency tool as a child process.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    command: Vec<String>,
    env: BTreeMap<String, String>,
    report_dir: PathBuf,
}

impl ProcessRunner {
    pub fn new(command: Vec<String>) -> Self {
        Self {
            command,
            env: BTreeMap::new(),
            report_dir: std::env::temp_dir(),
        }
    }

    pub fn from_config(config: &ToolConfig, report_dir: PathBuf) -> Self {
        Self::new(config.command.clone())
            .with_env(config.env.clone())
            .with_report_dir(report_dir)
    }

    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_report_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.report_dir = dir.into();
        self
    }
}

#[async_trait]
impl ToolRunner for ProcessRunner {
    async fn run(
        &self,
        invocation: &ToolInvocation,
        options: RunOptions,
        log: &OperationLog,
    ) -> Result<ToolOutcome> {
        let (program, leading) = split_command(&self.command, "dependency tool")?;
        fs::create_dir_all(&self.report_dir).await?;
        let report_path = self
            .report_dir
            .join(format!("plugin-report-{}.json", Uuid::new_v4()));

        let args = invocation.args();
        let mut cmd = Command::new(program);
        cmd.args(leading)
            .args(&args)
            .current_dir(&invocation.working_dir)
            .envs(&self.env)
            .env(REPORT_ENV, &report_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !options.foreground {
            detach_process_group(&mut cmd);
        }

        log.append(&format!("$ {} {}", self.command.join(" "), args.join(" ")))
            .await?;
        info!(
            program = program,
            packages = ?invocation.packages,
            foreground = options.foreground,
            time_limit = ?options.time_limit,
            "Running dependency tool"
        );

        let exit = run_supervised(cmd, program, log, options.foreground, options).await?;
        let report = take_report(&report_path).await;

        log.append(&format!("{} finished: {}", program, exit)).await?;
        info!(program = program, exit = %exit, "Dependency tool finished");

        Ok(ToolOutcome::new(exit, report))
    }
}

/// Runs the configured cache-clear command with its output sent to the log.
#[derive(Debug, Clone)]
pub struct CommandCacheInvalidator {
    command: Vec<String>,
    working_dir: PathBuf,
}

impl CommandCacheInvalidator {
    pub fn new<P: Into<PathBuf>>(command: Vec<String>, working_dir: P) -> Self {
        Self {
            command,
            working_dir: working_dir.into(),
        }
    }

    pub fn from_config(config: &CacheConfig, working_dir: &Path) -> Self {
        Self::new(config.command.clone(), working_dir)
    }
}

#[async_trait]
impl CacheInvalidator for CommandCacheInvalidator {
    async fn clear(&self, options: RunOptions, log: &OperationLog) -> Result<i32> {
        let (program, leading) = split_command(&self.command, "cache clear")?;
        log.append("Clears cache before the dependency tool runs.")
            .await?;

        let mut cmd = Command::new(program);
        cmd.args(leading)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if !options.foreground {
            detach_process_group(&mut cmd);
        }

        let exit = run_supervised(cmd, program, log, false, options).await?;
        debug!(program = program, exit = %exit, "Cache clear finished");
        Ok(match exit {
            ToolExit::Exited(code) => code,
            ToolExit::Signaled | ToolExit::TimedOut(_) => -1,
        })
    }
}

/// Keep running when the client that started the operation goes away.
///
/// Only the deadline or an operator can stop a detached operation, so a
/// hangup is logged and otherwise ignored.
pub fn ignore_client_abort() {
    static INSTALLED: OnceLock<()> = OnceLock::new();
    INSTALLED.get_or_init(install_hangup_guard);
}

#[cfg(unix)]
fn install_hangup_guard() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::hangup()) {
        Ok(mut hangups) => {
            tokio::spawn(async move {
                while hangups.recv().await.is_some() {
                    warn!("Client hung up; operation keeps running");
                }
            });
        }
        Err(e) => warn!("Failed to install hangup handler: {}", e),
    }
}

#[cfg(not(unix))]
fn install_hangup_guard() {}

#[cfg(unix)]
fn detach_process_group(cmd: &mut Command) {
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn detach_process_group(_cmd: &mut Command) {}

/// SIGKILL every process in the group led by `pid`, so grandchildren that
/// forked off the tool go down with it.
#[cfg(unix)]
fn kill_process_group(pid: u32) -> std::io::Result<()> {
    let pgid = libc::pid_t::try_from(pid)
        .map_err(|_| std::io::Error::from(std::io::ErrorKind::InvalidInput))?;
    if unsafe { libc::killpg(pgid, libc::SIGKILL) } == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn kill_process_group(_pid: u32) -> std::io::Result<()> {
    Ok(())
}

fn split_command<'a>(
    command: &'a [String],
    what: &'static str,
) -> Result<(&'a str, &'a [String])> {
    match command.split_first() {
        Some((program, rest)) if !program.is_empty() => Ok((program.as_str(), rest)),
        _ => Err(Error::EmptyCommand(what)),
    }
}

/// Spawn `cmd`, copy its output into the log and wait for it. With a time
/// limit, a watcher kills the child once the deadline passes; a detached
/// child is spawned as a group leader and the whole group is killed.
async fn run_supervised(
    mut cmd: Command,
    program: &str,
    log: &OperationLog,
    echo: bool,
    options: RunOptions,
) -> Result<ToolExit> {
    let mut child = cmd.spawn().map_err(|source| Error::Spawn {
        program: program.to_string(),
        source,
    })?;
    let group = if options.foreground { None } else { child.id() };

    let sink = Arc::new(Mutex::new(log.open_append().await?));
    let mut pumps = Vec::new();
    if let Some(stdout) = child.stdout.take() {
        pumps.push(tokio::spawn(pump(stdout, Arc::clone(&sink), echo)));
    }
    if let Some(stderr) = child.stderr.take() {
        pumps.push(tokio::spawn(pump(stderr, Arc::clone(&sink), echo)));
    }

    let exit = match options.time_limit {
        Some(limit) => {
            tokio::select! {
                status = child.wait() => classify(status?),
                _ = tokio::time::sleep(limit) => {
                    warn!(program = program, limit_secs = limit.as_secs(), "Deadline reached, killing process");
                    if let Some(pgid) = group {
                        if let Err(e) = kill_process_group(pgid) {
                            warn!(program = program, pgid = pgid, "Failed to kill process group: {}", e);
                        }
                    }
                    if let Err(e) = child.kill().await {
                        warn!(program = program, "Failed to kill process: {}", e);
                    }
                    ToolExit::TimedOut(limit)
                }
            }
        }
        None => classify(child.wait().await?),
    };

    // Grandchildren can hold the pipes open after the child is gone.
    for mut handle in pumps {
        match tokio::time::timeout(OUTPUT_GRACE, &mut handle).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(e))) => warn!(program = program, "Failed to copy output to log: {}", e),
            Ok(Err(e)) => warn!(program = program, "Output task failed: {}", e),
            Err(_) => {
                handle.abort();
                warn!(program = program, "Output still open after exit, detaching");
            }
        }
    }

    Ok(exit)
}

async fn pump<R>(reader: R, sink: Arc<Mutex<File>>, echo: bool) -> Result<()>
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line).await? == 0 {
            break;
        }
        if echo {
            print!("{}", String::from_utf8_lossy(&line));
        }
        let mut file = sink.lock().await;
        file.write_all(&line).await?;
        if !line.ends_with(b"\n") {
            file.write_all(b"\n").await?;
        }
    }
    sink.lock().await.flush().await?;
    Ok(())
}

fn classify(status: ExitStatus) -> ToolExit {
    match status.code() {
        Some(code) => ToolExit::Exited(code),
        None => ToolExit::Signaled,
    }
}

/// Read and remove the report left by the tool integration. The exit code
/// stays authoritative, so an unreadable report only costs the details.
async fn take_report(path: &Path) -> ToolReport {
    let raw = match fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("Dependency tool left no report");
            return ToolReport::default();
        }
        Err(e) => {
            warn!(report = %path.display(), "Failed to read tool report: {}", e);
            return ToolReport::default();
        }
    };
    if let Err(e) = fs::remove_file(path).await {
        debug!(report = %path.display(), "Failed to remove tool report: {}", e);
    }
    match serde_json::from_str(&raw) {
        Ok(report) => report,
        Err(e) => {
            warn!(report = %path.display(), "Malformed tool report: {}", e);
            ToolReport::default()
        }
    }
}
