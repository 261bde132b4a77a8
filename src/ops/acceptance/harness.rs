//! Scratch directory, server lifecycle and client exchange.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::Child;
use std::time::{Duration, Instant};

use anyhow::Context;

use super::config::render_config;
use super::types::{AcceptanceOptions, TestStep};
use crate::builder::events::{PipelineEvent, Reporter};
use crate::core::acceptance::{AcceptanceSpec, ClientSpec, Readiness};
use crate::core::error::{PipelineError, PipelineResult};
use crate::util::process::{combined_output, find_executable, ProcessBuilder};
use crate::util::template::Vars;

/// Lines of server log attached to readiness failures.
const LOG_TAIL_LINES: usize = 15;

/// Lower bound for a single readiness connect attempt.
const MIN_CONNECT_TIMEOUT: Duration = Duration::from_millis(50);

/// Owns the launched server; kills and reaps it when dropped.
pub(crate) struct ServerGuard {
    child: Child,
    log: PathBuf,
}

impl ServerGuard {
    fn new(child: Child, log: PathBuf) -> Self {
        ServerGuard { child, log }
    }

    /// Exit status if the server has already stopped.
    fn exited(&mut self) -> Option<std::process::ExitStatus> {
        self.child.try_wait().ok().flatten()
    }

    fn log_tail(&self) -> String {
        let text = std::fs::read_to_string(&self.log).unwrap_or_default();
        let lines: Vec<&str> = text.lines().collect();
        lines[lines.len().saturating_sub(LOG_TAIL_LINES)..].join("\n")
    }
}

impl Drop for ServerGuard {
    fn drop(&mut self) {
        let pid = self.child.id();
        if let Err(e) = self.child.kill() {
            tracing::debug!("server {} already gone: {}", pid, e);
        }
        let _ = self.child.wait();
        tracing::debug!("server {} stopped", pid);
    }
}

/// Records steps as they finish and forwards them to the reporter.
pub(crate) struct StepLog<'a> {
    steps: Vec<TestStep>,
    reporter: &'a dyn Reporter,
}

impl<'a> StepLog<'a> {
    pub(crate) fn new(reporter: &'a dyn Reporter) -> Self {
        StepLog {
            steps: Vec::new(),
            reporter,
        }
    }

    pub(crate) fn into_steps(self) -> Vec<TestStep> {
        self.steps
    }

    /// Time `f` as step `name`.
    pub(crate) fn run<T>(
        &mut self,
        name: &str,
        f: impl FnOnce() -> PipelineResult<(T, String)>,
    ) -> PipelineResult<T> {
        let start = Instant::now();
        let result = f();
        let duration = start.elapsed();

        let (step, value) = match result {
            Ok((value, message)) => (TestStep::pass(name, message, duration), Ok(value)),
            Err(e) => (TestStep::fail(name, e.to_string(), duration), Err(e)),
        };

        tracing::debug!(
            "test step `{}` {} in {:?}",
            step.name,
            if step.passed { "passed" } else { "failed" },
            step.duration
        );
        self.reporter.report(&PipelineEvent::TestStep {
            name: step.name.clone(),
            passed: step.passed,
            duration_ms: step.duration.as_millis() as u64,
        });
        self.steps.push(step);
        value
    }
}

/// Run every introspection argument list against `binary`.
pub(crate) fn introspect(
    binary: &Path,
    spec: &AcceptanceSpec,
    vars: &Vars,
    timeout: Duration,
) -> PipelineResult<String> {
    for args in &spec.introspect {
        let cmd = ProcessBuilder::new(binary).args(vars.expand_all(args)?);
        let shown = cmd.display_command();
        tracing::debug!("introspect: {}", shown);

        let output = cmd
            .exec_with_timeout(timeout)
            .map_err(|e| PipelineError::acceptance("introspect", format!("{:#}", e)))?
            .ok_or_else(|| PipelineError::AcceptanceTimeout {
                step: "introspect".to_string(),
                waited: timeout,
            })?;

        if !output.status.success() {
            return Err(PipelineError::acceptance(
                "introspect",
                format!(
                    "`{}` exited with {}\n{}",
                    shown,
                    output.status,
                    combined_output(&output).trim_end()
                ),
            ));
        }
    }

    Ok(format!("{} invocation(s) succeeded", spec.introspect.len()))
}

/// Create scratch directories, fixtures and the rendered config file.
///
/// Returns the path of the config file, if the test declares one.
pub(crate) fn prepare(
    testpath: &Path,
    spec: &AcceptanceSpec,
    vars: &Vars,
) -> PipelineResult<Option<PathBuf>> {
    for dir in &spec.dirs {
        let path = testpath.join(dir);
        std::fs::create_dir_all(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
    }

    for fixture in &spec.fixtures {
        let path = testpath.join(&fixture.path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        std::fs::write(&path, fixture.content.as_bytes())
            .with_context(|| format!("failed to write fixture {}", path.display()))?;
    }

    let Some(ref template) = spec.config else {
        return Ok(None);
    };

    let path = testpath.join(&template.path);
    let text = render_config(template, vars)
        .map_err(|e| PipelineError::acceptance("prepare", format!("{:#}", e)))?;
    std::fs::write(&path, text)
        .with_context(|| format!("failed to write config {}", path.display()))?;
    tracing::debug!("wrote server config {}", path.display());

    Ok(Some(path))
}

/// Ask the OS for a loopback port that is free right now.
pub(crate) fn free_port() -> PipelineResult<u16> {
    let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .map_err(|e| PipelineError::acceptance("prepare", format!("no free port: {}", e)))?;
    let port = listener
        .local_addr()
        .map_err(|e| PipelineError::acceptance("prepare", e.to_string()))?
        .port();
    Ok(port)
}

/// Spawn the server in the background with its output sent to `log`.
pub(crate) fn launch(
    binary: &Path,
    spec: &AcceptanceSpec,
    vars: &Vars,
    cwd: &Path,
    log: &Path,
) -> PipelineResult<ServerGuard> {
    let cmd = ProcessBuilder::new(binary)
        .args(vars.expand_all(&spec.launch)?)
        .cwd(cwd);
    tracing::debug!("launch: {}", cmd.display_command());

    let child = cmd
        .spawn_detached(log)
        .map_err(|e| PipelineError::acceptance("launch", format!("{:#}", e)))?;

    Ok(ServerGuard::new(child, log.to_path_buf()))
}

/// Wait until the server is ready to serve `port`.
pub(crate) fn wait_ready(
    server: &mut ServerGuard,
    readiness: &Readiness,
    port: u16,
    options: &AcceptanceOptions,
) -> PipelineResult<String> {
    match *readiness {
        Readiness::Grace { seconds } => {
            std::thread::sleep(Duration::from_secs(seconds));
            if let Some(status) = server.exited() {
                return Err(exited_early(server, status));
            }
            Ok(format!("waited {}s", seconds))
        }
        Readiness::Probe {
            timeout_secs,
            interval_ms,
        } => {
            let timeout = timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(options.probe_timeout);
            let interval = interval_ms
                .map(Duration::from_millis)
                .unwrap_or(options.probe_interval);
            probe(server, port, timeout, interval)
        }
    }
}

fn probe(
    server: &mut ServerGuard,
    port: u16,
    timeout: Duration,
    interval: Duration,
) -> PipelineResult<String> {
    let addr = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::LOCALHOST, port));
    let connect_timeout = interval.max(MIN_CONNECT_TIMEOUT);
    let start = Instant::now();
    let mut attempts = 0u32;

    loop {
        if let Some(status) = server.exited() {
            return Err(exited_early(server, status));
        }

        attempts += 1;
        if TcpStream::connect_timeout(&addr, connect_timeout).is_ok() {
            return Ok(format!(
                "port {} accepted a connection after {} attempt(s)",
                port, attempts
            ));
        }

        if start.elapsed() >= timeout {
            return Err(PipelineError::AcceptanceTimeout {
                step: "ready".to_string(),
                waited: start.elapsed(),
            });
        }
        std::thread::sleep(interval);
    }
}

fn exited_early(server: &ServerGuard, status: std::process::ExitStatus) -> PipelineError {
    let tail = server.log_tail();
    let mut message = format!("server exited with {} before it was ready", status);
    if !tail.is_empty() {
        message.push('\n');
        message.push_str(&tail);
    }
    PipelineError::acceptance("ready", message)
}

/// Run the client against the server and compare the retrieved file with
/// the fixture.
pub(crate) fn exchange(
    spec: &AcceptanceSpec,
    vars: &Vars,
    testpath: &Path,
    port: u16,
    timeout: Duration,
) -> PipelineResult<u64> {
    let port = spec.client.pinned_port().unwrap_or(port);
    let vars = vars.clone().with("port", port.to_string());
    let retrieved = testpath.join(&spec.exchange.retrieved);

    match spec.client {
        ClientSpec::Command {
            ref program,
            ref args,
            ..
        } => run_client_command(program, args, &vars, testpath, timeout)?,
        ClientSpec::Http { ref path, .. } => http_get(path, port, &retrieved, timeout)?,
    }

    compare(&retrieved, &testpath.join(&spec.exchange.expected))
}

fn run_client_command(
    program: &str,
    args: &[String],
    vars: &Vars,
    cwd: &Path,
    timeout: Duration,
) -> PipelineResult<()> {
    let path = find_executable(program).ok_or_else(|| {
        PipelineError::acceptance("exchange", format!("client `{}` was not found in PATH", program))
    })?;

    let cmd = ProcessBuilder::new(path)
        .args(vars.expand_all(args)?)
        .cwd(cwd);
    let shown = cmd.display_command();
    tracing::debug!("client: {}", shown);

    let output = cmd
        .exec_with_timeout(timeout)
        .map_err(|e| PipelineError::acceptance("exchange", format!("{:#}", e)))?
        .ok_or_else(|| PipelineError::AcceptanceTimeout {
            step: "exchange".to_string(),
            waited: timeout,
        })?;

    if !output.status.success() {
        return Err(PipelineError::acceptance(
            "exchange",
            format!(
                "`{}` exited with {}\n{}",
                shown,
                output.status,
                combined_output(&output).trim_end()
            ),
        ));
    }

    Ok(())
}

fn http_get(path: &str, port: u16, dest: &Path, timeout: Duration) -> PipelineResult<()> {
    let url = format!("http://127.0.0.1:{}/{}", port, path.trim_start_matches('/'));
    tracing::debug!("client: GET {}", url);

    let client = reqwest::blocking::Client::builder()
        .timeout(timeout)
        .build()
        .context("failed to build HTTP client")?;

    let response = client.get(&url).send().map_err(|e| {
        if e.is_timeout() {
            PipelineError::AcceptanceTimeout {
                step: "exchange".to_string(),
                waited: timeout,
            }
        } else {
            PipelineError::acceptance("exchange", format!("GET {} failed: {}", url, e))
        }
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(PipelineError::acceptance(
            "exchange",
            format!("GET {} returned {}", url, status),
        ));
    }

    let body = response
        .bytes()
        .map_err(|e| PipelineError::acceptance("exchange", format!("GET {} failed: {}", url, e)))?;

    if let Some(parent) = dest.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(dest, &body).with_context(|| format!("failed to write {}", dest.display()))?;
    Ok(())
}

fn compare(retrieved: &Path, expected: &Path) -> PipelineResult<u64> {
    let got = std::fs::read(retrieved).map_err(|_| {
        PipelineError::acceptance(
            "exchange",
            format!("client did not produce {}", retrieved.display()),
        )
    })?;
    let want = std::fs::read(expected)
        .with_context(|| format!("failed to read fixture {}", expected.display()))?;

    if got != want {
        return Err(PipelineError::acceptance(
            "exchange",
            format!(
                "{} differs from {} ({} bytes vs {} bytes)",
                retrieved.display(),
                expected.display(),
                got.len(),
                want.len()
            ),
        ));
    }

    Ok(got.len() as u64)
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn idle_server(tmp: &TempDir) -> ServerGuard {
        let log = tmp.path().join("server.log");
        let child = ProcessBuilder::new("sleep")
            .arg("30")
            .spawn_detached(&log)
            .unwrap();
        ServerGuard::new(child, log)
    }

    #[test]
    fn test_zero_interval_still_reaches_listener() {
        let tmp = TempDir::new().unwrap();
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut server = idle_server(&tmp);

        let message = probe(&mut server, port, Duration::from_secs(2), Duration::ZERO).unwrap();
        assert!(message.contains("after 1 attempt(s)"), "{}", message);
    }

    #[test]
    fn test_readiness_times_out_without_listener() {
        let tmp = TempDir::new().unwrap();
        let port = free_port().unwrap();
        let mut server = idle_server(&tmp);

        let err = probe(&mut server, port, Duration::from_millis(300), Duration::ZERO).unwrap_err();
        assert!(matches!(err, PipelineError::AcceptanceTimeout { ref step, .. } if step == "ready"));
    }
}
