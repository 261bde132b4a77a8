//! Acceptance test runner.
//!
//! Proves an installed server works end to end by serving a file to a real
//! protocol client over loopback.
//!
//! ## Steps
//!
//! 1. `introspect`: run the binary with each introspection argument list
//! 2. `prepare`: scratch directories, fixtures, free port, config file
//! 3. `launch`: start the server detached, output to `server.log`
//! 4. `ready`: probe the port (or sleep for a grace period)
//! 5. `exchange`: run the client and compare the retrieved file byte for byte
//!
//! The server is killed and reaped when the run ends, whatever the outcome.

mod config;
mod format;
mod harness;
mod types;

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;

pub use self::config::render_config;
pub use self::format::format_report;
pub use self::types::{AcceptanceOptions, AcceptanceReport, TestStep};

use self::harness::{exchange, free_port, introspect, launch, prepare, wait_ready, StepLog};
use crate::builder::events::Reporter;
use crate::core::acceptance::AcceptanceSpec;
use crate::core::error::{PipelineError, PipelineResult};
use crate::util::template::Vars;

/// Run the acceptance test for `binary`, an installed executable.
pub fn run_acceptance(
    binary: &Path,
    spec: &AcceptanceSpec,
    options: &AcceptanceOptions,
    reporter: &dyn Reporter,
) -> PipelineResult<AcceptanceReport> {
    let start = Instant::now();

    if !binary.is_file() {
        return Err(PipelineError::acceptance(
            "introspect",
            format!("binary not found: {}", binary.display()),
        ));
    }

    // Held until the end of the run so the scratch directory outlives the
    // server.
    let scratch;
    let testpath: PathBuf = match options.testpath {
        Some(ref path) => {
            std::fs::create_dir_all(path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            path.clone()
        }
        None => {
            scratch = tempfile::Builder::new()
                .prefix("kiln-test-")
                .tempdir()
                .context("failed to create test directory")?;
            scratch.path().to_path_buf()
        }
    };

    let vars = base_vars(binary, &options.prefix, &testpath);
    let mut log = StepLog::new(reporter);

    tracing::info!("Testing {}", binary.display());

    log.run("introspect", || {
        introspect(binary, spec, &vars, options.command_timeout).map(|m| ((), m))
    })?;

    let (vars, port) = log.run("prepare", || {
        let port = free_port()?;
        let mut vars = vars.clone().with("port", port.to_string());
        if let Some(ref template) = spec.config {
            vars.set("config", testpath.join(&template.path).display().to_string());
        }
        prepare(&testpath, spec, &vars)?;
        let message = format!("scratch {} on port {}", testpath.display(), port);
        Ok(((vars, port), message))
    })?;

    let server_log = testpath.join("server.log");
    let mut server = log.run("launch", || {
        let guard = launch(binary, spec, &vars, &testpath, &server_log)?;
        Ok((guard, format!("log at {}", server_log.display())))
    })?;

    log.run("ready", || {
        wait_ready(&mut server, &spec.readiness, port, options).map(|m| ((), m))
    })?;

    let bytes = log.run("exchange", || {
        let bytes = exchange(spec, &vars, &testpath, port, options.command_timeout)?;
        Ok((bytes, format!("{} bytes match", bytes)))
    })?;

    drop(server);

    Ok(AcceptanceReport {
        binary: binary.to_path_buf(),
        port,
        steps: log.into_steps(),
        bytes,
        total_duration: start.elapsed(),
    })
}

fn base_vars(binary: &Path, prefix: &Path, testpath: &Path) -> Vars {
    let user = std::env::var("USER").unwrap_or_else(|_| "nobody".to_string());
    Vars::new()
        .with_path("binary", binary)
        .with_path("prefix", prefix)
        .with_path("bin", &prefix.join("bin"))
        .with_path("sbin", &prefix.join("sbin"))
        .with_path("lib", &prefix.join("lib"))
        .with_path("testpath", testpath)
        .with("user", user)
}
