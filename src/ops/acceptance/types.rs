//! Public types for the acceptance runner.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

/// Result of one acceptance step.
#[derive(Debug, Clone, Serialize)]
pub struct TestStep {
    /// Step name (`introspect`, `prepare`, `launch`, `ready`, `exchange`)
    pub name: String,

    pub passed: bool,

    /// Status message
    pub message: String,

    /// How long the step took (in milliseconds for JSON)
    #[serde(rename = "duration_ms", serialize_with = "serialize_duration_ms")]
    pub duration: Duration,
}

fn serialize_duration_ms<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_u64(duration.as_millis() as u64)
}

impl TestStep {
    /// Create a passing step.
    pub fn pass(name: impl Into<String>, message: impl Into<String>, duration: Duration) -> Self {
        TestStep {
            name: name.into(),
            passed: true,
            message: message.into(),
            duration,
        }
    }

    /// Create a failing step.
    pub fn fail(name: impl Into<String>, message: impl Into<String>, duration: Duration) -> Self {
        TestStep {
            name: name.into(),
            passed: false,
            message: message.into(),
            duration,
        }
    }
}

/// Outcome of a successful acceptance run.
#[derive(Debug, Clone, Serialize)]
pub struct AcceptanceReport {
    /// Binary that was tested, after relocation.
    pub binary: PathBuf,

    /// Port the server was told to listen on.
    pub port: u16,

    pub steps: Vec<TestStep>,

    /// Bytes compared in the exchange.
    pub bytes: u64,

    #[serde(rename = "total_duration_ms", serialize_with = "serialize_duration_ms")]
    pub total_duration: Duration,
}

impl AcceptanceReport {
    pub fn passed_count(&self) -> usize {
        self.steps.iter().filter(|s| s.passed).count()
    }
}

/// Options for an acceptance run.
#[derive(Debug, Clone)]
pub struct AcceptanceOptions {
    /// Install prefix, bound to `{prefix}` and friends.
    pub prefix: PathBuf,

    /// Scratch directory bound to `{testpath}`; a temporary one is used when
    /// unset.
    pub testpath: Option<PathBuf>,

    /// Deadline for the readiness probe when the recipe does not set one.
    pub probe_timeout: Duration,

    /// Delay between probe attempts when the recipe does not set one.
    pub probe_interval: Duration,

    /// Bound on introspection and client commands.
    pub command_timeout: Duration,
}

impl AcceptanceOptions {
    pub fn new(prefix: impl Into<PathBuf>) -> Self {
        AcceptanceOptions {
            prefix: prefix.into(),
            testpath: None,
            probe_timeout: Duration::from_secs(30),
            probe_interval: Duration::from_millis(100),
            command_timeout: Duration::from_secs(60),
        }
    }
}
