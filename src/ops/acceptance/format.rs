//! Human-readable acceptance report.

use std::fmt::Write as _;

use super::types::AcceptanceReport;
use crate::util::shell::format_duration;

/// Format an acceptance report for display.
pub fn format_report(report: &AcceptanceReport, verbose: bool) -> String {
    let mut output = String::new();

    writeln!(output, "Test: {} (port {})", report.binary.display(), report.port).unwrap();

    for step in &report.steps {
        let status = if step.passed { "[OK]" } else { "[FAIL]" };
        writeln!(
            output,
            "  {} {} ({})",
            status,
            step.name,
            format_duration(step.duration)
        )
        .unwrap();

        if verbose || !step.passed {
            writeln!(output, "      {}", step.message).unwrap();
        }
    }

    writeln!(
        output,
        "Result: {}/{} steps passed in {}",
        report.passed_count(),
        report.steps.len(),
        format_duration(report.total_duration)
    )
    .unwrap();

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ops::acceptance::TestStep;
    use std::path::PathBuf;
    use std::time::Duration;

    #[test]
    fn test_format_report() {
        let report = AcceptanceReport {
            binary: PathBuf::from("/opt/samba/sbin/smbd"),
            port: 4455,
            steps: vec![
                TestStep::pass("introspect", "2 invocation(s) succeeded", Duration::from_millis(40)),
                TestStep::pass("exchange", "5 bytes match", Duration::from_millis(300)),
            ],
            bytes: 5,
            total_duration: Duration::from_secs(2),
        };

        let text = format_report(&report, true);
        assert!(text.contains("Test: /opt/samba/sbin/smbd (port 4455)"));
        assert!(text.contains("[OK] exchange"));
        assert!(text.contains("5 bytes match"));
        assert!(text.contains("2/2 steps passed"));

        let quiet = format_report(&report, false);
        assert!(!quiet.contains("5 bytes match"));
    }
}
