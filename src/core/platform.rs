//! Target platform model and platform predicates.
//!
//! The platform is resolved once when a pipeline starts (or taken from the
//! command line) and handed to every stage as plain data, so conditional
//! behavior can be exercised in tests by constructing a `Platform` directly.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use semver::Version;
use serde::{Deserialize, Serialize};

use crate::util::process::ProcessBuilder;

/// Operating system family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Os {
    Macos,
    Linux,
    Windows,
    #[serde(other)]
    Other,
}

impl Os {
    pub fn as_str(&self) -> &'static str {
        match self {
            Os::Macos => "macos",
            Os::Linux => "linux",
            Os::Windows => "windows",
            Os::Other => "other",
        }
    }
}

impl fmt::Display for Os {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Os {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "macos" | "darwin" | "osx" => Ok(Os::Macos),
            "linux" => Ok(Os::Linux),
            "windows" => Ok(Os::Windows),
            other => Err(format!(
                "unknown OS '{}'; expected 'macos', 'linux' or 'windows'",
                other
            )),
        }
    }
}

/// The platform a recipe is being built for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Platform {
    pub os: Os,
    /// Dotted OS version (`11.6`, `10.15.7`); `None` if it could not be determined.
    pub os_version: Option<String>,
    pub arch: String,
}

impl Platform {
    pub fn new(os: Os, os_version: Option<&str>, arch: impl Into<String>) -> Self {
        Platform {
            os,
            os_version: os_version.map(str::to_string),
            arch: arch.into(),
        }
    }

    /// Detect the host platform.
    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "macos" => Os::Macos,
            "linux" => Os::Linux,
            "windows" => Os::Windows,
            _ => Os::Other,
        };

        let os_version = match os {
            Os::Macos => query_version("sw_vers", &["-productVersion"]),
            Os::Linux => query_version("uname", &["-r"]),
            _ => None,
        };

        Platform {
            os,
            os_version,
            arch: std::env::consts::ARCH.to_string(),
        }
    }

    /// Parsed OS version, padded to three components.
    pub fn version(&self) -> Option<Version> {
        self.os_version.as_deref().and_then(parse_lenient_version)
    }

    /// The prebuilt-artifact tag for this platform, e.g. `arm64_big_sur` or
    /// `x86_64_linux`.
    pub fn bottle_tag(&self) -> Option<String> {
        match self.os {
            Os::Linux => Some(format!("{}_linux", self.arch)),
            Os::Macos => {
                let codename = macos_codename(&self.version()?)?;
                if self.arch == "aarch64" || self.arch == "arm64" {
                    Some(format!("arm64_{}", codename))
                } else {
                    Some(codename.to_string())
                }
            }
            _ => None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.os_version {
            Some(v) => write!(f, "{} {} ({})", self.os, v, self.arch),
            None => write!(f, "{} ({})", self.os, self.arch),
        }
    }
}

fn query_version(program: &str, args: &[&str]) -> Option<String> {
    let output = ProcessBuilder::new(program).args(args).exec().ok()?;
    if !output.status.success() {
        tracing::debug!("`{}` exited with {}", program, output.status);
        return None;
    }
    let text = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

fn macos_codename(version: &Version) -> Option<&'static str> {
    match (version.major, version.minor) {
        (10, 14) => Some("mojave"),
        (10, 15) => Some("catalina"),
        (11, _) => Some("big_sur"),
        (12, _) => Some("monterey"),
        (13, _) => Some("ventura"),
        (14, _) => Some("sonoma"),
        (15, _) => Some("sequoia"),
        _ => None,
    }
}

/// Parse a dotted version, padding missing components with zero.
///
/// Leading numeric components are used; anything after the first
/// non-numeric part (`6.8.0-45-generic`) is ignored.
pub fn parse_lenient_version(s: &str) -> Option<Version> {
    let mut parts = [0u64; 3];
    let mut seen = 0;

    for (i, piece) in s.trim().split(['.', '-', '+']).take(3).enumerate() {
        match piece.parse::<u64>() {
            Ok(n) => {
                parts[i] = n;
                seen += 1;
            }
            Err(_) => break,
        }
    }

    if seen == 0 {
        return None;
    }
    Some(Version::new(parts[0], parts[1], parts[2]))
}

/// Compare two dotted versions with zero padding.
///
/// Unparseable versions sort before parseable ones.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    match (parse_lenient_version(a), parse_lenient_version(b)) {
        (Some(a), Some(b)) => a.cmp(&b),
        (Some(_), None) => Ordering::Greater,
        (None, Some(_)) => Ordering::Less,
        (None, None) => a.cmp(b),
    }
}

/// A condition on the target platform.
///
/// All present fields must hold; an empty predicate always holds. A version
/// bound is never satisfied when the platform's version is unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlatformPredicate {
    pub os: Option<Os>,
    pub arch: Option<String>,
    pub os_version_below: Option<String>,
    pub os_version_at_least: Option<String>,
}

impl PlatformPredicate {
    pub fn always() -> Self {
        PlatformPredicate::default()
    }

    pub fn os(os: Os) -> Self {
        PlatformPredicate {
            os: Some(os),
            ..Default::default()
        }
    }

    pub fn is_always(&self) -> bool {
        self == &PlatformPredicate::default()
    }

    /// Evaluate the predicate against a platform.
    pub fn matches(&self, platform: &Platform) -> bool {
        if let Some(os) = self.os {
            if os != platform.os {
                return false;
            }
        }

        if let Some(ref arch) = self.arch {
            if arch != &platform.arch {
                return false;
            }
        }

        if self.os_version_below.is_some() || self.os_version_at_least.is_some() {
            let current = match platform.version() {
                Some(v) => v,
                None => return false,
            };

            if let Some(bound) = self.os_version_below.as_deref().and_then(parse_lenient_version) {
                if current >= bound {
                    return false;
                }
            }

            if let Some(bound) = self
                .os_version_at_least
                .as_deref()
                .and_then(parse_lenient_version)
            {
                if current < bound {
                    return false;
                }
            }
        }

        true
    }

    /// Check that every version bound parses.
    pub fn validate(&self) -> Result<(), String> {
        for bound in [&self.os_version_below, &self.os_version_at_least]
            .into_iter()
            .flatten()
        {
            if parse_lenient_version(bound).is_none() {
                return Err(format!("invalid OS version bound '{}'", bound));
            }
        }
        Ok(())
    }
}

impl fmt::Display for PlatformPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_always() {
            return f.write_str("always");
        }

        let mut parts = Vec::new();
        if let Some(os) = self.os {
            parts.push(format!("os = {}", os));
        }
        if let Some(ref arch) = self.arch {
            parts.push(format!("arch = {}", arch));
        }
        if let Some(ref v) = self.os_version_below {
            parts.push(format!("os version < {}", v));
        }
        if let Some(ref v) = self.os_version_at_least {
            parts.push(format!("os version >= {}", v));
        }
        f.write_str(&parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalina() -> Platform {
        Platform::new(Os::Macos, Some("10.15.7"), "x86_64")
    }

    fn big_sur_arm() -> Platform {
        Platform::new(Os::Macos, Some("11"), "aarch64")
    }

    #[test]
    fn test_lenient_version() {
        assert_eq!(parse_lenient_version("11"), Some(Version::new(11, 0, 0)));
        assert_eq!(parse_lenient_version("10.15"), Some(Version::new(10, 15, 0)));
        assert_eq!(
            parse_lenient_version("6.8.0-45-generic"),
            Some(Version::new(6, 8, 0))
        );
        assert_eq!(parse_lenient_version("big_sur"), None);
        assert_eq!(compare_versions("4.14.7", "4.9.10"), Ordering::Greater);
        assert_eq!(compare_versions("11", "11.0.0"), Ordering::Equal);
    }

    #[test]
    fn test_empty_predicate_always_holds() {
        let pred = PlatformPredicate::always();
        assert!(pred.matches(&catalina()));
        assert!(pred.matches(&Platform::new(Os::Linux, None, "x86_64")));
    }

    #[test]
    fn test_version_below() {
        let pred = PlatformPredicate {
            os: Some(Os::Macos),
            os_version_below: Some("11".into()),
            ..Default::default()
        };

        assert!(pred.matches(&catalina()));
        assert!(!pred.matches(&big_sur_arm()));
        assert!(!pred.matches(&Platform::new(Os::Linux, Some("5.10"), "x86_64")));
        assert!(!pred.matches(&Platform::new(Os::Macos, None, "x86_64")));
    }

    #[test]
    fn test_version_at_least_and_arch() {
        let pred = PlatformPredicate {
            arch: Some("aarch64".into()),
            os_version_at_least: Some("11.0".into()),
            ..Default::default()
        };
        assert!(pred.matches(&big_sur_arm()));
        assert!(!pred.matches(&catalina()));
    }

    #[test]
    fn test_predicate_from_toml() {
        let pred: PlatformPredicate =
            toml::from_str("os = \"macos\"\nos_version_below = \"11\"").unwrap();
        assert_eq!(pred.os, Some(Os::Macos));
        assert!(pred.validate().is_ok());

        let bad: PlatformPredicate = toml::from_str("os_version_below = \"soon\"").unwrap();
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_bottle_tag() {
        assert_eq!(big_sur_arm().bottle_tag().as_deref(), Some("arm64_big_sur"));
        assert_eq!(catalina().bottle_tag().as_deref(), Some("catalina"));
        assert_eq!(
            Platform::new(Os::Linux, None, "x86_64").bottle_tag().as_deref(),
            Some("x86_64_linux")
        );
    }
}
