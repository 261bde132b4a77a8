//! Upstream version check.

use std::cmp::Ordering;

use regex::Regex;
use serde::Serialize;

use crate::core::error::{PipelineError, PipelineResult};
use crate::core::platform::compare_versions;
use crate::core::recipe::Recipe;
use crate::sources::transport::Transport;

/// Result of a livecheck.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LivecheckReport {
    pub name: String,
    pub current: String,
    pub latest: String,
    pub outdated: bool,
}

/// Fetch the recipe's livecheck page and report the newest version on it.
pub fn livecheck(recipe: &Recipe, transport: &dyn Transport) -> PipelineResult<LivecheckReport> {
    let spec = recipe
        .livecheck
        .as_ref()
        .ok_or_else(|| PipelineError::recipe(format!("`{}` has no livecheck", recipe.name)))?;

    let re = Regex::new(&spec.regex)
        .map_err(|e| PipelineError::recipe(format!("livecheck.regex is invalid: {}", e)))?;

    tracing::debug!("livecheck: GET {}", spec.url);
    let body = transport.get(&spec.url)?;
    let page = String::from_utf8_lossy(&body);

    let latest = newest_version(&re, &page).ok_or_else(|| {
        PipelineError::fetch(&spec.url, "no version matched the livecheck regex")
    })?;

    let outdated = compare_versions(&latest, &recipe.version) == Ordering::Greater;
    Ok(LivecheckReport {
        name: recipe.name.clone(),
        current: recipe.version.clone(),
        latest,
        outdated,
    })
}

fn newest_version(re: &Regex, page: &str) -> Option<String> {
    re.captures_iter(page)
        .filter_map(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .max_by(|a, b| compare_versions(a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::recipe::Livecheck;
    use crate::test_support::fixtures::{minimal_recipe_toml, SHA_A};
    use crate::test_support::MockTransport;

    const PAGE_URL: &str = "https://www.samba.org/samba/download/";

    const PAGE: &str = r#"
<a href="/pub/samba/stable/samba-4.9.18.tar.gz">samba-4.9.18</a>
<a href="/pub/samba/stable/samba-4.14.7.tar.gz">samba-4.14.7</a>
<a href="/pub/samba/stable/samba-4.15.0.tar.gz">samba-4.15.0</a>
<a href="/pub/samba/stable/Samba-4.10.1.tar.gz">Samba-4.10.1</a>
"#;

    fn recipe(version: &str) -> Recipe {
        let mut recipe: Recipe =
            minimal_recipe_toml("https://example.invalid/hello-1.0.tar.gz", SHA_A)
                .parse()
                .unwrap();
        recipe.version = version.into();
        recipe.livecheck = Some(Livecheck {
            url: PAGE_URL.into(),
            regex: r"(?i)href=.*?samba[._-]v?(\d+(?:\.\d+)+)\.t".into(),
        });
        recipe
    }

    #[test]
    fn test_picks_greatest_version_numerically() {
        let transport = MockTransport::new().with_body(PAGE_URL, PAGE);
        let report = livecheck(&recipe("4.14.7"), &transport).unwrap();

        assert_eq!(report.latest, "4.15.0");
        assert!(report.outdated);
        assert_eq!(transport.request_count(PAGE_URL), 1);
    }

    #[test]
    fn test_up_to_date() {
        let transport = MockTransport::new().with_body(PAGE_URL, PAGE);
        let report = livecheck(&recipe("4.15.0"), &transport).unwrap();
        assert!(!report.outdated);
    }

    #[test]
    fn test_no_match_is_error() {
        let transport = MockTransport::new().with_body(PAGE_URL, "<html></html>");
        let err = livecheck(&recipe("4.14.7"), &transport).unwrap_err();
        assert!(matches!(err, PipelineError::Fetch { .. }));
    }

    #[test]
    fn test_recipe_without_livecheck() {
        let mut r = recipe("1.0");
        r.livecheck = None;
        let err = livecheck(&r, &MockTransport::new()).unwrap_err();
        assert!(matches!(err, PipelineError::Recipe { .. }));
    }
}
