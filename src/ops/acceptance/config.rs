//! Server configuration rendering.

use std::fmt::Write as _;

use anyhow::Result;

use crate::core::acceptance::ConfigTemplate;
use crate::util::template::Vars;

/// Render `template` as INI text: a `[section]` header per section followed
/// by `key=value` lines, both in template order.
pub fn render_config(template: &ConfigTemplate, vars: &Vars) -> Result<String> {
    let mut out = String::new();

    for (i, section) in template.sections.iter().enumerate() {
        if i > 0 {
            out.push('\n');
        }
        writeln!(out, "[{}]", section.name)?;
        for (key, value) in &section.entries {
            writeln!(out, "{}={}", key, vars.expand(value)?)?;
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::acceptance::ConfigSection;

    fn section(name: &str, entries: &[(&str, &str)]) -> ConfigSection {
        ConfigSection {
            name: name.into(),
            entries: entries
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        }
    }

    #[test]
    fn test_sections_and_entries_keep_order() {
        let template = ConfigTemplate {
            path: "smb.conf".into(),
            sections: vec![
                section(
                    "global",
                    &[
                        ("private dir", "{testpath}/samba/state"),
                        ("interfaces", "127.0.0.1"),
                    ],
                ),
                section("test", &[("path", "{testpath}/samba/data"), ("guest ok", "yes")]),
            ],
        };
        let vars = Vars::new().with("testpath", "/tmp/t");

        let text = render_config(&template, &vars).unwrap();
        assert_eq!(
            text,
            "[global]\n\
             private dir=/tmp/t/samba/state\n\
             interfaces=127.0.0.1\n\
             \n\
             [test]\n\
             path=/tmp/t/samba/data\n\
             guest ok=yes\n"
        );
    }

    #[test]
    fn test_unknown_placeholder_is_error() {
        let template = ConfigTemplate {
            path: "x.conf".into(),
            sections: vec![section("global", &[("pid directory", "{nope}")])],
        };
        assert!(render_config(&template, &Vars::new()).is_err());
    }
}
