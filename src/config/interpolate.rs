// src/config/interpolate.rs

//! `${name}` placeholder expansion against the `[paths]` table.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::errors::{AssetdagError, Result};

fn placeholder_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\$\{([A-Za-z0-9_.\-]+)\}").expect("static regex"))
}

/// Replace every `${name}` in `input` with `vars[name]`.
///
/// Expansion is single-pass: substituted text is not scanned again.
/// An unknown name is a `ConfigError` naming `context`.
pub fn interpolate(input: &str, vars: &BTreeMap<String, String>, context: &str) -> Result<String> {
    let mut missing: Option<String> = None;

    let out = placeholder_re().replace_all(input, |caps: &Captures<'_>| {
        let name = &caps[1];
        match vars.get(name) {
            Some(value) => value.clone(),
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });

    match missing {
        Some(name) => Err(AssetdagError::ConfigError(format!(
            "{context}: unknown path variable '${{{name}}}' (declare it under [paths])"
        ))),
        None => Ok(out.into_owned()),
    }
}

/// Interpolate every entry of a list.
pub fn interpolate_all(
    inputs: &[String],
    vars: &BTreeMap<String, String>,
    context: &str,
) -> Result<Vec<String>> {
    inputs
        .iter()
        .map(|s| interpolate(s, vars, context))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars() -> BTreeMap<String, String> {
        let mut v = BTreeMap::new();
        v.insert("src".to_string(), "assets/src/".to_string());
        v.insert("dist".to_string(), "assets/dist/".to_string());
        v
    }

    #[test]
    fn expands_known_variables() {
        let out = interpolate("${src}scss/**/*.scss", &vars(), "stage.a.src").unwrap();
        assert_eq!(out, "assets/src/scss/**/*.scss");
    }

    #[test]
    fn leaves_plain_strings_alone() {
        assert_eq!(interpolate("a/b/*.js", &vars(), "x").unwrap(), "a/b/*.js");
    }

    #[test]
    fn unknown_variable_is_config_error() {
        match interpolate("${build}css", &vars(), "stage.css.dest") {
            Err(AssetdagError::ConfigError(msg)) => {
                assert!(msg.contains("${build}"));
                assert!(msg.contains("stage.css.dest"));
            }
            other => panic!("expected ConfigError, got {other:?}"),
        }
    }
}
