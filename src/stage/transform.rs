// src/stage/transform.rs

//! Compiled transform steps and the pure (non-process) ones.
//!
//! `command` and `check` steps shell out and are driven by `crate::exec::command`;
//! everything else in the chain is implemented here.

use anyhow::Result;
use chrono::Datelike;
use globset::GlobSet;

use crate::config::{ProjectSection, TransformSpec};
use crate::watch::patterns::{build_globset, build_optional_globset, matches_path_or_name};

/// An in-flight file moving through a stage's chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    /// Output path relative to the stage's `dest`.
    pub rel: String,
    pub contents: Vec<u8>,
    /// Root-relative paths of the sources this asset was built from
    /// (several after a concat).
    pub origins: Vec<String>,
}

impl Asset {
    pub fn new(rel: impl Into<String>, contents: impl Into<Vec<u8>>, origin: impl Into<String>) -> Self {
        Self {
            rel: rel.into(),
            contents: contents.into(),
            origins: vec![origin.into()],
        }
    }
}

/// One step of a stage's chain, with its globs compiled.
#[derive(Debug, Clone)]
pub enum Transform {
    Command {
        cmd: String,
        ext: Option<String>,
        skip: Option<GlobSet>,
    },
    Check {
        cmd: String,
        skip: Option<GlobSet>,
    },
    Concat {
        file: String,
    },
    Banner {
        text: String,
    },
    Rename {
        suffix: Option<String>,
        ext: Option<String>,
        skip: Option<GlobSet>,
    },
    Filter {
        include: GlobSet,
    },
}

pub const DEFAULT_BANNER: &str = "/**\n * @project        {{name}}\n * @author         {{author}}\n * @copyright      Copyright (c) {{year}}, {{copyright}}\n *\n */\n";

impl Transform {
    pub fn from_spec(spec: &TransformSpec, project: &ProjectSection) -> Result<Self> {
        Ok(match spec {
            TransformSpec::Command { cmd, ext, skip } => Transform::Command {
                cmd: cmd.clone(),
                ext: ext.clone(),
                skip: build_optional_globset(skip)?,
            },
            TransformSpec::Check { cmd, skip } => Transform::Check {
                cmd: cmd.clone(),
                skip: build_optional_globset(skip)?,
            },
            TransformSpec::Concat { file } => Transform::Concat { file: file.clone() },
            TransformSpec::Banner { template } => {
                let template = template.as_deref().unwrap_or(DEFAULT_BANNER);
                Transform::Banner {
                    text: render_banner(template, project, chrono::Local::now().year()),
                }
            }
            TransformSpec::Rename { suffix, ext, skip } => Transform::Rename {
                suffix: suffix.clone(),
                ext: ext.clone(),
                skip: build_optional_globset(skip)?,
            },
            TransformSpec::Filter { include } => Transform::Filter {
                include: build_globset(include)?,
            },
        })
    }

    /// Short label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Transform::Command { .. } => "command",
            Transform::Check { .. } => "check",
            Transform::Concat { .. } => "concat",
            Transform::Banner { .. } => "banner",
            Transform::Rename { .. } => "rename",
            Transform::Filter { .. } => "filter",
        }
    }
}

/// True if an optional skip set exempts this asset from a step.
pub fn is_skipped(skip: &Option<GlobSet>, rel: &str) -> bool {
    skip.as_ref().is_some_and(|set| matches_path_or_name(set, rel))
}

pub fn render_banner(template: &str, project: &ProjectSection, year: i32) -> String {
    template
        .replace("{{name}}", &project.name)
        .replace("{{author}}", &project.author)
        .replace("{{copyright}}", &project.copyright)
        .replace("{{year}}", &year.to_string())
}

/// Fold all assets, in order, into one named asset.
///
/// Contents are joined with a newline (added only when an asset does not
/// already end with one). No assets in, no asset out.
pub fn concat(assets: Vec<Asset>, file: &str) -> Vec<Asset> {
    if assets.is_empty() {
        return assets;
    }

    let mut contents = Vec::new();
    let mut origins = Vec::new();
    for (i, asset) in assets.into_iter().enumerate() {
        if i > 0 && !contents.ends_with(b"\n") {
            contents.push(b'\n');
        }
        contents.extend_from_slice(&asset.contents);
        origins.extend(asset.origins);
    }

    vec![Asset {
        rel: file.to_string(),
        contents,
        origins,
    }]
}

pub fn banner(mut asset: Asset, text: &str) -> Asset {
    let mut contents = Vec::with_capacity(text.len() + asset.contents.len());
    contents.extend_from_slice(text.as_bytes());
    contents.append(&mut asset.contents);
    asset.contents = contents;
    asset
}

pub fn filter(assets: Vec<Asset>, include: &GlobSet) -> Vec<Asset> {
    assets
        .into_iter()
        .filter(|a| matches_path_or_name(include, &a.rel))
        .collect()
}

/// Swap the extension of the last path component (adds one if missing).
pub fn replace_extension(rel: &str, ext: &str) -> String {
    let ext = ext.trim_start_matches('.');
    let (dir, name) = split_name(rel);
    let stem = match name.rfind('.') {
        Some(idx) if idx > 0 => &name[..idx],
        _ => name,
    };
    format!("{dir}{stem}.{ext}")
}

/// `app.js` + suffix `.min` -> `app.min.js`; optional extension swap first.
pub fn rename_path(rel: &str, suffix: Option<&str>, ext: Option<&str>) -> String {
    let renamed = match ext {
        Some(ext) => replace_extension(rel, ext),
        None => rel.to_string(),
    };
    let Some(suffix) = suffix else {
        return renamed;
    };

    let (dir, name) = split_name(&renamed);
    match name.rfind('.') {
        Some(idx) if idx > 0 => format!("{dir}{}{suffix}{}", &name[..idx], &name[idx..]),
        _ => format!("{dir}{name}{suffix}"),
    }
}

fn split_name(rel: &str) -> (&str, &str) {
    match rel.rfind('/') {
        Some(idx) => (&rel[..=idx], &rel[idx + 1..]),
        None => ("", rel),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concat_joins_in_order_and_keeps_origins() {
        let out = concat(
            vec![
                Asset::new("a.css", "a{}", "src/a.css"),
                Asset::new("b.css", "b{}\n", "src/b.css"),
            ],
            "all.css",
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].rel, "all.css");
        assert_eq!(out[0].contents, b"a{}\nb{}\n");
        assert_eq!(out[0].origins, vec!["src/a.css", "src/b.css"]);
    }

    #[test]
    fn concat_of_nothing_is_nothing() {
        assert!(concat(Vec::new(), "all.css").is_empty());
    }

    #[test]
    fn default_banner_renders_project_fields() {
        let project = ProjectSection {
            name: "site".to_string(),
            author: "Jane".to_string(),
            copyright: "Example Ltd".to_string(),
        };
        let text = render_banner(DEFAULT_BANNER, &project, 2026);
        assert!(text.starts_with("/**\n"));
        assert!(text.contains("@project        site"));
        assert!(text.contains("Copyright (c) 2026, Example Ltd"));

        let out = banner(Asset::new("a.js", "x()", "a.js"), &text);
        assert!(out.contents.ends_with(b" */\nx()"));
    }

    #[test]
    fn rename_inserts_suffix_before_extension() {
        assert_eq!(rename_path("js/app.js", Some(".min"), None), "js/app.min.js");
        assert_eq!(rename_path("main.scss", None, Some("css")), "main.css");
        assert_eq!(rename_path("LICENSE", Some("-x"), None), "LICENSE-x");
        assert_eq!(replace_extension(".hidden", "txt"), ".hidden.txt");
    }

    #[test]
    fn filter_keeps_matching_assets() {
        let include = build_globset(&["*.css".to_string()]).unwrap();
        let out = filter(
            vec![
                Asset::new("site.css", "", "a"),
                Asset::new("site.css.map", "", "a"),
            ],
            &include,
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].rel, "site.css");
    }
}
