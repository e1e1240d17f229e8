use serde::Deserialize;

/// Where stage fingerprints are kept between invocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheStorageMode {
    /// Persist fingerprints in `.assetdag/cache` under the project root.
    File,
    /// Keep fingerprints in memory only (lost on restart).
    #[default]
    Memory,
}

/// How a stage signals the dev server after writing output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReloadMode {
    /// Scoped style swap when only `.css` files were written, full reload
    /// otherwise.
    #[default]
    Auto,
    /// Always ask clients for a full page reload.
    Full,
    /// Never notify clients.
    None,
}
