//! Cache directory handling and deterministic cache file naming
//!
//! Cache entries are named `<key>@<width>x<height>-<tag>.png` directly inside
//! the configured cache directory. Other tools rely on this layout to pre-warm
//! or inspect the cache, so it must not change.

use crate::error::{CacheError, Result};
use crate::key::CacheKey;
use crate::target::TargetSpec;
use std::fmt;
use std::path::{Path, PathBuf};
use url::Url;

/// Base directory of the cache, given as a plain path or a URL.
///
/// The stored form always ends with a separator. Only plain paths and
/// `file://` URLs are locally addressable; anything else resolves to a
/// [`CacheLocation::Remote`] that generation refuses to write to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheDir(String);

impl CacheDir {
    pub fn new(dir: impl Into<String>) -> Self {
        let mut dir = dir.into();
        if !ends_with_separator(&dir) {
            dir.push(if parse_url(&dir).is_some() { '/' } else { std::path::MAIN_SEPARATOR });
        }
        Self(dir)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Resolve `file_name` relative to this directory.
    pub fn resolve(&self, file_name: &str) -> CacheLocation {
        let Some(url) = parse_url(&self.0) else {
            return CacheLocation::Local(Path::new(&self.0).join(file_name));
        };
        if url.scheme() == "file" {
            if let Ok(dir) = url.to_file_path() {
                return CacheLocation::Local(dir.join(file_name));
            }
        }
        CacheLocation::Remote(format!("{}{}", self.0, file_name))
    }
}

impl From<&str> for CacheDir {
    fn from(dir: &str) -> Self {
        Self::new(dir)
    }
}

impl From<&Path> for CacheDir {
    fn from(dir: &Path) -> Self {
        Self::new(dir.to_string_lossy().into_owned())
    }
}

impl fmt::Display for CacheDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where a cache entry lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CacheLocation {
    Local(PathBuf),
    /// Not addressable on the local filesystem.
    Remote(String),
}

impl CacheLocation {
    pub fn is_local(&self) -> bool {
        matches!(self, CacheLocation::Local(_))
    }

    pub fn to_local_path(&self) -> Result<&Path> {
        match self {
            CacheLocation::Local(path) => Ok(path),
            CacheLocation::Remote(url) => Err(CacheError::InvalidTarget(url.clone())),
        }
    }
}

impl fmt::Display for CacheLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheLocation::Local(path) => write!(f, "{}", path.display()),
            CacheLocation::Remote(url) => f.write_str(url),
        }
    }
}

/// `<key>@<width>x<height>-<tag>.png`
pub fn cache_file_name(key: &CacheKey, target: &TargetSpec) -> String {
    format!(
        "{}@{}x{}-{}.png",
        key,
        target.width,
        target.height,
        target.fill_mode.tag()
    )
}

pub fn resolve_cache_location(dir: &CacheDir, key: &CacheKey, target: &TargetSpec) -> CacheLocation {
    dir.resolve(&cache_file_name(key, target))
}

/// Resolve the local cache file for `key` rendered at `target`.
///
/// Fails with [`CacheError::InvalidTarget`] when the cache directory is not on
/// the local filesystem.
pub fn resolve_cache_path(dir: &CacheDir, key: &CacheKey, target: &TargetSpec) -> Result<PathBuf> {
    resolve_cache_location(dir, key, target)
        .to_local_path()
        .map(Path::to_path_buf)
}

fn ends_with_separator(dir: &str) -> bool {
    dir.ends_with('/') || dir.ends_with(std::path::MAIN_SEPARATOR)
}

/// Parse `dir` as a URL. Strings that do not parse, and single-letter schemes
/// such as Windows drive letters, are plain paths.
fn parse_url(dir: &str) -> Option<Url> {
    Url::parse(dir).ok().filter(|url| url.scheme().len() > 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::FillMode;
    use anyhow::Result;
    use tempfile::tempdir;

    fn key_for(temp: &Path) -> Result<CacheKey> {
        let file = temp.join("source.png");
        std::fs::write(&file, b"x")?;
        Ok(crate::key::derive_key(&file).unwrap())
    }

    #[test]
    fn test_trailing_separator_is_enforced() {
        let sep = std::path::MAIN_SEPARATOR;
        assert_eq!(CacheDir::new("/var/cache/thumbs").as_str(), format!("/var/cache/thumbs{}", sep));
        assert_eq!(CacheDir::new("/var/cache/thumbs/").as_str(), "/var/cache/thumbs/");
        assert_eq!(CacheDir::new("file:///var/cache").as_str(), "file:///var/cache/");
    }

    #[test]
    fn test_file_name_format() -> Result<()> {
        let temp_dir = tempdir()?;
        let key = key_for(temp_dir.path())?;

        let crop = TargetSpec::new(320, 180, FillMode::PreserveAspectCrop);
        assert_eq!(cache_file_name(&key, &crop), format!("{}@320x180-crop.png", key));

        let fit = TargetSpec::new(64, 64, FillMode::PreserveAspectFit);
        assert_eq!(cache_file_name(&key, &fit), format!("{}@64x64-fit.png", key));

        let stretch = TargetSpec::new(1, 2, FillMode::Stretch);
        assert_eq!(cache_file_name(&key, &stretch), format!("{}@1x2-stretch.png", key));
        Ok(())
    }

    #[test]
    fn test_resolution_is_deterministic() -> Result<()> {
        let temp_dir = tempdir()?;
        let key = key_for(temp_dir.path())?;
        let dir = CacheDir::from(temp_dir.path().join("cache").as_path());
        let target = TargetSpec::new(100, 50, FillMode::PreserveAspectFit);

        let first = resolve_cache_path(&dir, &key, &target)?;
        let second = resolve_cache_path(&dir, &key, &target)?;
        assert_eq!(first, second);
        assert_eq!(first.parent(), Some(temp_dir.path().join("cache").as_path()));

        let other = resolve_cache_path(&dir, &key, &TargetSpec::new(100, 51, FillMode::PreserveAspectFit))?;
        assert_ne!(first, other);
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn test_file_url_is_local() {
        let dir = CacheDir::new("file:///home/user/.cache/wall%20papers");
        match dir.resolve("a.png") {
            CacheLocation::Local(path) => {
                assert_eq!(path, PathBuf::from("/home/user/.cache/wall papers/a.png"))
            }
            other => panic!("expected local path, got {:?}", other),
        }

        let localhost = CacheDir::new("file://localhost/tmp");
        assert_eq!(localhost.resolve("b.png"), CacheLocation::Local(PathBuf::from("/tmp/b.png")));
    }

    #[test]
    fn test_non_local_is_invalid_target() -> Result<()> {
        let temp_dir = tempdir()?;
        let key = key_for(temp_dir.path())?;
        let target = TargetSpec::new(10, 10, FillMode::Stretch);

        for dir in ["https://example.com/cache", "file://fileserver/share"] {
            let dir = CacheDir::new(dir);
            let location = resolve_cache_location(&dir, &key, &target);
            assert!(!location.is_local());
            assert!(location.to_string().ends_with("@10x10-stretch.png"));
            assert!(matches!(
                resolve_cache_path(&dir, &key, &target),
                Err(CacheError::InvalidTarget(_))
            ));
        }
        Ok(())
    }

    #[test]
    fn test_schemes_without_authority_are_not_local() -> Result<()> {
        let temp_dir = tempdir()?;
        let key = key_for(temp_dir.path())?;
        let target = TargetSpec::new(1, 1, FillMode::PreserveAspectFit);

        for dir in ["qrc:/thumbs", "http:cache", "data:image/png", "image://provider/thumbs"] {
            let dir = CacheDir::new(dir);
            assert!(dir.as_str().ends_with('/'));
            assert!(matches!(
                resolve_cache_path(&dir, &key, &target),
                Err(CacheError::InvalidTarget(_))
            ));
        }
        Ok(())
    }

    #[test]
    fn test_plain_paths_are_not_urls() {
        assert!(parse_url("/plain/path").is_none());
        assert!(parse_url("relative/cache").is_none());
        assert!(parse_url("C:\\Users\\cache").is_none());
        assert!(parse_url("C:/Users/cache").is_none());
        assert!(parse_url("qrc:/thumbs").is_some());
        assert!(parse_url("file:///tmp").is_some());
    }
}
