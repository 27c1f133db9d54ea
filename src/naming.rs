//! Collision-free output naming
//!
//! Candidates are tried in a fixed order: the joined keywords, then `-2`,
//! `-3`, ... up to the configured attempt count, then a Unix timestamp
//! suffix. [`NameResolver::claim`] creates the winning file with
//! `create_new`, so two workers can never end up with the same name.
//! The encoded bytes go to a hidden `.partial` sibling that is renamed over
//! the placeholder, so a killed process leaves at most an empty placeholder
//! and never a half-written image.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::SeoConfig;
use crate::error::{Result, ConverterError};

/// Builds output filenames from keywords
#[derive(Debug, Clone)]
pub struct NameResolver {
    max_filename_length: usize,
    max_suffix_attempts: u32,
}

impl NameResolver {
    pub fn new(config: &SeoConfig) -> Self {
        Self {
            max_filename_length: config.max_filename_length,
            max_suffix_attempts: config.max_suffix_attempts,
        }
    }

    /// Hyphen-joined keywords cut at a token boundary so that
    /// `<base>.<extension>` fits the length limit. The first keyword is
    /// always kept whole.
    pub fn base_name(&self, keywords: &[String], extension: &str) -> String {
        let budget = self
            .max_filename_length
            .saturating_sub(extension.len() + 1);

        let mut base = String::new();
        for keyword in keywords.iter().filter(|k| !k.is_empty()) {
            if base.is_empty() {
                base.push_str(keyword);
            } else if base.len() + 1 + keyword.len() <= budget {
                base.push('-');
                base.push_str(keyword);
            } else {
                break;
            }
        }

        if base.is_empty() {
            base.push_str("image");
        }
        base
    }

    /// Candidate stems in the order they are tried
    fn candidates<'a>(&self, base: &'a str, timestamp: i64) -> impl Iterator<Item = String> + 'a {
        let numbered = (2..=self.max_suffix_attempts as u64 + 1).map(move |n| format!("{}-{}", base, n));
        // The timestamp tier is only reachable when numbered suffixes are enabled
        let stamped = (self.max_suffix_attempts > 0)
            .then(move || {
                std::iter::once(format!("{}-{}", base, timestamp))
                    .chain((2u64..).map(move |k| format!("{}-{}-{}", base, timestamp, k)))
            })
            .into_iter()
            .flatten();

        std::iter::once(base.to_string()).chain(numbered).chain(stamped)
    }

    /// First candidate path in `dir` that does not exist right now
    ///
    /// Nothing is created; use [`claim`](Self::claim) when the name will be
    /// written.
    pub fn resolve(&self, keywords: &[String], dir: &Path, extension: &str) -> Result<PathBuf> {
        let base = self.base_name(keywords, extension);
        let timestamp = chrono::Utc::now().timestamp();

        for stem in self.candidates(&base, timestamp) {
            let path = dir.join(format!("{}.{}", stem, extension));
            if !path.exists() {
                return Ok(path);
            }
        }

        Err(ConverterError::NameResolutionExhausted { base })
    }

    /// Atomically reserve the first free candidate by creating it
    pub fn claim(&self, keywords: &[String], dir: &Path, extension: &str) -> Result<ClaimedPath> {
        let base = self.base_name(keywords, extension);
        let timestamp = chrono::Utc::now().timestamp();

        for stem in self.candidates(&base, timestamp) {
            let path = dir.join(format!("{}.{}", stem, extension));
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    debug!("Claimed output name {:?}", path);
                    return Ok(ClaimedPath {
                        path,
                        file: Some(file),
                        committed: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(e) => {
                    return Err(ConverterError::write(
                        format!("Cannot create output file: {}", e),
                        path,
                    ))
                }
            }
        }

        Err(ConverterError::NameResolutionExhausted { base })
    }
}

/// An exclusively created, still empty output file
///
/// Dropping it without [`commit`](Self::commit) removes the placeholder.
#[derive(Debug)]
pub struct ClaimedPath {
    path: PathBuf,
    file: Option<File>,
    committed: bool,
}

impl ClaimedPath {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write the final contents and keep the file
    ///
    /// The data is written next to the placeholder and renamed over it.
    pub fn commit(mut self, data: &[u8]) -> Result<PathBuf> {
        if self.file.take().is_none() {
            return Err(ConverterError::write("Claim already released", self.path.clone()));
        }

        let staging = self.staging_path();
        if let Err(e) = write_staged(&staging, data).and_then(|_| std::fs::rename(&staging, &self.path)) {
            if let Err(cleanup) = std::fs::remove_file(&staging) {
                debug!("Could not remove staging file {:?}: {}", staging, cleanup);
            }
            return Err(ConverterError::write(e.to_string(), self.path.clone()));
        }

        self.committed = true;
        Ok(self.path.clone())
    }

    /// `.<name>.partial` in the same directory as the claimed file
    fn staging_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.path.with_file_name(format!(".{}.partial", name))
    }
}

fn write_staged(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create(true).truncate(true).open(path)?;
    file.write_all(data)?;
    file.flush()
}

impl Drop for ClaimedPath {
    fn drop(&mut self) {
        if !self.committed {
            self.file.take();
            if let Err(e) = std::fs::remove_file(&self.path) {
                debug!("Could not remove unused claim {:?}: {}", self.path, e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn resolver(max_len: usize, attempts: u32) -> NameResolver {
        NameResolver::new(&SeoConfig {
            max_filename_length: max_len,
            max_suffix_attempts: attempts,
            ..SeoConfig::default()
        })
    }

    fn words(list: &[&str]) -> Vec<String> {
        list.iter().map(|w| w.to_string()).collect()
    }

    #[test]
    fn test_base_name_truncates_at_token_boundary() {
        let keywords = words(&["golden", "retriever", "playing", "fetch"]);
        // "golden-retriever" + ".webp" = 21
        assert_eq!(resolver(21, 5).base_name(&keywords, "webp"), "golden-retriever");
        assert_eq!(resolver(24, 5).base_name(&keywords, "webp"), "golden-retriever");
        assert_eq!(resolver(100, 5).base_name(&keywords, "webp"), "golden-retriever-playing-fetch");
    }

    #[test]
    fn test_first_token_never_cut() {
        let keywords = words(&["extraordinarilylongkeyword", "cat"]);
        assert_eq!(resolver(16, 5).base_name(&keywords, "jpg"), "extraordinarilylongkeyword");
    }

    #[test]
    fn test_resolve_suffix_order() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(100, 3);
        let keywords = words(&["red", "car"]);

        assert_eq!(resolver.resolve(&keywords, dir.path(), "webp").unwrap(), dir.path().join("red-car.webp"));

        std::fs::write(dir.path().join("red-car.webp"), b"x").unwrap();
        std::fs::write(dir.path().join("red-car-2.webp"), b"x").unwrap();
        assert_eq!(resolver.resolve(&keywords, dir.path(), "webp").unwrap(), dir.path().join("red-car-3.webp"));

        // Resolving twice against the same directory is stable
        assert_eq!(
            resolver.resolve(&keywords, dir.path(), "webp").unwrap(),
            resolver.resolve(&keywords, dir.path(), "webp").unwrap()
        );
    }

    #[test]
    fn test_timestamp_after_numbered_suffixes() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(100, 2);
        let keywords = words(&["red", "car"]);
        for name in ["red-car.png", "red-car-2.png", "red-car-3.png"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let path = resolver.resolve(&keywords, dir.path(), "png").unwrap();
        let stem = path.file_stem().unwrap().to_str().unwrap().to_string();
        let suffix = stem.strip_prefix("red-car-").unwrap();
        assert!(suffix.parse::<i64>().unwrap() > 1_600_000_000);
    }

    #[test]
    fn test_zero_attempts_exhausts() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(100, 0);
        let keywords = words(&["red", "car"]);
        std::fs::write(dir.path().join("red-car.png"), b"x").unwrap();

        let err = resolver.claim(&keywords, dir.path(), "png").unwrap_err();
        assert!(matches!(err, ConverterError::NameResolutionExhausted { .. }));
    }

    #[test]
    fn test_claim_commit_and_release() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(100, 5);
        let keywords = words(&["blue", "sky"]);

        let first = resolver.claim(&keywords, dir.path(), "jpg").unwrap();
        let second = resolver.claim(&keywords, dir.path(), "jpg").unwrap();
        assert_eq!(first.path(), dir.path().join("blue-sky.jpg"));
        assert_eq!(second.path(), dir.path().join("blue-sky-2.jpg"));

        let written = first.commit(b"data").unwrap();
        assert_eq!(std::fs::read(&written).unwrap(), b"data");

        let abandoned = second.path().to_path_buf();
        drop(second);
        assert!(!abandoned.exists());
    }

    #[test]
    fn test_commit_replaces_placeholder_in_one_step() {
        let dir = TempDir::new().unwrap();
        let resolver = resolver(100, 5);
        let claim = resolver.claim(&words(&["old", "barn"]), dir.path(), "png").unwrap();
        assert_eq!(std::fs::metadata(claim.path()).unwrap().len(), 0);

        // Left over from an interrupted earlier commit
        let staging = dir.path().join(".old-barn.png.partial");
        std::fs::write(&staging, b"stale bytes that are longer").unwrap();

        let written = claim.commit(b"fresh").unwrap();
        assert_eq!(std::fs::read(&written).unwrap(), b"fresh");
        assert!(!staging.exists());

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["old-barn.png".to_string()]);
    }

    #[test]
    fn test_concurrent_claims_are_unique() {
        let dir = Arc::new(TempDir::new().unwrap());
        let resolver = Arc::new(resolver(100, 999));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let dir = Arc::clone(&dir);
                let resolver = Arc::clone(&resolver);
                std::thread::spawn(move || {
                    let claim = resolver.claim(&words(&["same", "name"]), dir.path(), "webp").unwrap();
                    claim.commit(b"x").unwrap()
                })
            })
            .collect();

        let paths: HashSet<PathBuf> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        assert_eq!(paths.len(), 8);
        assert!(paths.contains(&dir.path().join("same-name.webp")));
        assert!(paths.contains(&dir.path().join("same-name-8.webp")));
    }
}
