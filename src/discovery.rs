//! Archive discovery.
//!
//! Finds `.mhtml` / `.mht` files (case-insensitive, configurable) under one
//! or more roots. Two strategies produce the same set of paths:
//!
//! - **Native listing**: the host's bulk lister (`find` on Unix, `dir /s /b`
//!   on Windows) run as a subprocess with a timeout. Usually much faster on
//!   network and spinning storage.
//! - **Portable walk**: a `walkdir` traversal that skips unreadable
//!   directories and keeps going with their siblings.
//!
//! Native listing is only an accelerator. Any failure (tool missing, non-zero
//! exit, timeout) falls back to the portable walk for that root, and native
//! output is filtered through the same extension/existence/containment checks
//! the walker applies. On Unix the listing is NUL-separated and read as raw
//! bytes, so file names that are not valid UTF-8 survive intact. The portable
//! walk runs on the blocking pool.

use anyhow::Result;
use globset::{GlobBuilder, GlobSet, GlobSetBuilder};
use std::collections::HashSet;
#[cfg(unix)]
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::config::ScanConfig;

/// A matching file and how deep below its search root it was found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    /// 1 for files directly inside the root, 0 when the root itself is the file.
    pub depth: usize,
}

/// How paths are enumerated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingStrategy {
    /// Try the OS bulk lister first, fall back to the portable walk.
    Native,
    /// Always use the portable walk.
    Portable,
}

#[derive(Clone)]
pub struct Discovery {
    extensions: Vec<String>,
    matcher: GlobSet,
    strategy: ListingStrategy,
    listing_timeout: Duration,
    follow_symlinks: bool,
}

impl Discovery {
    pub fn new(config: &ScanConfig) -> Result<Self> {
        let extensions: Vec<String> = config
            .extensions
            .iter()
            .map(|e| e.trim_start_matches('.').to_string())
            .collect();

        let mut builder = GlobSetBuilder::new();
        for ext in &extensions {
            builder.add(
                GlobBuilder::new(&format!("*.{}", ext))
                    .case_insensitive(true)
                    .build()?,
            );
        }

        Ok(Self {
            extensions,
            matcher: builder.build()?,
            strategy: if config.native_listing {
                ListingStrategy::Native
            } else {
                ListingStrategy::Portable
            },
            listing_timeout: config.listing_timeout(),
            follow_symlinks: config.follow_symlinks,
        })
    }

    pub fn with_strategy(mut self, strategy: ListingStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy(&self) -> ListingStrategy {
        self.strategy
    }

    /// True if the file name carries one of the archive extensions.
    pub fn matches(&self, path: &Path) -> bool {
        path.file_name()
            .map(|name| self.matcher.is_match(Path::new(name)))
            .unwrap_or(false)
    }

    /// Find every archive under `roots`, each real file at most once.
    ///
    /// Roots that do not exist are logged and skipped. No ordering is
    /// guaranteed across roots.
    pub async fn find_archives(&self, roots: &[PathBuf]) -> Vec<DiscoveredFile> {
        let mut seen: HashSet<PathBuf> = HashSet::new();
        let mut found = Vec::new();

        for root in roots {
            let root = match absolute_root(root) {
                Ok(r) => r,
                Err(e) => {
                    warn!(root = %root.display(), error = %e, "skipping search root");
                    continue;
                }
            };

            if root.is_file() {
                if self.matches(&root) && seen.insert(self.dedup_key(&root)) {
                    found.push(DiscoveredFile {
                        path: root,
                        depth: 0,
                    });
                }
                continue;
            }

            let native = match self.strategy {
                ListingStrategy::Native => self.list_native(&root).await,
                ListingStrategy::Portable => None,
            };

            let files: Vec<DiscoveredFile> = match native {
                Some(paths) => paths
                    .into_iter()
                    .filter_map(|p| self.accept_listed(&root, p))
                    .collect(),
                None => self.walk_blocking(root.clone()).await,
            };

            for file in files {
                if seen.insert(self.dedup_key(&file.path)) {
                    found.push(file);
                }
            }
        }

        found
    }

    /// Lazily walk `root`, yielding matching files and skipping unreadable
    /// directories.
    pub fn walk_portable<'a>(&'a self, root: &Path) -> impl Iterator<Item = DiscoveredFile> + 'a {
        WalkDir::new(root)
            .follow_links(self.follow_symlinks)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    debug!(error = %e, "skipping unreadable entry");
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file() && self.matches(entry.path()))
            .map(|entry| DiscoveredFile {
                depth: entry.depth(),
                path: entry.into_path(),
            })
    }

    /// Run the portable walk for `root` on the blocking pool.
    async fn walk_blocking(&self, root: PathBuf) -> Vec<DiscoveredFile> {
        let discovery = self.clone();
        let walk = tokio::task::spawn_blocking(move || {
            discovery.walk_portable(&root).collect::<Vec<_>>()
        });
        match walk.await {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "portable walk failed");
                Vec::new()
            }
        }
    }

    /// Run the OS bulk lister for `root`. `None` means "use the portable walk".
    async fn list_native(&self, root: &Path) -> Option<Vec<PathBuf>> {
        let mut command = self.native_command(root)?;
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        match tokio::time::timeout(self.listing_timeout, command.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                let paths = parse_listing(&output.stdout);
                debug!(root = %root.display(), count = paths.len(), "native listing completed");
                Some(paths)
            }
            Ok(Ok(output)) => {
                debug!(root = %root.display(), status = %output.status, "native listing failed, walking instead");
                None
            }
            Ok(Err(e)) => {
                debug!(root = %root.display(), error = %e, "native lister unavailable, walking instead");
                None
            }
            Err(_) => {
                warn!(root = %root.display(), timeout = ?self.listing_timeout, "native listing timed out, walking instead");
                None
            }
        }
    }

    #[cfg(unix)]
    fn native_command(&self, root: &Path) -> Option<Command> {
        let mut cmd = Command::new("find");
        if self.follow_symlinks {
            cmd.arg("-L");
        }
        cmd.arg(root).args(["-type", "f", "("]);
        for (i, ext) in self.extensions.iter().enumerate() {
            if i > 0 {
                cmd.arg("-o");
            }
            cmd.arg("-iname").arg(format!("*.{}", ext));
        }
        cmd.args([")", "-print0"]);
        Some(cmd)
    }

    #[cfg(windows)]
    fn native_command(&self, root: &Path) -> Option<Command> {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", "dir", "/s", "/b", "/a-d"]);
        for ext in &self.extensions {
            cmd.arg(root.join(format!("*.{}", ext)));
        }
        Some(cmd)
    }

    #[cfg(not(any(unix, windows)))]
    fn native_command(&self, _root: &Path) -> Option<Command> {
        None
    }

    /// Apply the walker's acceptance rules to a path printed by the native lister.
    fn accept_listed(&self, root: &Path, path: PathBuf) -> Option<DiscoveredFile> {
        if !self.matches(&path) || !path.is_file() {
            return None;
        }
        let relative = path.strip_prefix(root).ok()?;
        let depth = relative.components().count();
        Some(DiscoveredFile { path, depth })
    }

    fn dedup_key(&self, path: &Path) -> PathBuf {
        if self.follow_symlinks {
            std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
        } else {
            path.to_path_buf()
        }
    }
}

/// Split `find -print0` output into paths without any text decoding.
#[cfg(unix)]
fn parse_listing(stdout: &[u8]) -> Vec<PathBuf> {
    use std::os::unix::ffi::OsStrExt;

    stdout
        .split(|b| *b == 0)
        .filter(|entry| !entry.is_empty())
        .map(|entry| PathBuf::from(OsStr::from_bytes(entry)))
        .collect()
}

/// One path per line, as printed by `dir /s /b`.
#[cfg(not(unix))]
fn parse_listing(stdout: &[u8]) -> Vec<PathBuf> {
    String::from_utf8_lossy(stdout)
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .map(PathBuf::from)
        .collect()
}

/// Canonicalize a search root. On Windows the verbatim `\\?\` prefix is
/// dropped so roots compare equal to paths printed by `dir`.
fn absolute_root(root: &Path) -> std::io::Result<PathBuf> {
    let canonical = std::fs::canonicalize(root)?;
    #[cfg(windows)]
    {
        let s = canonical.to_string_lossy();
        if let Some(stripped) = s.strip_prefix(r"\\?\") {
            if stripped.as_bytes().get(1) == Some(&b':') {
                return Ok(PathBuf::from(stripped));
            }
        }
    }
    Ok(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn discovery(strategy: ListingStrategy) -> Discovery {
        Discovery::new(&ScanConfig::default())
            .unwrap()
            .with_strategy(strategy)
    }

    fn fixture() -> TempDir {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("nested/deeper")).unwrap();
        fs::write(root.join("a.mhtml"), "x").unwrap();
        fs::write(root.join("B.MHT"), "x").unwrap();
        fs::write(root.join("notes.txt"), "x").unwrap();
        fs::write(root.join("nested/c.Mhtml"), "x").unwrap();
        fs::write(root.join("nested/deeper/d.mht"), "x").unwrap();
        fs::write(root.join("nested/deeper/archive.mhtml.bak"), "x").unwrap();
        tmp
    }

    fn names(files: &[DiscoveredFile]) -> Vec<String> {
        let mut names: Vec<String> = files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn extension_match_is_case_insensitive() {
        let d = discovery(ListingStrategy::Portable);
        assert!(d.matches(Path::new("/x/page.MHTML")));
        assert!(d.matches(Path::new("page.mht")));
        assert!(!d.matches(Path::new("page.html")));
        assert!(!d.matches(Path::new("page.mhtml.bak")));
        assert!(!d.matches(Path::new("mhtml")));
    }

    #[tokio::test]
    async fn portable_walk_finds_matching_files() {
        let tmp = fixture();
        let d = discovery(ListingStrategy::Portable);
        let files = d.find_archives(&[tmp.path().to_path_buf()]).await;
        assert_eq!(names(&files), vec!["B.MHT", "a.mhtml", "c.Mhtml", "d.mht"]);

        let d_file = files
            .iter()
            .find(|f| f.path.ends_with("d.mht"))
            .unwrap();
        assert_eq!(d_file.depth, 3);
        assert!(d_file.path.is_absolute());
    }

    #[tokio::test]
    async fn native_and_portable_agree() {
        let tmp = fixture();
        let roots = vec![tmp.path().to_path_buf()];
        let native = discovery(ListingStrategy::Native).find_archives(&roots).await;
        let portable = discovery(ListingStrategy::Portable).find_archives(&roots).await;
        assert_eq!(names(&native), names(&portable));

        let mut native_depths: Vec<usize> = native.iter().map(|f| f.depth).collect();
        let mut portable_depths: Vec<usize> = portable.iter().map(|f| f.depth).collect();
        native_depths.sort();
        portable_depths.sort();
        assert_eq!(native_depths, portable_depths);
    }

    #[tokio::test]
    async fn overlapping_roots_do_not_duplicate() {
        let tmp = fixture();
        let roots = vec![tmp.path().to_path_buf(), tmp.path().join("nested")];
        for strategy in [ListingStrategy::Native, ListingStrategy::Portable] {
            let files = discovery(strategy).find_archives(&roots).await;
            assert_eq!(files.len(), 4, "strategy {:?}", strategy);
        }
    }

    #[tokio::test]
    async fn results_stay_inside_roots_and_exist() {
        let tmp = fixture();
        let root = fs::canonicalize(tmp.path().join("nested")).unwrap();
        let files = discovery(ListingStrategy::Native)
            .find_archives(&[root.clone()])
            .await;
        assert_eq!(files.len(), 2);
        for f in &files {
            assert!(f.path.starts_with(&root));
            assert!(f.path.exists());
        }
    }

    #[tokio::test]
    async fn missing_root_is_skipped() {
        let tmp = fixture();
        let roots = vec![tmp.path().join("missing"), tmp.path().to_path_buf()];
        let files = discovery(ListingStrategy::Portable).find_archives(&roots).await;
        assert_eq!(files.len(), 4);
    }

    #[tokio::test]
    async fn file_root_is_accepted() {
        let tmp = fixture();
        let file = tmp.path().join("a.mhtml");
        let files = discovery(ListingStrategy::Native).find_archives(&[file]).await;
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].depth, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn unreadable_directory_is_skipped() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = fixture();
        let locked = tmp.path().join("locked");
        fs::create_dir(&locked).unwrap();
        fs::write(locked.join("hidden.mhtml"), "x").unwrap();
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

        let enforced = fs::read_dir(&locked).is_err();

        let roots = vec![tmp.path().to_path_buf()];
        let files = discovery(ListingStrategy::Portable).find_archives(&roots).await;

        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();

        let found = names(&files);
        for name in ["B.MHT", "a.mhtml", "c.Mhtml", "d.mht"] {
            assert!(found.contains(&name.to_string()), "missing {}", name);
        }
        // permissions are not enforced for root
        if enforced {
            assert_eq!(found.len(), 4);
            assert!(!found.contains(&"hidden.mhtml".to_string()));
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_utf8_names_are_listed_by_both_strategies() {
        use std::os::unix::ffi::OsStrExt;

        let tmp = TempDir::new().unwrap();
        let name = OsStr::from_bytes(b"caf\xe9.mhtml");
        // some filesystems only accept UTF-8 names
        if fs::write(tmp.path().join(name), "x").is_err() {
            return;
        }
        fs::write(tmp.path().join("plain.mhtml"), "x").unwrap();

        let roots = vec![tmp.path().to_path_buf()];
        let native = discovery(ListingStrategy::Native).find_archives(&roots).await;
        let portable = discovery(ListingStrategy::Portable).find_archives(&roots).await;

        assert_eq!(portable.len(), 2);
        assert_eq!(native.len(), 2);
        assert!(native.iter().any(|f| f.path.file_name() == Some(name)));
        assert_eq!(names(&native), names(&portable));
    }

    #[cfg(unix)]
    #[test]
    fn listing_output_splits_on_nul() {
        let paths = parse_listing(b"/r/a.mhtml\0/r/new\nline.mht\0");
        assert_eq!(
            paths,
            vec![PathBuf::from("/r/a.mhtml"), PathBuf::from("/r/new\nline.mht")]
        );
    }

    #[test]
    fn portable_walk_runs_on_a_current_thread_runtime() {
        let tmp = fixture();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();
        let files = runtime.block_on(
            discovery(ListingStrategy::Portable).find_archives(&[tmp.path().to_path_buf()]),
        );
        assert_eq!(files.len(), 4);
    }
}
