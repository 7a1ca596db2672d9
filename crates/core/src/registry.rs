//! Project registry: slug ↔ root-directory mapping
//!
//! The registry (`projects.yaml`) maps short filesystem-safe slugs to
//! absolute project roots and tracks git-worktree sub-entries. Lookup
//! resolves a working directory to the registered project whose root is
//! the *longest directory-boundary prefix* of that directory — so a cwd of
//! `/home/u/myapp-other` never matches a root of `/home/u/myapp`, and a
//! nested project wins over the project that contains it.

use crate::config::{load_strict, REGISTRY_SCHEMA};
use crate::errors::{RegistryError, Result};
use crate::fsutil;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, instrument};

/// Maximum slug length; longer inputs are truncated.
const SLUG_MAX_LEN: usize = 64;

/// Fallback slug for degenerate display names.
const SLUG_FALLBACK: &str = "project";

/// A registered project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectEntry {
    /// Display name as given at registration
    pub name: String,
    /// Absolute, cleaned project root
    pub root: PathBuf,
    /// Worktree name → slug of the worktree's own registry entry.
    /// Kept flexible for legacy files.
    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    pub worktrees: IndexMap<String, String>,
}

/// On-disk shape of `projects.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    projects: IndexMap<String, ProjectEntry>,
}

/// Derived state of a registered worktree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorktreeStatus {
    /// Worktree name within the parent project
    pub name: String,
    /// Slug of the worktree's registry entry
    pub slug: String,
    /// Resolved worktree path, when the slug resolves
    pub path: Option<PathBuf>,
    /// Whether the worktree directory exists
    pub dir_exists: bool,
    /// Whether a `.git` pointer (file or directory) exists in the worktree
    pub git_exists: bool,
    /// Whether path resolution failed (unknown slug)
    pub resolve_error: bool,
}

impl WorktreeStatus {
    /// A worktree is prunable iff both its directory and `.git` pointer are
    /// gone and resolution produced no error. An error means "unknown",
    /// which is never prunable.
    pub fn is_prunable(&self) -> bool {
        !self.resolve_error && !self.dir_exists && !self.git_exists
    }
}

/// The project registry, backed by `projects.yaml`.
#[derive(Debug)]
pub struct Registry {
    path: PathBuf,
    data: RegistryFile,
}

impl Registry {
    /// Load the registry from `path`. A missing file yields an empty
    /// registry; a malformed file is an error.
    #[instrument]
    pub fn load(path: &Path) -> Result<Self> {
        let data = if path.exists() {
            load_strict::<RegistryFile>(path, &REGISTRY_SCHEMA).map_err(|e| {
                crate::errors::ClawkerError::Registry(RegistryError::Parse {
                    message: e.to_string(),
                })
            })?
        } else {
            RegistryFile::default()
        };
        debug!(path = %path.display(), projects = data.projects.len(), "Loaded project registry");
        Ok(Self {
            path: path.to_path_buf(),
            data,
        })
    }

    /// Registry file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All registered projects, in insertion order.
    pub fn projects(&self) -> impl Iterator<Item = (&str, &ProjectEntry)> {
        self.data
            .projects
            .iter()
            .map(|(slug, entry)| (slug.as_str(), entry))
    }

    /// Get a project by slug.
    pub fn get(&self, slug: &str) -> Option<&ProjectEntry> {
        self.data.projects.get(slug)
    }

    /// Register a project. If an entry already has this root, its display
    /// name is updated and the existing slug returned; otherwise a unique
    /// slug is allocated.
    #[instrument(skip(self))]
    pub fn register(&mut self, name: &str, root: &Path) -> String {
        let root = clean_path(root);

        let existing = self
            .data
            .projects
            .iter()
            .find(|(_, entry)| entry.root == root)
            .map(|(slug, _)| slug.clone());
        if let Some(slug) = existing {
            if let Some(entry) = self.data.projects.get_mut(&slug) {
                entry.name = name.to_string();
            }
            debug!(slug = %slug, "Project root already registered; updated name");
            return slug;
        }

        let slug = unique_slug(&slugify(name), |candidate| {
            self.data.projects.contains_key(candidate)
        });
        self.data.projects.insert(
            slug.clone(),
            ProjectEntry {
                name: name.to_string(),
                root,
                worktrees: IndexMap::new(),
            },
        );
        debug!(slug = %slug, "Registered project");
        slug
    }

    /// Remove a project by slug. Returns whether it existed.
    pub fn unregister(&mut self, slug: &str) -> bool {
        self.data.projects.shift_remove(slug).is_some()
    }

    /// Record a worktree under a parent project.
    pub fn add_worktree(&mut self, project_slug: &str, name: &str, worktree_slug: &str) -> Result<()> {
        let entry = self.data.projects.get_mut(project_slug).ok_or_else(|| {
            RegistryError::UnknownProject {
                slug: project_slug.to_string(),
            }
        })?;
        entry
            .worktrees
            .insert(name.to_string(), worktree_slug.to_string());
        Ok(())
    }

    /// Remove a worktree record. Returns whether it existed.
    pub fn remove_worktree(&mut self, project_slug: &str, name: &str) -> bool {
        self.data
            .projects
            .get_mut(project_slug)
            .map(|entry| entry.worktrees.shift_remove(name).is_some())
            .unwrap_or(false)
    }

    /// Derived status for every worktree of a project.
    pub fn worktree_statuses(&self, project_slug: &str) -> Vec<WorktreeStatus> {
        let Some(entry) = self.data.projects.get(project_slug) else {
            return Vec::new();
        };
        entry
            .worktrees
            .iter()
            .map(|(name, slug)| match self.data.projects.get(slug) {
                Some(worktree_entry) => {
                    let path = worktree_entry.root.clone();
                    let dir_exists = path.is_dir();
                    let git_exists = path.join(".git").exists();
                    WorktreeStatus {
                        name: name.clone(),
                        slug: slug.clone(),
                        path: Some(path),
                        dir_exists,
                        git_exists,
                        resolve_error: false,
                    }
                }
                None => WorktreeStatus {
                    name: name.clone(),
                    slug: slug.clone(),
                    path: None,
                    dir_exists: false,
                    git_exists: false,
                    resolve_error: true,
                },
            })
            .collect()
    }

    /// Resolve a working directory to the registered project whose root is
    /// the longest directory-boundary prefix of it.
    #[instrument(skip(self))]
    pub fn lookup(&self, work_dir: &Path) -> Option<(&str, &ProjectEntry)> {
        let work_dir = clean_path(work_dir);
        let mut best: Option<(&str, &ProjectEntry)> = None;
        for (slug, entry) in &self.data.projects {
            // strip_prefix matches whole components, so `/a/myapp-other`
            // does not match a root of `/a/myapp`.
            if work_dir.strip_prefix(&entry.root).is_ok() {
                let better = match best {
                    Some((_, current)) => {
                        entry.root.as_os_str().len() > current.root.as_os_str().len()
                    }
                    None => true,
                };
                if better {
                    best = Some((slug.as_str(), entry));
                }
            }
        }
        if let Some((slug, _)) = best {
            debug!(slug = %slug, dir = %work_dir.display(), "Resolved project");
        }
        best
    }

    /// Like [`lookup`](Self::lookup) but an error when nothing matches.
    pub fn require(&self, work_dir: &Path) -> Result<(&str, &ProjectEntry)> {
        self.lookup(work_dir).ok_or_else(|| {
            RegistryError::NotInProject {
                dir: work_dir.display().to_string(),
            }
            .into()
        })
    }

    /// Persist the registry with the lock + atomic-rename discipline.
    #[instrument(skip(self))]
    pub fn save(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&self.data).map_err(|e| {
            crate::errors::ClawkerError::Registry(RegistryError::Parse {
                message: e.to_string(),
            })
        })?;
        fsutil::with_lock(&self.path, || fsutil::atomic_write(&self.path, yaml.as_bytes()))
    }
}

/// Lexically clean a path: drop `.` components and fold `..` where a
/// parent component is available, without touching the filesystem.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = cleaned.pop();
                if !popped {
                    cleaned.push(Component::ParentDir);
                }
            }
            other => cleaned.push(other),
        }
    }
    if cleaned.as_os_str().is_empty() {
        cleaned.push(".");
    }
    cleaned
}

/// Derive a filesystem-safe slug from a display name.
///
/// Lowercase, non-alphanumerics collapse to single hyphens, trimmed,
/// truncated to 64 characters, falling back to `"project"` when nothing
/// survives. Idempotent: `slugify(slugify(x)) == slugify(x)`.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_was_dash = false;
    for c in name.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash && !slug.is_empty() {
            slug.push('-');
            last_was_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.len() > SLUG_MAX_LEN {
        slug.truncate(SLUG_MAX_LEN);
        while slug.ends_with('-') {
            slug.pop();
        }
    }
    if slug.is_empty() {
        SLUG_FALLBACK.to_string()
    } else {
        slug
    }
}

/// Produce a slug not rejected by `taken`, appending `-2`, `-3`, … on
/// collision. If the input slug is free it is returned unchanged.
pub fn unique_slug(slug: &str, taken: impl Fn(&str) -> bool) -> String {
    if !taken(slug) {
        return slug.to_string();
    }
    let mut n = 2usize;
    loop {
        let candidate = format!("{slug}-{n}");
        if !taken(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn slugify_basic() {
        assert_eq!(slugify("My App"), "my-app");
        assert_eq!(slugify("hello__world!!"), "hello-world");
        assert_eq!(slugify("--leading--"), "leading");
    }

    #[test]
    fn slugify_is_idempotent() {
        for input in ["My App", "hello__world", "a--b--c", "全角 name", ""] {
            let once = slugify(input);
            assert_eq!(slugify(&once), once);
        }
    }

    #[test]
    fn slugify_degenerate_falls_back() {
        assert_eq!(slugify(""), "project");
        assert_eq!(slugify("___"), "project");
    }

    #[test]
    fn slugify_truncates_without_trailing_dash() {
        let long = "a-".repeat(64);
        let slug = slugify(&long);
        assert!(slug.len() <= SLUG_MAX_LEN);
        assert!(!slug.ends_with('-'));
    }

    #[test]
    fn unique_slug_appends_counter() {
        let taken = ["app".to_string(), "app-2".to_string()];
        let result = unique_slug("app", |s| taken.iter().any(|t| t == s));
        assert_eq!(result, "app-3");
        assert_eq!(unique_slug("fresh", |_| false), "fresh");
    }

    #[test]
    fn clean_path_folds_dots() {
        assert_eq!(clean_path(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(clean_path(Path::new("a/b/..")), PathBuf::from("a"));
        assert_eq!(clean_path(Path::new(".")), PathBuf::from("."));
    }

    fn registry_at(tmp: &TempDir) -> Registry {
        Registry::load(&tmp.path().join("projects.yaml")).unwrap()
    }

    #[test]
    fn register_allocates_unique_slugs() {
        let tmp = TempDir::new().unwrap();
        let mut registry = registry_at(&tmp);
        let a = registry.register("My App", Path::new("/repo/a"));
        let b = registry.register("My App", Path::new("/repo/b"));
        assert_eq!(a, "my-app");
        assert_eq!(b, "my-app-2");
    }

    #[test]
    fn register_same_root_updates_name_keeps_slug() {
        let tmp = TempDir::new().unwrap();
        let mut registry = registry_at(&tmp);
        let first = registry.register("Old Name", Path::new("/repo/app"));
        let second = registry.register("New Name", Path::new("/repo/app"));
        assert_eq!(first, second);
        assert_eq!(registry.get(&first).unwrap().name, "New Name");
        assert_eq!(registry.projects().count(), 1);
    }

    #[test]
    fn lookup_honors_directory_boundaries() {
        let tmp = TempDir::new().unwrap();
        let mut registry = registry_at(&tmp);
        registry.register("myapp", Path::new("/home/user/myapp"));

        assert!(registry.lookup(Path::new("/home/user/myapp")).is_some());
        assert!(registry
            .lookup(Path::new("/home/user/myapp/src/deep"))
            .is_some());
        // String prefix but not a directory-boundary prefix
        assert!(registry.lookup(Path::new("/home/user/myapp-other")).is_none());
    }

    #[test]
    fn lookup_prefers_longest_root() {
        let tmp = TempDir::new().unwrap();
        let mut registry = registry_at(&tmp);
        registry.register("outer", Path::new("/repo"));
        registry.register("inner", Path::new("/repo/nested"));

        let (slug, _) = registry.lookup(Path::new("/repo/nested/src")).unwrap();
        assert_eq!(slug, "inner");
        let (slug, _) = registry.lookup(Path::new("/repo/other")).unwrap();
        assert_eq!(slug, "outer");
    }

    #[test]
    fn save_and_reload_round_trips() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("projects.yaml");
        let mut registry = Registry::load(&path).unwrap();
        let slug = registry.register("My App", Path::new("/repo/app"));
        registry.register("wt", Path::new("/repo/app-wt"));
        registry.add_worktree(&slug, "feature", "wt").unwrap();
        registry.save().unwrap();

        let reloaded = Registry::load(&path).unwrap();
        assert_eq!(reloaded.get(&slug).unwrap().root, PathBuf::from("/repo/app"));
        assert_eq!(
            reloaded.get(&slug).unwrap().worktrees.get("feature"),
            Some(&"wt".to_string())
        );
    }

    #[test]
    fn worktree_status_prunable_only_when_both_flags_false() {
        let tmp = TempDir::new().unwrap();
        let mut registry = registry_at(&tmp);
        let parent = registry.register("app", tmp.path());

        // Existing worktree directory with a .git pointer file
        let wt_dir = tmp.path().join("wt");
        std::fs::create_dir_all(&wt_dir).unwrap();
        std::fs::write(wt_dir.join(".git"), "gitdir: /elsewhere").unwrap();
        let wt_slug = registry.register("app wt", &wt_dir);
        registry.add_worktree(&parent, "live", &wt_slug).unwrap();

        // Vanished worktree
        let gone_slug = registry.register("app gone", &tmp.path().join("gone"));
        registry.add_worktree(&parent, "gone", &gone_slug).unwrap();

        // Dangling slug: resolution error, never prunable
        registry.add_worktree(&parent, "dangling", "no-such-slug").unwrap();

        let statuses = registry.worktree_statuses(&parent);
        let by_name = |n: &str| statuses.iter().find(|s| s.name == n).unwrap();

        assert!(!by_name("live").is_prunable());
        assert!(by_name("live").git_exists);
        assert!(by_name("gone").is_prunable());
        assert!(!by_name("dangling").is_prunable());
        assert!(by_name("dangling").resolve_error);
    }

    #[test]
    fn unregister_reports_existence() {
        let tmp = TempDir::new().unwrap();
        let mut registry = registry_at(&tmp);
        let slug = registry.register("app", Path::new("/repo/app"));
        assert!(registry.unregister(&slug));
        assert!(!registry.unregister(&slug));
    }
}
