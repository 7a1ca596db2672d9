//! Layered configuration store
//!
//! A single authoritative in-memory view of configuration merged from
//! (lowest to highest precedence): built-in defaults → user settings →
//! user project overlay → project registry → project `clawker.yaml` →
//! `CLAWKER_*` environment variables.
//!
//! Every key is namespaced by scope internally (`project.build.image`);
//! reads accept the scoped or unscoped form, and writes infer the scope
//! from a static ownership table. Mutations are tracked as dirty at
//! `(scope, root key)` granularity, and persistence rewrites only the
//! owning file of the dirty roots being flushed, under an advisory file
//! lock with an atomic rename. Dirty flags clear only after a successful
//! rename.

use crate::config::{
    self, KeySchema, ProjectConfig, Settings, PROJECT_SCHEMA, REGISTRY_SCHEMA, SETTINGS_SCHEMA,
};
use crate::errors::{ConfigError, Result};
use crate::fsutil;
use crate::paths;
use crate::registry::Registry;
use indexmap::IndexMap;
use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, instrument, warn};

/// Configuration scope. Each top-level key belongs to exactly one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    Settings,
    Project,
    Registry,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Settings => "settings",
            Scope::Project => "project",
            Scope::Registry => "registry",
        }
    }

    /// Flush order for whole-store writes.
    pub const WRITE_ORDER: [Scope; 3] = [Scope::Settings, Scope::Registry, Scope::Project];

    fn parse(s: &str) -> Option<Scope> {
        match s {
            "settings" => Some(Scope::Settings),
            "project" => Some(Scope::Project),
            "registry" => Some(Scope::Registry),
            _ => None,
        }
    }

    fn schema(&self) -> &'static KeySchema {
        match self {
            Scope::Settings => &SETTINGS_SCHEMA,
            Scope::Project => &PROJECT_SCHEMA,
            Scope::Registry => &REGISTRY_SCHEMA,
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Scope {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Scope::parse(s).ok_or_else(|| ConfigError::Validation {
            message: format!("Unknown scope '{s}'. Supported scopes: settings, project, registry"),
        })
    }
}

/// Ownership table: unscoped top-level key → owning scope.
///
/// `default_image` exists in both the settings and project schemas; the
/// unscoped form resolves to the project scope (the higher-precedence
/// layer), and the settings copy is addressed as `settings.default_image`.
const OWNERSHIP: &[(&str, Scope)] = &[
    ("logging", Scope::Settings),
    ("monitoring", Scope::Settings),
    ("host_proxy", Scope::Settings),
    ("version", Scope::Project),
    ("project", Scope::Project),
    ("default_image", Scope::Project),
    ("build", Scope::Project),
    ("agent", Scope::Project),
    ("workspace", Scope::Project),
    ("security", Scope::Project),
    ("loop", Scope::Project),
    ("projects", Scope::Registry),
];

fn owning_scope(root: &str) -> Option<Scope> {
    OWNERSHIP
        .iter()
        .find(|(key, _)| *key == root)
        .map(|(_, scope)| *scope)
}

/// Options controlling [`ConfigStore::write`].
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    /// Persist a single dirty key to its owning file
    pub key: Option<String>,
    /// Persist all dirty roots within one scope
    pub scope: Option<Scope>,
    /// With neither key nor scope: export the merged config to this path
    pub path: Option<PathBuf>,
}

/// Per-scope state: merged view, owning file, and pending mutations.
#[derive(Debug)]
struct ScopeState {
    /// Fully merged view for reads (defaults ⊕ files ⊕ env)
    merged: Mapping,
    /// Owning file for writes in this scope
    file: PathBuf,
    /// Last known persisted content of the owning file
    file_doc: Mapping,
    /// Dirty root key → updated subtree destined for the owning file
    pending: IndexMap<String, Value>,
}

impl ScopeState {
    fn new(file: PathBuf, defaults: Mapping) -> Self {
        Self {
            merged: defaults,
            file,
            file_doc: Mapping::new(),
            pending: IndexMap::new(),
        }
    }
}

/// Options for [`ConfigStore::load`].
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Working directory used for project discovery; defaults to the
    /// process cwd.
    pub cwd: Option<PathBuf>,
    /// App home override; defaults to [`paths::app_home`]. Used by tests.
    pub home: Option<PathBuf>,
    /// Skip `CLAWKER_*` environment overrides. Used by tests.
    pub ignore_env: bool,
}

/// The layered configuration store.
#[derive(Debug)]
pub struct ConfigStore {
    settings: ScopeState,
    project: ScopeState,
    registry_scope: ScopeState,
    registry: Registry,
    project_root: Option<PathBuf>,
    project_slug: Option<String>,
}

impl ConfigStore {
    /// Load and merge all configuration layers.
    ///
    /// Validation errors in any present file are fatal; missing optional
    /// files are silently skipped.
    #[instrument(skip(opts))]
    pub fn load(opts: LoadOptions) -> Result<Self> {
        let home = opts.home.unwrap_or_else(paths::app_home);
        let cwd = match opts.cwd {
            Some(cwd) => cwd,
            None => std::env::current_dir()?,
        };

        // Registry first: project discovery keys every later layer.
        let registry = Registry::load(&home.join("projects.yaml"))?;
        let (project_slug, project_root) = match registry.lookup(&cwd) {
            Some((slug, entry)) => (Some(slug.to_string()), Some(entry.root.clone())),
            None => (None, None),
        };

        let mut settings = ScopeState::new(
            home.join("settings.yaml"),
            defaults_for(&Settings::default()),
        );
        let project_file = project_root
            .as_ref()
            .map(|root| root.join(paths::project_config_file()))
            .unwrap_or_else(|| home.join("project.yaml"));
        let mut project = ScopeState::new(project_file, defaults_for(&ProjectConfig::default()));
        let mut registry_scope = ScopeState::new(home.join("projects.yaml"), Mapping::new());

        // Settings file, then project-level settings overlay.
        let settings_file = settings.file.clone();
        merge_file_layer(&mut settings, &settings_file, &SETTINGS_SCHEMA, true)?;
        if let Some(root) = &project_root {
            let overlay = root.join(paths::project_settings_file());
            merge_overlay_layer(&mut settings.merged, &overlay, &SETTINGS_SCHEMA)?;
        }

        // User project overlay is the write target when outside a project,
        // and a read layer beneath the project file otherwise.
        let user_overlay = home.join("project.yaml");
        if project_root.is_some() {
            merge_overlay_layer(&mut project.merged, &user_overlay, &PROJECT_SCHEMA)?;
            let project_file = project.file.clone();
            merge_file_layer(&mut project, &project_file, &PROJECT_SCHEMA, true)?;
        } else {
            merge_file_layer(&mut project, &user_overlay, &PROJECT_SCHEMA, true)?;
        }

        // The registry scope mirrors projects.yaml for reads and export.
        let registry_file = registry_scope.file.clone();
        merge_file_layer(&mut registry_scope, &registry_file, &REGISTRY_SCHEMA, true)?;

        // Slug injected by the registry; never written back by users.
        if let Some(slug) = &project_slug {
            project.merged.insert(
                Value::String("project".to_string()),
                Value::String(slug.clone()),
            );
        }

        let mut store = Self {
            settings,
            project,
            registry_scope,
            registry,
            project_root,
            project_slug,
        };

        if !opts.ignore_env {
            store.apply_env_overrides(std::env::vars());
        }

        debug!(
            project = ?store.project_slug,
            root = ?store.project_root,
            "Configuration loaded"
        );
        Ok(store)
    }

    /// The discovered project root, when the cwd is inside a registered
    /// project.
    pub fn project_root(&self) -> Option<&Path> {
        self.project_root.as_deref()
    }

    /// The discovered project slug.
    pub fn project_slug(&self) -> Option<&str> {
        self.project_slug.as_deref()
    }

    /// The project registry loaded as part of this store.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Mutable access to the registry (its writes use its own lock).
    pub fn registry_mut(&mut self) -> &mut Registry {
        &mut self.registry
    }

    /// Typed view of the merged settings scope.
    pub fn settings(&self) -> Result<Settings> {
        from_mapping(&self.settings.merged, "settings")
    }

    /// Typed view of the merged project scope.
    pub fn project_config(&self) -> Result<ProjectConfig> {
        from_mapping(&self.project.merged, "project")
    }

    /// Read a value by scoped (`project.build.image`) or unscoped
    /// (`build.image`) key.
    pub fn get(&self, key: &str) -> Option<Value> {
        let (scope, rel) = self.resolve_key(key, None).ok()?;
        get_path(&self.state(scope).merged, &split_key(&rel))
    }

    /// Read a string value.
    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            Value::String(s) => Some(s),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// Read a boolean value.
    pub fn get_bool(&self, key: &str) -> Option<bool> {
        match self.get(key)? {
            Value::Bool(b) => Some(b),
            _ => None,
        }
    }

    /// Set a key. The scope is inferred from the ownership table; an
    /// explicitly requested scope that conflicts is an ownership error.
    /// Marks `(scope, root)` dirty; nothing is persisted until
    /// [`write`](Self::write).
    #[instrument(skip(self, value))]
    pub fn set(&mut self, key: &str, value: Value, requested: Option<Scope>) -> Result<()> {
        let (scope, rel) = self.resolve_key(key, requested)?;
        let segments = split_key(&rel);
        if segments.is_empty() {
            return Err(ConfigError::UnknownKey {
                key: key.to_string(),
            }
            .into());
        }
        let root = segments[0].clone();

        let state = self.state_mut(scope);
        set_path(&mut state.merged, &segments, value.clone());

        // The pending subtree is based on the owning file's content, not
        // the merged view, so defaults never leak into persisted files.
        let mut subtree = state
            .pending
            .get(&root)
            .cloned()
            .or_else(|| state.file_doc.get(Value::String(root.clone())).cloned())
            .unwrap_or(Value::Mapping(Mapping::new()));
        if segments.len() == 1 {
            subtree = value;
        } else {
            set_value_path(&mut subtree, &segments[1..], value);
        }
        state.pending.insert(root, subtree);
        Ok(())
    }

    /// Dirty roots for a scope, in insertion order.
    pub fn dirty_keys(&self, scope: Scope) -> Vec<String> {
        self.state(scope).pending.keys().cloned().collect()
    }

    /// Persist dirty state per [`WriteOptions`]:
    ///
    /// - `key` set: persist that single dirty key to its owning file.
    /// - `scope` set: persist all dirty roots within the scope.
    /// - neither, `path` unset: flush every scope in
    ///   [`Scope::WRITE_ORDER`].
    /// - `path` set alone: export the merged config to that path as a
    ///   flat file (scope prefixes stripped, children merged at the
    ///   root).
    #[instrument(skip(self))]
    pub fn write(&mut self, opts: WriteOptions) -> Result<()> {
        if let Some(key) = &opts.key {
            let (scope, rel) = self.resolve_key(key, opts.scope)?;
            let root = split_key(&rel)
                .first()
                .cloned()
                .ok_or_else(|| ConfigError::UnknownKey { key: key.clone() })?;
            return self.persist(scope, &[root]);
        }
        if let Some(scope) = opts.scope {
            let roots = self.dirty_keys(scope);
            return self.persist(scope, &roots);
        }
        if let Some(path) = &opts.path {
            return self.export_merged(path);
        }
        for scope in Scope::WRITE_ORDER {
            let roots = self.dirty_keys(scope);
            if !roots.is_empty() {
                self.persist(scope, &roots)?;
            }
        }
        Ok(())
    }

    /// Serialize the owning file's content with the given dirty roots
    /// applied, write it under lock, then clear those dirty flags.
    fn persist(&mut self, scope: Scope, roots: &[String]) -> Result<()> {
        let state = self.state_mut(scope);
        let mut doc = state.file_doc.clone();
        for root in roots {
            if let Some(subtree) = state.pending.get(root) {
                doc.insert(Value::String(root.clone()), subtree.clone());
            }
        }
        let yaml = serde_yaml::to_string(&Value::Mapping(doc.clone())).map_err(|e| {
            ConfigError::Parse {
                path: state.file.display().to_string(),
                message: e.to_string(),
            }
        })?;
        let file = state.file.clone();
        fsutil::with_lock(&file, || fsutil::atomic_write(&file, yaml.as_bytes()))?;

        // Only now is the mutation durable.
        state.file_doc = doc;
        for root in roots {
            state.pending.shift_remove(root);
        }
        debug!(scope = %scope, file = %file.display(), ?roots, "Persisted configuration");
        Ok(())
    }

    /// Export the merged view of all scopes to a flat file at `path`.
    fn export_merged(&self, path: &Path) -> Result<()> {
        let mut flat = Mapping::new();
        for scope in [Scope::Settings, Scope::Registry, Scope::Project] {
            merge_mapping(&mut flat, &self.state(scope).merged);
        }
        let yaml =
            serde_yaml::to_string(&Value::Mapping(flat)).map_err(|e| ConfigError::Parse {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        fsutil::with_lock(path, || fsutil::atomic_write(path, yaml.as_bytes()))
    }

    /// Apply `CLAWKER_<SCOPE>_<PATH>` overrides on top of the merged
    /// trees. Values parse as YAML scalars with a plain-string fallback
    /// and bypass strict-schema validation.
    fn apply_env_overrides(&mut self, vars: impl Iterator<Item = (String, String)>) {
        let prefix = format!("{}_", paths::ENV_PREFIX);
        for (name, raw) in vars {
            let Some(tail) = name.strip_prefix(&prefix) else {
                continue;
            };
            let mut parts = tail.splitn(2, '_');
            let scope = match parts.next().map(str::to_lowercase).as_deref() {
                Some("settings") => Scope::Settings,
                Some("project") => Scope::Project,
                Some("registry") => Scope::Registry,
                _ => continue,
            };
            let Some(rest) = parts.next() else { continue };
            let segments: Vec<String> = rest.split('_').map(str::to_string).collect();
            let Some(path) = resolve_env_path(scope.schema(), &segments) else {
                warn!(var = %name, "Ignoring environment override with unknown key path");
                continue;
            };
            let value: Value =
                serde_yaml::from_str(&raw).unwrap_or_else(|_| Value::String(raw.clone()));
            debug!(var = %name, path = %path.join("."), "Applying environment override");
            set_path(&mut self.state_mut(scope).merged, &path, value);
        }
    }

    /// Resolve a key to `(scope, scope-relative path)`.
    ///
    /// Accepts `settings.logging.level` (scoped) or `logging.level`
    /// (unscoped, scope inferred from the ownership table). A requested
    /// scope that disagrees with the resolved one is an ownership error.
    fn resolve_key(&self, key: &str, requested: Option<Scope>) -> Result<(Scope, String)> {
        let (scope, rel) = match key.split_once('.') {
            Some((head, rest)) if Scope::parse(head).is_some() => {
                (Scope::parse(head).unwrap_or(Scope::Project), rest.to_string())
            }
            _ => {
                let root = key.split('.').next().unwrap_or(key);
                let scope = owning_scope(root).ok_or_else(|| ConfigError::UnknownKey {
                    key: key.to_string(),
                })?;
                (scope, key.to_string())
            }
        };
        if let Some(requested) = requested {
            if requested != scope {
                return Err(ConfigError::ScopeOwnership {
                    key: key.to_string(),
                    owner: scope.as_str().to_string(),
                    requested: requested.as_str().to_string(),
                }
                .into());
            }
        }
        Ok((scope, rel))
    }

    fn state(&self, scope: Scope) -> &ScopeState {
        match scope {
            Scope::Settings => &self.settings,
            Scope::Project => &self.project,
            Scope::Registry => &self.registry_scope,
        }
    }

    fn state_mut(&mut self, scope: Scope) -> &mut ScopeState {
        match scope {
            Scope::Settings => &mut self.settings,
            Scope::Project => &mut self.project,
            Scope::Registry => &mut self.registry_scope,
        }
    }
}

/// Serialize a default value into its mapping form.
fn defaults_for<T: serde::Serialize>(value: &T) -> Mapping {
    match serde_yaml::to_value(value) {
        Ok(Value::Mapping(m)) => m,
        _ => Mapping::new(),
    }
}

fn from_mapping<T: serde::de::DeserializeOwned>(mapping: &Mapping, origin: &str) -> Result<T> {
    serde_yaml::from_value(Value::Mapping(mapping.clone())).map_err(|e| {
        ConfigError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        }
        .into()
    })
}

/// Merge a strict-validated file into a scope, recording it as the
/// owning file's persisted content when `owning` is true.
fn merge_file_layer(
    state: &mut ScopeState,
    path: &Path,
    schema: &KeySchema,
    owning: bool,
) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let value: Value = config::load_strict(path, schema)?;
    if let Value::Mapping(mapping) = value {
        merge_mapping(&mut state.merged, &mapping);
        if owning {
            state.file_doc = mapping;
        }
    }
    Ok(())
}

/// Merge a strict-validated overlay file into a merged tree only.
fn merge_overlay_layer(merged: &mut Mapping, path: &Path, schema: &KeySchema) -> Result<()> {
    if !path.exists() {
        return Ok(());
    }
    let value: Value = config::load_strict(path, schema)?;
    if let Value::Mapping(mapping) = value {
        merge_mapping(merged, &mapping);
    }
    Ok(())
}

/// Deep-merge `overlay` into `base`: mappings merge recursively, anything
/// else in the overlay wins. Only explicitly-set fields override.
pub fn merge_mapping(base: &mut Mapping, overlay: &Mapping) {
    for (key, overlay_value) in overlay {
        match (base.get_mut(key), overlay_value) {
            (Some(Value::Mapping(base_child)), Value::Mapping(overlay_child)) => {
                merge_mapping(base_child, overlay_child);
            }
            _ => {
                base.insert(key.clone(), overlay_value.clone());
            }
        }
    }
}

fn split_key(key: &str) -> Vec<String> {
    key.split('.')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Walk a dotted path through nested mappings.
fn get_path(mapping: &Mapping, segments: &[String]) -> Option<Value> {
    let (first, rest) = segments.split_first()?;
    let value = mapping.get(Value::String(first.clone()))?;
    if rest.is_empty() {
        return Some(value.clone());
    }
    match value {
        Value::Mapping(child) => get_path(child, rest),
        _ => None,
    }
}

/// Set a value at a dotted path, creating intermediate mappings.
fn set_path(mapping: &mut Mapping, segments: &[String], value: Value) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    let key = Value::String(first.clone());
    if rest.is_empty() {
        mapping.insert(key, value);
        return;
    }
    let entry = mapping
        .entry(key)
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if !matches!(entry, Value::Mapping(_)) {
        *entry = Value::Mapping(Mapping::new());
    }
    if let Value::Mapping(child) = entry {
        set_path(child, rest, value);
    }
}

/// Set a value at a path inside an arbitrary subtree value.
fn set_value_path(subtree: &mut Value, segments: &[String], value: Value) {
    if !matches!(subtree, Value::Mapping(_)) {
        *subtree = Value::Mapping(Mapping::new());
    }
    if let Value::Mapping(mapping) = subtree {
        set_path(mapping, segments, value);
    }
}

/// Map underscore-joined env segments back onto dotted schema paths.
///
/// Keys themselves may contain underscores (`host_proxy`,
/// `default_image`), so segmentation backtracks against the closed
/// schema, preferring the longest key match at each level. Below a
/// free-form map the remaining segments join verbatim (preserving case,
/// since `agent.env` keys are conventionally uppercase).
fn resolve_env_path(schema: &KeySchema, segments: &[String]) -> Option<Vec<String>> {
    if segments.is_empty() {
        return Some(Vec::new());
    }
    match schema {
        KeySchema::Node(children) => {
            for take in (1..=segments.len()).rev() {
                let candidate = segments[..take].join("_").to_lowercase();
                if let Some((name, child)) = children.iter().find(|(key, _)| *key == candidate) {
                    if let Some(mut rest) = resolve_env_path(child, &segments[take..]) {
                        let mut path = vec![name.to_string()];
                        path.append(&mut rest);
                        return Some(path);
                    }
                }
            }
            None
        }
        KeySchema::FreeMap => Some(vec![segments.join("_")]),
        KeySchema::Any => Some(vec![segments.join("_").to_lowercase()]),
        KeySchema::Leaf => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store_in(tmp: &TempDir, cwd: &Path) -> ConfigStore {
        ConfigStore::load(LoadOptions {
            cwd: Some(cwd.to_path_buf()),
            home: Some(tmp.path().join("home")),
            ignore_env: true,
        })
        .unwrap()
    }

    fn seeded_project(tmp: &TempDir) -> PathBuf {
        let home = tmp.path().join("home");
        let root = tmp.path().join("repo");
        std::fs::create_dir_all(&root).unwrap();
        std::fs::create_dir_all(&home).unwrap();
        std::fs::write(
            home.join("projects.yaml"),
            format!(
                "projects:\n  myapp:\n    name: My App\n    root: {}\n",
                root.display()
            ),
        )
        .unwrap();
        root
    }

    #[test]
    fn defaults_apply_without_any_files() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp, tmp.path());
        assert_eq!(
            store.get_string("workspace.remote_path").as_deref(),
            Some("/workspace")
        );
        assert!(store.project_root().is_none());
    }

    #[test]
    fn project_file_overrides_defaults_and_slug_is_injected() {
        let tmp = TempDir::new().unwrap();
        let root = seeded_project(&tmp);
        std::fs::write(
            root.join("clawker.yaml"),
            "workspace:\n  remote_path: /src\n",
        )
        .unwrap();

        let store = store_in(&tmp, &root.join("nested"));
        assert_eq!(store.project_slug(), Some("myapp"));
        assert_eq!(store.get_string("workspace.remote_path").as_deref(), Some("/src"));
        assert_eq!(
            store.project_config().unwrap().project.as_deref(),
            Some("myapp")
        );
    }

    #[test]
    fn scoped_and_unscoped_reads_agree() {
        let tmp = TempDir::new().unwrap();
        let root = seeded_project(&tmp);
        std::fs::write(root.join("clawker.yaml"), "default_image: alpine:3.20\n").unwrap();
        let store = store_in(&tmp, &root);
        assert_eq!(
            store.get_string("default_image"),
            store.get_string("project.default_image")
        );
    }

    #[test]
    fn settings_and_project_default_image_stay_separate() {
        let tmp = TempDir::new().unwrap();
        let root = seeded_project(&tmp);
        let home = tmp.path().join("home");
        std::fs::write(home.join("settings.yaml"), "default_image: user:img\n").unwrap();
        std::fs::write(root.join("clawker.yaml"), "default_image: project:img\n").unwrap();

        let store = store_in(&tmp, &root);
        assert_eq!(
            store.get_string("settings.default_image").as_deref(),
            Some("user:img")
        );
        assert_eq!(store.get_string("default_image").as_deref(), Some("project:img"));
    }

    #[test]
    fn ownership_conflict_is_an_error() {
        let tmp = TempDir::new().unwrap();
        let mut store = store_in(&tmp, tmp.path());
        let err = store
            .set(
                "build.image",
                Value::String("x".into()),
                Some(Scope::Settings),
            )
            .unwrap_err();
        assert!(err.to_string().contains("owned by scope 'project'"));
    }

    #[test]
    fn set_marks_dirty_and_write_clears_it() {
        let tmp = TempDir::new().unwrap();
        let mut store = store_in(&tmp, tmp.path());
        store
            .set("logging.level", Value::String("debug".into()), None)
            .unwrap();
        assert_eq!(store.dirty_keys(Scope::Settings), vec!["logging".to_string()]);

        store
            .write(WriteOptions {
                key: Some("logging.level".to_string()),
                ..Default::default()
            })
            .unwrap();
        assert!(store.dirty_keys(Scope::Settings).is_empty());

        let written =
            std::fs::read_to_string(tmp.path().join("home/settings.yaml")).unwrap();
        assert!(written.contains("level: debug"), "{written}");
        // Defaults must not leak into the persisted file.
        assert!(!written.contains("monitoring"), "{written}");
    }

    #[test]
    fn write_key_persists_only_that_root() {
        let tmp = TempDir::new().unwrap();
        let mut store = store_in(&tmp, tmp.path());
        store
            .set("logging.level", Value::String("debug".into()), None)
            .unwrap();
        store
            .set("monitoring.enabled", Value::Bool(true), None)
            .unwrap();

        store
            .write(WriteOptions {
                key: Some("logging.level".to_string()),
                ..Default::default()
            })
            .unwrap();

        let written =
            std::fs::read_to_string(tmp.path().join("home/settings.yaml")).unwrap();
        assert!(written.contains("logging"));
        assert!(!written.contains("monitoring"), "{written}");
        // The other root stays dirty for a later flush.
        assert_eq!(
            store.dirty_keys(Scope::Settings),
            vec!["monitoring".to_string()]
        );
    }

    #[test]
    fn project_writes_outside_project_target_user_overlay() {
        let tmp = TempDir::new().unwrap();
        let mut store = store_in(&tmp, tmp.path());
        store
            .set("build.image", Value::String("ubuntu:24.04".into()), None)
            .unwrap();
        store
            .write(WriteOptions {
                scope: Some(Scope::Project),
                ..Default::default()
            })
            .unwrap();

        let overlay =
            std::fs::read_to_string(tmp.path().join("home/project.yaml")).unwrap();
        assert!(overlay.contains("ubuntu:24.04"));
    }

    #[test]
    fn project_writes_inside_project_target_clawker_yaml() {
        let tmp = TempDir::new().unwrap();
        let root = seeded_project(&tmp);
        std::fs::write(root.join("clawker.yaml"), "default_image: old:img\n").unwrap();

        let mut store = store_in(&tmp, &root);
        store
            .set("default_image", Value::String("new:img".into()), None)
            .unwrap();
        store.write(WriteOptions::default()).unwrap();

        let written = std::fs::read_to_string(root.join("clawker.yaml")).unwrap();
        assert!(written.contains("new:img"));
    }

    #[test]
    fn write_preserves_untouched_file_content() {
        let tmp = TempDir::new().unwrap();
        let root = seeded_project(&tmp);
        std::fs::write(
            root.join("clawker.yaml"),
            "default_image: keep:me\nworkspace:\n  remote_path: /src\n",
        )
        .unwrap();

        let mut store = store_in(&tmp, &root);
        store
            .set("build.image", Value::String("ubuntu:24.04".into()), None)
            .unwrap();
        store.write(WriteOptions::default()).unwrap();

        let written = std::fs::read_to_string(root.join("clawker.yaml")).unwrap();
        assert!(written.contains("keep:me"), "{written}");
        assert!(written.contains("/src"), "{written}");
        assert!(written.contains("ubuntu:24.04"), "{written}");
    }

    #[test]
    fn export_merges_scopes_at_root() {
        let tmp = TempDir::new().unwrap();
        let store = store_in(&tmp, tmp.path());
        let out = tmp.path().join("export.yaml");
        let mut store = store;
        store
            .write(WriteOptions {
                path: Some(out.clone()),
                ..Default::default()
            })
            .unwrap();
        let exported = std::fs::read_to_string(&out).unwrap();
        // Children of both scopes, unprefixed, merged at the root.
        assert!(exported.contains("logging"), "{exported}");
        assert!(exported.contains("workspace"), "{exported}");
        assert!(!exported.contains("settings:"), "{exported}");
    }

    #[test]
    fn round_trip_load_save_load() {
        let tmp = TempDir::new().unwrap();
        let mut store = store_in(&tmp, tmp.path());
        store
            .set("logging.level", Value::String("trace".into()), None)
            .unwrap();
        store
            .set(
                "settings.default_image",
                Value::String("img:1".into()),
                None,
            )
            .unwrap();
        store.write(WriteOptions::default()).unwrap();

        let reloaded = store_in(&tmp, tmp.path());
        assert_eq!(reloaded.get_string("logging.level").as_deref(), Some("trace"));
        assert_eq!(
            reloaded.get_string("settings.default_image").as_deref(),
            Some("img:1")
        );
    }

    #[test]
    fn env_overrides_apply_without_validation() {
        let tmp = TempDir::new().unwrap();
        let mut store = store_in(&tmp, tmp.path());
        store.apply_env_overrides(
            [
                (
                    "CLAWKER_PROJECT_BUILD_IMAGE".to_string(),
                    "env:img".to_string(),
                ),
                (
                    "CLAWKER_SETTINGS_HOST_PROXY_MANAGER_PORT".to_string(),
                    "19099".to_string(),
                ),
                ("CLAWKER_HOME".to_string(), "/ignored".to_string()),
            ]
            .into_iter(),
        );
        assert_eq!(store.get_string("build.image").as_deref(), Some("env:img"));
        assert_eq!(
            store.settings().unwrap().host_proxy.manager.port,
            Some(19099)
        );
    }

    #[test]
    fn env_override_reaches_free_map_keys_case_preserved() {
        let tmp = TempDir::new().unwrap();
        let mut store = store_in(&tmp, tmp.path());
        store.apply_env_overrides(
            [(
                "CLAWKER_PROJECT_AGENT_ENV_MY_TOKEN".to_string(),
                "secret".to_string(),
            )]
            .into_iter(),
        );
        let config = store.project_config().unwrap();
        assert_eq!(config.agent.env.get("MY_TOKEN").map(String::as_str), Some("secret"));
    }

    #[test]
    fn strict_validation_failure_is_fatal_on_load() {
        let tmp = TempDir::new().unwrap();
        let root = seeded_project(&tmp);
        std::fs::write(root.join("clawker.yaml"), "nonsense_key: 1\n").unwrap();
        let err = ConfigStore::load(LoadOptions {
            cwd: Some(root),
            home: Some(tmp.path().join("home")),
            ignore_env: true,
        })
        .unwrap_err();
        assert!(err.to_string().contains("nonsense_key"));
    }
}
