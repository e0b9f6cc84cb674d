use std::collections::HashSet;
use std::env;
use std::ffi::OsStr;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Sequence, Value};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::config::get_home_dir;
use crate::error::{KubeError, Result};

const CONTEXTS: &str = "contexts";
const CURRENT_CONTEXT: &str = "current-context";

/// The kubeconfig files to load, in precedence order.
#[derive(Debug, Clone)]
pub struct KubeconfigPaths {
    paths: Vec<PathBuf>,
}

impl KubeconfigPaths {
    const KUBECONFIG_ENV: &'static str = "KUBECONFIG";

    #[cfg(windows)]
    const SEPARATOR: char = ';';
    #[cfg(not(windows))]
    const SEPARATOR: char = ':';

    pub fn resolve() -> anyhow::Result<KubeconfigPaths> {
        if let Some(value) = env::var_os(Self::KUBECONFIG_ENV) {
            let paths = Self::from_env_value(&value);
            if !paths.paths.is_empty() {
                return Ok(paths);
            }
        }
        let home_dir = get_home_dir()?;
        Ok(Self::single(home_dir.join(".kube").join("config")))
    }

    pub fn from_env_value(value: &OsStr) -> KubeconfigPaths {
        let value = value.to_string_lossy();
        let mut seen = HashSet::new();
        let paths = value
            .split(Self::SEPARATOR)
            .filter(|s| !s.is_empty())
            .filter(|s| seen.insert(*s))
            .map(PathBuf::from)
            .collect();
        KubeconfigPaths { paths }
    }

    pub fn single<P: Into<PathBuf>>(path: P) -> KubeconfigPaths {
        KubeconfigPaths {
            paths: vec![path.into()],
        }
    }
}

struct Source {
    path: PathBuf,
    doc: Mapping,
    dirty: bool,
}

impl Source {
    fn contexts(&self) -> Option<&Sequence> {
        self.doc.get(CONTEXTS)?.as_sequence()
    }

    fn contexts_mut(&mut self) -> Option<&mut Sequence> {
        self.doc.get_mut(CONTEXTS)?.as_sequence_mut()
    }

    fn context_index(&self, name: &str) -> Option<usize> {
        self.contexts()?
            .iter()
            .position(|ctx| entry_name(ctx) == Some(name))
    }

    fn current_context(&self) -> Option<&str> {
        self.doc
            .get(CURRENT_CONTEXT)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
    }
}

/// In-memory view over one or more kubeconfig documents.
///
/// Each source file is kept as a generic YAML tree so fields this tool does
/// not know about survive a save. Only sources touched by a mutation are
/// written back.
pub struct ConfigStore {
    sources: Vec<Source>,
}

impl ConfigStore {
    pub fn parse(paths: &KubeconfigPaths) -> Result<ConfigStore> {
        let multi = paths.paths.len() > 1;
        let mut sources = Vec::with_capacity(paths.paths.len());
        for path in paths.paths.iter() {
            let data = match fs::read(path) {
                Ok(data) => data,
                Err(err) if multi && err.kind() == io::ErrorKind::NotFound => {
                    debug!("skip missing kubeconfig '{}'", path.display());
                    continue;
                }
                Err(err) => return Err(KubeError::load(path, err)),
            };
            let doc = parse_document(&data).map_err(|reason| KubeError::load(path, reason))?;
            debug!("loaded kubeconfig '{}'", path.display());
            sources.push(Source {
                path: path.clone(),
                doc,
                dirty: false,
            });
        }

        if sources.is_empty() {
            let path = paths.paths.first().cloned().unwrap_or_default();
            return Err(KubeError::load(path, "no kubeconfig file found"));
        }

        Ok(ConfigStore { sources })
    }

    pub fn current_context(&self) -> &str {
        self.sources
            .iter()
            .find_map(Source::current_context)
            .unwrap_or("")
    }

    pub fn context_exists(&self, name: &str) -> bool {
        self.locate(name).is_some()
    }

    /// Context names in merged order, first file wins for duplicates.
    pub fn contexts(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut names = Vec::new();
        for source in self.sources.iter() {
            for ctx in source.contexts().into_iter().flatten() {
                if let Some(name) = entry_name(ctx) {
                    if seen.insert(name) {
                        names.push(name.to_string());
                    }
                }
            }
        }
        names
    }

    pub fn namespace_of_context(&self, name: &str) -> Result<String> {
        let (src, idx) = self
            .locate(name)
            .ok_or_else(|| KubeError::context_not_found(name))?;
        let namespace = self.sources[src]
            .contexts()
            .and_then(|ctxs| ctxs.get(idx))
            .and_then(|ctx| ctx.get("context"))
            .and_then(|ctx| ctx.get("namespace"))
            .and_then(Value::as_str)
            .unwrap_or("");
        Ok(namespace.to_string())
    }

    /// Renames the winning entry for `old`. Shadowed entries named `old` in
    /// later files are dropped so the old name does not resurface.
    pub fn modify_context_name(&mut self, old: &str, new: &str) -> Result<()> {
        let (src, idx) = self
            .locate(old)
            .ok_or_else(|| KubeError::context_not_found(old))?;
        if old == new {
            return Ok(());
        }

        for (i, source) in self.sources.iter_mut().enumerate().skip(src) {
            let Some(ctxs) = source.contexts_mut() else {
                continue;
            };
            let before = ctxs.len();
            let mut pos = 0;
            ctxs.retain(|ctx| {
                let keep = entry_name(ctx) != Some(old) || (i == src && pos == idx);
                pos += 1;
                keep
            });
            if ctxs.len() != before {
                source.dirty = true;
            }
        }

        let entry = self
            .context_entry_mut(old)
            .ok_or_else(|| KubeError::context_not_found(old))?;
        entry.insert(Value::from("name"), Value::from(new));
        Ok(())
    }

    /// Removes the named context from every source holding it. Absent names
    /// are ignored.
    pub fn delete_context_entry(&mut self, name: &str) -> Result<()> {
        for source in self.sources.iter_mut() {
            if source.context_index(name).is_none() {
                continue;
            }
            if let Some(ctxs) = source.contexts_mut() {
                ctxs.retain(|ctx| entry_name(ctx) != Some(name));
                source.dirty = true;
            }
        }
        Ok(())
    }

    pub fn modify_current_context(&mut self, name: &str) -> Result<()> {
        let idx = self
            .sources
            .iter()
            .position(|s| s.current_context().is_some())
            .unwrap_or(0);
        let source = &mut self.sources[idx];
        source
            .doc
            .insert(Value::from(CURRENT_CONTEXT), Value::from(name));
        source.dirty = true;
        Ok(())
    }

    pub fn unset_current_context(&mut self) -> Result<()> {
        for source in self.sources.iter_mut() {
            if source.current_context().is_none() {
                continue;
            }
            source
                .doc
                .insert(Value::from(CURRENT_CONTEXT), Value::from(""));
            source.dirty = true;
        }
        Ok(())
    }

    /// Sets the namespace of a context, an empty `namespace` clears it.
    pub fn set_namespace(&mut self, context: &str, namespace: &str) -> Result<()> {
        let entry = self
            .context_entry_mut(context)
            .ok_or_else(|| KubeError::context_not_found(context))?;

        let key = Value::from("context");
        if !matches!(entry.get(&key), Some(Value::Mapping(_))) {
            entry.insert(key.clone(), Value::Mapping(Mapping::new()));
        }
        if let Some(Value::Mapping(ctx)) = entry.get_mut(&key) {
            if namespace.is_empty() {
                ctx.shift_remove("namespace");
            } else {
                ctx.insert(Value::from("namespace"), Value::from(namespace));
            }
        }
        Ok(())
    }

    pub fn save(&mut self) -> Result<()> {
        for source in self.sources.iter_mut().filter(|s| s.dirty) {
            let data = serde_yaml::to_string(&source.doc)
                .map_err(|err| KubeError::save(&source.path, err))?;
            write_atomic(&source.path, data.as_bytes())
                .map_err(|err| KubeError::save(&source.path, err))?;
            debug!("saved kubeconfig '{}'", source.path.display());
            source.dirty = false;
        }
        Ok(())
    }

    /// The merged document, suitable for building an API client.
    pub fn bytes(&self) -> Result<Vec<u8>> {
        let mut merged = self.sources[0].doc.clone();
        for key in ["clusters", CONTEXTS, "users"] {
            let mut seen = HashSet::new();
            let mut items = Sequence::new();
            for source in self.sources.iter() {
                let Some(list) = source.doc.get(key).and_then(Value::as_sequence) else {
                    continue;
                };
                for item in list {
                    match entry_name(item) {
                        Some(name) if !seen.insert(name) => {}
                        _ => items.push(item.clone()),
                    }
                }
            }
            if !items.is_empty() || merged.contains_key(key) {
                merged.insert(Value::from(key), Value::Sequence(items));
            }
        }
        let current = self.current_context();
        if !current.is_empty() {
            merged.insert(Value::from(CURRENT_CONTEXT), Value::from(current));
        }

        serde_yaml::to_string(&merged)
            .map(String::into_bytes)
            .map_err(|err| KubeError::load(&self.sources[0].path, err))
    }

    fn locate(&self, name: &str) -> Option<(usize, usize)> {
        self.sources
            .iter()
            .enumerate()
            .find_map(|(src, source)| source.context_index(name).map(|idx| (src, idx)))
    }

    fn context_entry_mut(&mut self, name: &str) -> Option<&mut Mapping> {
        let (src, idx) = self.locate(name)?;
        let source = &mut self.sources[src];
        source.dirty = true;
        source.contexts_mut()?.get_mut(idx)?.as_mapping_mut()
    }
}

fn entry_name(entry: &Value) -> Option<&str> {
    entry.get("name").and_then(Value::as_str)
}

fn parse_document(data: &[u8]) -> std::result::Result<Mapping, String> {
    let value: Value = serde_yaml::from_slice(data).map_err(|err| err.to_string())?;
    match value {
        Value::Mapping(doc) => Ok(doc),
        Value::Null => Ok(Mapping::new()),
        _ => Err(String::from("kubeconfig root is not a mapping")),
    }
}

/// Replaces `path` with `data` through a temp file in the same directory, so
/// readers only ever see the old or the new content.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    // Write through symlinks instead of replacing them.
    let path = match fs::canonicalize(path) {
        Ok(real) => real,
        Err(err) if err.kind() == io::ErrorKind::NotFound => path.to_path_buf(),
        Err(err) => return Err(err),
    };
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut temp = NamedTempFile::new_in(dir)?;
    temp.write_all(data)?;
    temp.as_file().sync_all()?;
    if let Ok(meta) = fs::metadata(&path) {
        fs::set_permissions(temp.path(), meta.permissions())?;
    }
    temp.persist(&path).map_err(|err| err.error)?;
    Ok(())
}
