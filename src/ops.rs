use std::io::Write;

use anyhow::{bail, Context, Result};
use tracing::debug;

use crate::config::Config;
use crate::error::KubeError;
use crate::history::HistoryFile;
use crate::kube::{namespace_source, NamespaceSource};
use crate::kubeconfig::{ConfigStore, KubeconfigPaths};
use crate::printer;

const DEFAULT_NAMESPACE: &str = "default";
const PREVIOUS_CONTEXT_KEY: &str = "previous-context";

/// A context given on the command line, `.` means the current one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextRef {
    Named(String),
    Current,
}

impl ContextRef {
    pub fn parse<S: AsRef<str>>(s: S) -> ContextRef {
        match s.as_ref() {
            "." => ContextRef::Current,
            name => ContextRef::Named(name.to_string()),
        }
    }

    fn resolve(self, store: &ConfigStore) -> Result<String> {
        match self {
            ContextRef::Named(name) => Ok(name),
            ContextRef::Current => {
                let cur = store.current_context();
                if cur.is_empty() {
                    bail!("current-context is not set");
                }
                Ok(cur.to_string())
            }
        }
    }
}

/// A switch target, `-` means the previously active one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Named(String),
    Previous,
}

impl Target {
    pub fn parse<S: AsRef<str>>(s: S) -> Target {
        match s.as_ref() {
            "-" => Target::Previous,
            name => Target::Named(name.to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListItem {
    pub name: String,
    pub active: bool,
}

/// Renames context `old` to `new`, overwriting an existing `new` and moving
/// the current-context pointer along when `old` was current.
pub fn rename<W: Write + ?Sized>(
    store: &mut ConfigStore,
    new: &str,
    old: ContextRef,
    stderr: &mut W,
) -> Result<()> {
    let cur = store.current_context().to_string();
    let old = old.resolve(store)?;

    if !store.context_exists(&old) {
        return Err(KubeError::context_not_found(&old)).context("cannot rename it");
    }

    if old != new && store.context_exists(new) {
        printer::warning(stderr, format!("context \"{new}\" exists, overwriting it."))?;
        store
            .delete_context_entry(new)
            .context("failed to delete new context to overwrite it")?;
    }

    store
        .modify_context_name(&old, new)
        .context("failed to change context name")?;
    if old == cur {
        store
            .modify_current_context(new)
            .context("failed to set current-context to new name")?;
    }
    store.save().context("failed to save modified kubeconfig")?;

    printer::success(
        stderr,
        format!(
            "Context {} renamed to {}.",
            printer::highlight(&old),
            printer::highlight(new)
        ),
    )?;
    Ok(())
}

/// Switches the namespace of the current context and returns the new one.
///
/// The namespace that was active before is recorded for `-` only when the
/// namespace actually changes, so switching to the active namespace keeps the
/// toggle target intact.
pub fn switch_namespace(
    store: &mut ConfigStore,
    history: &HistoryFile,
    source: &dyn NamespaceSource,
    target: Target,
) -> Result<String> {
    let ctx = current_context(store)?;
    let cur_ns = effective_namespace(store, &ctx).context("failed to get current namespace")?;

    let prev = history
        .load(&ctx)
        .context("failed to load previous namespace from file")?;
    let ns = match target {
        Target::Named(ns) => ns,
        Target::Previous => {
            if prev.is_empty() {
                return Err(KubeError::NoHistory(format!(
                    "no previous namespace found for current context ({ctx})"
                ))
                .into());
            }
            prev
        }
    };

    let exists = source
        .namespace_exists(store, &ns)
        .context("failed to query if namespace exists (is cluster accessible?)")?;
    if !exists {
        return Err(KubeError::namespace_not_found(&ns))
            .with_context(|| format!("no namespace exists with name \"{ns}\""));
    }

    store
        .set_namespace(&ctx, &ns)
        .with_context(|| format!("failed to change to namespace \"{ns}\""))?;
    store.save().context("failed to save kubeconfig file")?;

    if cur_ns != ns {
        history
            .save(&ctx, &cur_ns)
            .context("failed to save the previous namespace to file")?;
    }
    debug!("namespace of '{ctx}' changed from '{cur_ns}' to '{ns}'");
    Ok(ns)
}

pub fn list_namespaces(store: &ConfigStore, source: &dyn NamespaceSource) -> Result<Vec<ListItem>> {
    let ctx = current_context(store)?;
    let cur_ns = effective_namespace(store, &ctx).context("cannot read current namespace")?;

    let names = source
        .list_namespaces(store)
        .context("could not list namespaces (is the cluster accessible?)")?;
    Ok(names
        .into_iter()
        .map(|name| ListItem {
            active: name == cur_ns,
            name,
        })
        .collect())
}

pub fn list_contexts(store: &ConfigStore) -> Vec<ListItem> {
    let cur = store.current_context();
    store
        .contexts()
        .into_iter()
        .map(|name| ListItem {
            active: name == cur,
            name,
        })
        .collect()
}

/// Points current-context at the target and records the context it replaced.
pub fn switch_context(
    store: &mut ConfigStore,
    history: &HistoryFile,
    target: Target,
) -> Result<String> {
    let cur = store.current_context().to_string();
    let name = match target {
        Target::Named(name) => name,
        Target::Previous => {
            let prev = history
                .load(PREVIOUS_CONTEXT_KEY)
                .context("failed to load previous context from file")?;
            if prev.is_empty() {
                return Err(KubeError::NoHistory(String::from("no previous context found")).into());
            }
            prev
        }
    };

    if !store.context_exists(&name) {
        return Err(KubeError::context_not_found(&name)).context("cannot switch to it");
    }
    store
        .modify_current_context(&name)
        .context("failed to set current-context")?;
    store.save().context("failed to save kubeconfig file")?;

    if !cur.is_empty() && cur != name {
        history
            .save(PREVIOUS_CONTEXT_KEY, &cur)
            .context("failed to save the previous context to file")?;
    }
    Ok(name)
}

pub fn delete_context<W: Write + ?Sized>(
    store: &mut ConfigStore,
    target: ContextRef,
    stderr: &mut W,
) -> Result<String> {
    let cur = store.current_context().to_string();
    let name = target.resolve(store)?;
    if !store.context_exists(&name) {
        return Err(KubeError::context_not_found(&name)).context("cannot delete it");
    }

    store
        .delete_context_entry(&name)
        .context("failed to delete context")?;
    store.save().context("failed to save modified kubeconfig")?;

    if name == cur {
        printer::warning(
            stderr,
            "You deleted the current context. Use \"kctx\" to select a different one.",
        )?;
    }
    printer::success(
        stderr,
        format!("Deleted context {}.", printer::highlight(&name)),
    )?;
    Ok(name)
}

pub fn unset_context(store: &mut ConfigStore) -> Result<()> {
    store
        .unset_current_context()
        .context("failed to unset current-context")?;
    store.save().context("failed to save kubeconfig file")
}

pub fn current_context(store: &ConfigStore) -> Result<String> {
    let ctx = store.current_context();
    if ctx.is_empty() {
        bail!("current-context is not set");
    }
    Ok(ctx.to_string())
}

pub fn current_namespace(store: &ConfigStore) -> Result<String> {
    let ctx = current_context(store)?;
    effective_namespace(store, &ctx).context("cannot read current namespace")
}

/// Namespace of the context as the API server sees it, unset means default.
fn effective_namespace(store: &ConfigStore, ctx: &str) -> Result<String> {
    let ns = store.namespace_of_context(ctx)?;
    if ns.is_empty() {
        return Ok(String::from(DEFAULT_NAMESPACE));
    }
    Ok(ns)
}

/// One user command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    ListContexts,
    SwitchContext(Target),
    Rename { new: String, old: ContextRef },
    DeleteContext(ContextRef),
    CurrentContext,
    UnsetContext,

    ListNamespaces,
    SwitchNamespace(Target),
    CurrentNamespace,
}

impl Op {
    pub fn run<O, E>(self, cfg: &Config, stdout: &mut O, stderr: &mut E) -> Result<()>
    where
        O: Write + ?Sized,
        E: Write + ?Sized,
    {
        let paths = KubeconfigPaths::resolve()?;
        let mut store = ConfigStore::parse(&paths).context("kubeconfig error")?;
        self.run_with(cfg, &mut store, stdout, stderr)
    }

    fn run_with<O, E>(
        self,
        cfg: &Config,
        store: &mut ConfigStore,
        stdout: &mut O,
        stderr: &mut E,
    ) -> Result<()>
    where
        O: Write + ?Sized,
        E: Write + ?Sized,
    {
        debug!("run {self:?}");
        match self {
            Op::ListContexts => {
                for item in list_contexts(store) {
                    writeln!(stdout, "{}", printer::item(&item.name, item.active))?;
                }
            }
            Op::SwitchContext(target) => {
                let history = HistoryFile::contexts(cfg.history_dir()?);
                let name = switch_context(store, &history, target)?;
                printer::success(
                    stderr,
                    format!("Switched to context \"{}\".", printer::highlight(&name)),
                )?;
            }
            Op::Rename { new, old } => rename(store, &new, old, stderr)?,
            Op::DeleteContext(target) => {
                delete_context(store, target, stderr)?;
            }
            Op::CurrentContext => writeln!(stdout, "{}", current_context(store)?)?,
            Op::UnsetContext => {
                unset_context(store)?;
                printer::success(stderr, "Active context is unset.")?;
            }
            Op::ListNamespaces => {
                let source = namespace_source(cfg, store);
                for item in list_namespaces(store, source.as_ref())? {
                    writeln!(stdout, "{}", printer::item(&item.name, item.active))?;
                }
            }
            Op::SwitchNamespace(target) => {
                let history = HistoryFile::namespaces(cfg.history_dir()?);
                let source = namespace_source(cfg, store);
                let ns = switch_namespace(store, &history, source.as_ref(), target)?;
                printer::success(
                    stderr,
                    format!("Active namespace is \"{}\".", printer::highlight(&ns)),
                )?;
            }
            Op::CurrentNamespace => writeln!(stdout, "{}", current_namespace(store)?)?,
        }
        Ok(())
    }
}
