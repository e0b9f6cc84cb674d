mod config;
mod error;
mod history;
mod kube;
mod kubeconfig;
mod ops;
mod printer;

use std::io::{self, Write};
use std::process::{self, Command, Stdio};

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::kube::namespace_source;
use crate::kubeconfig::{ConfigStore, KubeconfigPaths};
use crate::ops::{ContextRef, Op, Target};

/// Switch between kubernetes contexts and namespaces.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// The context name, `NEW=OLD` to rename OLD (`.` for the current context)
    /// to NEW, or `-` for the previous context. With `-n`, the namespace name
    /// or `-` for the previous namespace.
    name: Option<String>,

    /// Work on namespaces of the current context instead of contexts.
    #[clap(long, short)]
    namespace: bool,

    /// Delete the context NAME (`.` for the current context).
    #[clap(long, short)]
    delete: bool,

    /// Show the current context, or the current namespace with `-n`.
    #[clap(long, short)]
    current: bool,

    /// Unset the current context.
    #[clap(long, short)]
    unset: bool,

    /// Select the target with fzf.
    #[clap(long, short)]
    interactive: bool,

    /// Increase log verbosity, repeat for more.
    #[clap(long, short, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Disable colored output.
    #[clap(long)]
    no_color: bool,
}

impl Args {
    fn run(&self, cfg: &Config) -> Result<()> {
        if let Some(path) = cfg.path.as_ref() {
            debug!("loaded config '{}'", path.display());
        }
        let op = self.build_op(cfg)?;
        let mut stdout = io::stdout().lock();
        let mut stderr = io::stderr().lock();
        op.run(cfg, &mut stdout, &mut stderr)
    }

    fn build_op(&self, cfg: &Config) -> Result<Op> {
        if self.namespace {
            return self.build_namespace_op(cfg);
        }

        if self.current {
            return Ok(Op::CurrentContext);
        }
        if self.unset {
            return Ok(Op::UnsetContext);
        }
        if self.delete {
            let name = match self.name.as_ref() {
                Some(name) => name.clone(),
                None if self.interactive => self.select_context()?,
                None => bail!("`--delete` requires a context name"),
            };
            return Ok(Op::DeleteContext(ContextRef::parse(name)));
        }
        if self.interactive {
            return Ok(Op::SwitchContext(Target::Named(self.select_context()?)));
        }

        Ok(match self.name.as_ref() {
            None => Op::ListContexts,
            Some(name) => match parse_rename_syntax(name) {
                Some((new, old)) => Op::Rename {
                    new: new.to_string(),
                    old: ContextRef::parse(old),
                },
                None => Op::SwitchContext(Target::parse(name)),
            },
        })
    }

    fn build_namespace_op(&self, cfg: &Config) -> Result<Op> {
        if self.delete || self.unset {
            bail!("`--delete` and `--unset` cannot be used with `--namespace`");
        }
        if self.current {
            return Ok(Op::CurrentNamespace);
        }
        if self.interactive {
            let ns = self.select_namespace(cfg)?;
            return Ok(Op::SwitchNamespace(Target::Named(ns)));
        }

        Ok(match self.name.as_ref() {
            Some(name) => Op::SwitchNamespace(Target::parse(name)),
            None => Op::ListNamespaces,
        })
    }

    fn select_context(&self) -> Result<String> {
        let store = load_store()?;
        let items: Vec<_> = ops::list_contexts(&store)
            .into_iter()
            .filter(|item| !item.active)
            .map(|item| item.name)
            .collect();
        if items.is_empty() {
            bail!("no context to select");
        }
        let idx = search_fzf(&items)?;
        Ok(items[idx].clone())
    }

    fn select_namespace(&self, cfg: &Config) -> Result<String> {
        let store = load_store()?;
        let source = namespace_source(cfg, &store);
        let items: Vec<_> = ops::list_namespaces(&store, source.as_ref())?
            .into_iter()
            .filter(|item| !item.active)
            .map(|item| item.name)
            .collect();
        if items.is_empty() {
            bail!("no namespace to select");
        }
        let idx = search_fzf(&items)?;
        Ok(items[idx].clone())
    }
}

/// Splits `NEW=OLD`, both sides must be non-empty.
fn parse_rename_syntax(s: &str) -> Option<(&str, &str)> {
    let (new, old) = s.split_once('=')?;
    if new.is_empty() || old.is_empty() || old.contains('=') {
        return None;
    }
    Some((new, old))
}

fn load_store() -> Result<ConfigStore> {
    let paths = KubeconfigPaths::resolve()?;
    ConfigStore::parse(&paths).context("kubeconfig error")
}

fn setup_tracing(verbose: u8) {
    let filter = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();
}

fn main() {
    let args = Args::parse();
    setup_tracing(args.verbose);
    printer::init(args.no_color);

    let result = Config::load()
        .context("load config")
        .and_then(|cfg| args.run(&cfg));
    if let Err(err) = result {
        let _ = printer::error(&mut io::stderr(), format!("{err:#}"));
        process::exit(1);
    }
}

/// Runs fzf over `keys` and returns the index of the picked entry.
fn search_fzf<S: AsRef<str>>(keys: &[S]) -> Result<usize> {
    let spawned = Command::new("fzf")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn();
    let mut child = match spawned {
        Ok(child) => child,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            bail!("fzf is required for interactive selection, install it first")
        }
        Err(err) => return Err(err).context("launch fzf"),
    };

    if let Some(mut stdin) = child.stdin.take() {
        let input: String = keys.iter().map(|key| format!("{}\n", key.as_ref())).collect();
        stdin.write_all(input.as_bytes()).context("send entries to fzf")?;
    }
    let output = child.wait_with_output().context("wait for fzf")?;

    match output.status.code() {
        Some(0) => {}
        Some(1) => bail!("nothing selected, fzf found no match"),
        Some(130) => bail!("selection canceled"),
        Some(code) => bail!("fzf exited with code {code}"),
        None => bail!("fzf was killed by a signal"),
    }

    let picked = String::from_utf8_lossy(&output.stdout);
    let picked = picked.trim();
    keys.iter()
        .position(|key| key.as_ref() == picked)
        .with_context(|| format!("fzf returned unknown entry '{picked}'"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn op(argv: &[&str]) -> Result<Op> {
        let mut full = vec!["kctx"];
        full.extend_from_slice(argv);
        let args = Args::try_parse_from(full).unwrap();
        args.build_op(&Config::default())
    }

    #[test]
    fn test_parse_rename_syntax() {
        assert_eq!(parse_rename_syntax("new=old"), Some(("new", "old")));
        assert_eq!(parse_rename_syntax("new=."), Some(("new", ".")));
        assert_eq!(parse_rename_syntax("new="), None);
        assert_eq!(parse_rename_syntax("=old"), None);
        assert_eq!(parse_rename_syntax("a=b=c"), None);
        assert_eq!(parse_rename_syntax("plain"), None);
    }

    #[test]
    fn test_context_ops() {
        assert_eq!(op(&[]).unwrap(), Op::ListContexts);
        assert_eq!(
            op(&["dev"]).unwrap(),
            Op::SwitchContext(Target::Named("dev".into()))
        );
        assert_eq!(op(&["-"]).unwrap(), Op::SwitchContext(Target::Previous));
        assert_eq!(
            op(&["prod=."]).unwrap(),
            Op::Rename {
                new: "prod".into(),
                old: ContextRef::Current
            }
        );
        assert_eq!(
            op(&["-d", "."]).unwrap(),
            Op::DeleteContext(ContextRef::Current)
        );
        assert!(op(&["-d"]).is_err());
        assert_eq!(op(&["-c"]).unwrap(), Op::CurrentContext);
        assert_eq!(op(&["-u"]).unwrap(), Op::UnsetContext);
    }

    #[test]
    fn test_namespace_ops() {
        assert_eq!(op(&["-n"]).unwrap(), Op::ListNamespaces);
        assert_eq!(
            op(&["-n", "kube-system"]).unwrap(),
            Op::SwitchNamespace(Target::Named("kube-system".into()))
        );
        assert_eq!(
            op(&["-n", "-"]).unwrap(),
            Op::SwitchNamespace(Target::Previous)
        );
        assert_eq!(op(&["-n", "-c"]).unwrap(), Op::CurrentNamespace);
        assert!(op(&["-n", "-u"]).is_err());
    }
}
