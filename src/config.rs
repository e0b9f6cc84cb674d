use std::collections::HashSet;
use std::env;
use std::fs;
use std::io;
use std::path::PathBuf;

use anyhow::{bail, ensure, Context, Result};
use regex::Regex;
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Where namespace and context history records are kept. Empty means the
    /// user cache directory.
    #[serde(default)]
    pub history_dir: String,

    #[serde(default = "Config::default_page_size")]
    pub page_size: u32,

    pub ns_alias: Option<Vec<NsAlias>>,

    #[serde(skip)]
    pub path: Option<PathBuf>,
}

/// A static namespace list used instead of querying the cluster, for contexts
/// matched by `regex` or listed in `names`.
#[derive(Debug, Deserialize, Clone)]
pub struct NsAlias {
    pub regex: Option<String>,

    #[serde(default)]
    pub names: HashSet<String>,

    pub alias: Vec<String>,

    #[serde(skip)]
    compiled: Option<Regex>,
}

impl Config {
    const CONFIG_PATH_ENV: &'static str = "KCTX_CONFIG_PATH";

    /// Loads the settings file if there is one, defaults otherwise.
    pub fn load() -> Result<Config> {
        let Some(path) = Self::find_file()? else {
            return Ok(Self::default());
        };
        let content = fs::read_to_string(&path)
            .with_context(|| format!("read config file '{}'", path.display()))?;
        let mut cfg = Self::parse(&content)
            .with_context(|| format!("invalid config file '{}'", path.display()))?;
        cfg.path = Some(path);
        Ok(cfg)
    }

    /// Parses and validates TOML settings.
    pub fn parse(content: &str) -> Result<Config> {
        let mut cfg: Config = toml::from_str(content).context("parse config toml")?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// The first alias entry that claims the context `name`.
    pub fn match_ns_alias(&self, name: &str) -> Option<&[String]> {
        self.ns_alias
            .iter()
            .flatten()
            .find(|alias| alias.matches(name))
            .map(|alias| alias.alias.as_slice())
    }

    pub fn history_dir(&self) -> Result<PathBuf> {
        if !self.history_dir.is_empty() {
            return Ok(PathBuf::from(&self.history_dir));
        }
        match dirs::cache_dir() {
            Some(dir) => Ok(dir.join("kctx")),
            None => Ok(get_home_dir()?.join(".cache").join("kctx")),
        }
    }

    fn find_file() -> Result<Option<PathBuf>> {
        let path = match env::var_os(Self::CONFIG_PATH_ENV) {
            Some(path) => PathBuf::from(path),
            None => get_home_dir()?.join(".config").join("kctx.toml"),
        };
        match fs::metadata(&path) {
            Ok(meta) if meta.is_dir() => {
                bail!("config path '{}' is a directory", path.display())
            }
            Ok(_) => Ok(Some(path)),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err).with_context(|| format!("stat config file '{}'", path.display())),
        }
    }

    fn validate(&mut self) -> Result<()> {
        ensure!(self.page_size > 0, "`page_size` must be greater than 0");
        if !self.history_dir.is_empty() {
            self.history_dir = shellexpand::full(&self.history_dir)
                .context("expand env for `history_dir`")?
                .into_owned();
        }
        for (idx, alias) in self.ns_alias.iter_mut().flatten().enumerate() {
            alias
                .compile()
                .with_context(|| format!("invalid ns_alias #{idx}"))?;
        }
        Ok(())
    }

    pub fn default() -> Config {
        Config {
            history_dir: String::new(),
            page_size: Self::default_page_size(),
            ns_alias: None,
            path: None,
        }
    }

    fn default_page_size() -> u32 {
        500
    }
}

impl NsAlias {
    fn matches(&self, name: &str) -> bool {
        self.names.contains(name) || self.compiled.as_ref().is_some_and(|re| re.is_match(name))
    }

    fn compile(&mut self) -> Result<()> {
        ensure!(!self.alias.is_empty(), "`alias` cannot be empty");
        if let Some(regex) = self.regex.as_deref() {
            let re = Regex::new(regex).with_context(|| format!("parse regex '{regex}'"))?;
            self.compiled = Some(re);
        }
        ensure!(
            self.compiled.is_some() || !self.names.is_empty(),
            "either `regex` or `names` is required"
        );
        Ok(())
    }
}

pub fn get_home_dir() -> Result<PathBuf> {
    dirs::home_dir().context("cannot find home directory in your system")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = Config::parse("").unwrap();
        assert_eq!(cfg.page_size, 500);
        assert!(cfg.history_dir.is_empty());
        assert!(cfg.ns_alias.is_none());
        assert!(cfg.history_dir().unwrap().ends_with("kctx"));
    }

    #[test]
    fn test_history_dir_expand() {
        let cfg = Config::parse("history_dir = \"/var/tmp/kctx\"\npage_size = 20\n").unwrap();
        assert_eq!(cfg.history_dir().unwrap(), PathBuf::from("/var/tmp/kctx"));
        assert_eq!(cfg.page_size, 20);
    }

    #[test]
    fn test_invalid() {
        assert!(Config::parse("page_size = 0").is_err());
        assert!(Config::parse("[[ns_alias]]\nalias = []\nnames = [\"dev\"]\n").is_err());
        assert!(Config::parse("[[ns_alias]]\nalias = [\"app\"]\n").is_err());
        assert!(Config::parse("[[ns_alias]]\nalias = [\"app\"]\nnames = []\n").is_err());
        assert!(Config::parse("[[ns_alias]]\nalias = [\"app\"]\nregex = \"(\"\n").is_err());
    }

    #[test]
    fn test_match_ns_alias() {
        let cfg = Config::parse(
            r#"
[[ns_alias]]
regex = "^prod-.*"
alias = ["app", "monitoring"]

[[ns_alias]]
names = ["kind-local"]
alias = ["default"]
"#,
        )
        .unwrap();

        assert_eq!(cfg.match_ns_alias("prod-eu").unwrap(), ["app", "monitoring"]);
        assert_eq!(cfg.match_ns_alias("kind-local").unwrap(), ["default"]);
        assert!(cfg.match_ns_alias("staging").is_none());
    }
}
