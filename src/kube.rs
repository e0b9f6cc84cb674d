use std::collections::HashSet;
use std::env;

use k8s_openapi::api::core::v1::Namespace as ApiCoreV1Namespace;
use kube::api::ListParams;
use kube::config::Config as ApiConfig;
use kube::config::KubeConfigOptions as ApiConfigOptions;
use kube::config::Kubeconfig as ApiKubeconfig;
use kube::Api;
use kube::Client as KubeClient;
use tokio::runtime::{Builder as RuntimeBuilder, Runtime};
use tracing::debug;

use crate::config::Config;
use crate::error::{KubeError, Result};
use crate::kubeconfig::ConfigStore;

/// Answers namespace questions for the cluster behind the current context.
pub trait NamespaceSource {
    fn namespace_exists(&self, store: &ConfigStore, name: &str) -> Result<bool>;

    fn list_namespaces(&self, store: &ConfigStore) -> Result<Vec<String>>;
}

pub struct NamespacePage {
    pub names: Vec<String>,
    pub continue_token: Option<String>,
}

/// One page of a namespace listing.
pub trait NamespacePager {
    fn fetch(&mut self, limit: u32, continue_token: Option<&str>) -> Result<NamespacePage>;
}

/// Follows continue tokens until the server reports no more data. Names keep
/// their server order, repeated names are dropped.
pub fn collect_namespaces<P>(pager: &mut P, page_size: u32) -> Result<Vec<String>>
where
    P: NamespacePager + ?Sized,
{
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    let mut token: Option<String> = None;
    let mut pages = 0;
    loop {
        let page = pager.fetch(page_size, token.as_deref())?;
        pages += 1;
        for name in page.names {
            if seen.insert(name.clone()) {
                names.push(name);
            }
        }
        match page.continue_token {
            Some(next) if !next.is_empty() => token = Some(next),
            _ => break,
        }
    }
    debug!("listed {} namespace(s) in {pages} page(s)", names.len());
    Ok(names)
}

/// A fixed namespace set, used for tests and for configured aliases.
pub struct StaticNamespaces {
    names: Vec<String>,
}

impl StaticNamespaces {
    const MOCK_ENV: &'static str = "_MOCK_NAMESPACES";

    pub fn new<I, S>(names: I) -> StaticNamespaces
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        StaticNamespaces {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    /// The `ns1`/`ns2` set, when `_MOCK_NAMESPACES` is set.
    pub fn mock_from_env() -> Option<StaticNamespaces> {
        let value = env::var_os(Self::MOCK_ENV)?;
        if value.is_empty() {
            return None;
        }
        Some(Self::new(["ns1", "ns2"]))
    }
}

impl NamespaceSource for StaticNamespaces {
    fn namespace_exists(&self, _store: &ConfigStore, name: &str) -> Result<bool> {
        Ok(self.names.iter().any(|ns| ns == name))
    }

    fn list_namespaces(&self, _store: &ConfigStore) -> Result<Vec<String>> {
        Ok(self.names.clone())
    }
}

/// Queries the Kubernetes API with a client built from the in-memory
/// kubeconfig.
pub struct ApiNamespaces {
    page_size: u32,
}

impl ApiNamespaces {
    pub fn new(page_size: u32) -> ApiNamespaces {
        ApiNamespaces { page_size }
    }

    fn connect(&self, store: &ConfigStore) -> Result<(Runtime, Api<ApiCoreV1Namespace>)> {
        let runtime = RuntimeBuilder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|err| remote_error("start async runtime", err))?;

        let data = store.bytes()?;
        let data = String::from_utf8(data).map_err(|err| remote_error("decode kubeconfig", err))?;
        let kubeconfig = ApiKubeconfig::from_yaml(&data)
            .map_err(|err| remote_error("parse in-memory kubeconfig", err))?;

        let kubeconfig = runtime
            .block_on(ApiConfig::from_custom_kubeconfig(
                kubeconfig,
                &ApiConfigOptions::default(),
            ))
            .map_err(|err| remote_error("build kube api config", err))?;
        debug!("connect to cluster '{}'", kubeconfig.cluster_url);

        let client = {
            let _guard = runtime.enter();
            KubeClient::try_from(kubeconfig).map_err(|err| remote_error("build kube client", err))?
        };

        Ok((runtime, Api::all(client)))
    }
}

impl NamespaceSource for ApiNamespaces {
    fn namespace_exists(&self, store: &ConfigStore, name: &str) -> Result<bool> {
        let (runtime, api) = self.connect(store)?;
        namespace_lookup(name, runtime.block_on(api.get(name)))
    }

    fn list_namespaces(&self, store: &ConfigStore) -> Result<Vec<String>> {
        let (runtime, api) = self.connect(store)?;
        let mut pager = ApiPager {
            runtime: &runtime,
            api,
        };
        collect_namespaces(&mut pager, self.page_size)
    }
}

struct ApiPager<'a> {
    runtime: &'a Runtime,
    api: Api<ApiCoreV1Namespace>,
}

impl NamespacePager for ApiPager<'_> {
    fn fetch(&mut self, limit: u32, continue_token: Option<&str>) -> Result<NamespacePage> {
        let mut params = ListParams::default().limit(limit);
        if let Some(token) = continue_token {
            params = params.continue_token(token);
        }

        let list = self
            .runtime
            .block_on(self.api.list(&params))
            .map_err(|err| remote_error("list namespaces from kube api", err))?;

        let continue_token = list.metadata.continue_.clone();
        let names = list
            .items
            .into_iter()
            .filter_map(|ns| ns.metadata.name)
            .collect();
        Ok(NamespacePage {
            names,
            continue_token,
        })
    }
}

/// A 404 means the namespace is absent, any other failure is an error.
fn namespace_lookup<T>(name: &str, result: std::result::Result<T, kube::Error>) -> Result<bool> {
    match result {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(err)) if err.code == 404 => Ok(false),
        Err(err) => Err(remote_error(
            &format!("query namespace \"{name}\" from kube api"),
            err,
        )),
    }
}

fn remote_error(action: &str, err: impl std::fmt::Display) -> KubeError {
    KubeError::RemoteQuery(format!("{action}: {err}"))
}

/// Picks where namespace answers come from: the test override first, then a
/// configured alias for the current context, then the cluster itself.
pub fn namespace_source(cfg: &Config, store: &ConfigStore) -> Box<dyn NamespaceSource> {
    if let Some(mock) = StaticNamespaces::mock_from_env() {
        debug!("use mock namespaces");
        return Box::new(mock);
    }
    if let Some(alias) = cfg.match_ns_alias(store.current_context()) {
        debug!("use namespace alias for '{}'", store.current_context());
        return Box::new(StaticNamespaces::new(alias));
    }
    Box::new(ApiNamespaces::new(cfg.page_size))
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::fs;
    use std::sync::{Mutex, MutexGuard};

    use kube::error::ErrorResponse;
    use tempfile::TempDir;

    use super::*;
    use crate::kubeconfig::KubeconfigPaths;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn lock_env() -> MutexGuard<'static, ()> {
        ENV_LOCK.lock().unwrap_or_else(|err| err.into_inner())
    }

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: String::from("Failure"),
            message: format!("namespaces \"x\" {reason}"),
            reason: reason.to_string(),
            code,
        })
    }

    struct FakePager {
        pages: VecDeque<(Vec<&'static str>, Option<&'static str>)>,
        calls: Vec<(u32, Option<String>)>,
    }

    impl NamespacePager for FakePager {
        fn fetch(&mut self, limit: u32, continue_token: Option<&str>) -> Result<NamespacePage> {
            self.calls.push((limit, continue_token.map(String::from)));
            let (names, next) = self
                .pages
                .pop_front()
                .ok_or_else(|| KubeError::RemoteQuery(String::from("no more pages")))?;
            Ok(NamespacePage {
                names: names.into_iter().map(String::from).collect(),
                continue_token: next.map(String::from),
            })
        }
    }

    #[test]
    fn test_collect_pages() {
        let mut pager = FakePager {
            pages: VecDeque::from([
                (vec!["default", "kube-public"], Some("t1")),
                (vec!["kube-public", "kube-system"], Some("t2")),
                (vec!["app"], Some("")),
            ]),
            calls: Vec::new(),
        };

        let names = collect_namespaces(&mut pager, 2).unwrap();
        assert_eq!(names, vec!["default", "kube-public", "kube-system", "app"]);
        assert_eq!(
            pager.calls,
            vec![
                (2, None),
                (2, Some(String::from("t1"))),
                (2, Some(String::from("t2")))
            ]
        );
    }

    #[test]
    fn test_collect_single_page() {
        let mut pager = FakePager {
            pages: VecDeque::from([(vec!["default"], None)]),
            calls: Vec::new(),
        };
        let names = collect_namespaces(&mut pager, 500).unwrap();
        assert_eq!(names, vec!["default"]);
        assert_eq!(pager.calls.len(), 1);
    }

    #[test]
    fn test_collect_page_error() {
        let mut pager = FakePager {
            pages: VecDeque::from([(vec!["default"], Some("t1"))]),
            calls: Vec::new(),
        };
        assert!(matches!(
            collect_namespaces(&mut pager, 500),
            Err(KubeError::RemoteQuery(_))
        ));
    }

    #[test]
    fn test_namespace_lookup() {
        assert!(namespace_lookup("x", Ok(())).unwrap());
        assert!(!namespace_lookup::<()>("x", Err(api_error(404, "NotFound"))).unwrap());

        for code in [401, 403, 500] {
            let err = namespace_lookup::<()>("x", Err(api_error(code, "Failure"))).unwrap_err();
            match err {
                KubeError::RemoteQuery(msg) => {
                    assert!(msg.starts_with("query namespace \"x\" from kube api"))
                }
                err => panic!("unexpected error: {err}"),
            }
        }
    }

    #[test]
    fn test_mock_from_env() {
        let _guard = lock_env();

        env::set_var(StaticNamespaces::MOCK_ENV, "1");
        let mock = StaticNamespaces::mock_from_env().unwrap();
        assert_eq!(mock.names, vec!["ns1", "ns2"]);

        env::set_var(StaticNamespaces::MOCK_ENV, "");
        assert!(StaticNamespaces::mock_from_env().is_none());

        env::remove_var(StaticNamespaces::MOCK_ENV);
        assert!(StaticNamespaces::mock_from_env().is_none());
    }

    #[test]
    fn test_namespace_source_order() {
        let _guard = lock_env();

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config");
        fs::write(
            &path,
            "current-context: prod-eu\ncontexts:\n- name: prod-eu\n  context: {}\n",
        )
        .unwrap();
        let store = ConfigStore::parse(&KubeconfigPaths::single(&path)).unwrap();
        let cfg = Config::parse("[[ns_alias]]\nregex = \"^prod-\"\nalias = [\"app\", \"monitoring\"]\n")
            .unwrap();

        env::set_var(StaticNamespaces::MOCK_ENV, "1");
        let source = namespace_source(&cfg, &store);
        assert_eq!(source.list_namespaces(&store).unwrap(), vec!["ns1", "ns2"]);
        assert!(!source.namespace_exists(&store, "app").unwrap());

        env::remove_var(StaticNamespaces::MOCK_ENV);
        let source = namespace_source(&cfg, &store);
        assert_eq!(
            source.list_namespaces(&store).unwrap(),
            vec!["app", "monitoring"]
        );
        assert!(source.namespace_exists(&store, "monitoring").unwrap());
        assert!(!source.namespace_exists(&store, "ns1").unwrap());
    }
}
