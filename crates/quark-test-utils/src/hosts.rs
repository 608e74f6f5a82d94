use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use quark_core::remote::{ETCD_DISCOVERY_PATH, MACHINE_ID_PATH};
use quark_core::{
    ClusterInstance, ClusterInstanceList, Error, HostConnector, OpContext, RemoteHost, Result,
};

const FAKE_PUBLIC_KEY: &str =
    "-----BEGIN RSA PUBLIC KEY-----\nMIIBCgKCAQEAfake\n-----END RSA PUBLIC KEY-----\n";

/// How long a stalled command hangs before it is handled.
const STALL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Default)]
struct HostState {
    files: BTreeMap<String, String>,
    dirs: BTreeSet<String>,
    commands: Vec<String>,
    fail_patterns: Vec<String>,
    stall_patterns: Vec<String>,
}

/// One simulated host. Clones share state.
#[derive(Clone)]
pub struct FakeHost {
    label: String,
    state: Arc<Mutex<HostState>>,
}

impl FakeHost {
    pub fn new(label: impl Into<String>, machine_id: &str) -> Self {
        let host = Self {
            label: label.into(),
            state: Arc::default(),
        };
        host.set_file(MACHINE_ID_PATH, &format!("{machine_id}\n"));
        host
    }

    fn lock(&self) -> MutexGuard<'_, HostState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.lock().files.get(path).cloned()
    }

    pub fn set_file(&self, path: &str, content: &str) {
        self.lock().files.insert(path.to_string(), content.to_string());
    }

    /// Names of the files directly inside `dir`.
    pub fn list_dir(&self, dir: &str) -> Vec<String> {
        let prefix = format!("{}/", dir.trim_end_matches('/'));
        self.lock()
            .files
            .keys()
            .filter_map(|p| p.strip_prefix(&prefix))
            .filter(|rest| !rest.contains('/'))
            .map(str::to_string)
            .collect()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        self.lock().dirs.contains(path)
    }

    /// Every command run so far, in order.
    pub fn commands(&self) -> Vec<String> {
        self.lock().commands.clone()
    }

    /// Make every later command containing `pattern` exit non-zero.
    pub fn fail_commands_matching(&self, pattern: &str) {
        self.lock().fail_patterns.push(pattern.to_string());
    }

    /// Make every later command containing `pattern` hang without output.
    pub fn stall_commands_matching(&self, pattern: &str) {
        self.lock().stall_patterns.push(pattern.to_string());
    }

    fn stalls(&self, command: &str) -> bool {
        self.lock()
            .stall_patterns
            .iter()
            .any(|p| command.contains(p.as_str()))
    }

    fn handle(&self, command: &str, stdin: Option<&str>) -> Result<String> {
        let mut state = self.lock();
        state.commands.push(command.to_string());
        if state.fail_patterns.iter().any(|p| command.contains(p.as_str())) {
            return Err(Error::remote(format!("{}: exit status 1", self.label)));
        }

        if let Some(net) = keygen_network(command) {
            let conf_path = format!("/etc/tinc/{net}/tinc.conf");
            let name = state
                .files
                .get(&conf_path)
                .and_then(|conf| {
                    conf.lines()
                        .find_map(|l| l.strip_prefix("Name = ").map(str::to_string))
                })
                .ok_or_else(|| Error::remote(format!("{}: {conf_path} missing", self.label)))?;
            let descriptor = state
                .files
                .entry(format!("/etc/tinc/{net}/hosts/{name}"))
                .or_default();
            descriptor.push_str(FAKE_PUBLIC_KEY);
            return Ok(String::new());
        }
        if let Some(path) = command.strip_prefix("cat ") {
            let path = unquote(path);
            return state
                .files
                .get(&path)
                .map(|c| c.trim().to_string())
                .ok_or_else(|| {
                    Error::remote(format!("{}: cat: {path}: No such file or directory", self.label))
                });
        }
        if let Some(rest) = command.strip_prefix("sudo tee ") {
            let path = rest.split(" > /dev/null").next().map(unquote).unwrap_or_default();
            state.files.insert(path, stdin.unwrap_or_default().to_string());
            return Ok(String::new());
        }
        if let Some(path) = command.strip_prefix("sudo mkdir -p ") {
            let path = unquote(path);
            let mut dir = String::new();
            for part in path.split('/').filter(|p| !p.is_empty()) {
                dir.push('/');
                dir.push_str(part);
                state.dirs.insert(dir.clone());
            }
            return Ok(String::new());
        }
        if command.starts_with("etcdctl member add ") {
            return Ok("Added member to cluster".to_string());
        }
        Ok(String::new())
    }
}

#[async_trait]
impl RemoteHost for FakeHost {
    fn label(&self) -> &str {
        &self.label
    }

    async fn exec(&self, _ctx: &OpContext, command: &str, stdin: Option<&str>) -> Result<String> {
        tokio::task::yield_now().await;
        if self.stalls(command) {
            tokio::time::sleep(STALL).await;
        }
        self.handle(command, stdin)
    }
}

fn keygen_network(command: &str) -> Option<&str> {
    let rest = command.split("tincd -n ").nth(1)?;
    let (net, flags) = rest.split_once(' ')?;
    flags.starts_with("-K").then_some(net)
}

fn unquote(s: &str) -> String {
    let s = s.trim();
    s.strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .map(|s| s.replace(r"'\''", "'"))
        .unwrap_or_else(|| s.to_string())
}

/// A fleet of [`FakeHost`]s keyed by instance name.
#[derive(Clone, Default)]
pub struct FakeHosts {
    hosts: Arc<Mutex<HashMap<String, FakeHost>>>,
}

impl FakeHosts {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, FakeHost>> {
        self.hosts.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Host for `instance`, created with machine id `machine-<id>` when
    /// it does not exist yet.
    pub fn add(&self, instance: &ClusterInstance) -> FakeHost {
        self.lock()
            .entry(instance.name.clone())
            .or_insert_with(|| FakeHost::new(&instance.name, &format!("machine-{}", instance.id)))
            .clone()
    }

    pub fn add_all(&self, instances: &ClusterInstanceList) {
        for instance in instances {
            self.add(instance);
        }
    }

    /// Host added for a created instance, with its discovery URL file.
    pub(crate) fn provision(&self, instance: &ClusterInstance, discovery_url: &str) {
        let host = self.add(instance);
        if !discovery_url.is_empty() {
            host.set_file(ETCD_DISCOVERY_PATH, discovery_url);
        }
    }

    pub fn remove(&self, name: &str) {
        self.lock().remove(name);
    }

    /// The host named `name`. Panics when there is none.
    pub fn host(&self, name: &str) -> FakeHost {
        match self.lock().get(name) {
            Some(host) => host.clone(),
            None => panic!("no fake host named {name}"),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    pub fn connector(&self) -> Arc<dyn HostConnector> {
        Arc::new(self.clone())
    }
}

#[async_trait]
impl HostConnector for FakeHosts {
    async fn connect(
        &self,
        _ctx: &OpContext,
        instance: &ClusterInstance,
    ) -> Result<Arc<dyn RemoteHost>> {
        let host = self.lock().get(&instance.name).cloned();
        match host {
            Some(host) => Ok(Arc::new(host)),
            None => Err(Error::remote(format!("{}: connection refused", instance.name))),
        }
    }
}
