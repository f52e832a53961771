//! Mesh VPN configuration management
//!
//! Owns the on-disk configuration consumed by the external VPN daemon: one
//! host definition file per peer plus the `ConnectTo` directives in the
//! shared network config. Nothing is cached between calls; every operation
//! re-reads disk state so concurrent provisioning tools cannot be fought.

use std::collections::HashSet;
use std::path::PathBuf;
use std::process::Command;
use std::sync::Arc;
use std::time::{Duration, Instant};

use meshsync_common::{decode_credential_best_effort, Error, Metrics, PeerRecord, Result};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DaemonConfig;

const RELOAD_ATTEMPTS: u32 = 3;

/// Delivers a reload signal to the external VPN daemon. The production
/// implementation resolves the process fresh on every call, so a daemon that
/// restarts between attempts is still reached.
pub trait ReloadSignaler: Send + Sync {
    fn signal(&self) -> Result<()>;
}

/// Signals the VPN daemon found by process name with SIGHUP.
pub struct ProcessSignaler {
    process_name: String,
}

impl ProcessSignaler {
    pub fn new(process_name: impl Into<String>) -> Self {
        Self {
            process_name: process_name.into(),
        }
    }
}

impl ReloadSignaler for ProcessSignaler {
    fn signal(&self) -> Result<()> {
        let output = Command::new("pidof")
            .arg(&self.process_name)
            .output()
            .map_err(|e| Error::Reload(format!("running pidof: {}", e)))?;
        if !output.status.success() {
            return Err(Error::Reload(format!(
                "{} is not running",
                self.process_name
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let mut pids = Vec::new();
        for token in stdout.split_whitespace() {
            let pid: i32 = token
                .parse()
                .map_err(|_| Error::Reload(format!("unexpected pidof output: {}", token)))?;
            pids.push(pid);
        }
        if pids.is_empty() {
            return Err(Error::Reload(format!(
                "{} is not running",
                self.process_name
            )));
        }

        // A forked daemon shows up as several PIDs; all of them get the
        // signal.
        for pid in pids {
            kill(Pid::from_raw(pid), Signal::SIGHUP)
                .map_err(|e| Error::Reload(format!("SIGHUP to pid {}: {}", pid, e)))?;
        }
        Ok(())
    }
}

/// Result of one reconcile pass. A failed reload surfaces as
/// `reloaded == false` rather than an error; the directive counts are valid
/// either way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileOutcome {
    pub added: usize,
    pub removed: usize,
    pub reloaded: bool,
}

/// Manages the VPN daemon's configuration tree for one network.
pub struct MeshManager {
    net_dir: PathBuf,
    conf_file: String,
    vpn_port: u16,
    signaler: Arc<dyn ReloadSignaler>,
    metrics: Arc<Metrics>,
    cancel: CancellationToken,
}

impl MeshManager {
    pub fn new(
        config: &DaemonConfig,
        signaler: Arc<dyn ReloadSignaler>,
        metrics: Arc<Metrics>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            net_dir: config.conf_dir.join(&config.net_name),
            conf_file: config.conf_file.clone(),
            vpn_port: config.vpn_port,
            signaler,
            metrics,
            cancel,
        }
    }

    fn hosts_dir(&self) -> PathBuf {
        self.net_dir.join("hosts")
    }

    fn host_path(&self, node_name: &str) -> PathBuf {
        self.hosts_dir().join(node_name)
    }

    fn conf_path(&self) -> PathBuf {
        self.net_dir.join(&self.conf_file)
    }

    /// Write the host definition file for one peer. Overwrites whatever is
    /// there; the registry record is authoritative.
    pub async fn sync_host_file(&self, node_name: &str, peer: &PeerRecord) -> Result<()> {
        if node_name.is_empty() {
            return Err(Error::InvalidPeer("empty node name".to_string()));
        }
        let started = Instant::now();

        let credential = decode_credential_best_effort(&peer.credential);
        let host = endpoint_host(&peer.endpoint);

        let mut content = format!(
            "# Host configuration for {}\nAddress = {}\nPort = {}\n",
            node_name, host, self.vpn_port
        );
        if let Some(address) = peer.address {
            content.push_str(&format!("Subnet = {}/32\n", address));
        }
        content.push('\n');
        content.push_str(credential.trim_end());
        content.push('\n');

        fs::create_dir_all(self.hosts_dir()).await?;
        fs::write(self.host_path(node_name), content).await?;

        self.metrics.observe_hostfile_sync(started.elapsed());
        debug!("synced host file for {}", node_name);
        Ok(())
    }

    /// Delete a peer's host definition file. An already-absent file counts
    /// as success since the goal state holds.
    pub async fn remove_host_file(&self, node_name: &str) -> Result<()> {
        if node_name.is_empty() {
            return Err(Error::InvalidPeer("empty node name".to_string()));
        }
        match fs::remove_file(self.host_path(node_name)).await {
            Ok(()) => {
                debug!("removed host file for {}", node_name);
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Names currently listed as `ConnectTo` directives. A missing config
    /// file is an error; an empty directive list is not.
    pub async fn current_connections(&self) -> Result<Vec<String>> {
        let path = self.conf_path();
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::ConfigMissing(path));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(parse_connections(&content))
    }

    /// Rewrite the `ConnectTo` directives to exactly `desired`, keeping every
    /// other line untouched and in order. A missing config file is a no-op;
    /// the VPN daemon simply has not been provisioned yet.
    pub async fn update_connections(&self, desired: &[String]) -> Result<()> {
        let path = self.conf_path();
        let content = match fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("{} missing, skipping connection update", path.display());
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let mut lines: Vec<&str> = content
            .lines()
            .filter(|line| !line.trim().starts_with("ConnectTo"))
            .collect();
        let directives: Vec<String> = desired
            .iter()
            .map(|name| format!("ConnectTo = {}", name))
            .collect();
        lines.extend(directives.iter().map(String::as_str));

        let mut output = lines.join("\n");
        output.push('\n');
        fs::write(&path, output).await?;
        Ok(())
    }

    /// Signal the VPN daemon to pick up config changes. Up to three
    /// attempts with 1s and 2s pauses between them; the process is resolved
    /// fresh on every attempt.
    pub async fn reload(&self) -> Result<()> {
        let started = Instant::now();
        let mut last_err = Error::Reload("reload never attempted".to_string());

        for attempt in 1..=RELOAD_ATTEMPTS {
            // signal() shells out to pidof; keep it off the executor thread
            let signaler = self.signaler.clone();
            let outcome = match tokio::task::spawn_blocking(move || signaler.signal()).await {
                Ok(outcome) => outcome,
                Err(e) => Err(Error::Reload(format!("signal task panicked: {}", e))),
            };
            match outcome {
                Ok(()) => {
                    self.metrics.observe_reload(started.elapsed());
                    debug!("reload signalled on attempt {}", attempt);
                    return Ok(());
                }
                Err(e) => {
                    warn!("reload attempt {}/{} failed: {}", attempt, RELOAD_ATTEMPTS, e);
                    last_err = e;
                }
            }
            if attempt < RELOAD_ATTEMPTS {
                let backoff = Duration::from_secs(u64::from(attempt));
                tokio::select! {
                    _ = self.cancel.cancelled() => return Err(Error::Canceled),
                    _ = tokio::time::sleep(backoff) => {}
                }
            }
        }

        Err(last_err)
    }

    /// Converge the directive set to `desired` and reload. Runs the full
    /// rewrite-and-reload even when the diff is empty: a reload that failed
    /// on an earlier pass gets retried by the next event this way, rather
    /// than leaving the VPN daemon on stale config forever.
    pub async fn reconcile(&self, desired: &[String]) -> Result<ReconcileOutcome> {
        let current = self.current_connections().await?;

        let current_set: HashSet<&str> = current.iter().map(String::as_str).collect();
        let desired_set: HashSet<&str> = desired.iter().map(String::as_str).collect();
        let added = desired
            .iter()
            .filter(|name| !current_set.contains(name.as_str()))
            .count();
        let removed = current
            .iter()
            .filter(|name| !desired_set.contains(name.as_str()))
            .count();

        if added == 0 && removed == 0 {
            debug!("connections already converged ({} peer(s))", desired.len());
        }

        self.update_connections(desired).await?;

        let reloaded = match self.reload().await {
            Ok(()) => true,
            Err(Error::Canceled) => return Err(Error::Canceled),
            Err(e) => {
                warn!("reload failed after connection update: {}", e);
                false
            }
        };

        if added > 0 || removed > 0 {
            info!("reconciled connections: {} added, {} removed", added, removed);
        }
        Ok(ReconcileOutcome {
            added,
            removed,
            reloaded,
        })
    }

    /// This node's own credential block, read back from its host file. The
    /// block is everything after the first blank line.
    pub async fn local_credential(&self, node_name: &str) -> Result<String> {
        let path = self.host_path(node_name);
        let content = fs::read_to_string(&path).await?;
        match content.split_once("\n\n") {
            Some((_, credential)) => Ok(credential.trim().to_string()),
            None => Err(Error::HostFile(format!(
                "{} has no credential block",
                path.display()
            ))),
        }
    }
}

fn parse_connections(content: &str) -> Vec<String> {
    let mut names = Vec::new();
    for line in content.lines() {
        let trimmed = line.trim();
        if !trimmed.starts_with("ConnectTo") {
            continue;
        }
        if let Some((_, value)) = trimmed.split_once('=') {
            let name = value.trim();
            if !name.is_empty() {
                names.push(name.to_string());
            }
        }
    }
    names
}

/// Host portion of an endpoint: the part before the port, with bracketed
/// IPv6 endpoints unwrapped.
fn endpoint_host(endpoint: &str) -> &str {
    if let Some(rest) = endpoint.strip_prefix('[') {
        if let Some(end) = rest.find(']') {
            return &rest[..end];
        }
    }
    match endpoint.split_once(':') {
        Some((host, _)) => host,
        None => endpoint,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{engine::general_purpose::STANDARD, Engine};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Fails the first `fail_first` calls, then succeeds.
    struct FakeSignaler {
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl FakeSignaler {
        fn new(fail_first: usize) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail_first,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ReloadSignaler for FakeSignaler {
        fn signal(&self) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                Err(Error::Reload("daemon not ready".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn manager(tmp: &TempDir, signaler: Arc<dyn ReloadSignaler>) -> MeshManager {
        let config = DaemonConfig {
            conf_dir: tmp.path().to_path_buf(),
            net_name: "testnet".to_string(),
            ..Default::default()
        };
        MeshManager::new(
            &config,
            signaler,
            Arc::new(Metrics::new()),
            CancellationToken::new(),
        )
    }

    fn peer(address: &str, credential: &str, endpoint: &str) -> PeerRecord {
        PeerRecord {
            address: Some(address.parse().unwrap()),
            credential: credential.to_string(),
            endpoint: endpoint.to_string(),
        }
    }

    async fn seed_conf(tmp: &TempDir, content: &str) {
        let dir = tmp.path().join("testnet");
        fs::create_dir_all(&dir).await.unwrap();
        fs::write(dir.join("tinc.conf"), content).await.unwrap();
    }

    async fn read_conf(tmp: &TempDir) -> String {
        fs::read_to_string(tmp.path().join("testnet/tinc.conf"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_sync_host_file_renders_expected_content() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, FakeSignaler::new(0));
        let key = "-----BEGIN RSA PUBLIC KEY-----\nabc\n-----END RSA PUBLIC KEY-----";
        let record = peer("10.0.0.2", &STANDARD.encode(key), "192.0.2.7:655");

        m.sync_host_file("peer2", &record).await.unwrap();

        let content = std::fs::read_to_string(tmp.path().join("testnet/hosts/peer2")).unwrap();
        assert_eq!(
            content,
            format!(
                "# Host configuration for peer2\nAddress = 192.0.2.7\nPort = 655\nSubnet = 10.0.0.2/32\n\n{}\n",
                key
            )
        );
    }

    #[tokio::test]
    async fn test_sync_host_file_plain_credential_and_no_address() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, FakeSignaler::new(0));
        let record = PeerRecord {
            address: None,
            credential: "plain text key".to_string(),
            endpoint: "peer3.example:700".to_string(),
        };

        m.sync_host_file("peer3", &record).await.unwrap();

        let content = std::fs::read_to_string(tmp.path().join("testnet/hosts/peer3")).unwrap();
        assert!(content.contains("Address = peer3.example\n"));
        assert!(!content.contains("Subnet"));
        assert!(content.ends_with("\n\nplain text key\n"));
    }

    #[tokio::test]
    async fn test_sync_host_file_rejects_empty_name() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, FakeSignaler::new(0));
        let record = peer("10.0.0.2", "k", "h:655");
        assert!(matches!(
            m.sync_host_file("", &record).await,
            Err(Error::InvalidPeer(_))
        ));
    }

    #[tokio::test]
    async fn test_remove_host_file_missing_is_ok() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, FakeSignaler::new(0));
        m.remove_host_file("never-existed").await.unwrap();
    }

    #[tokio::test]
    async fn test_remove_host_file_deletes() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, FakeSignaler::new(0));
        m.sync_host_file("p", &peer("10.0.0.9", "k", "h:655"))
            .await
            .unwrap();
        m.remove_host_file("p").await.unwrap();
        assert!(!tmp.path().join("testnet/hosts/p").exists());
    }

    #[tokio::test]
    async fn test_current_connections_missing_config_is_error() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, FakeSignaler::new(0));
        assert!(matches!(
            m.current_connections().await,
            Err(Error::ConfigMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_current_connections_parses_directive_variants() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, FakeSignaler::new(0));
        seed_conf(
            &tmp,
            "ConnectTo = a\nconnectTo = lower\n  ConnectTo=b  \nConnectTo noequals\nConnectTo =\nMode = switch\n",
        )
        .await;

        let names = m.current_connections().await.unwrap();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_update_connections_missing_config_is_noop() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, FakeSignaler::new(0));
        m.update_connections(&["a".to_string()]).await.unwrap();
        assert!(!tmp.path().join("testnet/tinc.conf").exists());
    }

    #[tokio::test]
    async fn test_update_connections_round_trip_preserves_other_lines() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, FakeSignaler::new(0));
        seed_conf(
            &tmp,
            "Name = node1\n\nInterface = tun0\nConnectTo = old1\n# routing section\nConnectTo = old2\nMode = switch\n",
        )
        .await;

        m.update_connections(&["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        assert_eq!(
            read_conf(&tmp).await,
            "Name = node1\n\nInterface = tun0\n# routing section\nMode = switch\nConnectTo = a\nConnectTo = b\n"
        );

        let names = m.current_connections().await.unwrap();
        assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_update_connections_to_empty_set() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, FakeSignaler::new(0));
        seed_conf(&tmp, "Name = node1\nConnectTo = a\n").await;

        m.update_connections(&[]).await.unwrap();

        assert_eq!(read_conf(&tmp).await, "Name = node1\n");
        assert!(m.current_connections().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_diffs_membership() {
        let tmp = TempDir::new().unwrap();
        let signaler = FakeSignaler::new(0);
        let m = manager(&tmp, signaler.clone());
        seed_conf(&tmp, "Name = n\nConnectTo = a\nConnectTo = b\nConnectTo = c\n").await;

        let desired = vec!["b".to_string(), "c".to_string(), "d".to_string()];
        let outcome = m.reconcile(&desired).await.unwrap();

        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.removed, 1);
        assert!(outcome.reloaded);
        assert_eq!(signaler.calls(), 1);

        let names = m.current_connections().await.unwrap();
        assert_eq!(names, desired);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let signaler = FakeSignaler::new(0);
        let m = manager(&tmp, signaler.clone());
        seed_conf(&tmp, "Name = n\nConnectTo = a\n").await;

        let desired = vec!["a".to_string(), "b".to_string()];
        m.reconcile(&desired).await.unwrap();
        let after_first = read_conf(&tmp).await;

        let outcome = m.reconcile(&desired).await.unwrap();
        assert_eq!(outcome.added, 0);
        assert_eq!(outcome.removed, 0);
        assert!(outcome.reloaded);
        assert_eq!(read_conf(&tmp).await, after_first);
    }

    #[tokio::test(start_paused = true)]
    async fn test_converged_reconcile_still_retries_reload() {
        let tmp = TempDir::new().unwrap();
        // every attempt of the first reconcile fails; the daemon is left on
        // stale config
        let signaler = FakeSignaler::new(3);
        let m = manager(&tmp, signaler.clone());
        seed_conf(&tmp, "Name = n\n").await;

        let desired = vec!["a".to_string()];
        let outcome = m.reconcile(&desired).await.unwrap();
        assert!(!outcome.reloaded);
        assert_eq!(signaler.calls(), 3);

        // a duplicate event with the identical set must still signal, so the
        // earlier failed reload is made up for
        let outcome = m.reconcile(&desired).await.unwrap();
        assert_eq!(outcome.added, 0);
        assert_eq!(outcome.removed, 0);
        assert!(outcome.reloaded);
        assert_eq!(signaler.calls(), 4);
        assert_eq!(read_conf(&tmp).await, "Name = n\nConnectTo = a\n");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconcile_reports_reload_failure_without_erroring() {
        let tmp = TempDir::new().unwrap();
        let signaler = FakeSignaler::new(usize::MAX);
        let m = manager(&tmp, signaler.clone());
        seed_conf(&tmp, "ConnectTo = a\n").await;

        let outcome = m.reconcile(&["b".to_string()]).await.unwrap();

        assert_eq!(outcome.added, 1);
        assert_eq!(outcome.removed, 1);
        assert!(!outcome.reloaded);
        // directives were still written
        assert_eq!(read_conf(&tmp).await, "ConnectTo = b\n");
    }

    #[tokio::test]
    async fn test_reconcile_missing_config_is_error() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, FakeSignaler::new(0));
        assert!(matches!(
            m.reconcile(&["a".to_string()]).await,
            Err(Error::ConfigMissing(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_retries_with_backoff() {
        let tmp = TempDir::new().unwrap();
        let signaler = FakeSignaler::new(2);
        let m = manager(&tmp, signaler.clone());

        let started = tokio::time::Instant::now();
        m.reload().await.unwrap();

        assert_eq!(signaler.calls(), 3);
        // 1s after the first failure, 2s after the second
        assert!(started.elapsed() >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reload_gives_up_after_three_attempts() {
        let tmp = TempDir::new().unwrap();
        let signaler = FakeSignaler::new(usize::MAX);
        let m = manager(&tmp, signaler.clone());

        assert!(matches!(m.reload().await, Err(Error::Reload(_))));
        assert_eq!(signaler.calls(), 3);
    }

    #[tokio::test]
    async fn test_reload_canceled_during_backoff() {
        let tmp = TempDir::new().unwrap();
        let signaler = FakeSignaler::new(usize::MAX);
        let config = DaemonConfig {
            conf_dir: tmp.path().to_path_buf(),
            net_name: "testnet".to_string(),
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let m = MeshManager::new(
            &config,
            signaler.clone(),
            Arc::new(Metrics::new()),
            cancel.clone(),
        );

        cancel.cancel();
        assert!(matches!(m.reload().await, Err(Error::Canceled)));
        // first attempt runs; the backoff is what gets interrupted
        assert_eq!(signaler.calls(), 1);
    }

    #[tokio::test]
    async fn test_delete_then_readd_matches_always_present() {
        let flapped = TempDir::new().unwrap();
        let stable = TempDir::new().unwrap();
        let m_flap = manager(&flapped, FakeSignaler::new(0));
        let m_stable = manager(&stable, FakeSignaler::new(0));
        seed_conf(&flapped, "Name = self\n").await;
        seed_conf(&stable, "Name = self\n").await;

        let a = peer("10.0.0.1", "key-a", "1.1.1.1:655");
        let b = peer("10.0.0.2", "key-b", "2.2.2.2:655");
        let both = vec!["a".to_string(), "b".to_string()];

        // peer b flaps: present, deleted, re-added
        m_flap.sync_host_file("a", &a).await.unwrap();
        m_flap.sync_host_file("b", &b).await.unwrap();
        m_flap.reconcile(&both).await.unwrap();
        m_flap.remove_host_file("b").await.unwrap();
        m_flap.reconcile(&["a".to_string()]).await.unwrap();
        m_flap.sync_host_file("b", &b).await.unwrap();
        m_flap.reconcile(&both).await.unwrap();

        // peer b never flaps
        m_stable.sync_host_file("a", &a).await.unwrap();
        m_stable.sync_host_file("b", &b).await.unwrap();
        m_stable.reconcile(&both).await.unwrap();

        assert_eq!(read_conf(&flapped).await, read_conf(&stable).await);
        for name in ["a", "b"] {
            let flap_host =
                std::fs::read_to_string(flapped.path().join("testnet/hosts").join(name)).unwrap();
            let stable_host =
                std::fs::read_to_string(stable.path().join("testnet/hosts").join(name)).unwrap();
            assert_eq!(flap_host, stable_host);
        }
    }

    #[tokio::test]
    async fn test_local_credential_reads_block_after_blank_line() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, FakeSignaler::new(0));
        m.sync_host_file("self", &peer("10.0.0.1", "KEYBLOCK", "1.1.1.1:655"))
            .await
            .unwrap();

        assert_eq!(m.local_credential("self").await.unwrap(), "KEYBLOCK");
    }

    #[tokio::test]
    async fn test_local_credential_requires_separator() {
        let tmp = TempDir::new().unwrap();
        let m = manager(&tmp, FakeSignaler::new(0));
        let hosts = tmp.path().join("testnet/hosts");
        fs::create_dir_all(&hosts).await.unwrap();
        fs::write(hosts.join("self"), "Address = 1.1.1.1\n").await.unwrap();

        assert!(matches!(
            m.local_credential("self").await,
            Err(Error::HostFile(_))
        ));
        assert!(m.local_credential("missing").await.is_err());
    }

    #[test]
    fn test_endpoint_host() {
        assert_eq!(endpoint_host("1.2.3.4:655"), "1.2.3.4");
        assert_eq!(endpoint_host("bare-host"), "bare-host");
        assert_eq!(endpoint_host("[fd00::1]:655"), "fd00::1");
        assert_eq!(endpoint_host("host.example:655"), "host.example");
    }
}
