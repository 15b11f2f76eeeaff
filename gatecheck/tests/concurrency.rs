//! Shared-context behavior under concurrent workers.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, OnceLock, Weak};
use std::thread;
use std::time::Duration;

use gatecheck::io::credentials::{Authenticator, CredentialCache};
use gatecheck::scenario::{ScenarioFile, run_all};
use gatecheck::test_support::{FakeCluster, RecordingAuthenticator, fast_config};

#[test]
fn concurrent_first_access_logs_in_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    let auth = RecordingAuthenticator::default().with_delay(Duration::from_millis(50));
    let cache = CredentialCache::new(auth.clone())
        .with_artifact_dir(temp.path())
        .with_env(|_| None);
    let barrier = Barrier::new(8);

    let paths: Vec<_> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    cache.ensure_session("alice").expect("session")
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("worker"))
            .collect()
    });

    assert_eq!(auth.login_count("alice"), 1);
    assert!(paths.windows(2).all(|pair| pair[0] == pair[1]));
}

#[test]
fn concurrent_dirty_refresh_logs_in_once() {
    let temp = tempfile::tempdir().expect("tempdir");
    let auth = RecordingAuthenticator::default().with_delay(Duration::from_millis(20));
    let cache = CredentialCache::new(auth.clone())
        .with_artifact_dir(temp.path())
        .with_env(|_| None);
    cache.ensure_session("bob").expect("create");
    cache.mark_dirty(["bob"]).expect("mark");
    let barrier = Barrier::new(6);

    thread::scope(|scope| {
        for _ in 0..6 {
            scope.spawn(|| {
                barrier.wait();
                cache.ensure_session("bob").expect("session");
            });
        }
    });

    assert_eq!(auth.login_count("bob"), 2);
    assert!(!cache.is_dirty("bob").expect("dirty"));
}

/// Marks the user stale from inside its first login, as a group resync
/// running on another worker would.
struct ResyncDuringLogin {
    cache: Arc<OnceLock<Weak<CredentialCache>>>,
    logins: Arc<AtomicUsize>,
}

impl Authenticator for ResyncDuringLogin {
    fn login(&self, user: &str, _password: &str, config_path: &Path) -> anyhow::Result<()> {
        let first = self.logins.fetch_add(1, Ordering::SeqCst) == 0;
        if let Some(cache) = self.cache.get().and_then(Weak::upgrade).filter(|_| first) {
            cache.mark_dirty([user])?;
        }
        fs::write(config_path, format!("{user}\n"))?;
        Ok(())
    }
}

#[test]
fn mark_during_login_survives_for_next_use() {
    let temp = tempfile::tempdir().expect("tempdir");
    let slot = Arc::new(OnceLock::new());
    let logins = Arc::new(AtomicUsize::new(0));
    let cache = Arc::new(
        CredentialCache::new(ResyncDuringLogin {
            cache: Arc::clone(&slot),
            logins: Arc::clone(&logins),
        })
        .with_artifact_dir(temp.path())
        .with_env(|_| None),
    );
    slot.set(Arc::downgrade(&cache)).expect("set cache");

    let first = cache.ensure_session("alice").expect("first session");
    assert_eq!(logins.load(Ordering::SeqCst), 1);
    assert!(cache.is_dirty("alice").expect("dirty"));

    let second = cache.ensure_session("alice").expect("refreshed session");
    assert_eq!(first, second);
    assert_eq!(logins.load(Ordering::SeqCst), 2);
    assert!(!cache.is_dirty("alice").expect("dirty"));

    cache.ensure_session("alice").expect("cached session");
    assert_eq!(logins.load(Ordering::SeqCst), 2);
}

#[test]
fn run_all_keeps_input_order_across_workers() {
    let temp = tempfile::tempdir().expect("tempdir");
    let cluster = FakeCluster::default().with_lag(2);
    let ctx = cluster.context(fast_config(), temp.path());

    let scenarios: Vec<ScenarioFile> = (1..=6)
        .map(|n| {
            toml::from_str(&format!(
                r#"
name = "PIPELINES-28-TC{n:02}"
namespace = "mag-tc{n:02}"
tags = ["approvalgate-users"]

[[steps]]
kind = "ensure-group"
group = "approvers"
users = ["alice", "user{n}"]

[[steps]]
kind = "create-run"
approvers = ["group:approvers"]
required = 1

[[steps]]
kind = "act"
user = "user{n}"
action = "approve"

[[steps]]
kind = "wait-state"
state = "approved"
"#
            ))
            .expect("parse scenario")
        })
        .collect();

    let reports = run_all(&ctx, &scenarios, 3).expect("run all");

    let names: Vec<&str> = reports.iter().map(|report| report.name.as_str()).collect();
    let expected: Vec<&str> = scenarios.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, expected);
    for report in &reports {
        assert!(report.passed, "{}: {:?}", report.name, report.failure);
        assert_eq!(report.cleaned_groups, 1);
    }
    assert_eq!(cluster.auth.login_count("alice"), 0);
    for n in 1..=6 {
        assert_eq!(cluster.auth.login_count(&format!("user{n}")), 1);
    }
}
