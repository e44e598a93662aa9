mod candidates;

pub use candidates::*;

use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::watch;

use crate::configs::Settings;

/// State of one search sweep. Owned by the engine; rebuilt whenever the
/// handheld's `/24` prefix changes so stale candidates never leak across
/// networks.
#[derive(Debug, Clone, Default)]
pub struct DiscoverySession {
    pub ip_prefix: Option<String>,
    pub tried: HashSet<String>,
    pub found_url: Option<String>,
    pub running: bool,
}

/// Result of one sweep. Exhaustion is a user-facing hint, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryOutcome {
    Found(String),
    Exhausted { prefix_hint: String },
    AlreadyRunning,
    Cancelled,
}

/// Time-boxed liveness probe against `<url>/health`.
///
/// The robot is only recognized when the response is 2xx *and* the body is
/// JSON; a captive portal or an unrelated service answering with HTML on
/// the same port must not be adopted. Every failure mode (refused, non-2xx,
/// non-JSON, timeout) resolves to `false`; nothing is surfaced as an error
/// because the caller's only move is "try the next candidate".
pub async fn probe(client: &reqwest::Client, url: &str, timeout: Duration) -> bool {
    let target = format!("{}/health", normalize_base_url(url));

    let response = match client.get(&target).timeout(timeout).send().await {
        Ok(response) => response,
        Err(error) => {
            tracing::trace!(url = %target, %error, "probe failed");
            return false;
        }
    };

    if !response.status().is_success() {
        return false;
    }

    response.json::<serde_json::Value>().await.is_ok()
}

fn lock_session(session: &Mutex<DiscoverySession>) -> MutexGuard<'_, DiscoverySession> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Clears `running` when a sweep ends, whichever way it ends. The sweep
/// future may be dropped mid-probe when its owning screen goes away, so
/// releasing on drop is the only path that always runs.
struct RunningGuard<'a> {
    session: &'a Mutex<DiscoverySession>,
}

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        lock_session(self.session).running = false;
    }
}

/// Finds the robot's current address by walking a prioritized candidate
/// list strictly in order, one probe at a time. Sequential on purpose:
/// parallel probing would hammer the handheld's radio and make "first
/// success wins" nondeterministic.
pub struct DiscoveryEngine {
    settings: Settings,
    http: reqwest::Client,
    // Never held across an await; a sync lock keeps it usable from Drop.
    session: Mutex<DiscoverySession>,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
}

impl DiscoveryEngine {
    pub fn new(settings: Settings) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            settings,
            http: reqwest::Client::new(),
            session: Mutex::new(DiscoverySession::default()),
            cancel_tx,
            cancel_rx,
        }
    }

    /// Swaps the HTTP client, mainly so tests can shorten timeouts.
    pub fn with_http(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    /// Cancels an in-flight sweep. Call when the owning screen goes away or
    /// the host's network prefix changes mid-sweep.
    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn session(&self) -> DiscoverySession {
        lock_session(&self.session).clone()
    }

    /// Runs one sweep. Only one runs at a time; a second caller gets
    /// `AlreadyRunning` instead of a competing sweep.
    pub async fn discover(
        &self,
        host_ip: Ipv4Addr,
        known_base_url: Option<&str>,
        known_status_ip: Option<Ipv4Addr>,
    ) -> DiscoveryOutcome {
        let prefix = prefix_of(host_ip);

        {
            let mut session = lock_session(&self.session);
            if session.running {
                return DiscoveryOutcome::AlreadyRunning;
            }
            if session.ip_prefix.as_deref() != Some(prefix.as_str()) {
                tracing::debug!(%prefix, "host prefix changed, resetting discovery session");
                *session = DiscoverySession::default();
                session.ip_prefix = Some(prefix.clone());
            }
            session.running = true;
        }
        let _running = RunningGuard {
            session: &self.session,
        };
        self.cancel_tx.send_replace(false);

        let mut candidates = build_candidates(
            host_ip,
            known_base_url,
            known_status_ip,
            &self.settings.robot,
        );
        if let Some(limit) = self.settings.discovery.sweep_limit {
            candidates.truncate(limit);
        }

        let timeout = Duration::from_millis(self.settings.discovery.probe_timeout_ms);
        tracing::info!(%prefix, count = candidates.len(), "starting discovery sweep");

        for candidate in candidates {
            if *self.cancel_rx.borrow() {
                tracing::debug!("discovery sweep cancelled");
                return DiscoveryOutcome::Cancelled;
            }

            if !lock_session(&self.session).tried.insert(candidate.clone()) {
                continue;
            }

            if probe(&self.http, &candidate, timeout).await {
                tracing::info!(url = %candidate, "robot found");
                lock_session(&self.session).found_url = Some(candidate.clone());
                return DiscoveryOutcome::Found(candidate);
            }
        }

        DiscoveryOutcome::Exhausted {
            prefix_hint: format!(
                "searching on {prefix}.x; enter the robot's IP manually if needed"
            ),
        }
    }
}
