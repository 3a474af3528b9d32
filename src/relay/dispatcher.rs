//! The relay entry point: token in, command into the right terminal out.

use super::failure::{FailureContext, FailureReporter};
use super::injector::{InjectionError, TerminalInjector};
use crate::session::{is_lookup_token, SessionMutation, SessionState, SessionStore, StoreError};
use crate::util::unix_now;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Upper bound on one whole injection (every tmux call plus verification).
pub const DEFAULT_INJECTION_DEADLINE: Duration = Duration::from_secs(8);

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid token format: {0:?}")]
    InvalidToken(String),
    #[error("token {0} is unknown or expired")]
    UnknownOrExpiredToken(String),
    #[error("token {token} has used {used} of {max} commands")]
    QuotaExceeded { token: String, used: u32, max: u32 },
    #[error("injection failed for token {token}: {error}")]
    InjectionFailed {
        token: String,
        #[source]
        error: InjectionError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Successful relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchReceipt {
    pub token: String,
    pub session: String,
    /// Commands relayed through this token so far, including this one.
    pub command_count: u32,
    pub echoed: bool,
}

/// Validates a token, injects once through tmux and alerts on failure.
pub struct RelayDispatcher {
    store: Arc<dyn SessionStore>,
    injector: Arc<dyn TerminalInjector>,
    reporter: Arc<dyn FailureReporter>,
    deadline: Duration,
    in_flight: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl RelayDispatcher {
    pub fn new(
        store: Arc<dyn SessionStore>,
        injector: Arc<dyn TerminalInjector>,
        reporter: Arc<dyn FailureReporter>,
    ) -> Self {
        Self {
            store,
            injector,
            reporter,
            deadline: DEFAULT_INJECTION_DEADLINE,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Bound the whole injection, not just each tmux call. Clamped to 1s minimum.
    #[must_use]
    pub fn with_injection_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline.max(Duration::from_secs(1));
        self
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    /// Relay `command` and report the outcome as a plain boolean.
    ///
    /// `true` means the command reached the terminal. On `false` the reason
    /// has been logged and, for injection failures, an alert dispatched.
    pub async fn inject_command_remote(&self, token: &str, command: &str) -> bool {
        match self.dispatch(token, command).await {
            Ok(_) => true,
            Err(RelayError::InjectionFailed { .. }) => false,
            Err(e) => {
                tracing::warn!(token = %token, error = %e, "relay rejected");
                false
            }
        }
    }

    /// Relay `command` with a typed outcome.
    pub async fn dispatch(
        &self,
        token: &str,
        command: &str,
    ) -> Result<DispatchReceipt, RelayError> {
        let token = token.trim().to_ascii_uppercase();
        if !is_lookup_token(&token) {
            return Err(RelayError::InvalidToken(token));
        }

        // Commands for one token are delivered one at a time so the quota
        // check and the counter update cannot interleave.
        let gate = GateHandle::acquire(self, &token);
        let _guard = gate.gate.lock().await;
        self.dispatch_locked(&token, command).await
    }

    async fn dispatch_locked(
        &self,
        token: &str,
        command: &str,
    ) -> Result<DispatchReceipt, RelayError> {
        let session = self
            .store
            .lookup_at(token, unix_now())?
            .ok_or_else(|| RelayError::UnknownOrExpiredToken(token.to_string()))?;

        match session.state(unix_now()) {
            SessionState::Expired => {
                return Err(RelayError::UnknownOrExpiredToken(token.to_string()));
            }
            SessionState::Exhausted => {
                return Err(RelayError::QuotaExceeded {
                    token: token.to_string(),
                    used: session.command_count,
                    max: session.max_commands,
                });
            }
            SessionState::Waiting | SessionState::Consumed => {}
        }

        let attempt = tokio::time::timeout(
            self.deadline,
            self.injector.inject_command_full(token, command),
        )
        .await
        .unwrap_or_else(|_| {
            Err(InjectionError::Timeout {
                secs: self.deadline.as_secs(),
            })
        });

        match attempt {
            Ok(receipt) => {
                tracing::info!(
                    token = %token,
                    session = %receipt.session,
                    "Tmux remote injection successful"
                );
                let command_count = match self.store.touch(token, SessionMutation::RecordCommand) {
                    Ok(updated) => updated.command_count,
                    Err(e) => {
                        // The command is already in the terminal; report delivery
                        // even though the counter could not be persisted.
                        tracing::error!(
                            token = %token,
                            error = %e,
                            "failed to record relayed command"
                        );
                        session.command_count.saturating_add(1)
                    }
                };
                Ok(DispatchReceipt {
                    token: token.to_string(),
                    session: receipt.session,
                    command_count,
                    echoed: receipt.echoed,
                })
            }
            Err(error) => {
                tracing::error!(
                    token = %token,
                    error = %error,
                    "Tmux injection failed - tmux is the only reliable method for unattended automation"
                );
                self.reporter
                    .report(&FailureContext {
                        token: token.to_string(),
                        target_session: session.target_session.clone(),
                        cwd: session.cwd.clone(),
                        command: command.to_string(),
                        error: error.to_string(),
                    })
                    .await;
                Err(RelayError::InjectionFailed {
                    token: token.to_string(),
                    error,
                })
            }
        }
    }

    fn release_gate(&self, token: &str) {
        let mut in_flight = self.in_flight.lock();
        if in_flight
            .get(token)
            .is_some_and(|gate| Arc::strong_count(gate) == 1)
        {
            in_flight.remove(token);
        }
    }
}

/// A caller's share of a token's gate. Dropping it, including when the
/// dispatch future is cancelled, forgets the gate once nobody else holds it.
struct GateHandle<'a> {
    dispatcher: &'a RelayDispatcher,
    token: &'a str,
    gate: Arc<tokio::sync::Mutex<()>>,
}

impl<'a> GateHandle<'a> {
    fn acquire(dispatcher: &'a RelayDispatcher, token: &'a str) -> Self {
        let gate = dispatcher
            .in_flight
            .lock()
            .entry(token.to_string())
            .or_default()
            .clone();
        Self {
            dispatcher,
            token,
            gate,
        }
    }
}

impl Drop for GateHandle<'_> {
    fn drop(&mut self) {
        drop(std::mem::take(&mut self.gate));
        self.dispatcher.release_gate(self.token);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::injector::InjectionReceipt;
    use crate::session::{InMemorySessionStore, SessionDraft, SessionStatus};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct StubInjector {
        fail_with: Option<String>,
        calls: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl TerminalInjector for StubInjector {
        async fn inject_command_full(
            &self,
            token: &str,
            command: &str,
        ) -> Result<InjectionReceipt, InjectionError> {
            self.calls.lock().push((token.into(), command.into()));
            match &self.fail_with {
                Some(msg) => Err(InjectionError::Backend(msg.clone())),
                None => Ok(InjectionReceipt {
                    session: "claude-taskping".into(),
                    echoed: true,
                }),
            }
        }
    }

    /// Never finishes, like a tmux call stuck on a wedged server.
    struct HangingInjector;

    #[async_trait]
    impl TerminalInjector for HangingInjector {
        async fn inject_command_full(
            &self,
            _token: &str,
            _command: &str,
        ) -> Result<InjectionReceipt, InjectionError> {
            std::future::pending().await
        }
    }

    #[derive(Default)]
    struct CountingReporter {
        reports: Mutex<Vec<FailureContext>>,
    }

    #[async_trait]
    impl FailureReporter for CountingReporter {
        async fn report(&self, ctx: &FailureContext) {
            self.reports.lock().push(ctx.clone());
        }
    }

    struct Fixture {
        store: Arc<InMemorySessionStore>,
        injector: Arc<StubInjector>,
        reporter: Arc<CountingReporter>,
        dispatcher: RelayDispatcher,
    }

    fn fixture(injector: StubInjector) -> Fixture {
        let store = Arc::new(InMemorySessionStore::new());
        let injector = Arc::new(injector);
        let reporter = Arc::new(CountingReporter::default());
        let dispatcher = RelayDispatcher::new(store.clone(), injector.clone(), reporter.clone());
        Fixture {
            store,
            injector,
            reporter,
            dispatcher,
        }
    }

    fn seed(store: &InMemorySessionStore, token: &str, max_commands: u32) {
        let mut draft = SessionDraft::new("claude-taskping", "/work/app");
        draft.max_commands = max_commands;
        store.insert(draft.into_session(token.into(), format!("id-{token}"), unix_now()));
    }

    #[tokio::test]
    async fn success_counts_one_command() {
        let f = fixture(StubInjector::default());
        seed(&f.store, "ABCD1234", 10);

        let receipt = f.dispatcher.dispatch("ABCD1234", "ls").await.unwrap();
        assert_eq!(receipt.command_count, 1);
        assert_eq!(receipt.session, "claude-taskping");

        let stored = f.store.get("ABCD1234").unwrap().unwrap();
        assert_eq!(stored.command_count, 1);
        assert_eq!(stored.status, SessionStatus::Consumed);
        assert!(f.reporter.reports.lock().is_empty());
    }

    #[tokio::test]
    async fn token_is_normalized_before_lookup() {
        let f = fixture(StubInjector::default());
        seed(&f.store, "ABCD1234", 10);

        assert!(f.dispatcher.inject_command_remote(" abcd1234 ", "ls").await);
        assert_eq!(f.injector.calls.lock()[0].0, "ABCD1234");
    }

    #[tokio::test]
    async fn malformed_token_is_rejected_without_lookup() {
        let f = fixture(StubInjector::default());
        let err = f.dispatcher.dispatch("no!", "ls").await.unwrap_err();
        assert!(matches!(err, RelayError::InvalidToken(_)));
        assert!(f.injector.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn unknown_token_fails_quietly() {
        let f = fixture(StubInjector::default());
        assert!(!f.dispatcher.inject_command_remote("ZZZZ9999", "ls").await);
        assert!(f.injector.calls.lock().is_empty());
        assert!(f.reporter.reports.lock().is_empty());
    }

    #[tokio::test]
    async fn expired_token_fails_quietly() {
        let f = fixture(StubInjector::default());
        let mut draft = SessionDraft::new("claude-taskping", "/work/app");
        draft.ttl_secs = 10;
        f.store
            .insert(draft.into_session("OLD00000".into(), "old".into(), unix_now() - 100));

        let err = f.dispatcher.dispatch("OLD00000", "ls").await.unwrap_err();
        assert!(matches!(err, RelayError::UnknownOrExpiredToken(_)));
        assert!(f.injector.calls.lock().is_empty());
        assert!(f.reporter.reports.lock().is_empty());
    }

    #[tokio::test]
    async fn exhausted_quota_is_rejected() {
        let f = fixture(StubInjector::default());
        seed(&f.store, "ABCD1234", 1);

        assert!(f.dispatcher.inject_command_remote("ABCD1234", "first").await);
        let err = f.dispatcher.dispatch("ABCD1234", "second").await.unwrap_err();
        assert!(matches!(err, RelayError::QuotaExceeded { used: 1, max: 1, .. }));
        assert_eq!(f.injector.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn injection_failure_reports_once_and_keeps_counter() {
        let f = fixture(StubInjector {
            fail_with: Some("connection refused".into()),
            ..StubInjector::default()
        });
        seed(&f.store, "FAIL1234", 10);

        assert!(!f.dispatcher.inject_command_remote("FAIL1234", "npm test").await);

        let reports = f.reporter.reports.lock().clone();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].command, "npm test");
        assert_eq!(reports[0].error, "connection refused");
        assert_eq!(reports[0].target_session, "claude-taskping");
        assert_eq!(f.injector.calls.lock().len(), 1);
        assert_eq!(f.store.get("FAIL1234").unwrap().unwrap().command_count, 0);
    }

    #[tokio::test]
    async fn concurrent_commands_respect_quota() {
        let f = Arc::new(fixture(StubInjector::default()));
        seed(&f.store, "RACE0000", 3);

        let accepted = Arc::new(AtomicUsize::new(0));
        let mut handles = Vec::new();
        for i in 0..8 {
            let f = f.clone();
            let accepted = accepted.clone();
            handles.push(tokio::spawn(async move {
                if f.dispatcher.inject_command_remote("RACE0000", &format!("cmd {i}")).await {
                    accepted.fetch_add(1, Ordering::SeqCst);
                }
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        assert_eq!(accepted.load(Ordering::SeqCst), 3);
        assert_eq!(f.store.get("RACE0000").unwrap().unwrap().command_count, 3);
        assert!(f.dispatcher.in_flight.lock().is_empty());
    }

    #[tokio::test]
    async fn cancelled_dispatch_releases_its_gate() {
        let store = Arc::new(InMemorySessionStore::new());
        seed(&store, "HANG0001", 10);
        let dispatcher = RelayDispatcher::new(
            store,
            Arc::new(HangingInjector),
            Arc::new(CountingReporter::default()),
        )
        .with_injection_deadline(Duration::from_secs(60));

        let outcome = tokio::time::timeout(
            Duration::from_millis(50),
            dispatcher.dispatch("HANG0001", "ls"),
        )
        .await;

        assert!(outcome.is_err());
        assert!(dispatcher.in_flight.lock().is_empty());
    }

    #[tokio::test]
    async fn cancelled_waiter_releases_its_gate() {
        let store = Arc::new(InMemorySessionStore::new());
        seed(&store, "HANG0002", 10);
        let dispatcher = RelayDispatcher::new(
            store,
            Arc::new(HangingInjector),
            Arc::new(CountingReporter::default()),
        )
        .with_injection_deadline(Duration::from_secs(60));

        let holder = dispatcher.dispatch("HANG0002", "first");
        let waiter = dispatcher.dispatch("HANG0002", "second");
        let both = async { tokio::join!(holder, waiter) };
        assert!(tokio::time::timeout(Duration::from_millis(50), both).await.is_err());

        assert!(dispatcher.in_flight.lock().is_empty());
    }

    #[tokio::test]
    async fn stuck_injection_hits_the_deadline_and_is_reported() {
        let store = Arc::new(InMemorySessionStore::new());
        seed(&store, "SLOW0001", 10);
        let reporter = Arc::new(CountingReporter::default());
        let dispatcher =
            RelayDispatcher::new(store.clone(), Arc::new(HangingInjector), reporter.clone())
                .with_injection_deadline(Duration::from_secs(1));

        let err = dispatcher.dispatch("SLOW0001", "make").await.unwrap_err();

        assert!(matches!(
            err,
            RelayError::InjectionFailed {
                error: InjectionError::Timeout { secs: 1 },
                ..
            }
        ));
        let reports = reporter.reports.lock().clone();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].command, "make");
        assert_eq!(store.get("SLOW0001").unwrap().unwrap().command_count, 0);
        assert!(dispatcher.in_flight.lock().is_empty());
    }

    #[test]
    fn deadline_is_clamped_to_one_second() {
        let dispatcher = RelayDispatcher::new(
            Arc::new(InMemorySessionStore::new()),
            Arc::new(HangingInjector),
            Arc::new(CountingReporter::default()),
        )
        .with_injection_deadline(Duration::ZERO);
        assert_eq!(dispatcher.deadline, Duration::from_secs(1));
    }
}
