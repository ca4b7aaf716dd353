//! Session registry: records every login decision with its risk assessment.

use chrono::Utc;
use std::sync::Arc;

use super::models::{
    CloseOutcome, LoginAttempt, LoginHistoryFilter, LoginHistoryPage, LoginOutcome, LoginSession,
    LoginSummary, NewLoginSession, RecordedAttempt, SessionId,
};
use super::{SessionError, SessionResult};
use crate::audit::{AuditEventType, AuditLog, NewAuditEvent};
use crate::auth::{Account, AccountId, Actor};
use crate::db::{AccountRepository, Pagination, SessionRepository};
use crate::risk::{AssessmentInput, DeviceSignal, PreviousLogin, RiskEngine, RiskStatus};

/// Stores login outcomes and answers activity queries
pub struct SessionRegistry {
    accounts: Arc<dyn AccountRepository>,
    sessions: Arc<dyn SessionRepository>,
    engine: RiskEngine,
    audit: AuditLog,
}

impl SessionRegistry {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        sessions: Arc<dyn SessionRepository>,
        engine: RiskEngine,
        audit: AuditLog,
    ) -> Self {
        Self {
            accounts,
            sessions,
            engine,
            audit,
        }
    }

    pub fn engine(&self) -> &RiskEngine {
        &self.engine
    }

    /// Score and persist one login attempt.
    ///
    /// Failed attempts bump the account's counter before scoring, so the
    /// assessment sees the attempt being recorded. Successful attempts are
    /// refused with [`SessionError::AccountLocked`] if the account was locked
    /// concurrently.
    pub async fn record_attempt(&self, attempt: LoginAttempt<'_>) -> SessionResult<RecordedAttempt> {
        let now = Utc::now();
        let account_id = attempt.account.id;

        let account = match attempt.outcome {
            LoginOutcome::BadCredentials => self
                .accounts
                .increment_failed_attempts(account_id)
                .await?
                .ok_or(SessionError::AccountNotFound(account_id))?,
            LoginOutcome::Success | LoginOutcome::DeviceRejected => attempt.account.clone(),
        };

        let window_start = now - self.engine.config().failed_window;
        let mut failed_in_window = self
            .sessions
            .count_failed_since(account_id, window_start)
            .await?;
        if attempt.outcome == LoginOutcome::BadCredentials {
            failed_in_window += 1;
        }

        let previous_login = self
            .sessions
            .last_successful(account_id)
            .await?
            .map(|s| PreviousLogin {
                at: s.login_at,
                latitude: s.geo.latitude,
                longitude: s.geo.longitude,
            });

        let device = match (attempt.device, attempt.unregistered_device) {
            (Some(device), _) => DeviceSignal::Known(device),
            (None, true) => DeviceSignal::Unregistered,
            (None, false) => DeviceSignal::Absent,
        };

        let assessment = self.engine.assess(&AssessmentInput {
            account: &account,
            device,
            geo: &attempt.geo,
            previous_login: previous_login.as_ref(),
            failed_in_window: u32::try_from(failed_in_window).unwrap_or(u32::MAX),
            degraded: &attempt.degraded,
            now,
        });

        let new = NewLoginSession {
            account_id,
            device_id: attempt.device.map(|d| d.id),
            ip_address: attempt.ip_address.clone(),
            geo: attempt.geo.clone(),
            assessment: assessment.clone(),
            outcome: attempt.outcome,
            login_at: now,
        };

        let (session, account) = match attempt.outcome {
            LoginOutcome::Success => {
                let country = attempt.geo.comparable_country().map(str::to_string);
                self.sessions
                    .insert_success(new, country)
                    .await?
                    .ok_or(SessionError::AccountLocked)?
            }
            LoginOutcome::BadCredentials | LoginOutcome::DeviceRejected => {
                (self.sessions.insert_attempt(new).await?, account)
            }
        };

        let (event_type, details) = match session.outcome {
            LoginOutcome::Success => (
                AuditEventType::LoginSuccess,
                format!(
                    "Login for {} from {} ({})",
                    account.username,
                    session.geo.display_location(),
                    session.status
                ),
            ),
            LoginOutcome::BadCredentials => (
                AuditEventType::LoginFailed,
                format!(
                    "Failed login for {} ({} consecutive)",
                    account.username, account.failed_login_attempts
                ),
            ),
            LoginOutcome::DeviceRejected => (
                AuditEventType::DeviceRejected,
                format!("Login for {} rejected: device not trusted", account.username),
            ),
        };
        self.audit
            .record_best_effort(
                NewAuditEvent::new(event_type, details)
                    .account(account_id)
                    .device(session.device_id)
                    .ip(session.ip_address.clone())
                    .risk(&assessment)
                    .at(now),
            )
            .await;

        if session.status != RiskStatus::Normal {
            log::warn!(
                "Login session {} for {} scored {} ({}): {:?}",
                session.id,
                account.username,
                session.risk_score,
                session.status,
                session.risk_factors
            );
        }

        Ok(RecordedAttempt { session, account })
    }

    /// Close a session. Closing an already closed session changes nothing.
    pub async fn close_session(&self, session_id: SessionId) -> SessionResult<CloseOutcome> {
        let outcome = self
            .sessions
            .close(session_id, Utc::now())
            .await?
            .ok_or(SessionError::NotFound(session_id))?;

        if outcome.changed() {
            let session = outcome.session();
            self.audit
                .record_best_effort(
                    NewAuditEvent::new(
                        AuditEventType::SessionClosed,
                        format!("Session {} closed", session.id),
                    )
                    .account(session.account_id)
                    .device(session.device_id),
                )
                .await;
        }

        Ok(outcome)
    }

    /// Close another account's session; admins may only close `user` sessions
    pub async fn force_close(&self, actor: Actor, session_id: SessionId) -> SessionResult<CloseOutcome> {
        let policy = actor.role.policy();
        if !policy.can_view_activity {
            return Err(SessionError::Forbidden);
        }

        let session = self.find(session_id).await?;
        let owner = self.account(session.account_id).await?;
        if owner.id != actor.account_id && !policy.may_target(owner.role) {
            return Err(SessionError::Forbidden);
        }

        self.close_session(session_id).await
    }

    pub async fn find(&self, session_id: SessionId) -> SessionResult<LoginSession> {
        self.sessions
            .find(session_id)
            .await?
            .ok_or(SessionError::NotFound(session_id))
    }

    async fn account(&self, account_id: AccountId) -> SessionResult<Account> {
        self.accounts
            .find_by_id(account_id)
            .await?
            .ok_or(SessionError::AccountNotFound(account_id))
    }

    /// Newest-first login history with a summary over the whole filtered set
    pub async fn login_history(&self, filter: LoginHistoryFilter) -> SessionResult<LoginHistoryPage> {
        if let Some(min) = filter.min_risk_score {
            if !(0.0..=1.0).contains(&min) {
                return Err(SessionError::InvalidFilter(
                    "min_risk_score must be between 0 and 1".to_string(),
                ));
            }
        }

        let filter = LoginHistoryFilter {
            page: filter.page.normalized(),
            ..filter
        };
        let (data, counts) = self.sessions.history(&filter).await?;

        Ok(LoginHistoryPage {
            data,
            summary: LoginSummary::from(counts),
            pagination: Pagination::new(counts.total, filter.page),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{NewAccount, Role};
    use crate::db::MemoryStore;
    use crate::geo::{GeoContext, GeoSource};

    struct Fixture {
        store: Arc<MemoryStore>,
        registry: SessionRegistry,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let registry = SessionRegistry::new(
            store.clone(),
            store.clone(),
            RiskEngine::default(),
            AuditLog::new(store.clone()),
        );
        Fixture { store, registry }
    }

    async fn account(store: &MemoryStore, username: &str, role: Role) -> Account {
        AccountRepository::insert(
            store,
            NewAccount {
                username: username.to_string(),
                credential_hash: "hash".to_string(),
                role,
                created_at: Utc::now(),
            },
        )
        .await
        .unwrap()
    }

    fn geo(country: &str) -> GeoContext {
        GeoContext {
            country: Some(country.to_string()),
            city: None,
            latitude: None,
            longitude: None,
            accuracy_m: None,
            source: GeoSource::IpLookup,
        }
    }

    fn attempt<'a>(account: &'a Account, outcome: LoginOutcome, country: &str) -> LoginAttempt<'a> {
        LoginAttempt {
            account,
            device: None,
            unregistered_device: false,
            ip_address: "203.0.113.7".to_string(),
            geo: geo(country),
            degraded: Vec::new(),
            outcome,
        }
    }

    async fn login(f: &Fixture, id: AccountId, outcome: LoginOutcome, country: &str) -> RecordedAttempt {
        let account = AccountRepository::find_by_id(&*f.store, id)
            .await
            .unwrap()
            .unwrap();
        f.registry
            .record_attempt(attempt(&account, outcome, country))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_failed_attempts_accumulate() {
        let f = fixture();
        let alice = account(&f.store, "alice", Role::User).await;

        for expected in 1..=3 {
            let recorded = login(&f, alice.id, LoginOutcome::BadCredentials, "DE").await;
            assert_eq!(recorded.account.failed_login_attempts, expected);
            assert!(!recorded.session.is_active);
        }

        let recorded = login(&f, alice.id, LoginOutcome::Success, "DE").await;
        assert_eq!(recorded.account.failed_login_attempts, 0);
        assert_eq!(recorded.account.last_login_country.as_deref(), Some("DE"));
        assert!(recorded.session.is_active);
    }

    #[tokio::test]
    async fn test_close_session_is_idempotent() {
        let f = fixture();
        let alice = account(&f.store, "alice", Role::User).await;
        let session = login(&f, alice.id, LoginOutcome::Success, "DE").await.session;

        let first = f.registry.close_session(session.id).await.unwrap();
        assert!(first.changed());
        let logout_at = first.session().logout_at;

        let second = f.registry.close_session(session.id).await.unwrap();
        assert!(!second.changed());
        assert_eq!(second.session().logout_at, logout_at);

        assert!(matches!(
            f.registry.close_session(999).await,
            Err(SessionError::NotFound(999))
        ));
    }

    #[tokio::test]
    async fn test_admin_cannot_close_admin_sessions() {
        let f = fixture();
        let admin = account(&f.store, "admin", Role::Admin).await;
        let other = account(&f.store, "other-admin", Role::Admin).await;
        let user = account(&f.store, "bob", Role::User).await;

        let other_session = login(&f, other.id, LoginOutcome::Success, "DE").await.session;
        let user_session = login(&f, user.id, LoginOutcome::Success, "DE").await.session;

        assert!(matches!(
            f.registry.force_close(admin.actor(), other_session.id).await,
            Err(SessionError::Forbidden)
        ));
        assert!(
            f.registry
                .force_close(admin.actor(), user_session.id)
                .await
                .unwrap()
                .changed()
        );
        assert!(matches!(
            f.registry.force_close(user.actor(), user_session.id).await,
            Err(SessionError::Forbidden)
        ));
    }

    #[tokio::test]
    async fn test_history_filters_and_summary() {
        let f = fixture();
        let alice = account(&f.store, "alice", Role::User).await;
        login(&f, alice.id, LoginOutcome::Success, "DE").await;
        login(&f, alice.id, LoginOutcome::Success, "FR").await;

        let page = f
            .registry
            .login_history(LoginHistoryFilter::default())
            .await
            .unwrap();
        assert_eq!(page.summary.total_logins, 2);
        assert_eq!(page.data[0].geo.country.as_deref(), Some("FR"));
        assert_eq!(page.data[0].status, RiskStatus::Normal);
        assert_eq!(page.pagination.total_pages, 1);

        let fr_only = f
            .registry
            .login_history(LoginHistoryFilter {
                country: Some("fr".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(fr_only.data.len(), 1);

        let bad = f
            .registry
            .login_history(LoginHistoryFilter {
                min_risk_score: Some(1.5),
                ..Default::default()
            })
            .await;
        assert!(matches!(bad, Err(SessionError::InvalidFilter(_))));
    }
}
