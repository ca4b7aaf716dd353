//! Authentication manager implementation.

use super::{
    errors::{AuthError, AuthResult},
    models::{
        Account, FederatedLogin, LoginContext, LoginRequest, LoginResult, NewAccount, Principal,
        RegisterRequest, Role, TokenClaims, TokenPair, TokenType,
    },
};
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use std::sync::{Arc, LazyLock};

use crate::audit::{AuditEventType, AuditLog, NewAuditEvent};
use crate::db::{AccountRepository, StoreError};
use crate::device::{Device, DeviceRegistry, DeviceStatus};
use crate::geo::{BrowserLocation, GeoResolver};
use crate::lockdown::LockdownWorkflow;
use crate::risk::{RiskAssessment, RiskStatus};
use crate::session::{LoginAttempt, LoginOutcome, LoginSession, SessionError, SessionRegistry};

/// Hash checked for unknown usernames so they cost the same Argon2 work as
/// a wrong password
static UNKNOWN_USER_HASH: LazyLock<Option<String>> = LazyLock::new(|| {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(b"unknown-user-placeholder", &salt)
        .ok()
        .map(|hash| hash.to_string())
});

/// Token lifetimes and lockout policy
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub pepper: String,
    pub access_token_ttl: Duration,
    pub refresh_token_ttl: Duration,
    /// Consecutive failures that lock the account; 0 disables
    pub auto_lock_failed_attempts: u32,
    /// Lock the account instead of issuing tokens for a critical login
    pub auto_lock_on_critical: bool,
}

impl AuthConfig {
    pub fn new(jwt_secret: impl Into<String>, pepper: impl Into<String>) -> Self {
        Self {
            jwt_secret: jwt_secret.into(),
            pepper: pepper.into(),
            access_token_ttl: Duration::minutes(15),
            refresh_token_ttl: Duration::days(7),
            auto_lock_failed_attempts: 5,
            auto_lock_on_critical: false,
        }
    }
}

/// Services the login path depends on
#[derive(Clone)]
pub struct AuthServices {
    pub accounts: Arc<dyn AccountRepository>,
    pub geo: GeoResolver,
    pub devices: Arc<DeviceRegistry>,
    pub sessions: Arc<SessionRegistry>,
    pub lockdown: Arc<LockdownWorkflow>,
    pub audit: AuditLog,
}

/// How the caller proved their identity
enum Credentials<'a> {
    Password(&'a str),
    Federated,
}

/// Authentication manager
#[derive(Clone)]
pub struct AuthManager {
    services: AuthServices,
    config: AuthConfig,
}

impl AuthManager {
    /// Create a new authentication manager
    pub fn new(services: AuthServices, config: AuthConfig) -> Self {
        Self { services, config }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// Register a new `user` account
    ///
    /// # Errors
    ///
    /// * `AuthError::UsernameTaken` - Username already exists
    /// * `AuthError::InvalidUsername` - Username format invalid
    /// * `AuthError::WeakPassword` - Password too weak
    pub async fn register(&self, request: RegisterRequest) -> AuthResult<Account> {
        self.create_account(&request.username, &request.password, Role::User)
            .await
    }

    /// Create an account with an explicit role
    pub async fn create_account(
        &self,
        username: &str,
        password: &str,
        role: Role,
    ) -> AuthResult<Account> {
        validate_username(username)?;
        validate_password(password)?;

        let credential_hash = self.hash_password(password)?;
        let account = self
            .services
            .accounts
            .insert(NewAccount {
                username: username.to_string(),
                credential_hash,
                role,
                created_at: Utc::now(),
            })
            .await
            .map_err(|e| match e {
                StoreError::Conflict(_) => AuthError::UsernameTaken,
                other => other.into(),
            })?;

        log::info!("Created {} account {}", account.role, account.username);
        Ok(account)
    }

    /// Create the first superadmin unless the username already exists
    pub async fn bootstrap_superadmin(&self, username: &str, password: &str) -> AuthResult<bool> {
        if self
            .services
            .accounts
            .find_by_username(username)
            .await?
            .is_some()
        {
            return Ok(false);
        }

        match self.create_account(username, password, Role::Superadmin).await {
            Ok(_) => Ok(true),
            Err(AuthError::UsernameTaken) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Password login
    ///
    /// # Errors
    ///
    /// * `AuthError::InvalidCredentials` - Unknown user or wrong password
    /// * `AuthError::AccountLocked` - Account is locked (also after an auto-lock)
    /// * `AuthError::DeviceRejected` - Revoked device or one bound to another account
    pub async fn login(&self, request: LoginRequest, context: &LoginContext) -> AuthResult<LoginResult> {
        self.authenticate_login(
            &request.username,
            Credentials::Password(&request.password),
            request.device_uuid.as_deref(),
            request.browser_location.as_ref(),
            context,
        )
        .await
    }

    /// Success path for a principal an identity provider already authenticated.
    ///
    /// No password is checked; lock, device and risk handling are the same as
    /// for [`login`](Self::login).
    pub async fn complete_federated_login(
        &self,
        login: FederatedLogin,
        context: &LoginContext,
    ) -> AuthResult<LoginResult> {
        self.authenticate_login(
            &login.username,
            Credentials::Federated,
            login.device_uuid.as_deref(),
            login.browser_location.as_ref(),
            context,
        )
        .await
    }

    async fn authenticate_login(
        &self,
        username: &str,
        credentials: Credentials<'_>,
        device_uuid: Option<&str>,
        browser_location: Option<&BrowserLocation>,
        context: &LoginContext,
    ) -> AuthResult<LoginResult> {
        let account = self.services.accounts.find_by_username(username).await?;

        let Some(account) = account else {
            if let Credentials::Password(password) = credentials {
                // Result ignored; the outcome is InvalidCredentials either way
                let _ = self.verify_password(password, unknown_user_hash());
            }
            self.services
                .audit
                .record_best_effort(
                    NewAuditEvent::new(
                        AuditEventType::LoginFailed,
                        format!("Failed login for unknown user {username}"),
                    )
                    .ip(context.ip_address.clone()),
                )
                .await;
            return Err(AuthError::InvalidCredentials);
        };

        let resolution = self
            .services
            .geo
            .resolve(context.ip, browser_location)
            .await;
        let degraded: Vec<_> = resolution.degraded.into_iter().collect();

        let device = match device_uuid {
            Some(uuid) => self.services.devices.find_for_login(uuid).await?,
            None => None,
        };
        let unregistered_device = device_uuid.is_some() && device.is_none();

        let attempt = |outcome: LoginOutcome| LoginAttempt {
            account: &account,
            device: device.as_ref(),
            unregistered_device,
            ip_address: context.ip_address.clone(),
            geo: resolution.geo.clone(),
            degraded: degraded.clone(),
            outcome,
        };

        if let Credentials::Password(password) = credentials {
            if self.verify_password(password, &account.credential_hash).is_err() {
                let recorded = self
                    .services
                    .sessions
                    .record_attempt(attempt(LoginOutcome::BadCredentials))
                    .await?;
                self.apply_failure_policy(&recorded.account).await;
                return Err(AuthError::InvalidCredentials);
            }
        }

        if account.locked {
            self.services
                .audit
                .record_best_effort(
                    NewAuditEvent::new(
                        AuditEventType::LoginBlocked,
                        format!("Login for locked account {}", account.username),
                    )
                    .account(account.id)
                    .ip(context.ip_address.clone()),
                )
                .await;
            return Err(AuthError::AccountLocked);
        }

        if let Some(reason) = device.as_ref().and_then(|d| rejection_reason(d, &account)) {
            self.services
                .sessions
                .record_attempt(attempt(LoginOutcome::DeviceRejected))
                .await?;
            return Err(AuthError::DeviceRejected(reason));
        }

        let recorded = self
            .services
            .sessions
            .record_attempt(attempt(LoginOutcome::Success))
            .await
            .map_err(|e| match e {
                SessionError::AccountLocked => AuthError::AccountLocked,
                other => other.into(),
            })?;
        let session = recorded.session;

        if self.config.auto_lock_on_critical && session.status == RiskStatus::Critical {
            self.services
                .lockdown
                .system_lock(
                    account.id,
                    format!("Critical login risk {:.4}", session.risk_score),
                )
                .await?;
            return Err(AuthError::AccountLocked);
        }

        let tokens = self.issue_tokens(&account, &session)?;
        Ok(LoginResult {
            tokens,
            role: account.role,
            session_id: session.id,
            risk: RiskAssessment {
                score: session.risk_score,
                status: session.status,
                factors: session.risk_factors,
            },
        })
    }

    /// Lock the account once it reaches the failed-attempt threshold
    async fn apply_failure_policy(&self, account: &Account) {
        let threshold = self.config.auto_lock_failed_attempts;
        let failed = u32::try_from(account.failed_login_attempts).unwrap_or(0);
        if threshold == 0 || failed < threshold || account.locked {
            return;
        }

        let reason = format!("{failed} consecutive failed login attempts");
        if let Err(e) = self.services.lockdown.system_lock(account.id, reason).await {
            log::error!("Failed to auto-lock account {}: {e}", account.username);
        }
    }

    /// Exchange a refresh token for a new pair bound to the same session
    ///
    /// # Errors
    ///
    /// * `AuthError::InvalidToken` - Not a refresh token
    /// * `AuthError::SessionExpired` - Session closed
    /// * `AuthError::AccountLocked` - Account locked since the token was issued
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        let claims = self.decode_token(refresh_token, TokenType::Refresh)?;
        let (account, session) = self.active_session(&claims).await?;
        self.issue_tokens(&account, &session)
    }

    /// Resolve a bearer access token into the calling principal
    pub async fn authenticate(&self, access_token: &str) -> AuthResult<Principal> {
        let claims = self.decode_token(access_token, TokenType::Access)?;
        let (account, session) = self.active_session(&claims).await?;

        Ok(Principal {
            actor: account.actor(),
            session_id: session.id,
            device_id: session.device_id,
        })
    }

    /// Close the caller's session. Repeated calls succeed.
    pub async fn logout(&self, principal: &Principal) -> AuthResult<()> {
        self.services
            .sessions
            .close_session(principal.session_id)
            .await?;
        Ok(())
    }

    async fn active_session(&self, claims: &TokenClaims) -> AuthResult<(Account, LoginSession)> {
        let session = match self.services.sessions.find(claims.session_id).await {
            Ok(session) => session,
            Err(SessionError::NotFound(_)) => return Err(AuthError::SessionExpired),
            Err(e) => return Err(e.into()),
        };
        if !session.is_active || session.account_id != claims.sub {
            return Err(AuthError::SessionExpired);
        }
        if let Some(device_id) = session.device_id {
            let device = self.services.devices.find(device_id).await?;
            if device.is_some_and(|d| d.status == DeviceStatus::Revoked) {
                return Err(AuthError::SessionExpired);
            }
        }

        let account = self
            .services
            .accounts
            .find_by_id(claims.sub)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        if account.locked {
            return Err(AuthError::AccountLocked);
        }

        Ok((account, session))
    }

    fn issue_tokens(&self, account: &Account, session: &LoginSession) -> AuthResult<TokenPair> {
        Ok(TokenPair {
            access_token: self.encode_token(account, session, TokenType::Access)?,
            refresh_token: self.encode_token(account, session, TokenType::Refresh)?,
            token_type: "bearer".to_string(),
        })
    }

    fn encode_token(
        &self,
        account: &Account,
        session: &LoginSession,
        token_type: TokenType,
    ) -> AuthResult<String> {
        let now = Utc::now();
        let ttl = match token_type {
            TokenType::Access => self.config.access_token_ttl,
            TokenType::Refresh => self.config.refresh_token_ttl,
        };
        let claims = TokenClaims {
            sub: account.id,
            role: account.role,
            session_id: session.id,
            device_id: session.device_id,
            token_type,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
        };

        Ok(encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )?)
    }

    fn decode_token(&self, token: &str, expected: TokenType) -> AuthResult<TokenClaims> {
        let token_data = decode::<TokenClaims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &Validation::default(),
        )?;

        if token_data.claims.token_type != expected {
            return Err(AuthError::InvalidToken);
        }
        Ok(token_data.claims)
    }

    /// Hash password with Argon2id + pepper
    fn hash_password(&self, password: &str) -> AuthResult<String> {
        let peppered = format!("{}{}", password, self.config.pepper);
        let salt = SaltString::generate(&mut OsRng);

        Ok(Argon2::default()
            .hash_password(peppered.as_bytes(), &salt)
            .map_err(|_| AuthError::HashingFailed)?
            .to_string())
    }

    /// Verify password against hash
    fn verify_password(&self, password: &str, hash: &str) -> AuthResult<()> {
        let peppered = format!("{}{}", password, self.config.pepper);
        let parsed_hash = PasswordHash::new(hash).map_err(|_| AuthError::InvalidCredentials)?;

        Argon2::default()
            .verify_password(peppered.as_bytes(), &parsed_hash)
            .map_err(|_| AuthError::InvalidCredentials)
    }
}

fn unknown_user_hash() -> &'static str {
    UNKNOWN_USER_HASH.as_deref().unwrap_or_default()
}

/// Why a presented device may not be used, if it may not
fn rejection_reason(device: &Device, account: &Account) -> Option<String> {
    if device.status == DeviceStatus::Revoked {
        return Some(format!("device {} has been revoked", device.device_uuid));
    }
    if !device.usable_by(account.id) {
        return Some(format!(
            "device {} is registered to another account",
            device.device_uuid
        ));
    }
    None
}

/// 3-32 characters of letters, digits, `_`, `.` and `-`
fn validate_username(username: &str) -> AuthResult<()> {
    let len = username.chars().count();
    if !(3..=32).contains(&len) {
        return Err(AuthError::InvalidUsername(
            "Username must be 3-32 characters".to_string(),
        ));
    }

    if !username
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
    {
        return Err(AuthError::InvalidUsername(
            "Username can only contain letters, numbers, '_', '.' and '-'".to_string(),
        ));
    }

    Ok(())
}

/// Validate password strength
fn validate_password(password: &str) -> AuthResult<()> {
    if password.len() < 8 {
        return Err(AuthError::WeakPassword(
            "Password must be at least 8 characters".to_string(),
        ));
    }

    let has_digit = password.chars().any(|c| c.is_ascii_digit());
    let has_uppercase = password.chars().any(|c| c.is_ascii_uppercase());
    let has_lowercase = password.chars().any(|c| c.is_ascii_lowercase());

    if !has_digit || !has_uppercase || !has_lowercase {
        return Err(AuthError::WeakPassword(
            "Password must contain at least one number, one uppercase and one lowercase letter"
                .to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_rules() {
        assert!(validate_username("alice.smith-2").is_ok());
        assert!(validate_username("al").is_err());
        assert!(validate_username(&"a".repeat(33)).is_err());
        assert!(validate_username("alice smith").is_err());
    }

    #[test]
    fn test_unknown_user_hash_matches_account_hash_cost() {
        let reference = SaltString::generate(&mut OsRng);
        let account_hash = Argon2::default()
            .hash_password(b"Str0ngPass", &reference)
            .unwrap()
            .to_string();

        let account = PasswordHash::new(&account_hash).unwrap();
        let unknown = PasswordHash::new(unknown_user_hash()).unwrap();
        assert_eq!(unknown.algorithm, account.algorithm);
        assert_eq!(unknown.version, account.version);
        assert_eq!(unknown.params.to_string(), account.params.to_string());
    }

    #[test]
    fn test_password_rules() {
        assert!(validate_password("Str0ngPass").is_ok());
        assert!(validate_password("Sh0rt").is_err());
        assert!(validate_password("alllowercase1").is_err());
        assert!(validate_password("NoDigitsHere").is_err());
    }
}
