use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    auth::{
        dto::PublicUser,
        error::AuthError,
        jwt::{JwtKeys, TokenPair},
        password,
        repo::{NewUser, SessionStore, User, UserStore},
    },
    mail::Mailer,
};

/// Result of register, login and refresh: a fresh token pair plus the user
/// projection embedded in it.
#[derive(Debug)]
pub struct AuthSession {
    pub tokens: TokenPair,
    pub user: PublicUser,
}

/// Orchestrates credential verification, token issuance and session state.
/// Holds its collaborators as injected trait objects; the composition root
/// decides which implementations back them.
#[derive(Clone)]
pub struct AuthService {
    users: Arc<dyn UserStore>,
    sessions: Arc<dyn SessionStore>,
    mailer: Arc<dyn Mailer>,
    keys: JwtKeys,
    api_url: String,
}

impl AuthService {
    pub fn new(
        users: Arc<dyn UserStore>,
        sessions: Arc<dyn SessionStore>,
        mailer: Arc<dyn Mailer>,
        keys: JwtKeys,
        api_url: String,
    ) -> Self {
        Self {
            users,
            sessions,
            mailer,
            keys,
            api_url,
        }
    }

    /// Issue a token pair for the user and persist the refresh token,
    /// replacing any previous session for that user.
    async fn open_session(&self, user: &User) -> Result<AuthSession, AuthError> {
        let public = PublicUser::from(user);
        let tokens = self.keys.issue_pair(&public)?;
        self.sessions.save(user.id, &tokens.refresh_token).await?;
        Ok(AuthSession {
            tokens,
            user: public,
        })
    }

    pub async fn register(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        if self.users.find_by_email(email).await?.is_some() {
            return Err(AuthError::DuplicateUser {
                email: email.to_string(),
            });
        }

        let password_hash = password::hash_password(password)?;
        let activation_link = Uuid::new_v4();
        let user = self
            .users
            .create(NewUser {
                email: email.to_string(),
                password_hash,
                activation_link,
            })
            .await?;

        // Best-effort: the account exists even if the mail never goes out.
        let activation_url = format!("{}/api/auth/activate/{}", self.api_url, activation_link);
        if let Err(e) = self
            .mailer
            .send_activation_mail(&user.email, &activation_url)
            .await
        {
            warn!(error = %e, user_id = %user.id, "activation mail failed");
        }

        info!(user_id = %user.id, email = %user.email, "user registered");
        self.open_session(&user).await
    }

    pub async fn activate(&self, activation_link: Uuid) -> Result<(), AuthError> {
        let mut user = self
            .users
            .find_by_activation_link(activation_link)
            .await?
            .ok_or(AuthError::InvalidActivationLink)?;
        user.is_activated = true;
        self.users.save(&user).await?;
        info!(user_id = %user.id, "account activated");
        Ok(())
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<AuthSession, AuthError> {
        let user = self
            .users
            .find_by_email(email)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        if !password::verify_password(password, &user.password_hash) {
            warn!(user_id = %user.id, "login with invalid password");
            return Err(AuthError::InvalidCredentials);
        }

        info!(user_id = %user.id, "user logged in");
        self.open_session(&user).await
    }

    pub async fn logout(&self, refresh_token: &str) -> Result<(), AuthError> {
        let removed = self.sessions.remove(refresh_token).await?;
        debug!(removed, "logout");
        Ok(())
    }

    /// Full rotation: a valid refresh token is exchanged for a new pair and
    /// the old token stops being accepted. The token must pass signature and
    /// expiry checks AND still be the registered session token, so logout and
    /// earlier rotations invalidate it even before it expires.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthSession, AuthError> {
        if refresh_token.is_empty() {
            return Err(AuthError::Unauthorized);
        }
        let claims = self
            .keys
            .verify_refresh(refresh_token)
            .map_err(|_| AuthError::Unauthorized)?;
        if self.sessions.find(refresh_token).await?.is_none() {
            return Err(AuthError::Unauthorized);
        }

        let user = self
            .users
            .find_by_id(claims.sub)
            .await?
            .ok_or(AuthError::UserNotFound)?;

        debug!(user_id = %user.id, "refresh token rotated");
        self.open_session(&user).await
    }

    pub async fn list_users(&self) -> Result<Vec<User>, AuthError> {
        Ok(self.users.list_all().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::repo::RefreshSession;
    use crate::config::JwtConfig;
    use axum::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use time::OffsetDateTime;

    struct MemUserStore {
        rows: Mutex<Vec<User>>,
    }

    impl MemUserStore {
        fn new() -> Self {
            Self {
                rows: Mutex::new(Vec::new()),
            }
        }

        fn activation_link_for(&self, email: &str) -> Uuid {
            self.rows
                .lock()
                .unwrap()
                .iter()
                .find(|u| u.email == email)
                .map(|u| u.activation_link)
                .expect("user should exist")
        }

        fn delete(&self, id: Uuid) {
            self.rows.lock().unwrap().retain(|u| u.id != id);
        }

        fn count(&self) -> usize {
            self.rows.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl UserStore for MemUserStore {
        async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<User>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|u| u.email == email)
                .cloned())
        }

        async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<User>> {
            Ok(self.rows.lock().unwrap().iter().find(|u| u.id == id).cloned())
        }

        async fn find_by_activation_link(&self, link: Uuid) -> anyhow::Result<Option<User>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|u| u.activation_link == link)
                .cloned())
        }

        async fn create(&self, new_user: NewUser) -> anyhow::Result<User> {
            let user = User {
                id: Uuid::new_v4(),
                email: new_user.email,
                password_hash: new_user.password_hash,
                is_activated: false,
                activation_link: new_user.activation_link,
                created_at: OffsetDateTime::now_utc(),
            };
            self.rows.lock().unwrap().push(user.clone());
            Ok(user)
        }

        async fn save(&self, user: &User) -> anyhow::Result<()> {
            let mut rows = self.rows.lock().unwrap();
            if let Some(row) = rows.iter_mut().find(|u| u.id == user.id) {
                *row = user.clone();
            }
            Ok(())
        }

        async fn list_all(&self) -> anyhow::Result<Vec<User>> {
            Ok(self.rows.lock().unwrap().clone())
        }
    }

    struct MemSessionStore {
        rows: Mutex<HashMap<Uuid, String>>,
    }

    impl MemSessionStore {
        fn new() -> Self {
            Self {
                rows: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl SessionStore for MemSessionStore {
        async fn save(&self, user_id: Uuid, refresh_token: &str) -> anyhow::Result<()> {
            self.rows
                .lock()
                .unwrap()
                .insert(user_id, refresh_token.to_string());
            Ok(())
        }

        async fn find(&self, refresh_token: &str) -> anyhow::Result<Option<RefreshSession>> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|(_, t)| t.as_str() == refresh_token)
                .map(|(user_id, t)| RefreshSession {
                    user_id: *user_id,
                    refresh_token: t.clone(),
                }))
        }

        async fn remove(&self, refresh_token: &str) -> anyhow::Result<u64> {
            let mut rows = self.rows.lock().unwrap();
            let before = rows.len();
            rows.retain(|_, t| t.as_str() != refresh_token);
            Ok((before - rows.len()) as u64)
        }
    }

    struct RecordingMailer {
        sent: Mutex<Vec<(String, String)>>,
        fail: bool,
    }

    impl RecordingMailer {
        fn new(fail: bool) -> Self {
            Self {
                sent: Mutex::new(Vec::new()),
                fail,
            }
        }
    }

    #[async_trait]
    impl Mailer for RecordingMailer {
        async fn send_activation_mail(&self, to: &str, activation_url: &str) -> anyhow::Result<()> {
            if self.fail {
                anyhow::bail!("smtp unavailable");
            }
            self.sent
                .lock()
                .unwrap()
                .push((to.to_string(), activation_url.to_string()));
            Ok(())
        }
    }

    fn test_keys() -> JwtKeys {
        JwtKeys::from_config(&JwtConfig {
            access_secret: "test-access-secret".into(),
            refresh_secret: "test-refresh-secret".into(),
            issuer: "test-issuer".into(),
            audience: "test-aud".into(),
            access_ttl_minutes: 5,
            refresh_ttl_days: 1,
        })
    }

    fn make_service(
        mailer_fails: bool,
    ) -> (AuthService, Arc<MemUserStore>, Arc<RecordingMailer>) {
        let users = Arc::new(MemUserStore::new());
        let sessions = Arc::new(MemSessionStore::new());
        let mailer = Arc::new(RecordingMailer::new(mailer_fails));
        let service = AuthService::new(
            users.clone(),
            sessions,
            mailer.clone(),
            test_keys(),
            "http://localhost:8080".into(),
        );
        (service, users, mailer)
    }

    #[tokio::test]
    async fn register_creates_user_and_sends_activation_mail() {
        let (service, users, mailer) = make_service(false);
        let session = service
            .register("a@x.com", "pw123456")
            .await
            .expect("register");

        assert_eq!(session.user.email, "a@x.com");
        assert!(!session.user.is_activated);
        assert_eq!(users.count(), 1);

        let sent = mailer.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        let (to, url) = &sent[0];
        assert_eq!(to, "a@x.com");
        let link = users.activation_link_for("a@x.com");
        assert_eq!(
            url,
            &format!("http://localhost:8080/api/auth/activate/{link}")
        );
    }

    #[tokio::test]
    async fn duplicate_registration_is_rejected() {
        let (service, users, _) = make_service(false);
        service.register("a@x.com", "pw123456").await.expect("first");
        let err = service
            .register("a@x.com", "other-pass")
            .await
            .expect_err("second must fail");
        assert!(matches!(err, AuthError::DuplicateUser { ref email } if email == "a@x.com"));
        assert_eq!(users.count(), 1);
    }

    #[tokio::test]
    async fn mail_failure_does_not_fail_registration() {
        let (service, users, _) = make_service(true);
        let session = service
            .register("a@x.com", "pw123456")
            .await
            .expect("register succeeds despite smtp failure");
        assert_eq!(users.count(), 1);
        // The session is live: the returned refresh token works.
        service
            .refresh(&session.tokens.refresh_token)
            .await
            .expect("refresh after register");
    }

    #[tokio::test]
    async fn activation_is_idempotent() {
        let (service, users, _) = make_service(false);
        service.register("a@x.com", "pw123456").await.expect("register");
        let link = users.activation_link_for("a@x.com");

        service.activate(link).await.expect("first activate");
        service.activate(link).await.expect("second activate");

        let user = users
            .find_by_email("a@x.com")
            .await
            .unwrap()
            .expect("user exists");
        assert!(user.is_activated);
    }

    #[tokio::test]
    async fn activation_with_unknown_link_fails() {
        let (service, _, _) = make_service(false);
        let err = service.activate(Uuid::new_v4()).await.expect_err("unknown link");
        assert!(matches!(err, AuthError::InvalidActivationLink));
    }

    #[tokio::test]
    async fn login_failure_modes() {
        let (service, _, _) = make_service(false);
        service.register("a@x.com", "pw123456").await.expect("register");

        let err = service.login("b@x.com", "pw123456").await.expect_err("unknown email");
        assert!(matches!(err, AuthError::UserNotFound));

        let err = service.login("a@x.com", "wrong-pass").await.expect_err("bad password");
        assert!(matches!(err, AuthError::InvalidCredentials));
    }

    #[tokio::test]
    async fn login_embeds_user_in_refresh_token() {
        let (service, _, _) = make_service(false);
        service.register("a@x.com", "pw123456").await.expect("register");
        let session = service.login("a@x.com", "pw123456").await.expect("login");

        let claims = test_keys()
            .verify_refresh(&session.tokens.refresh_token)
            .expect("decode refresh token");
        assert_eq!(claims.email, "a@x.com");
        assert_eq!(claims.sub, session.user.id);
        assert!(!claims.is_activated);
    }

    #[tokio::test]
    async fn refresh_rotates_and_invalidates_the_old_token() {
        let (service, _, _) = make_service(false);
        service.register("a@x.com", "pw123456").await.expect("register");
        let first = service.login("a@x.com", "pw123456").await.expect("login");

        let second = service
            .refresh(&first.tokens.refresh_token)
            .await
            .expect("refresh");
        assert_ne!(second.tokens.refresh_token, first.tokens.refresh_token);
        assert_ne!(second.tokens.access_token, first.tokens.access_token);

        let err = service
            .refresh(&first.tokens.refresh_token)
            .await
            .expect_err("stale token must be rejected");
        assert!(matches!(err, AuthError::Unauthorized));
    }

    #[tokio::test]
    async fn refresh_rejects_empty_and_malformed_tokens() {
        let (service, _, _) = make_service(false);
        assert!(matches!(
            service.refresh("").await.expect_err("empty"),
            AuthError::Unauthorized
        ));
        assert!(matches!(
            service.refresh("not.a.jwt").await.expect_err("garbage"),
            AuthError::Unauthorized
        ));
    }

    #[tokio::test]
    async fn logout_then_refresh_is_unauthorized() {
        let (service, _, _) = make_service(false);
        let session = service.register("a@x.com", "pw123456").await.expect("register");

        service
            .logout(&session.tokens.refresh_token)
            .await
            .expect("logout");
        // The token still carries a valid signature but the session is gone.
        let err = service
            .refresh(&session.tokens.refresh_token)
            .await
            .expect_err("refresh after logout");
        assert!(matches!(err, AuthError::Unauthorized));
    }

    #[tokio::test]
    async fn logout_with_unknown_token_is_not_an_error() {
        let (service, _, _) = make_service(false);
        service.logout("never-issued").await.expect("already logged out");
    }

    #[tokio::test]
    async fn refresh_for_deleted_user_fails() {
        let (service, users, _) = make_service(false);
        let session = service.register("a@x.com", "pw123456").await.expect("register");
        users.delete(session.user.id);

        let err = service
            .refresh(&session.tokens.refresh_token)
            .await
            .expect_err("user gone");
        assert!(matches!(err, AuthError::UserNotFound));
    }

    #[tokio::test]
    async fn list_users_returns_all_records() {
        let (service, _, _) = make_service(false);
        service.register("a@x.com", "pw123456").await.expect("register a");
        service.register("b@x.com", "pw123456").await.expect("register b");
        let all = service.list_users().await.expect("list");
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn end_to_end_session_lifecycle() {
        let (service, _, _) = make_service(false);

        let registered = service.register("a@x.com", "pw123").await.expect("register");
        assert!(!registered.user.is_activated);

        // A new login overwrites the registration session.
        let logged_in = service.login("a@x.com", "pw123").await.expect("login");
        assert_ne!(
            logged_in.tokens.refresh_token,
            registered.tokens.refresh_token
        );
        assert!(matches!(
            service.refresh(&registered.tokens.refresh_token).await,
            Err(AuthError::Unauthorized)
        ));

        let refreshed = service
            .refresh(&logged_in.tokens.refresh_token)
            .await
            .expect("refresh");
        assert_ne!(
            refreshed.tokens.refresh_token,
            logged_in.tokens.refresh_token
        );

        service
            .logout(&refreshed.tokens.refresh_token)
            .await
            .expect("logout");
        let err = service
            .refresh(&refreshed.tokens.refresh_token)
            .await
            .expect_err("session closed");
        assert!(matches!(err, AuthError::Unauthorized));
    }
}
