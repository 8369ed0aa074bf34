//! Session service
//!
//! Registration, login, the single signed-in session of this client and
//! the access check the navigation layer asks before rendering a page.

use crate::database::{generate_id, RegisterRequest, Repository, SessionUser, User, UserType};
use crate::error::{AppError, Result};
use crate::storage::PendingFile;

/// Outcome of an access check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Granted,
    RedirectToLogin,
}

/// Grant access iff someone is signed in and, when a role is required,
/// that user has it. Pure; no storage access.
pub fn authorize(session: Option<&User>, required: Option<UserType>) -> AccessDecision {
    match (session, required) {
        (None, _) => AccessDecision::RedirectToLogin,
        (Some(_), None) => AccessDecision::Granted,
        (Some(user), Some(role)) if user.user_type == role => AccessDecision::Granted,
        (Some(_), Some(_)) => AccessDecision::RedirectToLogin,
    }
}

/// Service for identity and session state
#[derive(Clone)]
pub struct SessionService {
    repo: Repository,
}

impl SessionService {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Exact match on email and password
    pub async fn authenticate(&self, email: &str, password: &str) -> Result<Option<User>> {
        self.repo.find_user_by_credentials(email, password).await
    }

    /// Store `user` (upsert by email) and make it the current session
    pub async fn start_session(&self, user: User, remember_me: bool) -> Result<SessionUser> {
        let session = SessionUser { user, remember_me };
        self.repo.save_session(&session).await?;

        tracing::info!("Session started for {}", session.user.email);
        Ok(session)
    }

    pub async fn current_session(&self) -> Result<Option<SessionUser>> {
        self.repo.current_session().await
    }

    pub async fn current_user(&self) -> Result<Option<User>> {
        Ok(self.current_session().await?.map(|s| s.user))
    }

    /// Clears the session only; the user record stays
    pub async fn end_session(&self) -> Result<()> {
        self.repo.clear_session().await?;
        tracing::info!("Session ended");
        Ok(())
    }

    pub async fn check_access(&self, required: Option<UserType>) -> Result<AccessDecision> {
        let user = self.current_user().await?;
        Ok(authorize(user.as_ref(), required))
    }

    /// Create an account and sign it in
    pub async fn register(&self, req: RegisterRequest) -> Result<User> {
        let email = req.email.trim().to_string();

        if email.is_empty() {
            return Err(AppError::validation("Email is required"));
        }
        if req.full_name.trim().is_empty() {
            return Err(AppError::validation("Full name is required"));
        }
        if req.password.is_empty() {
            return Err(AppError::validation("Password is required"));
        }
        if req.password != req.confirm_password {
            return Err(AppError::validation("Passwords do not match"));
        }
        if req.user_type == UserType::Admin {
            return Err(AppError::validation("Admin accounts cannot be self-registered"));
        }

        if self.repo.find_user(&email).await?.is_some() {
            tracing::warn!("Registration replaces existing account: {}", email);
        }

        let user = User {
            id: Some(generate_id()),
            email,
            password: req.password,
            user_type: req.user_type,
            full_name: req.full_name.trim().to_string(),
            profile_image: None,
            student_id: req.student_id.filter(|_| req.user_type == UserType::Student),
            subject: req.subject.filter(|_| req.user_type == UserType::Teacher),
        };

        tracing::info!("Registering {} as {}", user.email, user.user_type);
        let session = self.start_session(user, false).await?;
        Ok(session.user)
    }

    /// Authenticate and start a session
    pub async fn login(&self, email: &str, password: &str, remember_me: bool) -> Result<SessionUser> {
        let Some(user) = self.authenticate(email, password).await? else {
            tracing::info!("Failed login attempt for {}", email);
            return Err(AppError::validation("Invalid email or password"));
        };

        self.start_session(user, remember_me).await
    }

    /// Email and password to prefill the login form, if the signed-in
    /// user asked to be remembered
    pub async fn remembered_credentials(&self) -> Result<Option<(String, String)>> {
        Ok(self
            .current_session()
            .await?
            .filter(|s| s.remember_me)
            .map(|s| (s.user.email, s.user.password)))
    }

    /// Store an admin account without signing it in
    pub async fn provision_admin(&self, email: &str, password: &str, full_name: &str) -> Result<User> {
        if email.trim().is_empty() || password.is_empty() {
            return Err(AppError::validation("Email and password are required"));
        }

        // Never convert or overwrite an existing account
        if self.repo.find_user(email.trim()).await?.is_some() {
            return Err(AppError::validation("An account with this email already exists"));
        }

        let admin = User {
            id: Some(generate_id()),
            email: email.trim().to_string(),
            password: password.to_string(),
            user_type: UserType::Admin,
            full_name: full_name.trim().to_string(),
            profile_image: None,
            student_id: None,
            subject: None,
        };
        self.repo.upsert_user(&admin).await?;

        tracing::info!("Provisioned admin account {}", admin.email);
        Ok(admin)
    }

    pub async fn get_user(&self, email: &str) -> Result<Option<User>> {
        self.repo.find_user(email).await
    }

    /// All users, optionally only those of one role
    pub async fn list_users(&self, user_type: Option<UserType>) -> Result<Vec<User>> {
        let users = self.repo.list_users().await?;
        Ok(users
            .into_iter()
            .filter(|u| user_type.map_or(true, |t| u.user_type == t))
            .collect())
    }

    /// Admin-only removal of an account. Courses of a removed teacher
    /// are left in place.
    pub async fn delete_user(&self, actor: &User, email: &str) -> Result<bool> {
        if !actor.is_admin() {
            return Err(AppError::unauthorized("only an admin can delete accounts"));
        }

        let removed = self.repo.remove_user(email).await?;
        if removed {
            let signed_in = self.current_session().await?;
            if signed_in.is_some_and(|s| s.user.email == email) {
                self.repo.clear_session().await?;
            }
            tracing::info!("Admin {} deleted account {}", actor.email, email);
        }

        Ok(removed)
    }

    /// Embed `image` and store it on the user and on the session copy
    pub async fn update_profile_image(&self, email: &str, image: &PendingFile) -> Result<bool> {
        let embedded = image.embed().await?;
        let updated = self.repo.set_profile_image(email, &embedded.url).await?;

        if updated {
            tracing::info!("Profile image updated for {}", email);
        }
        Ok(updated)
    }
}
