use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::backend::{Backend, BackendError};
use crate::database::volunteer_repo;
use crate::models::{NewVolunteer, ProfileEdit, Session, VolunteerRow};
use crate::services::retry_policy::{RetryPolicy, RetryReport};

pub const FETCH_FAILED_MESSAGE: &str = "Failed to load profile data. Please try again later.";
pub const UPDATED_MESSAGE: &str = "Profile updated successfully!";
pub const CREATED_MESSAGE: &str = "Profile created successfully!";
pub const ALREADY_EXISTS_MESSAGE: &str = "Your volunteer profile already exists.";
pub const NEVER_LOGGED_IN: &str = "Never";
pub const PROPAGATING_MESSAGE: &str =
    "Your profile was created but is still propagating. Try again in a moment.";

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("No profile loaded. Reload the page and try again.")]
    NoProfileLoaded,
    #[error("A profile already exists or could not be checked.")]
    CreateNotOffered,
    #[error("Failed to update profile.")]
    UpdateFailed(#[source] BackendError),
    #[error("Failed to create profile: {0}")]
    CreateFailed(#[source] BackendError),
}

/// Display form of a volunteer record.
#[derive(Debug, Clone, PartialEq)]
pub struct VolunteerProfile {
    pub id: String,
    pub nickname: String,
    pub phone: String,
    pub role: String,
    pub status: String,
    pub created_at: Option<String>,
    pub last_login_at: Option<String>,
}

impl From<VolunteerRow> for VolunteerProfile {
    fn from(row: VolunteerRow) -> Self {
        Self {
            id: row.id,
            nickname: row.nickname.unwrap_or_default(),
            phone: row.phone.unwrap_or_default(),
            role: row.role.unwrap_or_default(),
            status: row.status.unwrap_or_default(),
            created_at: row.created_at,
            last_login_at: row.last_login_at,
        }
    }
}

impl VolunteerProfile {
    pub fn is_active(&self) -> bool {
        self.status.eq_ignore_ascii_case("active")
    }

    pub fn joined_label(&self) -> String {
        self.created_at.as_deref().map(date_label).unwrap_or_default()
    }

    pub fn last_login_label(&self) -> String {
        match self.last_login_at.as_deref().map(date_label) {
            Some(label) if !label.is_empty() => label,
            _ => NEVER_LOGGED_IN.to_string(),
        }
    }
}

fn date_label(raw: &str) -> String {
    let raw = raw.trim();
    match chrono::DateTime::parse_from_rfc3339(raw) {
        Ok(ts) => ts.format("%Y-%m-%d").to_string(),
        // Postgres without offset, e.g. "2025-03-01 12:00:00.123"
        Err(_) => raw.chars().take(10).collect(),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProfileState {
    Loading,
    Found(VolunteerProfile),
    NotFound,
    Error(String),
    /// Created, but not readable yet.
    Propagating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Success,
    Error,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
}

impl Notice {
    pub fn success(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Success,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            text: text.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == NoticeKind::Error
    }
}

/// The profile screen of one signed-in user: what is displayed plus the
/// latest notice.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileScreen {
    state: ProfileState,
    notice: Option<Notice>,
}

impl Default for ProfileScreen {
    fn default() -> Self {
        Self::new()
    }
}

impl ProfileScreen {
    pub fn new() -> Self {
        Self {
            state: ProfileState::Loading,
            notice: None,
        }
    }

    pub fn state(&self) -> &ProfileState {
        &self.state
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    pub fn profile(&self) -> Option<&VolunteerProfile> {
        match &self.state {
            ProfileState::Found(profile) => Some(profile),
            _ => None,
        }
    }

    /// Only an explicit "no such record" offers self-service creation.
    pub fn offers_create(&self) -> bool {
        self.state == ProfileState::NotFound
    }

    pub async fn load(&mut self, backend: &dyn Backend, session: &Session, policy: &RetryPolicy) {
        self.state = ProfileState::Loading;
        self.notice = None;

        let report = fetch_profile(backend, session, policy).await;
        self.state = match report.result {
            Ok(profile) => ProfileState::Found(profile),
            Err(err) if err.is_not_found() => {
                info!(user_id = %session.user_id(), "no volunteer record");
                ProfileState::NotFound
            }
            Err(err) => {
                warn!(
                    user_id = %session.user_id(),
                    attempts = report.attempts,
                    error = %err,
                    "profile fetch failed"
                );
                ProfileState::Error(FETCH_FAILED_MESSAGE.to_string())
            }
        };
    }

    /// Writes the two editable fields. On success the displayed record takes
    /// the submitted values without a re-fetch; on failure it is untouched.
    pub async fn submit_edit(
        &mut self,
        backend: &dyn Backend,
        session: &Session,
        edit: ProfileEdit,
    ) -> Result<(), ProfileError> {
        if self.profile().is_none() {
            return Err(self.fail(ProfileError::NoProfileLoaded));
        }

        if let Err(err) = volunteer_repo::update_volunteer_contact(
            backend,
            &session.access_token,
            session.user_id(),
            &edit,
        )
        .await
        {
            warn!(user_id = %session.user_id(), error = %err, "profile update failed");
            return Err(self.fail(ProfileError::UpdateFailed(err)));
        }

        if let ProfileState::Found(profile) = &mut self.state {
            profile.nickname = edit.nickname;
            profile.phone = edit.phone;
        }
        self.notice = Some(Notice::success(UPDATED_MESSAGE));
        Ok(())
    }

    /// Inserts a default record for the session user, then reads it back
    /// under `refetch`. If it is still unreadable the screen settles in
    /// [`ProfileState::Propagating`].
    pub async fn create(
        &mut self,
        backend: &dyn Backend,
        session: &Session,
        refetch: &RetryPolicy,
    ) -> Result<(), ProfileError> {
        if !self.offers_create() {
            return Err(self.fail(ProfileError::CreateNotOffered));
        }

        let row = NewVolunteer::for_user(session.user_id(), session.email());
        let message = match volunteer_repo::insert_volunteer(backend, &session.access_token, &row)
            .await
        {
            Ok(()) => {
                info!(user_id = %session.user_id(), nickname = %row.nickname, "volunteer record created");
                CREATED_MESSAGE
            }
            // Another request (second tab, administrator) got there first.
            Err(err) if err.is_conflict() => {
                info!(user_id = %session.user_id(), error = %err, "volunteer record already exists");
                ALREADY_EXISTS_MESSAGE
            }
            Err(err) => {
                warn!(user_id = %session.user_id(), error = %err, "profile create failed");
                return Err(self.fail(ProfileError::CreateFailed(err)));
            }
        };

        let report = fetch_profile(backend, session, refetch).await;
        match report.result {
            Ok(profile) => self.state = ProfileState::Found(profile),
            Err(err) => {
                warn!(
                    user_id = %session.user_id(),
                    attempts = report.attempts,
                    error = %err,
                    "new profile not readable yet"
                );
                self.state = ProfileState::Propagating;
            }
        }
        self.notice = Some(Notice::success(message));
        Ok(())
    }

    fn fail(&mut self, err: ProfileError) -> ProfileError {
        self.notice = Some(Notice::error(err.to_string()));
        err
    }
}

pub async fn fetch_profile(
    backend: &dyn Backend,
    session: &Session,
    policy: &RetryPolicy,
) -> RetryReport<VolunteerProfile> {
    let token = session.access_token.as_str();
    let user_id = session.user_id();
    policy
        .run("volunteer profile", || async move {
            volunteer_repo::load_volunteer(backend, token, user_id)
                .await
                .map(VolunteerProfile::from)
        })
        .await
}

/// Profile screens of all signed-in users, keyed by user id. Handlers take a
/// copy, work on it without holding the lock, and store it back.
#[derive(Clone, Default)]
pub struct ProfileScreens {
    inner: Arc<RwLock<HashMap<String, ProfileScreen>>>,
}

impl ProfileScreens {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, user_id: &str) -> Option<ProfileScreen> {
        self.inner.read().await.get(user_id).cloned()
    }

    pub async fn put(&self, user_id: &str, screen: ProfileScreen) {
        self.inner.write().await.insert(user_id.to_string(), screen);
    }

    pub async fn remove(&self, user_id: &str) {
        self.inner.write().await.remove(user_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, Operation};
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::Instant;

    const UNIT: Duration = Duration::from_secs(1);

    async fn setup() -> (MemoryBackend, Session) {
        let backend = MemoryBackend::new();
        backend.add_user("kai@example.org", "secret");
        let session = backend.sign_in("kai@example.org", "secret").await.unwrap();
        (backend, session)
    }

    fn seed_profile(backend: &MemoryBackend, session: &Session) {
        backend.put_row(
            "volunteers",
            json!({
                "id": session.user_id(),
                "nickname": "kai",
                "phone": "+33 1 23 45 67 89",
                "role": "volunteer",
                "status": "active",
                "created_at": "2025-03-01T09:30:00+00:00",
                "last_login_at": null
            }),
        );
    }

    fn transient() -> BackendError {
        BackendError::Transport("timed out".into())
    }

    async fn loaded(backend: &MemoryBackend, session: &Session) -> ProfileScreen {
        let mut screen = ProfileScreen::new();
        screen
            .load(backend, session, &RetryPolicy::profile_fetch(UNIT))
            .await;
        screen
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_recovers_on_third_attempt() {
        let (backend, session) = setup().await;
        seed_profile(&backend, &session);
        backend.fail_next(Operation::Select, 2, transient());

        let started = Instant::now();
        let report = fetch_profile(&backend, &session, &RetryPolicy::profile_fetch(UNIT)).await;
        assert_eq!(report.attempts, 3);
        assert_eq!(report.delays, vec![UNIT, UNIT * 2]);
        assert_eq!(started.elapsed(), UNIT * 3);
        assert_eq!(report.result.unwrap().nickname, "kai");
    }

    #[tokio::test(start_paused = true)]
    async fn load_settles_in_found_after_transient_failures() {
        let (backend, session) = setup().await;
        seed_profile(&backend, &session);
        backend.fail_next(Operation::Select, 2, transient());

        let screen = loaded(&backend, &session).await;
        let profile = screen.profile().expect("profile found");
        assert_eq!(profile.phone, "+33 1 23 45 67 89");
        assert_eq!(profile.joined_label(), "2025-03-01");
        assert!(profile.is_active());
        assert_eq!(backend.calls(Operation::Select), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn load_gives_up_after_three_failures_without_offering_create() {
        let (backend, session) = setup().await;
        seed_profile(&backend, &session);
        backend.fail_next(Operation::Select, 3, transient());

        let screen = loaded(&backend, &session).await;
        assert_eq!(
            screen.state(),
            &ProfileState::Error(FETCH_FAILED_MESSAGE.to_string())
        );
        assert!(!screen.offers_create());
    }

    #[tokio::test(start_paused = true)]
    async fn missing_record_offers_create_after_one_attempt() {
        let (backend, session) = setup().await;
        let screen = loaded(&backend, &session).await;
        assert_eq!(screen.state(), &ProfileState::NotFound);
        assert!(screen.offers_create());
        assert_eq!(backend.calls(Operation::Select), 1);
    }

    #[tokio::test]
    async fn edit_updates_display_without_refetch() {
        let (backend, session) = setup().await;
        seed_profile(&backend, &session);
        let mut screen = loaded(&backend, &session).await;
        let selects = backend.calls(Operation::Select);

        screen
            .submit_edit(
                &backend,
                &session,
                ProfileEdit {
                    nickname: "kai-b".into(),
                    phone: "0600".into(),
                },
            )
            .await
            .unwrap();

        let profile = screen.profile().unwrap();
        assert_eq!(profile.nickname, "kai-b");
        assert_eq!(profile.phone, "0600");
        assert_eq!(screen.notice(), Some(&Notice::success(UPDATED_MESSAGE)));
        assert_eq!(backend.calls(Operation::Select), selects);

        let stored = backend.row("volunteers", "id", session.user_id()).unwrap();
        assert_eq!(stored["nickname"], "kai-b");
    }

    #[tokio::test]
    async fn failed_edit_keeps_previous_values() {
        let (backend, session) = setup().await;
        seed_profile(&backend, &session);
        let mut screen = loaded(&backend, &session).await;
        backend.fail_next(Operation::Update, 1, transient());

        let err = screen
            .submit_edit(
                &backend,
                &session,
                ProfileEdit {
                    nickname: "changed".into(),
                    phone: "changed".into(),
                },
            )
            .await
            .unwrap_err();

        assert!(matches!(err, ProfileError::UpdateFailed(_)));
        assert_eq!(screen.profile().unwrap().nickname, "kai");
        let notice = screen.notice().unwrap();
        assert!(notice.is_error());
        assert_eq!(notice.text, "Failed to update profile.");
    }

    #[tokio::test]
    async fn edit_without_profile_does_not_call_backend() {
        let (backend, session) = setup().await;
        let mut screen = ProfileScreen::new();
        let err = screen
            .submit_edit(
                &backend,
                &session,
                ProfileEdit {
                    nickname: "x".into(),
                    phone: "y".into(),
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ProfileError::NoProfileLoaded));
        assert_eq!(backend.calls(Operation::Update), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn create_reads_back_through_lag() {
        let (backend, session) = setup().await;
        let mut screen = loaded(&backend, &session).await;
        backend.set_read_lag(1);

        screen
            .create(&backend, &session, &RetryPolicy::after_create(UNIT))
            .await
            .unwrap();

        let profile = screen.profile().expect("created profile");
        assert_eq!(profile.nickname, "kai");
        assert_eq!(profile.role, "admin");
        assert_eq!(profile.status, "active");
        assert_eq!(screen.notice(), Some(&Notice::success(CREATED_MESSAGE)));
        // initial load + two re-fetches
        assert_eq!(backend.calls(Operation::Select), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn create_reports_propagation_when_still_unreadable() {
        let (backend, session) = setup().await;
        let mut screen = loaded(&backend, &session).await;
        // hidden from both re-fetch attempts
        backend.set_read_lag(2);

        screen
            .create(&backend, &session, &RetryPolicy::after_create(UNIT))
            .await
            .unwrap();

        assert_eq!(screen.state(), &ProfileState::Propagating);
        assert!(!screen.offers_create());
        assert!(backend.row("volunteers", "id", session.user_id()).is_some());

        // "try again" is a plain reload of the screen
        let screen = loaded(&backend, &session).await;
        assert_eq!(screen.profile().map(|p| p.nickname.as_str()), Some("kai"));
    }

    #[tokio::test]
    async fn create_failure_stays_on_not_found_with_backend_message() {
        let (backend, session) = setup().await;
        let mut screen = loaded(&backend, &session).await;
        backend.fail_next(
            Operation::Insert,
            1,
            BackendError::Api {
                status: 403,
                code: Some("42501".into()),
                message: "new row violates row-level security policy".into(),
            },
        );

        let err = screen
            .create(&backend, &session, &RetryPolicy::after_create(UNIT))
            .await
            .unwrap_err();
        assert!(matches!(err, ProfileError::CreateFailed(_)));
        assert_eq!(screen.state(), &ProfileState::NotFound);
        assert_eq!(
            screen.notice().unwrap().text,
            "Failed to create profile: new row violates row-level security policy"
        );
    }

    #[tokio::test]
    async fn create_is_refused_when_a_profile_is_shown() {
        let (backend, session) = setup().await;
        seed_profile(&backend, &session);
        let mut screen = loaded(&backend, &session).await;
        let err = screen
            .create(&backend, &session, &RetryPolicy::after_create(UNIT))
            .await
            .unwrap_err();
        assert!(matches!(err, ProfileError::CreateNotOffered));
        assert_eq!(backend.calls(Operation::Insert), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_insert_reads_back_the_existing_record() {
        let (backend, session) = setup().await;
        let mut screen = loaded(&backend, &session).await;
        assert!(screen.offers_create());
        // record created elsewhere after this screen was loaded
        seed_profile(&backend, &session);

        screen
            .create(&backend, &session, &RetryPolicy::after_create(UNIT))
            .await
            .unwrap();

        assert_eq!(screen.profile().map(|p| p.nickname.as_str()), Some("kai"));
        assert!(!screen.offers_create());
        assert_eq!(screen.notice(), Some(&Notice::success(ALREADY_EXISTS_MESSAGE)));
        assert_eq!(backend.calls(Operation::Insert), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn queued_conflict_on_insert_still_settles_in_found() {
        let (backend, session) = setup().await;
        let mut screen = loaded(&backend, &session).await;
        seed_profile(&backend, &session);
        backend.fail_next(
            Operation::Insert,
            1,
            BackendError::Api {
                status: 409,
                code: Some("23505".into()),
                message: "duplicate key value violates unique constraint \"volunteers_pkey\"".into(),
            },
        );

        screen
            .create(&backend, &session, &RetryPolicy::after_create(UNIT))
            .await
            .unwrap();

        assert!(matches!(screen.state(), ProfileState::Found(_)));
        assert!(!screen.notice().unwrap().is_error());
    }

    #[test]
    fn last_login_falls_back_to_never() {
        let mut profile = VolunteerProfile::from(VolunteerRow {
            id: "u1".into(),
            ..VolunteerRow::default()
        });
        assert_eq!(profile.last_login_label(), NEVER_LOGGED_IN);
        profile.last_login_at = Some("2025-04-02T18:00:00+00:00".into());
        assert_eq!(profile.last_login_label(), "2025-04-02");
    }

    #[test]
    fn date_labels_accept_rfc3339_and_plain_timestamps() {
        assert_eq!(date_label("2025-03-01T09:30:00.123456+00:00"), "2025-03-01");
        assert_eq!(date_label("2025-03-01 09:30:00"), "2025-03-01");
        assert_eq!(date_label(""), "");
    }
}
