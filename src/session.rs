use std::collections::HashMap;
use std::time::{Duration, Instant};

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::AppError;
use crate::server::AppState;

pub const SESSION_COOKIE: &str = "storyteller_session";

/// Idle time after which a session is forgotten.
pub const SESSION_TTL: Duration = Duration::from_secs(12 * 60 * 60);

struct Session {
    student: String,
    last_seen: Instant,
}

/// Server-side sessions: opaque random id -> student name.
///
/// Ids are only ever minted here. Entries idle for longer than the TTL are
/// dropped on lookup and swept on every login, so the map only holds live
/// sessions.
pub struct SessionStore {
    sessions: Mutex<HashMap<Uuid, Session>>,
    ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::with_ttl(SESSION_TTL)
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl,
        }
    }

    /// Start a new session for `name` under a freshly generated id.
    /// The browser's previous session, if any, is ended.
    pub async fn login(&self, previous: Option<Uuid>, name: &str) -> Uuid {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;

        if let Some(previous) = previous {
            sessions.remove(&previous);
        }
        sessions.retain(|_, session| now.duration_since(session.last_seen) < self.ttl);

        let id = Uuid::new_v4();
        sessions.insert(
            id,
            Session {
                student: name.to_string(),
                last_seen: now,
            },
        );
        id
    }

    /// The student bound to `id`, refreshing its idle timer.
    pub async fn student(&self, id: Uuid) -> Option<String> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;

        let session = sessions.get_mut(&id)?;
        if now.duration_since(session.last_seen) >= self.ttl {
            sessions.remove(&id);
            return None;
        }
        session.last_seen = now;
        Some(session.student.clone())
    }

    pub async fn logout(&self, id: Uuid) -> Option<String> {
        self.sessions.lock().await.remove(&id).map(|s| s.student)
    }
}

/// Who is making the request, resolved from the session cookie.
#[derive(Debug, Clone, Default)]
pub struct Identity {
    pub session_id: Option<Uuid>,
    pub student: Option<String>,
}

impl Identity {
    /// The logged-in student's name.
    pub fn require(&self) -> Result<&str, AppError> {
        self.student.as_deref().ok_or(AppError::NotLoggedIn)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Identity {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);
        let Some(session_id) = session_id(&jar) else {
            return Ok(Identity::default());
        };
        let student = state.sessions.student(session_id).await;
        Ok(Identity {
            session_id: Some(session_id),
            student,
        })
    }
}

/// Session id from the request's cookies, if present and well formed.
pub fn session_id(jar: &CookieJar) -> Option<Uuid> {
    jar.get(SESSION_COOKIE)
        .and_then(|cookie| Uuid::parse_str(cookie.value()).ok())
}

pub fn session_cookie(id: Uuid) -> Cookie<'static> {
    Cookie::build((SESSION_COOKIE, id.to_string()))
        .path("/")
        .http_only(true)
        .same_site(SameSite::Lax)
        .build()
}

/// Cookie that, once removed from a jar, clears the session cookie.
pub fn expired_cookie() -> Cookie<'static> {
    Cookie::build(SESSION_COOKIE).path("/").build()
}
