use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::{Path, State};
use axum::middleware::map_response_with_state;
use axum::response::{Html, IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::{Form, Router};
use axum_extra::extract::cookie::CookieJar;
use chrono::Local;
use serde::Deserialize;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::error::{AppError, ErrorPage};
use crate::model::Story;
use crate::session::{self, Identity, SessionStore};
use crate::store::JsonStore;
use crate::story::{ChatCompletionsClient, StoryGenerator};
use crate::views::Views;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<JsonStore>,
    pub sessions: Arc<SessionStore>,
    pub generator: StoryGenerator,
    pub views: Arc<Views>,
}

impl AppState {
    pub fn new(store: JsonStore, generator: StoryGenerator) -> Result<Self> {
        let views = Views::new().context("Failed to compile page templates")?;
        Ok(Self {
            store: Arc::new(store),
            sessions: Arc::new(SessionStore::new()),
            generator,
            views: Arc::new(views),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        let backend = ChatCompletionsClient::new(config.clone());
        Self::new(
            JsonStore::new(config.data_file.clone()),
            StoryGenerator::new(Arc::new(backend)),
        )
    }
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    #[serde(default)]
    username: String,
}

#[derive(Debug, Deserialize)]
pub struct StoryForm {
    theme: Option<String>,
    word_count: Option<String>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(login_page))
        .route("/dashboard", post(dashboard))
        .route("/create_story", post(create_story))
        .route("/story/:story_id", get(view_story))
        .route("/logout", get(logout))
        .layer(map_response_with_state(state.clone(), render_error_page))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(config: Config) -> Result<()> {
    let state = AppState::from_config(&config)?;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    tracing::info!(
        addr = %config.bind,
        data_file = %config.data_file.display(),
        model = %config.model,
        "storyteller listening"
    );

    axum::serve(listener, app).await.context("Server error")?;

    Ok(())
}

/// Replace the plain-text body of an `AppError` response with the error
/// template.
async fn render_error_page(State(state): State<AppState>, response: Response) -> Response {
    let Some(page) = response.extensions().get::<ErrorPage>().cloned() else {
        return response;
    };
    match state.views.error_page(page.title, &page.message) {
        Ok(html) => (response.status(), Html(html)).into_response(),
        Err(err) => {
            tracing::error!(error = %err, "failed to render error page");
            response
        }
    }
}

async fn login_page(State(state): State<AppState>) -> Result<Html<String>, AppError> {
    Ok(Html(state.views.login()?))
}

async fn dashboard(
    State(state): State<AppState>,
    identity: Identity,
    jar: CookieJar,
    Form(form): Form<LoginForm>,
) -> Result<impl IntoResponse, AppError> {
    let name = form.username.trim().to_string();
    if name.is_empty() {
        return Err(AppError::InvalidForm("username is required".to_string()));
    }

    let student = state
        .store
        .update(|store| {
            let (student, created) = store.find_or_create(&name);
            (student.clone(), created)
        })
        .await?;

    let session_id = state.sessions.login(identity.session_id, &name).await;
    tracing::info!(student = %name, "student logged in");

    let html = state.views.dashboard(&student)?;
    Ok((jar.add(session::session_cookie(session_id)), Html(html)))
}

async fn create_story(
    State(state): State<AppState>,
    identity: Identity,
    Form(form): Form<StoryForm>,
) -> Result<Redirect, AppError> {
    let name = identity.require()?;
    let theme = form
        .theme
        .ok_or_else(|| AppError::InvalidForm("theme is required".to_string()))?;
    let word_count = parse_word_count(form.word_count.as_deref())?;

    let store = state.store.load().await?;
    let student = store
        .find_student(name)
        .ok_or_else(|| AppError::StudentNotFound(name.to_string()))?;

    let content = state
        .generator
        .generate(student.pm_level, &student.focus_words, &theme, word_count)
        .await;
    let story = Story::from_generated(content, Local::now());

    // Generation can take a while; re-read under the write lock so changes
    // made in the meantime are kept.
    let index = state
        .store
        .update(|store| {
            let index = store
                .find_student_mut(name)
                .map(|student| student.push_story(story));
            (index, index.is_some())
        })
        .await?
        .ok_or_else(|| AppError::StudentNotFound(name.to_string()))?;

    tracing::info!(student = %name, index, "story stored");
    Ok(Redirect::to(&format!("/story/{}", index)))
}

async fn view_story(
    State(state): State<AppState>,
    identity: Identity,
    Path(story_id): Path<String>,
) -> Result<Html<String>, AppError> {
    let name = identity.require()?;
    let index = story_id
        .parse::<usize>()
        .map_err(|_| AppError::StoryNotFound(story_id.clone()))?;

    let store = state.store.load().await?;
    let student = store
        .find_student(name)
        .ok_or_else(|| AppError::StudentNotFound(name.to_string()))?;
    let story = student
        .story(index)
        .ok_or_else(|| AppError::StoryNotFound(story_id.clone()))?;

    Ok(Html(state.views.story(story)?))
}

async fn logout(State(state): State<AppState>, identity: Identity, jar: CookieJar) -> impl IntoResponse {
    if let Some(session_id) = identity.session_id {
        if let Some(name) = state.sessions.logout(session_id).await {
            tracing::info!(student = %name, "student logged out");
        }
    }
    (jar.remove(session::expired_cookie()), Redirect::to("/"))
}

fn parse_word_count(raw: Option<&str>) -> Result<u32, AppError> {
    let raw = raw.ok_or_else(|| AppError::InvalidForm("word_count is required".to_string()))?;
    match raw.trim().parse::<u32>() {
        Ok(count) if count > 0 => Ok(count),
        _ => Err(AppError::InvalidForm(format!(
            "word_count must be a positive whole number, got {:?}",
            raw
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::MAX_STORIES;
    use crate::story::tests::{client_for, unreachable_api_url, ScriptedBackend};
    use crate::story::FALLBACK_STORY;
    use axum::body::Body;
    use axum::http::header::{CONTENT_TYPE, COOKIE, LOCATION, SET_COOKIE};
    use axum::http::{Request, StatusCode};
    use tempfile::TempDir;
    use tower::ServiceExt;
    use uuid::Uuid;

    struct TestApp {
        _dir: TempDir,
        state: AppState,
        backend: Arc<ScriptedBackend>,
    }

    impl TestApp {
        fn new(backend: ScriptedBackend) -> Self {
            let dir = TempDir::new().unwrap();
            let backend = Arc::new(backend);
            let state = AppState::new(
                JsonStore::new(dir.path().join("data.json")),
                StoryGenerator::new(backend.clone()),
            )
            .unwrap();
            Self {
                _dir: dir,
                state,
                backend,
            }
        }

        async fn send(&self, request: Request<Body>) -> Response {
            router(self.state.clone()).oneshot(request).await.unwrap()
        }

        async fn post_form(&self, uri: &str, body: &str, cookie: Option<&str>) -> Response {
            let mut builder = Request::post(uri).header(CONTENT_TYPE, "application/x-www-form-urlencoded");
            if let Some(cookie) = cookie {
                builder = builder.header(COOKIE, cookie);
            }
            self.send(builder.body(Body::from(body.to_string())).unwrap()).await
        }

        async fn get(&self, uri: &str, cookie: Option<&str>) -> Response {
            let mut builder = Request::get(uri);
            if let Some(cookie) = cookie {
                builder = builder.header(COOKIE, cookie);
            }
            self.send(builder.body(Body::empty()).unwrap()).await
        }

        /// Log in and return the session cookie to send back.
        async fn login(&self, name: &str) -> String {
            self.login_with(name, None).await
        }

        async fn login_with(&self, name: &str, cookie: Option<&str>) -> String {
            let response = self.post_form("/dashboard", &format!("username={}", name), cookie).await;
            assert_eq!(response.status(), StatusCode::OK);
            session_cookie_of(&response)
        }

        async fn create_story(&self, cookie: &str, theme: &str, word_count: u32) -> Response {
            self.post_form(
                "/create_story",
                &format!("theme={}&word_count={}", theme, word_count),
                Some(cookie),
            )
            .await
        }
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn session_cookie_of(response: &Response) -> String {
        let set_cookie = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        set_cookie.split(';').next().unwrap().to_string()
    }

    fn session_id_of(cookie: &str) -> Uuid {
        let (_, value) = cookie.split_once('=').unwrap();
        Uuid::parse_str(value).unwrap()
    }

    fn location(response: &Response) -> &str {
        response.headers().get(LOCATION).unwrap().to_str().unwrap()
    }

    #[tokio::test]
    async fn test_login_page() {
        let app = TestApp::new(ScriptedBackend::ok("unused"));
        let response = app.get("/", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_text(response).await.contains("action=\"/dashboard\""));
    }

    #[tokio::test]
    async fn test_dashboard_creates_student_with_defaults() {
        let app = TestApp::new(ScriptedBackend::ok("unused"));
        let response = app.post_form("/dashboard", "username=++Ava++", None).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(SET_COOKIE).is_some());
        let html = body_text(response).await;
        assert!(html.contains("Hello, Ava!"));

        let store = app.state.store.load().await.unwrap();
        assert_eq!(store.students.len(), 1);
        let student = &store.students[0];
        assert_eq!(student.name, "Ava");
        assert_eq!(student.pm_level, 5);
        assert_eq!(student.focus_words, vec!["happy", "friend", "school"]);
    }

    #[tokio::test]
    async fn test_dashboard_is_idempotent() {
        let app = TestApp::new(ScriptedBackend::ok("Title: A\nbody"));
        let cookie = app.login("Ava").await;
        app.create_story(&cookie, "ocean", 50).await;

        // Hand edit the level, as an admin would
        app.state
            .store
            .update(|s| {
                s.find_student_mut("Ava").unwrap().pm_level = 8;
                ((), true)
            })
            .await
            .unwrap();

        app.login("Ava").await;

        let store = app.state.store.load().await.unwrap();
        assert_eq!(store.students.len(), 1);
        assert_eq!(store.students[0].pm_level, 8);
        assert_eq!(store.students[0].stories.len(), 1);
    }

    #[tokio::test]
    async fn test_dashboard_rejects_blank_name() {
        let app = TestApp::new(ScriptedBackend::ok("unused"));
        let response = app.post_form("/dashboard", "username=+++", None).await;

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert!(app.state.store.load().await.unwrap().students.is_empty());
    }

    #[tokio::test]
    async fn test_create_and_view_story() {
        let app = TestApp::new(ScriptedBackend::ok("Title: The Happy Fish\nA happy fish met a friend at school."));
        let cookie = app.login("Ava").await;

        let response = app.create_story(&cookie, "ocean", 50).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/story/0");

        let prompts = app.backend.prompts.lock().unwrap().clone();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].starts_with("Write a 50-word story for a Level 5 reader"));
        assert!(prompts[0].contains("happy, friend, school"));
        assert!(prompts[0].contains("Use theme: ocean."));

        let store = app.state.store.load().await.unwrap();
        let story = &store.students[0].stories[0];
        assert_eq!(story.title, "The Happy Fish");
        assert_eq!(story.content, "Title: The Happy Fish\nA happy fish met a friend at school.");

        let response = app.get("/story/0", Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::OK);
        let html = body_text(response).await;
        assert!(html.contains("<h1>The Happy Fish</h1>"));
        assert!(html.contains("A happy fish met a friend at school."));
    }

    #[tokio::test]
    async fn test_failed_generation_still_stores_fallback() {
        let app = TestApp::new(ScriptedBackend::failing(500));
        let cookie = app.login("Ava").await;

        let response = app.create_story(&cookie, "ocean", 50).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);

        let store = app.state.store.load().await.unwrap();
        let stories = &store.students[0].stories;
        assert_eq!(stories.len(), 1);
        assert_eq!(stories[0].content, FALLBACK_STORY);
        assert_eq!(stories[0].title, FALLBACK_STORY);
        assert_eq!(stories[0].date.len(), "YYYY-MM-DD HH:MM".len());
    }

    #[tokio::test]
    async fn test_unreachable_api_still_stores_fallback() {
        let dir = TempDir::new().unwrap();
        let client = client_for(unreachable_api_url(), "STORYTELLER_TEST_UNSET_TOKEN");
        let state = AppState::new(
            JsonStore::new(dir.path().join("data.json")),
            StoryGenerator::new(Arc::new(client)),
        )
        .unwrap();
        let app = router(state.clone());

        let login = Request::post("/dashboard")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("username=Ava"))
            .unwrap();
        let cookie = session_cookie_of(&app.clone().oneshot(login).await.unwrap());

        let create = Request::post("/create_story")
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(COOKIE, &cookie)
            .body(Body::from("theme=ocean&word_count=50"))
            .unwrap();
        let response = app.oneshot(create).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/story/0");

        let store = state.store.load().await.unwrap();
        let stories = &store.students[0].stories;
        assert_eq!(stories.len(), 1);
        assert_eq!(stories[0].content, FALLBACK_STORY);
    }

    #[tokio::test]
    async fn test_story_history_is_capped() {
        let app = TestApp::new(ScriptedBackend::ok("Title: Again\nbody"));
        let cookie = app.login("Ava").await;

        for n in 1..=12u32 {
            let response = app.create_story(&cookie, &format!("theme{}", n), 20).await;
            let expected = (n as usize).min(MAX_STORIES) - 1;
            assert_eq!(location(&response), format!("/story/{}", expected));
        }

        let store = app.state.store.load().await.unwrap();
        assert_eq!(store.students[0].stories.len(), MAX_STORIES);
        assert_eq!(app.backend.prompts.lock().unwrap().len(), 12);
    }

    #[tokio::test]
    async fn test_view_story_out_of_range() {
        let app = TestApp::new(ScriptedBackend::ok("Title: One\nbody"));
        let cookie = app.login("Ava").await;
        app.create_story(&cookie, "ocean", 50).await;

        let response = app.get("/story/1", Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers()[CONTENT_TYPE].to_str().unwrap().starts_with("text/html"));
        assert!(body_text(response).await.contains("<h1>Story not found</h1>"));
    }

    #[tokio::test]
    async fn test_view_story_rejects_malformed_ids() {
        let app = TestApp::new(ScriptedBackend::ok("Title: One\nbody"));
        let cookie = app.login("Ava").await;
        app.create_story(&cookie, "ocean", 50).await;

        for uri in ["/story/-1", "/story/abc", "/story/1.5"] {
            let response = app.get(uri, Some(&cookie)).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{}", uri);
            assert!(body_text(response).await.contains("<h1>Story not found</h1>"), "{}", uri);
        }
    }

    #[tokio::test]
    async fn test_anonymous_requests_go_to_login() {
        let app = TestApp::new(ScriptedBackend::ok("unused"));

        let response = app.get("/story/0", None).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/");

        let response = app.post_form("/create_story", "theme=ocean&word_count=50", None).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(app.backend.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_session_reports_missing_student() {
        let app = TestApp::new(ScriptedBackend::ok("unused"));
        let cookie = app.login("Ava").await;

        app.state.store.save(&Default::default()).await.unwrap();

        let response = app.create_story(&cookie, "ocean", 50).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(body_text(response).await.contains("Session expired"));
        assert!(app.backend.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_create_story_validates_word_count() {
        let app = TestApp::new(ScriptedBackend::ok("unused"));
        let cookie = app.login("Ava").await;

        for body in ["theme=ocean&word_count=abc", "theme=ocean&word_count=0", "theme=ocean"] {
            let response = app.post_form("/create_story", body, Some(&cookie)).await;
            assert_eq!(response.status(), StatusCode::BAD_REQUEST, "{}", body);
        }
        assert!(app.backend.prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_logout_clears_session() {
        let app = TestApp::new(ScriptedBackend::ok("unused"));
        let cookie = app.login("Ava").await;

        let response = app.get("/logout", Some(&cookie)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/");
        let set_cookie = response.headers().get(SET_COOKIE).unwrap().to_str().unwrap();
        assert!(set_cookie.contains("Max-Age=0"));

        let response = app.get("/story/0", Some(&cookie)).await;
        assert_eq!(location(&response), "/");
    }

    #[tokio::test]
    async fn test_login_ignores_unissued_session_cookie() {
        let app = TestApp::new(ScriptedBackend::ok("unused"));
        let planted = Uuid::new_v4();
        let planted_cookie = format!("{}={}", session::SESSION_COOKIE, planted);

        let cookie = app.login_with("Ava", Some(&planted_cookie)).await;
        assert_ne!(session_id_of(&cookie), planted);
        assert_eq!(app.state.sessions.student(planted).await, None);

        // The planted id does not grant access
        let response = app.get("/story/0", Some(&planted_cookie)).await;
        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&response), "/");
    }

    #[tokio::test]
    async fn test_relogin_replaces_session() {
        let app = TestApp::new(ScriptedBackend::ok("unused"));
        let first = app.login("Ava").await;
        let second = app.login_with("Ben", Some(&first)).await;

        assert_ne!(first, second);
        assert_eq!(app.state.sessions.student(session_id_of(&first)).await, None);
        assert_eq!(
            app.state.sessions.student(session_id_of(&second)).await.as_deref(),
            Some("Ben")
        );
    }

    #[tokio::test]
    async fn test_corrupt_store_is_server_error() {
        let app = TestApp::new(ScriptedBackend::ok("unused"));
        std::fs::write(app.state.store.path(), "not json").unwrap();

        let response = app.post_form("/dashboard", "username=Ava", None).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body_text(response).await.contains("<h1>Something went wrong</h1>"));
    }

    #[test]
    fn test_parse_word_count() {
        assert_eq!(parse_word_count(Some("50")).unwrap(), 50);
        assert_eq!(parse_word_count(Some(" 7 ")).unwrap(), 7);
        assert!(parse_word_count(Some("-3")).is_err());
        assert!(parse_word_count(None).is_err());
    }
}
