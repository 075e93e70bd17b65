#![forbid(unsafe_code)]

//! Axum backend for the learning catalog.
//!
//! Browse endpoints are read-only and open. Admin endpoints write the
//! hierarchy and require `Authorization: Bearer <CATALOG_ADMIN_TOKEN>`; link
//! writes go through [`LinkService`], which enriches the URL synchronously
//! before anything is stored.

use std::{
    net::{IpAddr, SocketAddr},
    path::PathBuf,
    sync::Arc,
};

use anyhow::{Context, Result};
use axum::{
    Json, Router,
    extract::{FromRequest, Path as AxumPath, Request, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post, put},
};
use clap::Parser;
use learning_catalog::{
    build_link_service,
    catalog::{CatalogStore, Chapter, Link, StoreError, Subject, TopicWithLinks},
    config::{ConfigOverrides, resolve_config},
    enrich::EnrichmentPolicy,
    logging,
    service::{LinkService, WriteError},
};
use serde::{Deserialize, Serialize};
use tokio::signal;

#[derive(Debug, Clone, Parser)]
#[command(name = "backend", about = "Serve the learning catalog API")]
struct BackendArgs {
    /// SQLite catalog file (CATALOG_DB_PATH).
    #[arg(long = "db")]
    db_path: Option<PathBuf>,
    /// Listen address (CATALOG_HOST).
    #[arg(long, value_parser = parse_host_arg)]
    host: Option<IpAddr>,
    /// Listen port (CATALOG_PORT).
    #[arg(long)]
    port: Option<u16>,
    /// `strict` rejects unresolvable video links, `lenient` stores them anyway.
    #[arg(long, value_parser = parse_policy_arg)]
    policy: Option<EnrichmentPolicy>,
    /// dotenv file to read settings from.
    #[arg(long = "env-file")]
    env_file: Option<PathBuf>,
}

impl BackendArgs {
    fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            db_path: self.db_path.clone(),
            host: self.host.map(|host| host.to_string()),
            port: self.port,
            policy: self.policy,
            env_path: self.env_file.clone(),
        }
    }
}

fn parse_host_arg(value: &str) -> Result<IpAddr> {
    value
        .trim()
        .parse::<IpAddr>()
        .context("expected a valid IPv4 or IPv6 address for --host/CATALOG_HOST")
}

fn parse_policy_arg(value: &str) -> Result<EnrichmentPolicy, String> {
    EnrichmentPolicy::parse(value).ok_or_else(|| format!("unknown policy {value:?}; use strict or lenient"))
}

/// Shared state injected into every handler.
#[derive(Clone)]
struct AppState {
    links: LinkService,
    admin_token: Option<Arc<str>>,
}

impl AppState {
    fn store(&self) -> &Arc<CatalogStore> {
        self.links.store()
    }
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn not_found(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::NOT_FOUND,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }

    fn with_status(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound { .. } => Self::not_found(err.to_string()),
            StoreError::Conflict(message) => Self::with_status(StatusCode::CONFLICT, message),
            StoreError::Invalid(message) => Self::with_status(StatusCode::BAD_REQUEST, message),
            StoreError::Sql(_) | StoreError::Other(_) => {
                tracing::error!(error = %err, "catalog storage failure");
                Self::internal("catalog storage failure")
            }
        }
    }
}

impl From<WriteError> for ApiError {
    fn from(err: WriteError) -> Self {
        match err {
            WriteError::Validation(err) => {
                Self::with_status(StatusCode::UNPROCESSABLE_ENTITY, err.to_string())
            }
            WriteError::Store(err) => err.into(),
            WriteError::Join(err) => {
                tracing::error!(error = %err, "enrichment task failed");
                Self::internal("link enrichment failed")
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::with_status(rejection.status(), rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let body = serde_json::json!({
            "error": self.message,
        });
        (self.status, headers, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// JSON request body whose rejections use the `{"error": ...}` shape.
#[derive(Debug, FromRequest)]
#[from_request(via(Json), rejection(ApiError))]
struct JsonBody<T>(T);

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SubjectPayload {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateChapterPayload {
    subject_id: i64,
    name: String,
    level: u16,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateChapterPayload {
    name: String,
    level: u16,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateTopicPayload {
    chapter_id: i64,
    name: String,
    sequence: u32,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateTopicPayload {
    name: String,
    sequence: u32,
}

/// Only `topic_id` and `url` are accepted; derived fields sent by a client
/// fail deserialization.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CreateLinkPayload {
    topic_id: i64,
    url: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct UpdateLinkPayload {
    url: String,
}

#[derive(Debug, Serialize)]
struct LevelsPayload {
    subject: Subject,
    levels: Vec<u16>,
}

#[derive(Debug, Serialize)]
struct ChaptersPayload {
    subject: Subject,
    level: u16,
    chapters: Vec<Chapter>,
}

#[derive(Debug, Serialize)]
struct TopicsPayload {
    chapter: Chapter,
    topics: Vec<TopicWithLinks>,
}

#[tokio::main]
async fn main() -> Result<()> {
    logging::init()?;
    let args = BackendArgs::parse();
    let config = resolve_config(args.overrides())?;
    let host = parse_host_arg(&config.host)?;
    let links = build_link_service(&config).await?;
    let admin_token = config.admin_token.as_deref().map(Arc::<str>::from);
    if admin_token.is_none() {
        tracing::warn!("CATALOG_ADMIN_TOKEN is not set; admin endpoints will refuse every request");
    }

    let app = router(AppState { links, admin_token });

    let addr = SocketAddr::new(host, config.port);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding to {}", addr))?;
    tracing::info!(%addr, "catalog API listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("running API server")?;

    Ok(())
}

fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/api/admin/subjects", post(create_subject))
        .route(
            "/api/admin/subjects/{id}",
            put(rename_subject).delete(delete_subject),
        )
        .route("/api/admin/chapters", post(create_chapter))
        .route(
            "/api/admin/chapters/{id}",
            put(update_chapter).delete(delete_chapter),
        )
        .route("/api/admin/topics", post(create_topic))
        .route(
            "/api/admin/topics/{id}",
            put(update_topic).delete(delete_topic),
        )
        .route("/api/admin/links", post(create_link))
        .route(
            "/api/admin/links/{id}",
            put(update_link).delete(delete_link),
        )
        .route("/api/admin/links/{id}/refresh", post(refresh_link))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .route("/api/subjects", get(list_subjects))
        .route("/api/subjects/{id}/levels", get(list_levels))
        .route(
            "/api/subjects/{id}/levels/{level}/chapters",
            get(list_chapters),
        )
        .route("/api/chapters/{id}/topics", get(list_topics))
        .merge(admin)
        .fallback(|| async { ApiError::not_found("endpoint not found") })
        .with_state(state)
}

async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> ApiResult<Response> {
    check_admin_token(state.admin_token.as_deref(), request.headers())?;
    Ok(next.run(request).await)
}

fn check_admin_token(expected: Option<&str>, headers: &HeaderMap) -> ApiResult<()> {
    let Some(expected) = expected else {
        return Err(ApiError::with_status(
            StatusCode::FORBIDDEN,
            "admin API is disabled; set CATALOG_ADMIN_TOKEN",
        ));
    };
    let presented = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);
    match presented {
        Some(token) if token == expected => Ok(()),
        _ => Err(ApiError::with_status(
            StatusCode::UNAUTHORIZED,
            "a valid admin bearer token is required",
        )),
    }
}

async fn shutdown_signal() {
    // Only graceful shutdown depends on this; Ctrl+C still terminates.
    if let Err(err) = signal::ctrl_c().await {
        tracing::warn!(error = %err, "failed to install Ctrl+C handler");
    }
}

async fn require_subject(state: &AppState, id: i64) -> ApiResult<Subject> {
    state
        .store()
        .get_subject(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("subject {id} not found")))
}

async fn require_chapter(state: &AppState, id: i64) -> ApiResult<Chapter> {
    state
        .store()
        .get_chapter(id)
        .await?
        .ok_or_else(|| ApiError::not_found(format!("chapter {id} not found")))
}

async fn list_subjects(State(state): State<AppState>) -> ApiResult<Json<Vec<Subject>>> {
    Ok(Json(state.store().list_subjects().await?))
}

async fn list_levels(
    State(state): State<AppState>,
    AxumPath(subject_id): AxumPath<i64>,
) -> ApiResult<Json<LevelsPayload>> {
    let subject = require_subject(&state, subject_id).await?;
    let levels = state.store().list_levels(subject_id).await?;
    Ok(Json(LevelsPayload { subject, levels }))
}

async fn list_chapters(
    State(state): State<AppState>,
    AxumPath((subject_id, level)): AxumPath<(i64, u16)>,
) -> ApiResult<Json<ChaptersPayload>> {
    let subject = require_subject(&state, subject_id).await?;
    let chapters = state.store().list_chapters(subject_id, level).await?;
    Ok(Json(ChaptersPayload {
        subject,
        level,
        chapters,
    }))
}

async fn list_topics(
    State(state): State<AppState>,
    AxumPath(chapter_id): AxumPath<i64>,
) -> ApiResult<Json<TopicsPayload>> {
    let chapter = require_chapter(&state, chapter_id).await?;
    let topics = state.store().list_topics_with_links(chapter_id).await?;
    Ok(Json(TopicsPayload { chapter, topics }))
}

async fn create_subject(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<SubjectPayload>,
) -> ApiResult<(StatusCode, Json<Subject>)> {
    let subject = state.store().create_subject(&payload.name).await?;
    Ok((StatusCode::CREATED, Json(subject)))
}

async fn rename_subject(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    JsonBody(payload): JsonBody<SubjectPayload>,
) -> ApiResult<Json<Subject>> {
    Ok(Json(state.store().rename_subject(id, &payload.name).await?))
}

async fn delete_subject(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<StatusCode> {
    state.store().delete_subject(id).await?;
    tracing::info!(subject_id = id, "subject deleted with its chapters, topics and links");
    Ok(StatusCode::NO_CONTENT)
}

async fn create_chapter(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<CreateChapterPayload>,
) -> ApiResult<(StatusCode, Json<Chapter>)> {
    let chapter = state
        .store()
        .create_chapter(payload.subject_id, &payload.name, payload.level)
        .await?;
    Ok((StatusCode::CREATED, Json(chapter)))
}

async fn update_chapter(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    JsonBody(payload): JsonBody<UpdateChapterPayload>,
) -> ApiResult<Json<Chapter>> {
    Ok(Json(
        state
            .store()
            .update_chapter(id, &payload.name, payload.level)
            .await?,
    ))
}

async fn delete_chapter(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<StatusCode> {
    state.store().delete_chapter(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_topic(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<CreateTopicPayload>,
) -> ApiResult<(StatusCode, Json<learning_catalog::catalog::Topic>)> {
    let topic = state
        .store()
        .create_topic(payload.chapter_id, &payload.name, payload.sequence)
        .await?;
    Ok((StatusCode::CREATED, Json(topic)))
}

async fn update_topic(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    JsonBody(payload): JsonBody<UpdateTopicPayload>,
) -> ApiResult<Json<learning_catalog::catalog::Topic>> {
    Ok(Json(
        state
            .store()
            .update_topic(id, &payload.name, payload.sequence)
            .await?,
    ))
}

async fn delete_topic(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<StatusCode> {
    state.store().delete_topic(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn create_link(
    State(state): State<AppState>,
    JsonBody(payload): JsonBody<CreateLinkPayload>,
) -> ApiResult<(StatusCode, Json<Link>)> {
    let link = state.links.create_link(payload.topic_id, &payload.url).await?;
    Ok((StatusCode::CREATED, Json(link)))
}

async fn update_link(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    JsonBody(payload): JsonBody<UpdateLinkPayload>,
) -> ApiResult<Json<Link>> {
    Ok(Json(state.links.update_link(id, &payload.url).await?))
}

async fn refresh_link(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<Json<Link>> {
    Ok(Json(state.links.refresh_link(id).await?))
}

async fn delete_link(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
) -> ApiResult<StatusCode> {
    state.store().delete_link(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use learning_catalog::catalog::Topic;
    use learning_catalog::enrich::LinkEnricher;
    use learning_catalog::provider::{MetadataProvider, VideoMetadata};
    use learning_catalog::video_id::VideoId;
    use parking_lot::Mutex;
    use serde_json::{Value, json};
    use tempfile::tempdir;

    const VIDEO: &str = "dQw4w9WgXcQ";
    const ADMIN_TOKEN: &str = "s3cret-admin";

    /// Provider double: answers for one known id, counts every call.
    struct StubProvider {
        calls: Mutex<usize>,
    }

    impl MetadataProvider for StubProvider {
        fn fetch_metadata(&self, video_id: &VideoId) -> VideoMetadata {
            *self.calls.lock() += 1;
            if video_id.as_str() != VIDEO {
                return VideoMetadata::empty();
            }
            VideoMetadata {
                title: Some("Never Gonna Give You Up".into()),
                description: Some("Official video. Remastered.".into()),
                thumbnail_url: Some("https://i.ytimg.com/vi/dQw4w9WgXcQ/hqdefault.jpg".into()),
            }
        }
    }

    struct BackendTestContext {
        _temp: tempfile::TempDir,
        state: AppState,
        provider: Arc<StubProvider>,
    }

    impl BackendTestContext {
        async fn new(policy: EnrichmentPolicy) -> Self {
            let temp = tempdir().unwrap();
            let store = CatalogStore::open(&temp.path().join("catalog.db"))
                .await
                .unwrap();
            let provider = Arc::new(StubProvider {
                calls: Mutex::new(0),
            });
            let enricher = LinkEnricher::new(provider.clone(), policy);
            Self {
                state: AppState {
                    links: LinkService::new(Arc::new(store), Arc::new(enricher)),
                    admin_token: Some(Arc::from(ADMIN_TOKEN)),
                },
                provider,
                _temp: temp,
            }
        }

        fn state(&self) -> State<AppState> {
            State(self.state.clone())
        }

        /// Subject → chapter (level 1) → topic, returned bottom-up.
        async fn seed(&self) -> (Subject, Chapter, Topic) {
            let (_, Json(subject)) = create_subject(
                self.state(),
                JsonBody(SubjectPayload {
                    name: "Music".into(),
                }),
            )
            .await
            .unwrap();
            let (_, Json(chapter)) = create_chapter(
                self.state(),
                JsonBody(CreateChapterPayload {
                    subject_id: subject.id,
                    name: "Pop".into(),
                    level: 1,
                }),
            )
            .await
            .unwrap();
            let (_, Json(topic)) = create_topic(
                self.state(),
                JsonBody(CreateTopicPayload {
                    chapter_id: chapter.id,
                    name: "Eighties".into(),
                    sequence: 1,
                }),
            )
            .await
            .unwrap();
            (subject, chapter, topic)
        }
    }

    async fn error_body(err: ApiError) -> (StatusCode, Value) {
        let response = err.into_response();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&body).unwrap())
    }

    #[test]
    fn backend_args_parse_overrides() {
        let args = BackendArgs::try_parse_from([
            "backend",
            "--db",
            "/tmp/catalog.db",
            "--host",
            "0.0.0.0",
            "--port",
            "9000",
            "--policy",
            "lenient",
        ])
        .unwrap();
        let overrides = args.overrides();
        assert_eq!(overrides.db_path, Some(PathBuf::from("/tmp/catalog.db")));
        assert_eq!(overrides.host.as_deref(), Some("0.0.0.0"));
        assert_eq!(overrides.port, Some(9000));
        assert_eq!(overrides.policy, Some(EnrichmentPolicy::Lenient));
    }

    #[test]
    fn backend_args_reject_bad_values() {
        assert!(BackendArgs::try_parse_from(["backend", "--policy", "maybe"]).is_err());
        assert!(BackendArgs::try_parse_from(["backend", "--host", "localhost:80"]).is_err());
        assert!(BackendArgs::try_parse_from(["backend", "--port", "70000"]).is_err());
    }

    #[test]
    fn link_payload_rejects_derived_fields() {
        let ok: Result<CreateLinkPayload, _> =
            serde_json::from_value(json!({"topic_id": 1, "url": "https://youtu.be/dQw4w9WgXcQ"}));
        assert!(ok.is_ok());
        for field in ["video_id", "title", "description", "thumbnail_url"] {
            let mut body = json!({"topic_id": 1, "url": "https://youtu.be/dQw4w9WgXcQ"});
            body[field] = json!("client supplied");
            let parsed: Result<CreateLinkPayload, _> = serde_json::from_value(body);
            assert!(parsed.is_err(), "{field} should be rejected");
        }
        let parsed: Result<UpdateLinkPayload, _> =
            serde_json::from_value(json!({"url": "x", "title": "nope"}));
        assert!(parsed.is_err());
    }

    #[tokio::test]
    async fn browse_flow_returns_enriched_links() {
        let ctx = BackendTestContext::new(EnrichmentPolicy::Strict).await;
        let (subject, chapter, topic) = ctx.seed().await;

        let (status, Json(link)) = create_link(
            ctx.state(),
            JsonBody(CreateLinkPayload {
                topic_id: topic.id,
                url: format!("https://youtu.be/{VIDEO}?t=10"),
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(link.derived.video_id.as_deref(), Some(VIDEO));
        assert_eq!(link.derived.description.as_deref(), Some("Official video."));

        let Json(subjects) = list_subjects(ctx.state()).await.unwrap();
        assert_eq!(subjects, vec![subject.clone()]);

        let Json(levels) = list_levels(ctx.state(), AxumPath(subject.id)).await.unwrap();
        assert_eq!(levels.levels, vec![1]);

        let Json(chapters) = list_chapters(ctx.state(), AxumPath((subject.id, 1)))
            .await
            .unwrap();
        assert_eq!(chapters.chapters, vec![chapter.clone()]);

        let Json(topics) = list_topics(ctx.state(), AxumPath(chapter.id)).await.unwrap();
        assert_eq!(topics.topics.len(), 1);
        assert_eq!(topics.topics[0].links, vec![link]);

        let rendered = serde_json::to_value(&topics).unwrap();
        assert_eq!(
            rendered["topics"][0]["links"][0]["title"],
            "Never Gonna Give You Up"
        );
        assert_eq!(rendered["topics"][0]["name"], "Eighties");
    }

    #[tokio::test]
    async fn strict_backend_rejects_unrecognized_links() {
        let ctx = BackendTestContext::new(EnrichmentPolicy::Strict).await;
        let (_, chapter, topic) = ctx.seed().await;

        let err = create_link(
            ctx.state(),
            JsonBody(CreateLinkPayload {
                topic_id: topic.id,
                url: "not a url".into(),
            }),
        )
        .await
        .unwrap_err();
        let (status, body) = error_body(err).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("not a url"));

        let err = create_link(
            ctx.state(),
            JsonBody(CreateLinkPayload {
                topic_id: topic.id,
                url: "https://www.youtube.com/watch?v=aaaaaaaaaaa".into(),
            }),
        )
        .await
        .unwrap_err();
        let (status, body) = error_body(err).await;
        assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body["error"].as_str().unwrap().contains("private or deleted"));

        let Json(topics) = list_topics(ctx.state(), AxumPath(chapter.id)).await.unwrap();
        assert!(topics.topics[0].links.is_empty());
    }

    #[tokio::test]
    async fn lenient_backend_stores_unrecognized_links() {
        let ctx = BackendTestContext::new(EnrichmentPolicy::Lenient).await;
        let (_, _, topic) = ctx.seed().await;

        let (status, Json(link)) = create_link(
            ctx.state(),
            JsonBody(CreateLinkPayload {
                topic_id: topic.id,
                url: "not a url".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(status, StatusCode::CREATED);
        assert!(link.derived.is_empty());
        assert_eq!(*ctx.provider.calls.lock(), 0);
    }

    #[tokio::test]
    async fn update_and_refresh_rewrite_derived_fields() {
        let ctx = BackendTestContext::new(EnrichmentPolicy::Strict).await;
        let (_, _, topic) = ctx.seed().await;
        let (_, Json(link)) = create_link(
            ctx.state(),
            JsonBody(CreateLinkPayload {
                topic_id: topic.id,
                url: format!("https://www.youtube.com/watch?v={VIDEO}"),
            }),
        )
        .await
        .unwrap();

        let Json(updated) = update_link(
            ctx.state(),
            AxumPath(link.id),
            JsonBody(UpdateLinkPayload {
                url: "https://example.com/lyrics".into(),
            }),
        )
        .await
        .unwrap();
        assert!(updated.derived.is_empty());

        let Json(refreshed) = refresh_link(ctx.state(), AxumPath(link.id)).await.unwrap();
        assert_eq!(refreshed, updated);

        let err = refresh_link(ctx.state(), AxumPath(999)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn deleting_a_subject_removes_everything_below_it() {
        let ctx = BackendTestContext::new(EnrichmentPolicy::Strict).await;
        let (subject, chapter, topic) = ctx.seed().await;
        let (_, Json(link)) = create_link(
            ctx.state(),
            JsonBody(CreateLinkPayload {
                topic_id: topic.id,
                url: format!("https://youtu.be/{VIDEO}"),
            }),
        )
        .await
        .unwrap();

        let status = delete_subject(ctx.state(), AxumPath(subject.id)).await.unwrap();
        assert_eq!(status, StatusCode::NO_CONTENT);

        let err = list_topics(ctx.state(), AxumPath(chapter.id)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert!(ctx.state.store().get_link(link.id).await.unwrap().is_none());

        let err = delete_subject(ctx.state(), AxumPath(subject.id)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn admin_errors_map_to_statuses() {
        let ctx = BackendTestContext::new(EnrichmentPolicy::Strict).await;
        let (subject, _, _) = ctx.seed().await;

        let err = create_subject(ctx.state(), JsonBody(SubjectPayload { name: "Music".into() }))
            .await
            .unwrap_err();
        assert_eq!(err.status, StatusCode::CONFLICT);

        let err = rename_subject(
            ctx.state(),
            AxumPath(subject.id),
            JsonBody(SubjectPayload { name: "  ".into() }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);

        let err = create_link(
            ctx.state(),
            JsonBody(CreateLinkPayload {
                topic_id: 999,
                url: format!("https://youtu.be/{VIDEO}"),
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err = list_levels(ctx.state(), AxumPath(999)).await.unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);

        let err = update_topic(
            ctx.state(),
            AxumPath(999),
            JsonBody(UpdateTopicPayload {
                name: "x".into(),
                sequence: 1,
            }),
        )
        .await
        .unwrap_err();
        assert_eq!(err.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn chapter_updates_move_levels() {
        let ctx = BackendTestContext::new(EnrichmentPolicy::Strict).await;
        let (subject, chapter, _) = ctx.seed().await;

        let Json(moved) = update_chapter(
            ctx.state(),
            AxumPath(chapter.id),
            JsonBody(UpdateChapterPayload {
                name: "Pop".into(),
                level: 4,
            }),
        )
        .await
        .unwrap();
        assert_eq!(moved.level, 4);

        let Json(levels) = list_levels(ctx.state(), AxumPath(subject.id)).await.unwrap();
        assert_eq!(levels.levels, vec![4]);
    }

    #[tokio::test]
    async fn api_error_serializes_json() {
        let (status, body) = error_body(ApiError::not_found("missing")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "missing");
    }

    /// Serves `state` on an ephemeral port so requests go through the full
    /// router, middleware and extractors.
    async fn serve(state: AppState) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, router(state)).await;
        });
        format!("http://{addr}")
    }

    fn send(method: &str, url: &str, token: Option<&str>, body: Option<Value>) -> (u16, Value) {
        let mut request = ureq::request(method, url);
        if let Some(token) = token {
            request = request.set("Authorization", &format!("Bearer {token}"));
        }
        let result = match body {
            Some(body) => request.send_json(body),
            None => request.call(),
        };
        let response = match result {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(err) => panic!("request to {url} failed: {err}"),
        };
        let status = response.status();
        (status, response.into_json().unwrap_or(Value::Null))
    }

    async fn send_blocking(
        method: &'static str,
        url: String,
        token: Option<&'static str>,
        body: Option<Value>,
    ) -> (u16, Value) {
        tokio::task::spawn_blocking(move || send(method, &url, token, body))
            .await
            .unwrap()
    }

    #[test]
    fn admin_token_check() {
        let mut headers = HeaderMap::new();
        let err = check_admin_token(Some("t0ken"), &headers).unwrap_err();
        assert_eq!(err.status, StatusCode::UNAUTHORIZED);

        headers.insert(header::AUTHORIZATION, "Basic t0ken".parse().unwrap());
        assert!(check_admin_token(Some("t0ken"), &headers).is_err());

        headers.insert(header::AUTHORIZATION, "Bearer other".parse().unwrap());
        assert!(check_admin_token(Some("t0ken"), &headers).is_err());

        headers.insert(header::AUTHORIZATION, "Bearer t0ken".parse().unwrap());
        assert!(check_admin_token(Some("t0ken"), &headers).is_ok());

        let err = check_admin_token(None, &headers).unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn admin_routes_require_the_bearer_token() {
        let ctx = BackendTestContext::new(EnrichmentPolicy::Strict).await;
        let base = serve(ctx.state.clone()).await;
        let url = format!("{base}/api/admin/subjects");

        let (status, body) =
            send_blocking("POST", url.clone(), None, Some(json!({"name": "Art"}))).await;
        assert_eq!(status, 401);
        assert!(body["error"].is_string(), "{body}");

        let (status, _) =
            send_blocking("POST", url.clone(), Some("guess"), Some(json!({"name": "Art"}))).await;
        assert_eq!(status, 401);
        assert!(ctx.state.store().list_subjects().await.unwrap().is_empty());

        let (status, body) =
            send_blocking("POST", url, Some(ADMIN_TOKEN), Some(json!({"name": "Art"}))).await;
        assert_eq!(status, 201);
        assert_eq!(body["name"], "Art");

        let (status, body) = send_blocking("GET", format!("{base}/api/subjects"), None, None).await;
        assert_eq!(status, 200);
        assert_eq!(body[0]["name"], "Art");
    }

    #[tokio::test]
    async fn admin_api_is_closed_without_a_configured_token() {
        let ctx = BackendTestContext::new(EnrichmentPolicy::Strict).await;
        let mut state = ctx.state.clone();
        state.admin_token = None;
        let base = serve(state).await;

        let (status, body) = send_blocking(
            "POST",
            format!("{base}/api/admin/subjects"),
            Some(ADMIN_TOKEN),
            Some(json!({"name": "Art"})),
        )
        .await;
        assert_eq!(status, 403);
        assert!(body["error"].as_str().unwrap().contains("CATALOG_ADMIN_TOKEN"));
    }

    #[tokio::test]
    async fn rejected_bodies_use_the_json_error_shape() {
        let ctx = BackendTestContext::new(EnrichmentPolicy::Strict).await;
        let (_, _, topic) = ctx.seed().await;
        let base = serve(ctx.state.clone()).await;
        let url = format!("{base}/api/admin/links");

        let (status, body) = send_blocking(
            "POST",
            url.clone(),
            Some(ADMIN_TOKEN),
            Some(json!({
                "topic_id": topic.id,
                "url": format!("https://youtu.be/{VIDEO}"),
                "title": "client supplied",
            })),
        )
        .await;
        assert_eq!(status, 422);
        assert!(
            body["error"].as_str().unwrap().contains("unknown field"),
            "{body}"
        );

        let (status, body) = send_blocking(
            "POST",
            url.clone(),
            Some(ADMIN_TOKEN),
            Some(json!({"topic_id": "first", "url": "x"})),
        )
        .await;
        assert_eq!(status, 422);
        assert!(body["error"].is_string(), "{body}");

        // No body at all: missing JSON content type.
        let (status, body) = send_blocking("POST", url, Some(ADMIN_TOKEN), None).await;
        assert_eq!(status, 415);
        assert!(body["error"].is_string(), "{body}");

        assert!(ctx.state.store().list_links(None).await.unwrap().is_empty());
    }
}
