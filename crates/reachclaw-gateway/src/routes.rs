//! Route handlers for the dashboard API.
//!
//! Every response is a JSON envelope with an `ok` flag; failures carry an
//! `error` string and a status code derived from the error class. Mutations
//! on the outreach queue only write store state, the engine does the rest.

use axum::Json;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;

use reachclaw_core::config::RateLimitConfig;
use reachclaw_core::error::ReachClawError;
use reachclaw_store::{ContactStatus, InteractionStatus, InteractionType, PostStatus};

use super::server::AppState;

type ApiResponse = (StatusCode, Json<serde_json::Value>);

fn ok(body: serde_json::Value) -> ApiResponse {
    (StatusCode::OK, Json(body))
}

fn fail(e: ReachClawError) -> ApiResponse {
    let status = match &e {
        ReachClawError::Validation(_) => StatusCode::BAD_REQUEST,
        ReachClawError::NotFound(_) => StatusCode::NOT_FOUND,
        ReachClawError::Conflict(_) => StatusCode::CONFLICT,
        ReachClawError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
        ReachClawError::Content(_) => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({"ok": false, "error": e.to_string()})),
    )
}

pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "reachclaw",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub async fn system_info(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let uptime = state.start_time.elapsed().as_secs();
    Json(serde_json::json!({
        "ok": true,
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": uptime,
        "content_provider": state.content.is_some(),
    }))
}

// ── Contacts ──────────────────────────────

#[derive(Deserialize)]
pub struct CreateContactBody {
    pub profile_url: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub company: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub industry: String,
    #[serde(default)]
    pub connection_degree: String,
    #[serde(default)]
    pub keywords: String,
    #[serde(default)]
    pub tags: Vec<String>,
}

pub async fn create_contact(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreateContactBody>,
) -> ApiResponse {
    match state.db.create_contact(
        &body.profile_url,
        &body.name,
        &body.title,
        &body.company,
        &body.location,
        &body.industry,
        &body.connection_degree,
        &body.keywords,
        &body.tags,
    ) {
        Ok(contact) => ok(serde_json::json!({"ok": true, "contact": contact})),
        Err(e) => fail(e),
    }
}

pub async fn list_contacts(State(state): State<Arc<AppState>>) -> ApiResponse {
    match state.db.list_contacts() {
        Ok(contacts) => ok(serde_json::json!({"ok": true, "contacts": contacts})),
        Err(e) => fail(e),
    }
}

#[derive(Deserialize)]
pub struct ContactSearchQuery {
    #[serde(default)]
    pub q: String,
    #[serde(default)]
    pub industry: String,
    #[serde(default)]
    pub location: String,
    pub status: Option<String>,
}

pub async fn search_contacts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ContactSearchQuery>,
) -> ApiResponse {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(s) => match ContactStatus::parse(s) {
            Ok(parsed) => Some(parsed),
            Err(e) => return fail(e),
        },
    };
    match state
        .db
        .search_contacts(&query.q, &query.industry, &query.location, status)
    {
        Ok(contacts) => ok(serde_json::json!({"ok": true, "contacts": contacts})),
        Err(e) => fail(e),
    }
}

pub async fn get_contact(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResponse {
    match state.db.get_contact(id) {
        Ok(contact) => ok(serde_json::json!({"ok": true, "contact": contact})),
        Err(e) => fail(e),
    }
}

#[derive(Deserialize)]
pub struct UpdateContactBody {
    pub name: Option<String>,
    pub title: Option<String>,
    pub company: Option<String>,
    pub location: Option<String>,
    pub industry: Option<String>,
    pub notes: Option<String>,
    pub tags: Option<Vec<String>>,
    pub status: Option<String>,
}

pub async fn update_contact(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateContactBody>,
) -> ApiResponse {
    let status = match body.status.as_deref() {
        None => None,
        Some(s) => match ContactStatus::parse(s) {
            Ok(parsed) => Some(parsed),
            Err(e) => return fail(e),
        },
    };
    match state.db.update_contact(
        id,
        body.name.as_deref(),
        body.title.as_deref(),
        body.company.as_deref(),
        body.location.as_deref(),
        body.industry.as_deref(),
        body.notes.as_deref(),
        body.tags.as_deref(),
        status,
    ) {
        Ok(contact) => ok(serde_json::json!({"ok": true, "contact": contact})),
        Err(e) => fail(e),
    }
}

pub async fn delete_contact(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResponse {
    match state.db.delete_contact(id) {
        Ok(cancelled) => ok(serde_json::json!({
            "ok": true,
            "message": format!("Contact {id} deleted, {cancelled} pending interaction(s) cancelled"),
        })),
        Err(e) => fail(e),
    }
}

#[derive(Deserialize, Default)]
pub struct ConnectBody {
    /// Optional note attached to the connection request.
    pub note: Option<String>,
}

/// Enqueue a connection request for a contact. The contact's status stays
/// `pending` until the engine reports the outcome.
pub async fn connect_contact(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    body: Option<Json<ConnectBody>>,
) -> ApiResponse {
    let contact = match state.db.get_contact(id) {
        Ok(c) => c,
        Err(e) => return fail(e),
    };
    if contact.status == ContactStatus::Connected {
        return fail(ReachClawError::Conflict(format!(
            "contact {id} is already connected"
        )));
    }
    let note = body.and_then(|Json(b)| b.note);
    match state.db.enqueue_interaction(
        InteractionType::ConnectionRequest,
        Some(id),
        &contact.profile_url,
        note.as_deref(),
        None,
        "",
    ) {
        Ok(interaction) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "ok": true,
                "contact": contact,
                "interaction": interaction,
            })),
        ),
        Err(e) => fail(e),
    }
}

// ── Interaction queue ──────────────────────────────

#[derive(Deserialize)]
pub struct EnqueueBody {
    #[serde(rename = "type")]
    pub itype: String,
    pub target_id: Option<i64>,
    pub target_url: Option<String>,
    pub content: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    pub notes: String,
}

/// Accept a new interaction into the queue. The response acknowledges
/// acceptance; execution happens on the engine's clock.
pub async fn enqueue_interaction(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EnqueueBody>,
) -> ApiResponse {
    let itype = match InteractionType::parse(&body.itype) {
        Ok(t) => t,
        Err(e) => return fail(e),
    };
    // resolve the target URL from the contact when only an id was sent
    let target_url = match (&body.target_url, body.target_id) {
        (Some(url), _) => url.clone(),
        (None, Some(cid)) => match state.db.get_contact(cid) {
            Ok(contact) => contact.profile_url,
            Err(e) => return fail(e),
        },
        (None, None) => {
            return fail(ReachClawError::Validation(
                "target_url or target_id is required".into(),
            ));
        }
    };
    match state.db.enqueue_interaction(
        itype,
        body.target_id,
        &target_url,
        body.content.as_deref(),
        body.scheduled_for,
        &body.notes,
    ) {
        Ok(interaction) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"ok": true, "interaction": interaction})),
        ),
        Err(e) => fail(e),
    }
}

#[derive(Deserialize)]
pub struct InteractionListQuery {
    pub status: Option<String>,
}

pub async fn list_interactions(
    State(state): State<Arc<AppState>>,
    Query(query): Query<InteractionListQuery>,
) -> ApiResponse {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(s) => match InteractionStatus::parse(s) {
            Ok(parsed) => Some(parsed),
            Err(e) => return fail(e),
        },
    };
    match state.db.list_interactions(status) {
        Ok(interactions) => ok(serde_json::json!({"ok": true, "interactions": interactions})),
        Err(e) => fail(e),
    }
}

pub async fn get_interaction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResponse {
    match state.db.get_interaction(id) {
        Ok(interaction) => ok(serde_json::json!({"ok": true, "interaction": interaction})),
        Err(e) => fail(e),
    }
}

#[derive(Deserialize)]
pub struct UpdateInteractionBody {
    pub content: String,
}

pub async fn update_interaction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateInteractionBody>,
) -> ApiResponse {
    match state.db.update_interaction_content(id, &body.content) {
        Ok(interaction) => ok(serde_json::json!({"ok": true, "interaction": interaction})),
        Err(e) => fail(e),
    }
}

pub async fn delete_interaction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResponse {
    match state.db.delete_interaction(id) {
        Ok(()) => ok(serde_json::json!({"ok": true, "message": format!("Interaction {id} cancelled")})),
        Err(e) => fail(e),
    }
}

pub async fn retry_interaction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> ApiResponse {
    match state.db.retry_interaction(id) {
        Ok(interaction) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!({"ok": true, "interaction": interaction})),
        ),
        Err(e) => fail(e),
    }
}

#[derive(Deserialize)]
pub struct GenerateCommentBody {
    pub post_content: String,
    #[serde(default = "default_tone")]
    pub tone: String,
}

fn default_tone() -> String {
    "professional".into()
}

pub async fn generate_comment(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GenerateCommentBody>,
) -> ApiResponse {
    let Some(provider) = &state.content else {
        return fail(ReachClawError::Content(
            "no content endpoint configured".into(),
        ));
    };
    match provider.generate_comment(&body.post_content, &body.tone).await {
        Ok(generated) => ok(serde_json::json!({"ok": true, "content": generated.content})),
        Err(e) => fail(e),
    }
}

// ── Posts ──────────────────────────────

#[derive(Deserialize)]
pub struct CreatePostBody {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub hashtags: Vec<String>,
    #[serde(default = "default_post_status")]
    pub status: String,
    pub scheduled_for: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ai_generated: bool,
    pub ai_prompt: Option<String>,
}

fn default_post_status() -> String {
    "draft".into()
}

pub async fn create_post(
    State(state): State<Arc<AppState>>,
    Json(body): Json<CreatePostBody>,
) -> ApiResponse {
    let status = match PostStatus::parse(&body.status) {
        Ok(parsed) => parsed,
        Err(e) => return fail(e),
    };
    match state.db.create_post(
        &body.title,
        &body.content,
        &body.hashtags,
        status,
        body.scheduled_for,
        body.ai_generated,
        body.ai_prompt.as_deref(),
    ) {
        Ok(post) => ok(serde_json::json!({"ok": true, "post": post})),
        Err(e) => fail(e),
    }
}

#[derive(Deserialize)]
pub struct PostListQuery {
    pub status: Option<String>,
}

pub async fn list_posts(
    State(state): State<Arc<AppState>>,
    Query(query): Query<PostListQuery>,
) -> ApiResponse {
    let status = match query.status.as_deref() {
        None | Some("") => None,
        Some(s) => match PostStatus::parse(s) {
            Ok(parsed) => Some(parsed),
            Err(e) => return fail(e),
        },
    };
    match state.db.list_posts(status) {
        Ok(posts) => ok(serde_json::json!({"ok": true, "posts": posts})),
        Err(e) => fail(e),
    }
}

pub async fn get_post(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResponse {
    match state.db.get_post(id) {
        Ok(post) => ok(serde_json::json!({"ok": true, "post": post})),
        Err(e) => fail(e),
    }
}

#[derive(Deserialize)]
pub struct UpdatePostBody {
    pub title: Option<String>,
    pub content: Option<String>,
    pub hashtags: Option<Vec<String>>,
    pub status: Option<String>,
    pub scheduled_for: Option<DateTime<Utc>>,
}

pub async fn update_post(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<UpdatePostBody>,
) -> ApiResponse {
    let status = match body.status.as_deref() {
        None => None,
        Some(s) => match PostStatus::parse(s) {
            Ok(parsed) => Some(parsed),
            Err(e) => return fail(e),
        },
    };
    match state.db.update_post(
        id,
        body.title.as_deref(),
        body.content.as_deref(),
        body.hashtags.as_deref(),
        status,
        body.scheduled_for.map(Some),
    ) {
        Ok(post) => ok(serde_json::json!({"ok": true, "post": post})),
        Err(e) => fail(e),
    }
}

pub async fn delete_post(State(state): State<Arc<AppState>>, Path(id): Path<i64>) -> ApiResponse {
    match state.db.delete_post(id) {
        Ok(()) => ok(serde_json::json!({"ok": true, "message": format!("Post {id} deleted")})),
        Err(e) => fail(e),
    }
}

#[derive(Deserialize)]
pub struct GeneratePostBody {
    pub topic: String,
    #[serde(default = "default_tone")]
    pub tone: String,
    #[serde(default = "default_length")]
    pub length: String,
}

fn default_length() -> String {
    "medium".into()
}

pub async fn generate_post(
    State(state): State<Arc<AppState>>,
    Json(body): Json<GeneratePostBody>,
) -> ApiResponse {
    let Some(provider) = &state.content else {
        return fail(ReachClawError::Content(
            "no content endpoint configured".into(),
        ));
    };
    match provider.generate_post(&body.topic, &body.tone, &body.length).await {
        Ok(generated) => ok(serde_json::json!({
            "ok": true,
            "content": generated.content,
            "hashtags": generated.hashtags,
        })),
        Err(e) => fail(e),
    }
}

// ── Settings and stats ──────────────────────────────

pub async fn get_settings(State(state): State<Arc<AppState>>) -> ApiResponse {
    match state.db.get_settings() {
        Ok(Some(doc)) => ok(serde_json::json!({"ok": true, "settings": doc})),
        Ok(None) => ok(serde_json::json!({
            "ok": true,
            "settings": { "rate_limiting": RateLimitConfig::default() },
        })),
        Err(e) => fail(e),
    }
}

/// Persist the settings document. The engine reads it between ticks, so new
/// ceilings apply to the next batch without a restart.
pub async fn update_settings(
    State(state): State<Arc<AppState>>,
    Json(body): Json<serde_json::Value>,
) -> ApiResponse {
    if !body.is_object() {
        return fail(ReachClawError::Validation(
            "settings must be a JSON object".into(),
        ));
    }
    if let Some(rl) = body.get("rate_limiting") {
        if serde_json::from_value::<RateLimitConfig>(rl.clone()).is_err() {
            return fail(ReachClawError::Validation(
                "rate_limiting has the wrong shape".into(),
            ));
        }
    }
    match state.db.put_settings(&body) {
        Ok(()) => ok(serde_json::json!({
            "ok": true,
            "message": "Settings saved, applied on the next engine tick",
        })),
        Err(e) => fail(e),
    }
}

#[derive(Deserialize)]
pub struct StatsQuery {
    pub time_range: Option<String>,
}

pub async fn get_stats(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatsQuery>,
) -> ApiResponse {
    let since = match query.time_range.as_deref() {
        None | Some("all") | Some("") => None,
        Some("7d") => Some(Utc::now() - chrono::Duration::days(7)),
        Some("30d") => Some(Utc::now() - chrono::Duration::days(30)),
        Some("90d") => Some(Utc::now() - chrono::Duration::days(90)),
        Some(other) => {
            return fail(ReachClawError::Validation(format!(
                "unknown time_range '{other}', expected 7d, 30d, 90d or all"
            )));
        }
    };
    match state.db.stats_since(since) {
        Ok(stats) => ok(serde_json::json!({"ok": true, "stats": stats})),
        Err(e) => fail(e),
    }
}
