//! User-facing data helpers over the managed backend: favorites, profiles,
//! shared style links, photo uploads and the auth session.
//!
//! The backend is reached only through [`TableStore`] and [`AuthProvider`],
//! so the helpers run unchanged against Supabase or an in-memory fake.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use parking_lot::RwLock;
use rand::Rng;
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{error, info};
use uuid::Uuid;

use crate::models::{Favorite, Session, SharedStyleLink, User, UserProfile};

pub const FAVORITES_TABLE: &str = "favorites";
pub const PROFILES_TABLE: &str = "user_profiles";
pub const SHARED_STYLES_TABLE: &str = "shared_styles";
pub const PHOTO_BUCKET: &str = "user-photos";

#[derive(Debug, Error)]
pub enum DataError {
    #[error("authentication required")]
    Unauthenticated,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    Invalid(String),
    #[error("backend error ({status}): {message}")]
    Backend { status: u16, message: String },
    #[error("HTTP error: {0}")]
    Http(String),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("configuration error: {0}")]
    Configuration(String),
}

/// Equality filters, `(column, value)`.
pub type Filters<'a> = &'a [(&'a str, String)];

/// Row-level operations against the managed backend. `token` is the caller's
/// access token; `None` means the anonymous role.
#[async_trait]
pub trait TableStore: Send + Sync {
    async fn insert(&self, table: &str, row: Value, token: Option<&str>) -> Result<Value, DataError>;
    async fn select(&self, table: &str, filters: Filters<'_>, token: Option<&str>) -> Result<Vec<Value>, DataError>;
    async fn upsert(&self, table: &str, row: Value, on_conflict: &str, token: Option<&str>) -> Result<Value, DataError>;
    async fn delete(&self, table: &str, filters: Filters<'_>, token: Option<&str>) -> Result<Vec<Value>, DataError>;
    /// Stores an object and returns its public URL.
    async fn upload(&self, bucket: &str, path: &str, data: Bytes, content_type: &str, token: Option<&str>) -> Result<String, DataError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SignUpOutcome {
    pub user: User,
    /// Absent while the email address awaits confirmation.
    pub session: Option<Session>,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, DataError>;
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, DataError>;
    async fn sign_out(&self, access_token: &str) -> Result<(), DataError>;
    async fn get_user(&self, access_token: &str) -> Result<User, DataError>;
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthEvent {
    SignedIn(User),
    SignedOut,
}

pub struct ClientData {
    tables: Arc<dyn TableStore>,
    auth: Arc<dyn AuthProvider>,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
}

fn logged<T>(operation: &str, result: Result<T, DataError>) -> Result<T, DataError> {
    if let Err(e) = &result {
        error!(operation, "❌ {}", e);
    }
    result
}

fn decode<T: DeserializeOwned>(row: Value) -> Result<T, DataError> {
    serde_json::from_value(row).map_err(|e| DataError::Decode(e.to_string()))
}

impl ClientData {
    pub fn new(tables: Arc<dyn TableStore>, auth: Arc<dyn AuthProvider>) -> Self {
        let (events, _) = broadcast::channel(16);
        Self { tables, auth, session: RwLock::new(None), events }
    }

    fn require_session(&self) -> Result<Session, DataError> {
        self.session.read().clone().ok_or(DataError::Unauthenticated)
    }

    fn set_session(&self, session: Option<Session>) {
        let event = match &session {
            Some(s) => AuthEvent::SignedIn(s.user.clone()),
            None => AuthEvent::SignedOut,
        };
        *self.session.write() = session;
        // no subscribers is fine
        let _ = self.events.send(event);
    }

    // --- Favorites ---

    /// Saves (or re-saves) a style for the signed-in user. The snapshot must carry an `id`.
    pub async fn save_favorite(&self, style_snapshot: Value, personal_note: &str) -> Result<Favorite, DataError> {
        let result: Result<Favorite, DataError> = async {
            let session = self.require_session()?;
            let style_id = style_snapshot
                .get("id")
                .and_then(Value::as_str)
                .ok_or_else(|| DataError::Invalid("style snapshot has no id".into()))?
                .to_string();
            let row = json!({
                "user_id": session.user.id,
                "style_id": style_id,
                "style_snapshot": style_snapshot,
                "personal_note": personal_note,
                "created_at": Utc::now(),
            });
            let saved = self.tables
                .upsert(FAVORITES_TABLE, row, "user_id,style_id", Some(&session.access_token))
                .await?;
            decode(saved)
        }.await;
        logged("save_favorite", result)
    }

    /// Favorites of the signed-in user, newest first.
    pub async fn get_favorites(&self) -> Result<Vec<Favorite>, DataError> {
        let result: Result<Vec<Favorite>, DataError> = async {
            let session = self.require_session()?;
            let rows = self.tables
                .select(FAVORITES_TABLE, &[("user_id", session.user.id.to_string())], Some(&session.access_token))
                .await?;
            let mut favorites = rows.into_iter().map(decode).collect::<Result<Vec<Favorite>, _>>()?;
            favorites.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(favorites)
        }.await;
        logged("get_favorites", result)
    }

    pub async fn remove_favorite(&self, style_id: &str) -> Result<(), DataError> {
        let result: Result<(), DataError> = async {
            let session = self.require_session()?;
            let filters = [("user_id", session.user.id.to_string()), ("style_id", style_id.to_string())];
            self.tables.delete(FAVORITES_TABLE, &filters, Some(&session.access_token)).await?;
            Ok(())
        }.await;
        logged("remove_favorite", result)
    }

    // --- Profile ---

    /// Creates the profile if absent, otherwise updates it.
    pub async fn save_user_profile(&self, preferences: Map<String, Value>) -> Result<UserProfile, DataError> {
        let result: Result<UserProfile, DataError> = async {
            let session = self.require_session()?;
            let mut row = preferences;
            row.insert("user_id".into(), json!(session.user.id));
            row.insert("updated_at".into(), json!(Utc::now()));
            let saved = self.tables
                .upsert(PROFILES_TABLE, Value::Object(row), "user_id", Some(&session.access_token))
                .await?;
            decode(saved)
        }.await;
        logged("save_user_profile", result)
    }

    pub async fn get_user_profile(&self) -> Result<Option<UserProfile>, DataError> {
        let result: Result<Option<UserProfile>, DataError> = async {
            let session = self.require_session()?;
            let rows = self.tables
                .select(PROFILES_TABLE, &[("user_id", session.user.id.to_string())], Some(&session.access_token))
                .await?;
            rows.into_iter().next().map(decode).transpose()
        }.await;
        logged("get_user_profile", result)
    }

    // --- Shared links ---

    /// Publishes an immutable snapshot. Works signed out; the owner is recorded when known.
    pub async fn create_shared_link(&self, style_snapshot: Value, personal_note: &str) -> Result<SharedStyleLink, DataError> {
        let session = self.session.read().clone();
        let link = SharedStyleLink {
            share_id: generate_share_id(),
            user_id: session.as_ref().map(|s| s.user.id),
            style_snapshot,
            personal_note: personal_note.to_string(),
            created_at: Utc::now(),
        };
        let result: Result<SharedStyleLink, DataError> = async {
            let row = serde_json::to_value(&link).map_err(|e| DataError::Decode(e.to_string()))?;
            let token = session.as_ref().map(|s| s.access_token.as_str());
            let saved = self.tables.insert(SHARED_STYLES_TABLE, row, token).await?;
            decode(saved)
        }.await;
        if let Ok(link) = &result {
            info!(share_id = %link.share_id, "🔗 Created shared style link");
        }
        logged("create_shared_link", result)
    }

    pub async fn get_shared_link(&self, share_id: &str) -> Result<SharedStyleLink, DataError> {
        let result: Result<SharedStyleLink, DataError> = async {
            let rows = self.tables
                .select(SHARED_STYLES_TABLE, &[("share_id", share_id.to_string())], None)
                .await?;
            let row = rows.into_iter().next().ok_or_else(|| DataError::NotFound(format!("shared link {share_id}")))?;
            decode(row)
        }.await;
        logged("get_shared_link", result)
    }

    // --- Storage ---

    pub async fn upload_photo(&self, data: Bytes, content_type: &str) -> Result<String, DataError> {
        let result: Result<String, DataError> = async {
            let session = self.require_session()?;
            let ext = match content_type {
                "image/jpeg" | "image/jpg" => "jpg",
                "image/png" => "png",
                "image/webp" => "webp",
                "image/heic" => "heic",
                other => return Err(DataError::Invalid(format!("unsupported content type {other}"))),
            };
            let path = format!("{}/{}.{}", session.user.id, Uuid::new_v4(), ext);
            self.tables
                .upload(PHOTO_BUCKET, &path, data, content_type, Some(&session.access_token))
                .await
        }.await;
        logged("upload_photo", result)
    }

    // --- Auth passthroughs ---

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, DataError> {
        let result = self.auth.sign_in(email, password).await;
        if let Ok(session) = &result {
            self.set_session(Some(session.clone()));
        }
        logged("sign_in", result)
    }

    pub async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, DataError> {
        let result = self.auth.sign_up(email, password).await;
        if let Ok(SignUpOutcome { session: Some(session), .. }) = &result {
            self.set_session(Some(session.clone()));
        }
        logged("sign_up", result)
    }

    /// Ends the session locally even when the backend call fails.
    pub async fn sign_out(&self) -> Result<(), DataError> {
        let Some(session) = self.session.read().clone() else {
            return Ok(());
        };
        let result = self.auth.sign_out(&session.access_token).await;
        self.set_session(None);
        logged("sign_out", result)
    }

    /// The signed-in user as the backend currently sees it, `None` when signed out.
    pub async fn current_user(&self) -> Result<Option<User>, DataError> {
        let Some(session) = self.session.read().clone() else {
            return Ok(None);
        };
        logged("current_user", self.auth.get_user(&session.access_token).await.map(Some))
    }

    pub fn subscribe_auth_state(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

/// Base-36 millisecond timestamp followed by nine random base-36 characters.
pub fn generate_share_id() -> String {
    const ALPHABET: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut millis = Utc::now().timestamp_millis().max(0) as u64;
    let mut prefix = Vec::new();
    loop {
        prefix.push(ALPHABET[(millis % 36) as usize]);
        millis /= 36;
        if millis == 0 {
            break;
        }
    }
    prefix.reverse();

    let mut rng = rand::thread_rng();
    let suffix = (0..9).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())]);
    prefix.into_iter().chain(suffix).map(char::from).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::{HashMap, HashSet};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// In-memory table store keyed by table name. Counts writes so tests can
    /// assert that rejected calls never reached the backend.
    #[derive(Default)]
    pub(crate) struct MemoryTables {
        rows: parking_lot::Mutex<HashMap<String, Vec<Value>>>,
        pub writes: AtomicUsize,
    }

    fn matches(row: &Value, filters: Filters<'_>) -> bool {
        filters.iter().all(|(col, val)| match row.get(*col) {
            Some(Value::String(s)) => s == val,
            Some(other) => other.to_string() == *val,
            None => false,
        })
    }

    #[async_trait]
    impl TableStore for MemoryTables {
        async fn insert(&self, table: &str, row: Value, _token: Option<&str>) -> Result<Value, DataError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            self.rows.lock().entry(table.to_string()).or_default().push(row.clone());
            Ok(row)
        }

        async fn select(&self, table: &str, filters: Filters<'_>, _token: Option<&str>) -> Result<Vec<Value>, DataError> {
            let rows = self.rows.lock();
            Ok(rows.get(table).into_iter().flatten().filter(|r| matches(r, filters)).cloned().collect())
        }

        async fn upsert(&self, table: &str, row: Value, on_conflict: &str, _token: Option<&str>) -> Result<Value, DataError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let key: Vec<(&str, String)> = on_conflict
                .split(',')
                .map(|col| (col, row.get(col).map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string)).unwrap_or_default()))
                .collect();
            let mut rows = self.rows.lock();
            let table_rows = rows.entry(table.to_string()).or_default();
            table_rows.retain(|r| !matches(r, &key));
            table_rows.push(row.clone());
            Ok(row)
        }

        async fn delete(&self, table: &str, filters: Filters<'_>, _token: Option<&str>) -> Result<Vec<Value>, DataError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            let mut rows = self.rows.lock();
            let table_rows = rows.entry(table.to_string()).or_default();
            let (removed, kept): (Vec<Value>, Vec<Value>) = table_rows.drain(..).partition(|r| matches(r, filters));
            *table_rows = kept;
            Ok(removed)
        }

        async fn upload(&self, bucket: &str, path: &str, _data: Bytes, _content_type: &str, _token: Option<&str>) -> Result<String, DataError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Ok(format!("memory://{bucket}/{path}"))
        }
    }

    pub(crate) struct FakeAuth {
        user: User,
    }

    impl FakeAuth {
        pub(crate) fn new() -> Self {
            Self { user: User { id: Uuid::new_v4(), email: Some("client@example.com".into()), created_at: None } }
        }
    }

    #[async_trait]
    impl AuthProvider for FakeAuth {
        async fn sign_in(&self, email: &str, password: &str) -> Result<Session, DataError> {
            if password != "correct-horse" {
                return Err(DataError::Backend { status: 400, message: "Invalid login credentials".into() });
            }
            let mut user = self.user.clone();
            user.email = Some(email.to_string());
            Ok(Session { access_token: "token-1".into(), refresh_token: None, user })
        }

        async fn sign_up(&self, email: &str, _password: &str) -> Result<SignUpOutcome, DataError> {
            let mut user = self.user.clone();
            user.email = Some(email.to_string());
            Ok(SignUpOutcome { user, session: None })
        }

        async fn sign_out(&self, _access_token: &str) -> Result<(), DataError> {
            Ok(())
        }

        async fn get_user(&self, access_token: &str) -> Result<User, DataError> {
            if access_token == "token-1" { Ok(self.user.clone()) } else { Err(DataError::Unauthenticated) }
        }
    }

    fn fixture() -> (ClientData, Arc<MemoryTables>) {
        let tables = Arc::new(MemoryTables::default());
        (ClientData::new(tables.clone(), Arc::new(FakeAuth::new())), tables)
    }

    fn fade() -> Value {
        json!({"id": "fade-001", "name": "Low Skin Fade", "category": "fades"})
    }

    #[tokio::test]
    async fn save_favorite_requires_session_and_writes_nothing() {
        let (data, tables) = fixture();
        let err = data.save_favorite(fade(), "for summer").await.unwrap_err();
        assert!(matches!(err, DataError::Unauthenticated));
        assert_eq!(tables.writes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn favorites_round_trip_for_signed_in_user() {
        let (data, _tables) = fixture();
        let session = data.sign_in("me@example.com", "correct-horse").await.unwrap();

        let saved = data.save_favorite(fade(), "for summer").await.unwrap();
        assert_eq!(saved.user_id, session.user.id);
        assert_eq!(saved.style_id, "fade-001");

        // re-saving the same style replaces the note instead of duplicating
        data.save_favorite(fade(), "for winter").await.unwrap();
        let favorites = data.get_favorites().await.unwrap();
        assert_eq!(favorites.len(), 1);
        assert_eq!(favorites[0].personal_note, "for winter");

        data.remove_favorite("fade-001").await.unwrap();
        assert!(data.get_favorites().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn favorite_without_style_id_is_invalid() {
        let (data, _) = fixture();
        data.sign_in("me@example.com", "correct-horse").await.unwrap();
        let err = data.save_favorite(json!({"name": "nameless"}), "").await.unwrap_err();
        assert!(matches!(err, DataError::Invalid(_)));
    }

    #[tokio::test]
    async fn profile_upsert_keeps_one_row_per_user() {
        let (data, _) = fixture();
        assert!(matches!(data.get_user_profile().await, Err(DataError::Unauthenticated)));
        data.sign_in("me@example.com", "correct-horse").await.unwrap();
        assert_eq!(data.get_user_profile().await.unwrap(), None);

        let mut prefs = Map::new();
        prefs.insert("hair_type".into(), json!("curly"));
        data.save_user_profile(prefs.clone()).await.unwrap();
        prefs.insert("hair_type".into(), json!("wavy"));
        prefs.insert("language".into(), json!("es"));
        data.save_user_profile(prefs).await.unwrap();

        let profile = data.get_user_profile().await.unwrap().expect("profile exists");
        assert_eq!(profile.preferences["hair_type"], "wavy");
        assert_eq!(profile.preferences["language"], "es");
    }

    #[tokio::test]
    async fn shared_links_work_anonymously_and_are_public() {
        let (data, _) = fixture();
        let link = data.create_shared_link(fade(), "look at this").await.unwrap();
        assert_eq!(link.user_id, None);

        let fetched = data.get_shared_link(&link.share_id).await.unwrap();
        assert_eq!(fetched, link);
        assert!(matches!(data.get_shared_link("missing").await, Err(DataError::NotFound(_))));
    }

    #[tokio::test]
    async fn shared_link_records_owner_when_signed_in() {
        let (data, _) = fixture();
        let session = data.sign_in("me@example.com", "correct-horse").await.unwrap();
        let link = data.create_shared_link(fade(), "").await.unwrap();
        assert_eq!(link.user_id, Some(session.user.id));
    }

    #[tokio::test]
    async fn rapid_shared_links_get_distinct_ids() {
        let (data, _) = fixture();
        let a = data.create_shared_link(fade(), "").await.unwrap();
        let b = data.create_shared_link(fade(), "").await.unwrap();
        assert_ne!(a.share_id, b.share_id);
    }

    #[test]
    fn share_ids_are_unique_and_base36() {
        let ids: HashSet<String> = (0..1000).map(|_| generate_share_id()).collect();
        assert_eq!(ids.len(), 1000);
        assert!(ids.iter().all(|id| id.len() > 9 && id.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase())));
    }

    #[tokio::test]
    async fn auth_events_are_broadcast() {
        let (data, _) = fixture();
        let mut events = data.subscribe_auth_state();

        data.sign_in("me@example.com", "correct-horse").await.unwrap();
        assert!(matches!(events.recv().await.unwrap(), AuthEvent::SignedIn(u) if u.email.as_deref() == Some("me@example.com")));
        assert!(data.current_user().await.unwrap().is_some());

        data.sign_out().await.unwrap();
        assert_eq!(events.recv().await.unwrap(), AuthEvent::SignedOut);
        assert_eq!(data.current_user().await.unwrap(), None);
    }

    #[tokio::test]
    async fn failed_sign_in_leaves_session_empty() {
        let (data, _) = fixture();
        let err = data.sign_in("me@example.com", "wrong").await.unwrap_err();
        assert!(matches!(err, DataError::Backend { status: 400, .. }));
        assert_eq!(data.current_user().await.unwrap(), None);
    }

    #[tokio::test]
    async fn sign_up_pending_confirmation_does_not_sign_in() {
        let (data, _) = fixture();
        let outcome = data.sign_up("new@example.com", "pw").await.unwrap();
        assert!(outcome.session.is_none());
        assert!(matches!(data.get_favorites().await, Err(DataError::Unauthenticated)));
    }

    #[tokio::test]
    async fn photo_upload_is_scoped_to_user() {
        let (data, tables) = fixture();
        assert!(matches!(data.upload_photo(Bytes::from_static(b"jpeg"), "image/jpeg").await, Err(DataError::Unauthenticated)));
        assert_eq!(tables.writes.load(Ordering::SeqCst), 0);

        let session = data.sign_in("me@example.com", "correct-horse").await.unwrap();
        let url = data.upload_photo(Bytes::from_static(b"jpeg"), "image/jpeg").await.unwrap();
        assert!(url.starts_with(&format!("memory://{PHOTO_BUCKET}/{}/", session.user.id)));
        assert!(url.ends_with(".jpg"));
        assert!(matches!(data.upload_photo(Bytes::new(), "text/plain").await, Err(DataError::Invalid(_))));
    }
}
