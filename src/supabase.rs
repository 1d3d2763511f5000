use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, error};

use crate::client_data::{AuthProvider, DataError, Filters, SignUpOutcome, TableStore};
use crate::config::SupabaseConfig;
use crate::models::{Session, User};

/// Supabase REST client: PostgREST for tables, GoTrue for auth, Storage for objects.
pub struct SupabaseBackend {
    client: Client,
    base_url: String,
    anon_key: String,
}

impl SupabaseBackend {
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        }
    }

    pub fn from_config(config: &SupabaseConfig) -> Result<Self, DataError> {
        match (&config.url, &config.anon_key) {
            (Some(url), Some(key)) => Ok(Self::new(url, key)),
            _ => Err(DataError::Configuration(
                "EXPO_PUBLIC_SUPABASE_URL and EXPO_PUBLIC_SUPABASE_ANON_KEY must both be set".into(),
            )),
        }
    }

    fn rest_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    fn authorized(&self, builder: RequestBuilder, token: Option<&str>) -> RequestBuilder {
        builder
            .header("apikey", &self.anon_key)
            .bearer_auth(token.unwrap_or(self.anon_key.as_str()))
    }

    fn eq_filters(filters: Filters<'_>) -> Vec<(String, String)> {
        filters.iter().map(|(col, val)| (col.to_string(), format!("eq.{val}"))).collect()
    }

    async fn send(builder: RequestBuilder) -> Result<Response, DataError> {
        let response = builder.send().await.map_err(|e| DataError::Http(e.to_string()))?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        error!("❌ Supabase error response ({}): {}", status, body);
        Err(DataError::Backend { status: status.as_u16(), message: error_message(&body) })
    }

    async fn json<T: for<'de> Deserialize<'de>>(response: Response) -> Result<T, DataError> {
        response.json::<T>().await.map_err(|e| DataError::Decode(e.to_string()))
    }

    fn first_row(rows: Vec<Value>, table: &str) -> Result<Value, DataError> {
        rows.into_iter().next().ok_or_else(|| DataError::Decode(format!("{table}: no row returned")))
    }
}

// GoTrue and PostgREST disagree on the error field name.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            ["message", "msg", "error_description", "error"]
                .iter()
                .find_map(|k| v.get(*k).and_then(Value::as_str).map(str::to_string))
        })
        .unwrap_or_else(|| body.to_string())
}

#[async_trait]
impl TableStore for SupabaseBackend {
    async fn insert(&self, table: &str, row: Value, token: Option<&str>) -> Result<Value, DataError> {
        debug!(table, "insert");
        let builder = self.client
            .post(self.rest_url(table))
            .header("Prefer", "return=representation")
            .json(&row);
        let rows: Vec<Value> = Self::json(Self::send(self.authorized(builder, token)).await?).await?;
        Self::first_row(rows, table)
    }

    async fn select(&self, table: &str, filters: Filters<'_>, token: Option<&str>) -> Result<Vec<Value>, DataError> {
        debug!(table, "select");
        let builder = self.client
            .get(self.rest_url(table))
            .query(&[("select", "*")])
            .query(&Self::eq_filters(filters));
        Self::json(Self::send(self.authorized(builder, token)).await?).await
    }

    async fn upsert(&self, table: &str, row: Value, on_conflict: &str, token: Option<&str>) -> Result<Value, DataError> {
        debug!(table, on_conflict, "upsert");
        let builder = self.client
            .post(self.rest_url(table))
            .query(&[("on_conflict", on_conflict)])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&row);
        let rows: Vec<Value> = Self::json(Self::send(self.authorized(builder, token)).await?).await?;
        Self::first_row(rows, table)
    }

    async fn delete(&self, table: &str, filters: Filters<'_>, token: Option<&str>) -> Result<Vec<Value>, DataError> {
        debug!(table, "delete");
        let builder = self.client
            .delete(self.rest_url(table))
            .query(&Self::eq_filters(filters))
            .header("Prefer", "return=representation");
        Self::json(Self::send(self.authorized(builder, token)).await?).await
    }

    async fn upload(&self, bucket: &str, path: &str, data: Bytes, content_type: &str, token: Option<&str>) -> Result<String, DataError> {
        debug!(bucket, path, bytes = data.len(), "upload");
        let builder = self.client
            .post(format!("{}/storage/v1/object/{}/{}", self.base_url, bucket, path))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data);
        Self::send(self.authorized(builder, token)).await?;
        Ok(format!("{}/storage/v1/object/public/{}/{}", self.base_url, bucket, path))
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum SignUpResponse {
    WithSession(Session),
    UserOnly(User),
}

#[async_trait]
impl AuthProvider for SupabaseBackend {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Session, DataError> {
        let builder = self.client
            .post(format!("{}/auth/v1/token", self.base_url))
            .query(&[("grant_type", "password")])
            .json(&json!({ "email": email, "password": password }));
        Self::json(Self::send(self.authorized(builder, None)).await?).await
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, DataError> {
        let builder = self.client
            .post(format!("{}/auth/v1/signup", self.base_url))
            .json(&json!({ "email": email, "password": password }));
        let parsed: SignUpResponse = Self::json(Self::send(self.authorized(builder, None)).await?).await?;
        Ok(match parsed {
            SignUpResponse::WithSession(session) => SignUpOutcome { user: session.user.clone(), session: Some(session) },
            SignUpResponse::UserOnly(user) => SignUpOutcome { user, session: None },
        })
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), DataError> {
        let builder = self.client.post(format!("{}/auth/v1/logout", self.base_url));
        Self::send(self.authorized(builder, Some(access_token))).await?;
        Ok(())
    }

    async fn get_user(&self, access_token: &str) -> Result<User, DataError> {
        let builder = self.client.get(format!("{}/auth/v1/user", self.base_url));
        match Self::send(self.authorized(builder, Some(access_token))).await {
            Err(DataError::Backend { status: 401, .. }) => Err(DataError::Unauthenticated),
            other => Self::json(other?).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    const USER_ID: &str = "5f0c8a54-63b2-4c5e-9d7e-1d2a3b4c5d6e";

    fn backend(server: &MockServer) -> SupabaseBackend {
        SupabaseBackend::new(&server.base_url(), "anon-key")
    }

    #[test]
    fn from_config_requires_url_and_key() {
        let missing = SupabaseConfig { url: Some("https://x.supabase.co".into()), anon_key: None };
        assert!(matches!(SupabaseBackend::from_config(&missing), Err(DataError::Configuration(_))));
    }

    #[tokio::test]
    async fn insert_returns_representation() {
        let server = MockServer::start_async().await;
        let mock = server.mock_async(|when, then| {
            when.method(POST)
                .path("/rest/v1/shared_styles")
                .header("apikey", "anon-key")
                .header("authorization", "Bearer anon-key")
                .header("prefer", "return=representation");
            then.status(201).json_body(json!([{ "share_id": "abc123", "style_snapshot": {} }]));
        }).await;

        let row = backend(&server)
            .insert("shared_styles", json!({ "share_id": "abc123", "style_snapshot": {} }), None)
            .await
            .unwrap();
        assert_eq!(row["share_id"], "abc123");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn select_uses_eq_filters_and_user_token() {
        let server = MockServer::start_async().await;
        let mock = server.mock_async(|when, then| {
            when.method(GET)
                .path("/rest/v1/favorites")
                .query_param("select", "*")
                .query_param("user_id", format!("eq.{USER_ID}"))
                .header("authorization", "Bearer user-token");
            then.status(200).json_body(json!([{ "style_id": "fade-001" }, { "style_id": "classic-002" }]));
        }).await;

        let rows = backend(&server)
            .select("favorites", &[("user_id", USER_ID.to_string())], Some("user-token"))
            .await
            .unwrap();
        assert_eq!(rows.len(), 2);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn upsert_merges_on_conflict_columns() {
        let server = MockServer::start_async().await;
        let mock = server.mock_async(|when, then| {
            when.method(POST)
                .path("/rest/v1/user_profiles")
                .query_param("on_conflict", "user_id")
                .header("prefer", "resolution=merge-duplicates,return=representation");
            then.status(201).json_body(json!([{ "user_id": USER_ID, "language": "es" }]));
        }).await;

        let row = backend(&server)
            .upsert("user_profiles", json!({ "user_id": USER_ID, "language": "es" }), "user_id", Some("t"))
            .await
            .unwrap();
        assert_eq!(row["language"], "es");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn backend_errors_carry_status_and_message() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(DELETE).path("/rest/v1/favorites");
            then.status(403).json_body(json!({ "message": "permission denied for table favorites" }));
        }).await;

        let err = backend(&server)
            .delete("favorites", &[("style_id", "fade-001".to_string())], Some("t"))
            .await
            .unwrap_err();
        match err {
            DataError::Backend { status, message } => {
                assert_eq!(status, 403);
                assert_eq!(message, "permission denied for table favorites");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[tokio::test]
    async fn upload_returns_public_url() {
        let server = MockServer::start_async().await;
        let mock = server.mock_async(|when, then| {
            when.method(POST)
                .path(format!("/storage/v1/object/user-photos/{USER_ID}/p.jpg"))
                .header("content-type", "image/jpeg");
            then.status(200).json_body(json!({ "Key": "user-photos/p.jpg" }));
        }).await;

        let url = backend(&server)
            .upload("user-photos", &format!("{USER_ID}/p.jpg"), Bytes::from_static(b"\xff\xd8"), "image/jpeg", Some("t"))
            .await
            .unwrap();
        assert_eq!(url, format!("{}/storage/v1/object/public/user-photos/{USER_ID}/p.jpg", server.base_url()));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn sign_in_parses_session() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(POST).path("/auth/v1/token").query_param("grant_type", "password");
            then.status(200).json_body(json!({
                "access_token": "jwt",
                "refresh_token": "refresh",
                "token_type": "bearer",
                "user": { "id": USER_ID, "email": "me@example.com" }
            }));
        }).await;

        let session = backend(&server).sign_in("me@example.com", "pw").await.unwrap();
        assert_eq!(session.access_token, "jwt");
        assert_eq!(session.user.id, Uuid::parse_str(USER_ID).unwrap());
    }

    #[tokio::test]
    async fn sign_in_failure_uses_gotrue_message() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(POST).path("/auth/v1/token");
            then.status(400).json_body(json!({ "error": "invalid_grant", "error_description": "Invalid login credentials" }));
        }).await;

        let err = backend(&server).sign_in("me@example.com", "bad").await.unwrap_err();
        assert!(matches!(err, DataError::Backend { status: 400, ref message } if message == "Invalid login credentials"));
    }

    #[tokio::test]
    async fn sign_up_without_session_awaits_confirmation() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(POST).path("/auth/v1/signup");
            then.status(200).json_body(json!({ "id": USER_ID, "email": "new@example.com" }));
        }).await;

        let outcome = backend(&server).sign_up("new@example.com", "pw").await.unwrap();
        assert!(outcome.session.is_none());
        assert_eq!(outcome.user.email.as_deref(), Some("new@example.com"));
    }

    #[tokio::test]
    async fn expired_token_is_unauthenticated() {
        let server = MockServer::start_async().await;
        server.mock_async(|when, then| {
            when.method(GET).path("/auth/v1/user");
            then.status(401).json_body(json!({ "msg": "JWT expired" }));
        }).await;

        let err = backend(&server).get_user("old").await.unwrap_err();
        assert!(matches!(err, DataError::Unauthenticated));
    }
}
