//! Admin user management.
//!
//! Every route requires the `*All` operation on users or emails, which only admins hold.
//! Protected accounts (those linked to a configured admin email) can be neither demoted nor
//! deleted, and their protected addresses can be neither renamed nor removed.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use sqlx::PgConnection;
use tracing::{info, instrument};

use crate::{
    AppState,
    api::{
        handlers::profile::{email_list, valid_email},
        models::{
            pagination::Pagination,
            users::{
                AdminUserDetailResponse, AdminUserListResponse, AdminUserResponse, AdminUserUpdate, EmailCreate,
                EmailListResponse, EmailUpdate, ProtectedEmailsResponse,
            },
        },
    },
    auth::permissions::{RequiresPermission, operation, resource},
    db::{
        handlers::{Emails, ProtectedEmails, Repository, Users, users::UserFilter},
        models::users::{UserDBResponse, UserUpdateDBRequest},
    },
    errors::{Error, Result},
    types::{EmailId, UserId, abbrev_uuid},
};

async fn existing_user(conn: &mut PgConnection, user_id: UserId) -> Result<UserDBResponse> {
    Users::new(conn).get_by_id(user_id).await?.ok_or_else(|| Error::NotFound {
        resource: "User".to_string(),
        id: user_id.to_string(),
    })
}

#[utoipa::path(
    get,
    path = "/admin/users",
    tag = "admin",
    summary = "List users",
    description = "All users, newest first, with their emails and the protected admin emails",
    params(Pagination),
    responses(
        (status = 200, description = "Users", body = AdminUserListResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin access required"),
    ),
    security(("ProxyHeader" = []))
)]
pub async fn list_users(
    State(state): State<AppState>,
    Query(pagination): Query<Pagination>,
    _: RequiresPermission<resource::Users, operation::ReadAll>,
) -> Result<Json<AdminUserListResponse>> {
    let (_, limit, skip) = pagination.params(&state.config.limits);

    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let mut users = Users::new(&mut conn);
    let listed = users.list(&UserFilter::new(skip, limit)).await?;
    let total = users.count().await?;
    let protected_emails = ProtectedEmails::new(&mut conn).list().await?;

    Ok(Json(AdminUserListResponse {
        users: listed.into_iter().map(AdminUserResponse::from).collect(),
        total,
        protected_emails,
    }))
}

#[utoipa::path(
    get,
    path = "/admin/users/{id}",
    tag = "admin",
    summary = "Get user",
    params(("id" = uuid::Uuid, Path, description = "User ID")),
    responses(
        (status = 200, description = "User", body = AdminUserDetailResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin access required"),
        (status = 404, description = "User not found"),
    ),
    security(("ProxyHeader" = []))
)]
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    _: RequiresPermission<resource::Users, operation::ReadAll>,
) -> Result<Json<AdminUserDetailResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let user = existing_user(&mut conn, user_id).await?;
    let protected_emails = ProtectedEmails::new(&mut conn).list().await?;

    Ok(Json(AdminUserDetailResponse {
        user: user.into(),
        protected_emails,
    }))
}

#[utoipa::path(
    patch,
    path = "/admin/users/{id}",
    tag = "admin",
    summary = "Grant or revoke admin",
    params(("id" = uuid::Uuid, Path, description = "User ID")),
    request_body = AdminUserUpdate,
    responses(
        (status = 200, description = "Updated user", body = AdminUserResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin access required, or the account is protected"),
        (status = 404, description = "User not found"),
    ),
    security(("ProxyHeader" = []))
)]
#[instrument(skip(state, current_user, data), fields(user_id = %abbrev_uuid(&user_id), make_admin = data.make_admin), err)]
pub async fn update_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    current_user: RequiresPermission<resource::Users, operation::UpdateAll>,
    Json(data): Json<AdminUserUpdate>,
) -> Result<Json<AdminUserResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    let updated = Users::new(&mut conn)
        .update(
            user_id,
            &UserUpdateDBRequest {
                native_language: None,
                is_admin: Some(data.make_admin),
            },
        )
        .await?;
    info!(by = %abbrev_uuid(&current_user.id), "Admin flag changed");

    Ok(Json(updated.into()))
}

#[utoipa::path(
    delete,
    path = "/admin/users/{id}",
    tag = "admin",
    summary = "Delete user",
    description = "Delete a user together with their decks, cards, emails and keys",
    params(("id" = uuid::Uuid, Path, description = "User ID")),
    responses(
        (status = 204, description = "User deleted"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Admin access required, or the account is protected"),
        (status = 404, description = "User not found"),
    ),
    security(("ProxyHeader" = []))
)]
#[instrument(skip(state, current_user), fields(user_id = %abbrev_uuid(&user_id)), err)]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    current_user: RequiresPermission<resource::Users, operation::DeleteAll>,
) -> Result<StatusCode> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    existing_user(&mut conn, user_id).await?;
    Users::new(&mut conn).delete(user_id).await?;
    info!(by = %abbrev_uuid(&current_user.id), "User deleted");
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/admin/users/{id}/emails",
    tag = "admin",
    summary = "Link email to user",
    params(("id" = uuid::Uuid, Path, description = "User ID")),
    request_body = EmailCreate,
    responses(
        (status = 201, description = "User's emails", body = EmailListResponse),
        (status = 400, description = "Invalid address"),
        (status = 403, description = "Admin access required"),
        (status = 404, description = "User not found"),
        (status = 409, description = "Address already linked to an account"),
    ),
    security(("ProxyHeader" = []))
)]
pub async fn add_user_email(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
    _: RequiresPermission<resource::Emails, operation::CreateAll>,
    Json(data): Json<EmailCreate>,
) -> Result<(StatusCode, Json<EmailListResponse>)> {
    let email = valid_email(&data.email)?;
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    existing_user(&mut conn, user_id).await?;
    Emails::new(&mut conn).add(user_id, &email, data.make_primary).await?;
    Ok((StatusCode::CREATED, Json(email_list(&mut conn, user_id).await?)))
}

#[utoipa::path(
    patch,
    path = "/admin/users/{id}/emails/{email_id}",
    tag = "admin",
    summary = "Change a user's email address",
    params(
        ("id" = uuid::Uuid, Path, description = "User ID"),
        ("email_id" = uuid::Uuid, Path, description = "Email ID"),
    ),
    request_body = EmailUpdate,
    responses(
        (status = 200, description = "User's emails", body = EmailListResponse),
        (status = 400, description = "Invalid address"),
        (status = 403, description = "Admin access required, or the address is protected"),
        (status = 404, description = "Email not found"),
        (status = 409, description = "Address already linked to an account"),
    ),
    security(("ProxyHeader" = []))
)]
pub async fn update_user_email(
    State(state): State<AppState>,
    Path((user_id, email_id)): Path<(UserId, EmailId)>,
    _: RequiresPermission<resource::Emails, operation::UpdateAll>,
    Json(data): Json<EmailUpdate>,
) -> Result<Json<EmailListResponse>> {
    let email = valid_email(&data.email)?;
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    Emails::new(&mut conn).update_address(user_id, email_id, &email).await?;
    Ok(Json(email_list(&mut conn, user_id).await?))
}

#[utoipa::path(
    delete,
    path = "/admin/users/{id}/emails/{email_id}",
    tag = "admin",
    summary = "Unlink a user's email",
    params(
        ("id" = uuid::Uuid, Path, description = "User ID"),
        ("email_id" = uuid::Uuid, Path, description = "Email ID"),
    ),
    responses(
        (status = 200, description = "User's remaining emails", body = EmailListResponse),
        (status = 403, description = "Admin access required, or the address is primary or protected"),
        (status = 404, description = "Email not found"),
    ),
    security(("ProxyHeader" = []))
)]
pub async fn remove_user_email(
    State(state): State<AppState>,
    Path((user_id, email_id)): Path<(UserId, EmailId)>,
    _: RequiresPermission<resource::Emails, operation::DeleteAll>,
) -> Result<Json<EmailListResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    Emails::new(&mut conn).remove(user_id, email_id).await?;
    Ok(Json(email_list(&mut conn, user_id).await?))
}

#[utoipa::path(
    post,
    path = "/admin/users/{id}/emails/{email_id}/primary",
    tag = "admin",
    summary = "Make a user's email primary",
    params(
        ("id" = uuid::Uuid, Path, description = "User ID"),
        ("email_id" = uuid::Uuid, Path, description = "Email ID"),
    ),
    responses(
        (status = 200, description = "User's emails", body = EmailListResponse),
        (status = 403, description = "Admin access required"),
        (status = 404, description = "Email not found"),
    ),
    security(("ProxyHeader" = []))
)]
pub async fn make_user_email_primary(
    State(state): State<AppState>,
    Path((user_id, email_id)): Path<(UserId, EmailId)>,
    _: RequiresPermission<resource::Emails, operation::UpdateAll>,
) -> Result<Json<EmailListResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    Emails::new(&mut conn).set_primary(user_id, email_id).await?;
    Ok(Json(email_list(&mut conn, user_id).await?))
}

#[utoipa::path(
    get,
    path = "/admin/protected-emails",
    tag = "admin",
    summary = "Protected admin emails",
    description = "Emails from configuration whose accounts are always admin and cannot be deleted",
    responses(
        (status = 200, description = "Protected emails", body = ProtectedEmailsResponse),
        (status = 403, description = "Admin access required"),
    ),
    security(("ProxyHeader" = []))
)]
pub async fn list_protected_emails(
    State(state): State<AppState>,
    _: RequiresPermission<resource::Users, operation::ReadAll>,
) -> Result<Json<ProtectedEmailsResponse>> {
    let mut conn = state.db.acquire().await.map_err(|e| Error::Database(e.into()))?;
    Ok(Json(ProtectedEmailsResponse {
        protected_emails: ProtectedEmails::new(&mut conn).list().await?,
    }))
}

#[cfg(test)]
mod tests {
    use crate::api::models::users::{
        AdminUserDetailResponse, AdminUserListResponse, AdminUserResponse, EmailListResponse, ProtectedEmailsResponse,
    };
    use crate::test_utils::*;
    use axum::http::StatusCode;
    use serde_json::{Value, json};
    use sqlx::PgPool;

    #[sqlx::test]
    #[test_log::test]
    async fn test_regular_users_are_forbidden(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let user = create_test_user(&pool, "learner@example.com").await;
        let (name, value) = auth_header(&user);

        let response = app.get("/api/v1/admin/users").add_header(name.clone(), value.clone()).await;
        response.assert_status(StatusCode::FORBIDDEN);
        let body: Value = response.json();
        assert_eq!(body["kind"], "forbidden");

        app.delete(&format!("/api/v1/admin/users/{}", user.id))
            .add_header(name, value)
            .await
            .assert_status(StatusCode::FORBIDDEN);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_list_users_with_protected_emails(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let admin = create_test_admin_user(&pool).await;
        for i in 0..3 {
            create_test_user(&pool, &format!("user{i}@example.com")).await;
        }
        let (name, value) = auth_header(&admin);

        let response = app
            .get("/api/v1/admin/users")
            .add_header(name, value)
            .add_query_params(json!({"page": 1, "limit": 2}))
            .await;
        response.assert_status_ok();
        let list: AdminUserListResponse = response.json();
        assert_eq!(list.users.len(), 2);
        assert_eq!(list.total, 4);
        assert_eq!(list.protected_emails, vec![TEST_ADMIN_EMAIL.to_string()]);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_grant_and_revoke_admin(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let admin = create_test_admin_user(&pool).await;
        let user = create_test_user(&pool, "learner@example.com").await;
        let (name, value) = auth_header(&admin);

        let updated: AdminUserResponse = app
            .patch(&format!("/api/v1/admin/users/{}", user.id))
            .add_header(name.clone(), value.clone())
            .json(&json!({"makeAdmin": true}))
            .await
            .json();
        assert!(updated.user.is_admin);

        // The new admin can use admin routes straight away.
        let (user_name, user_value) = auth_header(&user);
        app.get("/api/v1/admin/protected-emails")
            .add_header(user_name, user_value)
            .await
            .assert_status_ok();

        // Protected accounts keep their admin flag.
        let response = app
            .patch(&format!("/api/v1/admin/users/{}", admin.id))
            .add_header(name, value)
            .json(&json!({"makeAdmin": false}))
            .await;
        response.assert_status(StatusCode::FORBIDDEN);
        let body: Value = response.json();
        assert_eq!(body["kind"], "protected_resource");
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_delete_users(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let admin = create_test_admin_user(&pool).await;
        let user = create_test_user(&pool, "learner@example.com").await;
        let (name, value) = auth_header(&admin);

        app.delete(&format!("/api/v1/admin/users/{}", admin.id))
            .add_header(name.clone(), value.clone())
            .await
            .assert_status(StatusCode::FORBIDDEN);

        app.delete(&format!("/api/v1/admin/users/{}", user.id))
            .add_header(name.clone(), value.clone())
            .await
            .assert_status(StatusCode::NO_CONTENT);

        app.get(&format!("/api/v1/admin/users/{}", user.id))
            .add_header(name, value)
            .await
            .assert_status(StatusCode::NOT_FOUND);
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_manage_user_emails(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let admin = create_test_admin_user(&pool).await;
        let user = create_test_user(&pool, "learner@example.com").await;
        let (name, value) = auth_header(&admin);

        let response = app
            .post(&format!("/api/v1/admin/users/{}/emails", user.id))
            .add_header(name.clone(), value.clone())
            .json(&json!({"email": "work@example.com", "makePrimary": true}))
            .await;
        response.assert_status(StatusCode::CREATED);
        let list: EmailListResponse = response.json();
        assert_eq!(list.emails.len(), 2);
        assert_eq!(list.emails[0].email, "work@example.com");
        assert!(list.emails[0].is_primary);
        let old = list.emails[1].id;

        let list: EmailListResponse = app
            .patch(&format!("/api/v1/admin/users/{}/emails/{old}", user.id))
            .add_header(name.clone(), value.clone())
            .json(&json!({"email": "home@example.com"}))
            .await
            .json();
        assert!(list.emails.iter().any(|e| e.email == "home@example.com"));

        let list: EmailListResponse = app
            .delete(&format!("/api/v1/admin/users/{}/emails/{old}", user.id))
            .add_header(name.clone(), value.clone())
            .await
            .json();
        assert_eq!(list.emails.len(), 1);

        let detail: AdminUserDetailResponse = app
            .get(&format!("/api/v1/admin/users/{}", user.id))
            .add_header(name, value)
            .await
            .json();
        assert_eq!(detail.user.user.primary_email.as_deref(), Some("work@example.com"));
    }

    #[sqlx::test]
    #[test_log::test]
    async fn test_protected_email_cannot_be_renamed(pool: PgPool) {
        let app = create_test_app(pool.clone()).await;
        let admin = create_test_admin_user(&pool).await;
        let (name, value) = auth_header(&admin);
        let email_id = admin.emails[0].id;

        let response = app
            .patch(&format!("/api/v1/admin/users/{}/emails/{email_id}", admin.id))
            .add_header(name.clone(), value.clone())
            .json(&json!({"email": "renamed@example.com"}))
            .await;
        response.assert_status(StatusCode::FORBIDDEN);

        let protected: ProtectedEmailsResponse = app
            .get("/api/v1/admin/protected-emails")
            .add_header(name, value)
            .await
            .json();
        assert_eq!(protected.protected_emails, vec![TEST_ADMIN_EMAIL.to_string()]);
    }
}
