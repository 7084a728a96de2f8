use anyhow::Context;
use sqlx::{PgConnection, PgPool};
use uuid::Uuid;

use super::repo_types::{NewUpload, Owner, UploadRow};
use crate::auth::GuestSessionId;

/// Insert one record. Run inside the caller's transaction for guests.
pub async fn insert(conn: &mut PgConnection, new: &NewUpload<'_>) -> anyhow::Result<UploadRow> {
    let (user_id, guest_session_id) = new.owner.columns();
    let row = sqlx::query_as::<_, UploadRow>(
        r#"
        INSERT INTO uploads (filename, original_filename, content_type, result_label,
                             confidence, user_id, guest_session_id)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        RETURNING id, filename, original_filename, content_type, result_label, confidence,
                  user_id, guest_session_id, created_at
        "#,
    )
    .bind(new.filename)
    .bind(new.original_filename)
    .bind(new.content_type)
    .bind(new.label.as_str())
    .bind(new.confidence)
    .bind(user_id)
    .bind(guest_session_id)
    .fetch_one(&mut *conn)
    .await
    .context("insert upload")?;
    Ok(row)
}

/// Serialize quota checks for one guest session until the transaction ends.
pub async fn lock_guest_session(conn: &mut PgConnection, guest: &GuestSessionId) -> anyhow::Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
        .bind(guest.as_str())
        .execute(&mut *conn)
        .await
        .context("lock guest session")?;
    Ok(())
}

pub async fn count_for_guest_conn(
    conn: &mut PgConnection,
    guest: &GuestSessionId,
) -> anyhow::Result<i64> {
    let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM uploads WHERE guest_session_id = $1")
        .bind(guest.as_str())
        .fetch_one(&mut *conn)
        .await
        .context("count guest uploads")?;
    Ok(n)
}

pub async fn count_for_guest(db: &PgPool, guest: &GuestSessionId) -> anyhow::Result<i64> {
    let mut conn = db.acquire().await.context("acquire connection")?;
    count_for_guest_conn(&mut conn, guest).await
}

pub async fn count_for_user(db: &PgPool, user_id: Uuid) -> anyhow::Result<i64> {
    let (n,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM uploads WHERE user_id = $1")
        .bind(user_id)
        .fetch_one(db)
        .await
        .context("count user uploads")?;
    Ok(n)
}

// ---- Queries scoped to an owner ----
// `user_id = NULL` and `guest_session_id = NULL` never match, so binding both
// columns selects exactly the owner's rows.

/// Newest first.
pub async fn list_for_owner(
    db: &PgPool,
    owner: &Owner,
    limit: i64,
    offset: i64,
) -> anyhow::Result<Vec<UploadRow>> {
    let (user_id, guest_session_id) = owner.columns();
    let rows = sqlx::query_as::<_, UploadRow>(
        r#"
        SELECT id, filename, original_filename, content_type, result_label, confidence,
               user_id, guest_session_id, created_at
          FROM uploads
         WHERE user_id = $1 OR guest_session_id = $2
         ORDER BY created_at DESC, id DESC
         LIMIT $3 OFFSET $4
        "#,
    )
    .bind(user_id)
    .bind(guest_session_id)
    .bind(limit)
    .bind(offset)
    .fetch_all(db)
    .await
    .context("list uploads")?;
    Ok(rows)
}

pub async fn find_for_owner(db: &PgPool, owner: &Owner, id: Uuid) -> anyhow::Result<Option<UploadRow>> {
    let (user_id, guest_session_id) = owner.columns();
    let row = sqlx::query_as::<_, UploadRow>(
        r#"
        SELECT id, filename, original_filename, content_type, result_label, confidence,
               user_id, guest_session_id, created_at
          FROM uploads
         WHERE id = $1 AND (user_id = $2 OR guest_session_id = $3)
        "#,
    )
    .bind(id)
    .bind(user_id)
    .bind(guest_session_id)
    .fetch_optional(db)
    .await
    .context("get upload")?;
    Ok(row)
}

pub async fn find_by_filename_for_owner(
    db: &PgPool,
    owner: &Owner,
    filename: &str,
) -> anyhow::Result<Option<UploadRow>> {
    let (user_id, guest_session_id) = owner.columns();
    let row = sqlx::query_as::<_, UploadRow>(
        r#"
        SELECT id, filename, original_filename, content_type, result_label, confidence,
               user_id, guest_session_id, created_at
          FROM uploads
         WHERE filename = $1 AND (user_id = $2 OR guest_session_id = $3)
        "#,
    )
    .bind(filename)
    .bind(user_id)
    .bind(guest_session_id)
    .fetch_optional(db)
    .await
    .context("get upload by filename")?;
    Ok(row)
}
