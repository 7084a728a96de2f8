use anyhow::Context;
use bytes::Bytes;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    repo,
    repo_types::{NewUpload, Owner, UploadRecord, UploadRow},
    validation::{safe_filename, validate_upload, ImageUpload},
};
use crate::{
    auth::{Caller, GuestSessionId},
    error::{AppResult, Error},
    model::{decode_image, Prediction},
    state::AppState,
};

pub struct AnalysisOutcome {
    pub record: UploadRecord,
    /// Analyses left for a guest after this one.
    pub guest_remaining: Option<i64>,
}

pub fn ensure_guest_quota(used: i64, limit: i64) -> AppResult<()> {
    if used >= limit {
        return Err(Error::QuotaExceeded { limit });
    }
    Ok(())
}

/// Decode and classify on the blocking pool.
pub async fn classify_bytes(st: &AppState, body: Bytes) -> AppResult<Prediction> {
    let classifier = st.classifier.clone();
    let prediction = tokio::task::spawn_blocking(move || {
        let image = decode_image(&body, classifier.input_size())?;
        classifier.classify(&image)
    })
    .await
    .map_err(|e| Error::internal(format!("join classification task: {e}")))??;
    Ok(prediction)
}

async fn persist(st: &AppState, new: &NewUpload<'_>) -> AppResult<(UploadRow, Option<i64>)> {
    match new.owner {
        Owner::User(_) => {
            let mut conn = st.db.acquire().await.context("acquire connection")?;
            Ok((repo::insert(&mut conn, new).await?, None))
        }
        Owner::Guest(guest) => {
            let limit = st.config.guest_quota;
            let mut tx = st.db.begin().await.context("begin tx")?;
            repo::lock_guest_session(&mut tx, guest).await?;
            // another request from this session may have landed since the first check
            let used = repo::count_for_guest_conn(&mut tx, guest).await?;
            ensure_guest_quota(used, limit)?;
            let row = repo::insert(&mut tx, new).await?;
            tx.commit().await.context("commit tx")?;
            Ok((row, Some(limit - used - 1)))
        }
    }
}

/// Validate, classify, store and record one upload.
pub async fn analyze(st: &AppState, caller: Caller, upload: ImageUpload) -> AppResult<AnalysisOutcome> {
    let content_type = validate_upload(&upload)?;
    let owner = Owner::from(caller);

    if let Owner::Guest(guest) = &owner {
        let used = repo::count_for_guest(&st.db, guest).await?;
        ensure_guest_quota(used, st.config.guest_quota)?;
    }

    let prediction = classify_bytes(st, upload.body.clone()).await?;

    let filename = safe_filename(&upload.original_filename);
    st.storage
        .put_object(&filename, upload.body, content_type)
        .await?;

    let new = NewUpload {
        filename: &filename,
        original_filename: &upload.original_filename,
        content_type,
        label: prediction.label,
        confidence: prediction.confidence,
        owner: &owner,
    };
    let (row, guest_remaining) = match persist(st, &new).await {
        Ok(v) => v,
        Err(e) => {
            if let Err(cleanup) = st.storage.delete_object(&filename).await {
                warn!(error = %cleanup, %filename, "orphaned upload not removed");
            }
            return Err(e);
        }
    };
    let record = UploadRecord::try_from(row)?;

    info!(
        upload_id = %record.id,
        owner = owner.kind(),
        label = %record.label,
        confidence = record.confidence,
        "image analysed"
    );
    Ok(AnalysisOutcome {
        record,
        guest_remaining,
    })
}

pub async fn history(st: &AppState, caller: Caller, limit: i64, offset: i64) -> AppResult<Vec<UploadRecord>> {
    let owner = Owner::from(caller);
    let rows = repo::list_for_owner(&st.db, &owner, limit, offset).await?;
    let records = rows
        .into_iter()
        .map(UploadRecord::try_from)
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok(records)
}

pub async fn get_analysis(st: &AppState, caller: Caller, id: Uuid) -> AppResult<UploadRecord> {
    let owner = Owner::from(caller);
    let row = repo::find_for_owner(&st.db, &owner, id)
        .await?
        .ok_or_else(|| Error::NotFound {
            resource: "Analysis",
            id: id.to_string(),
        })?;
    Ok(UploadRecord::try_from(row)?)
}

/// Stored image bytes and content type, only for the record's owner.
pub async fn fetch_upload(st: &AppState, caller: Caller, filename: &str) -> AppResult<(String, Bytes)> {
    let not_found = || Error::NotFound {
        resource: "Upload",
        id: filename.to_string(),
    };
    let owner = Owner::from(caller);
    let row = repo::find_by_filename_for_owner(&st.db, &owner, filename)
        .await?
        .ok_or_else(not_found)?;
    let body = st
        .storage
        .get_object(&row.filename)
        .await?
        .ok_or_else(not_found)?;
    Ok((row.content_type, body))
}

/// `(used, remaining)` for a guest session.
pub async fn guest_quota(st: &AppState, guest: &GuestSessionId) -> AppResult<(i64, i64)> {
    let used = repo::count_for_guest(&st.db, guest).await?;
    Ok((used, (st.config.guest_quota - used).max(0)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{png_fixture, Label};
    use crate::state::test_support::FakeClassifier;
    use sqlx::PgPool;
    use std::sync::{atomic::Ordering, Arc};

    fn upload(name: &str, body: Vec<u8>) -> ImageUpload {
        ImageUpload {
            original_filename: name.into(),
            content_type: None,
            body: Bytes::from(body),
        }
    }

    #[test]
    fn quota_allows_until_limit() {
        assert!(ensure_guest_quota(0, 2).is_ok());
        assert!(ensure_guest_quota(1, 2).is_ok());
        assert!(matches!(
            ensure_guest_quota(2, 2).unwrap_err(),
            Error::QuotaExceeded { limit: 2 }
        ));
        assert!(ensure_guest_quota(5, 2).is_err());
    }

    #[tokio::test]
    async fn classify_bytes_runs_model_on_decoded_image() {
        let fake = Arc::new(FakeClassifier::returning(Label::Real, 91.25));
        let st = AppState::fake_with_classifier(fake.clone());
        let p = classify_bytes(&st, Bytes::from(png_fixture(40, 30)))
            .await
            .unwrap();
        assert_eq!(p.label, Label::Real);
        assert!((p.confidence + p.complement_confidence() - 100.0).abs() < 1e-9);
        assert_eq!(fake.calls.load(Ordering::SeqCst), 1);
        assert_eq!(fake.last_size.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn disallowed_type_is_rejected_before_classification() {
        let fake = Arc::new(FakeClassifier::returning(Label::Fake, 80.0));
        let st = AppState::fake_with_classifier(fake.clone());
        let err = analyze(
            &st,
            Caller::Guest(GuestSessionId::new()),
            upload("face.gif", png_fixture(8, 8)),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn oversized_upload_is_rejected_before_classification() {
        let fake = Arc::new(FakeClassifier::returning(Label::Fake, 80.0));
        let st = AppState::fake_with_classifier(fake.clone());
        let body = vec![0u8; crate::config::MAX_UPLOAD_BYTES + 1];
        let err = analyze(&st, Caller::User(Uuid::new_v4()), upload("big.png", body))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::PayloadTooLarge { .. }));
        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn corrupt_image_fails_with_decode_error_and_stores_nothing() {
        let fake = Arc::new(FakeClassifier::returning(Label::Fake, 80.0));
        let st = AppState::fake_with_classifier(fake.clone());
        let err = analyze(
            &st,
            Caller::User(Uuid::new_v4()),
            upload("face.png", b"\x89PNG\r\n\x1a\ngarbage".to_vec()),
        )
        .await
        .err()
        .unwrap();
        assert!(matches!(err, Error::Decode { .. }));
        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn overlong_filename_is_rejected_before_classification() {
        let fake = Arc::new(FakeClassifier::returning(Label::Fake, 80.0));
        let st = AppState::fake_with_classifier(fake.clone());
        let name = format!("{}.png", "a".repeat(300));
        let err = analyze(&st, Caller::Guest(GuestSessionId::new()), upload(&name, png_fixture(8, 8)))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(fake.calls.load(Ordering::SeqCst), 0);
    }

    #[sqlx::test]
    async fn third_guest_upload_is_refused_and_not_recorded(pool: PgPool) {
        let fake = Arc::new(FakeClassifier::returning(Label::Fake, 80.0));
        let st = AppState::fake_with_db(pool.clone(), fake.clone());
        let guest = GuestSessionId::new();

        for remaining in [1, 0] {
            let out = analyze(&st, Caller::Guest(guest.clone()), upload("face.png", png_fixture(8, 8)))
                .await
                .unwrap();
            assert_eq!(out.guest_remaining, Some(remaining));
            assert_eq!(out.record.owner, Owner::Guest(guest.clone()));
            assert_eq!(out.record.label, Label::Fake);
        }

        let err = analyze(&st, Caller::Guest(guest.clone()), upload("face.png", png_fixture(8, 8)))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, Error::QuotaExceeded { limit: 2 }));
        assert_eq!(repo::count_for_guest(&pool, &guest).await.unwrap(), 2);
        assert_eq!(fake.calls.load(Ordering::SeqCst), 2);
        assert_eq!(guest_quota(&st, &guest).await.unwrap(), (2, 0));
    }

    #[sqlx::test]
    async fn guest_insert_rechecks_quota_under_lock(pool: PgPool) {
        let st = AppState::fake_with_db(
            pool.clone(),
            Arc::new(FakeClassifier::returning(Label::Real, 60.0)),
        );
        let guest = GuestSessionId::new();
        let owner = Owner::Guest(guest.clone());
        let new = |filename: &'static str| NewUpload {
            filename,
            original_filename: "face.png",
            content_type: "image/png",
            label: Label::Real,
            confidence: 60.0,
            owner: &owner,
        };

        assert_eq!(persist(&st, &new("a1_face.png")).await.unwrap().1, Some(1));
        assert_eq!(persist(&st, &new("a2_face.png")).await.unwrap().1, Some(0));
        // a request that passed the early check before the others landed
        let err = persist(&st, &new("a3_face.png")).await.err().unwrap();
        assert!(matches!(err, Error::QuotaExceeded { .. }));
        assert_eq!(repo::count_for_guest(&pool, &guest).await.unwrap(), 2);
    }

    #[sqlx::test]
    async fn records_are_scoped_to_their_guest(pool: PgPool) {
        let st = AppState::fake_with_db(
            pool,
            Arc::new(FakeClassifier::returning(Label::Real, 70.0)),
        );
        let owner = GuestSessionId::new();
        let other = GuestSessionId::new();

        let out = analyze(&st, Caller::Guest(owner.clone()), upload("face.png", png_fixture(8, 8)))
            .await
            .unwrap();
        let id = out.record.id;
        let filename = out.record.filename.clone();

        assert_eq!(history(&st, Caller::Guest(owner.clone()), 20, 0).await.unwrap().len(), 1);
        assert!(history(&st, Caller::Guest(other.clone()), 20, 0).await.unwrap().is_empty());
        assert_eq!(get_analysis(&st, Caller::Guest(owner.clone()), id).await.unwrap().id, id);

        let err = get_analysis(&st, Caller::Guest(other.clone()), id).await.err().unwrap();
        assert!(matches!(err, Error::NotFound { .. }));

        let (content_type, body) = fetch_upload(&st, Caller::Guest(owner), &filename).await.unwrap();
        assert_eq!(content_type, "image/png");
        assert_eq!(body, Bytes::from(png_fixture(8, 8)));
        let err = fetch_upload(&st, Caller::Guest(other), &filename).await.err().unwrap();
        assert!(matches!(err, Error::NotFound { .. }));
    }
}
