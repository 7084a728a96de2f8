use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    auth::{Caller, GuestSessionId},
    model::Label,
};

/// Who owns an upload record. Exactly one of user or guest, by construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Owner {
    User(Uuid),
    Guest(GuestSessionId),
}

impl Owner {
    /// Column values for `(user_id, guest_session_id)`.
    pub fn columns(&self) -> (Option<Uuid>, Option<String>) {
        match self {
            Owner::User(id) => (Some(*id), None),
            Owner::Guest(g) => (None, Some(g.as_str().to_owned())),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Owner::User(_) => "user",
            Owner::Guest(_) => "guest",
        }
    }
}

impl From<Caller> for Owner {
    fn from(c: Caller) -> Self {
        match c {
            Caller::User(id) => Owner::User(id),
            Caller::Guest(g) => Owner::Guest(g),
        }
    }
}

/// Raw `uploads` row.
#[derive(Debug, Clone, FromRow)]
pub struct UploadRow {
    pub id: Uuid,
    pub filename: String,
    pub original_filename: String,
    pub content_type: String,
    pub result_label: String,
    pub confidence: f64,
    pub user_id: Option<Uuid>,
    pub guest_session_id: Option<String>,
    pub created_at: OffsetDateTime,
}

/// One completed analysis. Immutable once stored.
#[derive(Debug, Clone)]
pub struct UploadRecord {
    pub id: Uuid,
    pub filename: String,
    pub original_filename: String,
    pub content_type: String,
    pub label: Label,
    pub confidence: f64,
    pub owner: Owner,
    pub created_at: OffsetDateTime,
}

/// Insert payload; the record only exists once classification finished.
#[derive(Debug)]
pub struct NewUpload<'a> {
    pub filename: &'a str,
    pub original_filename: &'a str,
    pub content_type: &'a str,
    pub label: Label,
    pub confidence: f64,
    pub owner: &'a Owner,
}

impl TryFrom<UploadRow> for UploadRecord {
    type Error = anyhow::Error;

    fn try_from(r: UploadRow) -> Result<Self, Self::Error> {
        let owner = match (r.user_id, r.guest_session_id) {
            (Some(id), None) => Owner::User(id),
            (None, Some(g)) => {
                let id = Uuid::try_parse(&g)
                    .map_err(|e| anyhow::anyhow!("upload {} has bad guest session id: {e}", r.id))?;
                Owner::Guest(GuestSessionId::from(id))
            }
            _ => anyhow::bail!("upload {} must have exactly one owner", r.id),
        };
        let label = r
            .result_label
            .parse::<Label>()
            .map_err(|e| anyhow::anyhow!("upload {}: {e}", r.id))?;
        anyhow::ensure!(
            (0.0..=100.0).contains(&r.confidence),
            "upload {} confidence {} out of range",
            r.id,
            r.confidence
        );
        Ok(Self {
            id: r.id,
            filename: r.filename,
            original_filename: r.original_filename,
            content_type: r.content_type,
            label,
            confidence: r.confidence,
            owner,
            created_at: r.created_at,
        })
    }
}

#[cfg(test)]
pub(crate) fn row_fixture(user_id: Option<Uuid>, guest: Option<String>) -> UploadRow {
    UploadRow {
        id: Uuid::new_v4(),
        filename: "0123456789abcdef_face.png".into(),
        original_filename: "face.png".into(),
        content_type: "image/png".into(),
        result_label: "FAKE".into(),
        confidence: 87.5,
        user_id,
        guest_session_id: guest,
        created_at: OffsetDateTime::now_utc(),
    }
}
