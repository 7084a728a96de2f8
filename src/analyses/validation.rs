use bytes::Bytes;
use rand::Rng;

use crate::{config::MAX_UPLOAD_BYTES, error::Error};

pub const ALLOWED_EXTENSIONS: [&str; 3] = ["png", "jpg", "jpeg"];

/// Longest client filename the uploads table can hold.
pub const MAX_FILENAME_CHARS: usize = 255;

/// An image as received from the multipart form.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub original_filename: String,
    pub content_type: Option<String>,
    pub body: Bytes,
}

fn extension(filename: &str) -> Option<String> {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or_default();
    let (stem, ext) = base.rsplit_once('.')?;
    // ".png" is a dotfile, not a png
    if stem.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// MIME type implied by an allowed extension.
pub fn content_type_for(filename: &str) -> Option<&'static str> {
    let ext = extension(filename)?;
    if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
        return None;
    }
    Some(if ext == "png" { "image/png" } else { "image/jpeg" })
}

/// Type and size checks. Returns the canonical content type to store.
pub fn validate_upload(upload: &ImageUpload) -> Result<&'static str, Error> {
    if upload.body.is_empty() {
        return Err(Error::validation("Please choose an image to upload."));
    }
    if upload.body.len() > MAX_UPLOAD_BYTES {
        return Err(Error::PayloadTooLarge {
            limit_bytes: MAX_UPLOAD_BYTES,
        });
    }

    if upload.original_filename.chars().count() > MAX_FILENAME_CHARS {
        return Err(Error::validation(format!(
            "File name is too long. Use at most {MAX_FILENAME_CHARS} characters."
        )));
    }

    let unsupported = || Error::validation("Unsupported file type. Please upload PNG/JPG/JPEG.");
    let canonical = content_type_for(&upload.original_filename).ok_or_else(unsupported)?;

    if let Some(declared) = upload.content_type.as_deref() {
        let declared = declared
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if !matches!(declared.as_str(), "image/png" | "image/jpeg" | "image/jpg") {
            return Err(unsupported());
        }
    }
    Ok(canonical)
}

/// Strip a client filename down to `[A-Za-z0-9._-]`, no leading dots.
pub fn secure_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let cleaned: String = base
        .chars()
        .map(|c| if c.is_whitespace() { '_' } else { c })
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    trimmed.chars().take(120).collect()
}

/// Storage name: 16 random hex chars, `_`, sanitized original name.
pub fn safe_filename(original: &str) -> String {
    let prefix = format!("{:016x}", rand::thread_rng().gen::<u64>());
    let mut name = secure_filename(original);
    if content_type_for(&name).is_none() {
        let ext = extension(original).unwrap_or_else(|| "img".into());
        name = format!("upload.{ext}");
    }
    format!("{prefix}_{name}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upload(name: &str, ct: Option<&str>, len: usize) -> ImageUpload {
        ImageUpload {
            original_filename: name.into(),
            content_type: ct.map(String::from),
            body: Bytes::from(vec![0u8; len]),
        }
    }

    #[test]
    fn accepts_allowed_extensions_case_insensitively() {
        assert_eq!(validate_upload(&upload("a.png", Some("image/png"), 10)).unwrap(), "image/png");
        assert_eq!(validate_upload(&upload("a.JPG", Some("image/jpeg"), 10)).unwrap(), "image/jpeg");
        assert_eq!(validate_upload(&upload("a.jpeg", None, 10)).unwrap(), "image/jpeg");
    }

    #[test]
    fn rejects_disallowed_extensions() {
        for name in ["a.gif", "a.webp", "archive.tar.gz", "noext", "a.png.exe", ".png"] {
            let err = validate_upload(&upload(name, None, 10)).unwrap_err();
            assert!(matches!(err, Error::Validation { .. }), "{name}");
        }
    }

    #[test]
    fn rejects_non_image_content_type() {
        for ct in ["text/html", "application/octet-stream", "image/gif"] {
            let err = validate_upload(&upload("a.png", Some(ct), 10)).unwrap_err();
            assert!(matches!(err, Error::Validation { .. }), "{ct}");
        }
        assert!(validate_upload(&upload("a.png", Some("image/png; charset=binary"), 10)).is_ok());
    }

    #[test]
    fn filename_length_fits_the_uploads_table() {
        let name = format!("{}.png", "a".repeat(MAX_FILENAME_CHARS - 4));
        assert!(validate_upload(&upload(&name, None, 10)).is_ok());

        let name = format!("{}.png", "a".repeat(300));
        let err = validate_upload(&upload(&name, None, 10)).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn content_type_follows_allowed_extensions() {
        for ext in ALLOWED_EXTENSIONS {
            assert!(content_type_for(&format!("face.{ext}")).is_some(), "{ext}");
        }
        assert_eq!(content_type_for("face.PNG"), Some("image/png"));
        assert_eq!(content_type_for("face.gif"), None);
    }

    #[test]
    fn size_ceiling_is_inclusive() {
        assert!(validate_upload(&upload("a.png", None, MAX_UPLOAD_BYTES)).is_ok());
        let err = validate_upload(&upload("a.png", None, MAX_UPLOAD_BYTES + 1)).unwrap_err();
        assert!(matches!(err, Error::PayloadTooLarge { .. }));
    }

    #[test]
    fn empty_upload_is_rejected() {
        assert!(matches!(
            validate_upload(&upload("a.png", None, 0)).unwrap_err(),
            Error::Validation { .. }
        ));
    }

    #[test]
    fn secure_filename_strips_paths_and_odd_chars() {
        assert_eq!(secure_filename("../../etc/passwd"), "passwd");
        assert_eq!(secure_filename("C:\\Users\\me\\My Face.png"), "My_Face.png");
        assert_eq!(secure_filename("..hidden.jpg"), "hidden.jpg");
        assert_eq!(secure_filename("visage é.png"), "visage_.png");
        assert_eq!(secure_filename("__init__.png"), "__init__.png");
        assert_eq!(secure_filename(". face.png"), "_face.png");
    }

    #[test]
    fn safe_filename_has_random_prefix() {
        let a = safe_filename("face.png");
        let b = safe_filename("face.png");
        assert_ne!(a, b);
        let (prefix, rest) = a.split_once('_').unwrap();
        assert_eq!(prefix.len(), 16);
        assert!(prefix.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(rest, "face.png");
        assert!(!safe_filename("../../x.jpg").contains('/'));
    }

    #[test]
    fn safe_filename_falls_back_when_name_is_unusable() {
        let name = safe_filename("ééé.png");
        assert!(name.ends_with("_upload.png"), "{name}");
    }
}
