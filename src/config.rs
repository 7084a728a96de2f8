use std::path::PathBuf;

use anyhow::Context;
use serde::Deserialize;

/// Hard ceiling for a single uploaded image.
pub const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub ttl_minutes: i64,
    pub refresh_ttl_minutes: i64,
    pub guest_ttl_minutes: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    pub model_path: PathBuf,
    pub metadata_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub enum StorageConfig {
    Local {
        upload_dir: PathBuf,
    },
    S3 {
        endpoint: String,
        bucket: String,
        access_key: String,
        secret_key: String,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub enum MailTransportConfig {
    Smtp {
        host: String,
        port: u16,
        username: String,
        password: String,
        use_tls: bool,
    },
    File {
        dir: PathBuf,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct MailConfig {
    pub transport: MailTransportConfig,
    pub sender: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub jwt: JwtConfig,
    pub model: ModelConfig,
    pub storage: StorageConfig,
    pub mail: MailConfig,
    pub guest_quota: i64,
    pub verification_ttl_minutes: i64,
    pub reset_ttl_minutes: i64,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.into())
}

fn env_parse_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse::<T>().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
        let secret = std::env::var("JWT_SECRET")
            .or_else(|_| std::env::var("SECRET_KEY"))
            .context("JWT_SECRET (or SECRET_KEY) is not set")?;

        let jwt = JwtConfig {
            secret,
            issuer: env_or("JWT_ISSUER", "unmask"),
            audience: env_or("JWT_AUDIENCE", "unmask-users"),
            ttl_minutes: env_parse_or("JWT_TTL_MINUTES", 60),
            refresh_ttl_minutes: env_parse_or("JWT_REFRESH_TTL_MINUTES", 60 * 24 * 14),
            guest_ttl_minutes: env_parse_or("GUEST_TTL_MINUTES", 60 * 24),
        };

        let model = ModelConfig {
            model_path: env_or("MODEL_PATH", "model/unmask.onnx").into(),
            metadata_path: env_or("MODEL_METADATA_PATH", "model/metadata.json").into(),
        };

        let storage = match env_or("STORAGE_BACKEND", "local").to_lowercase().as_str() {
            "s3" | "minio" => StorageConfig::S3 {
                endpoint: std::env::var("MINIO_ENDPOINT").context("MINIO_ENDPOINT is not set")?,
                bucket: env_or("MINIO_BUCKET", "unmask-uploads"),
                access_key: std::env::var("MINIO_ACCESS_KEY")
                    .context("MINIO_ACCESS_KEY is not set")?,
                secret_key: std::env::var("MINIO_SECRET_KEY")
                    .context("MINIO_SECRET_KEY is not set")?,
            },
            "local" => StorageConfig::Local {
                upload_dir: env_or("UPLOAD_DIR", "uploads").into(),
            },
            other => anyhow::bail!("unknown STORAGE_BACKEND '{other}' (expected local or s3)"),
        };

        let transport = match env_or("MAIL_TRANSPORT", "smtp").to_lowercase().as_str() {
            "smtp" => MailTransportConfig::Smtp {
                host: env_or("MAIL_SERVER", "smtp.gmail.com"),
                port: env_parse_or("MAIL_PORT", 587),
                username: env_or("MAIL_USERNAME", ""),
                password: env_or("MAIL_PASSWORD", ""),
                use_tls: env_parse_or("MAIL_USE_TLS", true),
            },
            "file" => MailTransportConfig::File {
                dir: env_or("MAIL_FILE_DIR", "mail").into(),
            },
            other => anyhow::bail!("unknown MAIL_TRANSPORT '{other}' (expected smtp or file)"),
        };
        let mail = MailConfig {
            transport,
            sender: env_or("MAIL_DEFAULT_SENDER", "no-reply@unmask.local"),
        };

        Ok(Self {
            database_url,
            jwt,
            model,
            storage,
            mail,
            guest_quota: env_parse_or("GUEST_QUOTA", 2),
            verification_ttl_minutes: env_parse_or("VERIFICATION_TTL_MINUTES", 15),
            reset_ttl_minutes: env_parse_or("RESET_TTL_MINUTES", 15),
        })
    }
}
