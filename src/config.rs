use std::{env, str::FromStr};

use dotenvy::dotenv;
use thiserror::Error;
use validator::{Validate, ValidationErrors};

use crate::{ingest::IngestConfig, transcoder::TranscodeSettings};

const DEFAULT_ALLOWED_EXTENSIONS: &str =
    "jpg,jpeg,png,gif,webp,bmp,tiff,tif,svg,ico,avif,heic,heif,mp4,webm,avi,mov,wmv,flv,mkv,m4v,3gp,ogv";
const DEFAULT_THUMBNAIL_EXTENSIONS: &str = "jpg,jpeg,png";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid configuration: {0}")]
    Invalid(#[from] ValidationErrors),
}

#[derive(Debug, Clone, Validate)]
pub struct Config {
    pub database_url: String,
    #[validate(length(min = 1))]
    pub api_key: String,
    pub bind_addr: String,
    pub s3_endpoint: Option<String>,
    pub s3_region: String,
    pub s3_bucket: String,
    pub s3_access_key: String,
    pub s3_secret_key: String,
    pub use_s3: bool,
    /// Root of the local blob store; `img/` and `thumbs/` live beneath it.
    pub storage_path: String,
    /// Public origin used to build the URLs returned to clients.
    pub cdn_domain: String,
    #[validate(range(min = 1, max = 104857600))] // Max 100MB
    pub max_file_size: u64,
    #[validate(range(min = 1))]
    pub max_image_size: u32,
    #[validate(range(min = 1))]
    pub max_thumb_size: u32,
    #[validate(range(min = 1, max = 100))]
    pub jpeg_quality: u8,
    #[validate(range(max = 9))]
    pub png_compression: u8,
    pub allowed_extensions: Vec<String>,
    pub thumbnail_extensions: Vec<String>,
    pub deduplicate_uploads: bool,
    pub normalize_filenames: bool,
}

/// Parse a variable, falling back to `default` when unset or unparsable.
fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

fn env_list(key: &str, default: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::Missing(key))
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load environment variables from `.env` file (if it exists)
        dotenv().ok();

        let config = Config {
            database_url: required("DATABASE_URL")?,
            api_key: required("API_KEY")?,
            bind_addr: env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string()),
            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            s3_region: env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
            s3_bucket: env::var("S3_BUCKET").unwrap_or_else(|_| "cdn-ingest".to_string()),
            s3_access_key: env::var("S3_ACCESS_KEY").unwrap_or_else(|_| "minioadmin".to_string()),
            s3_secret_key: env::var("S3_SECRET_KEY").unwrap_or_else(|_| "minioadmin".to_string()),
            use_s3: env_or("USE_S3", false),
            storage_path: env::var("STORAGE_PATH").unwrap_or_else(|_| "uploads".to_string()),
            cdn_domain: env::var("CDN_DOMAIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string())
                .trim_end_matches('/')
                .to_string(),
            max_file_size: env_or("MAX_FILE_SIZE", 20 * 1024 * 1024),
            max_image_size: env_or("MAX_IMAGE_SIZE", 700),
            max_thumb_size: env_or("MAX_THUMB_SIZE", 300),
            jpeg_quality: env_or("JPEG_QUALITY", 95),
            png_compression: env_or("PNG_COMPRESSION", 6),
            allowed_extensions: env_list("ALLOWED_EXTENSIONS", DEFAULT_ALLOWED_EXTENSIONS),
            thumbnail_extensions: env_list("THUMBNAIL_EXTENSIONS", DEFAULT_THUMBNAIL_EXTENSIONS),
            deduplicate_uploads: env_or("DEDUPLICATE_UPLOADS", false),
            normalize_filenames: env_or("NORMALIZE_FILENAMES", true),
        };

        // Validate configuration values (e.g. file size range)
        config.validate()?;
        Ok(config)
    }

    /// The settings the ingestion pipeline is built with.
    pub fn ingest_config(&self) -> IngestConfig {
        IngestConfig {
            max_file_size: self.max_file_size as usize,
            allowed_extensions: self.allowed_extensions.clone(),
            thumbnail_extensions: self.thumbnail_extensions.clone(),
            deduplicate_uploads: self.deduplicate_uploads,
            normalize_filenames: self.normalize_filenames,
            transcode: TranscodeSettings {
                max_image_size: self.max_image_size,
                max_thumb_size: self.max_thumb_size,
                jpeg_quality: self.jpeg_quality,
                png_compression: self.png_compression,
            },
        }
    }

    /// Request body ceiling: base64 JSON uploads inflate by 4/3, plus room
    /// for multipart framing.
    pub fn max_request_body(&self) -> usize {
        (self.max_file_size as usize).saturating_mul(4) / 3 + 64 * 1024
    }

    pub fn image_url(&self, filename: &str) -> String {
        format!("{}/img/{}", self.cdn_domain, filename)
    }

    pub fn thumbnail_url(&self, thumb_filename: &str) -> Option<String> {
        (!thumb_filename.is_empty()).then(|| format!("{}/thumbs/{}", self.cdn_domain, thumb_filename))
    }
}
