// src/config.rs

use dotenvy::dotenv;
use std::env;
use std::str::FromStr;

/// Limits applied to every uploaded image.
#[derive(Debug, Clone)]
pub struct ImageLimits {
    pub max_files: usize,
    pub max_file_size: usize,
    pub allowed_extensions: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Postgres connection string. When absent the service runs on in-memory repositories.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    /// Token lifetime in seconds.
    pub jwt_expiration: u64,
    /// Secret used to derive the AES key for restricted wish fields.
    pub crypto_secret: String,
    pub rust_log: String,
    pub port: u16,
    pub media_dir: String,
    pub media_base_url: String,
    pub max_file_size_mb: usize,
    pub max_number_of_files: usize,
    pub allowed_extensions: Vec<String>,
    pub store_retry_attempts: u32,
}

impl Config {
    pub fn from_env() -> Self {
        dotenv().ok();

        let database_url = env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());

        let jwt_secret = env::var("JWT_SECRET").expect("JWT_SECRET must be set");

        let crypto_secret = env::var("CRYPTO_SECRET").expect("CRYPTO_SECRET must be set");

        let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());

        let allowed_extensions = env::var("ALLOWED_IMAGE_EXTENSIONS")
            .map(|v| parse_extensions(&v))
            .unwrap_or_else(|_| default_extensions());

        Self {
            database_url,
            jwt_secret,
            jwt_expiration: var_or("JWT_EXPIRATION", 24 * 60 * 60),
            crypto_secret,
            rust_log,
            port: var_or("PORT", 3000),
            media_dir: env::var("MEDIA_DIR").unwrap_or_else(|_| "media".to_string()),
            media_base_url: env::var("MEDIA_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000/media".to_string()),
            max_file_size_mb: var_or("MAX_FILE_SIZE_IN_MB", 5),
            max_number_of_files: var_or("MAX_NUMBER_OF_FILES", 10),
            allowed_extensions,
            store_retry_attempts: var_or("STORE_RETRY_ATTEMPTS", 3),
        }
    }

    pub fn image_limits(&self) -> ImageLimits {
        ImageLimits {
            max_files: self.max_number_of_files,
            max_file_size: self.max_file_size_mb * 1024 * 1024,
            allowed_extensions: self.allowed_extensions.clone(),
        }
    }

    /// Upper bound for a multipart request body: every file at full size plus room for form fields.
    pub fn body_limit(&self) -> usize {
        self.max_number_of_files * self.max_file_size_mb * 1024 * 1024 + 1024 * 1024
    }

    /// Path under which the router serves the media directory, taken from
    /// `MEDIA_BASE_URL` (`http://host/media` mounts at `/media`).
    pub fn media_mount(&self) -> String {
        let path = url::Url::parse(&self.media_base_url)
            .map(|url| url.path().trim_end_matches('/').to_string())
            .unwrap_or_default();
        if path.is_empty() { "/media".to_string() } else { path }
    }
}

pub fn default_extensions() -> Vec<String> {
    ["jpg", "jpeg", "png", "gif", "webp"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().trim_start_matches('.').to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

fn var_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            tracing::warn!("Ignoring invalid value for {}: {:?}", key, raw);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_is_mounted_at_the_base_url_path() {
        let mut config = crate::services::test_support::config();
        config.media_base_url = "https://cdn.example.com/files/".to_string();
        assert_eq!(config.media_mount(), "/files");
        config.media_base_url = "not a url".to_string();
        assert_eq!(config.media_mount(), "/media");
    }

    #[test]
    fn extensions_are_normalized() {
        assert_eq!(parse_extensions(" .JPG, png,,webp "), vec!["jpg", "png", "webp"]);
    }
}
