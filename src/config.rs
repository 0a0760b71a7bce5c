// src/config.rs - Configuration management
use serde::Deserialize;
use std::env;
use anyhow::{Context, Result};
use rand::{thread_rng, Rng, distributions::Alphanumeric};
use std::path::Path;
use std::fs;

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    pub security: SecurityConfig,
    pub logging: LoggingConfig,
    pub pharmacy: PharmacyConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: Option<usize>,
    pub keep_alive: u64,
    pub client_timeout: u64,
    pub client_shutdown: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout: u64,
    pub idle_timeout: u64,
    pub busy_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub token_expiration_hours: i64,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
    pub max_request_size: usize,
    pub require_https: bool,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
}

/// Dispensation and stock monitoring settings.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct PharmacyConfig {
    /// How many times a dispensation is replayed after a concurrency conflict.
    pub conflict_retries: u32,
    pub expiry_warning_days: i64,
    pub alert_scan_interval_minutes: u64,
    pub audit_retention_days: i64,
}

// Dummy defaults for tests (no ENV read here)
impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "dummy_32_chars_for_tests_only!!!".to_string(),
            token_expiration_hours: 12,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            workers: None,
            keep_alive: 30,
            client_timeout: 30,
            client_shutdown: 5,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite:pharmacy.db".to_string(),
            max_connections: 10,
            min_connections: 1,
            connect_timeout: 30,
            idle_timeout: 600,
            busy_timeout_ms: 5000,
        }
    }
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
            max_request_size: 1024 * 1024,
            require_https: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for PharmacyConfig {
    fn default() -> Self {
        Self {
            conflict_retries: 1,
            expiry_warning_days: 30,
            alert_scan_interval_minutes: 60,
            audit_retention_days: 365,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig::default(),
            auth: AuthConfig::default(),
            security: SecurityConfig::default(),
            logging: LoggingConfig::default(),
            pharmacy: PharmacyConfig::default(),
        }
    }
}

/// Secure random secret for signing tokens
pub fn generate_jwt_secret() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(64)
        .map(char::from)
        .collect()
}

pub fn load_config() -> Result<Config> {
    load_env_file()?;

    let mut config = if let Ok(config_file) = env::var("CONFIG_FILE") {
        load_config_file(Path::new(&config_file))?
    } else {
        Config::default()
    };

    override_with_env(&mut config)?;

    config.validate()
        .context("Configuration validation failed")?;

    Ok(config)
}

pub fn load_config_file(path: &Path) -> Result<Config> {
    let config_str = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    toml::from_str(&config_str)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

fn override_with_env(config: &mut Config) -> Result<()> {
    if let Ok(host) = env::var("BIND_ADDRESS") {
        config.server.host = host;
    }
    if let Some(port) = parse_env::<u16>("PHARMACY_PORT") {
        config.server.port = port;
    }
    if let Some(workers) = parse_env::<usize>("PHARMACY_WORKERS") {
        config.server.workers = Some(workers);
    }
    if let Ok(jwt_secret) = env::var("JWT_SECRET") {
        config.auth.jwt_secret = jwt_secret;
    }
    if let Some(expiration) = parse_env::<i64>("AUTH_TOKEN_EXPIRATION_HOURS") {
        config.auth.token_expiration_hours = expiration;
    }
    if let Ok(url) = env::var("DATABASE_URL") {
        config.database.url = url;
    }
    if let Some(max_conn) = parse_env::<u32>("DATABASE_MAX_CONNECTIONS") {
        config.database.max_connections = max_conn;
    }
    if let Some(min_conn) = parse_env::<u32>("DATABASE_MIN_CONNECTIONS") {
        config.database.min_connections = min_conn;
    }
    if let Some(busy) = parse_env::<u64>("DATABASE_BUSY_TIMEOUT_MS") {
        config.database.busy_timeout_ms = busy;
    }
    if let Some(retries) = parse_env::<u32>("PHARMACY_CONFLICT_RETRIES") {
        config.pharmacy.conflict_retries = retries;
    }
    if let Some(days) = parse_env::<i64>("PHARMACY_EXPIRY_WARNING_DAYS") {
        config.pharmacy.expiry_warning_days = days;
    }
    if let Ok(origins_str) = env::var("ALLOWED_ORIGINS") {
        config.security.allowed_origins = origins_str
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Ok(level) = env::var("RUST_LOG") {
        config.logging.level = level;
    }

    Ok(())
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.auth.jwt_secret.len() < 32 {
            return Err(anyhow::anyhow!(
                "JWT_SECRET must be at least 32 characters long (current: {})",
                self.auth.jwt_secret.len()
            ));
        }

        if self.database.max_connections < self.database.min_connections {
            return Err(anyhow::anyhow!(
                "max_connections ({}) must be >= min_connections ({})",
                self.database.max_connections,
                self.database.min_connections
            ));
        }

        if self.pharmacy.conflict_retries > 5 {
            return Err(anyhow::anyhow!(
                "conflict_retries ({}) must not exceed 5",
                self.pharmacy.conflict_retries
            ));
        }

        if self.pharmacy.expiry_warning_days < 0 {
            return Err(anyhow::anyhow!("expiry_warning_days cannot be negative"));
        }

        Ok(())
    }

    /// True while no secret was supplied by file or environment.
    pub fn uses_default_jwt_secret(&self) -> bool {
        self.auth.jwt_secret == AuthConfig::default().jwt_secret
    }

    pub fn is_production(&self) -> bool {
        env::var("PHARMACY_ENV").map(|v| v == "production").unwrap_or(false)
    }

    pub fn print_startup_info(&self) {
        log::info!("Pharmacy service starting up...");
        log::info!("Server: {}:{}", self.server.host, self.server.port);
        log::info!("Database: {}", self.database.url);
        log::info!("Auth: JWT ({}h expiration)", self.auth.token_expiration_hours);
        log::info!("Logging: {} level", self.logging.level);
        log::info!(
            "Dispensation conflict retries: {}, expiry warning: {} days",
            self.pharmacy.conflict_retries, self.pharmacy.expiry_warning_days
        );

        if !self.is_production() {
            log::warn!("Running in development mode");
        }

        if self.security.require_https {
            log::info!("HTTPS enforcement enabled");
        } else if self.is_production() {
            log::warn!("HTTPS not required in production mode");
        }
    }
}

pub fn load_env_file() -> Result<()> {
    if let Ok(env_file) = env::var("ENV_FILE") {
        dotenvy::from_filename(&env_file)
            .with_context(|| format!("Failed to load environment file: {}", env_file))?;
    } else if Path::new(".env").exists() {
        dotenvy::dotenv().context("Failed to load .env file")?;
    }
    Ok(())
}
