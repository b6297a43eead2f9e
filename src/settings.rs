use crate::utils::crypto::generate_secret;
use crate::utils::logging::init_logging;
use serde::{Deserialize, Serialize};
use std::fs;
use std::time::Duration;

/// Longest a `/wait` request may block
pub const MAX_WAIT_TIMEOUT_SECS: u64 = 24 * 60 * 60;

/// Longest interval between polls of a rendezvous slot
pub const MAX_POLL_INTERVAL_MS: u64 = 60 * 1000;

/// Longest an unclaimed rendezvous slot is retained
pub const MAX_SLOT_LIFETIME_SECS: u64 = 7 * 24 * 60 * 60;

/// Longest validity of a discharge
pub const MAX_DISCHARGE_VALIDITY_HOURS: u64 = 366 * 24;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DischargerSettings {
    pub application: ApplicationSettings,
    pub keys: KeySettings,
    pub rendezvous: RendezvousSettings,
    pub templates: TemplateSettings,
    pub logging: LoggingSettings,
    pub providers: Vec<ProviderSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationSettings {
    pub host: String,
    pub port: u16,
    /// Externally visible base URL of the discharger
    ///
    /// Visit and wait URLs are built from it, and redirects are only issued
    /// to addresses below it.
    pub location: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeySettings {
    /// Secret all signing and sealing keys are derived from
    pub secret: String,
    /// Validity of minted discharge macaroons in hours
    pub discharge_validity_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RendezvousSettings {
    /// How long `/wait` blocks before answering with a timeout
    pub wait_timeout_secs: u64,
    /// Interval between polls of the shared store while waiting
    pub poll_interval_ms: u64,
    /// Retention of an unclaimed rendezvous slot
    pub slot_lifetime_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TemplateSettings {
    pub folder: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSettings {
    pub level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    pub name: String,
    /// Provider implementation; only `static` is built in
    #[serde(rename = "type")]
    pub kind: String,
    pub description: Option<String>,
    pub enabled: bool,
    /// Users of a `static` provider
    pub users: Vec<StaticUserSettings>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StaticUserSettings {
    pub username: String,
    pub password: String,
    pub name: Option<String>,
    pub email: Option<String>,
    pub groups: Vec<String>,
}

impl Default for ApplicationSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8081,
            location: "http://localhost:8081".to_string(),
        }
    }
}

impl Default for KeySettings {
    fn default() -> Self {
        Self {
            secret: String::new(), // Will be generated if empty
            discharge_validity_hours: 24,
        }
    }
}

impl Default for RendezvousSettings {
    fn default() -> Self {
        Self {
            wait_timeout_secs: 300,
            poll_interval_ms: 500,
            slot_lifetime_secs: 900,
        }
    }
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            folder: "src/templates".to_string(),
        }
    }
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            name: String::new(),
            kind: "static".to_string(),
            description: None,
            enabled: true,
            users: Vec::new(),
        }
    }
}

impl DischargerSettings {
    /// Load settings from configuration files and environment variables,
    /// then initialize logging at the configured level
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Settings file cannot be read
    /// - TOML parsing fails
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        Self::load_env_file();

        // Load base settings from TOML or defaults
        let mut settings = Self::load_base_settings()?;

        // Apply environment variable overrides
        Self::apply_env_overrides(&mut settings);

        init_logging(&settings.logging.level);

        Ok(settings)
    }

    /// Load base settings from TOML file(s) or use defaults
    /// Settings are loaded with the following priority (highest to lowest):
    /// 1. Environment variables (applied separately after loading base settings)
    /// 2. Settings.toml in `DISCHARGER_SECRETS_DIR` (if specified and exists)
    /// 3. Settings.toml in current directory (if exists)
    /// 4. Default settings
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Settings file cannot be read
    /// - TOML parsing fails
    fn load_base_settings() -> Result<Self, Box<dyn std::error::Error>> {
        let mut settings = Self::default();

        let default_config_path = std::path::PathBuf::from("Settings.toml");
        if default_config_path.exists() {
            let toml_content = fs::read_to_string(&default_config_path)?;
            settings = basic_toml::from_str(&toml_content)?;
            println!(
                "✓ Loaded base settings from {}",
                default_config_path.display()
            );
        }

        if let Ok(secrets_dir) = std::env::var("DISCHARGER_SECRETS_DIR") {
            let secrets_path = std::path::Path::new(&secrets_dir).join("Settings.toml");
            if secrets_path.exists() {
                let secrets_toml_content = fs::read_to_string(&secrets_path)?;
                settings = basic_toml::from_str(&secrets_toml_content)?;
                println!("✓ Overriding settings from {}", secrets_path.display());
            } else {
                println!(
                    "ℹ DISCHARGER_SECRETS_DIR set but no Settings.toml found at: {}",
                    secrets_path.display()
                );
            }
        }

        Ok(settings)
    }

    /// Apply environment variable overrides to settings
    pub fn apply_env_overrides(settings: &mut Self) {
        Self::apply_application_env_overrides(&mut settings.application);
        Self::apply_key_env_overrides(&mut settings.keys);
        Self::apply_rendezvous_env_overrides(&mut settings.rendezvous);
        if let Ok(folder) = std::env::var("TEMPLATES_FOLDER") {
            settings.templates.folder = folder;
        }
        if let Ok(log_level) = std::env::var("RUST_LOG") {
            settings.logging.level = log_level;
        }
    }

    fn apply_application_env_overrides(app_settings: &mut ApplicationSettings) {
        if let Ok(host) = std::env::var("HOST") {
            app_settings.host = host;
        }
        if let Ok(port_str) = std::env::var("PORT") {
            if let Ok(port) = port_str.parse::<u16>() {
                app_settings.port = port;
            }
        }
        if let Ok(location) = std::env::var("DISCHARGER_LOCATION") {
            app_settings.location = location;
        }
        // Visit, wait and redirect URLs are joined onto the location
        while app_settings.location.ends_with('/') {
            app_settings.location.pop();
        }
    }

    fn apply_rendezvous_env_overrides(rendezvous: &mut RendezvousSettings) {
        Self::apply_numeric_env_override("WAIT_TIMEOUT_SECS", &mut rendezvous.wait_timeout_secs);
        Self::apply_numeric_env_override("WAIT_POLL_INTERVAL_MS", &mut rendezvous.poll_interval_ms);
    }

    /// Helper function to apply numeric environment variable overrides
    fn apply_numeric_env_override(env_var: &str, target: &mut u64) {
        if let Ok(value_str) = std::env::var(env_var) {
            if let Ok(value) = value_str.parse::<u64>() {
                *target = value;
            }
        }
    }

    /// Apply the secret override, generating a secret when none is configured
    pub fn apply_key_env_overrides(keys: &mut KeySettings) {
        let env_secret_set = std::env::var("DISCHARGER_SECRET").is_ok_and(|secret| {
            if secret.is_empty() {
                false
            } else {
                keys.secret = secret;
                true
            }
        });

        if !env_secret_set && keys.secret.is_empty() {
            keys.secret = generate_secret();
            Self::warn_about_generated_secret();
        }
    }

    fn warn_about_generated_secret() {
        eprintln!("⚠️  WARNING: Using auto-generated discharger secret");
        eprintln!("🔒 For production use, set the DISCHARGER_SECRET environment variable");
        eprintln!("   or configure keys.secret in Settings.toml");
        eprintln!("💡 Credentials and pending logins are invalidated on each restart");
        eprintln!("   and instances sharing a location must share the secret");
    }

    /// Load environment variables from .env file
    fn load_env_file() {
        if let Ok(contents) = std::fs::read_to_string(".env") {
            for line in contents.lines() {
                let line = line.trim();
                if line.is_empty() || line.starts_with('#') {
                    continue;
                }
                if let Some((key, value)) = line.split_once('=') {
                    std::env::set_var(key.trim(), value.trim());
                }
            }
        }
    }

    /// Get the bind address for the server
    #[must_use]
    pub fn get_bind_address(&self) -> String {
        format!("{}:{}", self.application.host, self.application.port)
    }

    /// Get enabled providers
    #[must_use]
    pub fn get_enabled_providers(&self) -> Vec<&ProviderSettings> {
        self.providers.iter().filter(|p| p.enabled).collect()
    }

    /// Wait timeout, capped at [`MAX_WAIT_TIMEOUT_SECS`]
    #[must_use]
    pub fn wait_timeout(&self) -> Duration {
        Duration::from_secs(self.rendezvous.wait_timeout_secs.min(MAX_WAIT_TIMEOUT_SECS))
    }

    /// Poll interval, between 1 ms and [`MAX_POLL_INTERVAL_MS`]
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.rendezvous.poll_interval_ms.clamp(1, MAX_POLL_INTERVAL_MS))
    }

    /// Slot lifetime, never shorter than the wait timeout
    #[must_use]
    pub fn slot_lifetime(&self) -> Duration {
        let secs = self.rendezvous.slot_lifetime_secs.min(MAX_SLOT_LIFETIME_SECS);
        Duration::from_secs(secs).max(self.wait_timeout())
    }

    /// Discharge validity, capped at [`MAX_DISCHARGE_VALIDITY_HOURS`]
    #[must_use]
    pub fn discharge_validity(&self) -> chrono::Duration {
        let hours = self
            .keys
            .discharge_validity_hours
            .min(MAX_DISCHARGE_VALIDITY_HOURS);
        chrono::Duration::try_hours(i64::try_from(hours).unwrap_or(24))
            .unwrap_or_else(|| chrono::Duration::hours(24))
    }
}
