use figment::providers::{Env, Format, Yaml};
use figment::Figment;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Bot token
/// Read from BOT_TOKEN or TELOXIDE_TOKEN environment variable.
/// `telegram_bot.token` in the settings file is used when both are unset.
pub static BOT_TOKEN: Lazy<Option<String>> = Lazy::new(|| {
    env::var("BOT_TOKEN")
        .or_else(|_| env::var("TELOXIDE_TOKEN"))
        .ok()
        .filter(|token| !token.trim().is_empty())
});

/// Database file path
/// Read from DATABASE_PATH environment variable
/// Default: kasabot.db
pub static DATABASE_PATH: Lazy<String> =
    Lazy::new(|| env::var("DATABASE_PATH").unwrap_or_else(|_| "kasabot.db".to_string()));

/// Log file path
/// Read from LOG_FILE_PATH environment variable
/// Default: kasabot.log
pub static LOG_FILE_PATH: Lazy<String> =
    Lazy::new(|| env::var("LOG_FILE_PATH").unwrap_or_else(|_| "kasabot.log".to_string()));

/// Settings file path
/// Read from CONFIG_PATH environment variable
/// Default: config.yaml
pub static CONFIG_PATH: Lazy<String> =
    Lazy::new(|| env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string()));

/// Directory for transaction snapshot files
/// Read from DATA_DIR environment variable
/// Default: current directory
pub static DATA_DIR: Lazy<PathBuf> =
    Lazy::new(|| env::var("DATA_DIR").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(".")));

/// Client identity sent to the fiscal API
pub const CLIENT_NAME: &str = env!("CARGO_PKG_NAME");
pub const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Network configuration
pub mod network {
    use super::Duration;

    /// Request timeout for outgoing HTTP calls (in seconds)
    pub const REQUEST_TIMEOUT_SECS: u64 = 60;

    pub fn timeout() -> Duration {
        Duration::from_secs(REQUEST_TIMEOUT_SECS)
    }
}

/// Polling loops that wait for the fiscal backend
pub mod polling {
    use super::Duration;

    /// Pause between confirmation polls
    pub const INTERVAL_MS: u64 = 1000;

    /// Attempts while waiting for a shift to open or close
    pub const SHIFT_ATTEMPTS: u32 = 60;

    /// Attempts while waiting for a receipt to be signed
    pub const RECEIPT_ATTEMPTS: u32 = 10;

    pub fn interval() -> Duration {
        Duration::from_millis(INTERVAL_MS)
    }
}

/// Application settings loaded from the YAML file and `KASABOT_*` env overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub telegram_bot: TelegramSettings,
    pub checkbox: CheckboxSettings,
    /// Send the rendered PNG instead of QR code + text
    pub receipt_as_image: bool,
    pub print: PrintSettings,
    pub google: GoogleSettings,
    pub privat24: Privat24Settings,
    pub fondy: FondySettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TelegramSettings {
    pub token: Option<String>,
    /// Phone numbers that receive the ADMIN role on sign-in
    pub admins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CheckboxSettings {
    pub api_url: String,
    pub pin: Option<String>,
    pub login: Option<String>,
    pub password: Option<String>,
    pub license: Option<String>,
    /// Daily close time, `HH:MM`
    pub shift_close_time: Option<String>,
    pub token_ttl_hours: u64,
    pub catalog_ttl_minutes: u64,
}

impl Default for CheckboxSettings {
    fn default() -> Self {
        Self {
            api_url: "https://api.checkbox.ua/".to_string(),
            pin: None,
            login: None,
            password: None,
            license: None,
            shift_close_time: None,
            token_ttl_hours: 24,
            catalog_ttl_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrintSettings {
    /// Characters per line for the text rendering of a receipt
    pub width: Option<u32>,
    pub bottom_margin: usize,
    pub printer: Option<PrinterSettings>,
    pub logo: Option<PathBuf>,
    /// `ESC t` code page number of WPC1251 on the printer
    pub codepage: u8,
}

impl Default for PrintSettings {
    fn default() -> Self {
        Self {
            width: None,
            bottom_margin: 4,
            printer: None,
            logo: None,
            codepage: 46,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrinterSettings {
    pub host: String,
    #[serde(default = "default_printer_port")]
    pub port: u16,
}

fn default_printer_port() -> u16 {
    9100
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct GoogleSettings {
    pub application_credentials: Option<PathBuf>,
    pub spreadsheet_key: Option<String>,
    pub worksheet: WorksheetSettings,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorksheetSettings {
    /// Cash income rows written at shift close
    pub title: Option<String>,
    /// Cashless rows written by the reconcilers
    pub title_cashless: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Privat24Settings {
    pub api_url: String,
    pub api: ApiCredentials,
    /// Only credits to these accounts become receipts (empty = all)
    pub accounts: Vec<String>,
    pub polling_interval: u64,
    pub good_name_default: String,
}

impl Default for Privat24Settings {
    fn default() -> Self {
        Self {
            api_url: "https://acp.privatbank.ua/api/statements/transactions".to_string(),
            api: ApiCredentials::default(),
            accounts: Vec::new(),
            polling_interval: 15,
            good_name_default: "Оплата".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ApiCredentials {
    pub id: Option<String>,
    pub token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FondySettings {
    pub token_url: String,
    pub report_url: String,
    pub auth: FondyAuth,
    pub merchant_id: Option<String>,
    pub polling_interval: u64,
}

impl Default for FondySettings {
    fn default() -> Self {
        Self {
            token_url: "https://wallet.fondy.eu/authorizer/token/application/get".to_string(),
            report_url: "https://portal.fondy.eu/api/extend/company/report/".to_string(),
            auth: FondyAuth::default(),
            merchant_id: None,
            polling_interval: 15,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FondyAuth {
    pub id: Option<String>,
    pub secret_key: Option<String>,
}

/// Polling interval floor, in minutes.
pub const MIN_POLLING_INTERVAL: u64 = 1;

fn clamp_polling_interval(section: &str, minutes: u64) -> u64 {
    if minutes < MIN_POLLING_INTERVAL {
        log::warn!(
            "{}.polling_interval {} is too small, using {}",
            section,
            minutes,
            MIN_POLLING_INTERVAL
        );
        return MIN_POLLING_INTERVAL;
    }
    minutes
}

impl Settings {
    /// Load settings from a YAML file, then apply `KASABOT_*` environment overrides.
    ///
    /// A missing file is not an error: every section has defaults and the
    /// corresponding feature stays disabled until configured.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            log::warn!("Settings file {} not found, using defaults", path.display());
        }

        let mut settings = Figment::new()
            .merge(Yaml::file(path))
            .merge(Env::prefixed("KASABOT_").split("__"))
            .extract::<Settings>()
            .map_err(|e| anyhow::anyhow!("Invalid settings in {}: {}", path.display(), e))?;

        settings.privat24.polling_interval = clamp_polling_interval("privat24", settings.privat24.polling_interval);
        settings.fondy.polling_interval = clamp_polling_interval("fondy", settings.fondy.polling_interval);

        Ok(settings)
    }

    /// Bot token from the environment, falling back to the settings file.
    pub fn bot_token(&self) -> Option<String> {
        BOT_TOKEN
            .clone()
            .or_else(|| self.telegram_bot.token.clone().filter(|t| !t.trim().is_empty()))
    }
}
