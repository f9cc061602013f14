use std::collections::BTreeSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gateway::GradeCatalog;
use crate::recorder::LedgerLayout;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub line: LineConfig,
    pub sheets: SheetsConfig,
    pub grades: Vec<GradeConfig>,
    pub ledger: LedgerConfig,
    pub conversation: ConversationConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct LineConfig {
    pub channel_access_token: SecretString,
    pub channel_secret: SecretString,
    pub api_base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
}

#[derive(Clone, Debug)]
pub struct SheetsConfig {
    pub access_token: SecretString,
    pub api_base_url: String,
    pub read_range: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeConfig {
    pub name: String,
    pub spreadsheet_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LedgerConfig {
    pub name_header: String,
    pub present_marker: String,
    pub leave_marker: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConversationConfig {
    pub idle_timeout_secs: u64,
    pub sweep_interval_secs: u64,
    pub utc_offset_minutes: i32,
    pub max_advance_months: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub log_level: Option<String>,
    pub port: Option<u16>,
    pub line_channel_access_token: Option<String>,
    pub line_channel_secret: Option<String>,
    pub sheets_access_token: Option<String>,
    pub grades: Option<Vec<GradeConfig>>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            line: LineConfig {
                channel_access_token: String::new().into(),
                channel_secret: String::new().into(),
                api_base_url: "https://api.line.me".to_string(),
                timeout_secs: 10,
                max_retries: 2,
            },
            sheets: SheetsConfig {
                access_token: String::new().into(),
                api_base_url: "https://sheets.googleapis.com".to_string(),
                read_range: "A1:Z1000".to_string(),
                timeout_secs: 15,
            },
            grades: ["國中", "先修", "兒美"]
                .into_iter()
                .map(|name| GradeConfig { name: name.to_string(), spreadsheet_id: String::new() })
                .collect(),
            ledger: LedgerConfig {
                name_header: "姓名".to_string(),
                present_marker: "出席".to_string(),
                leave_marker: "請假".to_string(),
            },
            conversation: ConversationConfig {
                idle_timeout_secs: 600,
                sweep_interval_secs: 60,
                utc_offset_minutes: 480,
                max_advance_months: 1,
            },
            server: ServerConfig {
                bind_address: "0.0.0.0".to_string(),
                port: 3000,
                graceful_shutdown_secs: 10,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl ConversationConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}

impl LedgerConfig {
    pub fn layout(&self) -> LedgerLayout {
        LedgerLayout {
            name_header: self.name_header.clone(),
            present_marker: self.present_marker.clone(),
            leave_marker: self.leave_marker.clone(),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("leavedesk.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    pub fn grade_catalog(&self) -> GradeCatalog {
        GradeCatalog::new(self.grades.iter().map(|grade| grade.name.clone()))
    }

    pub fn spreadsheet_id(&self, grade: &str) -> Option<&str> {
        self.grades
            .iter()
            .find(|candidate| candidate.name == grade)
            .map(|candidate| candidate.spreadsheet_id.as_str())
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(line) = patch.line {
            if let Some(channel_access_token) = line.channel_access_token {
                self.line.channel_access_token = secret_value(channel_access_token);
            }
            if let Some(channel_secret) = line.channel_secret {
                self.line.channel_secret = secret_value(channel_secret);
            }
            if let Some(api_base_url) = line.api_base_url {
                self.line.api_base_url = api_base_url;
            }
            if let Some(timeout_secs) = line.timeout_secs {
                self.line.timeout_secs = timeout_secs;
            }
            if let Some(max_retries) = line.max_retries {
                self.line.max_retries = max_retries;
            }
        }

        if let Some(sheets) = patch.sheets {
            if let Some(access_token) = sheets.access_token {
                self.sheets.access_token = secret_value(access_token);
            }
            if let Some(api_base_url) = sheets.api_base_url {
                self.sheets.api_base_url = api_base_url;
            }
            if let Some(read_range) = sheets.read_range {
                self.sheets.read_range = read_range;
            }
            if let Some(timeout_secs) = sheets.timeout_secs {
                self.sheets.timeout_secs = timeout_secs;
            }
        }

        if let Some(grades) = patch.grades {
            self.grades = grades;
        }

        if let Some(ledger) = patch.ledger {
            if let Some(name_header) = ledger.name_header {
                self.ledger.name_header = name_header;
            }
            if let Some(present_marker) = ledger.present_marker {
                self.ledger.present_marker = present_marker;
            }
            if let Some(leave_marker) = ledger.leave_marker {
                self.ledger.leave_marker = leave_marker;
            }
        }

        if let Some(conversation) = patch.conversation {
            if let Some(idle_timeout_secs) = conversation.idle_timeout_secs {
                self.conversation.idle_timeout_secs = idle_timeout_secs;
            }
            if let Some(sweep_interval_secs) = conversation.sweep_interval_secs {
                self.conversation.sweep_interval_secs = sweep_interval_secs;
            }
            if let Some(utc_offset_minutes) = conversation.utc_offset_minutes {
                self.conversation.utc_offset_minutes = utc_offset_minutes;
            }
            if let Some(max_advance_months) = conversation.max_advance_months {
                self.conversation.max_advance_months = max_advance_months;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("LEAVEDESK_LINE_CHANNEL_ACCESS_TOKEN") {
            self.line.channel_access_token = secret_value(value);
        }
        if let Some(value) = read_env("LEAVEDESK_LINE_CHANNEL_SECRET") {
            self.line.channel_secret = secret_value(value);
        }
        if let Some(value) = read_env("LEAVEDESK_LINE_API_BASE_URL") {
            self.line.api_base_url = value;
        }
        if let Some(value) = read_env("LEAVEDESK_LINE_TIMEOUT_SECS") {
            self.line.timeout_secs = parse_u64("LEAVEDESK_LINE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("LEAVEDESK_LINE_MAX_RETRIES") {
            self.line.max_retries = parse_u32("LEAVEDESK_LINE_MAX_RETRIES", &value)?;
        }

        if let Some(value) = read_env("LEAVEDESK_SHEETS_ACCESS_TOKEN") {
            self.sheets.access_token = secret_value(value);
        }
        if let Some(value) = read_env("LEAVEDESK_SHEETS_API_BASE_URL") {
            self.sheets.api_base_url = value;
        }
        if let Some(value) = read_env("LEAVEDESK_SHEETS_READ_RANGE") {
            self.sheets.read_range = value;
        }
        if let Some(value) = read_env("LEAVEDESK_SHEETS_TIMEOUT_SECS") {
            self.sheets.timeout_secs = parse_u64("LEAVEDESK_SHEETS_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEAVEDESK_GRADES") {
            self.grades = parse_grades("LEAVEDESK_GRADES", &value)?;
        }

        if let Some(value) = read_env("LEAVEDESK_LEDGER_NAME_HEADER") {
            self.ledger.name_header = value;
        }
        if let Some(value) = read_env("LEAVEDESK_LEDGER_PRESENT_MARKER") {
            self.ledger.present_marker = value;
        }
        if let Some(value) = read_env("LEAVEDESK_LEDGER_LEAVE_MARKER") {
            self.ledger.leave_marker = value;
        }

        if let Some(value) = read_env("LEAVEDESK_CONVERSATION_IDLE_TIMEOUT_SECS") {
            self.conversation.idle_timeout_secs =
                parse_u64("LEAVEDESK_CONVERSATION_IDLE_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = read_env("LEAVEDESK_CONVERSATION_SWEEP_INTERVAL_SECS") {
            self.conversation.sweep_interval_secs =
                parse_u64("LEAVEDESK_CONVERSATION_SWEEP_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("LEAVEDESK_CONVERSATION_UTC_OFFSET_MINUTES") {
            self.conversation.utc_offset_minutes =
                parse_i32("LEAVEDESK_CONVERSATION_UTC_OFFSET_MINUTES", &value)?;
        }
        if let Some(value) = read_env("LEAVEDESK_CONVERSATION_MAX_ADVANCE_MONTHS") {
            self.conversation.max_advance_months =
                parse_u32("LEAVEDESK_CONVERSATION_MAX_ADVANCE_MONTHS", &value)?;
        }

        if let Some(value) = read_env("LEAVEDESK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        let port = read_env("LEAVEDESK_SERVER_PORT").map(|value| ("LEAVEDESK_SERVER_PORT", value));
        if let Some((key, value)) = port.or_else(|| read_env("PORT").map(|value| ("PORT", value))) {
            self.server.port = parse_u16(key, &value)?;
        }
        if let Some(value) = read_env("LEAVEDESK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("LEAVEDESK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("LEAVEDESK_LOGGING_LEVEL").or_else(|| read_env("LEAVEDESK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("LEAVEDESK_LOGGING_FORMAT").or_else(|| read_env("LEAVEDESK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(channel_access_token) = overrides.line_channel_access_token {
            self.line.channel_access_token = secret_value(channel_access_token);
        }
        if let Some(channel_secret) = overrides.line_channel_secret {
            self.line.channel_secret = secret_value(channel_secret);
        }
        if let Some(access_token) = overrides.sheets_access_token {
            self.sheets.access_token = secret_value(access_token);
        }
        if let Some(grades) = overrides.grades {
            self.grades = grades;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_line(&self.line)?;
        validate_sheets(&self.sheets)?;
        validate_grades(&self.grades)?;
        validate_ledger(&self.ledger)?;
        validate_conversation(&self.conversation)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("leavedesk.toml"), PathBuf::from("config/leavedesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_base_url(key: &str, value: &str) -> Result<(), ConfigError> {
    if value.starts_with("http://") || value.starts_with("https://") {
        Ok(())
    } else {
        Err(ConfigError::Validation(format!("{key} must start with http:// or https://")))
    }
}

fn validate_line(line: &LineConfig) -> Result<(), ConfigError> {
    if line.channel_access_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "line.channel_access_token is required. Issue one in the LINE Developers console > Messaging API > Channel access token".to_string(),
        ));
    }
    if line.channel_secret.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "line.channel_secret is required. Find it in the LINE Developers console > Basic settings > Channel secret".to_string(),
        ));
    }
    validate_base_url("line.api_base_url", &line.api_base_url)?;
    if line.timeout_secs == 0 || line.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "line.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    Ok(())
}

fn validate_sheets(sheets: &SheetsConfig) -> Result<(), ConfigError> {
    if sheets.access_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "sheets.access_token is required (an OAuth bearer token with the spreadsheets scope)"
                .to_string(),
        ));
    }
    validate_base_url("sheets.api_base_url", &sheets.api_base_url)?;
    if sheets.read_range.trim().is_empty() || sheets.read_range.contains('!') {
        return Err(ConfigError::Validation(
            "sheets.read_range must be a bare A1 range such as `A1:Z1000`".to_string(),
        ));
    }
    if sheets.timeout_secs == 0 || sheets.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "sheets.timeout_secs must be in range 1..=300".to_string(),
        ));
    }
    Ok(())
}

fn validate_grades(grades: &[GradeConfig]) -> Result<(), ConfigError> {
    if grades.is_empty() {
        return Err(ConfigError::Validation("at least one grade must be configured".to_string()));
    }

    let mut seen = BTreeSet::new();
    for grade in grades {
        if grade.name.trim().is_empty() {
            return Err(ConfigError::Validation("grade names must not be empty".to_string()));
        }
        if !seen.insert(grade.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "grade `{}` is configured more than once",
                grade.name
            )));
        }
        if grade.spreadsheet_id.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "grade `{}` needs a spreadsheet_id (set it in [[grades]] or LEAVEDESK_GRADES)",
                grade.name
            )));
        }
    }
    Ok(())
}

fn validate_ledger(ledger: &LedgerConfig) -> Result<(), ConfigError> {
    let fields = [
        ("ledger.name_header", &ledger.name_header),
        ("ledger.present_marker", &ledger.present_marker),
        ("ledger.leave_marker", &ledger.leave_marker),
    ];
    match fields.iter().find(|(_, value)| value.trim().is_empty()) {
        Some((key, _)) => Err(ConfigError::Validation(format!("{key} must not be empty"))),
        None => Ok(()),
    }
}

fn validate_conversation(conversation: &ConversationConfig) -> Result<(), ConfigError> {
    if conversation.idle_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "conversation.idle_timeout_secs must be greater than zero".to_string(),
        ));
    }
    if conversation.sweep_interval_secs == 0 {
        return Err(ConfigError::Validation(
            "conversation.sweep_interval_secs must be greater than zero".to_string(),
        ));
    }
    if conversation.utc_offset_minutes.abs() >= 24 * 60 {
        return Err(ConfigError::Validation(
            "conversation.utc_offset_minutes must be within one day of UTC".to_string(),
        ));
    }
    if conversation.max_advance_months == 0 {
        return Err(ConfigError::Validation(
            "conversation.max_advance_months must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn invalid_override(key: &str, value: &str) -> ConfigError {
    ConfigError::InvalidEnvOverride { key: key.to_string(), value: value.to_string() }
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| invalid_override(key, value))
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| invalid_override(key, value))
}

fn parse_i32(key: &str, value: &str) -> Result<i32, ConfigError> {
    value.parse::<i32>().map_err(|_| invalid_override(key, value))
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| invalid_override(key, value))
}

/// `國中=sheet-a,先修=sheet-b`; order is preserved.
fn parse_grades(key: &str, value: &str) -> Result<Vec<GradeConfig>, ConfigError> {
    value
        .split(',')
        .filter(|entry| !entry.trim().is_empty())
        .map(|entry| {
            let (name, spreadsheet_id) =
                entry.split_once('=').ok_or_else(|| invalid_override(key, value))?;
            Ok(GradeConfig {
                name: name.trim().to_string(),
                spreadsheet_id: spreadsheet_id.trim().to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    line: Option<LinePatch>,
    sheets: Option<SheetsPatch>,
    grades: Option<Vec<GradeConfig>>,
    ledger: Option<LedgerPatch>,
    conversation: Option<ConversationPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct LinePatch {
    channel_access_token: Option<String>,
    channel_secret: Option<String>,
    api_base_url: Option<String>,
    timeout_secs: Option<u64>,
    max_retries: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct SheetsPatch {
    access_token: Option<String>,
    api_base_url: Option<String>,
    read_range: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LedgerPatch {
    name_header: Option<String>,
    present_marker: Option<String>,
    leave_marker: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ConversationPatch {
    idle_timeout_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
    utc_offset_minutes: Option<i32>,
    max_advance_months: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
