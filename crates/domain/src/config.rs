//! Configuration tree for the MedGate gateway.
//!
//! Loaded from a TOML file with serde defaults for every field, then
//! overridden by the recognized environment knobs.  `Config::validate`
//! returns severity-tagged issues; errors abort startup, warnings are
//! logged and ignored.

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub constraints: ConstraintsConfig,
    #[serde(default)]
    pub caches: CacheConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Apply the recognized environment knobs on top of file values.
    pub fn apply_env(&mut self) {
        if let Some(v) = env_parse::<u64>("BOUNDARY_LOCK_TTL_MS") {
            self.sessions.boundary_lock_ttl_ms = v;
        }
        if let Some(v) = env_parse::<u64>("CLINIC_CACHE_WARM_TTL_SECONDS") {
            self.caches.clinic_warm_ttl_seconds = v;
        }
        if let Some(v) = env_parse::<u64>("PATIENT_UPSERT_CACHE_SECONDS") {
            self.caches.patient_upsert_cache_seconds = v;
        }
        if let Ok(v) = std::env::var("ENABLE_PIPELINE") {
            self.pipeline.enabled = is_truthy(&v);
        }
        if let Ok(v) = std::env::var("CONVERSATION_LOG_FAIL_FAST") {
            self.logging.conversation_log_fail_fast = is_truthy(&v);
        }
    }

    /// Validate the configuration, accumulating every issue found.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.server.port == 0 {
            issues.push(ConfigIssue::error("server.port must be non-zero"));
        }
        if self.transport.base_url.is_empty() {
            issues.push(ConfigIssue::warning(
                "transport.base_url is empty — outbound replies will be dropped",
            ));
        }
        if self.sessions.boundary_lock_ttl_ms < 500 {
            issues.push(ConfigIssue::warning(
                "sessions.boundary_lock_ttl_ms below 500ms invites lock expiry mid-boundary",
            ));
        }
        if self.llm.max_tool_turns == 0 {
            issues.push(ConfigIssue::error("llm.max_tool_turns must be at least 1"));
        }
        if self.llm.tool_loop_deadline_secs == 0 || self.llm.fallback_deadline_secs == 0 {
            issues.push(ConfigIssue::error("llm deadlines must be non-zero"));
        }
        if self.tools.per_turn_budget == 0 {
            issues.push(ConfigIssue::error("tools.per_turn_budget must be at least 1"));
        }

        issues
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn is_truthy(v: &str) -> bool {
    matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sections
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_port")]
    pub port: u16,
    #[serde(default = "d_host")]
    pub host: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: d_port(),
            host: d_host(),
        }
    }
}

/// Outbound messaging transport (Evolution-style HTTP API).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    #[serde(default)]
    pub base_url: String,
    /// Clinic used when an instance name does not carry an embedded id.
    #[serde(default = "d_default_clinic")]
    pub default_clinic_id: String,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            default_clinic_id: d_default_clinic(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// TTL for the fast-path session record in KV.
    #[serde(default = "d_session_ttl_secs")]
    pub session_ttl_secs: u64,
    /// Boundary lock TTL (env: BOUNDARY_LOCK_TTL_MS).
    #[serde(default = "d_lock_ttl_ms")]
    pub boundary_lock_ttl_ms: u64,
    /// Max jittered acquire retries before giving up.
    #[serde(default = "d_lock_retries")]
    pub boundary_lock_retries: u32,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: d_session_ttl_secs(),
            boundary_lock_ttl_ms: d_lock_ttl_ms(),
            boundary_lock_retries: d_lock_retries(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintsConfig {
    /// TTL of the per-session constraint block (mirrors the session TTL).
    #[serde(default = "d_constraints_ttl_secs")]
    pub ttl_secs: u64,
}

impl Default for ConstraintsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: d_constraints_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Warm TTL for clinic profiles (env: CLINIC_CACHE_WARM_TTL_SECONDS).
    #[serde(default = "d_clinic_warm_ttl")]
    pub clinic_warm_ttl_seconds: u64,
    /// Patient upsert dedupe window (env: PATIENT_UPSERT_CACHE_SECONDS).
    #[serde(default = "d_patient_upsert_ttl")]
    pub patient_upsert_cache_seconds: u64,
    /// Language detection cache TTL, in days.
    #[serde(default = "d_language_ttl_days")]
    pub language_cache_ttl_days: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            clinic_warm_ttl_seconds: d_clinic_warm_ttl(),
            patient_upsert_cache_seconds: d_patient_upsert_ttl(),
            language_cache_ttl_days: d_language_ttl_days(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Combined deadline for the tool-calling loop.
    #[serde(default = "d_tool_loop_deadline")]
    pub tool_loop_deadline_secs: u64,
    /// Deadline for the single-shot fallback generate.
    #[serde(default = "d_fallback_deadline")]
    pub fallback_deadline_secs: u64,
    /// Maximum tool-calling loop turns.
    #[serde(default = "d_max_tool_turns")]
    pub max_tool_turns: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            tool_loop_deadline_secs: d_tool_loop_deadline(),
            fallback_deadline_secs: d_fallback_deadline(),
            max_tool_turns: d_max_tool_turns(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Per-turn tool call budget.
    #[serde(default = "d_tool_budget")]
    pub per_turn_budget: u32,
    /// External calendar calls allowed per request.
    #[serde(default = "d_calendar_budget")]
    pub calendar_call_budget: u32,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            per_turn_budget: d_tool_budget(),
            calendar_call_budget: d_calendar_budget(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PipelineConfig {
    /// Feature flag selecting the step pipeline vs the legacy path
    /// (env: ENABLE_PIPELINE). The legacy path is gone; the flag is kept
    /// so operators flipping it off get a loud startup warning instead of
    /// silently different behavior.
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct LoggingConfig {
    /// When true, conversation-log write failures abort the request
    /// (env: CONVERSATION_LOG_FAIL_FAST).
    #[serde(default)]
    pub conversation_log_fail_fast: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation issues
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub message: String,
}

impl ConfigIssue {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            message: message.into(),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_port() -> u16 {
    8080
}
fn d_host() -> String {
    "127.0.0.1".into()
}
fn d_default_clinic() -> String {
    "00000000-0000-0000-0000-000000000000".into()
}
fn d_session_ttl_secs() -> u64 {
    86_400 * 14
}
fn d_lock_ttl_ms() -> u64 {
    5_000
}
fn d_lock_retries() -> u32 {
    8
}
fn d_constraints_ttl_secs() -> u64 {
    3_600
}
fn d_clinic_warm_ttl() -> u64 {
    300
}
fn d_patient_upsert_ttl() -> u64 {
    60
}
fn d_language_ttl_days() -> u64 {
    30
}
fn d_tool_loop_deadline() -> u64 {
    20
}
fn d_fallback_deadline() -> u64 {
    10
}
fn d_max_tool_turns() -> u32 {
    5
}
fn d_tool_budget() -> u32 {
    6
}
fn d_calendar_budget() -> u32 {
    3
}
