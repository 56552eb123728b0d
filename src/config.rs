pub const DEFAULT_MODEL: &str = "gpt-4o";
pub const DEFAULT_TEMPERATURE: f32 = 0.7;
pub const DEFAULT_MAX_TOKENS: u32 = 800;

pub const DEFAULT_BACKEND_URL: &str = "http://localhost:8000";
pub const DEFAULT_COMPLETION_PATH: &str = "/api/ai/completion";
pub const DEFAULT_HEALTH_PATH: &str = "/api/health";
pub const DEFAULT_OLLAMA_HOST: &str = "http://localhost:11434";

/// Transport timeout for a single completion call when nothing else is configured.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const MAX_ATTEMPTS_CAP: u32 = 5;

/// Upper bound on the diagnostic snippet carried by interpretation errors.
pub const SNIPPET_LIMIT: usize = 280;

pub const HEALTH_TIMEOUT_SECS: u64 = 3;
pub const HEALTH_INTERVAL_SECS: u64 = 30;

pub const DEFAULT_BATCH_SIZE: f64 = 100.0;
pub const DEFAULT_UNIT: &str = "kg";

/// Clamp a requested attempt count into `1..=MAX_ATTEMPTS_CAP`.
pub fn clamp_attempts(requested: u32) -> u32 {
    requested.clamp(1, MAX_ATTEMPTS_CAP)
}
