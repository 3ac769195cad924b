//! Process configuration.
//!
//! Every knob has a default suited to a small deployment and can be overridden
//! through a `CERTMERGE_*` environment variable. Nothing here is reloaded at
//! runtime; the struct is built once in `main` and shared behind an `Arc`.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,

    /// Directory where template files referenced by name are looked up.
    pub templates_dir: PathBuf,
    /// Directory where finalized archives are staged and kept.
    pub artifacts_dir: PathBuf,

    /// Explicit font files for text fields. When unset, `font_family` is
    /// consulted; when that is unset too, the built-in Helvetica faces are
    /// used and nothing is embedded.
    pub font_regular: Option<PathBuf>,
    pub font_bold: Option<PathBuf>,
    /// System font family resolved through fontdb when no explicit files are
    /// configured.
    pub font_family: Option<String>,

    /// Upper bound on rows per generation request.
    pub max_rows: usize,
    /// Rows rendered per batch between cancellation and memory checks.
    pub chunk_size: usize,
    /// Render worker threads.
    pub render_threads: usize,

    /// Soft memory ceiling for the process.
    pub memory_ceiling_mb: usize,
    /// Fraction of the ceiling at which the job loop starts backing off.
    pub memory_watermark: f32,
    /// How many backoff sleeps to tolerate before stopping a run early.
    pub memory_backoff_checks: u32,
    /// Length of one backoff sleep.
    pub memory_backoff: Duration,

    /// Timeout for loading the template or font of a job.
    pub resource_timeout: Duration,
    /// Pause between one job ending and the next queued job starting.
    pub queue_cooldown: Duration,
    /// How long finished archives stay downloadable.
    pub artifact_retention: Duration,
    /// Heartbeat cadence on progress streams.
    pub heartbeat_interval: Duration,
}

impl Config {
    pub fn from_env() -> Self {
        let memory_ceiling_mb = env_parse("CERTMERGE_MEMORY_CEILING_MB", 512);
        // One render thread per ~128 MiB of ceiling, at most 4, at least 1.
        let default_threads = num_cpus::get()
            .min(4)
            .min((memory_ceiling_mb / 128).max(1));

        Self {
            host: env_string("CERTMERGE_HOST", "127.0.0.1"),
            port: env_parse("CERTMERGE_PORT", 8080),
            templates_dir: PathBuf::from(env_string("CERTMERGE_TEMPLATES_DIR", "./templates")),
            artifacts_dir: PathBuf::from(env_string("CERTMERGE_ARTIFACTS_DIR", "./artifacts")),
            font_regular: env_path("CERTMERGE_FONT_REGULAR"),
            font_bold: env_path("CERTMERGE_FONT_BOLD"),
            font_family: std::env::var("CERTMERGE_FONT_FAMILY")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            max_rows: env_parse("CERTMERGE_MAX_ROWS", 5000),
            chunk_size: env_parse("CERTMERGE_CHUNK_SIZE", 8).max(1),
            render_threads: env_parse("CERTMERGE_RENDER_THREADS", default_threads).max(1),
            memory_ceiling_mb,
            memory_watermark: env_parse("CERTMERGE_MEMORY_WATERMARK", 0.85),
            memory_backoff_checks: env_parse("CERTMERGE_MEMORY_BACKOFF_CHECKS", 6),
            memory_backoff: Duration::from_millis(env_parse("CERTMERGE_MEMORY_BACKOFF_MS", 500)),
            resource_timeout: Duration::from_secs(env_parse("CERTMERGE_RESOURCE_TIMEOUT_SECS", 10)),
            queue_cooldown: Duration::from_millis(env_parse("CERTMERGE_QUEUE_COOLDOWN_MS", 2000)),
            artifact_retention: Duration::from_secs(env_parse(
                "CERTMERGE_ARTIFACT_RETENTION_SECS",
                30 * 60,
            )),
            heartbeat_interval: Duration::from_secs(env_parse("CERTMERGE_HEARTBEAT_SECS", 3)),
        }
    }

    /// Retention window as a chrono duration, for computing `expires_at`.
    pub fn retention_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.artifact_retention)
            .unwrap_or_else(|_| chrono::Duration::minutes(30))
    }

    /// Server-side path of a job's finalized archive.
    pub fn artifact_path(&self, job_id: &str) -> PathBuf {
        self.artifacts_dir.join(format!("{job_id}.zip"))
    }
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_path(key: &str) -> Option<PathBuf> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
}

fn env_parse<T: FromStr + Copy>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
