use std::path::Path;
use std::time::Duration;

use veriface_core::Policy;

use crate::engine::ServiceError;

/// Engine configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Decision thresholds (defaults, optionally replaced by a TOML file).
    pub policy: Policy,
    /// Deadline for a single liveness or match request.
    pub request_timeout: Duration,
    /// Maximum number of concurrently open sessions.
    pub max_sessions: usize,
    /// Sessions older than this are pruned when new ones are opened.
    pub session_ttl: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            policy: Policy::default(),
            request_timeout: Duration::from_secs(30),
            max_sessions: 64,
            session_ttl: Duration::from_secs(300),
        }
    }
}

impl Config {
    /// Load configuration from `VERIFACE_*` environment variables with defaults.
    pub fn from_env() -> Result<Self, ServiceError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build a configuration from an arbitrary key lookup.
    ///
    /// `VERIFACE_POLICY_FILE` is applied first; the individual threshold
    /// variables then override values from the file.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ServiceError> {
        let mut policy = match lookup("VERIFACE_POLICY_FILE") {
            Some(path) => load_policy(Path::new(&path))?,
            None => Policy::default(),
        };

        let m = &mut policy.matching;
        m.structural_threshold =
            parse_or(&lookup, "VERIFACE_FACE_MATCH_THRESHOLD", m.structural_threshold);
        m.distance_threshold =
            parse_or(&lookup, "VERIFACE_FACE_DISTANCE_THRESHOLD", m.distance_threshold);
        policy.liveness.blink_threshold = parse_or(
            &lookup,
            "VERIFACE_BLINK_THRESHOLD",
            policy.liveness.blink_threshold,
        );
        policy.validate()?;

        let defaults = Self::default();
        let config = Self {
            policy,
            request_timeout: Duration::from_secs(parse_or(
                &lookup,
                "VERIFACE_TIMEOUT_SECS",
                defaults.request_timeout.as_secs(),
            )),
            max_sessions: parse_or(&lookup, "VERIFACE_MAX_SESSIONS", defaults.max_sessions),
            session_ttl: Duration::from_secs(parse_or(
                &lookup,
                "VERIFACE_SESSION_TTL_SECS",
                defaults.session_ttl.as_secs(),
            )),
        };
        config.validate()?;
        Ok(config)
    }

    /// A zero deadline times out every request and a zero session limit
    /// refuses every session.
    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.request_timeout.is_zero() {
            return Err(ServiceError::InvalidConfig(
                "VERIFACE_TIMEOUT_SECS must be at least 1".into(),
            ));
        }
        if self.max_sessions == 0 {
            return Err(ServiceError::InvalidConfig(
                "VERIFACE_MAX_SESSIONS must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Wrap `lookup` so `VERIFACE_POLICY_FILE` resolves to `path` when one is
/// given, e.g. from a command-line flag. The threshold variables still
/// override values from that file.
pub fn with_policy_file<'a>(
    path: Option<&'a Path>,
    lookup: impl Fn(&str) -> Option<String> + 'a,
) -> impl Fn(&str) -> Option<String> + 'a {
    move |key: &str| match path {
        Some(path) if key == "VERIFACE_POLICY_FILE" => Some(path.to_string_lossy().into_owned()),
        _ => lookup(key),
    }
}

/// Read and validate a TOML policy file.
pub fn load_policy(path: &Path) -> Result<Policy, ServiceError> {
    let text = std::fs::read_to_string(path).map_err(|source| ServiceError::PolicyFile {
        path: path.to_path_buf(),
        source,
    })?;
    let policy = Policy::from_toml(&text)?;
    tracing::info!(path = %path.display(), "policy loaded");
    Ok(policy)
}

fn parse_or<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> T {
    lookup(key)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
