use std::path::PathBuf;

use anyhow::{Result, bail};

pub const DEFAULT_DUST_BASE_URL: &str = "https://dust.tt/api/v1";
pub const DEFAULT_VAT_CHECK_URL: &str = "https://api.vatcomply.com/vat";
pub const DEFAULT_AGENT_ID: &str = "gemini-pro";
pub const DEFAULT_PLATFORM_ID: &str = "invoiceapp";

/// Environment-driven configuration, loaded once per process.
///
/// Every external credential is optional here; commands that need one fail
/// with a readable message instead of panicking at load time.
#[derive(Debug, Clone)]
pub struct EnvConfig {
    pub supabase_url: Option<String>,
    service_role_key: Option<String>,
    anon_key: Option<String>,
    legacy_key: Option<String>,

    pub gemini_api_key: Option<String>,
    pub gemini_model: String,

    pub dust_api_key: Option<String>,
    pub dust_workspace_id: Option<String>,
    pub dust_base_url: String,

    pub worker_url: Option<String>,
    pub app_base_url: String,
    pub vat_check_api_url: String,

    pub artifact_dir: PathBuf,
    pub runs_dir: PathBuf,
    pub auth_dir: PathBuf,
}

fn clean_env(name: &str) -> Option<String> {
    let value = std::env::var(name).ok()?;
    let value = value.trim().to_string();
    if value.is_empty() { None } else { Some(value) }
}

fn looks_like_jwt(value: &str) -> bool {
    value.starts_with("eyJ") || value.matches('.').count() == 2
}

fn looks_like_pat(value: &str) -> bool {
    value.starts_with("sbp_")
}

/// Walk up from the working directory looking for a `.env` file, so the CLI
/// behaves the same from the repo root and from sandbox subdirectories.
pub fn load_env_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;
    for _ in 0..5 {
        let candidate = current.join(".env");
        if candidate.exists() {
            let _ = dotenvy::from_path(&candidate);
            return Some(candidate);
        }
        if !current.pop() {
            break;
        }
    }
    None
}

impl EnvConfig {
    pub fn load() -> Self {
        load_env_file();

        let gemini_api_key = clean_env("GEMINI_API_KEY").or_else(|| clean_env("GOOGLE_API_KEY"));

        Self {
            supabase_url: clean_env("SUPABASE_URL").map(|u| u.trim_end_matches('/').to_string()),
            service_role_key: clean_env("SUPABASE_SERVICE_ROLE_KEY"),
            anon_key: clean_env("SUPABASE_ANON_KEY"),
            legacy_key: clean_env("SUPABASE_API_KEY"),
            gemini_api_key,
            gemini_model: clean_env("GEMINI_MODEL")
                .unwrap_or_else(|| "gemini-2.5-flash".to_string()),
            dust_api_key: clean_env("DUST_API_KEY"),
            dust_workspace_id: clean_env("DUST_WORKSPACE_ID"),
            dust_base_url: clean_env("DUST_BASE_URL")
                .unwrap_or_else(|| DEFAULT_DUST_BASE_URL.to_string()),
            worker_url: clean_env("WORKER_URL").map(|u| u.trim_end_matches('/').to_string()),
            app_base_url: clean_env("INVOICE_APP_URL")
                .unwrap_or_else(|| "https://app.invoicehub.example".to_string()),
            vat_check_api_url: clean_env("VAT_CHECK_API_URL")
                .unwrap_or_else(|| DEFAULT_VAT_CHECK_URL.to_string()),
            artifact_dir: clean_env("ARTIFACT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".state/artifacts")),
            runs_dir: clean_env("RUNS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".state/runs")),
            auth_dir: clean_env("AUTH_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(".state/auth")),
        }
    }

    /// Key for PostgREST/storage calls.
    /// Priority: service role > anon > legacy key (JWT shape only — a
    /// personal access token must never be sent as a REST key).
    pub fn rest_key(&self) -> Option<String> {
        if let Some(key) = &self.service_role_key {
            return Some(key.clone());
        }
        if let Some(key) = &self.anon_key {
            return Some(key.clone());
        }
        if let Some(key) = &self.legacy_key
            && looks_like_jwt(key)
            && !looks_like_pat(key)
        {
            return Some(key.clone());
        }
        None
    }

    /// Backend (url, key) pair, or a readable error naming what is missing.
    pub fn require_backend(&self) -> Result<(String, String)> {
        match (&self.supabase_url, self.rest_key()) {
            (Some(url), Some(key)) => Ok((url.clone(), key)),
            _ => bail!(
                "missing SUPABASE_URL or Supabase REST key \
                 (SUPABASE_SERVICE_ROLE_KEY / SUPABASE_ANON_KEY)"
            ),
        }
    }

    pub fn evals_dir(&self) -> PathBuf {
        self.runs_dir.join("evals")
    }

    pub fn schedules_dir(&self) -> PathBuf {
        self.runs_dir.join("schedules")
    }

    pub fn benchmarks_dir(&self) -> PathBuf {
        PathBuf::from(".state/benchmarks")
    }

    pub fn swarm_dir(&self) -> PathBuf {
        PathBuf::from(".state/swarm")
    }

    #[cfg(test)]
    pub fn for_tests() -> Self {
        Self {
            supabase_url: None,
            service_role_key: None,
            anon_key: None,
            legacy_key: None,
            gemini_api_key: None,
            gemini_model: "gemini-2.5-flash".to_string(),
            dust_api_key: None,
            dust_workspace_id: None,
            dust_base_url: DEFAULT_DUST_BASE_URL.to_string(),
            worker_url: None,
            app_base_url: "https://app.invoicehub.example".to_string(),
            vat_check_api_url: DEFAULT_VAT_CHECK_URL.to_string(),
            artifact_dir: PathBuf::from(".state/artifacts"),
            runs_dir: PathBuf::from(".state/runs"),
            auth_dir: PathBuf::from(".state/auth"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_with_keys(
        service: Option<&str>,
        anon: Option<&str>,
        legacy: Option<&str>,
    ) -> EnvConfig {
        let mut cfg = EnvConfig::for_tests();
        cfg.service_role_key = service.map(String::from);
        cfg.anon_key = anon.map(String::from);
        cfg.legacy_key = legacy.map(String::from);
        cfg
    }

    #[test]
    fn rest_key_prefers_service_role_over_anon() {
        let cfg = config_with_keys(Some("service"), Some("anon"), None);
        assert_eq!(cfg.rest_key().as_deref(), Some("service"));
    }

    #[test]
    fn rest_key_accepts_legacy_jwt_shape() {
        let cfg = config_with_keys(None, None, Some("eyJhbGciOiJIUzI1NiJ9.payload.sig"));
        assert_eq!(
            cfg.rest_key().as_deref(),
            Some("eyJhbGciOiJIUzI1NiJ9.payload.sig")
        );
    }

    #[test]
    fn rest_key_rejects_legacy_personal_access_token() {
        let cfg = config_with_keys(None, None, Some("sbp_0123456789abcdef"));
        assert_eq!(cfg.rest_key(), None);
    }

    #[test]
    fn require_backend_reports_missing_credentials() {
        let cfg = EnvConfig::for_tests();
        let err = cfg.require_backend().unwrap_err().to_string();
        assert!(err.contains("SUPABASE_URL"));
    }
}
