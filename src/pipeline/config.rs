use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;

use crate::config::{api_key_from_env, load_config, locate_config, AppConfig, CONFIG_FILE_NAME};
use crate::engine::{EngineSettings, RetryPolicy};

pub const DEFAULT_BASE_URL: &str = "https://dashscope.aliyuncs.com/compatible-mode/v1";
pub const DEFAULT_MODEL: &str = "qwen-flash";
pub const DEFAULT_PROMPT: &str = "You are a professional translator. Translate the user's text into \
the target language directly. Keep all numbers, letters and symbols unchanged. Output only the \
translation, with no explanations.";

/// Settings the translation core runs with. Built once by the front end; the core never reads
/// files or the environment itself.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub prompt: String,

    pub max_concurrent_requests: usize,
    pub only_translate_cjk: bool,
    pub request_timeout: Duration,
    pub max_attempts: u32,
    pub retry_delay: Duration,
    pub cancel_grace: Duration,

    pub continue_on_engine_failure: bool,
    pub workbook_phases: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            prompt: DEFAULT_PROMPT.to_string(),
            max_concurrent_requests: 5,
            only_translate_cjk: true,
            request_timeout: Duration::from_secs(60),
            max_attempts: 3,
            retry_delay: Duration::from_millis(200),
            cancel_grace: Duration::from_millis(2000),
            continue_on_engine_failure: false,
            workbook_phases: false,
        }
    }
}

/// Command-line values that win over the file.
#[derive(Clone, Debug, Default)]
pub struct Overrides {
    pub model: Option<String>,
    pub base_url: Option<String>,
    pub concurrency: Option<usize>,
    pub all_text: bool,
    pub continue_on_engine_failure: bool,
    pub workbook_phases: bool,
}

impl PipelineConfig {
    /// Merges a parsed file (may be all-`None`) with defaults. Never reads the environment.
    pub fn from_app_config(file_cfg: &AppConfig) -> Self {
        let d = Self::default();
        let llm = &file_cfg.llm;
        let client = &file_cfg.client;
        let non_empty = |v: &Option<String>| {
            v.as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Self {
            base_url: non_empty(&llm.base_url).unwrap_or(d.base_url),
            api_key: non_empty(&llm.api_key).unwrap_or_default(),
            model: non_empty(&llm.model).unwrap_or(d.model),
            prompt: non_empty(&llm.prompt).unwrap_or(d.prompt),
            max_concurrent_requests: client
                .max_concurrent_requests
                .filter(|n| *n > 0)
                .unwrap_or(d.max_concurrent_requests),
            only_translate_cjk: client.only_translate_cjk.unwrap_or(d.only_translate_cjk),
            request_timeout: client
                .request_timeout_secs
                .filter(|n| *n > 0)
                .map(Duration::from_secs)
                .unwrap_or(d.request_timeout),
            max_attempts: client
                .max_attempts
                .filter(|n| *n > 0)
                .unwrap_or(d.max_attempts),
            retry_delay: client
                .retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(d.retry_delay),
            cancel_grace: client
                .cancel_grace_ms
                .map(Duration::from_millis)
                .unwrap_or(d.cancel_grace),
            continue_on_engine_failure: client
                .continue_on_engine_failure
                .unwrap_or(d.continue_on_engine_failure),
            workbook_phases: client.workbook_phases.unwrap_or(d.workbook_phases),
        }
    }

    pub fn apply_overrides(&mut self, o: &Overrides) {
        if let Some(m) = o.model.as_ref().filter(|s| !s.trim().is_empty()) {
            self.model = m.trim().to_string();
        }
        if let Some(u) = o.base_url.as_ref().filter(|s| !s.trim().is_empty()) {
            self.base_url = u.trim().to_string();
        }
        if let Some(n) = o.concurrency.filter(|n| *n > 0) {
            self.max_concurrent_requests = n;
        }
        if o.all_text {
            self.only_translate_cjk = false;
        }
        if o.continue_on_engine_failure {
            self.continue_on_engine_failure = true;
        }
        if o.workbook_phases {
            self.workbook_phases = true;
        }
    }

    /// Resolves the config file next to `input` (see [`locate_config`]) and applies `overrides`.
    /// An API key missing from the file is taken from the environment. Returns the settings and
    /// the file they came from, if any.
    pub fn from_paths_and_args(
        input: &Path,
        config_path: Option<PathBuf>,
        overrides: &Overrides,
    ) -> anyhow::Result<(Self, Option<PathBuf>)> {
        let workdir = input
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));

        let explicit = config_path.is_some();
        let cfg_file = locate_config(config_path, &workdir);
        let mut file_cfg = AppConfig::default();
        let mut used = None;
        if let Some(p) = cfg_file {
            if p.exists() {
                file_cfg = load_config(&p)?;
                used = Some(p);
            } else if explicit {
                anyhow::bail!("config file not found: {}", p.display());
            }
        }

        let mut cfg = Self::from_app_config(&file_cfg);
        if cfg.api_key.is_empty() {
            cfg.api_key = api_key_from_env().unwrap_or_default();
        }
        cfg.apply_overrides(overrides);
        Ok((cfg, used))
    }

    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            prompt: self.prompt.clone(),
            cjk_only: self.only_translate_cjk,
            request_timeout: self.request_timeout,
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                delay: self.retry_delay,
            },
        }
    }
}

pub fn init_default_config(dir: &Path, force: bool) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("create config dir: {}", dir.display()))?;
    let cfg_path = dir.join(CONFIG_FILE_NAME);
    if cfg_path.exists() && !force {
        return Ok(cfg_path);
    }

    let cfg_text = format!(
        r#"[llm]
# Any OpenAI-compatible chat-completions endpoint.
base_url = "{DEFAULT_BASE_URL}"
# Leave empty to use $OOXML_TRANSLATOR_API_KEY or $OPENAI_API_KEY.
api_key = ""
model = "{DEFAULT_MODEL}"
prompt = "{prompt}"

[client]
max_concurrent_requests = 5
# Only send text containing Chinese, Japanese or Korean characters.
only_translate_cjk = true
request_timeout_secs = 60
max_attempts = 3
# Linear backoff: retry_delay_ms * attempt.
retry_delay_ms = 200
cancel_grace_ms = 2000
# Copy a part through untranslated instead of failing the document.
continue_on_engine_failure = false
# Workbooks: sheet names, then cells, then shapes.
workbook_phases = false
"#,
        prompt = DEFAULT_PROMPT.replace('\\', "\\\\").replace('"', "\\\"")
    );

    std::fs::write(&cfg_path, cfg_text)
        .with_context(|| format!("write config: {}", cfg_path.display()))?;
    Ok(cfg_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::parse_config;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = PipelineConfig::default();
        assert_eq!(cfg.max_concurrent_requests, 5);
        assert!(cfg.only_translate_cjk);
        assert_eq!(cfg.max_attempts, 3);
        assert_eq!(cfg.cancel_grace, Duration::from_millis(2000));
        assert!(!cfg.continue_on_engine_failure);
    }

    #[test]
    fn file_values_then_overrides() {
        let file = parse_config(
            r#"
[llm]
base_url = "http://localhost:11434/v1"
api_key = "sk-file"
model = "file-model"

[client]
max_concurrent_requests = 2
only_translate_cjk = true
"#,
        )
        .expect("parse");
        let mut cfg = PipelineConfig::from_app_config(&file);
        assert_eq!(cfg.base_url, "http://localhost:11434/v1");
        assert_eq!(cfg.api_key, "sk-file");
        assert_eq!(cfg.max_concurrent_requests, 2);
        assert_eq!(cfg.prompt, DEFAULT_PROMPT);

        cfg.apply_overrides(&Overrides {
            model: Some("cli-model".into()),
            concurrency: Some(9),
            all_text: true,
            ..Default::default()
        });
        assert_eq!(cfg.model, "cli-model");
        assert_eq!(cfg.max_concurrent_requests, 9);
        assert!(!cfg.only_translate_cjk);
        assert_eq!(cfg.base_url, "http://localhost:11434/v1");
    }

    #[test]
    fn zero_concurrency_keeps_default() {
        let file = parse_config("[client]\nmax_concurrent_requests = 0\n").expect("parse");
        assert_eq!(PipelineConfig::from_app_config(&file).max_concurrent_requests, 5);
    }

    #[test]
    fn written_default_config_parses_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = init_default_config(dir.path(), false).expect("init");
        let text = std::fs::read_to_string(&path).expect("read");
        let parsed = parse_config(&text).expect("parse");
        assert_eq!(parsed.llm.prompt.as_deref(), Some(DEFAULT_PROMPT));
        assert_eq!(parsed.client.max_concurrent_requests, Some(5));

        std::fs::write(&path, "# edited").expect("edit");
        init_default_config(dir.path(), false).expect("init again");
        assert_eq!(std::fs::read_to_string(&path).expect("read"), "# edited");
        init_default_config(dir.path(), true).expect("force");
        assert_ne!(std::fs::read_to_string(&path).expect("read"), "# edited");
    }

    #[test]
    fn env_api_key_is_only_read_by_path_resolution() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cfg_path = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&cfg_path, "[llm]\nmodel = \"m\"\n").expect("write");
        std::env::set_var("OOXML_TRANSLATOR_API_KEY", "sk-env");

        let file = load_config(&cfg_path).expect("load");
        assert_eq!(PipelineConfig::from_app_config(&file).api_key, "");

        let (cfg, used) = PipelineConfig::from_paths_and_args(
            &dir.path().join("book.xlsx"),
            Some(cfg_path.clone()),
            &Overrides::default(),
        )
        .expect("resolve");
        std::env::remove_var("OOXML_TRANSLATOR_API_KEY");
        assert_eq!(used, Some(cfg_path));
        assert_eq!(cfg.api_key, "sk-env");
        assert_eq!(cfg.model, "m");
    }

    #[test]
    fn explicit_missing_config_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = dir.path().join("book.xlsx");
        let err = PipelineConfig::from_paths_and_args(
            &input,
            Some(dir.path().join("missing.toml")),
            &Overrides::default(),
        )
        .err()
        .expect("must fail");
        assert!(err.to_string().contains("config file not found"));
    }
}
