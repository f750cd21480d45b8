use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

pub const CONFIG_FILE_NAME: &str = "ooxml-translator.toml";
pub const CONFIG_ENV: &str = "OOXML_TRANSLATOR_CONFIG";
pub const API_KEY_ENVS: [&str; 2] = ["OOXML_TRANSLATOR_API_KEY", "OPENAI_API_KEY"];

#[derive(Clone, Debug, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub llm: LlmSection,
    #[serde(default)]
    pub client: ClientSection,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct LlmSection {
    /// OpenAI-compatible API root, e.g. `https://api.openai.com/v1`.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Left empty to read it from the environment.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    /// System prompt sent with every fragment.
    #[serde(default)]
    pub prompt: Option<String>,
}

#[derive(Clone, Debug, Deserialize, Default)]
pub struct ClientSection {
    #[serde(default)]
    pub max_concurrent_requests: Option<usize>,
    #[serde(default)]
    pub only_translate_cjk: Option<bool>,
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    /// How long a cancelled batch waits for in-flight requests.
    #[serde(default)]
    pub cancel_grace_ms: Option<u64>,
    /// Copy a part through untranslated when its batch hits an engine failure.
    #[serde(default)]
    pub continue_on_engine_failure: Option<bool>,
    /// Process workbooks as sheet names, then cells, then shapes.
    #[serde(default)]
    pub workbook_phases: Option<bool>,
}

/// Walks up from `start_dir` looking for `filename`, checking at most `max_levels` directories.
pub fn find_file_upwards(start_dir: &Path, filename: &str, max_levels: usize) -> Option<PathBuf> {
    let mut dir = Some(start_dir);
    for _ in 0..max_levels {
        let d = dir?;
        let cand = d.join(filename);
        if cand.is_file() {
            return Some(cand);
        }
        dir = d.parent();
    }
    None
}

pub fn find_default_config(workdir: &Path, filename: &str) -> Option<PathBuf> {
    if let Ok(cwd) = std::env::current_dir() {
        if let Some(p) = find_file_upwards(&cwd, filename, 8) {
            return Some(p);
        }
    }
    if let Some(p) = find_file_upwards(workdir, filename, 8) {
        return Some(p);
    }
    if let Ok(exe) = std::env::current_exe() {
        if let Some(dir) = exe.parent() {
            if let Some(p) = find_file_upwards(dir, filename, 10) {
                return Some(p);
            }
        }
    }
    None
}

/// `--config`, then `$OOXML_TRANSLATOR_CONFIG`, then an upward search.
pub fn locate_config(explicit: Option<PathBuf>, workdir: &Path) -> Option<PathBuf> {
    explicit
        .or_else(|| std::env::var(CONFIG_ENV).ok().map(PathBuf::from))
        .or_else(|| find_default_config(workdir, CONFIG_FILE_NAME))
}

pub fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("read config: {}", path.display()))?;
    parse_config(&text)
}

pub fn parse_config(text: &str) -> anyhow::Result<AppConfig> {
    toml::from_str(text).context("parse config toml")
}

pub fn api_key_from_env() -> Option<String> {
    API_KEY_ENVS
        .iter()
        .filter_map(|name| std::env::var(name).ok())
        .map(|v| v.trim().to_string())
        .find(|v| !v.is_empty())
}
