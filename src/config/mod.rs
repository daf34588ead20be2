use std::{
    collections::HashMap,
    env, fs,
    io::{BufRead, BufReader},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use directories::BaseDirs;

use crate::sandbox::venv_interpreter;

#[derive(Debug, Clone)]
pub struct Config {
    inner: HashMap<String, String>,
    pub config_path: PathBuf,
}

impl Config {
    pub fn load() -> Self {
        let mut map = default_map();
        let config_path = default_config_path();

        // Read .arcrc if exists
        if config_path.exists() {
            if let Ok(file) = fs::File::open(&config_path) {
                merge_key_values(&mut map, BufReader::new(file));
            }
        }

        // .env in the working directory, then the real environment on top
        if let Ok(iter) = dotenvy::dotenv_iter() {
            for (k, v) in iter.flatten() {
                if is_config_key(&k) {
                    map.insert(k, v);
                }
            }
        }
        for (k, v) in env::vars() {
            if is_config_key(&k) {
                map.insert(k, v);
            }
        }

        Self { inner: map, config_path }
    }

    /// Defaults overlaid with `pairs` only; ignores files and the environment.
    pub fn from_pairs<K, V>(pairs: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut inner = default_map();
        for (k, v) in pairs {
            inner.insert(k.into(), v.into());
        }
        Self {
            inner,
            config_path: default_config_path(),
        }
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.inner.get(key).filter(|v| !v.is_empty()).cloned()
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false)
    }

    pub fn get_u64(&self, key: &str) -> Result<Option<u64>> {
        self.get(key)
            .map(|v| {
                v.trim()
                    .parse::<u64>()
                    .with_context(|| format!("{key} must be a non-negative integer, got {v:?}"))
            })
            .transpose()
    }

    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).map(PathBuf::from)
    }
}

fn merge_key_values(map: &mut HashMap<String, String>, reader: impl BufRead) {
    for line in reader.lines().map_while(|l| l.ok()) {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((k, v)) = line.split_once('=') {
            map.insert(k.trim().to_string(), v.trim().to_string());
        }
    }
}

fn is_config_key(k: &str) -> bool {
    const KEYS: &[&str] = &[
        "OPENAI_API_KEY",
        "API_BASE_URL",
        "DEFAULT_MODEL",
        "REQUEST_TIMEOUT",
        "MAX_TOKENS",
        "CODES_DIR",
        "OUTPUTS_DIR",
        "INPUTS_DIR",
        "CODE_BASE_NAME",
        "PYTHON_INTERPRETER",
        "VIRTUAL_ENV",
        "SYNTHESIS_TIMEOUT",
        "EXECUTION_TIMEOUT",
        "SYNTHESIS_RETRIES",
        "ISOLATE_REQUESTS",
        "PRETTIFY_MARKDOWN",
    ];

    KEYS.contains(&k) || k.starts_with("ARC_")
}

fn default_config_path() -> PathBuf {
    let base = BaseDirs::new()
        .map(|b| b.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("~/.config"));
    base.join("arc_analysis").join(".arcrc")
}

fn default_map() -> HashMap<String, String> {
    let mut m = HashMap::new();
    // Paths, relative to the working directory
    m.insert("CODES_DIR".into(), "codes".into());
    m.insert("OUTPUTS_DIR".into(), "outputs".into());
    m.insert("INPUTS_DIR".into(), "inputs".into());

    // Numbers (seconds unless noted)
    m.insert("REQUEST_TIMEOUT".into(), "60".into());
    m.insert("SYNTHESIS_TIMEOUT".into(), "120".into());
    m.insert("EXECUTION_TIMEOUT".into(), "300".into());
    m.insert("SYNTHESIS_RETRIES".into(), "1".into());
    m.insert("MAX_TOKENS".into(), "2048".into());

    // Strings
    m.insert("DEFAULT_MODEL".into(), "gpt-4o".into());
    m.insert("API_BASE_URL".into(), "default".into());
    m.insert("CODE_BASE_NAME".into(), "code".into());

    // Bools as strings
    m.insert("ISOLATE_REQUESTS".into(), "true".into());
    m.insert("PRETTIFY_MARKDOWN".into(), "true".into());

    m
}

/// Immutable pipeline settings, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub codes_dir: PathBuf,
    pub outputs_dir: PathBuf,
    pub inputs_dir: PathBuf,
    pub code_base_name: String,
    /// Candidate interpreter; validated when the sandbox is built.
    pub interpreter: Option<PathBuf>,
    pub synthesis_timeout: Duration,
    pub execution_timeout: Duration,
    /// Extra attempts after a failed generation call. At most 1.
    pub synthesis_retries: u32,
    /// Give every request its own output/input subdirectory.
    pub isolate_requests: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            codes_dir: PathBuf::from("codes"),
            outputs_dir: PathBuf::from("outputs"),
            inputs_dir: PathBuf::from("inputs"),
            code_base_name: "code".into(),
            interpreter: None,
            synthesis_timeout: Duration::from_secs(120),
            execution_timeout: Duration::from_secs(300),
            synthesis_retries: 1,
            isolate_requests: true,
        }
    }
}

impl Settings {
    pub fn from_config(cfg: &Config) -> Result<Self> {
        let defaults = Settings::default();
        let interpreter = cfg.get_path("PYTHON_INTERPRETER").or_else(|| {
            cfg.get_path("VIRTUAL_ENV")
                .map(|venv| venv_interpreter(&venv))
        });
        let secs = |key: &str, fallback: Duration| -> Result<Duration> {
            Ok(cfg
                .get_u64(key)?
                .map(Duration::from_secs)
                .unwrap_or(fallback))
        };

        Ok(Self {
            codes_dir: cfg.get_path("CODES_DIR").unwrap_or(defaults.codes_dir),
            outputs_dir: cfg.get_path("OUTPUTS_DIR").unwrap_or(defaults.outputs_dir),
            inputs_dir: cfg.get_path("INPUTS_DIR").unwrap_or(defaults.inputs_dir),
            code_base_name: cfg
                .get("CODE_BASE_NAME")
                .unwrap_or(defaults.code_base_name),
            interpreter,
            synthesis_timeout: secs("SYNTHESIS_TIMEOUT", defaults.synthesis_timeout)?,
            execution_timeout: secs("EXECUTION_TIMEOUT", defaults.execution_timeout)?,
            synthesis_retries: cfg
                .get_u64("SYNTHESIS_RETRIES")?
                .map(|n| n.min(1) as u32)
                .unwrap_or(defaults.synthesis_retries),
            isolate_requests: cfg.get_bool("ISOLATE_REQUESTS"),
        })
    }

    pub fn with_dirs(mut self, root: &Path) -> Self {
        self.codes_dir = root.join("codes");
        self.outputs_dir = root.join("outputs");
        self.inputs_dir = root.join("inputs");
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_use_sibling_directories() {
        let s = Settings::from_config(&Config::from_pairs::<&str, &str>([])).unwrap();
        assert_eq!(s.codes_dir, PathBuf::from("codes"));
        assert_eq!(s.outputs_dir, PathBuf::from("outputs"));
        assert_eq!(s.inputs_dir, PathBuf::from("inputs"));
        assert_eq!(s.code_base_name, "code");
        assert!(s.isolate_requests);
        assert!(s.interpreter.is_none());
    }

    #[test]
    fn explicit_interpreter_wins_over_venv() {
        let cfg = Config::from_pairs([
            ("PYTHON_INTERPRETER", "/opt/py/bin/python3"),
            ("VIRTUAL_ENV", "/home/me/.venv"),
        ]);
        let s = Settings::from_config(&cfg).unwrap();
        assert_eq!(s.interpreter, Some(PathBuf::from("/opt/py/bin/python3")));
    }

    #[test]
    fn venv_derives_interpreter() {
        let cfg = Config::from_pairs([("VIRTUAL_ENV", "/home/me/.venv")]);
        let s = Settings::from_config(&cfg).unwrap();
        let interp = s.interpreter.unwrap();
        assert!(interp.starts_with("/home/me/.venv"));
    }

    #[test]
    fn retries_are_capped_at_one() {
        let cfg = Config::from_pairs([("SYNTHESIS_RETRIES", "5")]);
        assert_eq!(Settings::from_config(&cfg).unwrap().synthesis_retries, 1);
        let cfg = Config::from_pairs([("SYNTHESIS_RETRIES", "0")]);
        assert_eq!(Settings::from_config(&cfg).unwrap().synthesis_retries, 0);
    }

    #[test]
    fn bad_timeout_is_rejected() {
        let cfg = Config::from_pairs([("EXECUTION_TIMEOUT", "soon")]);
        assert!(Settings::from_config(&cfg).is_err());
    }

    #[test]
    fn rc_lines_are_parsed() {
        let mut map = HashMap::new();
        let text = "# comment\n\nCODES_DIR = /tmp/c\nISOLATE_REQUESTS=false\n";
        merge_key_values(&mut map, text.as_bytes());
        assert_eq!(map.get("CODES_DIR").map(String::as_str), Some("/tmp/c"));
        assert_eq!(map.get("ISOLATE_REQUESTS").map(String::as_str), Some("false"));
        assert_eq!(map.len(), 2);
    }
}
