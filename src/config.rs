use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use chatgpt::config::ChatGPTEngine;

use crate::error::ConfigurationError;
use crate::quiz::grading::GradingMode;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_TEMPERATURE: f32 = 0.8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Model {
    #[default]
    Gpt35Turbo,
    Gpt4,
    Gpt4_32k,
}

impl Model {
    pub fn engine(&self) -> ChatGPTEngine {
        match self {
            Model::Gpt35Turbo => ChatGPTEngine::Gpt35Turbo,
            Model::Gpt4 => ChatGPTEngine::Gpt4,
            Model::Gpt4_32k => ChatGPTEngine::Gpt4_32k,
        }
    }
}

impl FromStr for Model {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "gpt-3.5-turbo" => Ok(Model::Gpt35Turbo),
            "gpt-4" => Ok(Model::Gpt4),
            "gpt-4-32k" => Ok(Model::Gpt4_32k),
            _ => Err("expected one of gpt-3.5-turbo, gpt-4, gpt-4-32k".to_string()),
        }
    }
}

/// Everything read from the environment at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub telegram_token: String,
    pub model: Model,
    pub timeout: Duration,
    pub temperature: f32,
    pub grading: GradingMode,
    pub results_dir: PathBuf,
    pub db_path: String,
}

impl Config {
    /// Loads `.env` if there is one, then reads the process environment.
    pub fn from_env() -> Result<Self, ConfigurationError> {
        if let Err(e) = dotenv::dotenv() {
            log::debug!("No .env file loaded: {}", e);
        }
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_lookup(
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> Result<Self, ConfigurationError> {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigurationError::Missing(name))
        };
        let api_key = required("OPENAI_API_KEY")?;
        let telegram_token = required("TELOXIDE_TOKEN")?;

        let model = parse_var(&lookup, "QUIZ_MODEL", Model::default(), |v| v.parse())?;
        let timeout = parse_var(&lookup, "QUIZ_TIMEOUT_SECS", DEFAULT_TIMEOUT_SECS, |v| {
            match v.parse::<u64>() {
                Ok(0) => Err("must be at least 1".to_string()),
                Ok(secs) => Ok(secs),
                Err(e) => Err(e.to_string()),
            }
        })?;
        let temperature = parse_var(&lookup, "QUIZ_TEMPERATURE", DEFAULT_TEMPERATURE, |v| {
            match v.parse::<f32>() {
                Ok(t) if (0.0..=2.0).contains(&t) => Ok(t),
                Ok(_) => Err("must be between 0.0 and 2.0".to_string()),
                Err(e) => Err(e.to_string()),
            }
        })?;
        let grading = parse_var(&lookup, "QUIZ_GRADING", GradingMode::default(), |v| v.parse())?;

        Ok(Self {
            api_key,
            telegram_token,
            model,
            timeout: Duration::from_secs(timeout),
            temperature,
            grading,
            results_dir: lookup("QUIZ_RESULTS_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("quiz_results")),
            db_path: lookup("QUIZ_DB_PATH").unwrap_or_else(|| "db.sqlite".to_string()),
        })
    }
}

fn parse_var<T>(
    lookup: &impl Fn(&'static str) -> Option<String>,
    name: &'static str,
    default: T,
    parse: impl Fn(&str) -> Result<T, String>,
) -> Result<T, ConfigurationError> {
    match lookup(name) {
        None => Ok(default),
        Some(value) => parse(&value).map_err(|reason| ConfigurationError::Invalid {
            name,
            value,
            reason,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&'static str, &str)]) -> impl Fn(&'static str) -> Option<String> {
        let vars: HashMap<&'static str, String> =
            vars.iter().map(|(k, v)| (*k, v.to_string())).collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn missing_api_key_is_a_configuration_error() {
        let err = Config::from_lookup(lookup(&[("TELOXIDE_TOKEN", "123:abc")])).unwrap_err();
        assert!(matches!(err, ConfigurationError::Missing("OPENAI_API_KEY")));
        assert!(err.to_string().contains("OPENAI_API_KEY is not set"));
    }

    #[test]
    fn blank_api_key_counts_as_missing() {
        let err = Config::from_lookup(lookup(&[("OPENAI_API_KEY", "  "), ("TELOXIDE_TOKEN", "t")]))
            .unwrap_err();
        assert!(matches!(err, ConfigurationError::Missing("OPENAI_API_KEY")));
    }

    #[test]
    fn defaults_apply() {
        let config =
            Config::from_lookup(lookup(&[("OPENAI_API_KEY", "sk-test"), ("TELOXIDE_TOKEN", "t")]))
                .unwrap();
        assert_eq!(config.model, Model::Gpt35Turbo);
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.grading, GradingMode::Exact);
        assert_eq!(config.results_dir, PathBuf::from("quiz_results"));
        assert_eq!(config.db_path, "db.sqlite");
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("OPENAI_API_KEY", "sk-test"),
            ("TELOXIDE_TOKEN", "t"),
            ("QUIZ_MODEL", "gpt-4"),
            ("QUIZ_TIMEOUT_SECS", "10"),
            ("QUIZ_TEMPERATURE", "0.2"),
            ("QUIZ_GRADING", "keyword"),
            ("QUIZ_RESULTS_DIR", "/tmp/results"),
        ]))
        .unwrap();
        assert_eq!(config.model, Model::Gpt4);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert_eq!(config.temperature, 0.2);
        assert_eq!(config.grading, GradingMode::Keyword);
        assert_eq!(config.results_dir, PathBuf::from("/tmp/results"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        for (name, value) in [
            ("QUIZ_MODEL", "llama"),
            ("QUIZ_TIMEOUT_SECS", "0"),
            ("QUIZ_TEMPERATURE", "3.5"),
            ("QUIZ_GRADING", "fuzzy"),
        ] {
            let err = Config::from_lookup(lookup(&[
                ("OPENAI_API_KEY", "sk-test"),
                ("TELOXIDE_TOKEN", "t"),
                (name, value),
            ]))
            .unwrap_err();
            assert!(
                matches!(err, ConfigurationError::Invalid { name: n, .. } if n == name),
                "{name}={value} was accepted"
            );
        }
    }
}
