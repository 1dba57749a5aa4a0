//! Layered `weaver.yaml` configuration.
//!
//! Layers are applied root-most first: discovered files from the filesystem
//! root down to the start directory, then an explicit file, then the file
//! named by `WEAVER_CONFIG`. A layer may name a parent with `extends:`.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::advice::AdviceOptions;
use crate::conflicts::OverrideStrategy;
use crate::error::{Error, Result};
use crate::logging::LogSettings;
use crate::pipeline::ExecutionMode;

pub const CONFIG_ENV: &str = "WEAVER_CONFIG";
const CANDIDATES: [&str; 3] = ["weaver.yaml", "weaver.yml", ".weaver.yaml"];

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WeaverConfig {
    pub advice: AdviceOptions,
    pub execution: ExecutionMode,
    pub logging: LogSettings,
    /// Files that contributed, in application order.
    pub sources: Vec<PathBuf>,
}

impl WeaverConfig {
    pub fn apply_layer(&mut self, layer: ConfigLayer) {
        let advice = layer.advice;
        if let Some(value) = advice.use_async_template_for_any_awaitable {
            self.advice.use_async_template_for_any_awaitable = value;
        }
        if let Some(value) = advice.use_enumerable_template_for_any_enumerable {
            self.advice.use_enumerable_template_for_any_enumerable = value;
        }
        if let Some(strategy) = advice.default_introduction_strategy {
            self.advice.default_introduction_strategy = strategy;
        }
        if let Some(execution) = layer.execution {
            self.execution = execution;
        }
        self.logging = self.logging.or(layer.logging);
        self.sources.push(layer.source);
    }

    /// Read `path` and everything it extends, on top of the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let mut config = Self::default();
        for layer in parse_layer(path, &mut HashSet::new())? {
            config.apply_layer(layer);
        }
        Ok(config)
    }
}

/// Settings contributed by one file.
#[derive(Debug, Clone, Default)]
pub struct ConfigLayer {
    pub advice: AdviceLayer,
    pub execution: Option<ExecutionMode>,
    pub logging: LogSettings,
    pub source: PathBuf,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default, rename_all = "kebab-case", deny_unknown_fields)]
pub struct AdviceLayer {
    pub use_async_template_for_any_awaitable: Option<bool>,
    pub use_enumerable_template_for_any_enumerable: Option<bool>,
    pub default_introduction_strategy: Option<OverrideStrategy>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
struct RawConfigDocument {
    extends: Option<String>,
    advice: AdviceLayer,
    execution: Option<ExecutionMode>,
    logging: LogSettings,
}

fn parse_layer(path: &Path, visited: &mut HashSet<PathBuf>) -> Result<Vec<ConfigLayer>> {
    let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
    if !visited.insert(canonical) {
        return Err(Error::config(format!(
            "cyclic configuration detected involving {}",
            path.display()
        )));
    }
    let contents = fs::read_to_string(path).map_err(|err| {
        Error::config(format!("failed to read config `{}`: {err}", path.display()))
    })?;
    let yaml: serde_yaml::Value = serde_yaml::from_str(&contents).map_err(|err| {
        Error::config(format!("failed to parse config `{}`: {err}", path.display()))
    })?;
    let section = match yaml {
        serde_yaml::Value::Mapping(ref mapping) => Some(
            mapping
                .get("weaver")
                .cloned()
                .unwrap_or_else(|| yaml.clone()),
        ),
        serde_yaml::Value::Null => None,
        _ => {
            return Err(Error::config(format!(
                "config `{}` must be a mapping",
                path.display()
            )));
        }
    };
    let Some(section) = section else {
        return Ok(Vec::new());
    };
    let raw: RawConfigDocument = serde_yaml::from_value(section).map_err(|err| {
        Error::config(format!("invalid settings in `{}`: {err}", path.display()))
    })?;

    let mut layers = Vec::new();
    if let Some(extends) = raw.extends.as_deref() {
        let base = path
            .parent()
            .map(|parent| parent.join(extends))
            .unwrap_or_else(|| PathBuf::from(extends));
        layers.extend(parse_layer(&base, visited)?);
    }
    tracing::debug!(target: "config", path = %path.display(), "loaded configuration layer");
    layers.push(ConfigLayer {
        advice: raw.advice,
        execution: raw.execution,
        logging: raw.logging,
        source: path.to_path_buf(),
    });
    Ok(layers)
}

fn discover_layers(start_dir: &Path) -> Result<Vec<ConfigLayer>> {
    let mut cursor = Some(start_dir.to_path_buf());
    let mut discovered = Vec::new();
    while let Some(dir) = cursor {
        if let Some(path) = CANDIDATES
            .iter()
            .map(|candidate| dir.join(candidate))
            .find(|path| path.is_file())
        {
            let mut layers = parse_layer(&path, &mut HashSet::new())?;
            layers.reverse();
            discovered.append(&mut layers);
        }
        cursor = dir.parent().map(Path::to_path_buf);
    }
    // Walked from leaf to root; apply root-most first.
    discovered.reverse();
    Ok(discovered)
}

/// Directory a fixture's configuration is discovered from.
pub fn start_dir_for_input(input: &Path) -> Result<PathBuf> {
    if input.is_dir() {
        return Ok(input.to_path_buf());
    }
    match input.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => Ok(parent.to_path_buf()),
        _ => std::env::current_dir().map_err(Error::from),
    }
}

/// Configuration for a run over `input`; missing files leave the defaults in place.
pub fn discover(input: &Path) -> Result<WeaverConfig> {
    discover_with_override(input, None)
}

pub fn discover_with_override(input: &Path, explicit: Option<&Path>) -> Result<WeaverConfig> {
    let mut config = WeaverConfig::default();
    for layer in discover_layers(&start_dir_for_input(input)?)? {
        config.apply_layer(layer);
    }
    if let Some(path) = explicit {
        for layer in parse_layer(path, &mut HashSet::new())? {
            config.apply_layer(layer);
        }
    }
    if let Some(env_path) = std::env::var_os(CONFIG_ENV).map(PathBuf::from)
        && env_path.is_file()
    {
        for layer in parse_layer(&env_path, &mut HashSet::new())? {
            config.apply_layer(layer);
        }
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::{LogFormat, LogLevel};
    use once_cell::sync::Lazy;
    use std::sync::Mutex;
    use tempfile::tempdir;

    static ENV_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

    fn with_env_lock<F>(f: F)
    where
        F: FnOnce(),
    {
        let _guard = ENV_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f();
    }

    #[test]
    fn missing_files_yield_defaults() {
        with_env_lock(|| {
            let dir = tempdir().expect("tempdir");
            let input = dir.path().join("fixture.yaml");
            let config = discover(&input).expect("discover");
            assert_eq!(config.advice, AdviceOptions::default());
            assert!(config.logging.is_empty());
        });
    }

    #[test]
    fn explicit_file_then_environment_file_apply_last() {
        with_env_lock(|| {
            let dir = tempdir().expect("tempdir");
            fs::write(dir.path().join("weaver.yaml"), "execution:\n  mode: sequential\n")
                .expect("write discovered");
            let explicit = dir.path().join("explicit.yaml");
            fs::write(&explicit, "execution:\n  mode: randomized\n  seed: 3\n")
                .expect("write explicit");
            let from_env = dir.path().join("env.yaml");
            fs::write(&from_env, "logging:\n  level: debug\n").expect("write env");

            let input = dir.path().join("fixture.yaml");
            let config = discover_with_override(&input, Some(&explicit)).expect("discover");
            assert_eq!(config.execution, ExecutionMode::Randomized { seed: 3 });
            assert!(config.logging.is_empty());

            unsafe { std::env::set_var(CONFIG_ENV, &from_env) };
            let layered = discover_with_override(&input, Some(&explicit));
            unsafe { std::env::remove_var(CONFIG_ENV) };
            let layered = layered.expect("discover with env");
            assert_eq!(layered.execution, ExecutionMode::Randomized { seed: 3 });
            assert_eq!(layered.logging.level, Some(LogLevel::Debug));
            assert_eq!(layered.sources.last(), Some(&from_env));
        });
    }

    #[test]
    fn extends_applies_parent_first() {
        let dir = tempdir().expect("tempdir");
        fs::write(
            dir.path().join("base.yaml"),
            "advice:\n  use-async-template-for-any-awaitable: true\n  default-introduction-strategy: fail\nlogging:\n  level: info\n",
        )
        .expect("write base");
        let child = dir.path().join("weaver.yaml");
        fs::write(
            &child,
            "extends: base.yaml\nadvice:\n  default-introduction-strategy: new\nexecution:\n  mode: randomized\n  seed: 9\n",
        )
        .expect("write child");

        let config = WeaverConfig::load(&child).expect("load");
        assert!(config.advice.use_async_template_for_any_awaitable);
        assert_eq!(config.advice.default_introduction_strategy, OverrideStrategy::New);
        assert_eq!(config.execution, ExecutionMode::Randomized { seed: 9 });
        assert_eq!(config.logging.level, Some(LogLevel::Info));
        assert_eq!(config.sources.len(), 2);
    }

    #[test]
    fn nested_weaver_section_and_discovery() {
        let _guard = ENV_LOCK
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let dir = tempdir().expect("tempdir");
        let nested = dir.path().join("aspects");
        fs::create_dir(&nested).expect("mkdir");
        fs::write(
            dir.path().join("weaver.yaml"),
            "weaver:\n  logging:\n    format: json\n",
        )
        .expect("write root");
        fs::write(nested.join("weaver.yml"), "execution:\n  mode: sequential\n").expect("write leaf");

        let config = discover(&nested.join("fixture.yaml")).expect("discover");
        assert_eq!(config.logging.format, Some(LogFormat::Json));
        assert_eq!(config.execution, ExecutionMode::Sequential);
        assert!(config.sources[0].ends_with("weaver.yaml"));
    }

    #[test]
    fn cycles_and_unknown_keys_are_rejected() {
        let dir = tempdir().expect("tempdir");
        let a = dir.path().join("a.yaml");
        fs::write(&a, "extends: b.yaml\n").expect("write a");
        fs::write(dir.path().join("b.yaml"), "extends: a.yaml\n").expect("write b");
        let error = WeaverConfig::load(&a).expect_err("cycle");
        assert!(error.to_string().contains("cyclic configuration"));

        let typo = dir.path().join("typo.yaml");
        fs::write(&typo, "advice:\n  use-async-templates: true\n").expect("write typo");
        let error = WeaverConfig::load(&typo).expect_err("unknown key");
        assert!(matches!(error, Error::Config { .. }));
    }
}
