use std::fmt::Write as _;
use std::fs;

use anyhow::{Context, Result, bail};
use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use toml_edit::{DocumentMut, value};

use crate::flatten::{DEFAULT_SUFFIX, FailurePolicy, FlattenOptions, NestedPolicy};
use crate::templates;

pub const DEFAULT_ROOT: &str = "../satellite";

/// Keys accepted by `config set`.
pub const KEYS: &[&str] = &["root", "suffix", "nested", "on_error"];

/// Configuration document, usually `.unnest/config.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct UnnestConfig {
    pub root: Option<String>,
    pub suffix: Option<String>,
    pub nested: Option<NestedPolicy>,
    pub on_error: Option<FailurePolicy>,
}

/// Values given on the command line; each one wins over the config file.
#[derive(Debug, Default)]
pub struct Overrides {
    pub root: Option<Utf8PathBuf>,
    pub suffix: Option<String>,
    pub nested: Option<NestedPolicy>,
    pub keep_going: bool,
    pub dry_run: bool,
}

/// Fully resolved inputs for a flatten run.
#[derive(Debug)]
pub struct Settings {
    pub root: Utf8PathBuf,
    pub options: FlattenOptions,
}

impl UnnestConfig {
    pub fn resolve(&self, overrides: Overrides) -> Result<Settings> {
        let root = overrides
            .root
            .or_else(|| self.root.as_deref().map(Utf8PathBuf::from))
            .unwrap_or_else(|| Utf8PathBuf::from(DEFAULT_ROOT));
        let suffix = overrides
            .suffix
            .or_else(|| self.suffix.clone())
            .unwrap_or_else(|| DEFAULT_SUFFIX.to_owned());
        if suffix.is_empty() {
            bail!("suffix must not be empty");
        }

        let on_error = if overrides.keep_going {
            FailurePolicy::Continue
        } else {
            self.on_error.unwrap_or_default()
        };

        Ok(Settings {
            root,
            options: FlattenOptions {
                suffix,
                nested: overrides.nested.or(self.nested).unwrap_or_default(),
                on_error,
                dry_run: overrides.dry_run,
            },
        })
    }
}

/// Load a configuration file from disk and deserialize it.
pub fn load_from_path(path: &Utf8Path) -> Result<UnnestConfig> {
    let raw = fs::read_to_string(path).with_context(|| format!("reading config {}", path))?;
    toml::from_str(&raw).with_context(|| format!("parsing config {}", path))
}

/// Like [`load_from_path`], but a missing file yields the defaults.
pub fn load_or_default(path: &Utf8Path) -> Result<UnnestConfig> {
    if !path.exists() {
        return Ok(UnnestConfig::default());
    }
    load_from_path(path)
}

pub fn write_example_config(path: &Utf8Path, overwrite: bool) -> Result<()> {
    if path.exists() && !overwrite {
        bail!("{} already exists; rerun with --force to overwrite", path);
    }

    templates::write_template(path, templates::EXAMPLE_CONFIG)
}

/// Set a single top-level key, keeping the rest of the document intact.
pub fn set_value(path: &Utf8Path, key: &str, raw: &str) -> Result<()> {
    let stored = match key {
        "root" => raw.to_owned(),
        "suffix" if raw.is_empty() => bail!("suffix must not be empty"),
        "suffix" => raw.to_owned(),
        "nested" => canonical_name(&parse_enum::<NestedPolicy>(key, raw)?),
        "on_error" => canonical_name(&parse_enum::<FailurePolicy>(key, raw)?),
        other => bail!("unknown config key `{}`; expected one of {}", other, KEYS.join(", ")),
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).with_context(|| format!("creating directory {}", parent))?;
    }

    let mut doc: DocumentMut = if path.exists() {
        let raw = fs::read_to_string(path).with_context(|| format!("reading config {}", path))?;
        raw.parse()
            .with_context(|| format!("parsing config {}", path))?
    } else {
        DocumentMut::new()
    };

    doc[key] = value(stored);

    fs::write(path, doc.to_string()).with_context(|| format!("writing config {}", path))
}

fn parse_enum<T: clap::ValueEnum>(key: &str, raw: &str) -> Result<T> {
    T::from_str(raw, true).map_err(|_| {
        let allowed: Vec<String> = T::value_variants().iter().map(canonical_name).collect();
        anyhow::anyhow!("invalid value `{}` for `{}`; expected one of {}", raw, key, allowed.join(", "))
    })
}

/// Spelling the config file deserializes, whatever case was typed.
fn canonical_name<T: clap::ValueEnum>(variant: &T) -> String {
    variant
        .to_possible_value()
        .map(|p| p.get_name().to_owned())
        .unwrap_or_default()
}

pub fn format_summary(settings: &Settings) -> String {
    let mut out = String::new();
    let options = &settings.options;

    let _ = writeln!(out, "Root: {}", settings.root);
    let _ = writeln!(out, "Suffix: {}", options.suffix);
    let _ = writeln!(out, "Nested selection: {:?}", options.nested);
    let _ = writeln!(out, "On error: {:?}", options.on_error);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config_path(dir: &TempDir) -> Utf8PathBuf {
        Utf8PathBuf::from_path_buf(dir.path().join(".unnest").join("config.toml")).unwrap()
    }

    #[test]
    fn missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = load_or_default(&config_path(&dir)).unwrap();
        let settings = config.resolve(Overrides::default()).unwrap();

        assert_eq!(settings.root, Utf8PathBuf::from(DEFAULT_ROOT));
        assert_eq!(settings.options.suffix, "-master");
        assert_eq!(settings.options.nested, NestedPolicy::First);
        assert_eq!(settings.options.on_error, FailurePolicy::Abort);
    }

    #[test]
    fn command_line_wins_over_file() {
        let config: UnnestConfig = toml::from_str(
            "root = 'vendor'\nsuffix = '-main'\nnested = 'unique'\non_error = 'continue'\n",
        )
        .unwrap();

        let settings = config
            .resolve(Overrides {
                suffix: Some("-trunk".into()),
                ..Overrides::default()
            })
            .unwrap();
        assert_eq!(settings.root, Utf8PathBuf::from("vendor"));
        assert_eq!(settings.options.suffix, "-trunk");
        assert_eq!(settings.options.nested, NestedPolicy::Unique);
        assert_eq!(settings.options.on_error, FailurePolicy::Continue);
    }

    #[test]
    fn empty_suffix_is_rejected() {
        let config = UnnestConfig {
            suffix: Some(String::new()),
            ..UnnestConfig::default()
        };
        assert!(config.resolve(Overrides::default()).is_err());
    }

    #[test]
    fn set_value_preserves_other_keys() {
        let dir = TempDir::new().unwrap();
        let path = config_path(&dir);
        write_example_config(&path, false).unwrap();

        set_value(&path, "suffix", "-main").unwrap();
        set_value(&path, "nested", "unique").unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("# unnest configuration"));
        let config = load_from_path(&path).unwrap();
        assert_eq!(config.suffix.as_deref(), Some("-main"));
        assert_eq!(config.nested, Some(NestedPolicy::Unique));
        assert_eq!(config.root.as_deref(), Some("../satellite"));
    }

    #[test]
    fn set_value_stores_lowercase_policy_names() {
        let dir = TempDir::new().unwrap();
        let path = config_path(&dir);

        set_value(&path, "nested", "Unique").unwrap();
        set_value(&path, "on_error", "CONTINUE").unwrap();

        let config = load_from_path(&path).unwrap();
        assert_eq!(config.nested, Some(NestedPolicy::Unique));
        assert_eq!(config.on_error, Some(FailurePolicy::Continue));
        assert!(fs::read_to_string(&path).unwrap().contains("nested = \"unique\""));
    }

    #[test]
    fn set_value_rejects_bad_input() {
        let dir = TempDir::new().unwrap();
        let path = config_path(&dir);
        assert!(set_value(&path, "colour", "blue").is_err());
        assert!(set_value(&path, "on_error", "retry").is_err());
        assert!(!path.exists());
    }

    #[test]
    fn generate_refuses_to_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = config_path(&dir);
        write_example_config(&path, false).unwrap();
        assert!(write_example_config(&path, false).is_err());
        write_example_config(&path, true).unwrap();
    }
}
