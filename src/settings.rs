use std::path::Path;

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::parser::{CalloutClose, NoisePolicy, ParserConfig, DEFAULT_ROOT_PREFIX};

/// Looked up in the working directory when no `--config` is given.
const DEFAULT_CONFIG_FILE: &str = "ctd";
const ENV_PREFIX: &str = "CTD";
const DB_PATH: &str = "data/ctd_lines.sqlite";

/// Flat settings as read from `ctd.toml` and `CTD_*` variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub root_prefix: String,
    pub strict_heading_match: bool,
    pub equality_counts_as_ancestor: bool,
    pub marker_line_belongs_to_block: bool,
    pub callout_close: CalloutClose,
    pub noise_policy: NoisePolicy,
    pub db_path: String,
}

impl Default for Settings {
    fn default() -> Self {
        let parser = ParserConfig::default();
        Settings {
            root_prefix: DEFAULT_ROOT_PREFIX.to_string(),
            strict_heading_match: parser.strict_heading_match,
            equality_counts_as_ancestor: parser.equality_counts_as_ancestor,
            marker_line_belongs_to_block: parser.marker_line_belongs_to_block,
            callout_close: parser.callout_close,
            noise_policy: parser.noise_policy,
            db_path: DB_PATH.to_string(),
        }
    }
}

impl Settings {
    /// Defaults, then the config file, then the environment.
    pub fn load(file: Option<&Path>) -> Result<Settings> {
        let builder = match file {
            Some(path) => Config::builder().add_source(File::from(path).required(true)),
            None => Config::builder().add_source(File::with_name(DEFAULT_CONFIG_FILE).required(false)),
        };
        builder
            .add_source(Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()
            .context("failed to read settings")?
            .try_deserialize::<Settings>()
            .context("invalid settings")
    }

    pub fn parser_config(&self) -> ParserConfig {
        ParserConfig {
            root_prefix: self.root_prefix.clone(),
            strict_heading_match: self.strict_heading_match,
            equality_counts_as_ancestor: self.equality_counts_as_ancestor,
            marker_line_belongs_to_block: self.marker_line_belongs_to_block,
            callout_close: self.callout_close,
            noise_policy: self.noise_policy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_match_canonical_parser() {
        let s = Settings::default();
        assert_eq!(s.root_prefix, "2.3.P");
        assert!(s.strict_heading_match);
        assert!(!s.equality_counts_as_ancestor);
        assert!(s.marker_line_belongs_to_block);
        assert_eq!(s.callout_close, CalloutClose::Never);
        assert_eq!(s.noise_policy, NoisePolicy::PassThrough);
    }

    #[test]
    fn file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "strict_heading_match = false\nnoise_policy = \"skip\"\ncallout_close = \"blank_line\"\ndb_path = \"out.sqlite\""
        )
        .unwrap();

        let s = Settings::load(Some(file.path())).unwrap();
        assert!(!s.strict_heading_match);
        assert_eq!(s.noise_policy, NoisePolicy::Skip);
        assert_eq!(s.callout_close, CalloutClose::BlankLine);
        assert_eq!(s.db_path, "out.sqlite");
        // untouched keys keep their defaults
        assert_eq!(s.root_prefix, "2.3.P");
        assert!(s.marker_line_belongs_to_block);
    }

    #[test]
    fn environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "noise_policy = \"pass_through\"\nroot_prefix = \"3.2.S\"").unwrap();

        // tests share the process environment; keep this equal to the file test's value
        std::env::set_var("CTD_NOISE_POLICY", "skip");
        let loaded = Settings::load(Some(file.path()));
        std::env::remove_var("CTD_NOISE_POLICY");

        let s = loaded.unwrap();
        assert_eq!(s.noise_policy, NoisePolicy::Skip);
        assert_eq!(s.root_prefix, "3.2.S");
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        assert!(Settings::load(Some(Path::new("does/not/exist.toml"))).is_err());
    }

    #[test]
    fn parser_config_carries_every_flag() {
        let s = Settings {
            root_prefix: "3.2.S".into(),
            equality_counts_as_ancestor: true,
            marker_line_belongs_to_block: false,
            ..Settings::default()
        };
        let c = s.parser_config();
        assert_eq!(c.root_prefix, "3.2.S");
        assert!(c.equality_counts_as_ancestor);
        assert!(!c.marker_line_belongs_to_block);
    }
}
