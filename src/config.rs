//! Session configuration.

use std::path::PathBuf;

use crate::parser::ParseConfig;

/// Script replayed through the interactive dispatch path when a session starts
pub const DEFAULT_STARTUP_SCRIPT: &str = "startup.scr";

/// Settings for one interpreter session
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Script run once at startup; `None` skips it
    pub startup_script: Option<PathBuf>,
    pub prompt: String,
    /// Where the interactive front end keeps its line history
    pub history_file: Option<PathBuf>,
    pub parse: ParseConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            startup_script: Some(PathBuf::from(DEFAULT_STARTUP_SCRIPT)),
            prompt: "tracker> ".to_owned(),
            history_file: Some(PathBuf::from(".tracker_history")),
            parse: ParseConfig::default(),
        }
    }
}

impl SessionConfig {
    /// A configuration that touches no files of its own: no startup script and no
    /// history.
    pub fn detached() -> Self {
        SessionConfig {
            startup_script: None,
            history_file: None,
            ..SessionConfig::default()
        }
    }

    pub fn with_startup_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.startup_script = Some(script.into());
        self
    }
}
