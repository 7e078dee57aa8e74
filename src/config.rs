// Interpreter configuration, deserialized from an optional RON file and
// overridden by command-line flags.

use crate::vm::{FRAMES_MAX, STACK_MAX};
use serde::Deserialize;
use std::fs;
use std::path::Path;

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct Config {
    // Dump each compiled chunk and trace every executed instruction
    pub debug_trace: bool,
    // Emit parser trace events
    pub debug_parser: bool,
    pub frames_max: usize,
    pub stack_max: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            debug_trace: false,
            debug_parser: false,
            frames_max: FRAMES_MAX,
            stack_max: STACK_MAX,
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, String> {
        let text = fs::read_to_string(path)
            .map_err(|e| format!("couldn't read {}: {}", path.display(), e))?;
        ron::de::from_str(&text).map_err(|e| format!("couldn't parse {}: {}", path.display(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert!(!config.debug_trace);
        assert_eq!(config.frames_max, FRAMES_MAX);
        assert_eq!(config.stack_max, STACK_MAX);
    }

    #[test]
    fn test_parse_ron() {
        let config: Config =
            ron::de::from_str("(debug_trace: true, frames_max: 64)").unwrap();
        assert!(config.debug_trace);
        assert_eq!(config.frames_max, 64);
        // Unspecified fields keep their defaults
        assert_eq!(config.stack_max, STACK_MAX);
    }
}
