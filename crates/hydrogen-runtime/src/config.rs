//! Embedder-facing runtime configuration.
//!
//! Mirrors the handful of knobs the original exposes through its
//! `hy_config_*` setters (initial stack size, max call depth) plus the
//! ambient `[hydrogen]` table an embedding application can ship in its own
//! `Config.toml`.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HyConfig {
    /// Initial value-stack capacity, in slots.
    pub initial_stack_size: usize,
    /// Hard cap on call-frame nesting before `HyError::Runtime("stack overflow")`.
    pub max_call_depth: usize,
    /// Emit a `tracing` event disassembling every function as it's compiled.
    pub trace_bytecode: bool,
}

impl Default for HyConfig {
    fn default() -> Self {
        HyConfig { initial_stack_size: 256, max_call_depth: 512, trace_bytecode: false }
    }
}

impl HyConfig {
    pub fn from_toml(text: &str) -> Result<Self, hydrogen_core::HyError> {
        #[derive(Deserialize, Default)]
        struct Wrapper {
            #[serde(default)]
            hydrogen: HyConfig,
        }
        let wrapper: Wrapper =
            toml::from_str(text).map_err(|e| hydrogen_core::HyError::io(format!("invalid config: {e}")))?;
        Ok(wrapper.hydrogen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_reasonable() {
        let config = HyConfig::default();
        assert_eq!(config.initial_stack_size, 256);
        assert_eq!(config.max_call_depth, 512);
    }

    #[test]
    fn parses_hydrogen_table_from_toml() {
        let config = HyConfig::from_toml("[hydrogen]\nmax_call_depth = 128\n").unwrap();
        assert_eq!(config.max_call_depth, 128);
        assert_eq!(config.initial_stack_size, 256);
    }
}
