//! Builds the set of available [`Engine`]s from `[engines.*]` config
//! (spec.md §4.2's `/claude`, `/codex`, `/opencode`, `/pi` directives).

use std::collections::HashMap;
use std::sync::Arc;

use bob_core::config::EnginesConfig;

use crate::cli::CliEngine;
use crate::engine::Engine;
use crate::types::EngineFlags;

/// The four CLI agents spec.md names as slash directives. `claude` and
/// `codex` get permission flags from config; `opencode`/`pi` run with
/// defaults until the project grows config sections for them.
const CLI_ENGINE_IDS: &[&str] = &["claude", "codex", "opencode", "pi"];

pub struct EngineRegistry {
    engines: HashMap<String, Arc<dyn Engine>>,
    flags: HashMap<String, EngineFlags>,
}

impl EngineRegistry {
    pub fn from_config(cfg: &EnginesConfig) -> Self {
        let mut engines: HashMap<String, Arc<dyn Engine>> = HashMap::new();
        let mut flags: HashMap<String, EngineFlags> = HashMap::new();

        for id in CLI_ENGINE_IDS {
            engines.insert((*id).to_string(), Arc::new(CliEngine::new(*id, *id)));
        }

        if let Some(claude) = &cfg.claude {
            flags.insert(
                "claude".to_string(),
                EngineFlags {
                    skip_permissions: claude.skip_permissions,
                    yolo: false,
                },
            );
        }
        if let Some(codex) = &cfg.codex {
            flags.insert(
                "codex".to_string(),
                EngineFlags {
                    skip_permissions: false,
                    yolo: codex.yolo,
                },
            );
        }

        Self { engines, flags }
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Engine>> {
        self.engines.get(id).cloned()
    }

    pub fn flags_for(&self, id: &str) -> EngineFlags {
        self.flags.get(id).cloned().unwrap_or_default()
    }

    pub fn register(&mut self, engine: Arc<dyn Engine>) {
        self.engines.insert(engine.id().to_string(), engine);
    }

    pub fn ids(&self) -> Vec<String> {
        self.engines.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_flags_attach_to_matching_engine_id() {
        let cfg = EnginesConfig {
            claude: Some(bob_core::config::ClaudeEngineConfig { skip_permissions: true }),
            codex: None,
        };
        let registry = EngineRegistry::from_config(&cfg);
        assert!(registry.get("claude").is_some());
        assert!(registry.flags_for("claude").skip_permissions);
        assert!(!registry.flags_for("codex").yolo);
    }

    #[test]
    fn all_four_cli_directives_are_registered() {
        let cfg = EnginesConfig { claude: None, codex: None };
        let registry = EngineRegistry::from_config(&cfg);
        for id in CLI_ENGINE_IDS {
            assert!(registry.get(id).is_some(), "missing engine {id}");
        }
    }
}
