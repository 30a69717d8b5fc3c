//! Name → strategy factory map, built once at startup and borrowed by the
//! coordinator. Instances are created on first lookup and then reused.

use indexmap::IndexMap;
use std::cell::OnceCell;

use super::{
    EditStrategy, EngineSettings, SearchReplaceStrategy, StrategyInfo, UnifiedDiffStrategy,
    WholeFileStrategy, search_replace, unified_diff, whole_file,
};
use crate::core::error::EditError;

type Factory = Box<dyn Fn(&EngineSettings) -> Box<dyn EditStrategy>>;

struct Entry {
    factory: Factory,
    instance: OnceCell<Box<dyn EditStrategy>>,
}

pub struct StrategyRegistry {
    settings: EngineSettings,
    entries: IndexMap<&'static str, Entry>,
    aliases: IndexMap<&'static str, &'static str>,
}

impl StrategyRegistry {
    /// An empty registry; strategies are added with [`register`](Self::register).
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            entries: IndexMap::new(),
            aliases: IndexMap::new(),
        }
    }

    /// Registry holding the three built-in strategies.
    pub fn with_defaults(settings: &EngineSettings) -> Self {
        let mut reg = Self::new(settings.clone());
        reg.register(whole_file::NAME, |s| Box::new(WholeFileStrategy::new(s)));
        reg.register(search_replace::NAME, |s| {
            Box::new(SearchReplaceStrategy::new(s))
        });
        reg.register(unified_diff::NAME, |_| Box::new(UnifiedDiffStrategy::new()));
        reg.alias("whole", whole_file::NAME);
        reg.alias("editblock", search_replace::NAME);
        reg.alias("udiff", unified_diff::NAME);
        reg
    }

    /// Add or replace the factory for `name`.
    pub fn register<F>(&mut self, name: &'static str, factory: F)
    where
        F: Fn(&EngineSettings) -> Box<dyn EditStrategy> + 'static,
    {
        self.entries.insert(
            name,
            Entry {
                factory: Box::new(factory),
                instance: OnceCell::new(),
            },
        );
    }

    /// Accept `alias` wherever `target` is.
    pub fn alias(&mut self, alias: &'static str, target: &'static str) {
        self.aliases.insert(alias, target);
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn contains(&self, name: &str) -> bool {
        self.canonical(name).is_some()
    }

    fn canonical(&self, name: &str) -> Option<&'static str> {
        if let Some((k, _)) = self.entries.get_key_value(name) {
            return Some(*k);
        }
        self.aliases
            .get(name)
            .copied()
            .filter(|t| self.entries.contains_key(t))
    }

    /// The strategy registered as `name`, building it on first use.
    pub fn get(&self, name: &str) -> Result<&dyn EditStrategy, EditError> {
        let entry = self
            .canonical(name)
            .and_then(|k| self.entries.get(k))
            .ok_or_else(|| EditError::UnknownStrategy {
                name: name.to_string(),
                available: self.names().join(", "),
            })?;
        Ok(entry
            .instance
            .get_or_init(|| (entry.factory)(&self.settings))
            .as_ref())
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.entries.keys().copied().collect()
    }

    pub fn list(&self) -> Vec<StrategyInfo> {
        self.names()
            .into_iter()
            .filter_map(|n| self.get(n).ok().map(|s| s.info()))
            .collect()
    }
}

impl std::fmt::Debug for StrategyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyRegistry")
            .field("settings", &self.settings)
            .field("strategies", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::StrategyError;
    use crate::core::strategy::{FileMap, StrategyResult};
    use std::cell::Cell;
    use std::rc::Rc;

    struct Upper;

    impl EditStrategy for Upper {
        fn info(&self) -> StrategyInfo {
            StrategyInfo {
                name: "upper",
                description: "uppercase every file",
                supports_partial_edit: false,
                supports_multiple_files: true,
                best_for: &[],
            }
        }

        fn parse(&self, _text: &str, files: &FileMap) -> StrategyResult {
            StrategyResult {
                files: files
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_uppercase()))
                    .collect(),
                ..StrategyResult::default()
            }
        }

        fn validate(&self, _result: &StrategyResult) -> Result<(), StrategyError> {
            Ok(())
        }
    }

    #[test]
    fn defaults_are_listed_in_order() {
        let reg = StrategyRegistry::with_defaults(&EngineSettings::default());
        assert_eq!(reg.names(), vec!["whole-file", "search-replace", "unified-diff"]);
        let infos = reg.list();
        assert!(!infos[0].supports_partial_edit);
        assert!(infos[1].supports_partial_edit);
    }

    #[test]
    fn unknown_name_lists_available() {
        let reg = StrategyRegistry::with_defaults(&EngineSettings::default());
        let err = reg.get("telepathy").err().unwrap();
        let msg = err.to_string();
        assert!(msg.contains("telepathy"));
        assert!(msg.contains("whole-file, search-replace, unified-diff"));
    }

    #[test]
    fn aliases_resolve_to_builtins() {
        let reg = StrategyRegistry::with_defaults(&EngineSettings::default());
        assert_eq!(reg.get("udiff").unwrap().name(), "unified-diff");
        assert_eq!(reg.get("editblock").unwrap().name(), "search-replace");
        assert!(reg.contains("whole"));
    }

    #[test]
    fn factory_runs_once_per_registry() {
        let calls = Rc::new(Cell::new(0));
        let counter = calls.clone();
        let mut reg = StrategyRegistry::new(EngineSettings::default());
        reg.register("upper", move |_| {
            counter.set(counter.get() + 1);
            Box::new(Upper)
        });

        assert_eq!(calls.get(), 0);
        reg.get("upper").unwrap();
        reg.get("upper").unwrap();
        assert_eq!(calls.get(), 1);

        // isolated registries do not share instances
        let other = StrategyRegistry::new(EngineSettings::default());
        assert!(other.get("upper").is_err());
    }

    #[test]
    fn settings_reach_the_strategies() {
        let settings = EngineSettings {
            min_content_len: 3,
            ..EngineSettings::default()
        };
        let reg = StrategyRegistry::with_defaults(&settings);
        let wf = reg.get("whole-file").unwrap();
        let r = wf.parse("a.txt\n```\nabc\n```\n", &FileMap::new());
        assert!(wf.validate(&r).is_ok());
    }
}
