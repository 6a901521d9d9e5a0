//! Built-in abilities and the registry that dispatches them

pub mod filesystem;
pub mod finish;
pub mod python;
pub mod registry;

use sdk::ability::Ability;
use std::sync::Arc;
use std::time::Duration;

pub use filesystem::{ListFiles, ReadFile, WriteFile};
pub use finish::{Finish, FINISH};
pub use python::RunPythonFile;
pub use registry::AbilityRegistry;

/// Category for abilities that touch the task workspace
pub const FILE_SYSTEM: &str = "file system";

/// Abilities shipped with the engine, in catalog order
pub fn builtin_abilities() -> Vec<Arc<dyn Ability>> {
    vec![
        Arc::new(WriteFile),
        Arc::new(ReadFile),
        Arc::new(ListFiles),
        Arc::new(RunPythonFile),
        Arc::new(Finish),
    ]
}

/// Registry holding every built-in ability
pub fn default_registry(timeout: Duration) -> AbilityRegistry {
    let mut registry = AbilityRegistry::new(timeout);
    registry.register_all(builtin_abilities());
    registry
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_has_all_builtins() {
        let registry = default_registry(Duration::from_secs(5));
        assert_eq!(registry.len(), 5);
        for name in ["write_file", "read_file", "list_files", "run_python_file", "finish"] {
            assert!(registry.contains(name), "missing {}", name);
        }
    }

    #[test]
    fn test_builtin_categories() {
        let registry = default_registry(Duration::from_secs(5));
        let grouped = registry.describe_all();
        assert_eq!(grouped[FILE_SYSTEM].len(), 3);
        assert_eq!(grouped["general"].len(), 2);
    }
}
