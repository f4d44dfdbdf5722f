//! Performance test definitions
//!
//! The engine looks definitions up by id through [`TestDefinitionStore`].
//! Definitions come either from a standalone YAML/JSON file or from the
//! `performance_tests` section of the configuration file.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::file::is_yaml_file;
use crate::models::{PerformanceTest, TestId};

/// Read access to stored performance tests
pub trait TestDefinitionStore: Send + Sync {
    fn get(&self, id: TestId) -> Result<Option<PerformanceTest>>;
    fn list(&self) -> Result<Vec<PerformanceTest>>;
}

/// Fixed set of definitions held in memory
#[derive(Clone, Debug, Default)]
pub struct InMemoryDefinitions {
    tests: BTreeMap<TestId, PerformanceTest>,
}

impl InMemoryDefinitions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a definition
    pub fn insert(&mut self, test: PerformanceTest) {
        self.tests.insert(test.id, test);
    }
}

impl FromIterator<PerformanceTest> for InMemoryDefinitions {
    fn from_iter<I: IntoIterator<Item = PerformanceTest>>(iter: I) -> Self {
        let mut defs = Self::new();
        for test in iter {
            defs.insert(test);
        }
        defs
    }
}

impl TestDefinitionStore for InMemoryDefinitions {
    fn get(&self, id: TestId) -> Result<Option<PerformanceTest>> {
        Ok(self.tests.get(&id).cloned())
    }

    fn list(&self) -> Result<Vec<PerformanceTest>> {
        Ok(self.tests.values().cloned().collect())
    }
}

/// Accepted layouts of a definitions file
#[derive(Deserialize)]
#[serde(untagged)]
enum DefinitionsDocument {
    List(Vec<PerformanceTest>),
    Section {
        performance_tests: Vec<PerformanceTest>,
    },
}

/// Definitions loaded from a YAML or JSON file.
///
/// The file is either a bare list of tests or a mapping with a
/// `performance_tests` key, so a full config file works too.
pub struct FileDefinitions;

impl FileDefinitions {
    pub fn load(path: impl AsRef<Path>) -> Result<InMemoryDefinitions> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read definitions: {}", path.display()))?;

        let doc: DefinitionsDocument = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML definitions: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON definitions: {}", path.display()))?
        };

        let tests = match doc {
            DefinitionsDocument::List(tests) => tests,
            DefinitionsDocument::Section { performance_tests } => performance_tests,
        };

        let mut defs = InMemoryDefinitions::new();
        for test in tests {
            if defs.tests.contains_key(&test.id) {
                anyhow::bail!(
                    "Duplicate performance test id {} in {}",
                    test.id,
                    path.display()
                );
            }
            defs.insert(test);
        }
        Ok(defs)
    }
}
