//! Turns raw request parameters into a canonical [`CommandSet`].

use std::collections::HashMap;

use tracing::trace;

use crate::domain::{CommandSet, CommandSpec, ProcessorSpec};

/// Parses request parameters against the commands advertised by the
/// installed processors.
///
/// Unknown names and invalid values are dropped rather than reported, so a
/// malformed parameter degrades the request instead of failing it. When the
/// same name appears more than once the last valid value wins.
#[derive(Debug, Clone)]
pub struct CommandNormalizer {
    specs: HashMap<&'static str, CommandSpec>,
}

impl CommandNormalizer {
    pub fn new<'a, I>(processors: I) -> Self
    where
        I: IntoIterator<Item = &'a ProcessorSpec>,
    {
        let mut specs = HashMap::new();
        for processor in processors {
            for spec in processor.commands {
                specs.insert(spec.name, *spec);
            }
        }
        Self { specs }
    }

    /// Whether any installed processor understands `name`.
    pub fn recognizes(&self, name: &str) -> bool {
        self.specs.contains_key(name.to_ascii_lowercase().as_str())
    }

    pub fn normalize<I, K, V>(&self, parameters: I) -> CommandSet
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        let mut commands = CommandSet::new();
        for (name, value) in parameters {
            let name = name.as_ref().trim().to_ascii_lowercase();
            let Some(spec) = self.specs.get(name.as_str()) else {
                continue;
            };
            match spec.parse(value.as_ref()) {
                Some(command) => {
                    commands.insert(command);
                }
                None => {
                    trace!(
                        target = "application::normalizer",
                        command = %name,
                        "dropping invalid command value"
                    );
                }
            }
        }
        commands
    }

    /// Normalize a raw (still percent-encoded) query string.
    pub fn normalize_query(&self, query: &str) -> CommandSet {
        self.normalize(url::form_urlencoded::parse(query.as_bytes()))
    }
}
