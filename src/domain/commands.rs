//! Transform commands and their canonical form.

use std::collections::BTreeMap;
use std::fmt;

/// A single named transform directive, e.g. `width=300`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command {
    pub name: String,
    pub value: String,
}

impl Command {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.name, self.value)
    }
}

/// Commands for one request, ordered by name with at most one value per name.
///
/// Two sets holding the same name/value pairs are equal and serialize to the
/// same canonical string regardless of insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CommandSet {
    commands: BTreeMap<String, String>,
}

impl CommandSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a command, replacing any previous value for the same name.
    pub fn insert(&mut self, command: Command) -> Option<String> {
        self.commands.insert(command.name, command.value)
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.commands.remove(name)
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.commands.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.commands.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Iterate `(name, value)` pairs in canonical (name) order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.commands
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    /// Owned commands in canonical order.
    pub fn to_commands(&self) -> Vec<Command> {
        self.iter()
            .map(|(name, value)| Command::new(name, value))
            .collect()
    }

    /// Deterministic form-urlencoded serialization used for cache keys.
    pub fn canonical(&self) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(self.iter())
            .finish()
    }
}

impl FromIterator<Command> for CommandSet {
    fn from_iter<T: IntoIterator<Item = Command>>(iter: T) -> Self {
        let mut set = CommandSet::new();
        for command in iter {
            set.insert(command);
        }
        set
    }
}

impl fmt::Display for CommandSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form_ignores_insertion_order() {
        let a: CommandSet = [Command::new("width", "300"), Command::new("format", "webp")]
            .into_iter()
            .collect();
        let b: CommandSet = [Command::new("format", "webp"), Command::new("width", "300")]
            .into_iter()
            .collect();

        assert_eq!(a, b);
        assert_eq!(a.canonical(), "format=webp&width=300");
    }

    #[test]
    fn insert_replaces_previous_value() {
        let mut set = CommandSet::new();
        set.insert(Command::new("width", "100"));
        let previous = set.insert(Command::new("width", "200"));

        assert_eq!(previous.as_deref(), Some("100"));
        assert_eq!(set.get("width"), Some("200"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn canonical_escapes_reserved_characters() {
        let set: CommandSet = [Command::new("rxy", "0.5,0.25")].into_iter().collect();
        assert_eq!(set.canonical(), "rxy=0.5%2C0.25");
    }

    #[test]
    fn empty_set_serializes_to_empty_string() {
        assert_eq!(CommandSet::new().canonical(), "");
    }
}
