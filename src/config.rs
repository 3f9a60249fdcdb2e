use serde::{Deserialize, Serialize};

/// What a save does when a patch targets a primary key that has no row.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MissingRowPolicy {
    /// Insert a new row, keeping the supplied primary key.
    #[default]
    Insert,
    /// Fail with [`Error::NotFound`](crate::Error::NotFound).
    Fail,
}

/// What a save does with patch keys that are neither columns nor relations.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UnknownFieldPolicy {
    #[default]
    Reject,
    /// Drop the key and log a warning.
    Ignore,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct ManagerConfig {
    /// Deepest patch nesting a save accepts, the root being depth 0.
    pub max_depth: usize,
    pub missing_rows: MissingRowPolicy,
    pub unknown_fields: UnknownFieldPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_depth: 32,
            missing_rows: MissingRowPolicy::default(),
            unknown_fields: UnknownFieldPolicy::default(),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{ManagerConfig, MissingRowPolicy, UnknownFieldPolicy};

    #[test]
    fn test_partial_config() {
        let config: ManagerConfig =
            serde_json::from_str(r#"{ "unknown_fields": "ignore" }"#).expect("Failed to parse");

        assert_eq!(config.max_depth, 32);
        assert_eq!(config.missing_rows, MissingRowPolicy::Insert);
        assert_eq!(config.unknown_fields, UnknownFieldPolicy::Ignore);
    }
}
