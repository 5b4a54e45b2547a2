use serde::{Deserialize, Serialize};

/// What Apply-Deleted leaves behind for a key that vanished from the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Close the current version and flag it deleted. The key has no open
    /// version until it reappears.
    CloseOnly,
    /// Close and flag as above, then open a copy flagged deleted so the key
    /// keeps an open (tombstone) version.
    ReopenAsDeleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowComparison {
    AtMost,
    AtLeast,
}

/// Elapsed-time condition between the first and the last rejected attempt
/// of an amount-probing chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeWindow {
    pub comparison: WindowComparison,
    pub minutes: i64,
}

impl ProbeWindow {
    pub fn within(minutes: i64) -> Self {
        Self { comparison: WindowComparison::AtMost, minutes }
    }

    pub fn at_least(minutes: i64) -> Self {
        Self { comparison: WindowComparison::AtLeast, minutes }
    }

    /// The window as a duration. `None` when the minutes do not fit one.
    pub fn limit(&self) -> Option<chrono::Duration> {
        chrono::Duration::try_minutes(self.minutes)
    }

    pub fn admits(&self, elapsed: chrono::Duration) -> bool {
        // An unrepresentable limit is longer than any elapsed time.
        let Some(limit) = self.limit() else {
            return self.comparison == WindowComparison::AtMost;
        };
        match self.comparison {
            WindowComparison::AtMost => elapsed <= limit,
            WindowComparison::AtLeast => elapsed >= limit,
        }
    }
}

impl Default for ProbeWindow {
    fn default() -> Self {
        Self::within(20)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DwhConfig {
    /// Logical schema recorded in the meta table.
    pub schema: String,
    /// Prefix of every table the warehouse owns.
    pub table_prefix: String,
    pub delete_policy: DeletePolicy,
    pub probe_window: ProbeWindow,
    /// When set, city changes further apart than this are not flagged.
    pub city_window_minutes: Option<i64>,
    pub input_dir: String,
    pub archive_dir: String,
    pub archive: bool,
}

impl Default for DwhConfig {
    fn default() -> Self {
        Self {
            schema: "dwh".into(),
            table_prefix: "demo".into(),
            delete_policy: DeletePolicy::CloseOnly,
            probe_window: ProbeWindow::default(),
            city_window_minutes: None,
            input_dir: "./data".into(),
            archive_dir: "./archive".into(),
            archive: true,
        }
    }
}

impl DwhConfig {
    /// Load from a JSON file. Missing keys fall back to defaults.
    /// In tests, use DwhConfig::default().
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Cannot read {path}: {e}"))?;
        let config: DwhConfig = serde_json::from_str(&content)
            .map_err(|e| anyhow::anyhow!("Cannot parse {path}: {e}"))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.probe_window.minutes < 0 {
            anyhow::bail!("probe_window.minutes must not be negative");
        }
        if self.probe_window.limit().is_none() {
            anyhow::bail!("probe_window.minutes is out of range: {}", self.probe_window.minutes);
        }
        if let Some(m) = self.city_window_minutes {
            if m < 0 {
                anyhow::bail!("city_window_minutes must not be negative");
            }
            if chrono::Duration::try_minutes(m).is_none() {
                anyhow::bail!("city_window_minutes is out of range: {m}");
            }
        }
        // Table identifiers are validated when the registry is built.
        Ok(())
    }
}
