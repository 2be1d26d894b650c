use serde::{Deserialize, Serialize};

/// Device status mirrored on `childs/{childId}.currentStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChildStatus {
    Active,
    Alert,
    Offline,
}

impl ChildStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChildStatus::Active => "ACTIVE",
            ChildStatus::Alert => "ALERT",
            ChildStatus::Offline => "OFFLINE",
        }
    }
}

impl std::fmt::Display for ChildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
