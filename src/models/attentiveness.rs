use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "camelCase")]
pub enum AttentivenessState {
    /// Rest state before and after a session.
    #[default]
    Idle,
    /// Session started, first classification still pending.
    Analyzing,
    Focused,
    Distracted,
    Away,
}

impl AttentivenessState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttentivenessState::Idle => "Idle",
            AttentivenessState::Analyzing => "Analyzing",
            AttentivenessState::Focused => "Focused",
            AttentivenessState::Distracted => "Distracted",
            AttentivenessState::Away => "Away",
        }
    }

    /// Distracted and Away are the states that warrant spoken feedback.
    pub fn is_negative(&self) -> bool {
        matches!(
            self,
            AttentivenessState::Distracted | AttentivenessState::Away
        )
    }
}

impl std::fmt::Display for AttentivenessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
