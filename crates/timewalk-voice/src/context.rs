//! Per-connection guide context: location, time period and conversation phase.
//!
//! Overwritten field by field from client messages; the latest value wins and
//! no history is kept. The dialogue engine reads a snapshot of it at the start
//! of every generation round.

use crate::protocol::{LocationUpdate, TimePeriodUpdate};
use crate::tools::ToolKind;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Conversation phase. Selects the instruction template and the tool subset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Spinning the globe, choosing a place and an era.
    #[default]
    #[serde(alias = "globe-selection")]
    GlobeSelection,
    /// The user confirmed; the guide must start world generation.
    Launching,
    /// The world is being generated; the guide narrates.
    Loading,
    /// Inside the generated world.
    Exploring,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::GlobeSelection => "globe_selection",
            Phase::Launching => "launching",
            Phase::Loading => "loading",
            Phase::Exploring => "exploring",
        }
    }

    /// Tools the model may call in this phase.
    pub fn allowed_tools(self) -> &'static [ToolKind] {
        use ToolKind::*;
        match self {
            Phase::GlobeSelection => &[SuggestLocation, GenerateFact, TriggerWorldGeneration],
            Phase::Launching => &[TriggerWorldGeneration, SelectMusic],
            Phase::Loading => &[SelectMusic, GenerateLoadingMessages, CompleteTransition],
            Phase::Exploring => &[GenerateFact, SelectMusic, SummarizeSession],
        }
    }

    /// Whether the first round of a cycle must be a tool call.
    pub fn forces_tool_call(self) -> bool {
        matches!(self, Phase::Launching)
    }

    /// Phase-specific behavior paragraph of the instructions.
    pub fn behavior(self) -> &'static str {
        match self {
            Phase::GlobeSelection => {
                "The user is spinning the globe. Greet them, and when they pick a place \
                 and an era share two or three fascinating facts, then ask whether they \
                 would like to step inside. If they name a place, call suggest_location \
                 with its coordinates. If they say yes, call trigger_world_generation."
            }
            Phase::Launching => {
                "The user has confirmed the journey. Call trigger_world_generation now \
                 with a vivid scene description for the chosen place and era, and queue \
                 fitting music with select_music. Do not reply with text only."
            }
            Phase::Loading => {
                "The world is being built. Narrate a rich, immersive picture of the \
                 destination: its sounds, people and daily life. Keep talking until the \
                 world is ready. Use generate_loading_messages for short captions and \
                 select_music for the soundtrack. When told the world is ready, call \
                 complete_transition."
            }
            Phase::Exploring => {
                "The user is inside the world. Be a tour guide: point out features, \
                 answer questions, and share facts with generate_fact. Keep replies to \
                 two or three sentences. When the user wants to leave, call \
                 summarize_session."
            }
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GuideContext {
    pub location_name: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub time_period: String,
    pub year: Option<i32>,
    pub phase: Phase,
}

impl Default for GuideContext {
    fn default() -> Self {
        Self {
            location_name: "Not selected".to_string(),
            lat: None,
            lng: None,
            time_period: "Not selected".to_string(),
            year: None,
            phase: Phase::GlobeSelection,
        }
    }
}

impl GuideContext {
    /// Apply a `context` message. Absent fields keep their current value.
    pub fn apply(&mut self, location: Option<&LocationUpdate>, time_period: Option<&TimePeriodUpdate>) {
        if let Some(loc) = location {
            if let Some(name) = loc.name.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
                self.location_name = name.to_string();
            }
            if loc.lat.is_some() {
                self.lat = loc.lat;
            }
            if loc.lng.is_some() {
                self.lng = loc.lng;
            }
        }
        if let Some(tp) = time_period {
            if let Some(label) = tp.label.as_deref().map(str::trim).filter(|l| !l.is_empty()) {
                self.time_period = label.to_string();
            }
            if tp.year.is_some() {
                self.year = tp.year;
            }
        }
    }

    pub fn set_phase(&mut self, phase: Phase) {
        self.phase = phase;
    }

    /// Human-readable block for the instruction template.
    pub fn describe(&self) -> String {
        let coords = match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => format!(" ({:.4}, {:.4})", lat, lng),
            _ => String::new(),
        };
        let year = match self.year {
            Some(y) if y < 0 => format!(" ({} BCE)", -y),
            Some(y) => format!(" ({})", y),
            None => String::new(),
        };
        format!(
            "- Location: {}{}\n- Time Period: {}{}\n- Phase: {}",
            self.location_name, coords, self.time_period, year, self.phase
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn latest_value_wins_field_by_field() {
        let mut ctx = GuideContext::default();
        ctx.apply(
            Some(&LocationUpdate {
                name: Some("Rome, Italy".into()),
                lat: Some(41.9),
                lng: Some(12.5),
            }),
            None,
        );
        ctx.apply(
            None,
            Some(&TimePeriodUpdate {
                label: Some("Imperial Rome".into()),
                year: Some(100),
            }),
        );
        ctx.apply(
            Some(&LocationUpdate {
                name: None,
                lat: Some(40.0),
                lng: None,
            }),
            None,
        );
        assert_eq!(ctx.location_name, "Rome, Italy");
        assert_eq!(ctx.lat, Some(40.0));
        assert_eq!(ctx.lng, Some(12.5));
        assert_eq!(ctx.time_period, "Imperial Rome");
        assert_eq!(ctx.phase, Phase::GlobeSelection);
    }

    #[test]
    fn describe_mentions_phase_and_era() {
        let mut ctx = GuideContext::default();
        ctx.time_period = "Old Kingdom".into();
        ctx.year = Some(-2560);
        ctx.set_phase(Phase::Loading);
        let text = ctx.describe();
        assert!(text.contains("2560 BCE"));
        assert!(text.contains("Phase: loading"));
    }

    #[test]
    fn every_phase_allows_at_least_one_tool() {
        for phase in [Phase::GlobeSelection, Phase::Launching, Phase::Loading, Phase::Exploring] {
            assert!(!phase.allowed_tools().is_empty());
            assert_eq!(phase.forces_tool_call(), phase == Phase::Launching);
        }
        assert!(Phase::Loading.allowed_tools().contains(&ToolKind::CompleteTransition));
        assert!(!Phase::GlobeSelection.allowed_tools().contains(&ToolKind::SummarizeSession));
    }
}
