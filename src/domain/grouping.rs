use crate::domain::item::WorkItem;
use crate::error::{BoardError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Secondary row grouping inside the status columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GroupBy {
    #[default]
    None,
    Tracker,
    Project,
    AssignedTo,
    Author,
    Parent,
    FixedVersion,
    DayInState,
}

impl FromStr for GroupBy {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            // Status already is the column axis
            "" | "status" => Ok(Self::None),
            "tracker" => Ok(Self::Tracker),
            "project" => Ok(Self::Project),
            "assigned_to" => Ok(Self::AssignedTo),
            "author" => Ok(Self::Author),
            "parent" => Ok(Self::Parent),
            "fixed_version" => Ok(Self::FixedVersion),
            "day_in_state" => Ok(Self::DayInState),
            other => Err(BoardError::invalid_filter(
                "group_by",
                "",
                format!("cannot group by '{}'", other),
            )),
        }
    }
}

impl GroupBy {
    /// Swim-lane key of an issue; `None` when the board is not grouped
    pub fn key(&self, item: &WorkItem, as_of: DateTime<Utc>) -> Option<GroupKey> {
        let value = match self {
            Self::None => return None,
            Self::Tracker => Some(item.tracker_id.get()),
            Self::Project => Some(item.project_id.get()),
            Self::AssignedTo => item.assigned_to_id.map(|id| id.get()),
            Self::Author => Some(item.author_id.get()),
            Self::Parent => item.parent_id.map(|id| id.get()),
            Self::FixedVersion => item.fixed_version_id.map(|id| id.get()),
            Self::DayInState => Some(item.time_in_state(as_of).num_days() as u64),
        };
        Some(value.map(GroupKey::Value).unwrap_or(GroupKey::NoValue))
    }
}

/// Swim-lane key; lanes sort by value with the "no value" lane last
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupKey {
    Value(u64),
    NoValue,
}

/// Optional detail shown on a card
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CardField {
    Tracker,
    AssignedTo,
    Author,
    Project,
    FixedVersion,
    Parent,
    EstimatedHours,
    StoryPoints,
    DayInState,
    LastComment,
}

impl CardField {
    /// Estimates stay hidden until a query asks for them
    pub const DEFAULT: [CardField; 2] = [CardField::Tracker, CardField::AssignedTo];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Tracker => "tracker",
            Self::AssignedTo => "assigned_to",
            Self::Author => "author",
            Self::Project => "project",
            Self::FixedVersion => "fixed_version",
            Self::Parent => "parent",
            Self::EstimatedHours => "estimated_hours",
            Self::StoryPoints => "story_points",
            Self::DayInState => "day_in_state",
            Self::LastComment => "last_comment",
        }
    }
}

impl FromStr for CardField {
    type Err = BoardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "tracker" => Ok(Self::Tracker),
            "assigned_to" => Ok(Self::AssignedTo),
            "author" => Ok(Self::Author),
            "project" => Ok(Self::Project),
            "fixed_version" => Ok(Self::FixedVersion),
            "parent" => Ok(Self::Parent),
            "estimated_hours" => Ok(Self::EstimatedHours),
            "story_points" => Ok(Self::StoryPoints),
            "day_in_state" => Ok(Self::DayInState),
            "last_comment" => Ok(Self::LastComment),
            other => Err(BoardError::invalid_filter(other, "", "unknown card field")),
        }
    }
}

impl fmt::Display for CardField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
