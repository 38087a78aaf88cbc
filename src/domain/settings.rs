use crate::domain::item::ProjectId;
use crate::error::{BoardError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tokio::fs;

/// Unit the host reports estimates in. Board figures follow the requested
/// card fields instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EstimateUnits {
    #[default]
    Hours,
    StoryPoints,
    /// Hours plus story points when story points are switched on
    Both,
}

/// Board configuration owned by the host application
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardSettings {
    /// Maximum number of cards on one board; 0 means unlimited
    pub board_items_limit: u32,
    pub estimate_units: EstimateUnits,
    pub story_points_on: bool,
    pub auto_assign_on_move: bool,
    pub hide_closed_issues_data: bool,
    pub allow_inline_comments: bool,
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            board_items_limit: 500,
            estimate_units: EstimateUnits::Hours,
            story_points_on: false,
            auto_assign_on_move: false,
            hide_closed_issues_data: false,
            allow_inline_comments: false,
        }
    }
}

impl BoardSettings {
    pub fn item_limit(&self) -> Option<usize> {
        match self.board_items_limit {
            0 => None,
            limit => Some(limit as usize),
        }
    }

    /// Story points are only ever shown once switched on, whatever the units
    pub fn story_points_enabled(&self) -> bool {
        self.story_points_on
    }
}

/// Source of board settings, optionally overridden per project
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    async fn settings(&self, project_id: Option<ProjectId>) -> Result<BoardSettings>;
}

/// Settings held in memory: a global snapshot plus project overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticSettings {
    pub global: BoardSettings,
    pub projects: HashMap<ProjectId, BoardSettings>,
}

impl StaticSettings {
    pub fn new(global: BoardSettings) -> Self {
        Self {
            global,
            projects: HashMap::new(),
        }
    }

    pub fn with_project(mut self, project_id: ProjectId, settings: BoardSettings) -> Self {
        self.projects.insert(project_id, settings);
        self
    }

    /// Loads settings from a JSON file
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(BoardError::ConfigError(format!(
                "settings file not found: {}",
                path.display()
            )));
        }

        let contents = fs::read_to_string(path).await?;
        let settings: StaticSettings = serde_json::from_str(&contents)?;
        Ok(settings)
    }

    pub async fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json).await?;
        Ok(())
    }
}

#[async_trait]
impl SettingsProvider for StaticSettings {
    async fn settings(&self, project_id: Option<ProjectId>) -> Result<BoardSettings> {
        let settings = project_id
            .and_then(|id| self.projects.get(&id))
            .unwrap_or(&self.global);
        Ok(settings.clone())
    }
}
