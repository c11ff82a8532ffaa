//! Common types shared by the engine and the control protocol

use crate::errors::AutomationError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_items_timeout_ms() -> u64 {
    5000
}

fn default_modal_timeout_ms() -> u64 {
    3000
}

fn default_close_timeout_ms() -> u64 {
    1500
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_add_confirm_timeout_ms() -> u64 {
    2000
}

/// Per-run settings, fixed once a run starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationConfig {
    /// Pause after every click
    pub step_delay_ms: u64,
    pub max_items_per_category: usize,
    /// How many times to scroll for lazily rendered items
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_scrolls: Option<u32>,
    #[serde(default = "default_items_timeout_ms")]
    pub items_timeout_ms: u64,
    #[serde(default = "default_modal_timeout_ms")]
    pub modal_timeout_ms: u64,
    #[serde(default = "default_close_timeout_ms")]
    pub close_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// How long the cart counter may take to reflect an add
    #[serde(default = "default_add_confirm_timeout_ms")]
    pub add_confirm_timeout_ms: u64,
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            step_delay_ms: 500,
            max_items_per_category: 5,
            max_scrolls: None,
            items_timeout_ms: default_items_timeout_ms(),
            modal_timeout_ms: default_modal_timeout_ms(),
            close_timeout_ms: default_close_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            add_confirm_timeout_ms: default_add_confirm_timeout_ms(),
        }
    }
}

impl AutomationConfig {
    pub fn validate(&self) -> Result<(), AutomationError> {
        if self.step_delay_ms == 0 {
            return Err(AutomationError::InvalidConfig(
                "stepDelayMs must be greater than 0".into(),
            ));
        }
        if self.max_items_per_category == 0 {
            return Err(AutomationError::InvalidConfig(
                "maxItemsPerCategory must be greater than 0".into(),
            ));
        }
        if self.max_scrolls == Some(0) {
            return Err(AutomationError::InvalidConfig(
                "maxScrolls must be greater than 0 when set".into(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(AutomationError::InvalidConfig(
                "pollIntervalMs must be greater than 0".into(),
            ));
        }
        Ok(())
    }

    pub fn step_delay(&self) -> Duration {
        Duration::from_millis(self.step_delay_ms)
    }

    pub fn items_timeout(&self) -> Duration {
        Duration::from_millis(self.items_timeout_ms)
    }

    pub fn modal_timeout(&self) -> Duration {
        Duration::from_millis(self.modal_timeout_ms)
    }

    pub fn close_timeout(&self) -> Duration {
        Duration::from_millis(self.close_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn add_confirm_timeout(&self) -> Duration {
        Duration::from_millis(self.add_confirm_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RunState {
    #[default]
    Idle,
    Running,
    Stopped,
    Completed,
    Failed,
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Stopped | RunState::Completed | RunState::Failed
        )
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunState::Idle => "idle",
            RunState::Running => "running",
            RunState::Stopped => "stopped",
            RunState::Completed => "completed",
            RunState::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub current: usize,
    pub total: usize,
}

/// Snapshot of the engine state; copies are handed out, never references
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationStatus {
    pub state: RunState,
    pub items_count: usize,
    pub total_value: f64,
    pub progress: Progress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warning,
    Error,
    Success,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LogLevel::Info => "info",
            LogLevel::Warning => "warning",
            LogLevel::Error => "error",
            LogLevel::Success => "success",
        };
        f.write_str(s)
    }
}
