//! Filter actions to perform on matched mail

use serde::{Deserialize, Serialize};

/// Action to perform when a rule matches, `{"type", "value"?}`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterAction {
    #[serde(rename = "type")]
    pub action: FilterActionType,
    /// Target label name for `MoveToFolder`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Types of actions that can be performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterActionType {
    /// Add a user label to the mail
    MoveToFolder,
    /// Drop UNREAD
    MarkAsRead,
    /// Restore UNREAD
    MarkAsUnread,
}

impl FilterAction {
    /// Create a move to folder action
    pub fn move_to_folder(label: impl Into<String>) -> Self {
        Self {
            action: FilterActionType::MoveToFolder,
            value: Some(label.into()),
        }
    }

    /// Create a mark as read action
    pub fn mark_as_read() -> Self {
        Self {
            action: FilterActionType::MarkAsRead,
            value: None,
        }
    }

    /// Create a mark as unread action
    pub fn mark_as_unread() -> Self {
        Self {
            action: FilterActionType::MarkAsUnread,
            value: None,
        }
    }
}
