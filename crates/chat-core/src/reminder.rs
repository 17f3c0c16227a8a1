use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ChatErrorCategory};

const PLAYER_ROLE: &str = "player";

/// Calendar entry type accepted by the reminders endpoint.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReminderKind {
    Reminder,
    Goal,
    Match,
    Training,
    Session,
}

impl ReminderKind {
    /// Kinds a viewer with `role` may create.
    pub fn allowed_for_role(role: Option<&str>) -> &'static [ReminderKind] {
        match role {
            Some(PLAYER_ROLE) => &[Self::Reminder, Self::Goal, Self::Training],
            _ => &[
                Self::Reminder,
                Self::Goal,
                Self::Match,
                Self::Training,
                Self::Session,
            ],
        }
    }
}

/// Reminder form input as entered by the viewer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReminderDraft {
    pub title: String,
    pub description: String,
    /// Calendar date as entered, passed through to the backend.
    pub date: String,
    #[serde(rename = "type")]
    pub kind: ReminderKind,
    /// Time-zone abbreviation or IANA name.
    pub timezone: String,
}

impl ReminderDraft {
    /// Check required fields and the role's allowed kinds.
    ///
    /// Returns the trimmed draft ready for submission.
    pub fn validate(&self, role: Option<&str>) -> Result<ReminderDraft, ChatError> {
        let title = required("title", &self.title)?;
        let description = required("description", &self.description)?;
        let date = required("date", &self.date)?;
        let timezone = required("timezone", &self.timezone)?;

        if !ReminderKind::allowed_for_role(role).contains(&self.kind) {
            return Err(ChatError::new(
                ChatErrorCategory::Validation,
                "reminder_kind_not_allowed",
                format!(
                    "{:?} entries cannot be created with role {}",
                    self.kind,
                    role.unwrap_or("<none>")
                ),
            ));
        }

        Ok(ReminderDraft {
            title,
            description,
            date,
            kind: self.kind,
            timezone,
        })
    }
}

fn required(field: &str, value: &str) -> Result<String, ChatError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ChatError::new(
            ChatErrorCategory::Validation,
            "reminder_field_required",
            format!("{field} is required"),
        ));
    }
    Ok(trimmed.to_owned())
}
