use std::fmt;

use serde::{Deserialize, Serialize};

/// Telegram user id (numeric). Doubles as the actor id of every dialogue.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(pub i64);

/// Telegram chat id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChatId(pub i64);

/// Telegram message id (numeric).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageId(pub i32);

/// A stable reference to a Telegram message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MessageRef {
    pub chat_id: ChatId,
    pub message_id: MessageId,
}

/// Durable identity of an interviewer slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotId(pub i64);

/// Durable identity of a faculty.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FacultyId(pub i64);

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for FacultyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which spreadsheet of a faculty a sheet id belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SheetKind {
    /// Interviewers without experience.
    NeOpyt,
    /// Experienced interviewers.
    Opyt,
    /// Summary sheet holding the participants tab.
    Svod,
}

impl SheetKind {
    pub const ALL: [SheetKind; 3] = [SheetKind::NeOpyt, SheetKind::Opyt, SheetKind::Svod];

    pub fn as_str(self) -> &'static str {
        match self {
            SheetKind::NeOpyt => "ne_opyt",
            SheetKind::Opyt => "opyt",
            SheetKind::Svod => "svod",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "ne_opyt" => Some(SheetKind::NeOpyt),
            "opyt" => Some(SheetKind::Opyt),
            "svod" => Some(SheetKind::Svod),
            _ => None,
        }
    }

    /// Interviewer sheets map onto an experience group; the summary sheet does not.
    pub fn experience(self) -> Option<ExperienceKind> {
        match self {
            SheetKind::NeOpyt => Some(ExperienceKind::NoExperience),
            SheetKind::Opyt => Some(ExperienceKind::Experienced),
            SheetKind::Svod => None,
        }
    }
}

impl fmt::Display for SheetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExperienceKind {
    NoExperience,
    Experienced,
}

impl ExperienceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ExperienceKind::NoExperience => "no_experience",
            ExperienceKind::Experienced => "experienced",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "no_experience" => Some(ExperienceKind::NoExperience),
            "experienced" => Some(ExperienceKind::Experienced),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            ExperienceKind::NoExperience => "without experience",
            ExperienceKind::Experienced => "experienced",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sheet_kind_parses_case_insensitively() {
        assert_eq!(SheetKind::parse(" OPYT "), Some(SheetKind::Opyt));
        assert_eq!(SheetKind::parse("ne_opyt"), Some(SheetKind::NeOpyt));
        assert_eq!(SheetKind::parse("summary"), None);
    }

    #[test]
    fn only_interviewer_sheets_carry_experience() {
        assert_eq!(
            SheetKind::NeOpyt.experience(),
            Some(ExperienceKind::NoExperience)
        );
        assert_eq!(SheetKind::Opyt.experience(), Some(ExperienceKind::Experienced));
        assert_eq!(SheetKind::Svod.experience(), None);
    }
}
