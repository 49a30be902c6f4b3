//! Telegram HTML helpers: escaping, deep links, slot lines.

use crate::{directory::Faculty, slots::InterviewerSlot};

/// Escape HTML special characters for Telegram HTML parse mode.
pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

pub fn code(text: &str) -> String {
    format!("<code>{}</code>", escape_html(text))
}

pub fn bold(text: &str) -> String {
    format!("<b>{}</b>", escape_html(text))
}

/// `https://t.me/<bot>?start=inv_<token>`.
pub fn invite_link(bot_username: &str, token: &str) -> String {
    let bot = bot_username.trim_start_matches('@');
    format!("https://t.me/{bot}?start=inv_{token}")
}

pub fn truncate_one_line(text: &str, max_len: usize) -> String {
    let cleaned = text.replace('\n', " ").trim().to_string();
    if cleaned.chars().count() <= max_len {
        return cleaned;
    }
    format!("{}...", cleaned.chars().take(max_len).collect::<String>())
}

/// One line of the interviewer list: status mark, tab, experience and who holds it.
pub fn slot_line(slot: &InterviewerSlot) -> String {
    let mark = if slot.is_claimed() { "✅" } else { "⏳" };
    let mut line = format!(
        "{mark} {} ({})",
        bold(&slot.tab_name),
        slot.experience_kind.label()
    );
    match (&slot.claimed_username, slot.claimed_by) {
        (Some(name), _) => line.push_str(&format!(" - @{}", escape_html(name))),
        (None, Some(id)) => line.push_str(&format!(" - id {id}")),
        (None, None) => {}
    }
    line
}

/// Numbered faculty list, as used by the "pick a faculty" wizard steps.
pub fn numbered_faculties(faculties: &[Faculty]) -> String {
    faculties
        .iter()
        .enumerate()
        .map(|(i, f)| format!("{}. {} ({})", i + 1, escape_html(&f.title), code(&f.slug)))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExperienceKind, FacultyId, SlotId, UserId};

    #[test]
    fn escapes_html() {
        let s = r#"<a href="x&y">"#;
        assert_eq!(escape_html(s), "&lt;a href=&quot;x&amp;y&quot;&gt;");
    }

    #[test]
    fn builds_deep_links() {
        assert_eq!(
            invite_link("@otbor_bot", "abc"),
            "https://t.me/otbor_bot?start=inv_abc"
        );
    }

    #[test]
    fn truncates_on_chars_not_bytes() {
        assert_eq!(truncate_one_line("привет\nмир", 6), "привет...");
        assert_eq!(truncate_one_line(" short ", 10), "short");
    }

    #[test]
    fn slot_lines_show_status() {
        let mut slot = InterviewerSlot {
            slot_id: SlotId(1),
            faculty_id: FacultyId(1),
            source_sheet_id: "s".to_string(),
            tab_name: "Ivanov <1>".to_string(),
            experience_kind: ExperienceKind::Experienced,
            claimed_by: None,
            claimed_username: None,
            invite_token: None,
        };
        assert_eq!(slot_line(&slot), "⏳ <b>Ivanov &lt;1&gt;</b> (experienced)");

        slot.claimed_by = Some(UserId(5));
        assert!(slot_line(&slot).ends_with(" - id 5"));
        slot.claimed_username = Some("ivan".to_string());
        assert!(slot_line(&slot).starts_with("✅"));
        assert!(slot_line(&slot).ends_with(" - @ivan"));
    }
}
