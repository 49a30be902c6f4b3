use otbor_core::{
    domain::UserId,
    formatting::{bold, code, escape_html, slot_line, truncate_one_line},
    messaging::types::{Command, InlineButton, InlineKeyboard, Reply},
    registration::parse_start_payload,
    security::Role,
    utils::AuditEvent,
    Result,
};

use crate::router::AppState;

use super::{deny, display_name, send};

const FACULTY_LABEL_LEN: usize = 24;

pub(crate) fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

pub async fn handle_command(state: &AppState, cmd: Command) -> Result<()> {
    match cmd.name.as_str() {
        "start" => start(state, &cmd).await,
        "help" => help(state, &cmd).await,
        "admin" => {
            let role = state.role(cmd.user_id).await?;
            if !role.is_admin() {
                return refuse(state, &cmd).await;
            }
            send(state, cmd.chat_id, admin_menu(state, &role).await?).await
        }
        "superadmin" => {
            let role = state.role(cmd.user_id).await?;
            if !role.is_superadmin() {
                return refuse(state, &cmd).await;
            }
            send(state, cmd.chat_id, superadmin_menu()).await
        }
        "cancel" => {
            let had = state.wizard.cancel(cmd.user_id).await?;
            let html = if had { "Cancelled." } else { "Nothing to cancel." };
            send(state, cmd.chat_id, Reply::text(html)).await
        }
        "whoami" => whoami(state, &cmd).await,
        _ => send(state, cmd.chat_id, Reply::text("Unknown command. See /help.")).await,
    }
}

async fn start(state: &AppState, cmd: &Command) -> Result<()> {
    if let Some(token) = parse_start_payload(&cmd.args) {
        let step = state.registration.start(cmd.user_id, token).await?;
        if step.outcome.is_terminal() {
            state.audit.record(AuditEvent::registration(
                cmd.user_id.0,
                display_name(cmd.username.as_deref()),
                step.outcome.as_str(),
                step.slot.as_ref().map(|s| s.slot_id.0),
                Some("start"),
            ));
        }
        return send(state, cmd.chat_id, step.reply).await;
    }

    let role = state.role(cmd.user_id).await?;
    let html = "👋 Hello! This bot registers interviewers.\n\nOpen the invitation link your faculty admin sent you to register.";
    let mut rows = Vec::new();
    if role.is_admin() {
        rows.push(vec![InlineButton::new("🛠 Admin menu", "menu|admin")]);
    }
    if role.is_superadmin() {
        rows.push(vec![InlineButton::new("👑 Superadmin menu", "menu|superadmin")]);
    }
    let reply = if rows.is_empty() {
        Reply::text(html)
    } else {
        Reply::with_keyboard(html, InlineKeyboard::new(rows))
    };
    send(state, cmd.chat_id, reply).await
}

async fn help(state: &AppState, cmd: &Command) -> Result<()> {
    let role = state.role(cmd.user_id).await?;
    let mut html = String::from(
        "<b>Commands</b>\n/start - greeting, or registration via an invite link\n/whoami - your id and registration\n/cancel - drop the current dialogue",
    );
    if role.is_admin() {
        html.push_str("\n/admin - sheets, interviewers and invite links");
    }
    if role.is_superadmin() {
        html.push_str("\n/superadmin - faculties and admins");
    }
    send(state, cmd.chat_id, Reply::text(html)).await
}

async fn whoami(state: &AppState, cmd: &Command) -> Result<()> {
    let role = state.role(cmd.user_id).await?;
    let role_line = match &role {
        Role::Superadmin => "superadmin".to_string(),
        Role::FacultyAdmin(a) => match state.directory.get_faculty(a.faculty_id).await? {
            Some(f) => format!("admin of {}", bold(&f.title)),
            None => format!("admin of faculty #{}", a.faculty_id),
        },
        Role::Member => "member".to_string(),
    };
    let binding = match state.registration.binding(cmd.user_id).await? {
        Some(slot) => format!("Registered as interviewer: {}", slot_line(&slot)),
        None => "Not registered as an interviewer.".to_string(),
    };
    let html = format!(
        "Your id: {}\nRole: {role_line}\n{binding}",
        code(&cmd.user_id.to_string())
    );
    send(state, cmd.chat_id, Reply::text(html)).await
}

async fn refuse(state: &AppState, cmd: &Command) -> Result<()> {
    deny(state, cmd.user_id, cmd.username.as_deref(), &format!("/{}", cmd.name));
    send(state, cmd.chat_id, Reply::text("This command is not available.")).await
}

/// Wizard entries plus one row of faculty actions per faculty the admin manages.
pub(crate) async fn admin_menu(state: &AppState, role: &Role) -> Result<Reply> {
    let mut rows = vec![
        vec![InlineButton::new("📄 Set sheets", "wiz|set_sheets")],
        vec![InlineButton::new("📑 List tabs", "wiz|list_tabs")],
        vec![InlineButton::new(
            "👥 Import participants",
            "wiz|import_participants",
        )],
    ];

    let faculties = match role {
        Role::FacultyAdmin(a) => state
            .directory
            .get_faculty(a.faculty_id)
            .await?
            .into_iter()
            .collect(),
        Role::Superadmin => state.directory.list_faculties().await?,
        Role::Member => Vec::new(),
    };
    for f in &faculties {
        rows.push(vec![
            InlineButton::new(
                format!("🧑‍🏫 {}", truncate_one_line(&f.title, FACULTY_LABEL_LEN)),
                format!("slots|{}", f.id),
            ),
            InlineButton::new("🔍 Discover", format!("discover|{}", f.id)),
            InlineButton::new("🔗 Links", format!("links|{}", f.id)),
        ]);
    }

    let mut html = "<b>Admin menu</b>".to_string();
    if let Role::FacultyAdmin(a) = role {
        match faculties.first() {
            Some(f) => html.push_str(&format!("\nFaculty: {}", bold(&f.title))),
            None => html.push_str(&format!("\nFaculty #{} no longer exists.", a.faculty_id)),
        }
    }
    if !faculties.is_empty() {
        html.push_str("\nTap a faculty to see its interviewers.");
    }
    Ok(Reply::with_keyboard(html, InlineKeyboard::new(rows)))
}

pub(crate) fn superadmin_menu() -> Reply {
    Reply::with_keyboard(
        "<b>Superadmin menu</b>",
        InlineKeyboard::one_per_row(vec![
            InlineButton::new("➕ Create faculty", "wiz|create_faculty"),
            InlineButton::new("📄 Add sheet", "wiz|add_sheet"),
            InlineButton::new("👤 Assign admin", "wiz|assign_admin"),
            InlineButton::new("🏛 Faculties", "list|faculties"),
            InlineButton::new("👥 Admins", "list|admins"),
        ]),
    )
}

/// Renders a user id the way the menus show it.
pub(crate) fn user_label(id: UserId, name: &str) -> String {
    format!("{} ({})", escape_html(name), code(&id.to_string()))
}

#[cfg(test)]
mod tests {
    use otbor_core::{directory::AdminDirectory, domain::ChatId};

    use super::*;
    use crate::router::tests::{harness, SUPERADMIN};

    fn cmd(user: UserId, text: &str) -> Command {
        let (name, args) = parse_command(text);
        Command {
            chat_id: ChatId(user.0),
            user_id: user,
            username: None,
            name,
            args,
        }
    }

    #[test]
    fn parses_bot_suffix_and_args() {
        assert_eq!(
            parse_command("/start@otbor_bot inv_abc"),
            ("start".to_string(), "inv_abc".to_string())
        );
        assert_eq!(parse_command("/ADMIN"), ("admin".to_string(), String::new()));
        assert_eq!(
            parse_command("  /start   inv_x  "),
            ("start".to_string(), "inv_x".to_string())
        );
    }

    #[tokio::test]
    async fn plain_start_offers_menus_by_role() {
        let h = harness();
        handle_command(&h.state, cmd(UserId(42), "/start")).await.unwrap();
        let (html, kb) = h.messenger.last_sent();
        assert!(html.contains("invitation link"));
        assert!(kb.is_none());

        handle_command(&h.state, cmd(SUPERADMIN, "/start")).await.unwrap();
        let (_, kb) = h.messenger.last_sent();
        let kb = kb.unwrap();
        assert!(kb.buttons().any(|b| b.callback_data == "menu|admin"));
        assert!(kb.buttons().any(|b| b.callback_data == "menu|superadmin"));
    }

    #[tokio::test]
    async fn malformed_start_payload_gets_the_greeting() {
        let h = harness();
        handle_command(&h.state, cmd(UserId(42), "/start inv_<b>"))
            .await
            .unwrap();
        assert!(h.messenger.last_sent().0.contains("Hello"));
    }

    #[tokio::test]
    async fn faculty_admin_menu_is_scoped() {
        let h = harness();
        let math = h
            .directory
            .create_faculty("faculty-math", "Math", None)
            .await
            .unwrap();
        let bio = h
            .directory
            .create_faculty("faculty-bio", "Bio", None)
            .await
            .unwrap();
        h.directory
            .assign_admin(math.id, UserId(50), "Anna")
            .await
            .unwrap();

        handle_command(&h.state, cmd(UserId(50), "/admin")).await.unwrap();
        let (html, kb) = h.messenger.last_sent();
        assert!(html.contains("<b>Math</b>"));
        let kb = kb.unwrap();
        assert!(kb
            .buttons()
            .any(|b| b.callback_data == format!("slots|{}", math.id)));
        assert!(!kb
            .buttons()
            .any(|b| b.callback_data == format!("slots|{}", bio.id)));

        handle_command(&h.state, cmd(SUPERADMIN, "/admin")).await.unwrap();
        let (_, kb) = h.messenger.last_sent();
        assert!(kb
            .unwrap()
            .buttons()
            .any(|b| b.callback_data == format!("links|{}", bio.id)));
    }

    #[tokio::test]
    async fn admin_commands_are_refused_for_members() {
        let h = harness();
        handle_command(&h.state, cmd(UserId(42), "/admin")).await.unwrap();
        assert!(h.messenger.last_sent().0.contains("not available"));
        assert!(h.audit_log().contains("\"context\":\"/admin\""));
    }

    #[test]
    fn superadmin_menu_has_every_directory_action() {
        let menu = superadmin_menu();
        let data: Vec<_> = menu
            .keyboard
            .unwrap()
            .buttons()
            .map(|b| b.callback_data.clone())
            .collect();
        assert_eq!(
            data,
            [
                "wiz|create_faculty",
                "wiz|add_sheet",
                "wiz|assign_admin",
                "list|faculties",
                "list|admins"
            ]
        );
    }
}
