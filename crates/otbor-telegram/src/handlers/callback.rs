use std::collections::HashMap;

use otbor_core::{
    dialogue::StepKind,
    directory::Faculty,
    domain::{FacultyId, SlotId},
    errors::Error,
    formatting::{bold, code, escape_html, invite_link, slot_line},
    messaging::types::{CallbackQuery, Reply},
    slots::{IssuedInvite, RegistryError},
    utils::AuditEvent,
    Result,
};

use crate::router::AppState;

use super::{
    commands::{admin_menu, superadmin_menu, user_label},
    deny, display_name, send, send_long, NOT_AVAILABLE,
};

const UNKNOWN_ACTION: &str = "Unknown action.";

/// Callback data is `<action>|<argument>`. Every query is answered exactly once.
pub async fn handle_callback(state: &AppState, q: CallbackQuery) -> Result<()> {
    let (action, arg) = q.data.split_once('|').unwrap_or((q.data.as_str(), ""));
    let toast = match action {
        "reg" => registration(state, &q, arg).await?,
        "wiz" if arg == "cancel" => wizard_cancel(state, &q).await?,
        "wiz" => wizard_begin(state, &q, arg).await?,
        "menu" => menu(state, &q, arg).await?,
        "inv" => invite_one(state, &q, arg).await?,
        "links" => invite_all(state, &q, arg).await?,
        "slots" => list_slots(state, &q, arg).await?,
        "discover" => discover(state, &q, arg).await?,
        "list" => list_directory(state, &q, arg).await?,
        _ => Some(UNKNOWN_ACTION),
    };

    if let Err(e) = state
        .messenger
        .answer_callback_query(&q.callback_id, toast)
        .await
    {
        tracing::warn!(user_id = %q.user_id, error = %e, "failed to answer callback");
    }
    Ok(())
}

type Toast = Option<&'static str>;

async fn registration(state: &AppState, q: &CallbackQuery, arg: &str) -> Result<Toast> {
    let step = match arg {
        "confirm" => {
            state
                .registration
                .confirm(q.user_id, q.username.as_deref())
                .await?
        }
        "cancel" => state.registration.cancel(q.user_id).await?,
        _ => return Ok(Some(UNKNOWN_ACTION)),
    };
    state.audit.record(AuditEvent::registration(
        q.user_id.0,
        display_name(q.username.as_deref()),
        step.outcome.as_str(),
        step.slot.as_ref().map(|s| s.slot_id.0),
        None,
    ));
    replace_message(state, q, step.reply).await?;
    Ok(None)
}

async fn wizard_cancel(state: &AppState, q: &CallbackQuery) -> Result<Toast> {
    let had = state.wizard.cancel(q.user_id).await?;
    let html = if had { "Cancelled." } else { "Nothing to cancel." };
    replace_message(state, q, Reply::text(html)).await?;
    Ok(None)
}

async fn wizard_begin(state: &AppState, q: &CallbackQuery, arg: &str) -> Result<Toast> {
    let Some(kind) = StepKind::parse_wizard(arg) else {
        return Ok(Some(UNKNOWN_ACTION));
    };
    let role = state.role(q.user_id).await?;
    let allowed = if kind.is_superadmin_only() {
        role.is_superadmin()
    } else {
        role.is_admin()
    };
    if !allowed {
        deny(state, q.user_id, q.username.as_deref(), &q.data);
        return Ok(Some(NOT_AVAILABLE));
    }
    let prompt = state.wizard.begin(q.user_id, kind).await?;
    send(state, q.chat_id, prompt).await?;
    Ok(None)
}

async fn menu(state: &AppState, q: &CallbackQuery, arg: &str) -> Result<Toast> {
    let role = state.role(q.user_id).await?;
    let reply = match arg {
        "admin" if role.is_admin() => admin_menu(state, &role).await?,
        "superadmin" if role.is_superadmin() => superadmin_menu(),
        "admin" | "superadmin" => {
            deny(state, q.user_id, q.username.as_deref(), &q.data);
            return Ok(Some(NOT_AVAILABLE));
        }
        _ => return Ok(Some(UNKNOWN_ACTION)),
    };
    send(state, q.chat_id, reply).await?;
    Ok(None)
}

async fn invite_one(state: &AppState, q: &CallbackQuery, arg: &str) -> Result<Toast> {
    let Ok(slot_id) = arg.parse::<i64>().map(SlotId) else {
        return Ok(Some(UNKNOWN_ACTION));
    };
    let role = state.role(q.user_id).await?;
    if !role.is_admin() {
        deny(state, q.user_id, q.username.as_deref(), &q.data);
        return Ok(Some(NOT_AVAILABLE));
    }
    let Some(slot) = state.registry.get_slot(slot_id).await? else {
        return Ok(Some("Interviewer not found."));
    };
    if !role.can_manage(slot.faculty_id) {
        deny(state, q.user_id, q.username.as_deref(), &q.data);
        return Ok(Some(NOT_AVAILABLE));
    }

    match state.registry.issue_token(slot_id).await {
        Ok(invite) => {
            send_invite(state, q, &invite).await?;
            Ok(None)
        }
        Err(RegistryError::SlotAlreadyClaimed(_)) => Ok(Some("Already registered.")),
        Err(e) => Err(e.into()),
    }
}

async fn invite_all(state: &AppState, q: &CallbackQuery, arg: &str) -> Result<Toast> {
    let faculty = match managed_faculty(state, q, arg).await? {
        Ok(f) => f,
        Err(toast) => return Ok(Some(toast)),
    };
    let unclaimed = state.registry.list_unclaimed(faculty.id).await?;
    if unclaimed.is_empty() {
        let html = format!("Every interviewer of {} is registered.", bold(&faculty.title));
        send(state, q.chat_id, Reply::text(html)).await?;
        return Ok(None);
    }

    let mut issued = 0usize;
    for slot in unclaimed {
        match state.registry.issue_token(slot.slot_id).await {
            Ok(invite) => {
                send_invite(state, q, &invite).await?;
                issued += 1;
            }
            // Claimed while we were busy with the others.
            Err(RegistryError::SlotAlreadyClaimed(_)) => continue,
            Err(e) => return Err(e.into()),
        }
    }
    tracing::info!(faculty_id = %faculty.id, issued, "bulk invites issued");

    let html = format!(
        "Issued {issued} invite link(s) for {}. Earlier links of these interviewers no longer work.",
        bold(&faculty.title)
    );
    send(state, q.chat_id, Reply::text(html)).await?;
    Ok(None)
}

async fn send_invite(state: &AppState, q: &CallbackQuery, invite: &IssuedInvite) -> Result<()> {
    let bot = state.bot_username().await?;
    let link = invite_link(&bot, &invite.token);
    let html = format!(
        "🔗 Invite for {} ({})\n\n{}\n\nValid until {} UTC. The link works once.",
        bold(&invite.slot.tab_name),
        invite.slot.experience_kind.label(),
        escape_html(&link),
        invite.expires_at.format("%Y-%m-%d %H:%M")
    );
    send(state, q.chat_id, Reply::text(html)).await?;
    state.audit.record(AuditEvent::invite(
        q.user_id.0,
        display_name(q.username.as_deref()),
        invite.slot.slot_id.0,
        invite.slot.faculty_id.0,
    ));
    Ok(())
}

async fn list_slots(state: &AppState, q: &CallbackQuery, arg: &str) -> Result<Toast> {
    let faculty = match managed_faculty(state, q, arg).await? {
        Ok(f) => f,
        Err(toast) => return Ok(Some(toast)),
    };
    let slots = state.registry.list_by_faculty(faculty.id).await?;
    if slots.is_empty() {
        let html = format!(
            "No interviewers in {} yet. Set the sheets, then press 🔍 Discover.",
            bold(&faculty.title)
        );
        send(state, q.chat_id, Reply::text(html)).await?;
        return Ok(None);
    }

    let registered = slots.iter().filter(|s| s.is_claimed()).count();
    let mut html = format!(
        "{}: {registered} of {} registered",
        bold(&faculty.title),
        slots.len()
    );
    for slot in &slots {
        html.push('\n');
        html.push_str(&slot_line(slot));
    }
    send_long(state, q.chat_id, &html).await?;
    Ok(None)
}

async fn discover(state: &AppState, q: &CallbackQuery, arg: &str) -> Result<Toast> {
    let faculty = match managed_faculty(state, q, arg).await? {
        Ok(f) => f,
        Err(toast) => return Ok(Some(toast)),
    };
    let html = match state.discovery.discover(faculty.id).await {
        Ok(r) => format!(
            "{}: {} tabs, {} new, {} known.",
            bold(&faculty.title),
            r.found,
            r.created,
            r.known
        ),
        Err(e @ (Error::NotFound(_) | Error::External(_))) => {
            format!("⚠️ {}", escape_html(&e.to_string()))
        }
        Err(e) => return Err(e),
    };
    send(state, q.chat_id, Reply::text(html)).await?;
    Ok(None)
}

async fn list_directory(state: &AppState, q: &CallbackQuery, arg: &str) -> Result<Toast> {
    let role = state.role(q.user_id).await?;
    if !role.is_superadmin() {
        deny(state, q.user_id, q.username.as_deref(), &q.data);
        return Ok(Some(NOT_AVAILABLE));
    }

    let faculties = state.directory.list_faculties().await?;
    let html = match arg {
        "faculties" if faculties.is_empty() => "No faculties yet.".to_string(),
        "faculties" => {
            let mut html = "<b>Faculties</b>".to_string();
            for (i, f) in faculties.iter().enumerate() {
                let sheets = state.directory.sheets_for_faculty(f.id).await?;
                let kinds = if sheets.is_empty() {
                    "no sheets".to_string()
                } else {
                    sheets
                        .iter()
                        .map(|s| s.kind.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                html.push_str(&format!(
                    "\n{}. {} ({}) - {kinds}",
                    i + 1,
                    escape_html(&f.title),
                    code(&f.slug)
                ));
            }
            html
        }
        "admins" => {
            let admins = state.directory.list_admins().await?;
            if admins.is_empty() {
                "No faculty admins yet.".to_string()
            } else {
                let titles: HashMap<FacultyId, &str> =
                    faculties.iter().map(|f| (f.id, f.title.as_str())).collect();
                let mut html = "<b>Faculty admins</b>".to_string();
                for a in &admins {
                    let faculty = titles
                        .get(&a.faculty_id)
                        .map(|t| escape_html(t))
                        .unwrap_or_else(|| format!("#{}", a.faculty_id));
                    html.push_str(&format!(
                        "\n{} - {faculty}",
                        user_label(a.telegram_user_id, &a.display_name)
                    ));
                }
                html
            }
        }
        _ => return Ok(Some(UNKNOWN_ACTION)),
    };
    send_long(state, q.chat_id, &html).await?;
    Ok(None)
}

/// Parses a faculty id argument and checks the caller may act on it. The inner
/// `Err` is the toast to answer with.
async fn managed_faculty(
    state: &AppState,
    q: &CallbackQuery,
    arg: &str,
) -> Result<std::result::Result<Faculty, &'static str>> {
    let Ok(id) = arg.parse::<i64>().map(FacultyId) else {
        return Ok(Err(UNKNOWN_ACTION));
    };
    let role = state.role(q.user_id).await?;
    if !role.can_manage(id) {
        deny(state, q.user_id, q.username.as_deref(), &q.data);
        return Ok(Err(NOT_AVAILABLE));
    }
    Ok(state
        .directory
        .get_faculty(id)
        .await?
        .ok_or("Faculty not found."))
}

/// Edits the message that carried the button, so its keyboard goes away.
/// Falls back to a new message.
async fn replace_message(state: &AppState, q: &CallbackQuery, reply: Reply) -> Result<()> {
    if let (Some(msg), None) = (q.message, &reply.keyboard) {
        match state.messenger.edit_html(msg, &reply.html).await {
            Ok(()) => return Ok(()),
            Err(e) => tracing::debug!(user_id = %q.user_id, error = %e, "edit failed, sending instead"),
        }
    }
    send(state, q.chat_id, reply).await
}

#[cfg(test)]
mod tests {
    use otbor_core::{
        directory::AdminDirectory,
        domain::{ChatId, ExperienceKind, MessageId, MessageRef, UserId},
    };

    use super::*;
    use crate::router::tests::{harness, SUPERADMIN};

    fn query(user: UserId, data: &str) -> CallbackQuery {
        CallbackQuery {
            chat_id: ChatId(user.0),
            user_id: user,
            username: Some("root".to_string()),
            callback_id: "cb".to_string(),
            data: data.to_string(),
            message: Some(MessageRef {
                chat_id: ChatId(user.0),
                message_id: MessageId(10),
            }),
        }
    }

    #[tokio::test]
    async fn every_query_is_answered() {
        let h = harness();
        for data in ["", "nonsense", "inv|abc", "links|x", "wiz|confirm_registration", "list|other"] {
            h.messenger.answers.lock().unwrap().clear();
            handle_callback(&h.state, query(SUPERADMIN, data)).await.unwrap();
            assert_eq!(h.messenger.answers.lock().unwrap().len(), 1, "{data}");
        }
    }

    #[tokio::test]
    async fn directory_lists_for_superadmin() {
        let h = harness();
        let math = h
            .directory
            .create_faculty("faculty-math", "Math", None)
            .await
            .unwrap();
        h.directory
            .assign_admin(math.id, UserId(50), "Anna <A>")
            .await
            .unwrap();

        handle_callback(&h.state, query(SUPERADMIN, "list|faculties"))
            .await
            .unwrap();
        let (html, _) = h.messenger.last_sent();
        assert!(html.contains("1. Math (<code>faculty-math</code>) - no sheets"));

        handle_callback(&h.state, query(SUPERADMIN, "list|admins"))
            .await
            .unwrap();
        let (html, _) = h.messenger.last_sent();
        assert!(html.contains("Anna &lt;A&gt; (<code>50</code>) - Math"));

        handle_callback(&h.state, query(UserId(50), "list|admins"))
            .await
            .unwrap();
        assert_eq!(
            h.messenger.last_answer().unwrap().1.as_deref(),
            Some(NOT_AVAILABLE)
        );
    }

    #[tokio::test]
    async fn claimed_slot_gets_no_new_invite() {
        let h = harness();
        let f = h
            .directory
            .create_faculty("faculty-f", "F", None)
            .await
            .unwrap();
        let slot = h
            .state
            .registry
            .create_slot(f.id, "sheet", "Ivanov", ExperienceKind::Experienced)
            .await
            .unwrap();
        let token = h.state.registry.issue_token(slot).await.unwrap().token;
        h.state.registry.claim(&token, UserId(100), None).await.unwrap();

        handle_callback(&h.state, query(SUPERADMIN, &format!("inv|{slot}")))
            .await
            .unwrap();
        assert_eq!(
            h.messenger.last_answer().unwrap().1.as_deref(),
            Some("Already registered.")
        );

        handle_callback(&h.state, query(SUPERADMIN, &format!("links|{}", f.id)))
            .await
            .unwrap();
        assert!(h.messenger.last_sent().0.contains("Every interviewer"));
    }

    #[tokio::test]
    async fn wizard_cancel_button_replaces_the_prompt() {
        let h = harness();
        handle_callback(&h.state, query(SUPERADMIN, "wiz|assign_admin"))
            .await
            .unwrap();
        handle_callback(&h.state, query(SUPERADMIN, "wiz|cancel"))
            .await
            .unwrap();
        assert_eq!(h.messenger.edited_html(), vec!["Cancelled.".to_string()]);
        assert!(!h.state.wizard.cancel(SUPERADMIN).await.unwrap());
    }
}
