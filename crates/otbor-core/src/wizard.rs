//! Admin wizards: a per-actor cursor over a fixed sequence of text inputs.
//!
//! Input validation is done by the `parse_*` functions below, which never touch a
//! store. A rejected input leaves the dialogue exactly where it was.

use std::sync::Arc;

use crate::{
    dialogue::{DialogueStep, DialogueStore, PendingDialogue, StepKind},
    directory::{faculty_slug, sheet_of, AdminDirectory, Faculty},
    discovery::Discovery,
    domain::{SheetKind, UserId},
    errors::Error,
    formatting::{bold, code, escape_html, numbered_faculties},
    messaging::types::{InlineButton, InlineKeyboard, Reply},
    security::Role,
    sheets::{participants_from_rows, spreadsheet_id_from_input, spreadsheet_id_from_link, SpreadsheetReader},
    slots::SlotRegistry,
    Result,
};

pub const CANCEL_TEXT: &str = "❌ Cancel";

const MAX_TITLE_LEN: usize = 200;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StepResult {
    /// The actor has no open dialogue; the input is not for us.
    NoDialogue,
    /// Input did not validate. Same step, hint in the reply.
    Rejected(Reply),
    Advanced(Reply),
    /// Terminal side effect applied, dialogue deleted.
    Completed {
        kind: StepKind,
        summary: String,
        reply: Reply,
    },
    /// Terminal without side effect (e.g. the target vanished meanwhile), dialogue deleted.
    Aborted(Reply),
    Cancelled(Reply),
}

pub fn is_cancel(input: &str) -> bool {
    let t = input.trim();
    t.eq_ignore_ascii_case("/cancel") || t.starts_with("/cancel@") || t == CANCEL_TEXT
}

// ============== Input parsing ==============

/// `<faculty_slug> <ne_opyt_id> <opyt_id> <svod_id>`; ids may be links.
pub fn parse_set_sheets(input: &str) -> std::result::Result<(String, [String; 3]), String> {
    let parts: Vec<&str> = input.split_whitespace().collect();
    let [slug, ne_opyt, opyt, svod] = parts.as_slice() else {
        return Err(format!(
            "Send one line: {}",
            code("<faculty_slug> <ne_opyt_id> <opyt_id> <svod_id>")
        ));
    };
    let mut ids = Vec::with_capacity(3);
    for (kind, raw) in [("ne_opyt", ne_opyt), ("opyt", opyt), ("svod", svod)] {
        let id = spreadsheet_id_from_input(raw)
            .ok_or_else(|| format!("Cannot read the {kind} spreadsheet id from {}", code(raw)))?;
        ids.push(id);
    }
    let [a, b, c]: [String; 3] = ids
        .try_into()
        .map_err(|_| "Expected three spreadsheet ids".to_string())?;
    Ok((slug.to_string(), [a, b, c]))
}

/// `<faculty_slug> <ne_opyt|opyt>`.
pub fn parse_list_tabs(input: &str) -> std::result::Result<(String, SheetKind), String> {
    let hint = || format!("Send: {}", code("<faculty_slug> <ne_opyt|opyt>"));
    let parts: Vec<&str> = input.split_whitespace().collect();
    let [slug, kind] = parts.as_slice() else {
        return Err(hint());
    };
    match SheetKind::parse(kind) {
        Some(k) if k.experience().is_some() => Ok((slug.to_string(), k)),
        _ => Err(hint()),
    }
}

/// A single slug token.
pub fn parse_slug(input: &str) -> std::result::Result<String, String> {
    let parts: Vec<&str> = input.split_whitespace().collect();
    match parts.as_slice() {
        [slug] => Ok(slug.to_string()),
        _ => Err(format!("Send: {}", code("<faculty_slug>"))),
    }
}

pub fn parse_title(input: &str) -> std::result::Result<String, String> {
    let t = input.trim();
    if t.is_empty() {
        return Err("The title must not be empty.".to_string());
    }
    if t.chars().count() > MAX_TITLE_LEN {
        return Err(format!("The title must be at most {MAX_TITLE_LEN} characters."));
    }
    Ok(t.to_string())
}

/// `-` means "no description".
pub fn parse_description(input: &str) -> std::result::Result<Option<String>, String> {
    match input.trim() {
        "" => Err("Send a description, or - to skip.".to_string()),
        "-" => Ok(None),
        d => Ok(Some(d.to_string())),
    }
}

pub fn parse_sheet_link(input: &str) -> std::result::Result<String, String> {
    spreadsheet_id_from_link(input).ok_or_else(|| {
        "Send a Google Sheets link like https://docs.google.com/spreadsheets/d/&lt;id&gt;/edit".to_string()
    })
}

/// `1|2|3` or the kind's name.
pub fn parse_sheet_choice(input: &str) -> std::result::Result<SheetKind, String> {
    let kind = match input.trim() {
        "1" => Some(SheetKind::NeOpyt),
        "2" => Some(SheetKind::Opyt),
        "3" => Some(SheetKind::Svod),
        other => SheetKind::parse(other),
    };
    kind.ok_or_else(sheet_kind_prompt)
}

pub fn parse_user_id(input: &str) -> std::result::Result<UserId, String> {
    match input.trim().parse::<i64>() {
        Ok(id) if id > 0 => Ok(UserId(id)),
        _ => Err("Send the numeric Telegram id (a positive number).".to_string()),
    }
}

pub fn parse_display_name(input: &str) -> std::result::Result<String, String> {
    let t = input.trim();
    if t.is_empty() {
        return Err("The name must not be empty.".to_string());
    }
    Ok(t.to_string())
}

/// 1-based position in `faculties`, or an exact title (case-insensitive).
pub fn resolve_faculty<'a>(
    input: &str,
    faculties: &'a [Faculty],
) -> std::result::Result<&'a Faculty, String> {
    let t = input.trim();
    let found = match t.parse::<usize>() {
        Ok(n) if n >= 1 => faculties.get(n - 1),
        Ok(_) => None,
        Err(_) => {
            let wanted = t.to_lowercase();
            faculties.iter().find(|f| f.title.to_lowercase() == wanted)
        }
    };
    found.ok_or_else(|| "Send the faculty number from the list or its exact title.".to_string())
}

fn sheet_kind_prompt() -> String {
    "Choose the sheet type:\n1. ne_opyt (interviewers without experience)\n2. opyt (experienced interviewers)\n3. svod (summary)".to_string()
}

fn entry_prompt(kind: StepKind) -> String {
    match kind {
        StepKind::SetSheets => format!(
            "Send one line: {}\nIds may also be full Google Sheets links.",
            code("<faculty_slug> <ne_opyt_id> <opyt_id> <svod_id>")
        ),
        StepKind::ListTabs => format!("Send: {}", code("<faculty_slug> <ne_opyt|opyt>")),
        StepKind::ImportParticipants => format!("Send: {}", code("<faculty_slug>")),
        StepKind::CreateFaculty => "Send the faculty title.".to_string(),
        StepKind::AddSheet => "Send the Google Sheets link.".to_string(),
        StepKind::AssignAdmin => "Send the Telegram id of the new admin.".to_string(),
        StepKind::ConfirmRegistration => String::new(),
    }
}

fn with_cancel(html: String) -> Reply {
    Reply::with_keyboard(
        html,
        InlineKeyboard::new(vec![vec![InlineButton::new(CANCEL_TEXT, "wiz|cancel")]]),
    )
}

// ============== Engine ==============

pub struct WizardEngine {
    dialogues: DialogueStore,
    directory: Arc<dyn AdminDirectory>,
    reader: Arc<dyn SpreadsheetReader>,
    registry: Arc<SlotRegistry>,
    discovery: Arc<Discovery>,
    participants_tab: String,
}

impl WizardEngine {
    pub fn new(
        dialogues: DialogueStore,
        directory: Arc<dyn AdminDirectory>,
        reader: Arc<dyn SpreadsheetReader>,
        registry: Arc<SlotRegistry>,
        discovery: Arc<Discovery>,
        participants_tab: impl Into<String>,
    ) -> Self {
        Self {
            dialogues,
            directory,
            reader,
            registry,
            discovery,
            participants_tab: participants_tab.into(),
        }
    }

    /// Opens a wizard, replacing whatever the actor had pending.
    pub async fn begin(&self, actor: UserId, kind: StepKind) -> Result<Reply> {
        let step = DialogueStep::first(kind).ok_or_else(|| {
            Error::External(format!("{} has no admin entry step", kind.as_str()))
        })?;
        if let Some(prev) = self.dialogues.load(actor).await? {
            tracing::debug!(actor = %actor, previous = prev.kind().as_str(), "abandoning pending dialogue");
        }
        self.dialogues
            .save(&PendingDialogue::new(actor, step))
            .await?;
        tracing::info!(actor = %actor, kind = kind.as_str(), "wizard started");
        Ok(with_cancel(entry_prompt(kind)))
    }

    /// Drops the actor's dialogue. Returns whether there was one.
    pub async fn cancel(&self, actor: UserId) -> Result<bool> {
        let had = self.dialogues.load(actor).await?.is_some();
        self.dialogues.clear(actor).await?;
        Ok(had)
    }

    pub async fn has_pending(&self, actor: UserId) -> Result<bool> {
        Ok(self.dialogues.load(actor).await?.is_some())
    }

    pub async fn advance(&self, actor: UserId, role: &Role, input: &str) -> Result<StepResult> {
        let Some(dialogue) = self.dialogues.load(actor).await? else {
            return Ok(StepResult::NoDialogue);
        };
        if is_cancel(input) {
            self.dialogues.clear(actor).await?;
            return Ok(StepResult::Cancelled(Reply::text("Cancelled.")));
        }
        // Rights can be revoked while a wizard is open.
        if !may_continue(dialogue.kind(), role) {
            self.dialogues.clear(actor).await?;
            tracing::warn!(
                actor = %actor,
                kind = dialogue.kind().as_str(),
                "wizard dropped, role no longer allows it"
            );
            return Ok(StepResult::Aborted(Reply::text(
                "This action is no longer available to you.",
            )));
        }

        let result = self.step(actor, role, dialogue.step, input).await?;
        match &result {
            StepResult::Completed { kind, summary, .. } => {
                self.dialogues.clear(actor).await?;
                tracing::info!(actor = %actor, kind = kind.as_str(), summary = %summary, "wizard completed");
            }
            StepResult::Aborted(_) => self.dialogues.clear(actor).await?,
            _ => {}
        }
        Ok(result)
    }

    async fn next(&self, actor: UserId, step: DialogueStep, prompt: String) -> Result<StepResult> {
        self.dialogues.save(&PendingDialogue::new(actor, step)).await?;
        Ok(StepResult::Advanced(with_cancel(prompt)))
    }

    async fn step(
        &self,
        actor: UserId,
        role: &Role,
        step: DialogueStep,
        input: &str,
    ) -> Result<StepResult> {
        match step {
            DialogueStep::ConfirmRegistration { .. } => Ok(reject(
                "Use the buttons under the invitation to confirm or cancel.".to_string(),
            )),

            DialogueStep::SetSheets => {
                let (slug, [ne_opyt, opyt, svod]) = match parse_set_sheets(input) {
                    Ok(v) => v,
                    Err(hint) => return Ok(reject(hint)),
                };
                let faculty = match self.managed_faculty(role, &slug).await? {
                    Ok(f) => f,
                    Err(hint) => return Ok(reject(hint)),
                };
                for (kind, id) in [
                    (SheetKind::NeOpyt, &ne_opyt),
                    (SheetKind::Opyt, &opyt),
                    (SheetKind::Svod, &svod),
                ] {
                    self.directory.upsert_sheet(faculty.id, kind, id).await?;
                }
                Ok(completed(
                    StepKind::SetSheets,
                    format!("{}: {ne_opyt} {opyt} {svod}", faculty.slug),
                    format!(
                        "Sheets saved for {}.\nne_opyt: {}\nopyt: {}\nsvod: {}",
                        bold(&faculty.title),
                        code(&ne_opyt),
                        code(&opyt),
                        code(&svod)
                    ),
                ))
            }

            DialogueStep::ListTabs => {
                let (slug, kind) = match parse_list_tabs(input) {
                    Ok(v) => v,
                    Err(hint) => return Ok(reject(hint)),
                };
                let faculty = match self.managed_faculty(role, &slug).await? {
                    Ok(f) => f,
                    Err(hint) => return Ok(reject(hint)),
                };
                let (sheet_id, report) = match self.discovery.discover_kind(faculty.id, kind).await {
                    Ok(v) => v,
                    Err(e @ (Error::NotFound(_) | Error::External(_) | Error::Config(_))) => {
                        return Ok(reject(escape_html(&e.to_string())))
                    }
                    Err(e) => return Err(e),
                };
                let unclaimed: Vec<_> = self
                    .registry
                    .list_unclaimed(faculty.id)
                    .await?
                    .into_iter()
                    .filter(|s| s.source_sheet_id == sheet_id)
                    .collect();

                let mut html = format!(
                    "{} / {kind}: {} tabs, {} new, {} known.",
                    bold(&faculty.title),
                    report.found,
                    report.created,
                    report.known
                );
                let reply = if unclaimed.is_empty() {
                    html.push_str("\nEvery interviewer of this sheet is registered.");
                    Reply::text(html)
                } else {
                    html.push_str("\nCreate an invite link:");
                    let buttons = unclaimed
                        .iter()
                        .map(|s| InlineButton::new(format!("🔗 {}", s.tab_name), format!("inv|{}", s.slot_id)))
                        .collect();
                    Reply::with_keyboard(html, InlineKeyboard::one_per_row(buttons))
                };
                Ok(StepResult::Completed {
                    kind: StepKind::ListTabs,
                    summary: format!("{} {kind}: {} new", faculty.slug, report.created),
                    reply,
                })
            }

            DialogueStep::ImportParticipants => {
                let slug = match parse_slug(input) {
                    Ok(v) => v,
                    Err(hint) => return Ok(reject(hint)),
                };
                let faculty = match self.managed_faculty(role, &slug).await? {
                    Ok(f) => f,
                    Err(hint) => return Ok(reject(hint)),
                };
                let sheets = self.directory.sheets_for_faculty(faculty.id).await?;
                let Some(svod) = sheet_of(&sheets, SheetKind::Svod) else {
                    return Ok(reject("The svod sheet is not configured for this faculty.".to_string()));
                };
                let rows = match self
                    .reader
                    .read_rows(&svod.spreadsheet_id, &self.participants_tab)
                    .await
                {
                    Ok(rows) => rows,
                    Err(e) => {
                        return Ok(reject(escape_html(&format!(
                            "cannot read svod sheet tab {}: {e}",
                            self.participants_tab
                        ))))
                    }
                };
                let participants = participants_from_rows(&rows);
                if participants.is_empty() {
                    return Ok(reject(format!(
                        "No participants found in tab {}. It needs a vk_id column.",
                        code(&self.participants_tab)
                    )));
                }
                let stored = self
                    .directory
                    .replace_participants(faculty.id, &participants)
                    .await?;
                Ok(completed(
                    StepKind::ImportParticipants,
                    format!("{}: {stored} participants", faculty.slug),
                    format!("Imported {stored} participants into {}.", bold(&faculty.title)),
                ))
            }

            DialogueStep::CreateFacultyTitle => {
                let title = match parse_title(input) {
                    Ok(v) => v,
                    Err(hint) => return Ok(reject(hint)),
                };
                let slug = faculty_slug(&title);
                if self.directory.find_faculty_by_slug(&slug).await?.is_some() {
                    return Ok(reject(format!(
                        "Faculty {} already exists. Send another title.",
                        code(&slug)
                    )));
                }
                self.next(
                    actor,
                    DialogueStep::CreateFacultyDescription { title },
                    "Send a description, or - to skip.".to_string(),
                )
                .await
            }

            DialogueStep::CreateFacultyDescription { title } => {
                let description = match parse_description(input) {
                    Ok(v) => v,
                    Err(hint) => return Ok(reject(hint)),
                };
                let slug = faculty_slug(&title);
                match self
                    .directory
                    .create_faculty(&slug, &title, description.as_deref())
                    .await
                {
                    Ok(f) => Ok(completed(
                        StepKind::CreateFaculty,
                        f.slug.clone(),
                        format!("Faculty {} created, slug {}.", bold(&f.title), code(&f.slug)),
                    )),
                    Err(Error::Conflict(_)) => Ok(StepResult::Aborted(Reply::text(format!(
                        "Faculty {} already exists.",
                        code(&slug)
                    )))),
                    Err(e) => Err(e),
                }
            }

            DialogueStep::AddSheetLink => {
                let spreadsheet_id = match parse_sheet_link(input) {
                    Ok(v) => v,
                    Err(hint) => return Ok(reject(hint)),
                };
                let faculties = self.directory.list_faculties().await?;
                if faculties.is_empty() {
                    return Ok(StepResult::Aborted(Reply::text(
                        "There are no faculties yet. Create one first.",
                    )));
                }
                self.next(
                    actor,
                    DialogueStep::AddSheetFaculty { spreadsheet_id },
                    format!("Which faculty?\n{}", numbered_faculties(&faculties)),
                )
                .await
            }

            DialogueStep::AddSheetFaculty { spreadsheet_id } => {
                let faculties = self.directory.list_faculties().await?;
                let faculty = match resolve_faculty(input, &faculties) {
                    Ok(f) => f,
                    Err(hint) => return Ok(reject(hint)),
                };
                self.next(
                    actor,
                    DialogueStep::AddSheetKind {
                        spreadsheet_id,
                        faculty_id: faculty.id,
                        faculty_title: faculty.title.clone(),
                    },
                    sheet_kind_prompt(),
                )
                .await
            }

            DialogueStep::AddSheetKind {
                spreadsheet_id,
                faculty_id,
                faculty_title,
            } => {
                let kind = match parse_sheet_choice(input) {
                    Ok(v) => v,
                    Err(hint) => return Ok(reject(hint)),
                };
                match self
                    .directory
                    .upsert_sheet(faculty_id, kind, &spreadsheet_id)
                    .await
                {
                    Ok(_) => Ok(completed(
                        StepKind::AddSheet,
                        format!("{faculty_id} {kind} {spreadsheet_id}"),
                        format!(
                            "Sheet {} saved as {kind} for {}.",
                            code(&spreadsheet_id),
                            bold(&faculty_title)
                        ),
                    )),
                    Err(Error::NotFound(_)) => Ok(faculty_gone()),
                    Err(e) => Err(e),
                }
            }

            DialogueStep::AssignAdminUser => {
                let user_id = match parse_user_id(input) {
                    Ok(v) => v,
                    Err(hint) => return Ok(reject(hint)),
                };
                if self.directory.find_admin(user_id).await?.is_some() {
                    return Ok(reject(format!(
                        "User {user_id} is already an admin. Send another id."
                    )));
                }
                self.next(
                    actor,
                    DialogueStep::AssignAdminName { user_id },
                    "Send the admin's name.".to_string(),
                )
                .await
            }

            DialogueStep::AssignAdminName { user_id } => {
                let display_name = match parse_display_name(input) {
                    Ok(v) => v,
                    Err(hint) => return Ok(reject(hint)),
                };
                let faculties = self.directory.list_faculties().await?;
                if faculties.is_empty() {
                    return Ok(StepResult::Aborted(Reply::text(
                        "There are no faculties yet. Create one first.",
                    )));
                }
                self.next(
                    actor,
                    DialogueStep::AssignAdminFaculty {
                        user_id,
                        display_name,
                    },
                    format!("Which faculty?\n{}", numbered_faculties(&faculties)),
                )
                .await
            }

            DialogueStep::AssignAdminFaculty {
                user_id,
                display_name,
            } => {
                let faculties = self.directory.list_faculties().await?;
                let faculty = match resolve_faculty(input, &faculties) {
                    Ok(f) => f,
                    Err(hint) => return Ok(reject(hint)),
                };
                match self
                    .directory
                    .assign_admin(faculty.id, user_id, &display_name)
                    .await
                {
                    Ok(_) => Ok(completed(
                        StepKind::AssignAdmin,
                        format!("{user_id} -> {}", faculty.slug),
                        format!(
                            "{} ({user_id}) is now an admin of {}.",
                            escape_html(&display_name),
                            bold(&faculty.title)
                        ),
                    )),
                    Err(Error::Conflict(_)) => Ok(StepResult::Aborted(Reply::text(format!(
                        "User {user_id} is already an admin."
                    )))),
                    Err(Error::NotFound(_)) => Ok(faculty_gone()),
                    Err(e) => Err(e),
                }
            }
        }
    }

    /// Looks the faculty up and checks the actor may manage it. The inner `Err`
    /// is a user-facing hint.
    async fn managed_faculty(
        &self,
        role: &Role,
        slug: &str,
    ) -> Result<std::result::Result<Faculty, String>> {
        let Some(faculty) = self.directory.find_faculty_by_slug(slug).await? else {
            return Ok(Err(format!("Faculty {} not found.", code(slug))));
        };
        if !role.can_manage(faculty.id) {
            return Ok(Err(format!(
                "You can only manage your own faculty, not {}.",
                code(slug)
            )));
        }
        Ok(Ok(faculty))
    }
}

fn may_continue(kind: StepKind, role: &Role) -> bool {
    match kind {
        StepKind::ConfirmRegistration => true,
        k if k.is_superadmin_only() => role.is_superadmin(),
        _ => role.is_admin(),
    }
}

fn reject(hint: String) -> StepResult {
    StepResult::Rejected(with_cancel(hint))
}

fn completed(kind: StepKind, summary: String, html: String) -> StepResult {
    StepResult::Completed {
        kind,
        summary,
        reply: Reply::text(html),
    }
}

fn faculty_gone() -> StepResult {
    StepResult::Aborted(Reply::text("That faculty no longer exists."))
}
