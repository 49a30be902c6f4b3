use otbor_core::{
    messaging::types::TextMessage, utils::AuditEvent, wizard::StepResult, Result,
};

use crate::router::AppState;

use super::{display_name, send};

/// Free text is only ever input for the actor's pending dialogue.
pub async fn handle_text(state: &AppState, msg: TextMessage) -> Result<()> {
    if !state.wizard.has_pending(msg.user_id).await? {
        return Ok(());
    }
    let role = state.role(msg.user_id).await?;
    let reply = match state.wizard.advance(msg.user_id, &role, &msg.text).await? {
        StepResult::NoDialogue => return Ok(()),
        StepResult::Completed {
            kind,
            summary,
            reply,
        } => {
            state.audit.record(AuditEvent::wizard(
                msg.user_id.0,
                display_name(msg.username.as_deref()),
                kind.as_str(),
                &summary,
            ));
            reply
        }
        StepResult::Rejected(reply)
        | StepResult::Advanced(reply)
        | StepResult::Aborted(reply)
        | StepResult::Cancelled(reply) => reply,
    };
    send(state, msg.chat_id, reply).await
}
