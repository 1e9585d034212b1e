//! Records generated replies in the session history.

use crate::models::{ChatDetail, SessionKey};
use crate::services::store::ChatStore;
use service_core::error::AppError;

/// Append one "ai" turn holding `text` to the session.
///
/// Failures are logged with the session id and reply size so the reply can be
/// reconciled by hand; the caller has already received the text.
pub async fn persist_reply(
    store: &dyn ChatStore,
    session_id: &SessionKey,
    text: String,
) -> Result<(), AppError> {
    let reply_len = text.len();
    let detail = ChatDetail::ai_reply(session_id.clone(), text);

    match store.append_detail(&detail).await {
        Ok(()) => {
            tracing::info!(
                session_id = %session_id,
                reply_len,
                "Persisted generated reply"
            );
            Ok(())
        }
        Err(e) => {
            tracing::error!(
                session_id = %session_id,
                reply_len,
                error = %e,
                "Failed to persist generated reply; history needs manual reconciliation"
            );
            Err(e)
        }
    }
}
