//! View Layer Interface
//!
//! Rendering is done by the embedding application. The engine reports what to
//! draw through [`ChatView`]; every call is made only while the conversation it
//! concerns is the one on screen, re-checked per event because the displayed
//! conversation can change in the middle of a stream.

use crate::model::{ApprovalRequest, CompletedMessage, Message};
use crate::trace::ThinkingTraceItem;

/// Rendering hooks implemented by the view layer
pub trait ChatView: Send + Sync {
    /// Conversation currently on screen, if any
    fn displayed_conversation(&self) -> Option<String>;

    /// Replace the client temp id of the user message with the canonical id
    fn confirm_user_message(&self, conversation_id: &str, temp_id: Option<&str>, user_message_id: &str);

    /// Redraw the thinking/tool trace
    fn render_trace(&self, conversation_id: &str, trace: &[ThinkingTraceItem], is_thinking: bool);

    /// Redraw the accumulated assistant content
    fn render_content(&self, conversation_id: &str, content: &str);

    /// Show a tool call waiting for approval
    fn render_approval(&self, _conversation_id: &str, _approval: &ApprovalRequest) {}

    /// Replace the placeholder with the final message
    fn finalize_message(&self, conversation_id: &str, completed: &CompletedMessage);

    /// Keep partial content visible, flagged incomplete with a reload action
    fn mark_incomplete(&self, conversation_id: &str, message_id: Option<&str>, content: &str);

    /// Drop the assistant placeholder from the transcript
    fn remove_placeholder(&self, conversation_id: &str);

    /// Re-create the placeholder for a recovered message if the view lost it
    fn restore_placeholder(&self, conversation_id: &str, message: &Message);
}

/// Whether `conversation_id` is the one on screen
pub(crate) fn is_displayed(view: &dyn ChatView, conversation_id: &str) -> bool {
    view.displayed_conversation().as_deref() == Some(conversation_id)
}
