//! Assistant/human handoff.
//!
//! Who owns a conversation is never stored. It is derived from the message
//! history on every read: the first admin message whose label is not the
//! assistant's hands the conversation to staff for good.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::ChatResult;
use crate::messages::{self, MessageDraft};
use crate::store::ChatStore;
use crate::types::{ChatMessage, SenderType};

pub const AI_ASSISTANT_LABEL: &str = "NEMO AI Assistant";
pub const AI_ASSISTANT_INTRO: &str = "I am NEMO AI assistant of DrawnDimension. Our team will reach you soon. Please tell us what service you are interested in.";

static PRICING_TERMS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"price|pricing|cost|budget|quotation|quote").ok());
static WEB_TERMS: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"website|web|ui|ux|design").ok());
static ENGINEERING_TERMS: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"autocad|solidworks|3d|p&id|pfd|engineering|drawing").ok()
});

fn matches(pattern: &LazyLock<Option<Regex>>, text: &str) -> bool {
    pattern
        .as_ref()
        .map(|re| re.is_match(text))
        .unwrap_or(false)
}

pub fn is_ai_sender_label(label: Option<&str>) -> bool {
    let label = label.unwrap_or("").trim().to_lowercase();
    !label.is_empty() && (label.contains("nemo ai") || label.contains("ai assistant"))
}

fn is_human_admin(message: &ChatMessage) -> bool {
    message.sender_type == SenderType::Admin && !is_ai_sender_label(message.sender_label.as_deref())
}

pub fn has_human_admin_reply(messages: &[ChatMessage]) -> bool {
    messages.iter().any(is_human_admin)
}

/// AI-ACTIVE until any human staff reply appears in the history.
pub fn ai_mode_active(messages: &[ChatMessage]) -> bool {
    !has_human_admin_reply(messages)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyKind {
    Introduction,
    FileReceived,
    Pricing,
    WebDesign,
    Engineering,
    General,
}

impl ReplyKind {
    pub fn text(self) -> &'static str {
        match self {
            ReplyKind::Introduction => AI_ASSISTANT_INTRO,
            ReplyKind::FileReceived => "Thank you for sharing the file. Please tell us your project deadline and the exact deliverable you need.",
            ReplyKind::Pricing => "For pricing, please share scope details, quantity, and delivery timeline. Our team will send a proper quotation soon.",
            ReplyKind::WebDesign => "Great choice. Are you interested in website design, full development, or both? Please share your preferred style and timeline.",
            ReplyKind::Engineering => "Understood. Please share the technical requirements, file format, and expected completion date so our engineering team can prepare.",
            ReplyKind::General => "Thanks for your message. Please share your required service, project timeline, and any reference files. Our team will join shortly.",
        }
    }
}

/// Picks the canned reply for the latest user turn. The first assistant turn
/// is always the introduction; after that the first matching rule wins.
pub fn classify_reply(user_text: &str, has_attachment: bool, has_prior_ai_message: bool) -> ReplyKind {
    if !has_prior_ai_message {
        return ReplyKind::Introduction;
    }
    if has_attachment {
        return ReplyKind::FileReceived;
    }
    let normalized = user_text.to_lowercase();
    if matches(&PRICING_TERMS, &normalized) {
        ReplyKind::Pricing
    } else if matches(&WEB_TERMS, &normalized) {
        ReplyKind::WebDesign
    } else if matches(&ENGINEERING_TERMS, &normalized) {
        ReplyKind::Engineering
    } else {
        ReplyKind::General
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisOutcome {
    pub ai_message: Option<ChatMessage>,
    pub ai_mode_active: bool,
}

/// Runs the assistant turn after a user message has been appended.
///
/// Authorship is checked against the whole thread, not a page of it, so a
/// staff reply that landed in the meantime silences the assistant however
/// long the conversation has grown.
pub async fn synthesize_reply(
    store: &dyn ChatStore,
    request_id: &str,
    user_text: Option<&str>,
    has_attachment: bool,
) -> ChatResult<SynthesisOutcome> {
    if store.has_human_admin_message(request_id).await? {
        tracing::debug!(request_id, "human staff owns the conversation, assistant stays silent");
        return Ok(SynthesisOutcome {
            ai_message: None,
            ai_mode_active: false,
        });
    }

    let kind = classify_reply(
        user_text.unwrap_or(""),
        has_attachment,
        store.has_assistant_message(request_id).await?,
    );
    let ai_message = messages::append(
        store,
        request_id,
        SenderType::Admin,
        Some(AI_ASSISTANT_LABEL),
        MessageDraft::text(kind.text())?,
    )
    .await?;
    tracing::info!(request_id, reply = ?kind, "assistant reply appended");

    Ok(SynthesisOutcome {
        ai_message: Some(ai_message),
        ai_mode_active: true,
    })
}

/// Re-derives the flag straight from the store.
pub async fn current_ai_mode(store: &dyn ChatStore, request_id: &str) -> ChatResult<bool> {
    Ok(!store.has_human_admin_message(request_id).await?)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::registry::{self, NewConversation};
    use crate::store::MemoryChatStore;

    fn msg(sender_type: SenderType, label: Option<&str>) -> ChatMessage {
        let now = Utc::now();
        ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            request_id: "r1".to_string(),
            sender_type,
            sender_label: label.map(str::to_string),
            message_text: Some("text".to_string()),
            attachment_url: None,
            attachment_name: None,
            attachment_mime: None,
            attachment_size: None,
            created_at: now + Duration::milliseconds(1),
            read_by_admin_at: None,
            read_by_user_at: None,
        }
    }

    async fn new_conversation(store: &MemoryChatStore) -> String {
        registry::create(
            store,
            NewConversation {
                user_email: "c@d.com".into(),
                first_message: "Hi".into(),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .id
    }

    #[test]
    fn assistant_labels_are_recognized_case_insensitively() {
        assert!(is_ai_sender_label(Some("NEMO AI Assistant")));
        assert!(is_ai_sender_label(Some("nemo ai")));
        assert!(is_ai_sender_label(Some("Support AI Assistant")));
        assert!(!is_ai_sender_label(Some("alex")));
        assert!(!is_ai_sender_label(Some("   ")));
        assert!(!is_ai_sender_label(None));
    }

    #[test]
    fn human_reply_is_sticky() {
        let mut history = vec![
            msg(SenderType::User, Some("Casey")),
            msg(SenderType::Admin, Some(AI_ASSISTANT_LABEL)),
        ];
        assert!(ai_mode_active(&history));

        history.push(msg(SenderType::Admin, Some("alex")));
        assert!(!ai_mode_active(&history));

        // Any superset of a human-owned history stays human-owned.
        for extra in [
            msg(SenderType::User, None),
            msg(SenderType::Admin, Some(AI_ASSISTANT_LABEL)),
            msg(SenderType::User, Some("nemo ai")),
        ] {
            history.push(extra);
            assert!(!ai_mode_active(&history));
        }
    }

    #[test]
    fn user_messages_never_count_as_staff() {
        let history = vec![msg(SenderType::User, Some("Definitely Human"))];
        assert!(ai_mode_active(&history));
    }

    #[test]
    fn first_turn_is_always_the_introduction() {
        for text in ["what's the price?", "website please", "", "autocad"] {
            assert_eq!(classify_reply(text, false, false), ReplyKind::Introduction);
            assert_eq!(classify_reply(text, true, false), ReplyKind::Introduction);
        }
        assert_eq!(ReplyKind::Introduction.text(), AI_ASSISTANT_INTRO);
    }

    #[test]
    fn keyword_priority_order() {
        assert_eq!(classify_reply("anything", true, true), ReplyKind::FileReceived);
        assert_eq!(
            classify_reply("What is the PRICE for a website?", false, true),
            ReplyKind::Pricing
        );
        assert_eq!(classify_reply("Need a new website", false, true), ReplyKind::WebDesign);
        assert_eq!(classify_reply("SolidWorks model", false, true), ReplyKind::Engineering);
        assert_eq!(classify_reply("P&ID redraw", false, true), ReplyKind::Engineering);
        assert_eq!(classify_reply("hello there", false, true), ReplyKind::General);
    }

    #[tokio::test]
    async fn first_synthesis_returns_the_intro_verbatim() {
        let store = MemoryChatStore::new();
        let id = new_conversation(&store).await;
        messages::append(&store, &id, SenderType::User, None, MessageDraft::text("price?").unwrap())
            .await
            .unwrap();

        let outcome = synthesize_reply(&store, &id, Some("price?"), false).await.unwrap();
        let reply = outcome.ai_message.unwrap();
        assert!(outcome.ai_mode_active);
        assert_eq!(reply.message_text.as_deref(), Some(AI_ASSISTANT_INTRO));
        assert_eq!(reply.sender_type, SenderType::Admin);
        assert_eq!(reply.sender_label.as_deref(), Some(AI_ASSISTANT_LABEL));
    }

    #[tokio::test]
    async fn later_turns_follow_keywords() {
        let store = MemoryChatStore::new();
        let id = new_conversation(&store).await;
        synthesize_reply(&store, &id, Some("Hi"), false).await.unwrap();

        let outcome = synthesize_reply(&store, &id, Some("price and website"), false)
            .await
            .unwrap();
        assert_eq!(
            outcome.ai_message.unwrap().message_text.as_deref(),
            Some(ReplyKind::Pricing.text())
        );
    }

    #[tokio::test]
    async fn assistant_stays_silent_after_staff_reply() {
        let store = MemoryChatStore::new();
        let id = new_conversation(&store).await;
        synthesize_reply(&store, &id, Some("Hi"), false).await.unwrap();
        messages::append(&store, &id, SenderType::Admin, Some("alex"), MessageDraft::text("Hello, I'm here").unwrap())
            .await
            .unwrap();

        let before = messages::list_by_request(&store, &id, None).await.unwrap().len();
        let outcome = synthesize_reply(&store, &id, Some("what's the price?"), false)
            .await
            .unwrap();
        let after = messages::list_by_request(&store, &id, None).await.unwrap().len();

        assert_eq!(outcome, SynthesisOutcome { ai_message: None, ai_mode_active: false });
        assert_eq!(before, after);
        assert!(!current_ai_mode(&store, &id).await.unwrap());
    }

    #[tokio::test]
    async fn staff_reply_deep_in_a_long_thread_still_silences_the_assistant() {
        let store = MemoryChatStore::new();
        let id = new_conversation(&store).await;
        for _ in 0..300 {
            messages::append(&store, &id, SenderType::User, None, MessageDraft::text("more detail").unwrap())
                .await
                .unwrap();
            synthesize_reply(&store, &id, Some("more detail"), false).await.unwrap();
        }
        messages::append(&store, &id, SenderType::Admin, Some("alex"), MessageDraft::text("Taking over").unwrap())
            .await
            .unwrap();
        messages::append(&store, &id, SenderType::User, None, MessageDraft::text("what's the price?").unwrap())
            .await
            .unwrap();

        let before = store.messages_for_request(&id, 2000).await.unwrap().len();
        assert!(before > 600);
        let outcome = synthesize_reply(&store, &id, Some("what's the price?"), false)
            .await
            .unwrap();
        let after = store.messages_for_request(&id, 2000).await.unwrap().len();

        assert_eq!(outcome, SynthesisOutcome { ai_message: None, ai_mode_active: false });
        assert_eq!(before, after);
        assert!(!current_ai_mode(&store, &id).await.unwrap());
    }
}
