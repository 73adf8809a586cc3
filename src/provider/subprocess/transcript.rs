use crate::error::LLMError;
use crate::types::{Message, Role};

/// Conversation flattened for a CLI that takes a single prompt argument.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Prompt {
    /// System text passed through a dedicated flag, when the CLI has one.
    pub(crate) system: Option<String>,
    pub(crate) transcript: String,
}

/// Renders messages as `Role: content` turns separated by a blank line.
///
/// With `hoist_system` set, system messages are pulled out into [`Prompt::system`]
/// instead of appearing as turns.
pub(crate) fn linearize(messages: &[Message], hoist_system: bool) -> Result<Prompt, LLMError> {
    if messages.is_empty() {
        return Err(LLMError::Validation {
            message: "at least one message is required".to_string(),
        });
    }

    let mut system = Vec::new();
    let mut turns = Vec::with_capacity(messages.len());
    for message in messages {
        if hoist_system && message.role == Role::System {
            if !message.content.is_empty() {
                system.push(message.content.as_str());
            }
            continue;
        }
        turns.push(format!("{}: {}", message.role.label(), message.content));
    }

    if turns.is_empty() {
        return Err(LLMError::Validation {
            message: "conversation has no turns besides the system prompt".to_string(),
        });
    }

    Ok(Prompt {
        system: (!system.is_empty()).then(|| system.join("\n\n")),
        transcript: turns.join("\n\n"),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conversation() -> Vec<Message> {
        vec![
            Message::system("Be brief."),
            Message::user("What is 2+2?"),
            Message::assistant("4"),
            Message::user("And 3+3?"),
        ]
    }

    #[test]
    fn hoisted_system_is_kept_out_of_the_transcript() {
        let prompt = linearize(&conversation(), true).expect("prompt");
        assert_eq!(prompt.system.as_deref(), Some("Be brief."));
        assert_eq!(
            prompt.transcript,
            "User: What is 2+2?\n\nAssistant: 4\n\nUser: And 3+3?"
        );
    }

    #[test]
    fn inline_system_becomes_the_first_turn() {
        let prompt = linearize(&conversation(), false).expect("prompt");
        assert_eq!(prompt.system, None);
        assert!(prompt.transcript.starts_with("System: Be brief.\n\nUser: What is 2+2?"));
    }

    #[test]
    fn system_only_conversation_is_rejected() {
        assert!(matches!(
            linearize(&[Message::system("x")], true),
            Err(LLMError::Validation { .. })
        ));
        assert!(matches!(linearize(&[], false), Err(LLMError::Validation { .. })));
    }
}
