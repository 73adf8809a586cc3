//! Reassembles tool invocations delivered as index-tagged fragments.

use std::collections::BTreeMap;

use crate::error::LLMError;
use crate::types::{ToolCall, ToolCallKind};

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    kind: String,
    name: String,
    arguments: String,
}

/// Merges partial tool-call fragments keyed by their position index.
///
/// Identity fields (`id`, `type`, `name`) are overwritten only by non-empty values, since
/// later fragments may carry what earlier ones omitted. Argument text is always
/// appended, never replaced.
///
/// # Examples
///
/// ```
/// use tsunagi_llm::accumulator::ToolCallAccumulator;
///
/// let mut acc = ToolCallAccumulator::new();
/// acc.add_fragment(0, Some("call_1"), None, Some("read_file"), "{\"path\":");
/// acc.add_fragment(0, None, None, None, "\"a.txt\"}");
/// let calls = acc.finalize("openai").unwrap();
/// assert_eq!(calls[0].arguments, "{\"path\":\"a.txt\"}");
/// ```
#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    entries: BTreeMap<usize, PartialToolCall>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Records one fragment for the call at `index`.
    pub fn add_fragment(
        &mut self,
        index: usize,
        id: Option<&str>,
        kind: Option<&str>,
        name: Option<&str>,
        arguments: &str,
    ) {
        let entry = self.entries.entry(index).or_insert_with(|| PartialToolCall {
            kind: ToolCallKind::Function.as_str().to_string(),
            ..Default::default()
        });
        overwrite_if_present(&mut entry.id, id);
        overwrite_if_present(&mut entry.kind, kind);
        overwrite_if_present(&mut entry.name, name);
        entry.arguments.push_str(arguments);
    }

    /// Returns the completed calls in ascending index order.
    ///
    /// Indices must be contiguous from zero; a gap is a backend protocol violation and
    /// fails instead of being reindexed. Empty argument text finalizes to `{}` and any
    /// other text must parse as JSON.
    pub fn finalize(self, provider: &'static str) -> Result<Vec<ToolCall>, LLMError> {
        let mut calls = Vec::with_capacity(self.entries.len());
        for (expected, (index, entry)) in self.entries.into_iter().enumerate() {
            if index != expected {
                return Err(LLMError::protocol(
                    provider,
                    format!("tool call index {expected} missing (next index seen: {index})"),
                ));
            }
            if entry.kind != ToolCallKind::Function.as_str() {
                return Err(LLMError::protocol(
                    provider,
                    format!("unsupported tool call type `{}` at index {index}", entry.kind),
                ));
            }
            calls.push(ToolCall {
                arguments: finalize_arguments(provider, &entry.name, entry.arguments)?,
                id: entry.id,
                kind: ToolCallKind::Function,
                name: entry.name,
            });
        }
        Ok(calls)
    }
}

fn overwrite_if_present(slot: &mut String, value: Option<&str>) {
    if let Some(value) = value.filter(|value| !value.is_empty()) {
        *slot = value.to_string();
    }
}

/// Validates accumulated argument text for the call named `name`.
pub(crate) fn finalize_arguments(
    provider: &'static str,
    name: &str,
    arguments: String,
) -> Result<String, LLMError> {
    if arguments.trim().is_empty() {
        return Ok("{}".to_string());
    }
    match serde_json::from_str::<serde_json::Value>(&arguments) {
        Ok(_) => Ok(arguments),
        Err(err) => Err(LLMError::protocol(
            provider,
            format!("tool call `{name}` has malformed arguments: {err}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragments_for_one_index_concatenate_in_order() {
        let mut acc = ToolCallAccumulator::new();
        acc.add_fragment(0, Some("call_1"), Some("function"), Some("read_file"), "{\"path\":");
        acc.add_fragment(0, None, None, None, "\"a.txt\"}");

        let calls = acc.finalize("test").expect("finalize");
        assert_eq!(
            calls,
            vec![ToolCall::function("call_1", "read_file", "{\"path\":\"a.txt\"}")]
        );
    }

    #[test]
    fn interleaved_indices_keep_their_own_buffers() {
        let mut acc = ToolCallAccumulator::new();
        let pieces = [
            (1, "{\"b\""),
            (0, "{\"a\""),
            (0, ":1}"),
            (1, ":"),
            (1, "2}"),
        ];
        acc.add_fragment(0, Some("c0"), None, Some("first"), "");
        acc.add_fragment(1, Some("c1"), None, Some("second"), "");
        for (index, fragment) in pieces {
            acc.add_fragment(index, None, None, None, fragment);
        }

        let calls = acc.finalize("test").expect("finalize");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].arguments, "{\"a\":1}");
        assert_eq!(calls[1].arguments, "{\"b\":2}");
        assert_eq!(calls[1].name, "second");
    }

    #[test]
    fn later_fragments_fill_missing_identity_but_empty_values_do_not_clear() {
        let mut acc = ToolCallAccumulator::new();
        acc.add_fragment(0, None, None, None, "{");
        acc.add_fragment(0, Some("call_9"), None, Some("grep"), "}");
        acc.add_fragment(0, Some(""), Some(""), Some(""), "");

        let calls = acc.finalize("test").expect("finalize");
        assert_eq!(calls[0].id, "call_9");
        assert_eq!(calls[0].name, "grep");
        assert_eq!(calls[0].kind, ToolCallKind::Function);
    }

    #[test]
    fn gap_in_indices_is_a_protocol_error() {
        let mut acc = ToolCallAccumulator::new();
        acc.add_fragment(0, Some("a"), None, Some("x"), "{}");
        acc.add_fragment(2, Some("c"), None, Some("z"), "{}");

        let err = acc.finalize("test").expect_err("gap must fail");
        match err {
            LLMError::Protocol { provider, message } => {
                assert_eq!(provider, "test");
                assert!(message.contains("index 1 missing"), "{message}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn empty_arguments_finalize_to_empty_object() {
        let mut acc = ToolCallAccumulator::new();
        acc.add_fragment(0, Some("a"), None, Some("list_files"), "");
        let calls = acc.finalize("test").expect("finalize");
        assert_eq!(calls[0].arguments, "{}");
    }

    #[test]
    fn truncated_arguments_are_rejected() {
        let mut acc = ToolCallAccumulator::new();
        acc.add_fragment(0, Some("a"), None, Some("grep"), "{\"pattern\":");
        assert!(matches!(
            acc.finalize("test"),
            Err(LLMError::Protocol { .. })
        ));
    }

    #[test]
    fn non_function_kind_is_rejected() {
        let mut acc = ToolCallAccumulator::new();
        acc.add_fragment(0, Some("a"), Some("code_interpreter"), Some("x"), "{}");
        assert!(matches!(
            acc.finalize("test"),
            Err(LLMError::Protocol { .. })
        ));
    }

    #[test]
    fn empty_accumulator_finalizes_to_nothing() {
        let acc = ToolCallAccumulator::new();
        assert!(acc.is_empty());
        assert!(acc.finalize("test").expect("finalize").is_empty());
    }
}
