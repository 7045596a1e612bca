//! Named strategies for locating text inside request and response payloads.

use serde_json::Value;

/// One way of finding text in a JSON payload.
///
/// The set is closed; [`ContentExtractor::INPUT`] and
/// [`ContentExtractor::OUTPUT`] give the order in which they are tried.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentExtractor {
    /// The payload itself is a string
    PlainString,
    /// `{"prompt": "..."}`
    PromptField,
    /// Last `{"role": "user"}` entry of `messages`
    MessagesLastUser,
    /// `{"content": "..."}`
    ContentField,
    /// `{"input": "..."}`
    InputField,
    /// `choices[0].message.content`, or `choices[0].text`
    ChoicesMessage,
    /// `content` as a list of `{"type": "text", "text": "..."}` blocks
    ContentBlocks,
    /// `{"text": "..."}`
    TextField,
}

impl ContentExtractor {
    /// Strategies tried on requests, in order.
    pub const INPUT: &'static [ContentExtractor] = &[
        ContentExtractor::PlainString,
        ContentExtractor::PromptField,
        ContentExtractor::MessagesLastUser,
        ContentExtractor::ContentField,
        ContentExtractor::InputField,
    ];

    /// Strategies tried on responses, in order.
    pub const OUTPUT: &'static [ContentExtractor] = &[
        ContentExtractor::PlainString,
        ContentExtractor::ChoicesMessage,
        ContentExtractor::ContentBlocks,
        ContentExtractor::ContentField,
        ContentExtractor::TextField,
    ];

    /// Strategy name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            ContentExtractor::PlainString => "plain_string",
            ContentExtractor::PromptField => "prompt_field",
            ContentExtractor::MessagesLastUser => "messages_last_user",
            ContentExtractor::ContentField => "content_field",
            ContentExtractor::InputField => "input_field",
            ContentExtractor::ChoicesMessage => "choices_message",
            ContentExtractor::ContentBlocks => "content_blocks",
            ContentExtractor::TextField => "text_field",
        }
    }

    /// Text found by this strategy, if any.
    pub fn extract(&self, value: &Value) -> Option<String> {
        match self {
            ContentExtractor::PlainString => value.as_str().map(str::to_string),
            ContentExtractor::PromptField => string_field(value, "prompt"),
            ContentExtractor::MessagesLastUser => message_text(last_user_message(value)?),
            ContentExtractor::ContentField => string_field(value, "content"),
            ContentExtractor::InputField => string_field(value, "input"),
            ContentExtractor::ChoicesMessage => value
                .pointer("/choices/0/message/content")
                .or_else(|| value.pointer("/choices/0/text"))
                .and_then(Value::as_str)
                .map(str::to_string),
            ContentExtractor::ContentBlocks => join_text_blocks(value.get("content")?),
            ContentExtractor::TextField => string_field(value, "text"),
        }
    }

    /// Write `content` back where this strategy found text. Returns false
    /// when the payload has no such location.
    pub fn replace(&self, value: &mut Value, content: &str) -> bool {
        let slot = match self {
            ContentExtractor::PlainString => {
                if !value.is_string() {
                    return false;
                }
                Some(value)
            }
            ContentExtractor::PromptField => string_slot(value, "prompt"),
            ContentExtractor::MessagesLastUser => value
                .get_mut("messages")
                .and_then(Value::as_array_mut)
                .and_then(|messages| messages.iter_mut().rev().find(|m| is_user(m)))
                .and_then(|m| m.get_mut("content")),
            ContentExtractor::ContentField => string_slot(value, "content"),
            ContentExtractor::InputField => string_slot(value, "input"),
            ContentExtractor::ChoicesMessage => {
                if value.pointer("/choices/0/message/content").is_some() {
                    value.pointer_mut("/choices/0/message/content")
                } else {
                    value.pointer_mut("/choices/0/text")
                }
            }
            ContentExtractor::ContentBlocks => match value.get_mut("content") {
                Some(blocks) if blocks.is_array() => {
                    *blocks = serde_json::json!([{"type": "text", "text": content}]);
                    return true;
                }
                _ => None,
            },
            ContentExtractor::TextField => string_slot(value, "text"),
        };

        match slot {
            Some(slot) => {
                *slot = Value::String(content.to_string());
                true
            }
            None => false,
        }
    }
}

/// First strategy in `strategies` that finds text, with the text.
pub fn extract_first(
    strategies: &[ContentExtractor],
    value: &Value,
) -> Option<(ContentExtractor, String)> {
    strategies
        .iter()
        .find_map(|s| s.extract(value).map(|text| (*s, text)))
}

/// Text of every user message in `messages`, oldest first. Messages without
/// text are skipped.
pub fn user_messages(value: &Value) -> Vec<String> {
    value
        .get("messages")
        .and_then(Value::as_array)
        .map(|messages| {
            messages
                .iter()
                .filter(|m| is_user(m))
                .filter_map(message_text)
                .collect()
        })
        .unwrap_or_default()
}

fn message_text(message: &Value) -> Option<String> {
    match message.get("content")? {
        Value::String(s) => Some(s.clone()),
        blocks => join_text_blocks(blocks),
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value.get(key)?.as_str().map(str::to_string)
}

fn string_slot<'v>(value: &'v mut Value, key: &str) -> Option<&'v mut Value> {
    value.get_mut(key).filter(|v| v.is_string())
}

fn is_user(message: &Value) -> bool {
    message.get("role").and_then(Value::as_str) == Some("user")
}

fn last_user_message(value: &Value) -> Option<&Value> {
    value
        .get("messages")?
        .as_array()?
        .iter()
        .rev()
        .find(|m| is_user(m))
}

fn join_text_blocks(blocks: &Value) -> Option<String> {
    let texts: Vec<&str> = blocks
        .as_array()?
        .iter()
        .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|b| b.get("text").and_then(Value::as_str))
        .collect();

    if texts.is_empty() {
        None
    } else {
        Some(texts.join("\n"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_input_order() {
        let request = json!({
            "prompt": "from prompt",
            "messages": [{"role": "user", "content": "from messages"}]
        });
        let (strategy, text) = extract_first(ContentExtractor::INPUT, &request).unwrap();
        assert_eq!(strategy, ContentExtractor::PromptField);
        assert_eq!(text, "from prompt");

        let (strategy, _) = extract_first(ContentExtractor::INPUT, &json!("raw")).unwrap();
        assert_eq!(strategy, ContentExtractor::PlainString);
    }

    #[test]
    fn test_messages_last_user() {
        let mut request = json!({
            "messages": [
                {"role": "system", "content": "sys"},
                {"role": "user", "content": "first"},
                {"role": "assistant", "content": "reply"},
                {"role": "user", "content": [{"type": "text", "text": "second"}]}
            ]
        });
        assert_eq!(
            ContentExtractor::MessagesLastUser.extract(&request).as_deref(),
            Some("second")
        );

        assert!(ContentExtractor::MessagesLastUser.replace(&mut request, "rewritten"));
        assert_eq!(request["messages"][3]["content"], "rewritten");
        assert_eq!(request["messages"][1]["content"], "first");
    }

    #[test]
    fn test_user_messages() {
        let request = json!({
            "messages": [
                {"role": "system", "content": "sys"},
                {"role": "user", "content": "first"},
                {"role": "assistant", "content": "reply"},
                {"role": "user", "content": [{"type": "image"}]},
                {"role": "user", "content": [{"type": "text", "text": "third"}]}
            ]
        });
        assert_eq!(user_messages(&request), vec!["first", "third"]);
        assert!(user_messages(&json!({"prompt": "p"})).is_empty());
    }

    #[test]
    fn test_output_shapes() {
        let openai = json!({"choices": [{"message": {"role": "assistant", "content": "hi"}}]});
        let anthropic = json!({"content": [{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]});
        let plain = json!({"text": "t"});

        assert_eq!(
            extract_first(ContentExtractor::OUTPUT, &openai).unwrap().0,
            ContentExtractor::ChoicesMessage
        );
        assert_eq!(
            extract_first(ContentExtractor::OUTPUT, &anthropic).unwrap().1,
            "a\nb"
        );
        assert_eq!(
            extract_first(ContentExtractor::OUTPUT, &plain).unwrap().0,
            ContentExtractor::TextField
        );
        assert!(extract_first(ContentExtractor::OUTPUT, &json!({"n": 1})).is_none());
    }

    #[test]
    fn test_replace_round_trip() {
        let mut response = json!({"content": [{"type": "text", "text": "secret"}]});
        assert!(ContentExtractor::ContentBlocks.replace(&mut response, "[removed]"));
        assert_eq!(
            ContentExtractor::ContentBlocks.extract(&response).as_deref(),
            Some("[removed]")
        );

        let mut other = json!({"n": 1});
        assert!(!ContentExtractor::TextField.replace(&mut other, "x"));
        assert!(!ContentExtractor::PlainString.replace(&mut other, "x"));
    }
}
