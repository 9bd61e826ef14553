use crate::types::{ContentPart, Message, Role};

/// Merge consecutive messages of the same role into one, joining their text
/// content with a blank line. Used by providers (Anthropic, Gemini) that
/// require strict user/assistant alternation.
pub fn merge_consecutive_same_role(messages: &[Message]) -> Vec<Message> {
    let mut out: Vec<Message> = Vec::with_capacity(messages.len());
    for m in messages {
        if let Some(last) = out.last_mut() {
            if last.role == m.role && m.tool_calls.is_empty() && last.tool_calls.is_empty() {
                if !m.content.is_empty() {
                    if !last.content.is_empty() {
                        last.content.push_str("\n\n");
                    }
                    last.content.push_str(&m.content);
                }
                last.parts.extend(m.parts.clone());
                continue;
            }
        }
        out.push(m.clone());
    }
    out
}

/// Drop image parts for providers/models without vision support, appending
/// a warning to the message's first text part instead of silently losing
/// the attachment.
pub fn strip_images_if_unsupported(messages: &[Message], supports_images: bool) -> Vec<Message> {
    if supports_images {
        return messages.to_vec();
    }
    messages
        .iter()
        .map(|m| {
            let had_images = m.parts.iter().any(ContentPart::is_image);
            if !had_images {
                return m.clone();
            }
            let mut m = m.clone();
            m.parts.retain(|p| !p.is_image());
            let warning = "[image attachment dropped: model does not support image input]";
            if m.content.is_empty() {
                m.content = warning.to_string();
            } else {
                m.content.push_str("\n\n");
                m.content.push_str(warning);
            }
            m
        })
        .collect()
}

/// Strip `additionalProperties` from a tool's JSON-schema parameters, for
/// providers that reject unknown schema keywords.
pub fn drop_additional_properties(schema: &mut serde_json::Value) {
    if let serde_json::Value::Object(map) = schema {
        map.remove("additionalProperties");
        for (_, v) in map.iter_mut() {
            drop_additional_properties(v);
        }
    } else if let serde_json::Value::Array(arr) = schema {
        for v in arr.iter_mut() {
            drop_additional_properties(v);
        }
    }
}

#[allow(dead_code)]
pub fn role_str(r: Role) -> &'static str {
    match r {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merges_consecutive_user_messages() {
        let msgs = vec![Message::user("a"), Message::user("b")];
        let merged = merge_consecutive_same_role(&msgs);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].content, "a\n\nb");
    }

    #[test]
    fn does_not_merge_across_roles() {
        let msgs = vec![Message::user("a"), Message::assistant("b")];
        let merged = merge_consecutive_same_role(&msgs);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn strip_images_appends_warning() {
        let mut m = Message::user("look");
        m.parts.push(ContentPart::image_url("http://x/y.png"));
        let stripped = strip_images_if_unsupported(&[m], false);
        assert!(stripped[0].parts.is_empty());
        assert!(stripped[0].content.contains("dropped"));
    }

    #[test]
    fn strip_images_noop_when_supported() {
        let mut m = Message::user("look");
        m.parts.push(ContentPart::image_url("http://x/y.png"));
        let stripped = strip_images_if_unsupported(&[m], true);
        assert_eq!(stripped[0].parts.len(), 1);
    }

    #[test]
    fn drop_additional_properties_removes_nested() {
        let mut schema = serde_json::json!({
            "type": "object",
            "additionalProperties": false,
            "properties": {
                "x": {"type": "object", "additionalProperties": true}
            }
        });
        drop_additional_properties(&mut schema);
        assert!(schema.get("additionalProperties").is_none());
        assert!(schema["properties"]["x"].get("additionalProperties").is_none());
    }
}
