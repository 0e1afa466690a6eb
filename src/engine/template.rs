//! `{{ path }}` placeholder substitution.
//!
//! A template is plain text with `{{ dotted.path }}` markers. Each marker is
//! replaced by the value found at that path in a JSON context built by
//! [`render_context`]. Strings are inserted verbatim, `null` renders as an
//! empty string, and any other value is inserted as compact JSON.

use serde_json::{Value, json};

use crate::domain::{BusFilter, BusMessage, TemplateId, User};

/// Errors raised while resolving or rendering a template.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RenderError {
    /// The referenced template no longer exists.
    #[error("template not found: {0}")]
    MissingTemplate(TemplateId),

    /// A `{{` has no matching `}}`.
    #[error("unterminated placeholder at byte {0}")]
    Unterminated(usize),

    /// A placeholder contains nothing but whitespace.
    #[error("empty placeholder at byte {0}")]
    EmptyPlaceholder(usize),

    /// A placeholder path does not resolve in the context.
    #[error("unknown placeholder: {0}")]
    UnknownPlaceholder(String),
}

/// Builds the rendering context for one delivery.
///
/// `message.payload` holds the body parsed as JSON, or `null` when the
/// body is not valid JSON.
#[must_use]
pub fn render_context(message: &BusMessage, user: &User, filter: &BusFilter) -> Value {
    let payload = serde_json::from_str::<Value>(&message.body).unwrap_or(Value::Null);
    json!({
        "body": message.body,
        "message": {
            "exchange": message.exchange,
            "routing_key": message.routing_key,
            "body": message.body,
            "payload": payload,
            "received_at": message.received_at.to_rfc3339(),
        },
        "user": {
            "id": user.id,
            "name": user.name,
            "email": user.email,
        },
        "filter": {
            "id": filter.id,
            "exchange": filter.exchange,
            "key": filter.key,
            "exchange_type": filter.exchange_type,
            "description": filter.description,
            "category": filter.category,
        },
    })
}

/// Substitutes every placeholder of `text` from `context`.
///
/// # Errors
///
/// Returns [`RenderError::Unterminated`], [`RenderError::EmptyPlaceholder`]
/// or [`RenderError::UnknownPlaceholder`] when the text is malformed or
/// references a path absent from the context.
pub fn render(text: &str, context: &Value) -> Result<String, RenderError> {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some((before, after)) = rest.split_once("{{") {
        out.push_str(before);
        let offset = text.len() - after.len() - 2;
        let Some((expr, tail)) = after.split_once("}}") else {
            return Err(RenderError::Unterminated(offset));
        };

        let path = expr.trim();
        if path.is_empty() {
            return Err(RenderError::EmptyPlaceholder(offset));
        }
        let value =
            lookup(context, path).ok_or_else(|| RenderError::UnknownPlaceholder(path.into()))?;
        push_value(&mut out, value);
        rest = tail;
    }

    out.push_str(rest);
    Ok(out)
}

fn lookup<'a>(context: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(context, |value, segment| match segment.parse::<usize>() {
            Ok(index) if value.is_array() => value.get(index),
            _ => value.get(segment),
        })
}

fn push_value(out: &mut String, value: &Value) {
    match value {
        Value::Null => {}
        Value::String(s) => out.push_str(s),
        other => out.push_str(&other.to_string()),
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::{ExchangeType, FilterId, UserId};

    fn context(body: &str) -> Value {
        let user = User {
            id: UserId::new(),
            name: "Ada".to_string(),
            email: "ada@example.com".to_string(),
        };
        let filter = BusFilter {
            id: FilterId::new(),
            exchange: "notifications".to_string(),
            key: "important".to_string(),
            exchange_type: ExchangeType::Direct,
            durable: true,
            description: Some("Important things".to_string()),
            category: None,
            template_id: None,
        };
        render_context(&BusMessage::new("notifications", "important", body), &user, &filter)
    }

    #[test]
    fn substitutes_user_and_body() {
        let rendered = render("Hi {{ user.name }}: {{body}}", &context("X"));
        assert_eq!(rendered, Ok("Hi Ada: X".to_string()));
    }

    #[test]
    fn reaches_into_json_payload() {
        let ctx = context(r#"{"order":{"id":42,"items":["a","b"]}}"#);
        assert_eq!(
            render("#{{ message.payload.order.id }} {{ message.payload.order.items.1 }}", &ctx),
            Ok("#42 b".to_string())
        );
    }

    #[test]
    fn non_json_body_has_null_payload() {
        let ctx = context("plain text");
        assert_eq!(render("[{{ message.payload }}]", &ctx), Ok("[]".to_string()));
    }

    #[test]
    fn null_fields_render_empty() {
        assert_eq!(
            render("{{ filter.category }}|{{ filter.description }}", &context("")),
            Ok("|Important things".to_string())
        );
    }

    #[test]
    fn unknown_path_is_an_error() {
        assert_eq!(
            render("{{ user.phone }}", &context("")),
            Err(RenderError::UnknownPlaceholder("user.phone".to_string()))
        );
    }

    #[test]
    fn unterminated_placeholder_reports_offset() {
        assert_eq!(
            render("ok {{ body", &context("")),
            Err(RenderError::Unterminated(3))
        );
    }

    #[test]
    fn empty_placeholder_is_an_error() {
        assert_eq!(render("{{  }}", &context("")), Err(RenderError::EmptyPlaceholder(0)));
    }

    #[test]
    fn text_without_placeholders_is_unchanged() {
        assert_eq!(render("static } text {", &context("")), Ok("static } text {".to_string()));
    }
}
