//! Minimal TwiML `<Response>` rendering for message replies.

pub const CONTENT_TYPE: &str = "application/xml";

const HEADER: &str = r#"<?xml version="1.0" encoding="UTF-8"?>"#;

/// A `<Response>` with a single `<Message>`, or an empty response for blank text.
pub fn message_response(text: &str) -> String {
    if text.is_empty() {
        return format!("{HEADER}<Response/>");
    }
    format!(
        "{HEADER}<Response><Message>{}</Message></Response>",
        escape(text)
    )
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escapes_markup() {
        let xml = message_response("Tom & <Jerry>");
        assert!(xml.ends_with("<Response><Message>Tom &amp; &lt;Jerry&gt;</Message></Response>"));
    }

    #[test]
    fn empty_text_gives_empty_response() {
        assert!(message_response("").ends_with("<Response/>"));
    }
}
