//! Text normalization for received message content.

use quick_xml::escape::unescape;
use regex::{Captures, Regex};

lazy_static::lazy_static! {
    static ref ENTITY: Regex = Regex::new(r"&(?:#[0-9]+|#[xX][0-9a-fA-F]+|[A-Za-z][A-Za-z0-9]*);")
        .expect("valid entity regex");
    static ref EMOJI_SPAN: Regex = Regex::new(r#"<span class="emoji emoji([0-9a-fA-F]+)"></span>"#)
        .expect("valid emoji regex");
    static ref QQ_EMOJI_SPAN: Regex = Regex::new(r#"<span class="qqemoji qqemoji([0-9]+)"></span>"#)
        .expect("valid qq emoji regex");
}

/// Classic face names, indexed by the number in `qqemojiN`.
const QQ_FACES: &[&str] = &[
    "Smile", "Grimace", "Drool", "Scowl", "CoolGuy", "Sob", "Shy", "Silent", "Sleep", "Cry",
    "Awkward", "Angry", "Tongue", "Grin", "Surprise", "Frown", "Ruthless", "Blush", "Scream",
    "Puke", "Chuckle", "Joyful", "Slight", "Smug", "Hungry", "Drowsy", "Panic", "Sweat", "Laugh",
    "Commando", "Determined", "Scold", "Shocked", "Shhh", "Dizzy", "Tormented", "Toasted",
    "Skull", "Hammer", "Wave", "Speechless", "NosePick", "Clap", "Shame", "Trick",
];

/// Normalize raw content for display.
///
/// `<br/>` becomes a newline, HTML entities are decoded and emoji
/// placeholders are replaced with their Unicode or bracketed text form.
pub fn normalize(content: &str) -> String {
    let text = content.replace("<br/>", "\n");
    let text = unescape_entities(&text);
    format_emoji(&text)
}

/// Decode HTML entities, leaving unknown ones and bare `&` untouched.
pub fn unescape_entities(text: &str) -> String {
    ENTITY
        .replace_all(text, |caps: &Captures| match unescape(&caps[0]) {
            Ok(decoded) => decoded.into_owned(),
            Err(_) => caps[0].to_string(),
        })
        .into_owned()
}

/// Replace emoji `<span>` placeholders.
pub fn format_emoji(text: &str) -> String {
    let text = EMOJI_SPAN.replace_all(text, |caps: &Captures| {
        decode_code_points(&caps[1]).unwrap_or_else(|| caps[0].to_string())
    });
    QQ_EMOJI_SPAN
        .replace_all(&text, |caps: &Captures| {
            caps[1]
                .parse::<usize>()
                .ok()
                .and_then(|i| QQ_FACES.get(i))
                .map(|name| format!("[{name}]"))
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

// Sequences such as flags arrive as concatenated 5-digit code points.
fn decode_code_points(hex: &str) -> Option<String> {
    if hex.len() <= 6 {
        let code = u32::from_str_radix(hex, 16).ok()?;
        return char::from_u32(code).map(String::from);
    }
    if hex.len() % 5 != 0 {
        return None;
    }
    (0..hex.len())
        .step_by(5)
        .map(|i| {
            let code = u32::from_str_radix(&hex[i..i + 5], 16).ok()?;
            char::from_u32(code)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_breaks() {
        assert_eq!(normalize("a<br/>b<br/>c"), "a\nb\nc");
    }

    #[test]
    fn test_entities() {
        assert_eq!(normalize("&lt;b&gt; &amp; &quot;x&quot;"), "<b> & \"x\"");
        assert_eq!(normalize("caf&eacute; &#65;&#x42;"), "café AB");
        assert_eq!(normalize("Tom & Jerry &nosuchentity;"), "Tom & Jerry &nosuchentity;");
    }

    #[test]
    fn test_emoji() {
        assert_eq!(
            normalize(r#"hi <span class="emoji emoji1f604"></span>"#),
            "hi \u{1f604}"
        );
        assert_eq!(
            format_emoji(r#"<span class="emoji emoji1f1e81f1f3"></span>"#),
            "\u{1f1e8}\u{1f1f3}"
        );
        assert_eq!(
            format_emoji(r#"<span class="qqemoji qqemoji13"></span>!"#),
            "[Grin]!"
        );
        let unknown = r#"<span class="qqemoji qqemoji999"></span>"#;
        assert_eq!(format_emoji(unknown), unknown);
    }
}
