//! Command classification for raw message text. Commands are the only
//! free-text surface exposed to arbitrary chat input, so anything that looks
//! like an attempt to smuggle a foreign identity into application logic is
//! flagged instead of parsed.

const MAX_COMMAND_LEN: usize = 128;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedCommand {
    pub command: Option<String>,
    pub argument: Option<String>,
    pub suspicious: bool,
    pub reason: Option<&'static str>,
    /// `/cmd@otherbot` in a shared context: accepted, but not ours to act on.
    pub addressed_to_other: bool,
}

impl ParsedCommand {
    fn not_a_command() -> Self {
        Self::default()
    }

    fn suspicious(reason: &'static str) -> Self {
        Self {
            suspicious: true,
            reason: Some(reason),
            ..Self::default()
        }
    }
}

pub fn parse_command(text: Option<&str>, bot_username: Option<&str>) -> ParsedCommand {
    let Some(text) = text else {
        return ParsedCommand::not_a_command();
    };
    if !text.starts_with('/') {
        return ParsedCommand::not_a_command();
    }
    if text.len() > MAX_COMMAND_LEN {
        return ParsedCommand::suspicious("injection payload");
    }

    let mut tokens = text.split_whitespace();
    let first = tokens.next().unwrap_or_default();
    let rest: Vec<&str> = tokens.collect();

    let body = &first[1..];
    let (name, mention) = match body.split_once('@') {
        Some((n, m)) => (n, Some(m)),
        None => (body, None),
    };
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_lowercase() || c == '_') {
        return ParsedCommand::suspicious("malformed command");
    }
    if let Some(m) = mention {
        if m.is_empty() {
            return ParsedCommand::suspicious("malformed command");
        }
    }
    let command = format!("/{}", name);

    if rest.len() > 1 {
        return ParsedCommand::suspicious("too many arguments");
    }

    // Commands addressed to another bot in a shared chat are fine, just not
    // for us.
    if let Some(m) = mention {
        let ours = bot_username
            .map(|u| u.trim_start_matches('@').eq_ignore_ascii_case(m))
            .unwrap_or(false);
        if !ours {
            return ParsedCommand {
                command: Some(command),
                addressed_to_other: true,
                ..ParsedCommand::default()
            };
        }
    }

    if rest.len() == 1 && command == "/start" && is_referral_argument(rest[0]) {
        return ParsedCommand {
            command: Some(command),
            argument: Some(rest[0].to_string()),
            ..ParsedCommand::default()
        };
    }

    if looks_like_id_injection(text) {
        return ParsedCommand::suspicious("ID injection");
    }

    if rest.len() == 1 {
        return ParsedCommand::suspicious("unsupported payload");
    }

    ParsedCommand {
        command: Some(command),
        ..ParsedCommand::default()
    }
}

/// `ref_<id>`: a referral-source identity marker, 1-20 digits, no leading
/// zero.
fn is_referral_argument(arg: &str) -> bool {
    let Some(digits) = arg.strip_prefix("ref_") else {
        return false;
    };
    if digits.is_empty() || digits.len() > 20 {
        return false;
    }
    let mut chars = digits.chars();
    let first = chars.next().unwrap_or('0');
    ('1'..='9').contains(&first) && chars.all(|c| c.is_ascii_digit())
}

/// Markers of a foreign-identity payload: explicit id keys or any bare run
/// of 8+ digits.
fn looks_like_id_injection(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    if lowered.contains("id=") || lowered.contains("user_id:") || lowered.contains("tg://user?id=")
    {
        return true;
    }
    let mut run = 0usize;
    for c in text.chars() {
        if c.is_ascii_digit() {
            run += 1;
            if run >= 8 {
                return true;
            }
        } else {
            run = 0;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_not_a_command() {
        let parsed = parse_command(Some("hello there"), None);
        assert_eq!(parsed, ParsedCommand::not_a_command());

        let parsed = parse_command(None, Some("stratusbot"));
        assert!(!parsed.suspicious);
        assert!(parsed.command.is_none());
    }

    #[test]
    fn start_with_referral_argument_is_clean() {
        let parsed = parse_command(Some("/start ref_12345"), Some("mybot"));
        assert_eq!(parsed.command.as_deref(), Some("/start"));
        assert_eq!(parsed.argument.as_deref(), Some("ref_12345"));
        assert!(!parsed.suspicious);
    }

    #[test]
    fn long_referral_ids_do_not_trip_the_digit_scan() {
        let parsed = parse_command(Some("/start ref_123456789"), None);
        assert!(!parsed.suspicious);
        assert_eq!(parsed.argument.as_deref(), Some("ref_123456789"));
    }

    #[test]
    fn id_key_argument_is_flagged_as_injection() {
        let parsed = parse_command(Some("/start id=999999999"), None);
        assert!(parsed.suspicious);
        assert!(parsed.reason.unwrap().contains("injection"));
    }

    #[test]
    fn bare_digit_run_is_flagged() {
        let parsed = parse_command(Some("/start 99999999"), None);
        assert!(parsed.suspicious);
        assert_eq!(parsed.reason, Some("ID injection"));
    }

    #[test]
    fn deep_link_marker_is_flagged() {
        let parsed = parse_command(Some("/start tg://user?id=5"), None);
        assert!(parsed.suspicious);
        assert_eq!(parsed.reason, Some("ID injection"));
    }

    #[test]
    fn oversized_text_is_an_injection_payload() {
        let text = format!("/start {}", "a".repeat(130));
        let parsed = parse_command(Some(&text), None);
        assert!(parsed.suspicious);
        assert_eq!(parsed.reason, Some("injection payload"));
    }

    #[test]
    fn malformed_first_token_is_flagged() {
        for text in ["/Start", "/st4rt", "/", "/menu@"] {
            let parsed = parse_command(Some(text), None);
            assert!(parsed.suspicious, "{} should be suspicious", text);
            assert_eq!(parsed.reason, Some("malformed command"));
        }
    }

    #[test]
    fn too_many_arguments_is_flagged() {
        let parsed = parse_command(Some("/start ref_1 ref_2"), None);
        assert!(parsed.suspicious);
        assert_eq!(parsed.reason, Some("too many arguments"));
    }

    #[test]
    fn non_referral_argument_is_unsupported() {
        let parsed = parse_command(Some("/start hello"), None);
        assert!(parsed.suspicious);
        assert_eq!(parsed.reason, Some("unsupported payload"));

        // Leading zero breaks the referral shape.
        let parsed = parse_command(Some("/start ref_012"), None);
        assert!(parsed.suspicious);
    }

    #[test]
    fn foreign_mention_is_accepted_but_not_ours() {
        let parsed = parse_command(Some("/menu@otherbot"), Some("mybot"));
        assert!(!parsed.suspicious);
        assert!(parsed.addressed_to_other);
        assert_eq!(parsed.command.as_deref(), Some("/menu"));
    }

    #[test]
    fn own_mention_is_actionable() {
        let parsed = parse_command(Some("/menu@MyBot"), Some("mybot"));
        assert!(!parsed.addressed_to_other);
        assert_eq!(parsed.command.as_deref(), Some("/menu"));
    }

    #[test]
    fn mention_without_configured_identity_is_not_ours() {
        let parsed = parse_command(Some("/menu@somebot"), None);
        assert!(parsed.addressed_to_other);
    }

    #[test]
    fn bare_clear_and_menu_parse() {
        for cmd in ["/clear", "/menu"] {
            let parsed = parse_command(Some(cmd), Some("mybot"));
            assert_eq!(parsed.command.as_deref(), Some(cmd));
            assert!(!parsed.suspicious);
        }
    }
}
