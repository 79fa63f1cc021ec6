/// Split `/cmd@botname args` into the lowercased command and its argument.
pub(crate) fn parse_command(text: &str) -> Option<(String, String)> {
    let text = text.trim();
    if !text.starts_with('/') {
        return None;
    }
    let mut parts = text.splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    Some((cmd, rest))
}

pub(crate) fn is_start(text: &str) -> bool {
    matches!(parse_command(text), Some((cmd, _)) if cmd == "start")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands_with_bot_suffix() {
        assert_eq!(
            parse_command("/Start@SavvyBot ref42"),
            Some(("start".to_string(), "ref42".to_string()))
        );
        assert_eq!(parse_command("hello"), None);
    }

    #[test]
    fn recognizes_start() {
        assert!(is_start("/start"));
        assert!(is_start(" /start@SavvyBot "));
        assert!(!is_start("/help"));
        assert!(!is_start("start"));
    }
}
