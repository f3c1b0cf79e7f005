use thiserror::Error;

/// A line split into its source prefix, command word, and parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub source: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl Message {
    pub fn new(source: Option<String>, command: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            source,
            command: command.into(),
            params,
        }
    }

    /// Renders the message back to wire form, using the trailing (`:`)
    /// parameter form for the last parameter whenever it is empty or
    /// contains a space — the only cases that require it.
    pub fn format(&self) -> String {
        let mut out = String::new();
        if let Some(source) = &self.source {
            out.push(':');
            out.push_str(source);
            out.push(' ');
        }
        out.push_str(&self.command);
        if let Some((last, rest)) = self.params.split_last() {
            for param in rest {
                out.push(' ');
                out.push_str(param);
            }
            out.push(' ');
            if last.is_empty() || last.contains(' ') || last.starts_with(':') {
                out.push(':');
            }
            out.push_str(last);
        }
        out
    }
}

/// Error raised when a line cannot be parsed into a [`Message`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// The line was only a source prefix with no command following it.
    #[error("line carries a source prefix but no command")]
    PrefixWithoutCommand,
}

/// Splits one already-framed line (no `\r`/`\n`) into source, command, and
/// parameters per the grammar in §4.2 of the design spec.
pub fn parse_line(line: &str) -> Result<Message, ParseError> {
    let mut rest = line;

    let source = if let Some(stripped) = rest.strip_prefix(':') {
        let (prefix, after) = split_first_token(stripped);
        rest = after;
        Some(prefix.to_string())
    } else {
        None
    };

    let (command, after) = split_first_token(rest);
    if command.is_empty() {
        if source.is_some() {
            return Err(ParseError::PrefixWithoutCommand);
        }
        // A blank or whitespace-only line with no prefix: tolerated as a
        // command-less message so the framer's "empty lines are legal"
        // contract holds; the session layer ignores it.
        return Ok(Message::new(source, String::new(), Vec::new()));
    }
    let command = command.to_string();
    rest = after;

    let mut params = Vec::new();
    loop {
        rest = skip_leading_spaces(rest);
        if rest.is_empty() {
            break;
        }
        if let Some(trailing) = rest.strip_prefix(':') {
            params.push(trailing.to_string());
            break;
        }
        let (token, after) = split_first_token(rest);
        params.push(token.to_string());
        rest = after;
    }

    Ok(Message::new(source, command, params))
}

fn skip_leading_spaces(input: &str) -> &str {
    input.trim_start_matches(' ')
}

/// Splits off the first run of non-space bytes, returning it and whatever
/// (possibly space-prefixed) text follows.
fn split_first_token(input: &str) -> (&str, &str) {
    match input.find(' ') {
        Some(idx) => (&input[..idx], &input[idx..]),
        None => (input, ""),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn trailing_parameter_absorbs_spaces() {
        let msg = parse_line(":src.name PRIVMSG #chan :hello world :colon").unwrap();
        assert_eq!(msg.source.as_deref(), Some("src.name"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#chan", "hello world :colon"]);
    }

    #[test]
    fn no_prefix_first_token_is_command() {
        let msg = parse_line("SERVER a.example pass 0 :A server").unwrap();
        assert_eq!(msg.source, None);
        assert_eq!(msg.command, "SERVER");
        assert_eq!(msg.params, vec!["a.example", "pass", "0", "A server"]);
    }

    #[test]
    fn empty_trailing_param_is_legal() {
        let msg = parse_line("ERROR :").unwrap();
        assert_eq!(msg.params, vec![""]);
    }

    #[test]
    fn prefix_without_command_is_malformed() {
        assert_eq!(parse_line(":onlyprefix"), Err(ParseError::PrefixWithoutCommand));
        assert_eq!(
            parse_line(":onlyprefix "),
            Err(ParseError::PrefixWithoutCommand)
        );
    }

    #[test]
    fn runs_of_spaces_separate_tokens() {
        let msg = parse_line("BURST   extra   spacing").unwrap();
        assert_eq!(msg.command, "BURST");
        assert_eq!(msg.params, vec!["extra", "spacing"]);
    }

    fn arb_token() -> impl Strategy<Value = String> {
        "[a-zA-Z0-9.#]{1,12}".prop_filter("no stray colon prefix", |s| !s.starts_with(':'))
    }

    proptest! {
        #[test]
        fn round_trips_without_trailing_spaces(
            source in proptest::option::of(arb_token()),
            command in arb_token(),
            mut params in proptest::collection::vec(arb_token(), 0..5),
        ) {
            // No parameter contains a space in this strategy, so format()
            // never needs the trailing form and every token round-trips
            // positionally.
            let msg = Message::new(source.clone(), command.clone(), params.clone());
            let parsed = parse_line(&msg.format()).unwrap();
            prop_assert_eq!(parsed.source, source);
            prop_assert_eq!(parsed.command, command);
            params.retain(|_| true);
            prop_assert_eq!(parsed.params, params);
        }

        #[test]
        fn round_trips_with_spacey_trailing_param(
            source in proptest::option::of(arb_token()),
            command in arb_token(),
            mut head in proptest::collection::vec(arb_token(), 0..4),
            tail in "[a-zA-Z0-9 .#:]{0,24}",
        ) {
            head.push(tail.clone());
            let msg = Message::new(source.clone(), command.clone(), head.clone());
            let parsed = parse_line(&msg.format()).unwrap();
            prop_assert_eq!(parsed.source, source);
            prop_assert_eq!(parsed.command, command);
            prop_assert_eq!(parsed.params, head);
        }
    }
}
