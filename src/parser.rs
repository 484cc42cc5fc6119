// https://github.com/Geal/nom/blob/master/doc/choosing_a_combinator.md

use nom::{
    branch::alt,
    bytes::complete::{take_till, take_till1, take_while},
    character::complete::char,
    combinator::rest,
    multi::many0,
    sequence::{preceded, terminated},
    IResult,
};

/// Separates independent statements on one input line.
pub const STATEMENT_DELIMITER: char = ';';

#[derive(Debug, PartialEq, Eq, Default)]
pub struct ParsedLine {
    pub argv: Vec<String>,
    pub background: bool,
}

impl ParsedLine {
    pub fn is_blank(&self) -> bool {
        self.argv.is_empty()
    }
}

/// Splits an input line into statements, dropping empty ones.
pub fn split_statements(line: &str) -> impl Iterator<Item = &str> {
    line.split(STATEMENT_DELIMITER)
        .filter(|statement| !statement.trim_matches(' ').is_empty())
}

/// Tokenizes one statement into an argument vector. A trailing `&` token
/// is removed and sets the background flag.
pub fn parse(input: &str) -> ParsedLine {
    let tokens = match parse_tokens(input) {
        Ok((_, tokens)) => tokens,
        Err(_) => Vec::new(),
    };

    let mut argv: Vec<String> = tokens.into_iter().map(str::to_owned).collect();
    let background = argv.last().map_or(false, |last| last == "&");
    if background {
        argv.pop();
    }
    ParsedLine { argv, background }
}

fn spaces(input: &str) -> IResult<&str, &str> {
    take_while(|c: char| c == ' ' || c == '\n')(input)
}

// An unterminated quote runs to the end of the input.
fn quoted_token(input: &str) -> IResult<&str, &str> {
    let closed = terminated(take_till(|c: char| c == '\''), char('\''));
    preceded(char('\''), alt((closed, rest)))(input)
}

fn bare_token(input: &str) -> IResult<&str, &str> {
    take_till1(|c: char| c == ' ' || c == '\n')(input)
}

fn parse_tokens(input: &str) -> IResult<&str, Vec<&str>> {
    let token = terminated(alt((quoted_token, bare_token)), spaces);
    preceded(spaces, many0(token))(input)
}

#[cfg(test)]
mod tests {
    use super::{parse, split_statements, ParsedLine};

    fn argv(line: &str) -> Vec<String> {
        parse(line).argv
    }

    #[test]
    fn test_parse_background_command() {
        assert_eq!(
            parse("ls -l 'my file' &"),
            ParsedLine {
                argv: vec!["ls".into(), "-l".into(), "my file".into()],
                background: true,
            }
        );
    }

    #[test]
    fn test_parse_foreground_command() {
        let parsed = parse("  echo   hello world ");
        assert_eq!(parsed.argv, vec!["echo", "hello", "world"]);
        assert!(!parsed.background);
    }

    #[test]
    fn test_blank_lines() {
        assert!(parse("").is_blank());
        assert!(parse("     ").is_blank());
        assert!(parse("\n").is_blank());
    }

    #[test]
    fn test_ampersand_must_be_its_own_token() {
        let parsed = parse("sleep 5&");
        assert_eq!(parsed.argv, vec!["sleep", "5&"]);
        assert!(!parsed.background);

        let parsed = parse("& ls");
        assert_eq!(parsed.argv, vec!["&", "ls"]);
        assert!(!parsed.background);
    }

    #[test]
    fn test_quotes() {
        assert_eq!(argv("echo ''"), vec!["echo", ""]);
        assert_eq!(argv("echo 'a  b''c d'"), vec!["echo", "a  b", "c d"]);
        assert_eq!(argv("grep 'unterminated quote"), vec!["grep", "unterminated quote"]);
    }

    #[test]
    fn test_quote_inside_token_is_literal() {
        assert_eq!(argv("echo it's here"), vec!["echo", "it's", "here"]);
    }

    #[test]
    fn test_trailing_newline_is_ignored() {
        assert_eq!(argv("jobs\n"), vec!["jobs"]);
    }

    #[test]
    fn test_split_statements() {
        let statements: Vec<&str> = split_statements("echo a; echo b;; ;jobs").collect();
        assert_eq!(statements, vec!["echo a", " echo b", "jobs"]);
        assert_eq!(split_statements(" ; ").count(), 0);
    }
}
