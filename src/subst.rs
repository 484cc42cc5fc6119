use std::env;

pub const VARIABLE_MARKER: char = '$';

/// Replaces each token of the form `$NAME` with the value of the
/// environment variable `NAME`. Unknown names are left as written.
pub fn substitute(argv: &mut [String]) {
    substitute_with(argv, |name| env::var(name).ok())
}

pub(crate) fn substitute_with(argv: &mut [String], lookup: impl Fn(&str) -> Option<String>) {
    for token in argv.iter_mut() {
        let name = match token.strip_prefix(VARIABLE_MARKER) {
            Some(name) if !name.is_empty() => name,
            _ => continue,
        };
        if let Some(value) = lookup(name) {
            *token = value;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::substitute_with;

    fn lookup(name: &str) -> Option<String> {
        match name {
            "HOME" => Some("/home/ada".to_string()),
            "HOMEDIR" => Some("/srv/ada".to_string()),
            "EMPTY" => Some(String::new()),
            _ => None,
        }
    }

    fn run(tokens: &[&str]) -> Vec<String> {
        let mut argv: Vec<String> = tokens.iter().map(|t| t.to_string()).collect();
        substitute_with(&mut argv, lookup);
        argv
    }

    #[test]
    fn test_substitutes_exact_names() {
        assert_eq!(run(&["echo", "$HOME", "$HOMEDIR"]), vec!["echo", "/home/ada", "/srv/ada"]);
    }

    #[test]
    fn test_prefix_does_not_match_longer_name() {
        assert_eq!(run(&["echo", "$HOM"]), vec!["echo", "$HOM"]);
    }

    #[test]
    fn test_leaves_other_tokens_alone() {
        assert_eq!(run(&["echo", "$", "a$HOME", "$EMPTY"]), vec!["echo", "$", "a$HOME", ""]);
    }

    #[test]
    fn test_reads_process_environment() {
        let mut argv = vec!["$PATH".to_string()];
        super::substitute(&mut argv);
        assert_eq!(Some(argv[0].clone()), std::env::var("PATH").ok());
    }
}
