pub const MAXARGS: usize = 128;

/// One command within a pipeline: the argument vector plus optional
/// file redirections. Immutable once parsed.
#[derive(Debug, Clone, Default)]
pub struct Command {
    /// Command and its arguments; `argv[0]` is the executable name.
    pub argv: Vec<String>,
    /// Input redirection file, if any.
    pub infile: Option<String>,
    /// Output redirection file, if any.
    pub outfile: Option<String>,
    /// Append mode flag for output redirection.
    pub append: bool,
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.argv.join(" "))
    }
}

/// An ordered sequence of commands from one input line, split on `|`.
/// Only the first stage's input redirection and the last stage's output
/// redirection are honored by the execution engine.
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub commands: Vec<Command>,
}

impl std::fmt::Display for Pipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rendered: Vec<String> = self.commands.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", rendered.join(" | "))
    }
}

/// Parses one input line into a `Pipeline` and a background flag.
/// Handles tokenization (including quoted strings), input redirection
/// (`<`), output redirection (`>` or `>>`), pipelines (`|`), and a
/// trailing `&` for background execution.
pub fn parse_command_line(cmdline: &str) -> Result<(Pipeline, bool), String> {
    let tokens = tokenize(cmdline)?;
    if tokens.is_empty() {
        return Err("empty command line".into());
    }

    let mut commands = Vec::new();
    let mut current = Command::default();
    let mut bg = false;
    let mut iter = tokens.into_iter().peekable();

    while let Some(token) = iter.next() {
        match token.as_str() {
            "<" => match iter.next() {
                Some(file) => current.infile = Some(file),
                None => return Err("no input file specified".into()),
            },
            ">" | ">>" => {
                let is_append = token == ">>";
                match iter.next() {
                    Some(file) => {
                        current.outfile = Some(file);
                        current.append = is_append;
                    }
                    None => return Err("no output file specified".into()),
                }
            }
            "|" => {
                if current.argv.is_empty() {
                    return Err("missing command before `|`".into());
                }
                commands.push(std::mem::take(&mut current));
            }
            "&" => {
                if iter.peek().is_some() {
                    return Err("`&` must be the last token".into());
                }
                bg = true;
            }
            _ => {
                if current.argv.len() >= MAXARGS - 1 {
                    return Err("too many arguments".into());
                }
                current.argv.push(token);
            }
        }
    }

    if current.argv.is_empty() {
        return Err("missing command".into());
    }
    commands.push(current);
    Ok((Pipeline { commands }, bg))
}

/// Splits the input line into tokens: quoted strings (single or double
/// quotes) and the special tokens `<`, `>`, `>>`, `|`, and `&`.
fn tokenize(input: &str) -> Result<Vec<String>, String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&ch) = chars.peek() {
        if ch.is_whitespace() {
            chars.next();
        } else if ch == '"' || ch == '\'' {
            let quote = ch;
            chars.next();
            let mut token = String::new();
            let mut closed = false;
            for c in chars.by_ref() {
                if c == quote {
                    closed = true;
                    break;
                }
                token.push(c);
            }
            if !closed {
                return Err("unterminated quote".into());
            }
            tokens.push(token);
        } else if ch == '>' {
            chars.next();
            if chars.peek() == Some(&'>') {
                chars.next();
                tokens.push(">>".to_string());
            } else {
                tokens.push(">".to_string());
            }
        } else if ch == '<' || ch == '|' || ch == '&' {
            chars.next();
            tokens.push(ch.to_string());
        } else {
            let mut token = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || matches!(c, '<' | '>' | '|' | '&') {
                    break;
                }
                token.push(c);
                chars.next();
            }
            tokens.push(token);
        }
    }
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_simple() {
        let tokens = tokenize("ls -l").unwrap();
        assert_eq!(tokens, vec!["ls", "-l"]);
    }

    #[test]
    fn test_tokenize_quotes() {
        let tokens = tokenize("echo \"hello world\"").unwrap();
        assert_eq!(tokens, vec!["echo", "hello world"]);
    }

    #[test]
    fn test_tokenize_special_without_spaces() {
        let tokens = tokenize("cat<in.txt|sort>>out.txt").unwrap();
        assert_eq!(tokens, vec!["cat", "<", "in.txt", "|", "sort", ">>", "out.txt"]);
    }

    #[test]
    fn test_tokenize_unterminated_quote() {
        assert!(tokenize("echo 'oops").is_err());
    }

    #[test]
    fn test_parse_command_line() {
        let input = "grep 'pattern' < input.txt | sort > output.txt &";
        let (pipeline, bg) = parse_command_line(input).unwrap();
        assert_eq!(pipeline.commands.len(), 2);
        assert_eq!(pipeline.commands[0].argv, vec!["grep", "pattern"]);
        assert_eq!(pipeline.commands[0].infile, Some("input.txt".to_string()));
        assert_eq!(pipeline.commands[1].argv, vec!["sort"]);
        assert_eq!(pipeline.commands[1].outfile, Some("output.txt".to_string()));
        assert!(!pipeline.commands[1].append);
        assert!(bg);
    }

    #[test]
    fn test_parse_append_redirection() {
        let (pipeline, bg) = parse_command_line("echo hi >> log.txt").unwrap();
        assert_eq!(pipeline.commands[0].outfile, Some("log.txt".to_string()));
        assert!(pipeline.commands[0].append);
        assert!(!bg);
    }

    #[test]
    fn test_parse_rejects_empty_stage() {
        assert!(parse_command_line("ls | | wc").is_err());
        assert!(parse_command_line("ls |").is_err());
    }

    #[test]
    fn test_parse_rejects_interior_ampersand() {
        assert!(parse_command_line("sleep 1 & echo hi").is_err());
    }

    #[test]
    fn test_pipeline_display() {
        let (pipeline, _) = parse_command_line("cat f | wc -l").unwrap();
        assert_eq!(pipeline.to_string(), "cat f | wc -l");
    }
}
