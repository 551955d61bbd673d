//! Prompt detection and command-line HTML markup.
//!
//! A row is a command line when it starts with the configured prompt prefix
//! or carries prompt metadata from the shell's directory hook. The text after
//! the prompt is split shell-lexically and each token is wrapped in a span or
//! a file link so the viewer can make it clickable.

use std::path::Path;

use v_htmlescape::escape;

use crate::screen::RowMeta;

/// Commands whose non-option arguments are file paths.
pub const FILE_COMMANDS: &[&str] = &[
    "cd", "cp", "mv", "rm", "wcp", "wimages", "wls", "wopen", "wvi",
];

/// Characters that start a command-separator token.
pub const COMMAND_DELIMITERS: &[char] = &['<', '>', ';'];

/// The shell prompt as `prefix`, `format`, `suffix`.
///
/// The prefix identifies a prompt row, the suffix marks where the command
/// text begins. The format part is whatever the shell expands in between.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PromptFormat {
    pub prefix: String,
    pub format: String,
    pub suffix: String,
}

impl PromptFormat {
    #[must_use]
    pub fn new(
        prefix: impl Into<String>,
        format: impl Into<String>,
        suffix: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            format: format.into(),
            suffix: suffix.into(),
        }
    }

    /// Column where the prompt text proper begins.
    #[must_use]
    pub fn pre_offset(&self) -> usize {
        self.prefix.chars().count()
    }

    /// `PS1` value handed to the shell.
    #[must_use]
    pub fn shell_prompt(&self) -> String {
        format!("{}{}{} ", self.prefix, self.format, self.suffix)
    }
}

/// Column where command text begins on `line`, or zero if it is not a
/// command line.
///
/// Metadata marks a prompt row only when it is not a wrapped continuation.
#[must_use]
pub fn prompt_offset(line: &str, prompt: Option<&PromptFormat>, meta: Option<&RowMeta>) -> usize {
    let Some(prompt) = prompt else {
        return 0;
    };
    let by_meta = meta.is_some_and(|meta| !meta.is_continuation());
    let by_prefix = !prompt.prefix.is_empty() && line.starts_with(&prompt.prefix);
    if !(by_meta || by_prefix) {
        return 0;
    }
    match line.find(&prompt.suffix) {
        Some(byte_idx) => line[..byte_idx].chars().count() + prompt.suffix.chars().count(),
        None => 0,
    }
}

/// Error from [`shell_split`] on unterminated quoting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnbalancedQuoting;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Space,
    Word,
    Delimiter(char),
}

/// Split a command line into raw tokens that concatenate back to `line`.
///
/// Whitespace runs and runs of the same delimiter character are tokens of
/// their own. Quotes and backslash escapes are kept inside their word. A word
/// ending in `&` (other than a bare `&`) has the `&` split off.
pub fn shell_split(line: &str) -> Result<Vec<&str>, UnbalancedQuoting> {
    let mut tokens = Vec::new();
    let mut kind: Option<TokenKind> = None;
    let mut start = 0;
    let mut single = false;
    let mut double = false;
    let mut escaped = false;

    for (idx, ch) in line.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        if single {
            single = ch != '\'';
            continue;
        }
        if double {
            match ch {
                '\\' => escaped = true,
                '"' => double = false,
                _ => {}
            }
            continue;
        }

        let next = if ch.is_whitespace() {
            TokenKind::Space
        } else if COMMAND_DELIMITERS.contains(&ch) {
            TokenKind::Delimiter(ch)
        } else {
            TokenKind::Word
        };
        if kind != Some(next) {
            if kind.is_some() {
                tokens.push(&line[start..idx]);
            }
            start = idx;
            kind = Some(next);
        }
        match ch {
            '\\' => escaped = true,
            '\'' => single = true,
            '"' => double = true,
            _ => {}
        }
    }
    if single || double || escaped {
        return Err(UnbalancedQuoting);
    }
    if kind.is_some() {
        tokens.push(&line[start..]);
    }

    if let Some(last) = tokens.last().copied() {
        if last.len() > 1 && last.ends_with('&') && !last.trim().is_empty() {
            let split = last.len() - 1;
            tokens.pop();
            tokens.push(&last[..split]);
            tokens.push(&last[split..]);
        }
    }
    Ok(tokens)
}

pub fn prompt_markup(text: &str, entry_index: u64, directory: &str) -> String {
    format!(
        r#"<span class="term-cmd-prompt term-link" id="prompt{entry_index}" data-termdir="{}">{}</span>"#,
        escape(directory),
        escape(text)
    )
}

pub fn plain_markup(text: &str, command: bool) -> String {
    let cmd_class = if command { " term-command" } else { "" };
    format!(
        r#"<span class="term-cmd-text term-link{cmd_class}">{}</span>"#,
        escape(text)
    )
}

pub fn path_markup(text: &str, directory: &str, command: bool) -> String {
    let cmd_class = if command { " term-command" } else { "" };
    let full_path = Path::new(directory).join(text);
    format!(
        r#"<a class="term-cmd-path term-link{cmd_class}" href="file://{}" data-termmime="x-webterm/path" data-termcmd="xpaste">{}</a>"#,
        escape(&full_path.to_string_lossy()),
        escape(text)
    )
}

/// HTML for a command line: prompt anchor followed by marked-up tokens.
///
/// `pre_offset` and `offset` are character columns bounding the prompt text.
#[must_use]
pub fn command_markup(
    entry_index: u64,
    directory: &str,
    pre_offset: usize,
    offset: usize,
    line: &str,
) -> String {
    let prompt: String = line
        .chars()
        .skip(pre_offset)
        .take(offset.saturating_sub(pre_offset))
        .collect();
    let rest: String = line.chars().skip(offset).collect();
    let mut out = prompt_markup(&prompt, entry_index, directory);

    let Ok(tokens) = shell_split(&rest) else {
        out.push_str(&escape(&rest).to_string());
        return out;
    };

    let mut tokens = tokens.into_iter().peekable();
    while let Some(space) = tokens.next_if(|token| token.trim().is_empty()) {
        out.push_str(space);
    }
    let Some(command) = tokens.next() else {
        return out;
    };
    match command.strip_prefix("./") {
        Some(path) if !directory.is_empty() => out.push_str(&path_markup(path, directory, true)),
        _ => out.push_str(&plain_markup(command, true)),
    }

    let mut file_args = FILE_COMMANDS.contains(&command);
    for token in tokens {
        if token.trim().is_empty() {
            out.push_str(token);
        } else if token.starts_with(COMMAND_DELIMITERS) {
            out.push_str(&plain_markup(token, false));
            file_args = false;
        } else if !directory.is_empty()
            && !token.starts_with('-')
            && (file_args || token.starts_with("./") || token.starts_with("../"))
        {
            out.push_str(&path_markup(token, directory, false));
        } else {
            out.push_str(&plain_markup(token, false));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt() -> PromptFormat {
        PromptFormat::new("webterm> ", r"\W", "$")
    }

    #[test]
    fn prompt_offset_by_prefix() {
        let p = prompt();
        assert_eq!(prompt_offset("webterm> src$ ls", Some(&p), None), 13);
        assert_eq!(prompt_offset("total 12", Some(&p), None), 0);
        assert_eq!(prompt_offset("webterm> no suffix", Some(&p), None), 0);
        assert_eq!(prompt_offset("webterm> src$ ls", None, None), 0);
    }

    #[test]
    fn prompt_offset_by_meta_ignores_continuations() {
        let p = prompt();
        let meta = RowMeta::prompt("/home");
        assert_eq!(prompt_offset("x$ ls", Some(&p), Some(&meta)), 2);
        assert_eq!(prompt_offset("x$ ls", Some(&p), Some(&meta.continued())), 0);
    }

    #[test]
    fn prompt_offset_counts_chars_not_bytes() {
        let p = prompt();
        assert_eq!(prompt_offset("webterm> héllo$ ls", Some(&p), None), 15);
    }

    #[test]
    fn split_keeps_whitespace_and_delimiters() {
        let tokens = shell_split("  cat a.txt>out;  ls").expect("balanced");
        assert_eq!(tokens, vec!["  ", "cat", " ", "a.txt", ">", "out", ";", "  ", "ls"]);
        assert_eq!(tokens.concat(), "  cat a.txt>out;  ls");
    }

    #[test]
    fn split_respects_quotes_and_escapes() {
        let tokens = shell_split(r#"echo "a b" 'c;d' e\ f"#).expect("balanced");
        assert_eq!(tokens, vec!["echo", " ", r#""a b""#, " ", "'c;d'", " ", r"e\ f"]);
    }

    #[test]
    fn split_separates_trailing_ampersand() {
        assert_eq!(
            shell_split("sleep 10&").expect("balanced"),
            vec!["sleep", " ", "10", "&"]
        );
        assert_eq!(shell_split("a &").expect("balanced"), vec!["a", " ", "&"]);
    }

    #[test]
    fn split_rejects_unbalanced() {
        assert_eq!(shell_split("echo 'oops"), Err(UnbalancedQuoting));
        assert_eq!(shell_split(r"echo \"), Err(UnbalancedQuoting));
    }

    fn esc(text: &str) -> String {
        escape(text).to_string()
    }

    #[test]
    fn markup_links_file_command_arguments() {
        let html = command_markup(3, "/home/u", 9, 13, "webterm> ~/u$ cp -r a b;ls c");
        assert!(html.starts_with(r#"<span class="term-cmd-prompt term-link" id="prompt3""#));
        assert!(html.contains("term-command\">cp</span>"));
        assert!(html.contains(r#"<span class="term-cmd-text term-link">-r</span>"#));
        assert!(html.contains(&format!("href=\"file://{}\"", esc("/home/u/a"))));
        assert!(html.contains(&format!("href=\"file://{}\"", esc("/home/u/b"))));
        // `;` ends file-argument mode for `cp`.
        assert!(html.contains(r#"<span class="term-cmd-text term-link">c</span>"#));
    }

    #[test]
    fn markup_links_relative_paths_for_any_command() {
        let html = command_markup(1, "/srv", 0, 2, "$ cat ../x ./y z");
        assert!(html.contains(&format!(">{}</a>", esc("../x"))));
        assert!(html.contains(&format!(">{}</a>", esc("./y"))));
        assert!(html.contains(r#"<span class="term-cmd-text term-link">z</span>"#));
    }

    #[test]
    fn markup_local_executable_is_a_link() {
        let html = command_markup(1, "/srv", 0, 2, "$ ./run.sh");
        assert!(html.contains(&format!(
            "term-command\" href=\"file://{}\"",
            esc("/srv/run.sh")
        )));
    }

    #[test]
    fn markup_escapes_malformed_rest() {
        let html = command_markup(1, "/", 0, 2, "$ echo '<b>");
        assert!(html.ends_with(&esc("echo '<b>")));
        assert!(!html.contains("<b>"));
    }
}
