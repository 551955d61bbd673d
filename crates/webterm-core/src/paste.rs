//! Click-paste: turn a clicked file or word into command-line text.
//!
//! The viewer sends the clicked text and/or a `file://` URL plus options. The
//! result depends on the state of the command line: on an empty line the
//! click can supply the command itself; on a partly typed line it supplies
//! an argument. File URLs under the working directory are pasted as relative
//! paths.

use std::env;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::PasteError;

/// Prefix of URLs that name files.
pub const FILE_URL_PREFIX: &str = "file://";

/// Commands that take full URLs rather than local paths.
pub const REMOTE_FILE_COMMANDS: &[&str] = &["wcp"];

/// What a remote copy becomes when both ends are on this host.
pub const LOCAL_RENAME_COMMAND: &str = "mv";

/// Placeholder in a command template replaced by the pasted path.
pub const PATH_PLACEHOLDER: &str = "%(path)";

/// Viewer-supplied paste options.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PasteOptions {
    /// Command to put in front of the pasted path on an empty line.
    pub command: String,
    /// Destination URL appended after the source.
    pub dest_url: String,
    /// Retract this scrollback entry first if the command line is empty.
    pub clear_last: Option<u64>,
    /// Force or suppress relative-path normalization.
    pub normalize: Option<bool>,
    /// Append a newline so the command runs immediately.
    pub enter: bool,
}

/// Parts of a `file://host/path?query` URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUrl {
    pub host: String,
    pub path: String,
    pub query: String,
}

impl FileUrl {
    /// Parse a `file://` URL. Anything else yields `None`.
    #[must_use]
    pub fn parse(url: &str) -> Option<Self> {
        let rest = url.strip_prefix(FILE_URL_PREFIX)?;
        let (host_path, query) = match rest.find('?') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        let (host, path) = match host_path.find('/') {
            Some(idx) => (&host_path[..idx], &host_path[idx..]),
            None => (host_path, "/"),
        };
        Some(Self {
            host: host.to_string(),
            path: path.to_string(),
            query: query.to_string(),
        })
    }

    /// Last path component.
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or_default()
    }

    /// Whether the URL names a file on `local_host`.
    #[must_use]
    pub fn is_local(&self, local_host: &str) -> bool {
        self.host.is_empty() || self.host == "localhost" || self.host == local_host
    }
}

/// Path of `url` relative to `cwd`.
///
/// Returns `.` for the directory itself, and the absolute path when the
/// relative form would climb three or more levels.
#[must_use]
pub fn relative_file_url(url: &str, cwd: &str) -> String {
    let path = FileUrl::parse(url).map_or_else(|| url.to_string(), |parsed| parsed.path);
    if path == cwd {
        return ".".to_string();
    }
    match pathdiff::diff_paths(&path, cwd) {
        Some(relative) => {
            let relative = relative.to_string_lossy().into_owned();
            if relative.starts_with("../../../") || relative.is_empty() {
                path
            } else {
                relative
            }
        }
        None => path,
    }
}

/// Snapshot of the command line a paste lands on.
#[derive(Debug, Clone, Copy)]
pub struct CommandLine<'a> {
    /// Display text of the last active row.
    pub line: &'a str,
    /// Cursor column when the cursor sits on that row.
    pub cursor_col: Option<usize>,
    /// Column where command text begins, zero when not at a prompt.
    pub prompt_offset: usize,
    /// Working directory of the shell, empty when unknown.
    pub cwd: &'a str,
    /// Normalize paths unless the options say otherwise.
    pub normalize_by_default: bool,
    /// Host name treated as local besides `localhost`.
    pub local_host: &'a str,
    /// Extra directory searched for commands before `PATH`.
    pub search_dir: Option<&'a Path>,
}

/// Compute the text to type for a click-paste, or `None` if nothing applies.
pub fn compose(
    cmdline: &CommandLine<'_>,
    text: &str,
    file_url: &str,
    options: &PasteOptions,
) -> Result<Option<String>, PasteError> {
    let mut command = options.command.clone();
    let mut full_urls = REMOTE_FILE_COMMANDS.contains(&command.as_str());
    if full_urls && both_local(file_url, &options.dest_url, cmdline.local_host) {
        command = LOCAL_RENAME_COMMAND.to_string();
        full_urls = false;
    }

    let mut text = text.to_string();
    if text.is_empty() && !file_url.is_empty() {
        text = if full_urls {
            file_url.to_string()
        } else {
            FileUrl::parse(file_url).map_or_else(|| file_url.to_string(), |url| url.path)
        };
    }

    let offset = cmdline.prompt_offset;
    let mut normalize = options.normalize;
    let mut space_prefix = "";
    let mut command_prefix = String::new();
    let mut expect_filename = false;
    let mut pre_line = String::new();

    if offset > 0 {
        if normalize.is_none() && cmdline.normalize_by_default {
            normalize = Some(true);
        }
        let typed: String = match cmdline.cursor_col {
            Some(col) => cmdline.line.chars().take(col).collect(),
            None => cmdline.line.to_string(),
        };
        pre_line = typed.chars().skip(offset).collect();
        if pre_line.starts_with(' ') {
            pre_line.remove(0);
        }

        if pre_line.trim().is_empty() {
            if !command.is_empty() {
                let program = command.split_whitespace().next().unwrap_or_default();
                require_command(program, cmdline)?;
                command_prefix = command.clone();
                expect_filename = true;
            } else if !text.is_empty() {
                if pre_line.is_empty() {
                    require_command(&text, cmdline)?;
                }
                command_prefix = text.replace(' ', "\\ ");
                text.clear();
            }
            if !command_prefix.is_empty() && !command_prefix.ends_with(' ') {
                command_prefix.push(' ');
            }
        } else {
            expect_filename = true;
            if !pre_line.ends_with(' ') {
                space_prefix = " ";
            }
        }
    }

    if !cmdline.cwd.is_empty() && normalize == Some(true) && expect_filename && !file_url.is_empty()
    {
        if full_urls {
            text = file_url.to_string();
        } else {
            let relative = relative_file_url(file_url, cmdline.cwd);
            if !relative.starts_with('/') {
                text = relative;
            }
        }
    }

    if text.is_empty() && command_prefix.is_empty() {
        return Ok(None);
    }

    let text = text.replace(' ', "\\ ");
    let mut paste = if expect_filename && command_prefix.contains(PATH_PLACEHOLDER) {
        command_prefix.replace(PATH_PLACEHOLDER, &text)
    } else {
        format!("{command_prefix}{space_prefix}{text} ")
    };

    if !options.dest_url.is_empty() {
        if !paste.is_empty() && !paste.ends_with(' ') {
            paste.push(' ');
        }
        if full_urls {
            paste.push_str(&options.dest_url);
        } else {
            paste.push_str(&relative_file_url(&options.dest_url, cmdline.cwd));
        }
    }

    if options.enter && offset > 0 && pre_line.is_empty() && !command.is_empty() {
        paste.push('\n');
    }
    Ok(Some(paste))
}

fn both_local(source: &str, dest: &str, local_host: &str) -> bool {
    let is_local = |url: &str| FileUrl::parse(url).is_some_and(|url| url.is_local(local_host));
    is_local(source) && is_local(dest)
}

fn require_command(program: &str, cmdline: &CommandLine<'_>) -> Result<(), PasteError> {
    let program = program.trim();
    if !program.is_empty() && resolves(program, cmdline.search_dir, cmdline.cwd) {
        Ok(())
    } else {
        Err(PasteError::command_not_found(program))
    }
}

fn resolves(program: &str, search_dir: Option<&Path>, cwd: &str) -> bool {
    let mut dirs: Vec<PathBuf> = search_dir.map(Path::to_path_buf).into_iter().collect();
    if let Some(path) = env::var_os("PATH") {
        dirs.extend(env::split_paths(&path));
    }
    let cwd = if cwd.is_empty() { Path::new("/") } else { Path::new(cwd) };
    match env::join_paths(dirs) {
        Ok(paths) => which::which_in(program, Some(paths), cwd).is_ok(),
        Err(_) => which::which(program).is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at_prompt<'a>(line: &'a str, cwd: &'a str) -> CommandLine<'a> {
        CommandLine {
            line,
            cursor_col: Some(line.chars().count()),
            prompt_offset: 2,
            cwd,
            normalize_by_default: true,
            local_host: "box",
            search_dir: None,
        }
    }

    fn with_command(command: &str) -> PasteOptions {
        PasteOptions {
            command: command.to_string(),
            ..PasteOptions::default()
        }
    }

    #[test]
    fn file_url_parts() {
        let url = FileUrl::parse("file://box/home/u/a.txt?hmac=1").expect("file url");
        assert_eq!(url.host, "box");
        assert_eq!(url.path, "/home/u/a.txt");
        assert_eq!(url.query, "?hmac=1");
        assert_eq!(url.file_name(), "a.txt");
        assert!(url.is_local("box"));
        assert!(FileUrl::parse("http://x/y").is_none());
        assert_eq!(FileUrl::parse("file:///tmp").expect("file url").host, "");
    }

    #[test]
    fn relative_paths() {
        assert_eq!(relative_file_url("file:///home/u", "/home/u"), ".");
        assert_eq!(relative_file_url("file:///home/u/src/a.rs", "/home/u"), "src/a.rs");
        assert_eq!(relative_file_url("file:///home/v/x", "/home/u"), "../v/x");
        assert_eq!(relative_file_url("file:///etc/x", "/home/u/a/b"), "/etc/x");
    }

    #[test]
    fn empty_line_with_command_prefix() {
        let cmdline = at_prompt("$ ", "/home/u");
        let paste = compose(&cmdline, "", "file:///home/u/notes.txt", &with_command("cat"));
        assert_eq!(paste, Ok(Some("cat notes.txt ".to_string())));
    }

    #[test]
    fn empty_line_with_text_as_command() {
        let cmdline = at_prompt("$ ", "/home/u");
        let paste = compose(&cmdline, "ls", "", &PasteOptions::default());
        // The command keeps its own separator plus the argument slot's.
        assert_eq!(paste, Ok(Some("ls  ".to_string())));
    }

    #[test]
    fn unknown_command_fails() {
        let cmdline = at_prompt("$ ", "/home/u");
        let paste = compose(&cmdline, "no-such-command-xyz", "", &PasteOptions::default());
        assert_eq!(
            paste,
            Err(PasteError::command_not_found("no-such-command-xyz"))
        );
        let paste = compose(&cmdline, "", "file:///a", &with_command("no-such-command-xyz -q"));
        assert!(matches!(paste, Err(PasteError::CommandNotFound { .. })));
    }

    #[test]
    fn partial_line_gets_argument_with_space() {
        let cmdline = at_prompt("$ vi", "/home/u");
        let paste = compose(&cmdline, "", "file:///home/u/my notes.txt", &PasteOptions::default());
        assert_eq!(paste, Ok(Some(r" my\ notes.txt ".to_string())));

        let spaced = at_prompt("$ vi ", "/home/u");
        let paste = compose(&spaced, "", "file:///home/u/a", &PasteOptions::default());
        assert_eq!(paste, Ok(Some("a ".to_string())));
    }

    #[test]
    fn normalization_can_be_disabled() {
        let cmdline = at_prompt("$ vi", "/home/u");
        let options = PasteOptions {
            normalize: Some(false),
            ..PasteOptions::default()
        };
        let paste = compose(&cmdline, "", "file:///home/u/a", &options);
        assert_eq!(paste, Ok(Some(" /home/u/a ".to_string())));
    }

    #[test]
    fn distant_paths_stay_absolute() {
        let cmdline = at_prompt("$ vi", "/home/u/a/b");
        let paste = compose(&cmdline, "", "file:///etc/hosts", &PasteOptions::default());
        assert_eq!(paste, Ok(Some(" /etc/hosts ".to_string())));
    }

    #[test]
    fn path_placeholder_is_substituted() {
        let cmdline = at_prompt("$ ", "/home/u");
        let paste = compose(&cmdline, "", "file:///home/u/a.txt", &with_command("cat %(path) | wc -l"));
        assert_eq!(paste, Ok(Some("cat a.txt | wc -l ".to_string())));
    }

    #[test]
    fn enter_only_for_empty_line_with_command() {
        let options = PasteOptions {
            command: "cat".to_string(),
            enter: true,
            ..PasteOptions::default()
        };
        let empty = at_prompt("$ ", "/home/u");
        let paste = compose(&empty, "", "file:///home/u/a", &options);
        assert_eq!(paste, Ok(Some("cat a \n".to_string())));

        let typed = at_prompt("$ cat", "/home/u");
        let paste = compose(&typed, "", "file:///home/u/a", &options);
        assert_eq!(paste, Ok(Some(" a ".to_string())));
    }

    #[test]
    fn local_copy_becomes_rename() {
        let cmdline = at_prompt("$ ", "/home/u");
        let options = PasteOptions {
            command: "wcp".to_string(),
            dest_url: "file://box/home/u/docs".to_string(),
            ..PasteOptions::default()
        };
        let paste = compose(&cmdline, "", "file:///home/u/a.txt", &options);
        assert_eq!(paste, Ok(Some("mv a.txt docs".to_string())));
    }

    #[cfg(unix)]
    #[test]
    fn remote_copy_keeps_urls() {
        use std::os::unix::fs::PermissionsExt;

        let bin = tempfile::tempdir().expect("tempdir");
        let helper = bin.path().join("wcp");
        std::fs::write(&helper, "#!/bin/sh\n").expect("write helper");
        std::fs::set_permissions(&helper, std::fs::Permissions::from_mode(0o755))
            .expect("chmod helper");

        let mut cmdline = at_prompt("$ ", "/home/u");
        cmdline.search_dir = Some(bin.path());
        let options = PasteOptions {
            command: "wcp".to_string(),
            dest_url: "file://other/srv".to_string(),
            ..PasteOptions::default()
        };
        let paste = compose(&cmdline, "", "file:///home/u/a.txt", &options);
        assert_eq!(
            paste,
            Ok(Some("wcp file:///home/u/a.txt file://other/srv".to_string()))
        );
    }

    #[test]
    fn not_at_prompt_pastes_raw_text() {
        let cmdline = CommandLine {
            prompt_offset: 0,
            ..at_prompt("output", "/home/u")
        };
        let paste = compose(&cmdline, "hello world", "", &PasteOptions::default());
        assert_eq!(paste, Ok(Some(r"hello\ world ".to_string())));
    }
}
