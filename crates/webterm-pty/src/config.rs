//! Multiplexer configuration and child process setup.

use std::path::PathBuf;
use std::time::Duration;

use regex_lite::Regex;
use tracing::warn;
use webterm_core::{DEFAULT_SCROLLBACK_LINES, PROMPT_DIRECTIVE, PromptFormat};

/// Shell used when neither the request nor `$SHELL` names one.
pub const FALLBACK_SHELL: &str = "/bin/sh";

/// First words that are exec'd directly instead of through `sh -c`.
const SHELL_PATH_PATTERN: &str = r"^[/\w]*/(ba|c|k|tc)?sh$";

/// Parent variables passed through to every child.
pub const DEFAULT_COPY_ENV: &[&str] = &[
    "HOME",
    "LOGNAME",
    "PATH",
    "SECURITYSESSIONID",
    "SHELL",
    "SSH_AUTH_SOCK",
    "USER",
    "USERNAME",
];

/// Configuration for [`Multiplex`](crate::Multiplex).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultiplexConfig {
    /// Command for sessions created without one.
    pub command: Option<String>,
    pub prompt: Option<PromptFormat>,
    /// `TERM` in the child.
    pub term_type: String,
    /// How long a session may stay silent before an idle sweep reaps it.
    pub idle_timeout: Duration,
    /// Minimum spacing between two row updates of one session.
    pub update_interval: Duration,
    /// Upper bound on one poll of the pty fds.
    pub poll_interval: Duration,
    pub shared_secret: String,
    /// Path hint exported as the first half of `WEBTERM_PATH`.
    pub host: String,
    /// Host name that click-paste treats as local.
    pub local_host: String,
    /// Prepended to the child `PATH` and searched by click-paste.
    pub bin_dir: Option<PathBuf>,
    pub copy_env: Vec<String>,
    pub max_scroll_lines: usize,
}

impl Default for MultiplexConfig {
    fn default() -> Self {
        Self {
            command: None,
            prompt: None,
            term_type: "linux".to_string(),
            idle_timeout: Duration::from_secs(300),
            update_interval: Duration::from_millis(50),
            poll_interval: Duration::from_millis(20),
            shared_secret: String::new(),
            host: "local".to_string(),
            local_host: local_host_name(),
            bin_dir: None,
            copy_env: DEFAULT_COPY_ENV.iter().map(|var| (*var).to_string()).collect(),
            max_scroll_lines: DEFAULT_SCROLLBACK_LINES,
        }
    }
}

impl MultiplexConfig {
    /// Defaults overlaid with `WEBTERM_*` variables from the process
    /// environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().overlay(|key| std::env::var(key).ok())
    }

    /// Apply `WEBTERM_COMMAND`, `WEBTERM_TERM`, `WEBTERM_IDLE_TIMEOUT` and
    /// `WEBTERM_SHARED_SECRET` as reported by `lookup`.
    #[must_use]
    pub fn overlay(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(command) = lookup("WEBTERM_COMMAND").filter(|c| !c.trim().is_empty()) {
            self.command = Some(command);
        }
        if let Some(term) = lookup("WEBTERM_TERM").filter(|t| !t.is_empty()) {
            self.term_type = term;
        }
        if let Some(raw) = lookup("WEBTERM_IDLE_TIMEOUT") {
            match raw.trim().parse::<u64>() {
                Ok(secs) => self.idle_timeout = Duration::from_secs(secs),
                Err(err) => warn!(value = %raw, %err, "ignoring malformed WEBTERM_IDLE_TIMEOUT"),
            }
        }
        if let Some(secret) = lookup("WEBTERM_SHARED_SECRET") {
            self.shared_secret = secret;
        }
        self
    }

    #[must_use]
    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    #[must_use]
    pub fn with_prompt(mut self, prompt: PromptFormat) -> Self {
        self.prompt = Some(prompt);
        self
    }

    #[must_use]
    pub fn with_term_type(mut self, term_type: impl Into<String>) -> Self {
        self.term_type = term_type.into();
        self
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    #[must_use]
    pub fn with_shared_secret(mut self, secret: impl Into<String>) -> Self {
        self.shared_secret = secret.into();
        self
    }

    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    #[must_use]
    pub fn with_local_host(mut self, host: impl Into<String>) -> Self {
        self.local_host = host.into();
        self
    }

    #[must_use]
    pub fn with_bin_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.bin_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn with_max_scroll_lines(mut self, lines: usize) -> Self {
        self.max_scroll_lines = lines;
        self
    }

    /// Argument vector for a session running `command`.
    ///
    /// A command whose first word is a shell path runs directly; anything
    /// else goes through `sh -c`. Without a command the configured default
    /// is used, then `$SHELL`.
    #[must_use]
    pub fn argv(&self, command: Option<&str>, shell: Option<String>) -> Vec<String> {
        let command = command
            .or(self.command.as_deref())
            .map(str::trim)
            .filter(|c| !c.is_empty());
        match command {
            Some(command) => {
                let words: Vec<&str> = command.split_whitespace().collect();
                if words.first().is_some_and(|first| is_shell_path(first)) {
                    words.into_iter().map(str::to_string).collect()
                } else {
                    vec![
                        FALLBACK_SHELL.to_string(),
                        "-c".to_string(),
                        command.to_string(),
                    ]
                }
            }
            None => vec![
                shell
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| FALLBACK_SHELL.to_string()),
            ],
        }
    }

    /// Environment of a new child, built from the parent variables that
    /// `lookup` reports.
    #[must_use]
    pub fn child_env(
        &self,
        session: &str,
        cookie: &str,
        height: u16,
        width: u16,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Vec<(String, String)> {
        let mut env = Vec::new();
        for var in &self.copy_env {
            let Some(mut value) = lookup(var) else {
                continue;
            };
            if var == "PATH"
                && let Some(bin_dir) = &self.bin_dir
            {
                value = format!("{}:{value}", bin_dir.display());
            }
            env.push((var.clone(), value));
        }
        env.push(("COLUMNS".to_string(), width.to_string()));
        env.push(("LINES".to_string(), height.to_string()));
        env.push(("TERM".to_string(), self.term_type.clone()));
        env.push(("WEBTERM_COOKIE".to_string(), cookie.to_string()));
        env.push(("WEBTERM_SHARED_SECRET".to_string(), self.shared_secret.clone()));
        env.push(("WEBTERM_PATH".to_string(), format!("{}/{session}", self.host)));
        if let Some(prompt) = &self.prompt {
            env.push(("WEBTERM_PROMPT".to_string(), prompt.shell_prompt()));
            env.push((
                "PROMPT_COMMAND".to_string(),
                format!(
                    "export PS1=$WEBTERM_PROMPT; echo -n \"\\033[?{code};${{WEBTERM_COOKIE}}h$PWD\\033[?{code};l\"",
                    code = PROMPT_DIRECTIVE
                ),
            ));
        }
        env
    }
}

fn is_shell_path(word: &str) -> bool {
    Regex::new(SHELL_PATH_PATTERN).is_ok_and(|re| re.is_match(word))
}

#[cfg(unix)]
fn local_host_name() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_default()
}

#[cfg(not(unix))]
fn local_host_name() -> String {
    String::new()
}
