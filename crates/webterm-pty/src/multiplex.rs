//! Session registry and the poll loop that drives it.
//!
//! A [`Multiplex`] owns every live [`Terminal`] together with its pty child.
//! One background thread polls the pty masters, feeds output to the
//! terminals, flushes row updates at most once per update interval and
//! reaps sessions that were killed or went quiet. Every other method may be
//! called from any thread; they all serialize on the registry lock.
//!
//! Output reaches the caller as [`SessionEvent`]s on the channel returned by
//! [`Multiplex::start`], in the order each session produced them.

use std::collections::BTreeMap;
use std::fs::File;
use std::os::fd::AsFd;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::poll::{PollFd, PollFlags, poll};
use nix::unistd::Pid;
use parking_lot::Mutex;
use tracing::{debug, info, warn};
use webterm_core::{
    DirectiveEvent, PasteEnv, PasteOptions, RowUpdate, Terminal, TerminalConfig, TerminalEvent,
};

use crate::config::MultiplexConfig;
use crate::error::{MultiplexError, Result};
use crate::pty_process::{PtyChild, ReadOutcome, poll_timeout, try_reap};

/// Largest single read from a pty master.
const READ_CHUNK: usize = 64 * 1024;

/// How often the loop looks for sessions past their idle timeout.
const IDLE_SWEEP_INTERVAL: Duration = Duration::from_secs(1);

/// What the multiplexer tells its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Something a session's terminal produced.
    Output { session: String, event: TerminalEvent },
    /// The session was reaped and its name is free again.
    Closed { session: String },
}

impl SessionEvent {
    #[must_use]
    pub fn session(&self) -> &str {
        match self {
            SessionEvent::Output { session, .. } | SessionEvent::Closed { session } => session,
        }
    }

    #[must_use]
    pub fn as_row_update(&self) -> Option<&RowUpdate> {
        match self {
            SessionEvent::Output { event, .. } => event.as_row_update(),
            SessionEvent::Closed { .. } => None,
        }
    }

    #[must_use]
    pub fn as_directive(&self) -> Option<&DirectiveEvent> {
        match self {
            SessionEvent::Output { event, .. } => event.as_directive(),
            SessionEvent::Closed { .. } => None,
        }
    }
}

// ── Registry ────────────────────────────────────────────────────────────

#[derive(Debug)]
struct Session {
    terminal: Terminal,
    child: PtyChild,
    output_time: Instant,
    update_time: Option<Instant>,
    /// Killed; reaped by the next idle sweep.
    idle: bool,
}

impl Session {
    fn new(terminal: Terminal, child: PtyChild) -> Self {
        Self {
            terminal,
            child,
            output_time: Instant::now(),
            update_time: None,
            idle: false,
        }
    }

    fn resize(&mut self, height: u16, width: u16) -> std::io::Result<()> {
        self.terminal.resize(height, width);
        self.child.resize(height, width)
    }

    fn update_due(&self, now: Instant, interval: Duration) -> bool {
        let dirty = self.terminal.needs_updating()
            || self.update_time.is_none_or(|time| self.output_time > time);
        dirty
            && self
                .update_time
                .is_none_or(|time| now.duration_since(time) >= interval)
    }

    fn expired(&self, now: Instant, timeout: Duration) -> bool {
        self.idle || now.duration_since(self.output_time) > timeout
    }
}

#[derive(Debug)]
struct Registry {
    sessions: BTreeMap<String, Session>,
    name_count: u64,
    alive: bool,
    check_idle: bool,
    /// Terminated children not yet collected.
    zombies: Vec<Pid>,
}

impl Registry {
    fn new() -> Self {
        Self {
            sessions: BTreeMap::new(),
            name_count: 0,
            alive: true,
            check_idle: false,
            zombies: Vec::new(),
        }
    }

    fn next_name(&mut self) -> String {
        loop {
            self.name_count += 1;
            let name = format!("tty{}", self.name_count);
            if !self.sessions.contains_key(&name) {
                return name;
            }
        }
    }

    fn kill(&mut self, name: &str) {
        if let Some(session) = self.sessions.get_mut(name) {
            session.idle = true;
            self.check_idle = true;
        }
    }

    fn kill_all(&mut self) {
        for session in self.sessions.values_mut() {
            session.idle = true;
        }
        self.check_idle = true;
    }

    fn sweep_idle(&mut self, now: Instant, timeout: Duration, events: &Sender<SessionEvent>) {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|(_, session)| session.expired(now, timeout))
            .map(|(name, _)| name.clone())
            .collect();
        for name in expired {
            self.reap(&name, events);
        }
    }

    fn reap(&mut self, name: &str, events: &Sender<SessionEvent>) {
        let Some(Session {
            mut terminal,
            child,
            ..
        }) = self.sessions.remove(name)
        else {
            return;
        };
        forward(events, name, &mut terminal);
        let pid = child.pid();
        if let Err(err) = child.terminate() {
            warn!(session = %name, %pid, %err, "failed to signal child");
        }
        drop(child);
        if !try_reap(pid) {
            self.zombies.push(pid);
        }
        info!(session = %name, %pid, "session reaped");
        let _ = events.send(SessionEvent::Closed {
            session: name.to_string(),
        });
    }

    fn reap_all(&mut self, events: &Sender<SessionEvent>) {
        let names: Vec<String> = self.sessions.keys().cloned().collect();
        for name in names {
            self.reap(&name, events);
        }
    }

    fn collect_zombies(&mut self) {
        self.zombies.retain(|pid| !try_reap(*pid));
    }
}

/// Send everything `terminal` has queued. A closed receiver is not an error.
fn forward(events: &Sender<SessionEvent>, name: &str, terminal: &mut Terminal) {
    for event in terminal.drain_events() {
        if events
            .send(SessionEvent::Output {
                session: name.to_string(),
                event,
            })
            .is_err()
        {
            debug!(session = %name, "event receiver gone");
            return;
        }
    }
}

// ── Multiplex ───────────────────────────────────────────────────────────

#[derive(Debug)]
struct Shared {
    config: MultiplexConfig,
    registry: Mutex<Registry>,
    events: Sender<SessionEvent>,
}

/// Handle on the session registry and its loop thread.
///
/// Dropping the handle shuts the loop down and reaps every session.
#[derive(Debug)]
pub struct Multiplex {
    shared: Arc<Shared>,
    thread: Option<JoinHandle<()>>,
}

impl Multiplex {
    /// Start the loop thread. Events arrive on the returned receiver until
    /// the loop stops.
    pub fn start(config: MultiplexConfig) -> Result<(Self, Receiver<SessionEvent>)> {
        let (events, receiver) = mpsc::channel();
        let shared = Arc::new(Shared {
            config,
            registry: Mutex::new(Registry::new()),
            events,
        });
        let loop_shared = Arc::clone(&shared);
        let thread = thread::Builder::new()
            .name("webterm-multiplex".to_string())
            .spawn(move || run_loop(&loop_shared))?;
        Ok((
            Self {
                shared,
                thread: Some(thread),
            },
            receiver,
        ))
    }

    #[must_use]
    pub fn config(&self) -> &MultiplexConfig {
        &self.shared.config
    }

    /// Open a session, or resize and return the existing one with that name.
    ///
    /// Without a name the session is called `tty{n}`. Returns the session
    /// name and its cookie.
    pub fn terminal(
        &self,
        name: Option<&str>,
        command: Option<&str>,
        height: u16,
        width: u16,
    ) -> Result<(String, String)> {
        let height = height.max(1);
        let width = width.max(1);
        let config = &self.shared.config;
        let mut registry = self.shared.registry.lock();
        if !registry.alive {
            return Err(MultiplexError::ShuttingDown);
        }
        let name = match name.filter(|name| !name.is_empty()) {
            Some(name) => name.to_string(),
            None => registry.next_name(),
        };

        if let Some(session) = registry.sessions.get_mut(&name) {
            let cookie = session.terminal.cookie().to_string();
            if let Err(err) = session.resize(height, width) {
                warn!(session = %name, %err, "resize failed");
                registry.kill(&name);
            }
            return Ok((name, cookie));
        }

        let mut terminal_config = TerminalConfig::default()
            .with_size(width, height)
            .with_max_scroll_lines(config.max_scroll_lines);
        if let Some(prompt) = &config.prompt {
            terminal_config = terminal_config.with_prompt(prompt.clone());
        }
        let terminal = Terminal::new(name.clone(), terminal_config);
        let cookie = terminal.cookie().to_string();

        let argv = config.argv(command, std::env::var("SHELL").ok());
        let env = config.child_env(&name, &cookie, height, width, |key| {
            std::env::var(key).ok()
        });
        let home = std::env::var("HOME").ok();
        let child = PtyChild::spawn(&argv, &env, home.as_deref(), height, width)?;
        info!(session = %name, pid = %child.pid(), width, height, "session opened");

        registry
            .sessions
            .insert(name.clone(), Session::new(terminal, child));
        Ok((name, cookie))
    }

    /// Send keystrokes to a session. A failed write kills the session.
    pub fn term_write(&self, name: &str, data: &[u8]) {
        let mut registry = self.shared.registry.lock();
        let Some(session) = registry.sessions.get(name) else {
            debug!(session = %name, "write to unknown session");
            return;
        };
        if let Err(err) = session.child.write_all(data) {
            warn!(session = %name, %err, "pty write failed");
            registry.kill(name);
        }
    }

    pub fn set_size(&self, name: &str, height: u16, width: u16) {
        let mut registry = self.shared.registry.lock();
        let Some(session) = registry.sessions.get_mut(name) else {
            return;
        };
        match session.resize(height, width) {
            Ok(()) => info!(session = %name, width, height, "session resized"),
            Err(err) => {
                warn!(session = %name, %err, "resize failed");
                registry.kill(name);
            }
        }
    }

    pub fn clear(&self, name: &str) {
        if let Some(session) = self.shared.registry.lock().sessions.get_mut(name) {
            session.terminal.clear();
        }
    }

    /// Retract the newest scrollback entry, only if its index is `guard`
    /// when one is given.
    pub fn clear_last_entry(&self, name: &str, guard: Option<u64>) {
        if let Some(session) = self.shared.registry.lock().sessions.get_mut(name) {
            session.terminal.clear_last_entry(guard);
        }
    }

    /// Mark a session for reaping by the loop.
    pub fn kill_term(&self, name: &str) {
        self.shared.registry.lock().kill(name);
    }

    pub fn kill_all(&self) {
        self.shared.registry.lock().kill_all();
    }

    /// Type the text for a click on `text` or `file_url` into the session's
    /// command line. Failures are reported to the viewer as an alert.
    pub fn click_paste(&self, name: &str, text: &str, file_url: &str, options: &PasteOptions) {
        let config = &self.shared.config;
        let mut registry = self.shared.registry.lock();
        let Some(session) = registry.sessions.get_mut(name) else {
            return;
        };
        let Session {
            terminal, child, ..
        } = session;
        let env = PasteEnv {
            local_host: &config.local_host,
            search_dir: config.bin_dir.as_deref(),
        };
        let pasted = terminal.click_paste(text, file_url, options, env, || child.cwd());
        match pasted {
            Ok(Some(text)) => {
                if let Err(err) = child.write_all(text.as_bytes()) {
                    warn!(session = %name, %err, "pty write failed");
                    registry.kill(name);
                }
            }
            Ok(None) => {}
            Err(err) => {
                info!(session = %name, %err, "click-paste refused");
                let _ = self.shared.events.send(SessionEvent::Output {
                    session: name.to_string(),
                    event: DirectiveEvent::alert(err.to_string()).into(),
                });
            }
        }
    }

    /// Resend the full state of a session, tagged with `response_id`.
    pub fn reconnect(&self, name: &str, response_id: &str) {
        if let Some(session) = self.shared.registry.lock().sessions.get_mut(name) {
            session.terminal.reconnect(response_id);
        }
    }

    /// Write `data` to `path` on behalf of a session and report the result
    /// as a `save_status` event.
    pub fn save_file(&self, name: &str, path: &str, data: &[u8]) {
        let mut registry = self.shared.registry.lock();
        if let Some(session) = registry.sessions.get_mut(name) {
            session.terminal.save_file(path, data);
            forward(&self.shared.events, name, &mut session.terminal);
        }
    }

    /// Run `f` on a live session's terminal.
    pub fn inspect<R>(&self, name: &str, f: impl FnOnce(&Terminal) -> R) -> Option<R> {
        self.shared
            .registry
            .lock()
            .sessions
            .get(name)
            .map(|session| f(&session.terminal))
    }

    pub fn session_cookie(&self, name: &str) -> Result<String> {
        self.inspect(name, |terminal| terminal.cookie().to_string())
            .ok_or_else(|| MultiplexError::unknown(name))
    }

    #[must_use]
    pub fn term_names(&self) -> Vec<String> {
        self.shared.registry.lock().sessions.keys().cloned().collect()
    }

    #[must_use]
    pub fn running(&self) -> bool {
        self.shared.registry.lock().alive
    }

    /// Stop the loop. Every session is reaped before the loop exits.
    pub fn shutdown(&self) {
        let mut registry = self.shared.registry.lock();
        registry.alive = false;
        registry.kill_all();
    }
}

impl Drop for Multiplex {
    fn drop(&mut self) {
        self.shutdown();
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            warn!("multiplex loop panicked");
        }
    }
}

// ── Loop ────────────────────────────────────────────────────────────────

fn run_loop(shared: &Shared) {
    let config = &shared.config;
    let mut buf = vec![0u8; READ_CHUNK];
    let mut last_sweep = Instant::now();
    debug!("multiplex loop started");

    loop {
        {
            let targets: Vec<(String, Arc<File>)> = {
                let registry = shared.registry.lock();
                if !registry.alive {
                    break;
                }
                registry
                    .sessions
                    .iter()
                    .map(|(name, session)| (name.clone(), session.child.master()))
                    .collect()
            };
            if targets.is_empty() {
                thread::sleep(config.poll_interval);
            } else {
                for name in poll_ready(&targets, config.poll_interval) {
                    read_session(shared, &name, &mut buf);
                }
            }
        }

        let now = Instant::now();
        let mut registry = shared.registry.lock();
        for (name, session) in &mut registry.sessions {
            if session.update_due(now, config.update_interval) {
                session.terminal.update();
                session.update_time = Some(now);
            }
            forward(&shared.events, name, &mut session.terminal);
        }
        if registry.check_idle || sweep_due(now, last_sweep) {
            registry.check_idle = false;
            last_sweep = now;
            registry.sweep_idle(now, config.idle_timeout, &shared.events);
        }
        registry.collect_zombies();
    }

    let mut registry = shared.registry.lock();
    registry.reap_all(&shared.events);
    registry.collect_zombies();
    debug!(unreaped = registry.zombies.len(), "multiplex loop stopped");
}

fn sweep_due(now: Instant, last_sweep: Instant) -> bool {
    now.duration_since(last_sweep) >= IDLE_SWEEP_INTERVAL
}

/// Names of the sessions whose master has something to read.
fn poll_ready(targets: &[(String, Arc<File>)], timeout: Duration) -> Vec<String> {
    let mut fds: Vec<PollFd<'_>> = targets
        .iter()
        .map(|(_, master)| PollFd::new(master.as_fd(), PollFlags::POLLIN))
        .collect();
    match poll(&mut fds, poll_timeout(timeout)) {
        Ok(0) | Err(Errno::EINTR) => return Vec::new(),
        Ok(_) => {}
        Err(errno) => {
            warn!(%errno, "poll failed");
            thread::sleep(timeout);
            return Vec::new();
        }
    }
    let readable = PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR;
    fds.iter()
        .zip(targets)
        .filter(|(fd, _)| fd.revents().is_some_and(|events| events.intersects(readable)))
        .map(|(_, (name, _))| name.clone())
        .collect()
}

fn read_session(shared: &Shared, name: &str, buf: &mut [u8]) {
    let mut registry = shared.registry.lock();
    let Some(session) = registry.sessions.get_mut(name) else {
        return;
    };
    let failed = match session.child.read(buf) {
        Ok(ReadOutcome::Data(count)) => {
            session.output_time = Instant::now();
            session.terminal.write(&buf[..count]);
            forward(&shared.events, name, &mut session.terminal);
            let reply = session.terminal.read();
            match session.child.write_all(&reply) {
                Ok(()) => false,
                Err(err) => {
                    warn!(session = %name, %err, "pty reply write failed");
                    true
                }
            }
        }
        Ok(ReadOutcome::WouldBlock) => false,
        Ok(ReadOutcome::Eof) => {
            info!(session = %name, "session output closed");
            session.terminal.update();
            session.update_time = Some(Instant::now());
            forward(&shared.events, name, &mut session.terminal);
            true
        }
        Err(err) => {
            warn!(session = %name, %err, "pty read failed");
            true
        }
    };
    if failed {
        registry.kill(name);
    }
}
