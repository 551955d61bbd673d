#![forbid(unsafe_code)]

//! Run one webterm session on the invoking terminal.
//!
//! Keystrokes go to the session; row updates are painted back with plain
//! cursor addressing. Press Ctrl-D twice in a row to quit.

use std::fs::OpenOptions;
use std::io::{self, Read, Write};
use std::sync::Arc;
use std::thread;

use rustix::termios::{self, OptionalActions, Termios};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;
use webterm_core::RowUpdate;
use webterm_pty::{Multiplex, MultiplexConfig, SessionEvent};

const EOT: u8 = 0x04;

fn main() {
    if let Err(error) = run() {
        eprintln!("webterm-local: {error}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    init_logging()?;
    let (height, width) = screen_size();

    let (mux, events) = Multiplex::start(MultiplexConfig::from_env())?;
    let mux = Arc::new(mux);
    let (name, _cookie) = mux.terminal(None, None, height, width)?;
    info!(session = %name, width, height, "local session started");

    let raw = RawMode::enable()?;
    let input_mux = Arc::clone(&mux);
    let input_name = name.clone();
    thread::Builder::new()
        .name("webterm-stdin".to_string())
        .spawn(move || forward_stdin(&input_mux, &input_name))?;

    let mut stdout = io::stdout().lock();
    write!(stdout, "\x1b[H\x1b[2J")?;
    for event in events {
        match &event {
            SessionEvent::Closed { session } if *session == name => break,
            SessionEvent::Closed { .. } => {}
            SessionEvent::Output { event, .. } => match event.as_row_update() {
                Some(update) => paint(&mut stdout, update)?,
                None => info!(kind = event.kind(), "directive event not shown locally"),
            },
        }
    }
    drop(raw);
    writeln!(stdout)?;
    Ok(())
}

/// Copy stdin to the session until it ends or Ctrl-D is pressed twice.
fn forward_stdin(mux: &Multiplex, name: &str) {
    let mut stdin = io::stdin().lock();
    let mut buf = [0u8; 1024];
    let mut expect_eof = false;
    loop {
        let count = match stdin.read(&mut buf) {
            Ok(0) => break,
            Ok(count) => count,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(%err, "stdin read failed");
                break;
            }
        };
        if buf[0] == EOT {
            if expect_eof {
                break;
            }
            expect_eof = true;
        } else {
            expect_eof = false;
        }
        mux.term_write(name, &buf[..count]);
    }
    mux.kill_term(name);
}

fn paint(out: &mut impl Write, update: &RowUpdate) -> io::Result<()> {
    if update.full_update {
        write!(out, "\x1b[H\x1b[2J")?;
    }
    for row in &update.rows {
        write!(out, "\x1b[{};1H{}\x1b[K", row.row + 1, row.text.text())?;
    }
    if !update.alt_mode
        && update.active_rows < update.height
        && update.cursor_y + 1 < update.height
    {
        write!(out, "\x1b[{};1H\x1b[J", update.cursor_y + 2)?;
    }
    write!(out, "\x1b[{};{}H", update.cursor_y + 1, update.cursor_x + 1)?;
    out.flush()
}

/// `(rows, cols)` of the controlling terminal, then `LINES`/`COLUMNS`,
/// then 25x80.
fn screen_size() -> (u16, u16) {
    if let Ok(size) = termios::tcgetwinsize(io::stdout())
        && size.ws_row > 0
        && size.ws_col > 0
    {
        return (size.ws_row, size.ws_col);
    }
    let var = |key: &str| std::env::var(key).ok()?.parse::<u16>().ok().filter(|&v| v > 0);
    match (var("LINES"), var("COLUMNS")) {
        (Some(rows), Some(cols)) => (rows, cols),
        _ => (25, 80),
    }
}

/// Filter from `WEBTERM_LOG` (default `warn`), output to `WEBTERM_LOG_FILE`
/// or stderr.
fn init_logging() -> io::Result<()> {
    let filter = EnvFilter::try_from_env("WEBTERM_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    let writer = match std::env::var_os("WEBTERM_LOG_FILE") {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            BoxMakeWriter::new(std::sync::Mutex::new(file))
        }
        None => BoxMakeWriter::new(io::stderr),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Ok(())
}

/// Puts stdin in raw mode until dropped.
struct RawMode {
    saved: Termios,
}

impl RawMode {
    fn enable() -> io::Result<Self> {
        let saved = termios::tcgetattr(io::stdin())?;
        let mut raw = saved.clone();
        raw.make_raw();
        termios::tcsetattr(io::stdin(), OptionalActions::Now, &raw)?;
        Ok(Self { saved })
    }
}

impl Drop for RawMode {
    fn drop(&mut self) {
        if let Err(err) = termios::tcsetattr(io::stdin(), OptionalActions::Now, &self.saved) {
            warn!(%err, "failed to restore terminal mode");
        }
    }
}
