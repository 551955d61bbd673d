#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use webterm_core::{PromptFormat, Terminal, TerminalConfig};

#[derive(Debug, Arbitrary)]
enum Op {
    Write(Vec<u8>),
    Update,
    Resize { height: u8, width: u8 },
    Reconnect,
    Clear,
    ClearLast(Option<u8>),
}

#[derive(Debug, Arbitrary)]
struct Input {
    height: u8,
    width: u8,
    prompt: bool,
    ops: Vec<Op>,
}

fuzz_target!(|input: Input| {
    let mut config = TerminalConfig::default()
        .with_size(u16::from(input.width.max(1)), u16::from(input.height.max(1)))
        .with_cookie("1234567890123456")
        .with_max_scroll_lines(64)
        .with_max_directive_bytes(4096);
    if input.prompt {
        config = config.with_prompt(PromptFormat::new("", "", "$"));
    }
    let mut term = Terminal::new("fuzz", config);

    for op in input.ops {
        match op {
            Op::Write(bytes) => term.write(&bytes),
            Op::Update => term.update(),
            Op::Resize { height, width } => {
                term.resize(u16::from(height), u16::from(width));
            }
            Op::Reconnect => term.reconnect("fuzz"),
            Op::Clear => term.clear(),
            Op::ClearLast(guard) => {
                term.clear_last_entry(guard.map(u64::from));
            }
        }
        let cursor = term.cursor();
        assert!(cursor.row < term.height());
        assert!(cursor.col < term.width());
        assert!(term.active_rows() <= term.height());
        assert!(term.scrollback().len() <= 64);
        let _ = term.read();
        let _ = term.drain_events();
    }

    // Two updates in a row: the second has nothing left to report.
    term.update();
    term.update();
    let events = term.drain_events();
    let last = events
        .iter()
        .rev()
        .find_map(|event| event.as_row_update())
        .expect("update emits a row_update");
    assert!(last.rows.is_empty());
});
