#![no_main]

use libfuzzer_sys::fuzz_target;
use webterm_core::Parser;

fuzz_target!(|data: &[u8]| {
    // The parser must never panic, and feeding one byte at a time must
    // produce exactly the actions of a bulk feed.
    let mut bulk = Parser::new();
    let actions = bulk.feed(data);

    let mut stepwise = Parser::new();
    let stepped: Vec<_> = data.iter().filter_map(|&b| stepwise.advance(b)).collect();
    assert_eq!(actions, stepped);
});
