#![no_main]

use kvault::protocol::{FrameBuffer, ParseMode};
use libfuzzer_sys::fuzz_target;

// Feeds arbitrary bytes through the client-request parser in fixed-size
// chunks, the way a connection's partial TCP reads would arrive. Looks only
// for panics and infinite loops; `Err` is an expected outcome for most
// inputs.
fuzz_target!(|data: &[u8]| {
    let mut buf = FrameBuffer::new(ParseMode::ClientRequest);
    for chunk in data.chunks(37) {
        buf.extend(chunk);
        loop {
            match buf.try_parse() {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => return,
            }
        }
    }
});
