use std::io::{self, BufRead};
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use crate::network::HandOffSender;
use crate::AppResult;

/// Offers every line of `input` to the reactor, returns the number of lines.
pub fn forward_lines<R: BufRead>(input: R, sender: &HandOffSender<String>) -> AppResult<usize> {
    let mut count = 0;
    for line in input.lines() {
        sender.offer(line?)?;
        count += 1;
    }
    Ok(count)
}

/// Reads standard input on its own thread until it ends or the reactor stops.
pub fn spawn_console(sender: HandOffSender<String>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("console".to_string())
        .spawn(move || {
            let stdin = io::stdin();
            match forward_lines(stdin.lock(), &sender) {
                Ok(count) => debug!(count, "console input ended"),
                Err(err) => error!("console stopped: {}", err),
            }
        })
}
