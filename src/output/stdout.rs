//! Debug sink printing every message to stdout.

use std::io::{self, Write};

use crate::message::Message;

use super::{meta_line, Output};

/// Prints each message's meta line and payload; useful while wiring up a
/// capture pipeline.
#[derive(Debug, Default)]
pub struct StdoutOutput;

impl StdoutOutput {
    pub fn new() -> Self {
        Self
    }
}

impl Output for StdoutOutput {
    fn name(&self) -> &'static str {
        "stdout"
    }

    fn write_message(&mut self, msg: &Message) -> io::Result<usize> {
        let header = meta_line(msg);
        let data = msg.data();

        let mut out = io::stdout().lock();
        out.write_all(header.as_bytes())?;
        out.write_all(b"\n")?;
        out.write_all(&data)?;
        out.write_all(b"\n\n")?;
        Ok(header.len() + data.len() + 3)
    }
}
