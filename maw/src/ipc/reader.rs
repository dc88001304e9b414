use super::message::{MAX_MESSAGE_LEN, Message, Secret};
use crate::event::SupervisorEvent;
use crate::event::channel::EventPublisher;
use crate::utils::threads::spawn_named_thread;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::os::fd::OwnedFd;
use std::thread::JoinHandle;
use tracing::{debug, trace, warn};

/// Reads control messages line by line and forwards the authenticated ones to the supervisor.
///
/// Malformed lines, lines longer than [MAX_MESSAGE_LEN] and messages carrying a wrong secret are
/// logged and dropped. Reading stops at end of input or once the supervisor is gone.
pub fn read_messages<R: BufRead>(
    mut reader: R,
    secret: &Secret,
    publisher: &EventPublisher<SupervisorEvent>,
) {
    let mut line = Vec::with_capacity(MAX_MESSAGE_LEN);
    loop {
        line.clear();
        match read_bounded_line(&mut reader, &mut line) {
            Ok(ReadLine::Eof) => break,
            Ok(ReadLine::TooLong) => {
                warn!(limit = MAX_MESSAGE_LEN, "Dropping oversized control message");
                continue;
            }
            Ok(ReadLine::Complete) => {}
            Err(err) => {
                warn!(%err, "Could not read from the control pipe");
                break;
            }
        }
        let text = String::from_utf8_lossy(&line);
        let message = match Message::parse(text.trim_end_matches('\n')) {
            Ok(message) => message,
            Err(err) => {
                warn!(%err, "Dropping control message");
                continue;
            }
        };
        if !secret.matches(message.secret.as_str()) {
            warn!(pid = %message.pid, "Dropping control message with a wrong secret");
            continue;
        }
        trace!(%message, "Control message received");
        if publisher
            .publish(SupervisorEvent::MessageReceived(message))
            .is_err()
        {
            debug!("Supervisor stopped, no longer reading control messages");
            break;
        }
    }
}

enum ReadLine {
    Complete,
    TooLong,
    Eof,
}

/// Reads one line into `buf`, never buffering more than [MAX_MESSAGE_LEN] bytes of it.
///
/// The rest of an oversized line is consumed and thrown away.
fn read_bounded_line<R: BufRead>(reader: &mut R, buf: &mut Vec<u8>) -> io::Result<ReadLine> {
    let read = reader
        .by_ref()
        .take(MAX_MESSAGE_LEN as u64)
        .read_until(b'\n', buf)?;
    if read == 0 {
        return Ok(ReadLine::Eof);
    }
    if buf.ends_with(b"\n") || buf.len() < MAX_MESSAGE_LEN {
        return Ok(ReadLine::Complete);
    }
    loop {
        let available = reader.fill_buf()?;
        if available.is_empty() {
            return Ok(ReadLine::TooLong);
        }
        match available.iter().position(|byte| *byte == b'\n') {
            Some(end) => {
                reader.consume(end + 1);
                return Ok(ReadLine::TooLong);
            }
            None => {
                let len = available.len();
                reader.consume(len);
            }
        }
    }
}

/// Runs [read_messages] over the read end of the control pipe in its own thread.
pub fn spawn_reader(
    read_end: OwnedFd,
    secret: Secret,
    publisher: EventPublisher<SupervisorEvent>,
) -> JoinHandle<()> {
    spawn_named_thread("control-pipe-reader", move || {
        read_messages(BufReader::new(File::from(read_end)), &secret, &publisher)
    })
}
