use crate::defaults::SECRET_BYTES;
use nix::unistd::Pid;
use std::fmt::{self, Display, Formatter};
use std::io::{self, Write};
use std::str::FromStr;
use thiserror::Error;

/// Largest write the pipe delivers atomically, so concurrent writers never interleave lines.
pub const MAX_MESSAGE_LEN: usize = 4096;

#[derive(Debug, Error, PartialEq)]
pub enum MessageError {
    #[error("malformed message `{0}`")]
    Malformed(String),
    #[error("invalid process id `{0}`")]
    InvalidPid(String),
    #[error("unknown action `{0}`")]
    UnknownAction(String),
    #[error("invalid parameter `{0}`")]
    InvalidParam(String),
    #[error("message of {0} bytes exceeds the limit")]
    TooLong(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Hello,
    Goodbye,
    Install,
    Remove,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Hello => "hello",
            Action::Goodbye => "goodbye",
            Action::Install => "install",
            Action::Remove => "remove",
        }
    }
}

impl FromStr for Action {
    type Err = MessageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hello" => Ok(Action::Hello),
            "goodbye" => Ok(Action::Goodbye),
            "install" => Ok(Action::Install),
            "remove" => Ok(Action::Remove),
            other => Err(MessageError::UnknownAction(other.to_string())),
        }
    }
}

/// Random token generated once per supervisor run. Only processes started by the supervisor
/// know it.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn generate() -> Self {
        Self(hex::encode(rand::random::<[u8; SECRET_BYTES]>()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn matches(&self, other: &str) -> bool {
        self.0.len() == other.len()
            && self
                .0
                .bytes()
                .zip(other.bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub pid: Pid,
    pub secret: Secret,
    pub action: Action,
    pub params: Vec<String>,
}

impl Message {
    pub fn new(pid: Pid, secret: Secret, action: Action, params: Vec<String>) -> Self {
        Self {
            pid,
            secret,
            action,
            params,
        }
    }

    /// Parses one line of the wire format, without its trailing newline.
    pub fn parse(line: &str) -> Result<Self, MessageError> {
        let mut fields = line.splitn(4, ':');
        let (Some(pid), Some(secret), Some(action), Some(param)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            return Err(MessageError::Malformed(line.to_string()));
        };

        let pid = pid
            .parse::<i32>()
            .ok()
            .filter(|pid| *pid > 0)
            .map(Pid::from_raw)
            .ok_or_else(|| MessageError::InvalidPid(pid.to_string()))?;

        Ok(Self {
            pid,
            secret: Secret(secret.to_string()),
            action: action.parse()?,
            params: param.split_whitespace().map(str::to_string).collect(),
        })
    }

    /// Encodes the message as one newline-terminated line.
    pub fn encode(&self) -> Result<String, MessageError> {
        if let Some(param) = self
            .params
            .iter()
            .find(|p| p.is_empty() || p.contains(char::is_whitespace))
        {
            return Err(MessageError::InvalidParam(param.clone()));
        }
        let line = format!(
            "{}:{}:{}:{}\n",
            self.pid,
            self.secret.as_str(),
            self.action.as_str(),
            self.params.join(" ")
        );
        if line.len() > MAX_MESSAGE_LEN {
            return Err(MessageError::TooLong(line.len()));
        }
        Ok(line)
    }
}

/// Logged form of a message. The secret is left out.
impl Display for Message {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} from {}", self.action.as_str(), self.pid)?;
        if !self.params.is_empty() {
            write!(f, ": {}", self.params.join(" "))?;
        }
        Ok(())
    }
}

/// Writes messages on behalf of one process.
pub struct MessageWriter<W> {
    writer: W,
    pid: Pid,
    secret: Secret,
}

impl<W> MessageWriter<W>
where
    W: Write,
{
    pub fn new(writer: W, pid: Pid, secret: Secret) -> Self {
        Self {
            writer,
            pid,
            secret,
        }
    }

    /// Sends a message in a single write, so it reaches the pipe as a whole.
    pub fn send(&mut self, action: Action, params: &[String]) -> io::Result<()> {
        let line = Message::new(self.pid, self.secret.clone(), action, params.to_vec())
            .encode()
            .map_err(io::Error::other)?;
        self.writer.write_all(line.as_bytes())?;
        self.writer.flush()
    }
}
