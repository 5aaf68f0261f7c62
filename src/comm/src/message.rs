use thiserror::Error;

/// Width of a command record on the wire, in 32-bit words.
pub const COMMAND_WORDS: usize = 5;

const TOKEN: i32 = 1;
const JOB: i32 = 2;
const TERMINATE: i32 = 3;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("unknown command kind {0}")]
    UnknownKind(i32),
    #[error("command declares negative payload length {0}")]
    BadPayloadLength(i32),
    #[error("command names negative sender rank {0}")]
    BadSender(i32),
    #[error("malformed color payload: {0}")]
    MalformedColors(String),
}

/// Identity of a state in the transition graph.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct StateId(pub u32);

/// Control message circulated by the termination-detection algorithm. Its
/// fields are interpreted by that algorithm, never by this layer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Token {
    pub flag: bool,
    pub count: i32,
}

/// A unit of exploration work: one graph edge plus the parameter set under
/// which the transition is valid.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Job<C> {
    pub source: StateId,
    pub target: StateId,
    pub colors: C,
}

/// A decoded command record.
///
/// Wire layout (5 x i32):
/// Token:     TOKEN     | sender | flag   | count  | 0
/// Job:       JOB       | sender | source | target | payload words
/// Terminate: TERMINATE | sender | 0      | 0      | 0
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Token {
        sender: usize,
        token: Token,
    },
    Job {
        sender: usize,
        source: StateId,
        target: StateId,
        payload_words: usize,
    },
    Terminate {
        sender: usize,
    },
}

impl Command {
    pub fn encode(&self, buf: &mut [i32; COMMAND_WORDS]) {
        match *self {
            Command::Token { sender, token } => {
                buf[0] = TOKEN;
                buf[1] = sender as i32;
                buf[2] = token.flag as i32;
                buf[3] = token.count;
                buf[4] = 0;
            }
            Command::Job {
                sender,
                source,
                target,
                payload_words,
            } => {
                buf[0] = JOB;
                buf[1] = sender as i32;
                buf[2] = source.0 as i32;
                buf[3] = target.0 as i32;
                buf[4] = payload_words as i32;
            }
            Command::Terminate { sender } => {
                buf[0] = TERMINATE;
                buf[1] = sender as i32;
                buf[2] = 0;
                buf[3] = 0;
                buf[4] = 0;
            }
        }
    }

    pub fn decode(buf: &[i32; COMMAND_WORDS]) -> Result<Command, ProtocolError> {
        let sender = decode_sender(buf[1])?;
        match buf[0] {
            TOKEN => Ok(Command::Token {
                sender,
                token: Token {
                    flag: buf[2] != 0,
                    count: buf[3],
                },
            }),
            JOB => {
                if buf[4] < 0 {
                    return Err(ProtocolError::BadPayloadLength(buf[4]));
                }
                Ok(Command::Job {
                    sender,
                    source: StateId(buf[2] as u32),
                    target: StateId(buf[3] as u32),
                    payload_words: buf[4] as usize,
                })
            }
            TERMINATE => Ok(Command::Terminate { sender }),
            other => Err(ProtocolError::UnknownKind(other)),
        }
    }
}

fn decode_sender(raw: i32) -> Result<usize, ProtocolError> {
    if raw < 0 {
        return Err(ProtocolError::BadSender(raw));
    }
    Ok(raw as usize)
}
