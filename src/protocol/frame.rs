use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::{AppError, AppResult};

/// Largest UTF-8 encoded size of any string field.
pub const MAX_STRING_SIZE: usize = 1024;
/// Size of a string field's length prefix.
pub const STRING_LENGTH_SIZE: usize = 4;
/// Size of the session id field.
pub const SESSION_ID_SIZE: usize = 8;
/// Largest encoded frame: `MessagePrivate` with three full strings.
pub const MAX_FRAME_SIZE: usize = 1 + 3 * (STRING_LENGTH_SIZE + MAX_STRING_SIZE);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Login = 0,
    LoginAccepted = 1,
    LoginRefused = 2,
    Message = 3,
    MessagePrivate = 4,
    RequestPrivate = 5,
    OkPrivate = 6,
    KoPrivate = 7,
    IdPrivate = 8,
    LoginPrivate = 9,
    Established = 10,
}

/// Fields carried by a frame body, in wire order: the strings first, then the integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldLayout {
    pub strings: usize,
    pub integer: bool,
}

impl FieldLayout {
    pub fn is_empty(&self) -> bool {
        self.strings == 0 && !self.integer
    }
}

impl Opcode {
    pub fn layout(self) -> FieldLayout {
        let (strings, integer) = match self {
            Opcode::LoginAccepted | Opcode::LoginRefused | Opcode::Established => (0, false),
            Opcode::Login => (1, false),
            Opcode::Message
            | Opcode::RequestPrivate
            | Opcode::OkPrivate
            | Opcode::KoPrivate => (2, false),
            Opcode::MessagePrivate => (3, false),
            Opcode::IdPrivate => (2, true),
            Opcode::LoginPrivate => (0, true),
        };
        FieldLayout { strings, integer }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = AppError;

    fn try_from(value: u8) -> AppResult<Self> {
        let opcode = match value {
            0 => Opcode::Login,
            1 => Opcode::LoginAccepted,
            2 => Opcode::LoginRefused,
            3 => Opcode::Message,
            4 => Opcode::MessagePrivate,
            5 => Opcode::RequestPrivate,
            6 => Opcode::OkPrivate,
            7 => Opcode::KoPrivate,
            8 => Opcode::IdPrivate,
            9 => Opcode::LoginPrivate,
            10 => Opcode::Established,
            other => {
                return Err(AppError::InvalidFrame(format!("unknown opcode {}", other)));
            }
        };
        Ok(opcode)
    }
}

/// A string that is allowed on the wire: not blank and at most
/// [`MAX_STRING_SIZE`] bytes once UTF-8 encoded.
///
/// The only way to get one is through [`FrameString::new`], so a [`Frame`]
/// holding invalid text can not be built.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FrameString(String);

impl FrameString {
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::InvalidFrame("blank string field".to_string()));
        }
        if value.len() > MAX_STRING_SIZE {
            return Err(AppError::InvalidFrame(format!(
                "string field of {} bytes exceeds {} bytes",
                value.len(),
                MAX_STRING_SIZE
            )));
        }
        Ok(FrameString(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    fn encode(&self, writer: &mut BytesMut) {
        writer.put_u32(self.0.len() as u32);
        writer.put_slice(self.0.as_bytes());
    }

    fn wire_format_size(&self) -> usize {
        STRING_LENGTH_SIZE + self.0.len()
    }
}

impl TryFrom<String> for FrameString {
    type Error = AppError;

    fn try_from(value: String) -> AppResult<Self> {
        FrameString::new(value)
    }
}

impl TryFrom<&str> for FrameString {
    type Error = AppError;

    fn try_from(value: &str) -> AppResult<Self> {
        FrameString::new(value)
    }
}

impl AsRef<str> for FrameString {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for FrameString {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for FrameString {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl fmt::Display for FrameString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One protocol message.
///
/// For `OkPrivate`, `KoPrivate` and `IdPrivate` the `sender` is the login that
/// issued the original `RequestPrivate` and `target` the login that was asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Login {
        login: FrameString,
    },
    LoginAccepted,
    LoginRefused,
    Message {
        sender: FrameString,
        text: FrameString,
    },
    MessagePrivate {
        sender: FrameString,
        target: FrameString,
        text: FrameString,
    },
    RequestPrivate {
        sender: FrameString,
        target: FrameString,
    },
    OkPrivate {
        sender: FrameString,
        target: FrameString,
    },
    KoPrivate {
        sender: FrameString,
        target: FrameString,
    },
    IdPrivate {
        sender: FrameString,
        target: FrameString,
        session_id: u64,
    },
    LoginPrivate {
        session_id: u64,
    },
    Established,
}

impl Frame {
    pub fn login(login: &str) -> AppResult<Frame> {
        Ok(Frame::Login {
            login: FrameString::new(login)?,
        })
    }

    pub fn message(sender: &str, text: &str) -> AppResult<Frame> {
        Ok(Frame::Message {
            sender: FrameString::new(sender)?,
            text: FrameString::new(text)?,
        })
    }

    pub fn message_private(sender: &str, target: &str, text: &str) -> AppResult<Frame> {
        Ok(Frame::MessagePrivate {
            sender: FrameString::new(sender)?,
            target: FrameString::new(target)?,
            text: FrameString::new(text)?,
        })
    }

    pub fn request_private(sender: &str, target: &str) -> AppResult<Frame> {
        Ok(Frame::RequestPrivate {
            sender: FrameString::new(sender)?,
            target: FrameString::new(target)?,
        })
    }

    pub fn ok_private(sender: &str, target: &str) -> AppResult<Frame> {
        Ok(Frame::OkPrivate {
            sender: FrameString::new(sender)?,
            target: FrameString::new(target)?,
        })
    }

    pub fn ko_private(sender: &str, target: &str) -> AppResult<Frame> {
        Ok(Frame::KoPrivate {
            sender: FrameString::new(sender)?,
            target: FrameString::new(target)?,
        })
    }

    pub fn id_private(sender: &str, target: &str, session_id: u64) -> AppResult<Frame> {
        Ok(Frame::IdPrivate {
            sender: FrameString::new(sender)?,
            target: FrameString::new(target)?,
            session_id,
        })
    }

    pub fn login_private(session_id: u64) -> Frame {
        Frame::LoginPrivate { session_id }
    }

    /// Builds a frame from fields decoded in wire order. Goes through the same
    /// validation as the named constructors.
    pub fn from_parts(opcode: Opcode, strings: Vec<String>, integer: Option<u64>) -> AppResult<Frame> {
        let layout = opcode.layout();
        if strings.len() != layout.strings || integer.is_some() != layout.integer {
            return Err(AppError::InvalidFrame(format!(
                "{:?} expects {} strings and integer={}, got {} strings and integer={}",
                opcode,
                layout.strings,
                layout.integer,
                strings.len(),
                integer.is_some()
            )));
        }
        let mut fields = strings.into_iter().map(FrameString::new);
        let mut next = move || {
            fields.next().unwrap_or_else(|| {
                Err(AppError::InvalidFrame("missing string field".to_string()))
            })
        };
        let session_id = integer.unwrap_or_default();

        let frame = match opcode {
            Opcode::Login => Frame::Login { login: next()? },
            Opcode::LoginAccepted => Frame::LoginAccepted,
            Opcode::LoginRefused => Frame::LoginRefused,
            Opcode::Message => Frame::Message {
                sender: next()?,
                text: next()?,
            },
            Opcode::MessagePrivate => Frame::MessagePrivate {
                sender: next()?,
                target: next()?,
                text: next()?,
            },
            Opcode::RequestPrivate => Frame::RequestPrivate {
                sender: next()?,
                target: next()?,
            },
            Opcode::OkPrivate => Frame::OkPrivate {
                sender: next()?,
                target: next()?,
            },
            Opcode::KoPrivate => Frame::KoPrivate {
                sender: next()?,
                target: next()?,
            },
            Opcode::IdPrivate => Frame::IdPrivate {
                sender: next()?,
                target: next()?,
                session_id,
            },
            Opcode::LoginPrivate => Frame::LoginPrivate { session_id },
            Opcode::Established => Frame::Established,
        };
        Ok(frame)
    }

    pub fn opcode(&self) -> Opcode {
        match self {
            Frame::Login { .. } => Opcode::Login,
            Frame::LoginAccepted => Opcode::LoginAccepted,
            Frame::LoginRefused => Opcode::LoginRefused,
            Frame::Message { .. } => Opcode::Message,
            Frame::MessagePrivate { .. } => Opcode::MessagePrivate,
            Frame::RequestPrivate { .. } => Opcode::RequestPrivate,
            Frame::OkPrivate { .. } => Opcode::OkPrivate,
            Frame::KoPrivate { .. } => Opcode::KoPrivate,
            Frame::IdPrivate { .. } => Opcode::IdPrivate,
            Frame::LoginPrivate { .. } => Opcode::LoginPrivate,
            Frame::Established => Opcode::Established,
        }
    }

    fn strings(&self) -> Vec<&FrameString> {
        match self {
            Frame::Login { login } => vec![login],
            Frame::Message { sender, text } => vec![sender, text],
            Frame::MessagePrivate {
                sender,
                target,
                text,
            } => vec![sender, target, text],
            Frame::RequestPrivate { sender, target }
            | Frame::OkPrivate { sender, target }
            | Frame::KoPrivate { sender, target }
            | Frame::IdPrivate { sender, target, .. } => vec![sender, target],
            Frame::LoginAccepted
            | Frame::LoginRefused
            | Frame::LoginPrivate { .. }
            | Frame::Established => Vec::new(),
        }
    }

    fn session_id(&self) -> Option<u64> {
        match self {
            Frame::IdPrivate { session_id, .. } | Frame::LoginPrivate { session_id } => {
                Some(*session_id)
            }
            _ => None,
        }
    }

    /// Writes `[opcode][field...]` at the end of `writer`.
    pub fn encode(&self, writer: &mut BytesMut) {
        writer.reserve(self.wire_format_size());
        writer.put_u8(self.opcode() as u8);
        for field in self.strings() {
            field.encode(writer);
        }
        if let Some(session_id) = self.session_id() {
            writer.put_u64(session_id);
        }
    }

    /// Exact number of bytes [`Frame::encode`] writes.
    pub fn wire_format_size(&self) -> usize {
        let strings: usize = self.strings().iter().map(|s| s.wire_format_size()).sum();
        let integer = if self.session_id().is_some() {
            SESSION_ID_SIZE
        } else {
            0
        };
        1 + strings + integer
    }

    pub fn to_bytes(&self) -> BytesMut {
        let mut buffer = BytesMut::with_capacity(self.wire_format_size());
        self.encode(&mut buffer);
        buffer
    }
}
