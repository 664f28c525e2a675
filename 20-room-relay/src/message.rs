use std::io;

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientToServer {
    Join {
        room: String,
    },
    Leave {
        room: String,
    },
    Send {
        room: String,
        event: String,
        #[serde(default)]
        args: Vec<Value>,
    },
    Rooms,
    Count {
        room: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerToClient {
    Welcome { id: String },
    Joined { room: String },
    Left { room: String },
    Event { event: String, args: Vec<Value> },
    Rooms { rooms: Vec<String> },
    Count { room: String, count: usize },
    Error { message: String },
}

pub async fn read_message<R, T>(reader: &mut R) -> io::Result<Option<T>>
where
    R: AsyncBufRead + Unpin,
    T: DeserializeOwned,
{
    // Line-oriented framing keeps the node usable from netcat.
    let mut line = String::new();
    loop {
        line.clear();
        let bytes = reader.read_line(&mut line).await?;
        if bytes == 0 {
            return Ok(None);
        }

        if let Some(parsed) = decode_line(&line)? {
            return Ok(Some(parsed));
        }
    }
}

/// Parses one line of the protocol. Blank lines yield `None`.
pub fn decode_line<T: DeserializeOwned>(line: &str) -> io::Result<Option<T>> {
    let trimmed = line.trim_end_matches(LINE_ENDINGS);
    if trimmed.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(trimmed).map(Some).map_err(to_io_error)
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut encoded = serde_json::to_vec(message).map_err(to_io_error)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
