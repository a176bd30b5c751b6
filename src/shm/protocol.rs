//! Object store wire protocol
//!
//! Simple binary protocol spoken over the store's Unix socket:
//! [1 byte: opcode] [4 bytes: length, little-endian] [payload...]

use crate::key::{ObjectId, OBJECT_ID_LEN};
use crate::store::{StoreError, StoreResult};
use std::io::{Read, Write};

/// Request opcodes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOp {
    /// Store an object, first-writer-wins
    Put = 0x01,
    /// Fetch an object by id
    Get = 0x02,
    /// Delete a batch of objects
    Delete = 0x03,
    /// Check if an id is present
    Contains = 0x04,
    /// List ids and sizes of all stored objects
    List = 0x05,
    /// Configured capacity in bytes
    Capacity = 0x06,
    /// Ping/keepalive
    Ping = 0x07,
}

impl TryFrom<u8> for RequestOp {
    type Error = StoreError;

    fn try_from(value: u8) -> Result<Self, StoreError> {
        match value {
            0x01 => Ok(RequestOp::Put),
            0x02 => Ok(RequestOp::Get),
            0x03 => Ok(RequestOp::Delete),
            0x04 => Ok(RequestOp::Contains),
            0x05 => Ok(RequestOp::List),
            0x06 => Ok(RequestOp::Capacity),
            0x07 => Ok(RequestOp::Ping),
            _ => Err(StoreError::Protocol(format!("unknown request opcode: {}", value))),
        }
    }
}

/// Response opcodes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseOp {
    Ok = 0x80,
    AlreadyStored = 0x81,
    Full = 0x82,
    Value = 0x83,
    NotFound = 0x84,
    Bool = 0x85,
    Listing = 0x86,
    Capacity = 0x87,
    Pong = 0x88,
    Error = 0xFF,
}

impl TryFrom<u8> for ResponseOp {
    type Error = StoreError;

    fn try_from(value: u8) -> Result<Self, StoreError> {
        match value {
            0x80 => Ok(ResponseOp::Ok),
            0x81 => Ok(ResponseOp::AlreadyStored),
            0x82 => Ok(ResponseOp::Full),
            0x83 => Ok(ResponseOp::Value),
            0x84 => Ok(ResponseOp::NotFound),
            0x85 => Ok(ResponseOp::Bool),
            0x86 => Ok(ResponseOp::Listing),
            0x87 => Ok(ResponseOp::Capacity),
            0x88 => Ok(ResponseOp::Pong),
            0xFF => Ok(ResponseOp::Error),
            _ => Err(StoreError::Protocol(format!("unknown response opcode: {}", value))),
        }
    }
}

/// A request to the backing store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Put {
        id: ObjectId,
        meta: Vec<u8>,
        data: Vec<u8>,
    },
    Get(ObjectId),
    Delete(Vec<ObjectId>),
    Contains(ObjectId),
    List,
    Capacity,
    Ping,
}

/// A response from the backing store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Ok,
    /// The object already existed; the write was a no-op
    AlreadyStored,
    /// The store lacks capacity for the object
    Full,
    Value {
        meta: Vec<u8>,
        data: Vec<u8>,
    },
    NotFound,
    Bool(bool),
    Listing(Vec<ObjectEntry>),
    Capacity(u64),
    Pong,
    Error(String),
}

/// One entry in a listing: id plus the stored sizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectEntry {
    pub id: ObjectId,
    pub data_size: u64,
    pub meta_size: u64,
}

/// Read a raw frame from the stream
fn read_frame<R: Read>(reader: &mut R) -> StoreResult<(u8, Vec<u8>)> {
    let mut op_buf = [0u8; 1];
    reader.read_exact(&mut op_buf)?;

    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let length = u32::from_le_bytes(len_buf) as usize;

    let mut payload = vec![0u8; length];
    if length > 0 {
        reader.read_exact(&mut payload)?;
    }

    Ok((op_buf[0], payload))
}

/// Validate a length for the wire's 32-bit length fields. Without the check
/// an oversized payload would wrap the field and desynchronize the stream.
fn frame_len(len: usize) -> StoreResult<u32> {
    u32::try_from(len).map_err(|_| {
        StoreError::Protocol(format!(
            "payload of {} bytes exceeds the {} byte frame limit",
            len,
            u32::MAX
        ))
    })
}

/// Write a raw frame to the stream
fn write_frame<W: Write>(writer: &mut W, op: u8, payload: &[u8]) -> StoreResult<()> {
    let length = frame_len(payload.len())?;
    writer.write_all(&[op])?;
    writer.write_all(&length.to_le_bytes())?;
    if !payload.is_empty() {
        writer.write_all(payload)?;
    }
    writer.flush()?;
    Ok(())
}

/// Write a request to the stream
pub fn write_request<W: Write>(writer: &mut W, request: &Request) -> StoreResult<()> {
    match request {
        Request::Put { id, meta, data } => {
            let mut payload = Vec::with_capacity(OBJECT_ID_LEN + 4 + meta.len() + data.len());
            payload.extend_from_slice(id.as_bytes());
            payload.extend_from_slice(&frame_len(meta.len())?.to_le_bytes());
            payload.extend_from_slice(meta);
            payload.extend_from_slice(data);
            write_frame(writer, RequestOp::Put as u8, &payload)
        }
        Request::Get(id) => write_frame(writer, RequestOp::Get as u8, id.as_bytes()),
        Request::Delete(ids) => {
            let mut payload = Vec::with_capacity(4 + ids.len() * OBJECT_ID_LEN);
            payload.extend_from_slice(&(ids.len() as u32).to_le_bytes());
            for id in ids {
                payload.extend_from_slice(id.as_bytes());
            }
            write_frame(writer, RequestOp::Delete as u8, &payload)
        }
        Request::Contains(id) => write_frame(writer, RequestOp::Contains as u8, id.as_bytes()),
        Request::List => write_frame(writer, RequestOp::List as u8, &[]),
        Request::Capacity => write_frame(writer, RequestOp::Capacity as u8, &[]),
        Request::Ping => write_frame(writer, RequestOp::Ping as u8, &[]),
    }
}

/// Read a request from the stream
pub fn read_request<R: Read>(reader: &mut R) -> StoreResult<Request> {
    let (op, payload) = read_frame(reader)?;
    let op = RequestOp::try_from(op)?;

    match op {
        RequestOp::Put => {
            if payload.len() < OBJECT_ID_LEN + 4 {
                return Err(StoreError::Protocol("short put payload".to_string()));
            }
            let id = ObjectId::from_bytes(&payload[..OBJECT_ID_LEN])?;
            let meta_len = u32::from_le_bytes(
                payload[OBJECT_ID_LEN..OBJECT_ID_LEN + 4]
                    .try_into()
                    .expect("slice is 4 bytes"),
            ) as usize;
            let rest = &payload[OBJECT_ID_LEN + 4..];
            if rest.len() < meta_len {
                return Err(StoreError::Protocol("short put metadata".to_string()));
            }
            Ok(Request::Put {
                id,
                meta: rest[..meta_len].to_vec(),
                data: rest[meta_len..].to_vec(),
            })
        }
        RequestOp::Get => Ok(Request::Get(ObjectId::from_bytes(&payload)?)),
        RequestOp::Delete => {
            if payload.len() < 4 {
                return Err(StoreError::Protocol("short delete payload".to_string()));
            }
            let count =
                u32::from_le_bytes(payload[..4].try_into().expect("slice is 4 bytes")) as usize;
            let ids_bytes = &payload[4..];
            if ids_bytes.len() != count * OBJECT_ID_LEN {
                return Err(StoreError::Protocol("delete id list length mismatch".to_string()));
            }
            let ids = ids_bytes
                .chunks_exact(OBJECT_ID_LEN)
                .map(ObjectId::from_bytes)
                .collect::<StoreResult<Vec<_>>>()?;
            Ok(Request::Delete(ids))
        }
        RequestOp::Contains => Ok(Request::Contains(ObjectId::from_bytes(&payload)?)),
        RequestOp::List => Ok(Request::List),
        RequestOp::Capacity => Ok(Request::Capacity),
        RequestOp::Ping => Ok(Request::Ping),
    }
}

/// Write a response to the stream
pub fn write_response<W: Write>(writer: &mut W, response: &Response) -> StoreResult<()> {
    match response {
        Response::Ok => write_frame(writer, ResponseOp::Ok as u8, &[]),
        Response::AlreadyStored => write_frame(writer, ResponseOp::AlreadyStored as u8, &[]),
        Response::Full => write_frame(writer, ResponseOp::Full as u8, &[]),
        Response::Value { meta, data } => {
            let mut payload = Vec::with_capacity(4 + meta.len() + data.len());
            payload.extend_from_slice(&frame_len(meta.len())?.to_le_bytes());
            payload.extend_from_slice(meta);
            payload.extend_from_slice(data);
            write_frame(writer, ResponseOp::Value as u8, &payload)
        }
        Response::NotFound => write_frame(writer, ResponseOp::NotFound as u8, &[]),
        Response::Bool(flag) => write_frame(writer, ResponseOp::Bool as u8, &[*flag as u8]),
        Response::Listing(entries) => {
            let mut payload = Vec::with_capacity(4 + entries.len() * (OBJECT_ID_LEN + 16));
            payload.extend_from_slice(&(entries.len() as u32).to_le_bytes());
            for entry in entries {
                payload.extend_from_slice(entry.id.as_bytes());
                payload.extend_from_slice(&entry.data_size.to_le_bytes());
                payload.extend_from_slice(&entry.meta_size.to_le_bytes());
            }
            write_frame(writer, ResponseOp::Listing as u8, &payload)
        }
        Response::Capacity(bytes) => {
            write_frame(writer, ResponseOp::Capacity as u8, &bytes.to_le_bytes())
        }
        Response::Pong => write_frame(writer, ResponseOp::Pong as u8, &[]),
        Response::Error(msg) => write_frame(writer, ResponseOp::Error as u8, msg.as_bytes()),
    }
}

/// Read a response from the stream
pub fn read_response<R: Read>(reader: &mut R) -> StoreResult<Response> {
    let (op, payload) = read_frame(reader)?;
    let op = ResponseOp::try_from(op)?;

    match op {
        ResponseOp::Ok => Ok(Response::Ok),
        ResponseOp::AlreadyStored => Ok(Response::AlreadyStored),
        ResponseOp::Full => Ok(Response::Full),
        ResponseOp::Value => {
            if payload.len() < 4 {
                return Err(StoreError::Protocol("short value payload".to_string()));
            }
            let meta_len =
                u32::from_le_bytes(payload[..4].try_into().expect("slice is 4 bytes")) as usize;
            let rest = &payload[4..];
            if rest.len() < meta_len {
                return Err(StoreError::Protocol("short value metadata".to_string()));
            }
            Ok(Response::Value {
                meta: rest[..meta_len].to_vec(),
                data: rest[meta_len..].to_vec(),
            })
        }
        ResponseOp::NotFound => Ok(Response::NotFound),
        ResponseOp::Bool => {
            if payload.len() != 1 {
                return Err(StoreError::Protocol("bad bool payload".to_string()));
            }
            Ok(Response::Bool(payload[0] != 0))
        }
        ResponseOp::Listing => {
            if payload.len() < 4 {
                return Err(StoreError::Protocol("short listing payload".to_string()));
            }
            let count =
                u32::from_le_bytes(payload[..4].try_into().expect("slice is 4 bytes")) as usize;
            let entry_len = OBJECT_ID_LEN + 16;
            let body = &payload[4..];
            if body.len() != count * entry_len {
                return Err(StoreError::Protocol("listing length mismatch".to_string()));
            }
            let mut entries = Vec::with_capacity(count);
            for chunk in body.chunks_exact(entry_len) {
                let id = ObjectId::from_bytes(&chunk[..OBJECT_ID_LEN])?;
                let data_size = u64::from_le_bytes(
                    chunk[OBJECT_ID_LEN..OBJECT_ID_LEN + 8]
                        .try_into()
                        .expect("slice is 8 bytes"),
                );
                let meta_size = u64::from_le_bytes(
                    chunk[OBJECT_ID_LEN + 8..]
                        .try_into()
                        .expect("slice is 8 bytes"),
                );
                entries.push(ObjectEntry {
                    id,
                    data_size,
                    meta_size,
                });
            }
            Ok(Response::Listing(entries))
        }
        ResponseOp::Capacity => {
            if payload.len() != 8 {
                return Err(StoreError::Protocol("bad capacity payload".to_string()));
            }
            Ok(Response::Capacity(u64::from_le_bytes(
                payload.as_slice().try_into().expect("slice is 8 bytes"),
            )))
        }
        ResponseOp::Pong => Ok(Response::Pong),
        ResponseOp::Error => Ok(Response::Error(
            String::from_utf8_lossy(&payload).to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Key;
    use std::io::Cursor;

    fn roundtrip_request(request: Request) -> Request {
        let mut buf = Vec::new();
        write_request(&mut buf, &request).unwrap();
        read_request(&mut Cursor::new(buf)).unwrap()
    }

    fn roundtrip_response(response: Response) -> Response {
        let mut buf = Vec::new();
        write_response(&mut buf, &response).unwrap();
        read_response(&mut Cursor::new(buf)).unwrap()
    }

    #[test]
    fn test_request_roundtrip() {
        let id = ObjectId::for_key(&Key::from("k"));
        let requests = vec![
            Request::Put {
                id,
                meta: b"meta".to_vec(),
                data: b"data".to_vec(),
            },
            Request::Get(id),
            Request::Delete(vec![id, ObjectId::for_key(&Key::from("other"))]),
            Request::Contains(id),
            Request::List,
            Request::Capacity,
            Request::Ping,
        ];
        for request in requests {
            assert_eq!(roundtrip_request(request.clone()), request);
        }
    }

    #[test]
    fn test_response_roundtrip() {
        let id = ObjectId::for_key(&Key::from("k"));
        let responses = vec![
            Response::Ok,
            Response::AlreadyStored,
            Response::Full,
            Response::Value {
                meta: vec![1, 2],
                data: vec![3, 4, 5],
            },
            Response::NotFound,
            Response::Bool(true),
            Response::Bool(false),
            Response::Listing(vec![ObjectEntry {
                id,
                data_size: 7,
                meta_size: 3,
            }]),
            Response::Capacity(1 << 30),
            Response::Pong,
            Response::Error("boom".to_string()),
        ];
        for response in responses {
            assert_eq!(roundtrip_response(response.clone()), response);
        }
    }

    #[test]
    fn test_empty_put_data() {
        let id = ObjectId::for_key(&Key::from("empty"));
        let request = Request::Put {
            id,
            meta: Vec::new(),
            data: Vec::new(),
        };
        assert_eq!(roundtrip_request(request.clone()), request);
    }

    #[test]
    fn test_unknown_opcode() {
        let mut buf = Vec::new();
        buf.push(0x42);
        buf.extend_from_slice(&0u32.to_le_bytes());
        assert!(matches!(
            read_request(&mut Cursor::new(buf)),
            Err(StoreError::Protocol(_))
        ));
    }

    #[test]
    fn test_oversized_payload_rejected() {
        assert_eq!(frame_len(17).unwrap(), 17);
        // one byte past the length field's range must error, not wrap
        assert!(matches!(
            frame_len(u32::MAX as usize + 1),
            Err(StoreError::Protocol(_))
        ));
    }

    #[test]
    fn test_truncated_frame() {
        // Header promises 10 bytes of payload but the stream ends early
        let mut buf = Vec::new();
        buf.push(RequestOp::List as u8);
        buf.extend_from_slice(&10u32.to_le_bytes());
        assert!(matches!(
            read_request(&mut Cursor::new(buf)),
            Err(StoreError::Io(_))
        ));
    }
}
