//! TFTP packet codec (RFC 1350 + the RFC 2347/2348 option extension).

use crate::error::TftpError;

const OP_RRQ: u16 = 1;
const OP_WRQ: u16 = 2;
const OP_DATA: u16 = 3;
const OP_ACK: u16 = 4;
const OP_ERROR: u16 = 5;
const OP_OACK: u16 = 6;

/// TFTP error codes this server emits.
pub const ERR_NOT_FOUND: u16 = 1;
pub const ERR_ACCESS_VIOLATION: u16 = 2;
pub const ERR_ILLEGAL_OPERATION: u16 = 4;

/// One TFTP datagram.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    ReadRequest {
        filename: String,
        mode: String,
        options: Vec<(String, String)>,
    },
    WriteRequest {
        filename: String,
    },
    Data {
        block: u16,
        data: Vec<u8>,
    },
    Ack {
        block: u16,
    },
    Error {
        code: u16,
        message: String,
    },
    Oack {
        options: Vec<(String, String)>,
    },
}

/// Split a buffer of NUL-terminated strings.
fn strings(mut buf: &[u8]) -> Result<Vec<String>, TftpError> {
    let mut out = Vec::new();
    while !buf.is_empty() {
        let nul = buf
            .iter()
            .position(|&b| b == 0)
            .ok_or(TftpError::Malformed("unterminated string"))?;
        out.push(String::from_utf8_lossy(&buf[..nul]).into_owned());
        buf = &buf[nul + 1..];
    }
    Ok(out)
}

fn pairs(fields: &[String]) -> Vec<(String, String)> {
    fields
        .chunks_exact(2)
        .map(|pair| (pair[0].to_lowercase(), pair[1].clone()))
        .collect()
}

impl Packet {
    pub fn parse(buf: &[u8]) -> Result<Self, TftpError> {
        if buf.len() < 4 {
            return Err(TftpError::Malformed("short packet"));
        }
        let opcode = u16::from_be_bytes([buf[0], buf[1]]);
        let rest = &buf[2..];
        match opcode {
            OP_RRQ | OP_WRQ => {
                let fields = strings(rest)?;
                if fields.len() < 2 {
                    return Err(TftpError::Malformed("request without filename/mode"));
                }
                let filename = fields[0].clone();
                if opcode == OP_WRQ {
                    return Ok(Packet::WriteRequest { filename });
                }
                Ok(Packet::ReadRequest {
                    filename,
                    mode: fields[1].to_lowercase(),
                    options: pairs(&fields[2..]),
                })
            }
            OP_DATA => Ok(Packet::Data {
                block: u16::from_be_bytes([rest[0], rest[1]]),
                data: rest[2..].to_vec(),
            }),
            OP_ACK => Ok(Packet::Ack {
                block: u16::from_be_bytes([rest[0], rest[1]]),
            }),
            OP_ERROR => {
                let code = u16::from_be_bytes([rest[0], rest[1]]);
                let fields = strings(&rest[2..])?;
                Ok(Packet::Error {
                    code,
                    message: fields.first().cloned().unwrap_or_default(),
                })
            }
            OP_OACK => Ok(Packet::Oack {
                options: pairs(&strings(rest)?),
            }),
            _ => Err(TftpError::Malformed("unknown opcode")),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Packet::ReadRequest {
                filename,
                mode,
                options,
            } => {
                out.extend_from_slice(&OP_RRQ.to_be_bytes());
                push_string(&mut out, filename);
                push_string(&mut out, mode);
                for (key, value) in options {
                    push_string(&mut out, key);
                    push_string(&mut out, value);
                }
            }
            Packet::WriteRequest { filename } => {
                out.extend_from_slice(&OP_WRQ.to_be_bytes());
                push_string(&mut out, filename);
                push_string(&mut out, "octet");
            }
            Packet::Data { block, data } => {
                out.extend_from_slice(&OP_DATA.to_be_bytes());
                out.extend_from_slice(&block.to_be_bytes());
                out.extend_from_slice(data);
            }
            Packet::Ack { block } => {
                out.extend_from_slice(&OP_ACK.to_be_bytes());
                out.extend_from_slice(&block.to_be_bytes());
            }
            Packet::Error { code, message } => {
                out.extend_from_slice(&OP_ERROR.to_be_bytes());
                out.extend_from_slice(&code.to_be_bytes());
                push_string(&mut out, message);
            }
            Packet::Oack { options } => {
                out.extend_from_slice(&OP_OACK.to_be_bytes());
                for (key, value) in options {
                    push_string(&mut out, key);
                    push_string(&mut out, value);
                }
            }
        }
        out
    }
}

fn push_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(s.as_bytes());
    out.push(0);
}
