use crate::error::{Result, RliteError};
use crate::types::Value;
use crate::varint;

// Row payloads use the SQLite record layout: a header-size varint, one
// serial-type varint per column, then the column bodies back to back.
//
// Serial types this engine emits: 0 NULL, 1/2/4 big-endian ints of 1/2/4
// bytes (smallest that fits), odd >= 13 text, even >= 12 blob.

fn serial_type(value: &Value) -> u32 {
    match value {
        Value::Null => 0,
        Value::Integer(i) => {
            if (-128..=127).contains(i) {
                1
            } else if (-32768..=32767).contains(i) {
                2
            } else {
                4
            }
        }
        Value::Text(s) => 13 + 2 * s.len() as u32,
        Value::Blob(b) => 12 + 2 * b.len() as u32,
    }
}

fn content_size(code: u32) -> Result<usize> {
    match code {
        0 => Ok(0),
        1 => Ok(1),
        2 => Ok(2),
        4 => Ok(4),
        n if n >= 13 && n % 2 == 1 => Ok(((n - 13) / 2) as usize),
        n if n >= 12 && n % 2 == 0 => Ok(((n - 12) / 2) as usize),
        n => Err(RliteError::Corrupt(format!(
            "unsupported serial type: {n}"
        ))),
    }
}

/// Serialize a row into a record payload.
pub fn serialize(values: &[Value]) -> Vec<u8> {
    let mut type_bytes = Vec::new();
    for value in values {
        varint::push_varint32(&mut type_bytes, serial_type(value));
    }

    // The header length includes its own varint; grow the length field
    // until it is self-consistent.
    let mut len_field = 1;
    loop {
        let need = varint::varint32_len((type_bytes.len() + len_field) as u32);
        if need == len_field {
            break;
        }
        len_field = need;
    }

    let mut payload = Vec::new();
    varint::push_varint32(&mut payload, (type_bytes.len() + len_field) as u32);
    payload.extend_from_slice(&type_bytes);

    for value in values {
        match value {
            Value::Null => {}
            Value::Integer(i) => {
                if (-128..=127).contains(i) {
                    payload.push(*i as i8 as u8);
                } else if (-32768..=32767).contains(i) {
                    payload.extend_from_slice(&(*i as i16).to_be_bytes());
                } else {
                    payload.extend_from_slice(&i.to_be_bytes());
                }
            }
            Value::Text(s) => payload.extend_from_slice(s.as_bytes()),
            Value::Blob(b) => payload.extend_from_slice(b),
        }
    }
    payload
}

/// Deserialize a record payload into its column values.
pub fn deserialize(payload: &[u8]) -> Result<Vec<Value>> {
    if payload.is_empty() {
        return Ok(vec![]);
    }

    let (header_size, header_size_len) = varint::read_varint32(payload, 0)?;
    let header_size = header_size as usize;
    if header_size < header_size_len || header_size > payload.len() {
        return Err(RliteError::Corrupt(
            "record header size out of bounds".into(),
        ));
    }

    let mut offset = header_size_len;
    let mut codes = Vec::new();
    while offset < header_size {
        let (code, n) = varint::read_varint32(payload, offset)?;
        codes.push(code);
        offset += n;
    }

    let mut body = header_size;
    let mut values = Vec::with_capacity(codes.len());
    for code in codes {
        let size = content_size(code)?;
        if body + size > payload.len() {
            return Err(RliteError::Corrupt("record body out of bounds".into()));
        }
        let data = &payload[body..body + size];
        values.push(match code {
            0 => Value::Null,
            1 => Value::Integer(data[0] as i8 as i32),
            2 => Value::Integer(i16::from_be_bytes([data[0], data[1]]) as i32),
            4 => Value::Integer(i32::from_be_bytes([data[0], data[1], data[2], data[3]])),
            n if n % 2 == 1 => Value::Text(String::from_utf8_lossy(data).into_owned()),
            _ => Value::Blob(data.to_vec()),
        });
        body += size;
    }
    Ok(values)
}
