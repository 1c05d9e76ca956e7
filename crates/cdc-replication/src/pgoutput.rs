//! Minimal `pgoutput` logical-decoding message parser (§4.5 step 4).
//!
//! Only the pieces the decoder's state machine needs are modeled: relation
//! column layout (to find the `id`/`properties` columns) and row tuples for
//! Insert/Update/Delete. Message formats follow PostgreSQL's logical
//! replication protocol.

use bytes::{Buf, Bytes};
use cdc_core::CdcError;
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct Relation {
    pub namespace: String,
    pub name: String,
    pub columns: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum TupleColumn {
    Null,
    UnchangedToast,
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Tuple(pub Vec<TupleColumn>);

impl Tuple {
    /// Maps column names (from the owning `Relation`) to their text value,
    /// dropping nulls and unchanged-toast columns.
    pub fn as_named_map(&self, relation: &Relation) -> HashMap<String, String> {
        relation
            .columns
            .iter()
            .zip(self.0.iter())
            .filter_map(|(name, value)| match value {
                TupleColumn::Text(text) => Some((name.clone(), text.clone())),
                _ => None,
            })
            .collect()
    }
}

#[derive(Debug, Clone)]
pub enum Message {
    Begin { xid: i32 },
    Commit,
    Relation { id: i32, relation: Relation },
    Insert { relation_id: i32, row: Tuple },
    Update { relation_id: i32, old_row: Option<Tuple>, new_row: Tuple },
    Delete { relation_id: i32, old_row: Tuple },
    /// Messages irrelevant to the state machine (Origin, Type, Truncate,
    /// Streaming markers).
    Other,
}

fn read_cstring(buf: &mut Bytes) -> Result<String, CdcError> {
    let end = buf
        .iter()
        .position(|b| *b == 0)
        .ok_or_else(|| CdcError::internal("pgoutput: unterminated string"))?;
    let text = String::from_utf8_lossy(&buf[..end]).into_owned();
    buf.advance(end + 1);
    Ok(text)
}

fn read_tuple(buf: &mut Bytes) -> Result<Tuple, CdcError> {
    if buf.remaining() < 2 {
        return Err(CdcError::internal("pgoutput: truncated tuple header"));
    }
    let n_columns = buf.get_i16();
    let mut columns = Vec::with_capacity(n_columns.max(0) as usize);
    for _ in 0..n_columns {
        let kind = buf.get_u8();
        let column = match kind {
            b'n' => TupleColumn::Null,
            b'u' => TupleColumn::UnchangedToast,
            b't' => {
                let len = buf.get_i32() as usize;
                let bytes = buf.copy_to_bytes(len);
                TupleColumn::Text(String::from_utf8_lossy(&bytes).into_owned())
            }
            other => return Err(CdcError::internal(format!("pgoutput: unknown tuple kind {other}"))),
        };
        columns.push(column);
    }
    Ok(Tuple(columns))
}

/// Parses one `XLogData` payload. `relations` supplies column layouts
/// already seen via prior `Relation` messages, needed to interpret
/// Insert/Update/Delete tuples.
pub fn parse_message(mut buf: Bytes, relations: &HashMap<i32, Relation>) -> Result<Message, CdcError> {
    if buf.is_empty() {
        return Err(CdcError::internal("pgoutput: empty message"));
    }
    let tag = buf.get_u8();
    match tag {
        b'B' => {
            buf.advance(8 + 8); // final_lsn, timestamp
            let xid = buf.get_i32();
            Ok(Message::Begin { xid })
        }
        b'C' => Ok(Message::Commit),
        b'R' => {
            let id = buf.get_i32();
            let namespace = read_cstring(&mut buf)?;
            let name = read_cstring(&mut buf)?;
            buf.advance(1); // replica identity
            let n_columns = buf.get_i16();
            let mut columns = Vec::with_capacity(n_columns.max(0) as usize);
            for _ in 0..n_columns {
                buf.advance(1); // flags
                columns.push(read_cstring(&mut buf)?);
                buf.advance(4 + 4); // type oid, type modifier
            }
            Ok(Message::Relation { id, relation: Relation { namespace, name, columns } })
        }
        b'I' => {
            let relation_id = buf.get_i32();
            buf.advance(1); // 'N'
            let row = read_tuple(&mut buf)?;
            let _ = relations;
            Ok(Message::Insert { relation_id, row })
        }
        b'U' => {
            let relation_id = buf.get_i32();
            let mut old_row = None;
            let mut marker = buf.get_u8();
            if marker == b'K' || marker == b'O' {
                old_row = Some(read_tuple(&mut buf)?);
                marker = buf.get_u8();
            }
            let _ = marker; // expected 'N'
            let new_row = read_tuple(&mut buf)?;
            Ok(Message::Update { relation_id, old_row, new_row })
        }
        b'D' => {
            let relation_id = buf.get_i32();
            let marker = buf.get_u8();
            let _ = marker; // 'K' or 'O'
            let old_row = read_tuple(&mut buf)?;
            Ok(Message::Delete { relation_id, old_row })
        }
        _ => Ok(Message::Other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relation(columns: &[&str]) -> Relation {
        Relation {
            namespace: "ag_catalog".to_string(),
            name: "twin".to_string(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    #[test]
    fn tuple_as_named_map_skips_nulls_and_unchanged_toast() {
        let rel = relation(&["id", "properties", "big_blob"]);
        let tuple = Tuple(vec![
            TupleColumn::Text("twin1".to_string()),
            TupleColumn::Text(r#"{"$dtId":"twin1"}"#.to_string()),
            TupleColumn::UnchangedToast,
        ]);
        let map = tuple.as_named_map(&rel);
        assert_eq!(map.get("id").unwrap(), "twin1");
        assert!(!map.contains_key("big_blob"));
    }

    #[test]
    fn parse_commit_tag_alone() {
        let buf = Bytes::from_static(b"C");
        let message = parse_message(buf, &HashMap::new()).unwrap();
        assert!(matches!(message, Message::Commit));
    }

    #[test]
    fn unknown_tag_is_other() {
        let buf = Bytes::from_static(b"X");
        let message = parse_message(buf, &HashMap::new()).unwrap();
        assert!(matches!(message, Message::Other));
    }
}
