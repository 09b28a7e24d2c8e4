//! Row data in the textual on-wire form.
//!
//! The engine is byte-transparent: values stay exactly as the backend sent
//! them, and converting them to application types is the caller's concern.
use bytes::{Buf, Bytes};

use crate::{
    column::Column,
    postgres::{ProtocolError, backend::DataRow},
};

/// A single already-encoded parameter in the text on-wire form.
///
/// `None` is SQL NULL, which travels as the length sentinel `-1` with no
/// value bytes.
pub type Param<'a> = Option<&'a [u8]>;

/// The on-wire length sentinel for a NULL field (`-1` as unsigned).
pub(crate) const NULL_FIELD: u32 = u32::MAX;

/// One decoded `DataRow`.
///
/// The per-field length array is kept alongside the value bytes; a NULL
/// field records [`NULL_FIELD`] there, which keeps it distinguishable from
/// an empty non-NULL value.
#[derive(Debug, Clone)]
pub struct Row {
    field_lens: Vec<u32>,
    values: Vec<Bytes>,
}

impl Row {
    pub(crate) fn parse(mut data_row: DataRow) -> Result<Row, ProtocolError> {
        let count = data_row.column_len as usize;
        let mut field_lens = Vec::with_capacity(count);
        let mut values = Vec::with_capacity(count);

        let body = &mut data_row.body;
        for _ in 0..count {
            if body.remaining() < 4 {
                return Err(ProtocolError::truncated(DataRow::MSGTYPE));
            }
            let len = body.get_u32();
            if len == NULL_FIELD {
                values.push(Bytes::new());
            } else {
                if body.remaining() < len as usize {
                    return Err(ProtocolError::truncated(DataRow::MSGTYPE));
                }
                values.push(body.split_to(len as usize));
            }
            field_lens.push(len);
        }

        Ok(Row { field_lens, values })
    }

    /// Number of fields in the row.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether the row carries no fields.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value bytes of field `index`, `None` for SQL NULL.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn get(&self, index: usize) -> Option<&[u8]> {
        match self.field_lens[index] {
            NULL_FIELD => None,
            _ => Some(&self.values[index]),
        }
    }

    /// Whether field `index` is SQL NULL.
    ///
    /// # Panics
    ///
    /// Panics if `index` is out of bounds.
    pub fn is_null(&self, index: usize) -> bool {
        self.field_lens[index] == NULL_FIELD
    }

    /// The raw per-field length array; a NULL field reads `0xFFFF_FFFF`.
    pub fn field_lens(&self) -> &[u32] {
        &self.field_lens
    }
}

/// Buffered result of a query.
#[derive(Debug, Default)]
pub struct QueryOutput {
    /// Result header; empty for statements that return no rows.
    pub columns: Vec<Column>,
    /// Every data row of the response, in arrival order.
    pub rows: Vec<Row>,
    /// Affected-row count taken from the command tag.
    pub rows_affected: u64,
    /// The raw command completion tag, e.g. `SELECT 2` or `UPDATE 3`.
    pub command_tag: Option<String>,
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::postgres::BackendProtocol;
    use bytes::{BufMut, BytesMut};

    fn data_row(fields: &[Option<&[u8]>]) -> DataRow {
        let mut buf = BytesMut::new();
        buf.put_u16(fields.len() as u16);
        for field in fields {
            match field {
                Some(value) => {
                    buf.put_u32(value.len() as u32);
                    buf.put_slice(value);
                }
                None => buf.put_u32(NULL_FIELD),
            }
        }
        DataRow::decode(b'D', buf.freeze()).unwrap()
    }

    #[test]
    fn null_distinguishable_from_empty() {
        let row = Row::parse(data_row(&[None, Some(b""), Some(b"hi")])).unwrap();
        assert_eq!(row.len(), 3);
        assert!(row.is_null(0));
        assert_eq!(row.get(0), None);
        assert!(!row.is_null(1));
        assert_eq!(row.get(1), Some(&b""[..]));
        assert_eq!(row.get(2), Some(&b"hi"[..]));
        assert_eq!(row.field_lens(), &[NULL_FIELD, 0, 2]);
    }

    #[test]
    fn truncated_field() {
        let mut buf = BytesMut::new();
        buf.put_u16(1);
        buf.put_u32(10);
        buf.put_slice(b"short");
        let data_row = DataRow::decode(b'D', buf.freeze()).unwrap();
        assert!(Row::parse(data_row).is_err());
    }
}
