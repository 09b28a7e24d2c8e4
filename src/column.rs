use bytes::{Buf, Bytes};

use crate::{
    ext::BytesExt,
    postgres::{ProtocolError, backend::RowDescription},
};

/// A single column descriptor from a `RowDescription` message.
#[derive(Debug, Clone)]
pub struct Column {
    /// The field name.
    pub name: String,
    /// If the field can be identified as a column of a specific table,
    /// the object ID of the table; otherwise zero.
    pub table_oid: u32,
    /// If the field can be identified as a column of a specific table,
    /// the attribute number of the column; otherwise zero.
    pub attribute_num: i16,
    /// The object ID of the field's data type.
    pub type_oid: u32,
    /// The data type size (see pg_type.typlen).
    /// Note that negative values denote variable-width types.
    pub type_size: i16,
    /// The type modifier (see pg_attribute.atttypmod).
    /// The meaning of the modifier is type-specific.
    pub type_modifier: i32,
    /// The format code being used for the field.
    /// Currently will be zero (text) or one (binary).
    /// In a RowDescription returned from the statement variant of Describe,
    /// the format code is not yet known and will always be zero.
    pub format_code: i16,
}

impl Column {
    pub(crate) fn parse_all(mut description: RowDescription) -> Result<Vec<Column>, ProtocolError> {
        let mut columns = Vec::with_capacity(description.field_len as usize);
        for _ in 0..description.field_len {
            columns.push(Column::parse(&mut description.body)?);
        }
        Ok(columns)
    }

    fn parse(body: &mut Bytes) -> Result<Column, ProtocolError> {
        let name = body.get_nul_string()?;
        if body.remaining() < 18 {
            return Err(ProtocolError::truncated(RowDescription::MSGTYPE));
        }
        Ok(Column {
            name,
            table_oid: body.get_u32(),
            attribute_num: body.get_i16(),
            type_oid: body.get_u32(),
            type_size: body.get_i16(),
            type_modifier: body.get_i32(),
            format_code: body.get_i16(),
        })
    }
}
