//! Data blocks: the unit of row data streamed from storage nodes.

use crate::encoding::{put_bytes, put_varint, read_str, read_varint, DecodeResult, EncodingError};
use crate::error::{Result, SelectError};

/// A named column holding one string value per row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockColumn {
    pub name: String,
    pub values: Vec<String>,
}

/// A set of equally sized columns.
///
/// Blocks handed to a [`BlockSink`](crate::BlockSink) are borrowed for the
/// duration of the call only; the reader reuses the same block for the next
/// decode.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DataBlock {
    columns: Vec<BlockColumn>,
}

impl DataBlock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_columns(columns: Vec<BlockColumn>) -> Result<Self> {
        let mut block = Self::new();
        for column in columns {
            block.add_column(column.name, column.values)?;
        }
        Ok(block)
    }

    pub fn add_column(&mut self, name: impl Into<String>, values: Vec<String>) -> Result<()> {
        let name = name.into();
        if let Some(first) = self.columns.first() {
            if first.values.len() != values.len() {
                return Err(SelectError::InvalidBlock(format!(
                    "column {:?} has {} rows; block has {} rows",
                    name,
                    values.len(),
                    first.values.len()
                )));
            }
        }
        self.columns.push(BlockColumn { name, values });
        Ok(())
    }

    pub fn columns(&self) -> &[BlockColumn] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&BlockColumn> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn rows_count(&self) -> usize {
        self.columns.first().map_or(0, |c| c.values.len())
    }

    pub fn is_empty(&self) -> bool {
        self.rows_count() == 0
    }

    /// Returns row `i` as `(column, value)` pairs.
    pub fn row(&self, i: usize) -> Vec<(&str, &str)> {
        self.columns
            .iter()
            .filter_map(|c| c.values.get(i).map(|v| (c.name.as_str(), v.as_str())))
            .collect()
    }

    pub fn reset(&mut self) {
        self.columns.clear();
    }

    /// Appends the wire form of the block to `dst`.
    pub fn marshal(&self, dst: &mut Vec<u8>) {
        put_varint(dst, self.rows_count() as u64);
        put_varint(dst, self.columns.len() as u64);
        for column in &self.columns {
            put_bytes(dst, column.name.as_bytes());
            for value in &column.values {
                put_bytes(dst, value.as_bytes());
            }
        }
    }

    /// Decodes one block from the head of `src` into `self` and returns the
    /// unconsumed tail.
    ///
    /// Column and value storage left over from the previous decode is reused
    /// after being cleared, so nothing from an earlier block survives into
    /// this one.
    pub fn unmarshal_in_place<'a>(&mut self, src: &'a [u8]) -> DecodeResult<&'a [u8]> {
        let (rows, tail) = read_varint(src, "rows count")?;
        let (columns, mut tail) = read_varint(tail, "columns count")?;

        // Every column name and value takes at least one byte.
        let min_len = columns.saturating_mul(rows.saturating_add(1));
        if min_len > tail.len() as u64 {
            return Err(EncodingError::Truncated {
                what: "block body",
                need: min_len,
                have: tail.len(),
            });
        }
        let (rows, columns) = (rows as usize, columns as usize);

        self.columns.truncate(columns);
        self.columns.resize_with(columns, BlockColumn::default);
        for column in &mut self.columns {
            let (name, rest) = read_str(tail, "column name")?;
            column.name.clear();
            column.name.push_str(name);
            tail = rest;

            column.values.truncate(rows);
            for i in 0..rows {
                let (value, rest) = read_str(tail, "column value")?;
                match column.values.get_mut(i) {
                    Some(slot) => {
                        slot.clear();
                        slot.push_str(value);
                    }
                    None => column.values.push(value.to_owned()),
                }
                tail = rest;
            }
        }
        Ok(tail)
    }
}

/// Iterates over the blocks packed back to back in one frame payload.
pub struct BlockReader<'a> {
    src: &'a [u8],
    index: usize,
}

impl<'a> BlockReader<'a> {
    pub fn new(src: &'a [u8]) -> Self {
        Self { src, index: 0 }
    }

    /// Decodes the next block into `block`. Returns `false` once the payload
    /// is exhausted.
    pub fn read_next(&mut self, block: &mut DataBlock) -> Result<bool> {
        if self.src.is_empty() {
            return Ok(false);
        }
        self.src = block
            .unmarshal_in_place(self.src)
            .map_err(|source| SelectError::Decode {
                what: "data block",
                index: self.index,
                source,
            })?;
        self.index += 1;
        Ok(true)
    }

    pub fn blocks_read(&self) -> usize {
        self.index
    }
}
