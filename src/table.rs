//! The typed table: maps a logical record index to a byte region (or
//! pair of regions) in one or two [`PagedTable`]s, using a [`Schema`] to
//! decode/encode records.
//!
//! Two layouts, chosen at construction time:
//!
//! - [`Table::fixed`] - records of a fixed-size schema are addressed by
//!   multiplication: record `i` lives at `[i*S, (i+1)*S)` of a single
//!   paged byte table.
//! - [`Table::variable`] - an index stream of `(start: i64, length: i32)`
//!   entries (width [`INDEX_ENTRY_SIZE`]) indirects into a data stream
//!   that holds the actual encoded bytes, appended as records are
//!   written. Overwriting a record's entry leaves its old payload
//!   unreachable; reclaiming that fragmentation is out of scope (the
//!   source flags it as future work, per spec.md §9).

use crate::buffer::PagedTable;
use crate::encoding::{self, Cursor};
use crate::error::{PickleError, Result};
use crate::schema::{FixedDefault, Schema};
use async_trait::async_trait;

/// Byte width of one variable-layout index entry: `SIZE_LONG + SIZE_INT`.
pub const INDEX_ENTRY_SIZE: usize = encoding::SIZE_LONG + encoding::SIZE_INT;

/// A [`Cursor`] over a byte range of a [`PagedTable`], used to thread a
/// schema's read/write through the paging layer.
struct PagedCursor<'a> {
    table: &'a mut PagedTable,
    pos: u64,
}

impl<'a> PagedCursor<'a> {
    fn new(table: &'a mut PagedTable, start: u64) -> Self {
        PagedCursor { table, pos: start }
    }
}

#[async_trait]
impl<'a> Cursor for PagedCursor<'a> {
    async fn read_byte(&mut self) -> Result<u8> {
        let b = self.table.read(self.pos).await?;
        self.pos += 1;
        Ok(b)
    }

    async fn write_byte(&mut self, byte: u8) -> Result<()> {
        self.table.write(self.pos, byte).await?;
        self.pos += 1;
        Ok(())
    }
}

enum Layout {
    Fixed { stride: u64 },
    Variable,
}

/// A typed, random-access array of `S::Value` records.
pub struct Table<S: Schema> {
    schema: S,
    index_table: PagedTable,
    data_table: Option<PagedTable>,
    layout: Layout,
}

impl<S: Schema + FixedDefault> Table<S> {
    /// Opens a fixed-layout table: `schema` must report
    /// [`Schema::is_fixed_size`]; records live inline in `byte_table` at
    /// `[i*S, (i+1)*S)` where `S = schema.dynamic_size(default)`.
    pub fn fixed(schema: S, byte_table: PagedTable) -> Result<Self> {
        if !schema.is_fixed_size() {
            return Err(PickleError::InvalidArgument(
                "Table::fixed requires a fixed-size schema".into(),
            ));
        }
        let stride = schema.dynamic_size(&schema.default_value()) as u64;
        if byte_table.element_count() % stride != 0 {
            return Err(PickleError::Corrupted(format!(
                "fixed-layout index stream length {} is not a multiple of record stride {stride}",
                byte_table.element_count()
            )));
        }
        Ok(Table {
            schema,
            index_table: byte_table,
            data_table: None,
            layout: Layout::Fixed { stride },
        })
    }
}

impl<S: Schema> Table<S> {
    /// Opens a variable-layout table: `index_table` stores
    /// `(start, length)` entries, `data_table` stores the encoded
    /// payloads they point into.
    pub fn variable(schema: S, index_table: PagedTable, data_table: PagedTable) -> Result<Self> {
        let entry_size = INDEX_ENTRY_SIZE as u64;
        if index_table.element_count() % entry_size != 0 {
            return Err(PickleError::Corrupted(format!(
                "variable-layout index stream length {} is not a multiple of entry size {entry_size}",
                index_table.element_count()
            )));
        }
        Ok(Table {
            schema,
            index_table,
            data_table: Some(data_table),
            layout: Layout::Variable,
        })
    }

    /// Number of records currently stored.
    pub fn len(&self) -> u64 {
        match self.layout {
            Layout::Fixed { stride } => self.index_table.element_count() / stride,
            Layout::Variable => self.index_table.element_count() / INDEX_ENTRY_SIZE as u64,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads record `i`. Fails [`PickleError::IndexOutOfRange`] if
    /// `i >= len()`.
    pub async fn read(&mut self, i: u64) -> Result<S::Value> {
        let len = self.len();
        if i >= len {
            return Err(PickleError::IndexOutOfRange { index: i, bound: len });
        }
        match self.layout {
            Layout::Fixed { stride } => {
                let mut cursor = PagedCursor::new(&mut self.index_table, i * stride);
                self.schema.read(&mut cursor).await
            }
            Layout::Variable => {
                let entry_start = i * INDEX_ENTRY_SIZE as u64;
                let (start, length) = {
                    let mut cursor = PagedCursor::new(&mut self.index_table, entry_start);
                    let start = encoding::decode_long(&mut cursor).await?;
                    let length = encoding::decode_int(&mut cursor).await?;
                    (start, length)
                };
                let start = u64::try_from(start)
                    .map_err(|_| PickleError::Corrupted(format!("negative data offset {start}")))?;
                let data_table = self.data_table.as_mut().expect("variable layout has a data table");
                let mut cursor = PagedCursor::new(data_table, start);
                let value = self.schema.read(&mut cursor).await?;
                let consumed = cursor.pos - start;
                if consumed != length as u64 {
                    return Err(PickleError::Corrupted(format!(
                        "record {i} decoded {consumed} bytes, index entry declared {length}"
                    )));
                }
                Ok(value)
            }
        }
    }

    /// Writes record `i`. `i == len()` appends, extending the table by
    /// one record.
    pub async fn write(&mut self, i: u64, value: &S::Value) -> Result<()> {
        let len = self.len();
        if i > len {
            return Err(PickleError::IndexOutOfRange { index: i, bound: len });
        }
        match self.layout {
            Layout::Fixed { stride } => {
                let size = self.schema.dynamic_size(value) as u64;
                if size != stride {
                    return Err(PickleError::InvalidArgument(format!(
                        "fixed-layout record size {size} does not match stride {stride}"
                    )));
                }
                let mut cursor = PagedCursor::new(&mut self.index_table, i * stride);
                self.schema.write(&mut cursor, value).await
            }
            Layout::Variable => {
                let data_table = self.data_table.as_mut().expect("variable layout has a data table");
                let start = data_table.element_count();
                let size = self.schema.dynamic_size(value);
                {
                    let mut cursor = PagedCursor::new(data_table, start);
                    self.schema.write(&mut cursor, value).await?;
                }
                let entry_start = i * INDEX_ENTRY_SIZE as u64;
                let mut cursor = PagedCursor::new(&mut self.index_table, entry_start);
                encoding::encode_long(&mut cursor, start as i64).await?;
                encoding::encode_int(&mut cursor, size as i32).await
            }
        }
    }

    /// Flushes both underlying paged tables (header metadata + dirty
    /// pages); does not close their storage handles.
    pub async fn close(&mut self) -> Result<()> {
        self.index_table.close().await?;
        if let Some(data_table) = self.data_table.as_mut() {
            data_table.close().await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::CacheConfig;
    use crate::schema::{
        FixedSizeInlineArray, Int32Schema, Int64Schema, StringSchema, Tuple2,
    };
    use crate::storage::BlockStorage;
    use tempfile::tempdir;

    fn open_table(storage: &BlockStorage, id: &str, block_size: i32, capacity: usize) -> PagedTable {
        let handle = storage.create(id, block_size).unwrap();
        PagedTable::open(handle, CacheConfig { capacity }).unwrap()
    }

    #[tokio::test]
    async fn fixed_layout_long_schema_round_trips() {
        let dir = tempdir().unwrap();
        let storage = BlockStorage::open_root(dir.path());
        let byte_table = open_table(&storage, "longs", 9, 4);
        let mut table = Table::fixed(Int64Schema, byte_table).unwrap();

        table.write(0, &43).await.unwrap();
        table.write(1, &-12).await.unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.read(0).await.unwrap(), 43);
        assert_eq!(table.read(1).await.unwrap(), -12);
    }

    #[tokio::test]
    async fn variable_layout_tuple_round_trips_across_sizes() {
        for block_size in [8i32, 15, 30, 100] {
            for capacity in [3usize, 5, 7, 15, 30, 100] {
                let dir = tempdir().unwrap();
                let storage = BlockStorage::open_root(dir.path());
                let index_table = open_table(&storage, "idx", block_size, capacity);
                let data_table = open_table(&storage, "data", block_size, capacity);
                let schema = Tuple2::new(Int64Schema, StringSchema);
                let mut table = Table::variable(schema, index_table, data_table).unwrap();

                let records = [
                    (-12i64, "Dans le port d'Amsterdam".to_string()),
                    (i64::MIN, "Y a des marins qui chantent".to_string()),
                ];
                for (i, record) in records.iter().enumerate() {
                    table.write(i as u64, record).await.unwrap();
                }
                for (i, record) in records.iter().enumerate() {
                    assert_eq!(&table.read(i as u64).await.unwrap(), record);
                }
            }
        }
    }

    #[tokio::test]
    async fn fixed_layout_accepts_fixed_size_tuple_schema() {
        let dir = tempdir().unwrap();
        let storage = BlockStorage::open_root(dir.path());
        let byte_table = open_table(&storage, "pairs", 16, 4);
        let schema = Tuple2::new(Int32Schema, Int64Schema);
        let mut table = Table::fixed(schema, byte_table).unwrap();

        table.write(0, &(1, 2)).await.unwrap();
        table.write(1, &(3, -4)).await.unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.read(0).await.unwrap(), (1, 2));
        assert_eq!(table.read(1).await.unwrap(), (3, -4));
    }

    #[tokio::test]
    async fn fixed_layout_accepts_fixed_size_inline_array_schema() {
        let dir = tempdir().unwrap();
        let storage = BlockStorage::open_root(dir.path());
        let byte_table = open_table(&storage, "triples", 16, 4);
        let schema = FixedSizeInlineArray::new(Int32Schema, 3);
        let mut table = Table::fixed(schema, byte_table).unwrap();

        table.write(0, &vec![1, 2, 3]).await.unwrap();
        table.write(1, &vec![4, 5, 6]).await.unwrap();

        assert_eq!(table.len(), 2);
        assert_eq!(table.read(0).await.unwrap(), vec![1, 2, 3]);
        assert_eq!(table.read(1).await.unwrap(), vec![4, 5, 6]);
    }

    #[tokio::test]
    async fn write_at_len_appends_write_past_len_fails() {
        let dir = tempdir().unwrap();
        let storage = BlockStorage::open_root(dir.path());
        let byte_table = open_table(&storage, "longs", 16, 4);
        let mut table = Table::fixed(Int64Schema, byte_table).unwrap();

        table.write(0, &1).await.unwrap();
        assert_eq!(table.len(), 1);
        let err = table.write(5, &2).await.unwrap_err();
        assert!(matches!(err, PickleError::IndexOutOfRange { .. }));
    }

    #[tokio::test]
    async fn overwrite_leaves_later_read_consistent() {
        let dir = tempdir().unwrap();
        let storage = BlockStorage::open_root(dir.path());
        let index_table = open_table(&storage, "idx", 16, 4);
        let data_table = open_table(&storage, "data", 16, 4);
        let mut table = Table::variable(StringSchema, index_table, data_table).unwrap();

        table.write(0, &"first".to_string()).await.unwrap();
        table.write(1, &"second".to_string()).await.unwrap();
        table.write(0, &"overwritten".to_string()).await.unwrap();

        assert_eq!(table.read(0).await.unwrap(), "overwritten");
        assert_eq!(table.read(1).await.unwrap(), "second");
    }

    #[tokio::test]
    async fn read_never_written_fails_index_out_of_range() {
        let dir = tempdir().unwrap();
        let storage = BlockStorage::open_root(dir.path());
        let byte_table = open_table(&storage, "longs", 16, 4);
        let mut table = Table::fixed(Int64Schema, byte_table).unwrap();
        let err = table.read(0).await.unwrap_err();
        assert!(matches!(err, PickleError::IndexOutOfRange { .. }));
    }
}
