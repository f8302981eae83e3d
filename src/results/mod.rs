//! Result tables: normalization of API responses, reassembly into one row
//! per input record, and CSV persistence.

mod assembler;
mod table;
mod writer;

pub use assembler::{
    assemble, drop_internal_columns, select_frameworks, FrameworkSelection, CORRELATION_COLUMN,
    ID_COLUMN, INTERNAL_COLUMNS,
};
pub use table::{ResultTable, COLUMN_SEPARATOR};
pub use writer::{ensure_output_writable, write_table, write_table_to, AtomicCsvWriter};
