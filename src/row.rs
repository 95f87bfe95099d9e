//! Row materialisation for text and binary result sets.

use crate::connector::{BindOut, Connector, Fetch, StmtId};
use crate::error::Result;

/// One cell: a byte string or SQL NULL.
pub type Cell = Option<Vec<u8>>;

/// One row in server order.
pub type Row = Vec<Cell>;

/// Minimum per-column buffer for binary results. Columns whose reported
/// maximum length is smaller still get this much, so short metadata never
/// forces a refetch.
const MIN_COLUMN_BUFFER: usize = 256;

/// Collect the connector's stored text result set into owned rows.
///
/// Each row has exactly `result_columns` cells in server order. The caller
/// frees the result afterwards.
pub(crate) fn materialise_text<C: Connector>(connector: &mut C) -> Result<Vec<Row>> {
    let ncols = connector.result_columns();
    let mut rows = Vec::new();

    while connector.result_fetch()? {
        let mut row = Vec::with_capacity(ncols);
        for column in 0..ncols {
            row.push(connector.result_cell(column).map(|bytes| bytes.to_vec()));
        }
        rows.push(row);
    }

    Ok(rows)
}

/// Collect a statement's stored binary result set into owned rows.
///
/// Binds one variable-length output buffer per column, sized to the larger
/// of the reported maximum length and [`MIN_COLUMN_BUFFER`]. A value longer
/// than its buffer is refetched through the connector's per-column fetch
/// into a buffer of exactly the reported length.
pub(crate) fn materialise_binary<C: Connector>(
    connector: &mut C,
    stmt: StmtId,
) -> Result<Vec<Row>> {
    let ncols = connector.stmt_field_count(stmt);
    let mut binds: Vec<BindOut> = (0..ncols)
        .map(|column| {
            let size = connector.stmt_max_length(stmt, column).max(MIN_COLUMN_BUFFER);
            BindOut::with_size(size)
        })
        .collect();

    let mut rows = Vec::new();
    loop {
        match connector.stmt_fetch(stmt, &mut binds)? {
            Fetch::Done => break,
            Fetch::Row | Fetch::Truncated => {
                let mut row = Vec::with_capacity(ncols);
                for (column, bind) in binds.iter().enumerate() {
                    row.push(materialise_cell(connector, stmt, column, bind)?);
                }
                rows.push(row);
            }
        }
    }

    Ok(rows)
}

fn materialise_cell<C: Connector>(
    connector: &mut C,
    stmt: StmtId,
    column: usize,
    bind: &BindOut,
) -> Result<Cell> {
    if bind.is_null {
        return Ok(None);
    }
    if bind.length <= bind.buffer.len() {
        return Ok(Some(bind.buffer[..bind.length].to_vec()));
    }

    // Truncated: refetch the whole value into an exact-size buffer.
    let mut full = vec![0; bind.length];
    connector.stmt_fetch_column(stmt, column, &mut full)?;
    Ok(Some(full))
}
