use crate::backend::SqlDialect;
use crate::{LixError, Value};

/// Position in the script's parameter sequence. Positional `?` placeholders
/// consume slots left to right across statement boundaries, so a script
/// binds every parameter exactly once.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ParamCursor {
    consumed_positional: usize,
}

impl ParamCursor {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    fn take_positional(&mut self) -> usize {
        let slot = self.consumed_positional;
        self.consumed_positional += 1;
        slot
    }

    fn skip_to(&mut self, one_based: usize) {
        self.consumed_positional = self.consumed_positional.max(one_based);
    }
}

/// One statement after binding: densely renumbered SQL, the parameters it
/// actually references (in first-use order), and the cursor for the next
/// statement of the script.
#[derive(Debug, Clone)]
pub(crate) struct BoundStatementSql {
    pub(crate) sql: String,
    pub(crate) params: Vec<Value>,
    pub(crate) cursor: ParamCursor,
}

pub(crate) fn bind_statement(
    sql: &str,
    params: &[Value],
    dialect: SqlDialect,
) -> Result<BoundStatementSql, LixError> {
    bind_statement_with_cursor(sql, params, dialect, ParamCursor::new())
}

/// Splits the statement into literal spans and placeholder tokens, resolves
/// every token against the parameter sequence, and renders dialect
/// placeholders with dense one-based numbering.
pub(crate) fn bind_statement_with_cursor(
    sql: &str,
    params: &[Value],
    dialect: SqlDialect,
    mut cursor: ParamCursor,
) -> Result<BoundStatementSql, LixError> {
    let mut slots = SlotTable::for_params(params.len());
    let mut output = String::with_capacity(sql.len());

    for piece in split_placeholders(sql) {
        match piece {
            SqlPiece::Verbatim(span) => output.push_str(span),
            SqlPiece::Placeholder(token) => {
                let source = resolve_source_index(token, params.len(), &mut cursor)?;
                let dense = slots.assign(source);
                match dialect {
                    SqlDialect::Sqlite => output.push_str(&format!("?{dense}")),
                    SqlDialect::Postgres => output.push_str(&format!("${dense}")),
                }
            }
        }
    }

    Ok(BoundStatementSql {
        sql: output,
        params: slots.collect_params(params),
        cursor,
    })
}

/// A statement decomposed into verbatim SQL spans and placeholder tokens.
/// Tokens inside quoted strings or identifiers stay verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SqlPiece<'a> {
    Verbatim(&'a str),
    Placeholder(&'a str),
}

fn split_placeholders(sql: &str) -> Vec<SqlPiece<'_>> {
    let mut pieces = Vec::new();
    let mut span_start = 0usize;
    let mut chars = sql.char_indices().peekable();
    let mut quote: Option<char> = None;

    while let Some((at, ch)) = chars.next() {
        if let Some(open) = quote {
            if ch == open {
                // A doubled quote escapes itself and stays inside the span.
                if chars.peek().map(|(_, next)| *next) == Some(open) {
                    chars.next();
                } else {
                    quote = None;
                }
            }
            continue;
        }

        match ch {
            '\'' | '"' => quote = Some(ch),
            '?' => {
                let digits_end = scan_digits(at + ch.len_utf8(), &mut chars);
                if span_start < at {
                    pieces.push(SqlPiece::Verbatim(&sql[span_start..at]));
                }
                pieces.push(SqlPiece::Placeholder(&sql[at..digits_end]));
                span_start = digits_end;
            }
            '$' => {
                let digits_end = scan_digits(at + ch.len_utf8(), &mut chars);
                // A bare `$` is ordinary SQL text; only `$N` is a parameter.
                if digits_end > at + ch.len_utf8() {
                    if span_start < at {
                        pieces.push(SqlPiece::Verbatim(&sql[span_start..at]));
                    }
                    pieces.push(SqlPiece::Placeholder(&sql[at..digits_end]));
                    span_start = digits_end;
                }
            }
            _ => {}
        }
    }

    if span_start < sql.len() {
        pieces.push(SqlPiece::Verbatim(&sql[span_start..]));
    }
    pieces
}

fn scan_digits(
    from: usize,
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
) -> usize {
    let mut end = from;
    while let Some((at, ch)) = chars.peek().copied() {
        if !ch.is_ascii_digit() {
            break;
        }
        chars.next();
        end = at + ch.len_utf8();
    }
    end
}

fn resolve_source_index(
    token: &str,
    available: usize,
    cursor: &mut ParamCursor,
) -> Result<usize, LixError> {
    let source = if token == "?" {
        cursor.take_positional()
    } else {
        let digits = &token[1..];
        let one_based: usize = digits.parse().map_err(|_| {
            LixError::binding(format!("invalid SQL placeholder '{token}'"))
        })?;
        if one_based == 0 {
            return Err(LixError::binding(format!(
                "invalid SQL placeholder '{token}'"
            )));
        }
        cursor.skip_to(one_based);
        one_based - 1
    };

    if source >= available {
        return Err(LixError::binding(format!(
            "placeholder '{token}' references parameter {} but only {available} parameters were provided",
            source + 1
        )));
    }
    Ok(source)
}

/// Maps source parameter positions to dense one-based output slots, keeping
/// first-use order so repeated references share one slot.
struct SlotTable {
    dense_by_source: Vec<Option<usize>>,
    used_sources: Vec<usize>,
}

impl SlotTable {
    fn for_params(count: usize) -> Self {
        Self {
            dense_by_source: vec![None; count],
            used_sources: Vec::new(),
        }
    }

    fn assign(&mut self, source: usize) -> usize {
        if let Some(dense) = self.dense_by_source[source] {
            return dense;
        }
        self.used_sources.push(source);
        let dense = self.used_sources.len();
        self.dense_by_source[source] = Some(dense);
        dense
    }

    fn collect_params(self, params: &[Value]) -> Vec<Value> {
        self.used_sources
            .into_iter()
            .map(|source| params[source].clone())
            .collect()
    }
}
