use crate::backend::SqlDialect;
use crate::{LixBackend, LixError, LixTransaction, QueryResult, Value};

/// A SQL execution handle that is either the backend connection or an open
/// transaction. Lets the same lowering/materialization code run in both.
pub(crate) enum SqlConn<'a> {
    Backend(&'a dyn LixBackend),
    Transaction(&'a mut (dyn LixTransaction + 'a)),
}

impl SqlConn<'_> {
    pub(crate) fn dialect(&self) -> SqlDialect {
        match self {
            Self::Backend(backend) => backend.dialect(),
            Self::Transaction(transaction) => transaction.dialect(),
        }
    }

    pub(crate) async fn execute(
        &mut self,
        sql: &str,
        params: &[Value],
    ) -> Result<QueryResult, LixError> {
        match self {
            Self::Backend(backend) => backend.execute(sql, params).await,
            Self::Transaction(transaction) => transaction.execute(sql, params).await,
        }
    }
}
