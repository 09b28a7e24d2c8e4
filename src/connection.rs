//! Postgres Connection.
use std::{num::NonZeroUsize, sync::Arc};

use lru::LruCache;
use tokio::sync::oneshot;

use crate::{
    Result,
    cancel::{self, CancelHandle},
    protocol,
    row::{Param, QueryOutput},
    session::Session,
    statement::{Statement, StatementName, sql_id},
    stream::PgStream,
};

mod config;

pub use config::{Config, ParseError, SslMode};

const DEFAULT_PREPARED_STMT_CACHE: NonZeroUsize = NonZeroUsize::new(24).unwrap();

/// A single postgres session.
///
/// One logical conversation, strictly serial: the `&mut self` receivers are
/// the concurrency model, no query can start while another is in flight. The
/// only concurrent piece is the cancellation watcher, which shares nothing
/// with the session but the completion rendezvous.
///
/// Prepared statements are cached transparently by SQL text; repeat
/// preparation reuses the server-side statement without further Parse
/// traffic.
#[derive(Debug)]
pub struct Connection {
    stream: PgStream,
    session: Session,
    stmts: LruCache<u64, Arc<Statement>>,
    config: Config,
}

impl Connection {
    /// Connect and run the startup phase with a config parsed from `url`.
    pub async fn connect(url: &str) -> Result<Connection> {
        Self::connect_with(Config::parse(url)?).await
    }

    /// Connect and run the startup phase with a config taken from the
    /// environment, see [`Config::from_env`].
    pub async fn connect_env() -> Result<Connection> {
        Self::connect_with(Config::from_env()).await
    }

    /// Connect and run the startup phase.
    pub async fn connect_with(config: Config) -> Result<Connection> {
        let mut stream = PgStream::connect(&config).await?;
        let mut session = Session::default();

        protocol::startup(&mut stream, &mut session, &config)
            .await
            .map_err(|err| err.context("startup"))?;

        Ok(Self {
            stream,
            session,
            stmts: LruCache::new(DEFAULT_PREPARED_STMT_CACHE),
            config,
        })
    }

    /// Negotiated session state: server parameters, timezone, backend key
    /// data and transaction status.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Run a query through the simple protocol: one message out, a buffered
    /// tagged stream back.
    ///
    /// Rows travel in the text format with their per-field length array
    /// preserved, so NULL stays distinguishable from an empty value.
    pub async fn simple_query(&mut self, sql: &str) -> Result<QueryOutput> {
        protocol::simple_query(&mut self.stream, &mut self.session, sql)
            .await
            .map_err(|err| err.context("simple query"))
    }

    /// Parse and describe `sql` as a named server-side statement.
    ///
    /// The statement name derives from the SQL text, and the entry is cached:
    /// preparing the same text again returns the cached statement without any
    /// wire traffic.
    pub async fn prepare(&mut self, sql: &str) -> Result<Arc<Statement>> {
        let sql = sql.trim();
        let id = sql_id(sql);

        if let Some(stmt) = self.stmts.get(&id) {
            #[cfg(feature = "log")]
            log::trace!("prepared statement cache hit: {}", stmt.name());
            return Ok(Arc::clone(stmt));
        }

        let name = StatementName::from_id(id);
        let (parameter_oids, columns) =
            protocol::prepare(&mut self.stream, &mut self.session, name.as_str(), sql)
                .await
                .map_err(|err| err.context("prepare"))?;

        let stmt = Arc::new(Statement::new(id, name, parameter_oids, columns));

        if let Some((_, evicted)) = self.stmts.push(id, Arc::clone(&stmt)) {
            #[cfg(feature = "log")]
            log::trace!("prepared statement evicted: {}", evicted.name());
            protocol::close_statement(&mut self.stream, &mut self.session, evicted.name().as_str())
                .await
                .map_err(|err| err.context("close statement"))?;
        }

        Ok(stmt)
    }

    /// Parse and describe `sql` as the unnamed server-side statement,
    /// bypassing the cache.
    ///
    /// The unnamed statement lives until the next Parse that targets it.
    pub async fn prepare_uncached(&mut self, sql: &str) -> Result<Statement> {
        let sql = sql.trim();
        let (parameter_oids, columns) =
            protocol::prepare(&mut self.stream, &mut self.session, "", sql)
                .await
                .map_err(|err| err.context("prepare"))?;
        Ok(Statement::new(sql_id(sql), StatementName::unnamed(), parameter_oids, columns))
    }

    /// Run `sql` through the extended protocol and buffer the returned rows.
    ///
    /// The statement is prepared (or fetched from the cache) first; its
    /// Describe-time columns become the result header.
    pub async fn query(&mut self, sql: &str, params: &[Param<'_>]) -> Result<QueryOutput> {
        let stmt = self.prepare(sql).await?;
        self.query_prepared(&stmt, params).await
    }

    /// Run `sql` through the extended protocol and report the affected-row
    /// count from its command tag.
    pub async fn execute(&mut self, sql: &str, params: &[Param<'_>]) -> Result<u64> {
        let stmt = self.prepare(sql).await?;
        self.execute_prepared(&stmt, params).await
    }

    /// Bind and execute an already prepared statement, buffering its rows.
    pub async fn query_prepared(
        &mut self,
        stmt: &Statement,
        params: &[Param<'_>],
    ) -> Result<QueryOutput> {
        let mut output = protocol::bind_execute(
            &mut self.stream,
            &mut self.session,
            stmt.name().as_str(),
            params,
        )
        .await
        .map_err(|err| err.context("execute statement"))?;
        output.columns = stmt.columns().to_vec();
        Ok(output)
    }

    /// Bind and execute an already prepared statement, reporting only the
    /// affected-row count.
    pub async fn execute_prepared(&mut self, stmt: &Statement, params: &[Param<'_>]) -> Result<u64> {
        let output = protocol::bind_execute(
            &mut self.stream,
            &mut self.session,
            stmt.name().as_str(),
            params,
        )
        .await
        .map_err(|err| err.context("execute statement"))?;
        Ok(output.rows_affected)
    }

    /// [`simple_query`][1] with an external cancellation signal attached.
    ///
    /// [1]: Connection::simple_query
    pub async fn simple_query_with_cancel(
        &mut self,
        sql: &str,
        cancel: oneshot::Receiver<()>,
    ) -> Result<QueryOutput> {
        let done = self.watch(cancel);
        let result = self.simple_query(sql).await;
        let _ = done.send(());
        result
    }

    /// [`query`][Connection::query] with an external cancellation signal
    /// attached.
    ///
    /// When the signal fires first, a CancelRequest goes out on a side
    /// connection; the backend aborts the statement and this call returns a
    /// database error with SQLSTATE `57014` (see [`Error::is_canceled`][1]).
    /// The session stays usable either way.
    ///
    /// [1]: crate::Error::is_canceled
    pub async fn query_with_cancel(
        &mut self,
        sql: &str,
        params: &[Param<'_>],
        cancel: oneshot::Receiver<()>,
    ) -> Result<QueryOutput> {
        let done = self.watch(cancel);
        let result = self.query(sql, params).await;
        let _ = done.send(());
        result
    }

    /// [`execute`][Connection::execute] with an external cancellation signal
    /// attached.
    pub async fn execute_with_cancel(
        &mut self,
        sql: &str,
        params: &[Param<'_>],
        cancel: oneshot::Receiver<()>,
    ) -> Result<u64> {
        let done = self.watch(cancel);
        let result = self.execute(sql, params).await;
        let _ = done.send(());
        result
    }

    /// Spawn a cancellation watcher and hand back the completion sender.
    ///
    /// The operation must fire the returned sender exactly once, success or
    /// error, so the watcher never outlives the call it guards.
    fn watch(&self, cancel: oneshot::Receiver<()>) -> oneshot::Sender<()> {
        let (done_tx, done_rx) = oneshot::channel();
        cancel::watch(self.cancel_handle(), cancel, done_rx);
        done_tx
    }

    /// A detached handle that can cancel this connection's in-flight
    /// statement from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle::new(
            self.config.clone(),
            self.session.process_id(),
            self.session.secret_key(),
        )
    }

    /// Close a prepared statement on the server and drop it from the cache.
    pub async fn close_statement(&mut self, stmt: &Statement) -> Result<()> {
        // an uncached statement shares its sql id with any cached entry for
        // the same text; only drop the entry this handle actually names
        let owns_entry = self
            .stmts
            .peek(&stmt.sql_id())
            .is_some_and(|cached| cached.name() == stmt.name());
        if owns_entry {
            self.stmts.pop(&stmt.sql_id());
        }
        protocol::close_statement(&mut self.stream, &mut self.session, stmt.name().as_str())
            .await
            .map_err(|err| err.context("close statement"))
    }

    /// Gracefully close the connection.
    ///
    /// Sends Terminate and shuts the socket down; no response is expected.
    pub async fn close(mut self) -> Result<()> {
        self.stream.terminate().await.map_err(|err| err.context("terminate"))
    }
}
