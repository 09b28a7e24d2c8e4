//! Postgres Protocol Operations
//!
//! Every operation here follows the same discipline: write its messages as
//! one batch, then drain the response stream to `ReadyForQuery` before
//! returning. An `ErrorResponse` met on the way is captured, not returned on
//! the spot, because the backend still sends session-state messages
//! (`ParameterStatus`, `ReadyForQuery`) after it; the captured error comes
//! back only once the stream is drained and the session is in a known state.
use bytes::Buf;

use crate::{
    Result,
    column::Column,
    connection::Config,
    postgres::{BackendMessage, ProtocolError, backend, frontend},
    row::{Param, QueryOutput, Row},
    session::Session,
    stream::PgStream,
};

/// Authentication method requested by the backend is not supported.
///
/// Only cleartext and MD5 password exchanges are spoken here.
#[derive(Debug, thiserror::Error)]
#[error("unsupported authentication method (code {code})")]
pub struct UnsupportedAuth {
    pub(crate) code: u32,
}

/// Perform the startup phase.
///
/// <https://www.postgresql.org/docs/17/protocol-flow.html#PROTOCOL-FLOW-START-UP>
pub(crate) async fn startup(
    stream: &mut PgStream,
    session: &mut Session,
    config: &Config,
) -> Result<()> {
    // To begin a session, a frontend opens a connection to the server and
    // sends a startup message, optionally including additional settings
    // for run-time parameters.
    let mut parameters = Vec::with_capacity(2 + config.parameters.len());
    parameters.push(("user", config.user.as_str()));
    if !config.dbname.is_empty() {
        parameters.push(("database", config.dbname.as_str()));
    }
    for (name, value) in &config.parameters {
        parameters.push((name.as_str(), value.as_str()));
    }

    stream.send_startup(frontend::Startup { parameters: &parameters });
    stream.flush().await?;

    // The server then sends an appropriate authentication request message,
    // to which the frontend must reply with an appropriate authentication
    // response message (such as a password).
    //
    // After having received AuthenticationOk, the frontend waits out the
    // backend start: ParameterStatus reports, BackendKeyData, and finally
    // ReadyForQuery.
    loop {
        match stream.recv().await? {
            BackendMessage::Authentication(auth) => authenticate(stream, config, auth).await?,
            BackendMessage::ParameterStatus(param) => session.set_parameter(param.name, param.value),
            BackendMessage::BackendKeyData(key_data) => {
                session.set_key_data(key_data.process_id, key_data.secret_key)
            }
            BackendMessage::ReadyForQuery(ready) => {
                session.sync_ready(ready)?;
                return Ok(());
            }
            // Startup cannot continue past an error; there is nothing to drain.
            BackendMessage::ErrorResponse(response) => return Err(response.error.into()),
            message => {
                return Err(ProtocolError::unexpected_phase(message.msgtype(), "startup").into());
            }
        }
    }
}

async fn authenticate(
    stream: &mut PgStream,
    config: &Config,
    auth: backend::Authentication,
) -> Result<()> {
    use backend::Authentication;

    match auth {
        Authentication::Ok => {}
        // The frontend must now send a PasswordMessage containing the
        // password in clear-text form.
        Authentication::CleartextPassword => {
            stream.send(frontend::PasswordMessage { password: config.password.as_str() });
            stream.flush().await?;
            expect_auth_ok(stream).await?;
        }
        // The frontend must now send a PasswordMessage containing the
        // password (with user name) encrypted via MD5, then encrypted again
        // using the 4-byte random salt specified in the request.
        Authentication::MD5Password { salt } => {
            let password = md5_password(config.user.as_str(), config.password.as_str(), salt);
            stream.send(frontend::PasswordMessage { password: &password });
            stream.flush().await?;
            expect_auth_ok(stream).await?;
        }
        Authentication::Other(code) => return Err(UnsupportedAuth { code }.into()),
    }

    Ok(())
}

/// Receive until the next `Authentication` message and assert success.
async fn expect_auth_ok(stream: &mut PgStream) -> Result<()> {
    loop {
        match stream.recv().await? {
            BackendMessage::Authentication(backend::Authentication::Ok) => return Ok(()),
            BackendMessage::Authentication(_) => {
                return Err(ProtocolError::unexpected_phase(
                    backend::Authentication::MSGTYPE,
                    "password response",
                )
                .into());
            }
            BackendMessage::ErrorResponse(response) => return Err(response.error.into()),
            _ => continue,
        }
    }
}

/// The backend salted double-MD5 password scheme:
/// `"md5" ∥ hex(md5(hex(md5(password ∥ user)) ∥ salt))`.
fn md5_password(user: &str, password: &str, salt: [u8; 4]) -> String {
    let credentials = [password.as_bytes(), user.as_bytes()].concat();
    let inner = format!("{:x}", md5::compute(credentials));

    let mut salted = Vec::with_capacity(inner.len() + salt.len());
    salted.extend_from_slice(inner.as_bytes());
    salted.extend_from_slice(&salt);

    format!("md5{:x}", md5::compute(salted))
}

/// Perform a simple query.
///
/// <https://www.postgresql.org/docs/current/protocol-flow.html#PROTOCOL-FLOW-SIMPLE-QUERY>
pub(crate) async fn simple_query(
    stream: &mut PgStream,
    session: &mut Session,
    sql: &str,
) -> Result<QueryOutput> {
    stream.guard()?;
    stream.send(frontend::Query { sql });
    stream.flush().await?;

    let mut output = QueryOutput::default();
    let mut error = None;

    loop {
        match stream.recv().await? {
            // Indicates that rows are about to be returned in response to the
            // query. The contents of this message describe the column layout
            // of the rows, which follow as DataRow messages.
            BackendMessage::RowDescription(description) => {
                output.columns = Column::parse_all(description)?;
            }
            BackendMessage::DataRow(data_row) => output.rows.push(Row::parse(data_row)?),
            // An SQL command completed normally.
            BackendMessage::CommandComplete(command) => complete(&mut output, command),
            BackendMessage::EmptyQueryResponse(_) => {}
            BackendMessage::ParameterStatus(param) => session.set_parameter(param.name, param.value),
            BackendMessage::ErrorResponse(response) => error = Some(response.error),
            BackendMessage::ReadyForQuery(ready) => {
                session.sync_ready(ready)?;
                break;
            }
            _ => {}
        }
    }

    match error {
        Some(err) => Err(err.into()),
        None => Ok(output),
    }
}

/// Parse and describe a named statement.
///
/// Parse, Describe('S') and Sync leave as one batch. The backend answers
/// with the inferred parameter OIDs and, for row-returning statements, the
/// column layout; `NoData` instead of a RowDescription is not an error.
pub(crate) async fn prepare(
    stream: &mut PgStream,
    session: &mut Session,
    name: &str,
    sql: &str,
) -> Result<(Vec<u32>, Vec<Column>)> {
    stream.guard()?;
    stream.send(frontend::Parse { name, sql });
    stream.send(frontend::Describe { kind: b'S', name });
    stream.send(frontend::Sync);
    stream.flush().await?;

    let mut oids = Vec::new();
    let mut columns = Vec::new();
    let mut error = None;

    loop {
        match stream.recv().await? {
            BackendMessage::ParameterDescription(description) => {
                oids = parameter_oids(description)?;
            }
            BackendMessage::RowDescription(description) => {
                columns = Column::parse_all(description)?;
            }
            BackendMessage::ParseComplete(_) | BackendMessage::NoData(_) => {}
            BackendMessage::ParameterStatus(param) => session.set_parameter(param.name, param.value),
            BackendMessage::ErrorResponse(response) => error = Some(response.error),
            BackendMessage::ReadyForQuery(ready) => {
                session.sync_ready(ready)?;
                break;
            }
            _ => {}
        }
    }

    match error {
        Some(err) => Err(err.into()),
        None => Ok((oids, columns)),
    }
}

fn parameter_oids(
    mut description: backend::ParameterDescription,
) -> Result<Vec<u32>, ProtocolError> {
    let mut oids = Vec::with_capacity(description.param_len as usize);
    for _ in 0..description.param_len {
        if description.oids.remaining() < 4 {
            return Err(ProtocolError::truncated(backend::ParameterDescription::MSGTYPE));
        }
        oids.push(description.oids.get_u32());
    }
    Ok(oids)
}

/// Bind the unnamed portal to a prepared statement and execute it.
///
/// All parameters and result columns travel in the text format; a `None`
/// parameter is written as the NULL length `-1`. The row limit is zero,
/// so the portal always runs to completion.
///
/// Both the row-returning and the affected-count entry points of the
/// connection funnel through here.
pub(crate) async fn bind_execute(
    stream: &mut PgStream,
    session: &mut Session,
    statement: &str,
    params: &[Param<'_>],
) -> Result<QueryOutput> {
    stream.guard()?;
    stream.send(frontend::Bind { portal: "", statement, params });
    stream.send(frontend::Execute { portal: "", max_rows: 0 });
    stream.send(frontend::Sync);
    stream.flush().await?;

    let mut output = QueryOutput::default();
    let mut error = None;

    loop {
        match stream.recv().await? {
            BackendMessage::DataRow(data_row) => output.rows.push(Row::parse(data_row)?),
            BackendMessage::CommandComplete(command) => complete(&mut output, command),
            BackendMessage::BindComplete(_) | BackendMessage::EmptyQueryResponse(_) => {}
            BackendMessage::ParameterStatus(param) => session.set_parameter(param.name, param.value),
            BackendMessage::ErrorResponse(response) => error = Some(response.error),
            BackendMessage::ReadyForQuery(ready) => {
                session.sync_ready(ready)?;
                break;
            }
            _ => {}
        }
    }

    match error {
        Some(err) => Err(err.into()),
        None => Ok(output),
    }
}

/// Close a named prepared statement on the server.
pub(crate) async fn close_statement(
    stream: &mut PgStream,
    session: &mut Session,
    name: &str,
) -> Result<()> {
    stream.guard()?;
    stream.send(frontend::Close { variant: b'S', name });
    stream.send(frontend::Sync);
    stream.flush().await?;

    let mut error = None;

    loop {
        match stream.recv().await? {
            BackendMessage::CloseComplete(_) => {}
            BackendMessage::ParameterStatus(param) => session.set_parameter(param.name, param.value),
            BackendMessage::ErrorResponse(response) => error = Some(response.error),
            BackendMessage::ReadyForQuery(ready) => {
                session.sync_ready(ready)?;
                break;
            }
            _ => {}
        }
    }

    match error {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn complete(output: &mut QueryOutput, command: backend::CommandComplete) {
    output.rows_affected = rows_affected(&command.tag);
    output.command_tag = Some(String::from_utf8_lossy(&command.tag).into_owned());
}

/// Decode the affected-row count from a command tag.
///
/// Tags look like `UPDATE 3`, `INSERT 0 5` or just `CREATE TABLE`; the last
/// whitespace-separated field is the count when it parses as an integer.
fn rows_affected(tag: &[u8]) -> u64 {
    let Ok(tag) = std::str::from_utf8(tag) else {
        return 0;
    };
    tag.split_whitespace()
        .next_back()
        .and_then(|count| count.parse().ok())
        .unwrap_or(0)
}
