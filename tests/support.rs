//! A scripted postgres backend for driving the engine over a real socket.
//!
//! Tests play the server side move by move: read an expected frontend
//! message, assert its shape, queue backend messages, flush. Any deviation
//! from the script fails the assertion on the backend task.
#![allow(dead_code)]

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
};

use postwire::{Config, SslMode};

pub async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// Config for user `alice`, password `secret`, database `app`, TLS off.
pub fn config(port: u16) -> Config {
    Config::new("alice")
        .password("secret")
        .host("127.0.0.1")
        .port(port)
        .dbname("app")
        .ssl_mode(SslMode::Disable)
}

pub struct Backend {
    stream: TcpStream,
    buf: BytesMut,
    out: BytesMut,
}

impl Backend {
    pub async fn accept(listener: &TcpListener) -> Backend {
        let (stream, _) = listener.accept().await.unwrap();
        Backend {
            stream,
            buf: BytesMut::new(),
            out: BytesMut::new(),
        }
    }

    /// Accept a connection and run a passwordless startup.
    pub async fn accept_trusting(listener: &TcpListener) -> Backend {
        let mut backend = Backend::accept(listener).await;
        backend.read_startup().await;
        backend
            .auth_ok()
            .parameter_status("server_version", "13.0")
            .backend_key_data(4242, 0xDEADBEEF)
            .ready(b'I');
        backend.flush().await;
        backend
    }

    async fn fill(&mut self, len: usize) {
        while self.buf.len() < len {
            let read = self.stream.read_buf(&mut self.buf).await.unwrap();
            assert_ne!(read, 0, "client closed the connection mid-message");
        }
    }

    /// Read one identifier-less frame (startup family), returning its payload.
    pub async fn read_startup(&mut self) -> Bytes {
        self.fill(4).await;
        let mut header = &self.buf[..4];
        let len = header.get_i32() as usize;
        self.fill(len).await;
        let mut frame = self.buf.split_to(len).freeze();
        frame.advance(4);
        frame
    }

    /// Read one tagged frontend message, returning `(msgtype, body)`.
    pub async fn read_message(&mut self) -> (u8, Bytes) {
        self.fill(5).await;
        let msgtype = self.buf[0];
        let mut header = &self.buf[1..5];
        let len = header.get_i32() as usize;
        self.fill(1 + len).await;
        let mut frame = self.buf.split_to(1 + len).freeze();
        frame.advance(5);
        (msgtype, frame)
    }

    /// Assert the client sends nothing more and hangs up.
    pub async fn expect_eof(&mut self) {
        let read = self.stream.read_buf(&mut self.buf).await.unwrap();
        assert_eq!(read, 0, "client kept talking: {:?}", self.buf);
    }

    pub async fn write_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.unwrap();
    }

    pub async fn flush(&mut self) {
        let out = self.out.split();
        self.stream.write_all(&out).await.unwrap();
    }

    /// Drop the connection abruptly.
    pub fn hang_up(self) {
        drop(self);
    }

    // ===== backend message builders, queued until `flush` =====

    pub fn msg(&mut self, msgtype: u8, body: &[u8]) -> &mut Self {
        self.out.put_u8(msgtype);
        self.out.put_i32(4 + body.len() as i32);
        self.out.put_slice(body);
        self
    }

    pub fn auth_ok(&mut self) -> &mut Self {
        self.msg(b'R', &0i32.to_be_bytes())
    }

    pub fn auth_cleartext(&mut self) -> &mut Self {
        self.msg(b'R', &3i32.to_be_bytes())
    }

    pub fn auth_md5(&mut self, salt: [u8; 4]) -> &mut Self {
        let mut body = BytesMut::new();
        body.put_i32(5);
        body.put_slice(&salt);
        let body = body.freeze();
        self.msg(b'R', &body)
    }

    pub fn auth_other(&mut self, code: i32) -> &mut Self {
        self.msg(b'R', &code.to_be_bytes())
    }

    pub fn parameter_status(&mut self, name: &str, value: &str) -> &mut Self {
        let mut body = BytesMut::new();
        body.put_slice(name.as_bytes());
        body.put_u8(0);
        body.put_slice(value.as_bytes());
        body.put_u8(0);
        let body = body.freeze();
        self.msg(b'S', &body)
    }

    pub fn backend_key_data(&mut self, process_id: u32, secret_key: u32) -> &mut Self {
        let mut body = BytesMut::new();
        body.put_u32(process_id);
        body.put_u32(secret_key);
        let body = body.freeze();
        self.msg(b'K', &body)
    }

    pub fn ready(&mut self, status: u8) -> &mut Self {
        self.msg(b'Z', &[status])
    }

    pub fn row_description(&mut self, columns: &[(&str, u32)]) -> &mut Self {
        let mut body = BytesMut::new();
        body.put_u16(columns.len() as u16);
        for (name, type_oid) in columns {
            body.put_slice(name.as_bytes());
            body.put_u8(0);
            body.put_u32(0); // table oid
            body.put_i16(0); // attribute number
            body.put_u32(*type_oid);
            body.put_i16(-1); // variable width
            body.put_i32(-1); // no type modifier
            body.put_i16(0); // text format
        }
        let body = body.freeze();
        self.msg(b'T', &body)
    }

    pub fn data_row(&mut self, fields: &[Option<&[u8]>]) -> &mut Self {
        let mut body = BytesMut::new();
        body.put_u16(fields.len() as u16);
        for field in fields {
            match field {
                Some(value) => {
                    body.put_i32(value.len() as i32);
                    body.put_slice(value);
                }
                None => body.put_i32(-1),
            }
        }
        let body = body.freeze();
        self.msg(b'D', &body)
    }

    pub fn command_complete(&mut self, tag: &str) -> &mut Self {
        let mut body = BytesMut::new();
        body.put_slice(tag.as_bytes());
        body.put_u8(0);
        let body = body.freeze();
        self.msg(b'C', &body)
    }

    pub fn error_response(&mut self, code: &str, message: &str) -> &mut Self {
        let mut body = BytesMut::new();
        body.put_u8(b'S');
        body.put_slice(b"ERROR\0");
        body.put_u8(b'C');
        body.put_slice(code.as_bytes());
        body.put_u8(0);
        body.put_u8(b'M');
        body.put_slice(message.as_bytes());
        body.put_u8(0);
        body.put_u8(0);
        let body = body.freeze();
        self.msg(b'E', &body)
    }

    pub fn notice_response(&mut self, message: &str) -> &mut Self {
        let mut body = BytesMut::new();
        body.put_u8(b'S');
        body.put_slice(b"NOTICE\0");
        body.put_u8(b'M');
        body.put_slice(message.as_bytes());
        body.put_u8(0);
        body.put_u8(0);
        let body = body.freeze();
        self.msg(b'N', &body)
    }

    pub fn parameter_description(&mut self, oids: &[u32]) -> &mut Self {
        let mut body = BytesMut::new();
        body.put_u16(oids.len() as u16);
        for oid in oids {
            body.put_u32(*oid);
        }
        let body = body.freeze();
        self.msg(b't', &body)
    }

    pub fn parse_complete(&mut self) -> &mut Self {
        self.msg(b'1', &[])
    }

    pub fn bind_complete(&mut self) -> &mut Self {
        self.msg(b'2', &[])
    }

    pub fn close_complete(&mut self) -> &mut Self {
        self.msg(b'3', &[])
    }

    pub fn no_data(&mut self) -> &mut Self {
        self.msg(b'n', &[])
    }

    // ===== frontend message readers with shape assertions =====

    /// Read a Parse message, asserting the type count is zero, and return
    /// `(statement_name, sql)`.
    pub async fn read_parse(&mut self) -> (String, String) {
        let (msgtype, mut body) = self.read_message().await;
        assert_eq!(msgtype, b'P', "expected Parse");
        let name = read_cstr(&mut body);
        let sql = read_cstr(&mut body);
        assert_eq!(body.get_i16(), 0, "Parse must not prespecify types");
        assert!(body.is_empty());
        (name, sql)
    }

    /// Read a Describe message, returning `(kind, name)`.
    pub async fn read_describe(&mut self) -> (u8, String) {
        let (msgtype, mut body) = self.read_message().await;
        assert_eq!(msgtype, b'D', "expected Describe");
        let kind = body.get_u8();
        let name = read_cstr(&mut body);
        (kind, name)
    }

    /// Read a Bind message, asserting all-text formats and the unnamed
    /// portal, and return `(statement_name, params)`.
    pub async fn read_bind(&mut self) -> (String, Vec<Option<Vec<u8>>>) {
        let (msgtype, mut body) = self.read_message().await;
        assert_eq!(msgtype, b'B', "expected Bind");
        assert_eq!(read_cstr(&mut body), "", "portal must be unnamed");
        let statement = read_cstr(&mut body);
        assert_eq!(body.get_i16(), 0, "parameter formats must default to text");
        let count = body.get_i16();
        let mut params = Vec::new();
        for _ in 0..count {
            match body.get_i32() {
                -1 => params.push(None),
                len => {
                    let value = body.split_to(len as usize);
                    params.push(Some(value.to_vec()));
                }
            }
        }
        assert_eq!(body.get_i16(), 0, "result formats must default to text");
        assert!(body.is_empty());
        (statement, params)
    }

    /// Read an Execute message, returning `(portal, max_rows)`.
    pub async fn read_execute(&mut self) -> (String, i32) {
        let (msgtype, mut body) = self.read_message().await;
        assert_eq!(msgtype, b'E', "expected Execute");
        let portal = read_cstr(&mut body);
        let max_rows = body.get_i32();
        (portal, max_rows)
    }

    pub async fn read_sync(&mut self) {
        let (msgtype, body) = self.read_message().await;
        assert_eq!(msgtype, b'S', "expected Sync");
        assert!(body.is_empty());
    }

    /// Read a simple Query message, returning the SQL.
    pub async fn read_query(&mut self) -> String {
        let (msgtype, mut body) = self.read_message().await;
        assert_eq!(msgtype, b'Q', "expected Query");
        read_cstr(&mut body)
    }

    /// Read a Close message, returning `(variant, name)`.
    pub async fn read_close(&mut self) -> (u8, String) {
        let (msgtype, mut body) = self.read_message().await;
        assert_eq!(msgtype, b'C', "expected Close");
        let variant = body.get_u8();
        let name = read_cstr(&mut body);
        (variant, name)
    }

    /// Serve one whole Parse+Describe('S')+Sync exchange and return the
    /// statement name the client picked.
    pub async fn serve_prepare(
        &mut self,
        expect_sql: &str,
        oids: &[u32],
        columns: &[(&str, u32)],
    ) -> String {
        let (name, sql) = self.read_parse().await;
        assert_eq!(sql, expect_sql);
        let (kind, describe_name) = self.read_describe().await;
        assert_eq!(kind, b'S');
        assert_eq!(describe_name, name);
        self.read_sync().await;

        self.parse_complete().parameter_description(oids);
        if columns.is_empty() {
            self.no_data();
        } else {
            self.row_description(columns);
        }
        self.ready(b'I');
        self.flush().await;
        name
    }
}

/// Split a nul terminated string off `body`.
pub fn read_cstr(body: &mut Bytes) -> String {
    let end = body.iter().position(|b| *b == 0).expect("missing nul");
    let value = body.split_to(end);
    body.advance(1);
    String::from_utf8(value.to_vec()).unwrap()
}

/// Decode the startup payload into the protocol version and parameter pairs.
pub fn startup_params(mut payload: Bytes) -> (i32, Vec<(String, String)>) {
    let version = payload.get_i32();
    let mut params = Vec::new();
    while payload[0] != 0 {
        let name = read_cstr(&mut payload);
        let value = read_cstr(&mut payload);
        params.push((name, value));
    }
    assert_eq!(payload.get_u8(), 0, "startup must end with a terminator");
    assert!(payload.is_empty());
    (version, params)
}
