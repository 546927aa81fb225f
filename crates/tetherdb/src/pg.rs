//! PostgreSQL connector
//!
//! Maps a [`ServerDescriptor`] plus [`ConnectOptions`] onto the `postgres`
//! crate: the connect timeout and TCP keepalives come from the options,
//! the init command runs right after the handshake, and `ping` is a
//! `SELECT 1` round trip.
//!
//! Statements are prepared server-side and parameters are converted to
//! each statement's declared types, so `Value::Int` binds against any
//! integer or float parameter and every scalar binds against text.
//! Columns outside the supported type set fail the query with a clear
//! message instead of decoding to garbage; cast them in SQL (`::text`,
//! `::float8`) when needed.

use std::time::Duration;

use bytes::BytesMut;
use postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use postgres::{Client, Config, NoTls, Statement};

use crate::config::ServerDescriptor;
use crate::connector::{ConnectOptions, Connection, Connector, Liveness, Row, Value};
use crate::error::{Error, Result};

/// Idle time before the first TCP keepalive on persistent sessions
const KEEPALIVE_IDLE: Duration = Duration::from_secs(60);

/// Connector producing PostgreSQL sessions
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnector;

impl PgConnector {
    /// Create the connector
    pub fn new() -> Self {
        PgConnector
    }
}

impl Connector for PgConnector {
    fn connect(
        &self,
        server: &ServerDescriptor,
        options: &ConnectOptions,
    ) -> Result<Box<dyn Connection>> {
        let config = client_config(server, options);
        let mut client = config.connect(NoTls).map_err(|e| Error::Connect {
            server: server.address(),
            message: e.to_string(),
        })?;
        if let Some(init_sql) = &options.init_sql {
            client.batch_execute(init_sql).map_err(|e| Error::Connect {
                server: server.address(),
                message: format!("init command failed: {}", e),
            })?;
        }
        Ok(Box::new(PgConnection { client }))
    }
}

fn client_config(server: &ServerDescriptor, options: &ConnectOptions) -> Config {
    let mut config = Config::new();
    config
        .host(&server.host)
        .port(server.port)
        .dbname(&server.dbname)
        .user(&server.user)
        .connect_timeout(options.connect_timeout);
    if !server.password.is_empty() {
        config.password(&server.password);
    }
    if options.persistent {
        // Keepalives are what stops idle middleboxes from silently cutting
        // a session meant to outlive single requests.
        config.keepalives(true).keepalives_idle(KEEPALIVE_IDLE);
    } else {
        config.keepalives(false);
    }
    config
}

struct PgConnection {
    client: Client,
}

impl Connection for PgConnection {
    fn ping(&mut self) -> Liveness {
        if self.client.is_closed() {
            return Liveness::Dead("connection is closed".to_string());
        }
        match self.client.simple_query("SELECT 1") {
            Ok(_) => Liveness::Alive,
            Err(e) => Liveness::Dead(e.to_string()),
        }
    }

    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64> {
        let stmt = self.prepare(sql)?;
        let bound = bound_params(&stmt, params)?;
        let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(|p| p.as_ref()).collect();
        self.client
            .execute(&stmt, &refs)
            .map_err(|e| Error::Query(e.to_string()))
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let stmt = self.prepare(sql)?;
        let bound = bound_params(&stmt, params)?;
        let refs: Vec<&(dyn ToSql + Sync)> = bound.iter().map(|p| p.as_ref()).collect();
        let rows = self
            .client
            .query(&stmt, &refs)
            .map_err(|e| Error::Query(e.to_string()))?;
        rows.iter().map(decode_row).collect()
    }
}

impl PgConnection {
    fn prepare(&mut self, sql: &str) -> Result<Statement> {
        self.client
            .prepare(sql)
            .map_err(|e| Error::Query(format!("prepare failed: {}", e)))
    }
}

/// Typeless NULL accepted by any parameter slot
#[derive(Debug)]
struct NullParam;

impl ToSql for NullParam {
    fn to_sql(
        &self,
        _ty: &Type,
        _out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        Ok(IsNull::Yes)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

fn is_text(ty: &Type) -> bool {
    *ty == Type::TEXT || *ty == Type::VARCHAR || *ty == Type::BPCHAR || *ty == Type::NAME
}

fn mismatch(what: &str, ty: &Type) -> Error {
    Error::Query(format!("cannot bind {} value as {} parameter", what, ty))
}

fn bound_params(stmt: &Statement, params: &[Value]) -> Result<Vec<Box<dyn ToSql + Sync>>> {
    let types = stmt.params();
    if types.len() != params.len() {
        return Err(Error::Query(format!(
            "statement expects {} parameters, got {}",
            types.len(),
            params.len()
        )));
    }
    params
        .iter()
        .zip(types)
        .map(|(value, ty)| param_for(value, ty))
        .collect()
}

fn param_for(value: &Value, ty: &Type) -> Result<Box<dyn ToSql + Sync>> {
    match value {
        Value::Null => Ok(Box::new(NullParam)),
        Value::Bool(b) => {
            if *ty == Type::BOOL {
                Ok(Box::new(*b))
            } else if is_text(ty) {
                Ok(Box::new(b.to_string()))
            } else {
                Err(mismatch("bool", ty))
            }
        }
        Value::Int(i) => {
            if *ty == Type::INT8 {
                Ok(Box::new(*i))
            } else if *ty == Type::INT4 {
                let v = i32::try_from(*i).map_err(|_| {
                    Error::Query(format!("integer {} out of range for int4 parameter", i))
                })?;
                Ok(Box::new(v))
            } else if *ty == Type::INT2 {
                let v = i16::try_from(*i).map_err(|_| {
                    Error::Query(format!("integer {} out of range for int2 parameter", i))
                })?;
                Ok(Box::new(v))
            } else if *ty == Type::FLOAT8 {
                Ok(Box::new(*i as f64))
            } else if *ty == Type::FLOAT4 {
                Ok(Box::new(*i as f32))
            } else if is_text(ty) {
                Ok(Box::new(i.to_string()))
            } else {
                Err(mismatch("integer", ty))
            }
        }
        Value::Float(x) => {
            if *ty == Type::FLOAT8 {
                Ok(Box::new(*x))
            } else if *ty == Type::FLOAT4 {
                Ok(Box::new(*x as f32))
            } else if is_text(ty) {
                Ok(Box::new(x.to_string()))
            } else {
                Err(mismatch("float", ty))
            }
        }
        Value::Text(s) => {
            if is_text(ty) {
                Ok(Box::new(s.clone()))
            } else {
                Err(mismatch("text", ty))
            }
        }
        Value::Bytes(b) => {
            if *ty == Type::BYTEA {
                Ok(Box::new(b.clone()))
            } else {
                Err(mismatch("bytes", ty))
            }
        }
    }
}

fn decode_row(row: &postgres::Row) -> Result<Row> {
    let mut columns = Vec::with_capacity(row.len());
    let mut values = Vec::with_capacity(row.len());
    for (idx, col) in row.columns().iter().enumerate() {
        columns.push(col.name().to_string());
        values.push(decode_value(row, idx, col.name(), col.type_())?);
    }
    Ok(Row { columns, values })
}

fn decode_value(row: &postgres::Row, idx: usize, name: &str, ty: &Type) -> Result<Value> {
    fn fail(name: &str, e: postgres::Error) -> Error {
        Error::Query(format!("column {:?} failed to decode: {}", name, e))
    }

    let value = if *ty == Type::BOOL {
        row.try_get::<_, Option<bool>>(idx)
            .map_err(|e| fail(name, e))?
            .map(Value::Bool)
    } else if *ty == Type::INT2 {
        row.try_get::<_, Option<i16>>(idx)
            .map_err(|e| fail(name, e))?
            .map(|v| Value::Int(i64::from(v)))
    } else if *ty == Type::INT4 {
        row.try_get::<_, Option<i32>>(idx)
            .map_err(|e| fail(name, e))?
            .map(|v| Value::Int(i64::from(v)))
    } else if *ty == Type::INT8 {
        row.try_get::<_, Option<i64>>(idx)
            .map_err(|e| fail(name, e))?
            .map(Value::Int)
    } else if *ty == Type::FLOAT4 {
        row.try_get::<_, Option<f32>>(idx)
            .map_err(|e| fail(name, e))?
            .map(|v| Value::Float(f64::from(v)))
    } else if *ty == Type::FLOAT8 {
        row.try_get::<_, Option<f64>>(idx)
            .map_err(|e| fail(name, e))?
            .map(Value::Float)
    } else if is_text(ty) {
        row.try_get::<_, Option<String>>(idx)
            .map_err(|e| fail(name, e))?
            .map(Value::Text)
    } else if *ty == Type::BYTEA {
        row.try_get::<_, Option<Vec<u8>>>(idx)
            .map_err(|e| fail(name, e))?
            .map(Value::Bytes)
    } else if *ty == Type::TIMESTAMP {
        row.try_get::<_, Option<chrono::NaiveDateTime>>(idx)
            .map_err(|e| fail(name, e))?
            .map(|v| Value::Text(v.to_string()))
    } else if *ty == Type::TIMESTAMPTZ {
        row.try_get::<_, Option<chrono::DateTime<chrono::Utc>>>(idx)
            .map_err(|e| fail(name, e))?
            .map(|v| Value::Text(v.to_rfc3339()))
    } else if *ty == Type::DATE {
        row.try_get::<_, Option<chrono::NaiveDate>>(idx)
            .map_err(|e| fail(name, e))?
            .map(|v| Value::Text(v.to_string()))
    } else if *ty == Type::TIME {
        row.try_get::<_, Option<chrono::NaiveTime>>(idx)
            .map_err(|e| fail(name, e))?
            .map(|v| Value::Text(v.to_string()))
    } else if *ty == Type::JSON || *ty == Type::JSONB {
        row.try_get::<_, Option<serde_json::Value>>(idx)
            .map_err(|e| fail(name, e))?
            .map(|v| Value::Text(v.to_string()))
    } else {
        return Err(Error::Query(format!(
            "column {:?} has unsupported type {}; cast it in SQL (::text, ::float8)",
            name, ty
        )));
    };
    Ok(value.unwrap_or(Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use postgres::config::Host;
    use std::net::TcpListener;

    fn descriptor(host: &str, port: u16) -> ServerDescriptor {
        ServerDescriptor {
            host: host.to_string(),
            port,
            dbname: "payroll".to_string(),
            user: "app".to_string(),
            password: "secret".to_string(),
        }
    }

    fn options(persistent: bool) -> ConnectOptions {
        ConnectOptions {
            connect_timeout: Duration::from_secs(5),
            persistent,
            init_sql: None,
        }
    }

    #[test]
    fn test_config_maps_descriptor() {
        let config = client_config(&descriptor("db1.internal", 5433), &options(true));

        match &config.get_hosts()[0] {
            Host::Tcp(host) => assert_eq!(host, "db1.internal"),
            other => panic!("unexpected host {:?}", other),
        }
        assert_eq!(config.get_ports(), &[5433]);
        assert_eq!(config.get_dbname(), Some("payroll"));
        assert_eq!(config.get_user(), Some("app"));
        assert_eq!(config.get_password(), Some(&b"secret"[..]));
        assert_eq!(
            config.get_connect_timeout(),
            Some(&Duration::from_secs(5))
        );
        assert!(config.get_keepalives());
    }

    #[test]
    fn test_plain_session_disables_keepalives() {
        let config = client_config(&descriptor("db1", 5432), &options(false));
        assert!(!config.get_keepalives());
    }

    #[test]
    fn test_empty_password_left_unset() {
        let mut server = descriptor("db1", 5432);
        server.password = String::new();

        let config = client_config(&server, &options(true));
        assert_eq!(config.get_password(), None);
    }

    #[test]
    fn test_param_conversions() {
        assert!(param_for(&Value::Int(5), &Type::INT4).is_ok());
        assert!(param_for(&Value::Int(5), &Type::INT2).is_ok());
        assert!(param_for(&Value::Int(5), &Type::FLOAT8).is_ok());
        assert!(param_for(&Value::Int(7), &Type::TEXT).is_ok());
        assert!(param_for(&Value::Float(1.5), &Type::FLOAT4).is_ok());
        assert!(param_for(&Value::Bool(true), &Type::BOOL).is_ok());
        assert!(param_for(&Value::Bytes(vec![1]), &Type::BYTEA).is_ok());
        assert!(param_for(&Value::Null, &Type::BYTEA).is_ok());
        assert!(param_for(&Value::Text("x".into()), &Type::VARCHAR).is_ok());
    }

    #[test]
    fn test_param_mismatches_rejected() {
        assert!(param_for(&Value::Text("x".into()), &Type::INT4).is_err());
        assert!(param_for(&Value::Bool(true), &Type::INT4).is_err());
        assert!(param_for(&Value::Bytes(vec![1]), &Type::TEXT).is_err());
        assert!(param_for(&Value::Int(i64::from(i32::MAX) + 1), &Type::INT4).is_err());
        assert!(param_for(&Value::Int(40_000), &Type::INT2).is_err());
    }

    #[test]
    fn test_null_param_is_universal() {
        let mut buf = BytesMut::new();
        let wrote = NullParam.to_sql(&Type::TEXT, &mut buf);

        assert!(matches!(wrote, Ok(IsNull::Yes)));
        assert!(buf.is_empty());
        assert!(NullParam::accepts(&Type::INT8));
        assert!(NullParam::accepts(&Type::BYTEA));
    }

    #[test]
    fn test_refused_port_yields_connect_error() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let err = PgConnector::new()
            .connect(&descriptor("127.0.0.1", port), &options(true))
            .unwrap_err();

        assert!(matches!(err, Error::Connect { .. }));
    }
}
