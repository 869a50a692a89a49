//! Relational connection seam and the SQL Server implementation.
//!
//! The pipeline only talks to a [`SyncConnection`]. Statements that create or
//! read session temp tables go through [`SyncConnection::execute`], which must
//! not wrap the batch in `sp_executesql` (temp tables created there vanish
//! when the inner scope ends).

use async_trait::async_trait;
use std::borrow::Cow;
use std::fmt;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Row, ToSql};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

use crate::config::TargetConfig;
use crate::core::{ScalarType, SqlValue};
use crate::error::{Result, SyncError};

/// TDS client over a tokio TCP stream.
pub type TdsClient = Client<Compat<TcpStream>>;

/// Kind of store behind a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provider {
    SqlServer,
    Other(String),
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Provider::SqlServer => write!(f, "sqlserver"),
            Provider::Other(name) => write!(f, "{}", name),
        }
    }
}

/// A single relational connection driven sequentially.
#[async_trait]
pub trait SyncConnection: Send {
    /// Which store this connection talks to.
    fn provider(&self) -> Provider;

    fn is_open(&self) -> bool;

    async fn open(&mut self) -> Result<()>;

    async fn close(&mut self) -> Result<()>;

    /// Run an unparameterized batch in the session scope.
    async fn execute(&mut self, sql: &str) -> Result<()>;

    /// Run a parameterized statement (`@P1..@Pn`), returning rows affected.
    async fn execute_params(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64>;

    /// Run a query and read each row as values of the given column types.
    async fn query(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        shape: &[ScalarType],
    ) -> Result<Vec<Vec<SqlValue>>>;

    /// Underlying TDS client, for bulk loading.
    fn tds_client(&mut self) -> Option<&mut TdsClient> {
        None
    }
}

/// SQL Server connection built from a [`TargetConfig`].
///
/// May be created closed; the pipeline opens it on demand and closes it
/// again afterwards.
pub struct MssqlConnection {
    config: TargetConfig,
    client: Option<TdsClient>,
}

impl MssqlConnection {
    /// Create a closed connection.
    pub fn new(config: TargetConfig) -> Self {
        Self {
            config,
            client: None,
        }
    }

    /// Create and open a connection.
    pub async fn connect(config: TargetConfig) -> Result<Self> {
        let mut conn = Self::new(config);
        conn.open().await?;
        Ok(conn)
    }

    pub fn config(&self) -> &TargetConfig {
        &self.config
    }

    fn build_config(&self) -> Config {
        let mut config = Config::new();
        config.host(&self.config.host);
        config.port(self.config.port);
        config.database(&self.config.database);
        config.authentication(AuthMethod::sql_server(
            &self.config.user,
            &self.config.password,
        ));

        if self.config.encrypt() {
            config.encryption(EncryptionLevel::Required);
        } else {
            config.encryption(EncryptionLevel::NotSupported);
        }
        if self.config.trust_server_cert {
            config.trust_cert();
        }

        config
    }

    fn client(&mut self) -> Result<&mut TdsClient> {
        let target = self.config.display_target();
        self.client
            .as_mut()
            .ok_or_else(|| SyncError::connection("connection is not open", target))
    }

    /// Round-trip a trivial query.
    pub async fn health_check(&mut self) -> Result<()> {
        let rows = self.query("SELECT 1", &[], &[ScalarType::Int]).await?;
        match rows.first().and_then(|r| r.first()) {
            Some(SqlValue::I32(1)) => Ok(()),
            other => Err(SyncError::connection(
                format!("unexpected health check result {:?}", other),
                self.config.display_target(),
            )),
        }
    }
}

#[async_trait]
impl SyncConnection for MssqlConnection {
    fn provider(&self) -> Provider {
        Provider::SqlServer
    }

    fn is_open(&self) -> bool {
        self.client.is_some()
    }

    async fn open(&mut self) -> Result<()> {
        if self.client.is_some() {
            return Ok(());
        }

        let target = self.config.display_target();
        let config = self.build_config();
        let tcp = TcpStream::connect(config.get_addr())
            .await
            .map_err(|e| SyncError::connection(e, format!("connecting to {}", target)))?;
        tcp.set_nodelay(true).ok();

        let client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| SyncError::connection(e, format!("TDS login to {}", target)))?;

        info!("Connected to SQL Server: {}", target);
        self.client = Some(client);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(client) = self.client.take() {
            client.close().await.map_err(|e| {
                SyncError::connection(e, format!("closing {}", self.config.display_target()))
            })?;
            debug!("Closed connection to {}", self.config.display_target());
        }
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> Result<()> {
        let client = self.client()?;
        let stream = client
            .simple_query(sql)
            .await
            .map_err(|e| SyncError::statement(sql, e))?;
        stream
            .into_results()
            .await
            .map_err(|e| SyncError::statement(sql, e))?;
        Ok(())
    }

    async fn execute_params(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let client = self.client()?;
        let boxed: Vec<Box<dyn ToSql>> = params.iter().map(sql_value_to_sql_param).collect();
        let refs: Vec<&dyn ToSql> = boxed.iter().map(|p| p.as_ref()).collect();
        let result = client
            .execute(sql, &refs)
            .await
            .map_err(|e| SyncError::statement(sql, e))?;
        Ok(result.total())
    }

    async fn query(
        &mut self,
        sql: &str,
        params: &[SqlValue],
        shape: &[ScalarType],
    ) -> Result<Vec<Vec<SqlValue>>> {
        let client = self.client()?;
        let rows = if params.is_empty() {
            client
                .simple_query(sql)
                .await
                .map_err(|e| SyncError::statement(sql, e))?
                .into_first_result()
                .await
                .map_err(|e| SyncError::statement(sql, e))?
        } else {
            let boxed: Vec<Box<dyn ToSql>> = params.iter().map(sql_value_to_sql_param).collect();
            let refs: Vec<&dyn ToSql> = boxed.iter().map(|p| p.as_ref()).collect();
            client
                .query(sql, &refs)
                .await
                .map_err(|e| SyncError::statement(sql, e))?
                .into_first_result()
                .await
                .map_err(|e| SyncError::statement(sql, e))?
        };

        rows.iter().map(|row| read_row(sql, row, shape)).collect()
    }

    fn tds_client(&mut self) -> Option<&mut TdsClient> {
        self.client.as_mut()
    }
}

/// Convert SqlValue to a boxed tiberius parameter.
pub(crate) fn sql_value_to_sql_param(value: &SqlValue) -> Box<dyn ToSql> {
    match value {
        SqlValue::Null => Box::new(Option::<String>::None),
        SqlValue::Bool(b) => Box::new(*b),
        SqlValue::I16(i) => Box::new(*i),
        SqlValue::I32(i) => Box::new(*i),
        SqlValue::I64(i) => Box::new(*i),
        SqlValue::Decimal(d) => Box::new(*d),
        SqlValue::Text(s) => Box::new(s.clone()),
        SqlValue::Uuid(u) => Box::new(*u),
        SqlValue::DateTime(dt) => Box::new(*dt),
    }
}

fn read_row(sql: &str, row: &Row, shape: &[ScalarType]) -> Result<Vec<SqlValue>> {
    if row.len() < shape.len() {
        return Err(SyncError::Statement {
            statement: sql.to_string(),
            message: format!("expected {} columns, got {}", shape.len(), row.len()),
        });
    }
    shape
        .iter()
        .enumerate()
        .map(|(i, ty)| read_value(row, i, ty).map_err(|e| SyncError::statement(sql, e)))
        .collect()
}

fn read_value(row: &Row, idx: usize, ty: &ScalarType) -> tiberius::Result<SqlValue> {
    let value = match ty {
        ScalarType::SmallInt => row.try_get::<i16, _>(idx)?.map(SqlValue::I16),
        ScalarType::Int => row.try_get::<i32, _>(idx)?.map(SqlValue::I32),
        ScalarType::BigInt => row.try_get::<i64, _>(idx)?.map(SqlValue::I64),
        ScalarType::Decimal { .. } => row
            .try_get::<rust_decimal::Decimal, _>(idx)?
            .map(SqlValue::Decimal),
        ScalarType::DateTime => row
            .try_get::<chrono::NaiveDateTime, _>(idx)?
            .map(SqlValue::DateTime),
        ScalarType::Text => row
            .try_get::<&str, _>(idx)?
            .map(|s| SqlValue::Text(s.to_string())),
        ScalarType::Bool => row.try_get::<bool, _>(idx)?.map(SqlValue::Bool),
        ScalarType::Guid => row.try_get::<uuid::Uuid, _>(idx)?.map(SqlValue::Uuid),
        ScalarType::Other(name) => {
            return Err(tiberius::error::Error::Conversion(Cow::Owned(format!(
                "cannot read column {} of type {}",
                idx, name
            ))))
        }
    };
    Ok(value.unwrap_or(SqlValue::Null))
}
