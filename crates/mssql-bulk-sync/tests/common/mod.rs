//! In-memory stand-in for a SQL Server session.
//!
//! `FakeServer` interprets the statements the pipeline generates (temp-table
//! DDL, MERGE with OUTPUT INTO, DELETE WHERE EXISTS, output SELECTs and the
//! single-row helpers) against tables held in memory. Identity and computed
//! columns are generated the way the server would: identities count up from
//! 1, computed datetimes advance one second per written row.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use mssql_bulk_sync::{
    BulkTransferProvider, ColumnDescriptor, Entity, Provider, Record, Result, RowBatch,
    ScalarType, SqlValue, StagingPipeline, StaticCatalog, SyncConnection, SyncError,
    TableSchema,
};

pub type Row = BTreeMap<String, SqlValue>;

struct FakeTable {
    schema: TableSchema,
    rows: Vec<Row>,
    next_identity: i64,
    /// (column, referenced key column) pairs within the same table.
    self_refs: Vec<(String, String)>,
}

#[derive(Clone)]
struct TempTable {
    columns: Vec<String>,
    rows: Vec<Vec<SqlValue>>,
}

#[derive(Default)]
struct ServerState {
    tables: HashMap<String, FakeTable>,
    temp: HashMap<String, TempTable>,
    statements: Vec<String>,
    bulk_loads: Vec<(String, Vec<Vec<SqlValue>>)>,
    fail_on: Option<String>,
    clock: i64,
}

/// Shared handle to one fake database.
#[derive(Clone, Default)]
pub struct FakeServer {
    state: Arc<Mutex<ServerState>>,
}

impl FakeServer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap()
    }

    pub fn create_table(&self, schema: TableSchema) {
        self.lock().tables.insert(
            schema.full_name(),
            FakeTable {
                schema,
                rows: Vec::new(),
                next_identity: 1,
                self_refs: Vec::new(),
            },
        );
    }

    /// Add a self-referencing foreign key, checked at the end of each statement.
    pub fn add_self_reference(&self, table: &str, column: &str, references: &str) {
        let mut state = self.lock();
        let table = state.tables.get_mut(table).unwrap();
        table
            .self_refs
            .push((column.to_string(), references.to_string()));
    }

    /// Insert a row directly, generating identity and computed values.
    pub fn seed(&self, table: &str, values: &[(&str, SqlValue)]) -> Row {
        let mut state = self.lock();
        let mut clock = state.clock;
        let table = state.tables.get_mut(table).unwrap();
        let staged: Row = values
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let row = insert_row(table, &staged, &mut clock);
        state.clock = clock;
        row
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.lock().tables[table].rows.clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.lock().statements.clone()
    }

    pub fn statements_starting_with(&self, prefix: &str) -> Vec<String> {
        self.statements()
            .into_iter()
            .filter(|s| s.starts_with(prefix))
            .collect()
    }

    pub fn temp_tables(&self) -> Vec<String> {
        self.lock().temp.keys().cloned().collect()
    }

    pub fn bulk_loads(&self) -> Vec<(String, Vec<Vec<SqlValue>>)> {
        self.lock().bulk_loads.clone()
    }

    /// Fail every statement containing `fragment`.
    pub fn fail_on(&self, fragment: &str) {
        self.lock().fail_on = Some(fragment.to_string());
    }

    pub fn connection(&self) -> FakeConnection {
        FakeConnection {
            server: self.clone(),
            provider: Provider::SqlServer,
            open: false,
            opens: 0,
            closes: 0,
        }
    }

    pub fn open_connection(&self) -> FakeConnection {
        let mut conn = self.connection();
        conn.open = true;
        conn
    }

    pub fn bulk(&self) -> Arc<FakeBulk> {
        Arc::new(FakeBulk {
            server: self.clone(),
        })
    }
}

/// Session over a [`FakeServer`].
pub struct FakeConnection {
    server: FakeServer,
    pub provider: Provider,
    open: bool,
    pub opens: usize,
    pub closes: usize,
}

impl FakeConnection {
    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = provider;
        self
    }

    fn ensure_open(&self, sql: &str) -> Result<()> {
        if self.open {
            Ok(())
        } else {
            Err(fail(sql, "connection is closed"))
        }
    }
}

#[async_trait]
impl SyncConnection for FakeConnection {
    fn provider(&self) -> Provider {
        self.provider.clone()
    }

    fn is_open(&self) -> bool {
        self.open
    }

    async fn open(&mut self) -> Result<()> {
        self.open = true;
        self.opens += 1;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.open = false;
        self.closes += 1;
        // Temp tables live as long as the session.
        self.server.lock().temp.clear();
        Ok(())
    }

    async fn execute(&mut self, sql: &str) -> Result<()> {
        self.ensure_open(sql)?;
        self.server.lock().execute(sql)
    }

    async fn execute_params(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        self.ensure_open(sql)?;
        self.server.lock().execute_params(sql, params)
    }

    async fn query(
        &mut self,
        sql: &str,
        _params: &[SqlValue],
        shape: &[ScalarType],
    ) -> Result<Vec<Vec<SqlValue>>> {
        self.ensure_open(sql)?;
        let rows = self.server.lock().query(sql)?;
        if rows.iter().any(|r| r.len() != shape.len()) {
            return Err(fail(sql, "result shape mismatch"));
        }
        Ok(rows)
    }
}

/// Bulk loader appending straight into the fake's temp tables.
pub struct FakeBulk {
    server: FakeServer,
}

#[async_trait]
impl BulkTransferProvider for FakeBulk {
    async fn write_rows(
        &self,
        conn: &mut dyn SyncConnection,
        destination: &str,
        batch: &RowBatch,
    ) -> Result<u64> {
        if !conn.is_open() {
            return Err(SyncError::transfer(destination, "connection is closed"));
        }
        let mut state = self.server.lock();
        let names: Vec<String> = batch.columns.iter().map(|c| c.name.clone()).collect();
        let table = state
            .temp
            .get_mut(destination)
            .ok_or_else(|| SyncError::transfer(destination, "no such temp table"))?;
        if table.columns != names {
            return Err(SyncError::transfer(destination, "column list mismatch"));
        }
        table.rows.extend(batch.rows.iter().cloned());
        state
            .bulk_loads
            .push((destination.to_string(), batch.rows.clone()));
        Ok(batch.rows.len() as u64)
    }
}

impl ServerState {
    fn record(&mut self, sql: &str) -> Result<()> {
        self.statements.push(sql.to_string());
        match &self.fail_on {
            Some(fragment) if sql.contains(fragment.as_str()) => {
                Err(fail(sql, "injected failure"))
            }
            _ => Ok(()),
        }
    }

    fn execute(&mut self, sql: &str) -> Result<()> {
        self.record(sql)?;
        if sql.starts_with("CREATE TABLE ") {
            let names = bracketed(sql);
            if self.temp.contains_key(&names[0]) {
                return Err(fail(sql, "There is already an object with that name"));
            }
            self.temp.insert(
                names[0].clone(),
                TempTable {
                    columns: names[1..].to_vec(),
                    rows: Vec::new(),
                },
            );
            Ok(())
        } else if sql.starts_with("DROP TABLE ") {
            let names = bracketed(sql);
            self.temp
                .remove(&names[0])
                .map(|_| ())
                .ok_or_else(|| fail(sql, "Cannot drop the table, it does not exist"))
        } else if sql.starts_with("MERGE INTO ") {
            self.merge(sql)
        } else if sql.starts_with("DELETE FROM ") && sql.contains("WHERE EXISTS") {
            self.delete_existing(sql)
        } else {
            Err(fail(sql, "statement not understood"))
        }
    }

    fn execute_params(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        self.record(sql)?;
        if sql.starts_with("DELETE FROM ") {
            let names = bracketed(sql);
            let table = self.table_mut(sql, &names[0], &names[1])?;
            let before = table.rows.len();
            table
                .rows
                .retain(|row| !same_value(row.get(&names[2]), params.first()));
            Ok((before - table.rows.len()) as u64)
        } else if sql.starts_with("MERGE INTO ") {
            let start = sql.find("USING (SELECT ").unwrap() + "USING (SELECT ".len();
            let end = sql.find(") src ON").unwrap();
            let staged: Row = sql[start..end]
                .split(", ")
                .map(|item| {
                    let index: usize = item[2..item.find(' ').unwrap()].parse().unwrap();
                    (bracketed(item)[0].clone(), params[index - 1].clone())
                })
                .collect();
            let names = bracketed(&sql[..start]);
            let matched = sql.contains("WHEN MATCHED");
            let mut clock = self.clock;
            let table = self.table_mut(sql, &names[0], &names[1])?;
            let affected = apply_merge_row(table, &staged, matched, &mut clock).is_some();
            self.clock = clock;
            Ok(affected as u64)
        } else if sql.starts_with("INSERT INTO ") {
            let names = bracketed(sql);
            let table = self
                .temp
                .get_mut(&names[0])
                .ok_or_else(|| fail(sql, "no such temp table"))?;
            let width = names.len() - 1;
            for row in params.chunks(width) {
                table.rows.push(row.to_vec());
            }
            Ok((params.len() / width) as u64)
        } else {
            Err(fail(sql, "statement not understood"))
        }
    }

    fn query(&mut self, sql: &str) -> Result<Vec<Vec<SqlValue>>> {
        self.record(sql)?;
        if sql == "SELECT 1" {
            return Ok(vec![vec![SqlValue::I32(1)]]);
        }
        let names = bracketed(sql);
        let (table_name, columns) = names.split_last().unwrap();
        let table = self
            .temp
            .get(table_name)
            .ok_or_else(|| fail(sql, "no such temp table"))?;
        let positions: Vec<usize> = columns
            .iter()
            .map(|c| table.columns.iter().position(|t| t == c).unwrap())
            .collect();
        Ok(table
            .rows
            .iter()
            .map(|row| positions.iter().map(|&i| row[i].clone()).collect())
            .collect())
    }

    fn table_mut(&mut self, sql: &str, schema: &str, name: &str) -> Result<&mut FakeTable> {
        self.tables
            .get_mut(&format!("{}.{}", schema, name))
            .ok_or_else(|| fail(sql, "Invalid object name"))
    }

    fn merge(&mut self, sql: &str) -> Result<()> {
        let head = &sql[..sql.find(" src ON").unwrap()];
        let names = bracketed(head);
        let staging = self
            .temp
            .get(&names[2])
            .cloned()
            .ok_or_else(|| fail(sql, "no such staging table"))?;
        let matched = sql.contains("WHEN MATCHED");

        // (output expressions, output table, output column list)
        let output = sql.find(" OUTPUT ").map(|i| {
            let rest = &sql[i + " OUTPUT ".len()..];
            let into = rest.find(" INTO ").unwrap();
            let items: Vec<String> = rest[..into].split(", ").map(String::from).collect();
            let target = bracketed(&rest[into..]);
            (items, target[0].clone(), target[1..].to_vec())
        });
        if let Some((_, out_table, _)) = &output {
            if !self.temp.contains_key(out_table) {
                return Err(fail(sql, "no such output table"));
            }
        }

        let mut clock = self.clock;
        let table = self.table_mut(sql, &names[0], &names[1])?;
        let snapshot = table.rows.clone();
        let mut outputs = Vec::new();
        for values in &staging.rows {
            let staged: Row = staging
                .columns
                .iter()
                .cloned()
                .zip(values.iter().cloned())
                .collect();
            let Some(result) = apply_merge_row(table, &staged, matched, &mut clock) else {
                continue;
            };
            if let Some((items, _, _)) = &output {
                let row: Vec<SqlValue> = items
                    .iter()
                    .map(|item| {
                        let column = &bracketed(item)[0];
                        let source = if item.starts_with("src.") {
                            &staged
                        } else {
                            &result
                        };
                        source.get(column).cloned().unwrap_or(SqlValue::Null)
                    })
                    .collect();
                outputs.push(row);
            }
        }

        if let Err(message) = check_self_refs(table) {
            table.rows = snapshot;
            return Err(fail(sql, &message));
        }
        self.clock = clock;

        if let Some((_, out_table, out_columns)) = output {
            let target = self.temp.get_mut(&out_table).unwrap();
            assert_eq!(target.columns, out_columns, "OUTPUT column list");
            target.rows.extend(outputs);
        }
        Ok(())
    }

    fn delete_existing(&mut self, sql: &str) -> Result<()> {
        let names = bracketed(sql);
        let staging = self
            .temp
            .get(&names[2])
            .cloned()
            .ok_or_else(|| fail(sql, "no such staging table"))?;
        let table = self.table_mut(sql, &names[0], &names[1])?;
        table.rows.retain(|row| {
            !staging.rows.iter().any(|keys| {
                staging
                    .columns
                    .iter()
                    .zip(keys)
                    .all(|(c, v)| same_value(row.get(c), Some(v)))
            })
        });
        Ok(())
    }
}

/// Apply one source row; returns the resulting destination row if it was
/// inserted or updated.
fn apply_merge_row(table: &mut FakeTable, staged: &Row, matched: bool, clock: &mut i64) -> Option<Row> {
    let keys: Vec<String> = table.schema.primary_key.clone();
    let existing = table
        .rows
        .iter()
        .position(|row| keys.iter().all(|k| same_value(row.get(k), staged.get(k))));

    match existing {
        Some(index) if matched => {
            let columns = table.schema.columns.clone();
            let row = &mut table.rows[index];
            for column in &columns {
                if column.is_generated() {
                    if !column.is_identity() {
                        *clock += 1;
                        row.insert(column.name.clone(), computed_value(column, *clock));
                    }
                } else if !keys.contains(&column.name) {
                    let value = staged.get(&column.name).cloned().unwrap_or(SqlValue::Null);
                    row.insert(column.name.clone(), value);
                }
            }
            Some(row.clone())
        }
        Some(_) => None,
        None => Some(insert_row(table, staged, clock)),
    }
}

fn insert_row(table: &mut FakeTable, staged: &Row, clock: &mut i64) -> Row {
    let mut row = Row::new();
    for column in &table.schema.columns {
        let value = if column.is_identity() {
            let id = table.next_identity;
            table.next_identity += 1;
            match column.scalar_type {
                ScalarType::BigInt => SqlValue::I64(id),
                ScalarType::SmallInt => SqlValue::I16(id as i16),
                _ => SqlValue::I32(id as i32),
            }
        } else if column.is_generated() {
            *clock += 1;
            computed_value(column, *clock)
        } else {
            staged.get(&column.name).cloned().unwrap_or(SqlValue::Null)
        };
        row.insert(column.name.clone(), value);
    }
    table.rows.push(row.clone());
    row
}

fn computed_value(column: &ColumnDescriptor, tick: i64) -> SqlValue {
    match column.scalar_type {
        ScalarType::DateTime => SqlValue::DateTime(base_time() + Duration::seconds(tick)),
        ScalarType::Text => SqlValue::Text(format!("v{}", tick)),
        _ => SqlValue::I64(tick),
    }
}

fn check_self_refs(table: &FakeTable) -> std::result::Result<(), String> {
    for (column, references) in &table.self_refs {
        for row in &table.rows {
            let value = match row.get(column) {
                Some(v) if !v.is_null() => v,
                _ => continue,
            };
            let found = table
                .rows
                .iter()
                .any(|other| same_value(other.get(references), Some(value)));
            if !found {
                return Err(format!(
                    "The MERGE statement conflicted with the SAME TABLE REFERENCE constraint on column '{}'",
                    column
                ));
            }
        }
    }
    Ok(())
}

pub fn base_time() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn same_value(a: Option<&SqlValue>, b: Option<&SqlValue>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => match (a.as_i64(), b.as_i64()) {
            (Some(x), Some(y)) => x == y,
            _ => !a.is_null() && a == b,
        },
        _ => false,
    }
}

fn fail(sql: &str, message: &str) -> SyncError {
    SyncError::Statement {
        statement: sql.to_string(),
        message: message.to_string(),
    }
}

/// Every `[...]` identifier in order, with `]]` unescaped.
fn bracketed(sql: &str) -> Vec<String> {
    let chars: Vec<char> = sql.chars().collect();
    let mut names = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '[' {
            let mut name = String::new();
            i += 1;
            while i < chars.len() {
                if chars[i] == ']' {
                    if chars.get(i + 1) == Some(&']') {
                        name.push(']');
                        i += 2;
                        continue;
                    }
                    break;
                }
                name.push(chars[i]);
                i += 1;
            }
            names.push(name);
        }
        i += 1;
    }
    names
}

/// Typed record over `dbo.Employees`: identity key, self reference and two
/// computed timestamps.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Employee {
    pub id: i32,
    pub name: String,
    pub manager_id: Option<i32>,
    pub created_date: Option<NaiveDateTime>,
    pub updated_date: Option<NaiveDateTime>,
}

impl Employee {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }
}

impl Record for Employee {
    fn value(&self, column: &str) -> Option<SqlValue> {
        match column {
            "Id" => Some(self.id.into()),
            "Name" => Some(self.name.as_str().into()),
            "ManagerId" => Some(self.manager_id.into()),
            "CreatedDate" => Some(self.created_date.into()),
            "UpdatedDate" => Some(self.updated_date.into()),
            _ => None,
        }
    }

    fn set_value(&mut self, column: &str, value: SqlValue) -> Result<()> {
        match (column, value) {
            ("Id", SqlValue::I32(v)) => self.id = v,
            ("Name", SqlValue::Text(v)) => self.name = v,
            ("ManagerId", SqlValue::I32(v)) => self.manager_id = Some(v),
            ("ManagerId", SqlValue::Null) => self.manager_id = None,
            ("CreatedDate", SqlValue::DateTime(v)) => self.created_date = Some(v),
            ("CreatedDate", SqlValue::Null) => self.created_date = None,
            ("UpdatedDate", SqlValue::DateTime(v)) => self.updated_date = Some(v),
            ("UpdatedDate", SqlValue::Null) => self.updated_date = None,
            (column, value) => {
                return Err(SyncError::Record(format!(
                    "Employee.{} cannot hold {}",
                    column,
                    value.type_name()
                )))
            }
        }
        Ok(())
    }
}

impl Entity for Employee {
    fn entity_name() -> &'static str {
        "Employee"
    }

    fn table_schema() -> TableSchema {
        TableSchema::new("dbo", "Employees")
            .with_column(ColumnDescriptor::new("Id", ScalarType::Int).identity())
            .with_column(ColumnDescriptor::new("Name", ScalarType::Text).not_null())
            .with_column(ColumnDescriptor::new("ManagerId", ScalarType::Int))
            .with_column(ColumnDescriptor::new("CreatedDate", ScalarType::DateTime).computed())
            .with_column(ColumnDescriptor::new("UpdatedDate", ScalarType::DateTime).computed())
            .with_primary_key(&["Id"])
    }
}

/// `dbo.EmpNoId`: explicit keys supplied by the caller, self reference.
pub fn emp_no_id_schema() -> TableSchema {
    TableSchema::new("dbo", "EmpNoId")
        .with_column(ColumnDescriptor::new("Id", ScalarType::Int).not_null())
        .with_column(ColumnDescriptor::new("Name", ScalarType::Text))
        .with_column(ColumnDescriptor::new("ManagerId", ScalarType::Int))
        .with_primary_key(&["Id"])
}

/// A server with both tables created, and a pipeline over it.
pub fn setup() -> (FakeServer, StagingPipeline) {
    let server = FakeServer::new();
    server.create_table(Employee::table_schema());
    server.add_self_reference("dbo.Employees", "ManagerId", "Id");
    server.create_table(emp_no_id_schema());
    server.add_self_reference("dbo.EmpNoId", "ManagerId", "Id");

    let mut catalog = StaticCatalog::new();
    catalog.register_entity::<Employee>().unwrap();
    catalog.register("EmpNoId", emp_no_id_schema()).unwrap();
    let pipeline = StagingPipeline::new(Arc::new(catalog), server.bulk());
    (server, pipeline)
}
