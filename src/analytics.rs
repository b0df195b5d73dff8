//! In-memory analytical engine.
//!
//! Flattened fragment rows are loaded into a DataFusion session as a single
//! relation named `mhtml_data` (`file_path`, `file_size`, `modified_time`,
//! `json_data`), and arbitrary SQL runs against it. The engine holds no
//! durable state; a new one is built for every invocation.

use async_trait::async_trait;
use datafusion::arrow::array::{ArrayRef, Float64Array, Int64Array, RecordBatch, StringArray};
use datafusion::arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use datafusion::arrow::json::LineDelimitedWriter;
use datafusion::prelude::SessionContext;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::AnalyticsError;
use crate::models::{FragmentRow, ResultRow};
use crate::query::{QueryBackend, QueryOutcome};

/// Name of the relation queries run against.
pub const TABLE_NAME: &str = "mhtml_data";

pub struct AnalyticsEngine {
    ctx: SessionContext,
    row_count: usize,
}

impl AnalyticsEngine {
    /// Build a session with `rows` registered as [`TABLE_NAME`].
    pub fn build(rows: &[FragmentRow]) -> Result<Self, AnalyticsError> {
        let batch = to_record_batch(rows)?;
        let ctx = SessionContext::new();
        ctx.register_batch(TABLE_NAME, batch)?;
        debug!(rows = rows.len(), "analytical relation registered");
        Ok(Self {
            ctx,
            row_count: rows.len(),
        })
    }

    pub fn row_count(&self) -> usize {
        self.row_count
    }

    /// Execute `sql` and return its rows with columns in result-schema order.
    pub async fn run(&self, sql: &str) -> Result<Vec<ResultRow>, AnalyticsError> {
        let df = self.ctx.sql(sql).await?;
        let batches = df.collect().await?;
        batches_to_rows(&batches)
    }
}

#[async_trait]
impl QueryBackend for AnalyticsEngine {
    fn name(&self) -> &'static str {
        "analytics"
    }

    async fn execute(&self, query: &str) -> QueryOutcome {
        match self.run(query).await {
            Ok(rows) => QueryOutcome::rows(rows),
            Err(e) => {
                warn!(error = %e, "analytical query failed");
                QueryOutcome::failed(e.to_string())
            }
        }
    }
}

fn schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("file_path", DataType::Utf8, false),
        Field::new("file_size", DataType::Int64, false),
        Field::new("modified_time", DataType::Float64, false),
        Field::new("json_data", DataType::Utf8, false),
    ]))
}

fn to_record_batch(rows: &[FragmentRow]) -> Result<RecordBatch, AnalyticsError> {
    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|r| r.file_path.as_str()),
        )),
        Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r.file_size))),
        Arc::new(Float64Array::from_iter_values(
            rows.iter().map(|r| r.modified_time),
        )),
        Arc::new(StringArray::from_iter_values(
            rows.iter().map(|r| r.json_data.as_str()),
        )),
    ];
    Ok(RecordBatch::try_new(schema(), columns)?)
}

/// Convert result batches to rows through Arrow's JSON writer.
///
/// The writer leaves out null fields, so every row is rebuilt from the
/// batch schema with missing columns set to null.
fn batches_to_rows(batches: &[RecordBatch]) -> Result<Vec<ResultRow>, AnalyticsError> {
    let Some(first) = batches.first() else {
        return Ok(Vec::new());
    };
    let columns: Vec<String> = first
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();

    let mut buf = Vec::new();
    {
        let mut writer = LineDelimitedWriter::new(&mut buf);
        for batch in batches {
            writer.write(batch)?;
        }
        writer.finish()?;
    }

    let output = String::from_utf8_lossy(&buf);
    let mut rows = Vec::new();
    for line in output.lines().filter(|line| !line.is_empty()) {
        let mut parsed: ResultRow = serde_json::from_str(line)?;
        let row = columns
            .iter()
            .map(|name| (name.clone(), parsed.remove(name).unwrap_or(Value::Null)))
            .collect();
        rows.push(row);
    }

    Ok(rows)
}
