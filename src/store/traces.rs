use rusqlite::{OptionalExtension, Row, params};
use serde::Deserialize;
use tasklane_common::models::{TraceStatus, WorkflowTrace, WorkflowType};

use super::{Store, now_ms, parse_column};
use crate::errors::StoreResult;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTrace {
    pub task_id: i64,
    pub trace_id: String,
    pub workflow_type: WorkflowType,
    #[serde(default)]
    pub message_id: Option<i64>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub metadata: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TracePatch {
    pub status: Option<TraceStatus>,
    pub prompt_tokens: Option<i64>,
    pub completion_tokens: Option<i64>,
    pub total_tokens: Option<i64>,
    pub error_type: Option<String>,
    pub error_message: Option<String>,
    pub retry_count: Option<i64>,
    pub model: Option<String>,
}

/// Input and output price per million tokens, in cents.
struct ModelPrice {
    input: i64,
    output: i64,
}

const FALLBACK_PRICE: ModelPrice = ModelPrice { input: 100, output: 100 };

fn model_price(model: &str) -> ModelPrice {
    let (input, output) = match model {
        "moonshotai/kimi-k2" | "moonshotai/kimi-k2-thinking" => (60, 60),
        "anthropic/claude-sonnet-4" | "claude-sonnet-4-20250514" => (300, 1500),
        "anthropic/claude-opus-4" => (1500, 7500),
        "openai/gpt-4o" | "gpt-4o" => (250, 1000),
        "openai/gpt-4o-mini" => (15, 60),
        "deepseek/deepseek-chat-v3-0324" => (14, 28),
        "mistralai/devstral-2505" => (0, 0),
        "z-ai/glm-4.7" => (44, 174),
        "minimax/minimax-m2.1" => (30, 120),
        _ => return FALLBACK_PRICE,
    };
    ModelPrice { input, output }
}

/// Estimated cost of one call in millicents, rounded to the nearest unit.
pub fn estimate_cost_millicents(model: &str, prompt_tokens: i64, completion_tokens: i64) -> i64 {
    let price = model_price(model);
    let input = prompt_tokens as f64 / 1_000_000.0 * price.input as f64 * 100.0;
    let output = completion_tokens as f64 / 1_000_000.0 * price.output as f64 * 100.0;
    (input + output).round() as i64
}

const TRACE_COLUMNS: &str = "id, task_id, trace_id, message_id, workflow_type, status, started_at, \
    completed_at, total_duration_ms, prompt_tokens, completion_tokens, total_tokens, \
    estimated_cost_millicents, model, provider, error_type, error_message, retry_count, metadata, \
    created_at, updated_at";

struct TraceRow {
    trace: WorkflowTrace,
    workflow_type: String,
    status: String,
}

impl TraceRow {
    fn from_row(row: &Row) -> rusqlite::Result<Self> {
        Ok(Self {
            trace: WorkflowTrace {
                id: row.get(0)?,
                task_id: row.get(1)?,
                trace_id: row.get(2)?,
                message_id: row.get(3)?,
                workflow_type: WorkflowType::StreamChat,
                status: TraceStatus::Started,
                started_at: row.get(6)?,
                completed_at: row.get(7)?,
                total_duration_ms: row.get(8)?,
                prompt_tokens: row.get(9)?,
                completion_tokens: row.get(10)?,
                total_tokens: row.get(11)?,
                estimated_cost_millicents: row.get(12)?,
                model: row.get(13)?,
                provider: row.get(14)?,
                error_type: row.get(15)?,
                error_message: row.get(16)?,
                retry_count: row.get(17)?,
                metadata: row.get(18)?,
                created_at: row.get(19)?,
                updated_at: row.get(20)?,
            },
            workflow_type: row.get(4)?,
            status: row.get(5)?,
        })
    }

    fn into_trace(self) -> StoreResult<WorkflowTrace> {
        let mut trace = self.trace;
        trace.workflow_type = parse_column(&self.workflow_type)?;
        trace.status = parse_column(&self.status)?;
        Ok(trace)
    }
}

impl Store {
    pub fn start_trace(&self, new: &NewTrace) -> StoreResult<WorkflowTrace> {
        self.require_task(new.task_id)?;
        let now = now_ms();
        self.conn.execute(
            "INSERT INTO workflow_traces (task_id, trace_id, message_id, workflow_type, status,
                started_at, model, provider, metadata, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?6, ?6)",
            params![
                new.task_id,
                new.trace_id,
                new.message_id,
                new.workflow_type.as_str(),
                TraceStatus::Started.as_str(),
                now,
                new.model,
                new.provider,
                new.metadata,
            ],
        )?;
        self.query_trace(&new.trace_id)?
            .ok_or_else(|| anyhow::anyhow!("trace {} vanished after insert", new.trace_id).into())
    }

    /// Apply a patch to a trace. A terminal status stamps `completed_at`
    /// and the total duration; token counts with a known model refresh the
    /// cost estimate. Unknown trace ids are logged and yield `None`.
    pub fn update_trace(&self, trace_id: &str, patch: &TracePatch) -> StoreResult<Option<WorkflowTrace>> {
        let Some(trace) = self.query_trace(trace_id)? else {
            tracing::warn!(trace_id, "trace not found");
            return Ok(None);
        };
        let now = now_ms();
        let (completed_at, total_duration_ms) = match patch.status {
            Some(status) if status.is_terminal() => (Some(now), Some(now - trace.started_at)),
            _ => (None, None),
        };
        let cost = match (patch.prompt_tokens, patch.completion_tokens) {
            (Some(prompt), Some(completion)) if prompt > 0 && completion > 0 => patch
                .model
                .as_deref()
                .or(trace.model.as_deref())
                .map(|model| estimate_cost_millicents(model, prompt, completion)),
            _ => None,
        };

        self.conn.execute(
            "UPDATE workflow_traces SET
                status = COALESCE(?1, status),
                completed_at = COALESCE(?2, completed_at),
                total_duration_ms = COALESCE(?3, total_duration_ms),
                prompt_tokens = COALESCE(?4, prompt_tokens),
                completion_tokens = COALESCE(?5, completion_tokens),
                total_tokens = COALESCE(?6, total_tokens),
                error_type = COALESCE(?7, error_type),
                error_message = COALESCE(?8, error_message),
                retry_count = COALESCE(?9, retry_count),
                model = COALESCE(?10, model),
                estimated_cost_millicents = COALESCE(?11, estimated_cost_millicents),
                updated_at = ?12
             WHERE id = ?13",
            params![
                patch.status.map(|s| s.as_str()),
                completed_at,
                total_duration_ms,
                patch.prompt_tokens,
                patch.completion_tokens,
                patch.total_tokens,
                patch.error_type,
                patch.error_message,
                patch.retry_count,
                patch.model,
                cost,
                now,
                trace.id,
            ],
        )?;
        self.query_trace(trace_id)
    }

    pub fn trace_by_id(&self, trace_id: &str) -> StoreResult<Option<WorkflowTrace>> {
        self.query_trace(trace_id)
    }

    fn query_trace(&self, trace_id: &str) -> StoreResult<Option<WorkflowTrace>> {
        let row = self
            .conn
            .query_row(
                &format!("SELECT {TRACE_COLUMNS} FROM workflow_traces WHERE trace_id = ?1"),
                params![trace_id],
                TraceRow::from_row,
            )
            .optional()?;
        row.map(TraceRow::into_trace).transpose()
    }

    /// A task's traces, newest first.
    pub fn traces_by_task(&self, task_id: i64) -> StoreResult<Vec<WorkflowTrace>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {TRACE_COLUMNS} FROM workflow_traces WHERE task_id = ?1
             ORDER BY started_at DESC, id DESC"
        ))?;
        let rows = stmt
            .query_map(params![task_id], TraceRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(TraceRow::into_trace).collect()
    }
}
