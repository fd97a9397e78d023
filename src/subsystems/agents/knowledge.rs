//! Knowledge agent — the user's question/answer records over persistence.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::AgentError;
use crate::services::persistence::Entity;
use crate::subsystems::agents::{Agent, AgentContext, HandleFuture, payload_as, require_text};
use crate::supervisor::message::{AgentResponse, Message};

pub const NAME: &str = "knowledge";
const LABEL: &str = "KnowledgeAgent";

/// Persistence entity holding the records.
pub const ENTITY: &str = "knowledge_records";

const DEFAULT_QUERY_LIMIT: usize = 10;

pub struct KnowledgeAgent;

#[derive(Debug, Deserialize)]
struct Query {
    #[serde(default)]
    query: String,
    #[serde(default)]
    limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct Save {
    #[serde(default)]
    question: String,
    #[serde(default)]
    answer: String,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ById {
    #[serde(default)]
    id: String,
}

#[derive(Debug, Deserialize)]
struct Update {
    #[serde(default)]
    id: String,
    #[serde(default)]
    fields: Map<String, Value>,
}

enum Command {
    Query(Query),
    Save(Save),
    Get(ById),
    Update(Update),
    Delete(ById),
}

impl Command {
    fn parse(message: Message) -> Result<Option<Self>, AgentError> {
        let kind = message.kind.as_str();
        let payload = message.payload;
        Ok(Some(match kind {
            "query_knowledge" => Command::Query(payload_as(kind, payload)?),
            "save_knowledge" => Command::Save(payload_as(kind, payload)?),
            "get_knowledge" => Command::Get(payload_as(kind, payload)?),
            "update_knowledge" => Command::Update(payload_as(kind, payload)?),
            "delete_knowledge" => Command::Delete(payload_as(kind, payload)?),
            _ => return Ok(None),
        }))
    }
}

impl Agent for KnowledgeAgent {
    fn name(&self) -> &str {
        NAME
    }

    fn handle(self: Arc<Self>, message: Message, ctx: AgentContext) -> HandleFuture {
        Box::pin(async move { self.dispatch(message, ctx).await })
    }
}

impl KnowledgeAgent {
    async fn dispatch(&self, message: Message, ctx: AgentContext) -> Result<AgentResponse, AgentError> {
        let kind = message.kind.clone();
        let Some(command) = Command::parse(message)? else {
            return Ok(AgentResponse::unknown_type(LABEL, &kind));
        };
        let owner = match ctx.owner_id() {
            Ok(owner) => owner.to_string(),
            Err(unauthenticated) => return Ok(unauthenticated),
        };
        let store = &ctx.system().persistence;

        match command {
            Command::Query(q) => {
                let limit = q.limit.unwrap_or(DEFAULT_QUERY_LIMIT);
                let mut records = store.list(ENTITY, &owner, Some(&q.query)).await?;
                records.truncate(limit);
                debug!(query = %q.query, hits = records.len(), "knowledge queried");
                Ok(AgentResponse::ok(Value::Array(records.into_iter().map(Value::Object).collect())))
            }
            Command::Save(s) => {
                require_text(&s.question, "question", &kind)?;
                require_text(&s.answer, "answer", &kind)?;
                let mut fields = Entity::new();
                fields.insert("question".into(), json!(s.question));
                fields.insert("answer".into(), json!(s.answer));
                fields.insert("source".into(), json!(s.source.unwrap_or_else(|| "manual".into())));
                fields.insert("tags".into(), json!(s.tags));
                let record = store.create(ENTITY, fields, &owner).await?;
                Ok(AgentResponse::ok(Value::Object(record)))
            }
            Command::Get(g) => {
                require_text(&g.id, "id", &kind)?;
                Ok(match store.get(ENTITY, &g.id, &owner).await? {
                    Some(record) => AgentResponse::ok(Value::Object(record)),
                    None => not_found(&g.id),
                })
            }
            Command::Update(u) => {
                require_text(&u.id, "id", &kind)?;
                if u.fields.is_empty() {
                    return Err(AgentError::invalid(format!("fields is required for {kind}.")));
                }
                Ok(match store.update(ENTITY, &u.id, u.fields, &owner).await? {
                    Some(record) => AgentResponse::ok(Value::Object(record)),
                    None => not_found(&u.id),
                })
            }
            Command::Delete(d) => {
                require_text(&d.id, "id", &kind)?;
                Ok(if store.delete(ENTITY, &d.id, &owner).await? {
                    AgentResponse::ok(json!({ "id": d.id, "deleted": true }))
                } else {
                    not_found(&d.id)
                })
            }
        }
    }
}

fn not_found(id: &str) -> AgentResponse {
    AgentResponse::fail(format!("Knowledge record not found: {id}"))
}
