//! Chat endpoints: message processing, status, reset, and session listing.

use axum::Json;
use axum::extract::{Query, State};
use chrono::Utc;
use serde::Deserialize;
use serde_json::{Value, json};

use lendcore_core::agent::master::{MasterResponse, ResponseKind};
use lendcore_types::conversation::ConversationStage;

use crate::http::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatMessageRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default, alias = "sessionId")]
    pub session_id: Option<String>,
    #[serde(default, alias = "customerId")]
    pub customer_id: Option<String>,
    #[serde(default)]
    pub form_data: Option<Value>,
}

/// POST /api/chat/message
///
/// Starts a session when none is given, records submitted form data, and
/// runs the turn through the master agent. The response envelope mirrors
/// what the chat client renders: a message, its type, and the session
/// context.
pub async fn process_message(
    State(state): State<AppState>,
    Json(request): Json<ChatMessageRequest>,
) -> Result<Json<Value>, ApiError> {
    let mut message = request.message.trim().to_string();
    if message.is_empty() && request.form_data.is_none() {
        return Err(ApiError::bad_request(
            "EMPTY_MESSAGE",
            "Message or form data is required",
        ));
    }

    let (session_id, conversation_started, greeting) = match &request.session_id {
        Some(session_id) => {
            if state.sessions().get_session_context(session_id).await.is_none() {
                return Err(ApiError::SessionNotFound);
            }
            (session_id.clone(), false, None)
        }
        None => {
            tracing::info!(customer_id = ?request.customer_id, "starting new conversation");
            let report = state
                .master
                .initiate_conversation(request.customer_id.as_deref(), Some(&message))
                .await?;
            (report.session_id, true, Some(report.greeting))
        }
    };

    if let Some(form_data) = &request.form_data {
        state
            .sessions()
            .add_session_data(&session_id, "form_data", form_data.clone())
            .await?;
        let name = form_data
            .get("full_name")
            .and_then(Value::as_str)
            .unwrap_or("Customer");
        message = format!("Form submitted with customer details: {name}");
    }

    let result = state
        .master
        .process_user_message(&session_id, &message)
        .await?;

    // For a bare greeting on a new conversation, lead with the greeting
    // rather than the generic continue-conversation response.
    let agent_message = match greeting {
        Some(greeting) if matches!(message.to_lowercase().as_str(), "hello" | "hi" | "hey") => {
            greeting
        }
        _ => result.response.clone(),
    };

    let context = state.sessions().get_session_context(&session_id).await;
    let (current_agent, stage, customer_id) = match &context {
        Some(ctx) => (
            ctx.current_agent.to_string(),
            ctx.conversation_stage,
            ctx.customer_id.clone(),
        ),
        None => (
            "master".to_string(),
            ConversationStage::Initiation,
            request.customer_id.clone(),
        ),
    };

    Ok(Json(json!({
        "success": true,
        "message": agent_message,
        "messageType": result.message_type,
        "agentType": current_agent,
        "context": {
            "sessionId": session_id,
            "currentAgent": current_agent,
            "conversationStage": stage,
            "customerId": customer_id,
        },
        "metadata": metadata_for(&result, conversation_started),
    })))
}

fn metadata_for(result: &MasterResponse, conversation_started: bool) -> Value {
    let mut metadata = json!({
        "conversation_started": conversation_started,
        "action_taken": result.action_taken,
        "upload_required": result.upload_required,
        "tracking_info": result.tracking,
        "timestamp": Utc::now().to_rfc3339(),
    });
    let map = metadata.as_object_mut().expect("metadata is an object");

    match result.message_type {
        ResponseKind::Form => {
            if let Some(form) = &result.form {
                map.insert("form_data".to_string(), form.clone());
            }
        }
        ResponseKind::LoanOptions => {
            if let Some(options) = &result.loan_options {
                map.insert("loan_options".to_string(), options.clone());
            }
            if let Some(profile) = &result.customer_profile {
                map.insert("customer_profile".to_string(), profile.clone());
            }
        }
        ResponseKind::DownloadLink => {
            if let Some(link) = &result.download_link {
                map.insert("download_url".to_string(), json!(link));
            }
            map.insert(
                "filename".to_string(),
                json!(result.filename.as_deref().unwrap_or("Sanction Letter.pdf")),
            );
        }
        ResponseKind::Text => {}
    }
    metadata
}

#[derive(Debug, Deserialize)]
pub struct StatusQuery {
    pub session_id: String,
}

/// GET /api/chat/status?session_id=
pub async fn conversation_status(
    State(state): State<AppState>,
    Query(query): Query<StatusQuery>,
) -> Result<Json<Value>, ApiError> {
    let context = state
        .sessions()
        .get_session_context(&query.session_id)
        .await
        .ok_or(ApiError::SessionNotFound)?;

    let recent_errors: Vec<Value> = context
        .errors
        .iter()
        .rev()
        .take(5)
        .map(|e| {
            json!({
                "message": e.message,
                "severity": e.severity,
                "timestamp": e.timestamp.to_rfc3339(),
            })
        })
        .collect();

    Ok(Json(json!({
        "success": true,
        "session_id": context.session_id,
        "customer_id": context.customer_id,
        "conversation_stage": context.conversation_stage,
        "current_agent": context.current_agent,
        "session_created": context.created_at.to_rfc3339(),
        "last_updated": context.updated_at.to_rfc3339(),
        "pending_tasks": context.pending_tasks,
        "completed_tasks": context.completed_tasks,
        "collected_data_keys": context.collected_data.keys().collect::<Vec<_>>(),
        "error_count": context.errors.len(),
        "recent_errors": recent_errors,
        "agent_health": state.master.worker_agent_health(),
        "worker_state": state.sessions().worker_health(&query.session_id).await,
        "api_health": state.gateway.api_health(),
        "session_active": true,
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub session_id: String,
    #[serde(default = "default_reset_type")]
    pub reset_type: String,
}

fn default_reset_type() -> String {
    "soft".to_string()
}

/// POST /api/chat/reset
///
/// Soft reset rewinds the stage and clears pending tasks and errors but
/// keeps collected data. Hard reset ends the session and starts a fresh
/// one for the same customer.
pub async fn reset_conversation(
    State(state): State<AppState>,
    Json(request): Json<ResetRequest>,
) -> Result<Json<Value>, ApiError> {
    let context = state
        .sessions()
        .get_session_context(&request.session_id)
        .await
        .ok_or(ApiError::SessionNotFound)?;

    match request.reset_type.as_str() {
        "hard" => {
            tracing::info!(session_id = %request.session_id, "performing hard reset");
            state.sessions().end_session(&request.session_id).await?;
            let fresh = state
                .sessions()
                .start_session(context.customer_id.clone())
                .await?;
            Ok(Json(json!({
                "success": true,
                "reset_type": "hard",
                "old_session_id": request.session_id,
                "new_session_id": fresh.session_id,
                "conversation_stage": fresh.conversation_stage,
                "message": "Conversation has been completely reset. Starting fresh.",
                "timestamp": Utc::now().to_rfc3339(),
            })))
        }
        "soft" => {
            tracing::info!(session_id = %request.session_id, "performing soft reset");
            let mut context = context;
            context.conversation_stage = ConversationStage::Initiation;
            context.pending_tasks.clear();
            context.errors.clear();
            context.touch();
            state.sessions().update_context(&context).await?;
            Ok(Json(json!({
                "success": true,
                "reset_type": "soft",
                "session_id": request.session_id,
                "conversation_stage": ConversationStage::Initiation,
                "message": "Conversation has been reset to the beginning. Your information is preserved.",
                "timestamp": Utc::now().to_rfc3339(),
            })))
        }
        other => Err(ApiError::bad_request(
            "INVALID_RESET_TYPE",
            format!("Reset type must be \"soft\" or \"hard\", got \"{other}\""),
        )),
    }
}

#[derive(Debug, Deserialize)]
pub struct SessionsQuery {
    pub customer_id: Option<String>,
    #[serde(default = "default_session_limit")]
    pub limit: usize,
}

fn default_session_limit() -> usize {
    50
}

/// GET /api/chat/sessions (debugging/monitoring)
pub async fn list_sessions(
    State(state): State<AppState>,
    Query(query): Query<SessionsQuery>,
) -> Json<Value> {
    let sessions = state
        .sessions()
        .list_active_sessions(query.customer_id.as_deref(), query.limit);

    let rows: Vec<Value> = sessions
        .iter()
        .map(|ctx| {
            json!({
                "session_id": ctx.session_id,
                "customer_id": ctx.customer_id,
                "conversation_stage": ctx.conversation_stage,
                "current_agent": ctx.current_agent,
                "created_at": ctx.created_at.to_rfc3339(),
                "last_updated": ctx.updated_at.to_rfc3339(),
                "pending_tasks_count": ctx.pending_tasks.len(),
                "completed_tasks_count": ctx.completed_tasks.len(),
                "error_count": ctx.errors.len(),
            })
        })
        .collect();

    Json(json!({
        "success": true,
        "count": rows.len(),
        "sessions": rows,
        "statistics": state.sessions().statistics(),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}
