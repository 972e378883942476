//! HTTP surface used by the website and the back-office widgets.
//!
//! - `POST /chatbot`                              dialogue turn
//! - `GET  /call?from=&to=`                       place an outbound call
//! - `POST /api/rappel-client`, `GET /api/rappels`
//! - `POST /api/rendezvous-technicien`, `GET /api/rendezvous`
//! - `POST /api/messages`, `GET /api/messages`
//! - `POST /api/private-messages`, `GET /api/private-messages/{user1}/{user2}`
//! - `GET  /ws`                                   realtime events
//!
//! Anything else is served from the static asset directory.

use std::path::Path as FsPath;
use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use switchboard_agent::{DialogueAction, DialogueRuntime};
use switchboard_core::realtime::{RealtimeEvent, RealtimeHub};
use switchboard_core::{
    Appointment, ApplicationError, CallDialer, GeneralMessage, InterfaceError, OriginateRequest,
    PrivateMessage, PrivateMessageStore, RecordStore, Reminder, StoreError,
};
use tower_http::services::ServeDir;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ws;

#[derive(Clone)]
pub struct AppState {
    pub hub: RealtimeHub,
    pub dialogue: Arc<DialogueRuntime>,
    pub dialer: Arc<dyn CallDialer>,
    pub reminders: Arc<dyn RecordStore<Reminder>>,
    pub appointments: Arc<dyn RecordStore<Appointment>>,
    pub messages: Arc<dyn RecordStore<GeneralMessage>>,
    pub private_messages: Arc<dyn PrivateMessageStore>,
}

pub fn router(state: AppState, static_dir: &FsPath) -> Router {
    Router::new()
        .route("/chatbot", post(chatbot))
        .route("/call", get(call))
        .route("/api/rappel-client", post(create_reminder))
        .route("/api/rappels", get(list_reminders))
        .route("/api/rendezvous-technicien", post(create_appointment))
        .route("/api/rendezvous", get(list_appointments))
        .route("/api/messages", post(create_message).get(list_messages))
        .route("/api/private-messages", post(create_private_message))
        .route("/api/private-messages/{user1}/{user2}", get(private_conversation))
        .route("/ws", get(ws::ws_handler))
        .fallback_service(ServeDir::new(static_dir))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "sessionId")]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ChatResponse {
    pub reply: String,
    pub action: DialogueAction,
    #[serde(rename = "sessionId")]
    pub session_id: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct CallQuery {
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReminderRequest {
    pub numero: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct AppointmentRequest {
    pub nom: Option<String>,
    pub date: Option<String>,
    pub heure: Option<String>,
    pub numero_mobile: Option<String>,
    pub objet_demande: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct MessageRequest {
    pub sender: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PrivateMessageRequest {
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
    #[serde(rename = "correlationId", skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
}

impl ApiResponse {
    fn ok(message: &str) -> Json<Self> {
        Json(Self { success: true, message: message.to_owned(), correlation_id: None })
    }
}

#[derive(Debug)]
pub enum ApiError {
    Validation(&'static str),
    Interface(InterfaceError),
}

impl ApiError {
    fn store(error: StoreError, operation: &'static str) -> Self {
        let correlation_id = Uuid::new_v4().to_string();
        warn!(
            event_name = "http.store.failed",
            correlation_id = %correlation_id,
            operation,
            error = %error,
            "record store failure"
        );
        Self::Interface(ApplicationError::from(error).into_interface(correlation_id))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Validation(message) => (
                StatusCode::BAD_REQUEST,
                Json(ApiResponse { success: false, message: message.to_owned(), correlation_id: None }),
            )
                .into_response(),
            Self::Interface(error) => {
                let status = match error {
                    InterfaceError::BadRequest { .. } => StatusCode::BAD_REQUEST,
                    InterfaceError::ServiceUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
                };
                let body = ApiResponse {
                    success: false,
                    message: error.user_message().to_owned(),
                    correlation_id: Some(error.correlation_id().to_owned()),
                };
                (status, Json(body)).into_response()
            }
        }
    }
}

fn present(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_owned()).filter(|value| !value.is_empty())
}

// ---------------------------------------------------------------------------
// Dialogue and calls
// ---------------------------------------------------------------------------

async fn chatbot(State(state): State<AppState>, Json(body): Json<ChatRequest>) -> Json<ChatResponse> {
    let turn = state.dialogue.handle_message(body.session_id.as_deref(), &body.message).await;
    Json(ChatResponse { reply: turn.reply, action: turn.action, session_id: turn.session_id })
}

async fn call(State(state): State<AppState>, Query(query): Query<CallQuery>) -> Response {
    let (Some(from), Some(to)) = (present(query.from), present(query.to)) else {
        return (StatusCode::BAD_REQUEST, "❌ Paramètres \"from\" et \"to\" requis.").into_response();
    };
    if let Err(error) = OriginateRequest::new(&from, &to) {
        warn!(event_name = "http.call.invalid", error = %error, "call request refused");
        return (StatusCode::BAD_REQUEST, "❌ Paramètres \"from\" et \"to\" invalides.").into_response();
    }

    let result = state.dialer.originate(&from, &to).await;
    if result.is_accepted() {
        (StatusCode::OK, "✅ Appel lancé avec succès !").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            format!("❌ L'appel n'a pas pu être lancé ({}).", result.describe()),
        )
            .into_response()
    }
}

// ---------------------------------------------------------------------------
// Reminders and appointments
// ---------------------------------------------------------------------------

async fn create_reminder(
    State(state): State<AppState>,
    Json(body): Json<ReminderRequest>,
) -> Result<Json<ApiResponse>, ApiError> {
    let number = present(body.numero).ok_or(ApiError::Validation("Numéro de téléphone requis."))?;
    let reminder = Reminder::new(&number)
        .map_err(|_| ApiError::Validation("Numéro de téléphone invalide (10 chiffres attendus)."))?;

    state.reminders.append(reminder).await.map_err(|error| ApiError::store(error, "reminder.append"))?;
    let all = state.reminders.list_all().await.map_err(|error| ApiError::store(error, "reminder.list"))?;
    info!(event_name = "http.reminder.created", total = all.len(), "callback request recorded");
    state.hub.publish(RealtimeEvent::RemindersUpdated(all));

    Ok(ApiResponse::ok("Demande de rappel enregistrée."))
}

async fn list_reminders(State(state): State<AppState>) -> Result<Json<Vec<Reminder>>, ApiError> {
    let reminders =
        state.reminders.list_all().await.map_err(|error| ApiError::store(error, "reminder.list"))?;
    Ok(Json(reminders))
}

async fn create_appointment(
    State(state): State<AppState>,
    Json(body): Json<AppointmentRequest>,
) -> Result<Json<ApiResponse>, ApiError> {
    let (Some(name), Some(date), Some(time), Some(mobile)) =
        (present(body.nom), present(body.date), present(body.heure), present(body.numero_mobile))
    else {
        return Err(ApiError::Validation("Nom, date, heure et numéro mobile sont requis."));
    };
    let purpose = body.objet_demande.unwrap_or_default();
    let appointment = Appointment::new(&name, &date, &time, &mobile, &purpose).map_err(|_| {
        ApiError::Validation(
            "Date (JJ/MM/AAAA), heure (HH:MM) ou numéro mobile (10 chiffres) invalide.",
        )
    })?;

    state
        .appointments
        .append(appointment)
        .await
        .map_err(|error| ApiError::store(error, "appointment.append"))?;
    let all = state
        .appointments
        .list_all()
        .await
        .map_err(|error| ApiError::store(error, "appointment.list"))?;
    info!(event_name = "http.appointment.created", total = all.len(), "technician appointment recorded");
    state.hub.publish(RealtimeEvent::AppointmentsUpdated(all));

    Ok(ApiResponse::ok("Rendez-vous enregistré."))
}

async fn list_appointments(
    State(state): State<AppState>,
) -> Result<Json<Vec<Appointment>>, ApiError> {
    let appointments = state
        .appointments
        .list_all()
        .await
        .map_err(|error| ApiError::store(error, "appointment.list"))?;
    Ok(Json(appointments))
}

// ---------------------------------------------------------------------------
// Messages
// ---------------------------------------------------------------------------

async fn create_message(
    State(state): State<AppState>,
    Json(body): Json<MessageRequest>,
) -> Result<Json<ApiResponse>, ApiError> {
    let (Some(sender), Some(content)) = (present(body.sender), present(body.content)) else {
        return Err(ApiError::Validation("Expéditeur et contenu du message requis."));
    };
    let message = GeneralMessage::new(&sender, &content)
        .map_err(|_| ApiError::Validation("Expéditeur et contenu du message requis."))?;

    state.messages.append(message).await.map_err(|error| ApiError::store(error, "message.append"))?;
    let all = state.messages.list_all().await.map_err(|error| ApiError::store(error, "message.list"))?;
    state.hub.publish(RealtimeEvent::MessagesUpdated(all));

    Ok(ApiResponse::ok("Message envoyé."))
}

async fn list_messages(State(state): State<AppState>) -> Result<Json<Vec<GeneralMessage>>, ApiError> {
    let messages =
        state.messages.list_all().await.map_err(|error| ApiError::store(error, "message.list"))?;
    Ok(Json(messages))
}

async fn create_private_message(
    State(state): State<AppState>,
    Json(body): Json<PrivateMessageRequest>,
) -> Result<Json<ApiResponse>, ApiError> {
    const REQUIRED: &str = "Expéditeur, destinataire et contenu du message privé requis.";

    let (Some(sender), Some(recipient), Some(content)) =
        (present(body.sender), present(body.recipient), present(body.content))
    else {
        return Err(ApiError::Validation(REQUIRED));
    };
    let message =
        PrivateMessage::new(&sender, &recipient, &content).map_err(|_| ApiError::Validation(REQUIRED))?;

    let stored = state
        .private_messages
        .append(message)
        .await
        .map_err(|error| ApiError::store(error, "private_message.append"))?;
    state.hub.publish(RealtimeEvent::PrivateMessageSent(stored));

    Ok(ApiResponse::ok("Message privé envoyé."))
}

async fn private_conversation(
    State(state): State<AppState>,
    Path((first, second)): Path<(String, String)>,
) -> Result<Json<Vec<PrivateMessage>>, ApiError> {
    let conversation = state
        .private_messages
        .conversation_between(&first, &second)
        .await
        .map_err(|error| ApiError::store(error, "private_message.conversation"))?;
    Ok(Json(conversation))
}
