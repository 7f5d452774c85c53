//! Local HTTP API
//!
//! Transport-free router: the board's web server parses the request line and
//! headers, then hands an [`ApiRequest`] to [`handle`] while holding the
//! device state. Handlers only touch in-memory state and the queue, so a
//! response never waits on the network.

use alloc::string::String;
use alloc::vec::Vec;

use hal_abstractions::Method;
use rand_core::RngCore;
use serde::{Deserialize, Serialize};

use crate::auth::Denial;
use crate::groceries::GroceryError;
use crate::queue::Operation;
use crate::reminders::ReminderError;
use crate::state::DeviceState;

pub const API_PREFIX: &str = "/api";

pub const CONTENT_TYPE_JSON: &str = "application/json";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApiRequest<'a> {
    pub method: Method,
    /// Request target, query string allowed
    pub path: &'a str,
    /// Peer address as text
    pub client: &'a str,
    pub api_key: Option<&'a str>,
    pub body: &'a str,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    fn json<V: Serialize + ?Sized>(status: u16, value: &V) -> Self {
        match serde_json::to_string(value) {
            Ok(body) => Self { status, body },
            Err(_) => {
                error!("Failed to serialize response");
                Self {
                    status: 500,
                    body: String::from(r#"{"success":false,"message":"Internal error"}"#),
                }
            }
        }
    }

    /// `{"success":false,"message":..}` with `status`
    pub fn failure(status: u16, message: &str) -> Self {
        Self::json(status, &Outcome::failure(message))
    }

    pub fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            400 => "Bad Request",
            401 => "Unauthorized",
            404 => "Not Found",
            405 => "Method Not Allowed",
            413 => "Payload Too Large",
            429 => "Too Many Requests",
            503 => "Service Unavailable",
            507 => "Insufficient Storage",
            _ => "Internal Server Error",
        }
    }
}

/// Clock readings for one request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Now {
    pub ms: u64,
    /// Wall time, `None` until the clock has been synchronized
    pub unix_secs: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct Outcome<'a> {
    success: bool,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    queue_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    queued: Option<bool>,
}

impl<'a> Outcome<'a> {
    fn success(message: &'a str) -> Self {
        Self {
            success: true,
            message,
            id: None,
            queue_size: None,
            queued: None,
        }
    }

    fn failure(message: &'a str) -> Self {
        Self {
            success: false,
            ..Self::success(message)
        }
    }
}

#[derive(Serialize)]
struct DenialBody<'a> {
    error: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ReminderView<'a> {
    id: &'a str,
    message: &'a str,
    scheduled_time: u64,
    printed: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewReminder {
    message: String,
    scheduled_time: u64,
}

#[derive(Deserialize)]
struct NewGrocery {
    item: String,
}

/// Matched route
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route<'a> {
    Reminders,
    Reminder(&'a str),
    Groceries,
    Grocery(&'a str),
    GroceriesPrint,
    Queue,
    Security,
    Health,
}

impl<'a> Route<'a> {
    fn parse(path: &'a str) -> Option<Self> {
        let path = path.split('?').next().unwrap_or(path);
        let path = path.strip_prefix(API_PREFIX)?;
        let path = path.strip_suffix('/').unwrap_or(path);
        match path {
            "/reminders" => Some(Self::Reminders),
            "/groceries" => Some(Self::Groceries),
            "/groceries/print" => Some(Self::GroceriesPrint),
            "/queue" => Some(Self::Queue),
            "/security" => Some(Self::Security),
            "/health" => Some(Self::Health),
            _ => {
                if let Some(id) = path.strip_prefix("/reminders/") {
                    Some(Self::Reminder(id))
                } else if let Some(index) = path.strip_prefix("/groceries/") {
                    Some(Self::Grocery(index))
                } else {
                    None
                }
            }
        }
    }
}

/// Route one request. Everything under `/api` passes the authorization gate
/// first.
pub fn handle<R: RngCore>(
    state: &mut DeviceState,
    request: &ApiRequest<'_>,
    now: Now,
    rng: &mut R,
) -> ApiResponse {
    let Some(route) = Route::parse(request.path) else {
        return not_found(request);
    };

    if let Err(denial) = state.gate.check(request.client, request.api_key, now.ms) {
        return denied(denial);
    }

    debug!("{} {}", request.method, request.path);

    match (request.method, route) {
        (Method::Get, Route::Reminders) => list_reminders(state, now),
        (Method::Post, Route::Reminders) => add_reminder(state, request.body, now, rng),
        (Method::Delete, Route::Reminder(id)) => delete_reminder(state, id, now),
        (Method::Get, Route::Groceries) => ApiResponse::json(200, state.groceries.items()),
        (Method::Post, Route::Groceries) => add_grocery(state, request.body, now),
        (Method::Delete, Route::Groceries) => clear_groceries(state, now),
        (Method::Delete, Route::Grocery(index)) => delete_grocery(state, index, now),
        (Method::Post, Route::GroceriesPrint) => print_groceries(state, now),
        (Method::Get, Route::Queue) => ApiResponse::json(200, &state.queue.status(now.ms)),
        (Method::Get, Route::Security) => ApiResponse::json(200, &state.gate.report()),
        (Method::Get, Route::Health) => ApiResponse::json(200, &state.health.report()),
        _ => ApiResponse::failure(405, "Method Not Allowed"),
    }
}

fn not_found(request: &ApiRequest<'_>) -> ApiResponse {
    debug!("No route for {} {}", request.method, request.path);
    ApiResponse::failure(404, "Not Found")
}

fn denied(denial: Denial) -> ApiResponse {
    let error = match denial {
        Denial::RateLimited => "Rate limit exceeded",
        Denial::NotAllowListed | Denial::InvalidKey => "Unauthorized",
    };
    ApiResponse::json(denial.status_code(), &DenialBody { error })
}

fn time_unsynced() -> ApiResponse {
    ApiResponse::failure(503, "Time not synchronized")
}

fn reminders_unloaded() -> ApiResponse {
    ApiResponse::failure(503, "Reminders not loaded yet")
}

fn list_reminders(state: &DeviceState, now: Now) -> ApiResponse {
    let Some(unix) = now.unix_secs else {
        return time_unsynced();
    };
    let views: Vec<ReminderView<'_>> = state
        .reminders
        .upcoming(unix)
        .map(|r| ReminderView {
            id: r.id.as_str(),
            message: r.message.as_str(),
            scheduled_time: r.scheduled_at,
            printed: r.printed,
        })
        .collect();
    ApiResponse::json(200, &views)
}

fn add_reminder<R: RngCore>(
    state: &mut DeviceState,
    body: &str,
    now: Now,
    rng: &mut R,
) -> ApiResponse {
    let Ok(new) = serde_json::from_str::<NewReminder>(body) else {
        return ApiResponse::failure(400, "Invalid request");
    };
    let Some(unix) = now.unix_secs else {
        return time_unsynced();
    };
    if !state.reminders.is_loaded() {
        return reminders_unloaded();
    }

    match state
        .reminders
        .add(&new.message, new.scheduled_time, unix, rng)
    {
        Ok(id) => {
            let queued = state.reminders.save(&mut state.queue, now.ms);
            ApiResponse::json(
                200,
                &Outcome {
                    id: Some(id.as_str()),
                    queue_size: Some(state.queue.len()),
                    queued: Some(queued),
                    ..Outcome::success("Reminder added")
                },
            )
        }
        Err(ReminderError::InPast) => {
            ApiResponse::failure(400, "Scheduled time must be in the future")
        }
        Err(ReminderError::CapacityExceeded) => ApiResponse::failure(507, "Too many reminders"),
    }
}

fn delete_reminder(state: &mut DeviceState, id: &str, now: Now) -> ApiResponse {
    if !state.reminders.is_loaded() {
        return reminders_unloaded();
    }
    if !state.reminders.delete(id) {
        return ApiResponse::failure(404, "Reminder not found");
    }
    let queued = state.reminders.save(&mut state.queue, now.ms);
    ApiResponse::json(
        200,
        &Outcome {
            queued: Some(queued),
            ..Outcome::success("Reminder deleted")
        },
    )
}

fn add_grocery(state: &mut DeviceState, body: &str, now: Now) -> ApiResponse {
    let Ok(new) = serde_json::from_str::<NewGrocery>(body) else {
        return ApiResponse::failure(400, "Invalid request");
    };
    match state.groceries.add(&new.item) {
        Ok(_) => {
            let queued = state.groceries.save(&mut state.queue, now.ms);
            ApiResponse::json(
                200,
                &Outcome {
                    queue_size: Some(state.queue.len()),
                    queued: Some(queued),
                    ..Outcome::success("Item added")
                },
            )
        }
        Err(GroceryError::Empty) => ApiResponse::failure(400, "Item cannot be empty"),
        Err(GroceryError::Full) => ApiResponse::failure(507, "Too many items"),
        Err(GroceryError::NotFound) => ApiResponse::failure(404, "Item not found"),
    }
}

fn clear_groceries(state: &mut DeviceState, now: Now) -> ApiResponse {
    state.groceries.clear();
    let queued = state.groceries.save(&mut state.queue, now.ms);
    ApiResponse::json(
        200,
        &Outcome {
            queue_size: Some(state.queue.len()),
            queued: Some(queued),
            ..Outcome::success("Groceries cleared")
        },
    )
}

fn delete_grocery(state: &mut DeviceState, index: &str, now: Now) -> ApiResponse {
    let removed = index
        .parse::<usize>()
        .ok()
        .and_then(|i| state.groceries.remove(i).ok());
    if removed.is_none() {
        return ApiResponse::failure(404, "Item not found");
    }
    let queued = state.groceries.save(&mut state.queue, now.ms);
    ApiResponse::json(
        200,
        &Outcome {
            queued: Some(queued),
            ..Outcome::success("Item deleted")
        },
    )
}

fn print_groceries(state: &mut DeviceState, now: Now) -> ApiResponse {
    if state.groceries.is_empty() {
        return ApiResponse::failure(400, "Grocery list is empty");
    }
    let text = state.groceries.print_text();
    if !state.queue.enqueue(Operation::print(text), now.ms) {
        return ApiResponse::failure(503, "Queue full");
    }
    ApiResponse::json(
        200,
        &Outcome {
            queue_size: Some(state.queue.len()),
            queued: Some(true),
            ..Outcome::success("Printing grocery list")
        },
    )
}
