use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use rideflow_shared::{Coordinate, PackageType};
use rideflow_trip::{ApplyOutcome, Trip};

use crate::error::AppError;
use crate::hub::{ConnectionHub, Role};
use crate::state::AppState;

/// Outbound messages queue here between the hub and the socket task; the
/// hub evicts the connection if the queue stays full past its write
/// timeout.
const OUTBOUND_BUFFER: usize = 16;

#[derive(Debug, Deserialize)]
pub struct DriverWsParams {
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "packageSlug")]
    pub package_slug: String,
}

#[derive(Debug, Deserialize)]
pub struct RiderWsParams {
    #[serde(rename = "userID")]
    pub user_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum DriverClientMessage {
    StartTrip {
        #[serde(rename = "tripID")]
        trip_id: Uuid,
    },
    UpdateLocation {
        location: Coordinate,
    },
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RiderClientMessage {
    CancelTrip {
        #[serde(rename = "tripID")]
        trip_id: Uuid,
    },
}

/// GET /ws/drivers?userID=..&packageSlug=..
/// Connecting registers the driver as available; disconnecting removes
/// them and requeues any trip mid-assignment to them.
pub async fn drivers(
    ws: WebSocketUpgrade,
    Query(params): Query<DriverWsParams>,
    State(state): State<AppState>,
) -> Result<Response, AppError> {
    let package = PackageType::from_slug(&params.package_slug).ok_or_else(|| {
        AppError::Validation(format!("unknown package slug: {}", params.package_slug))
    })?;
    Ok(ws.on_upgrade(move |socket| driver_socket(socket, state, params.user_id, package)))
}

/// GET /ws/riders?userID=..
pub async fn riders(
    ws: WebSocketUpgrade,
    Query(params): Query<RiderWsParams>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| rider_socket(socket, state, params.user_id))
}

async fn driver_socket(
    socket: WebSocket,
    state: AppState,
    driver_id: String,
    package: PackageType,
) {
    info!(driver_id, slug = package.slug(), "driver connected");

    // Location is a placeholder until the first update arrives over the
    // socket.
    let driver = state
        .pool
        .register(&driver_id, package, Coordinate::new(0.0, 0.0));

    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    let connection = state.hub.register(Role::Driver, &driver_id, tx.clone());

    let ack = json!({ "type": "driver_registered", "driver": driver }).to_string();
    if tx.send(ack).await.is_err() {
        debug!(driver_id, "driver socket closed before registration ack");
    }
    // The hub must hold the only live sender from here on: evicting the
    // connection drops it, closes the channel, and ends the socket task.
    drop(tx);

    let (sender, mut receiver) = socket.split();
    let send_task = tokio::spawn(forward_outbound(sender, rx));

    let recv_state = state.clone();
    let recv_id = driver_id.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => handle_driver_message(&recv_state, &recv_id, &text).await,
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    wait_and_abort(send_task, recv_task).await;

    state.hub.unregister(Role::Driver, &driver_id, connection);
    if let Err(e) = state.assignment.handle_driver_unregistered(&driver_id).await {
        error!(error = %e, driver_id, "failed to requeue match after disconnect");
    }
    info!(driver_id, "driver disconnected");
}

async fn rider_socket(socket: WebSocket, state: AppState, rider_id: String) {
    info!(rider_id, "rider connected");

    let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
    let connection = state.hub.register(Role::Rider, &rider_id, tx);

    let (sender, mut receiver) = socket.split();
    let send_task = tokio::spawn(forward_outbound(sender, rx));

    let recv_state = state.clone();
    let recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => handle_rider_message(&recv_state, &text).await,
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    wait_and_abort(send_task, recv_task).await;

    state.hub.unregister(Role::Rider, &rider_id, connection);
    info!(rider_id, "rider disconnected");
}

async fn forward_outbound(mut sender: SplitSink<WebSocket, Message>, mut rx: mpsc::Receiver<String>) {
    while let Some(msg) = rx.recv().await {
        if sender.send(Message::Text(msg.into())).await.is_err() {
            break;
        }
    }
    debug!("outbound socket task terminated");
}

async fn wait_and_abort(mut send_task: JoinHandle<()>, mut recv_task: JoinHandle<()>) {
    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

async fn handle_driver_message(state: &AppState, driver_id: &str, text: &str) {
    let msg = match serde_json::from_str::<DriverClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, driver_id, "unparseable driver message");
            return;
        }
    };

    match msg {
        DriverClientMessage::UpdateLocation { location } => {
            if !state.pool.update_location(driver_id, location) {
                warn!(driver_id, "location update for unregistered driver");
            }
        }
        DriverClientMessage::StartTrip { trip_id } => {
            match state.trips.start_ride(trip_id, driver_id).await {
                Ok(ApplyOutcome::Applied(trip)) => {
                    broadcast_trip_update(&state.hub, &trip).await;
                }
                Ok(outcome) => {
                    debug!(%trip_id, driver_id, ?outcome, "start ride not applied");
                }
                Err(e) => {
                    error!(error = %e, %trip_id, driver_id, "failed to start ride");
                }
            }
        }
    }
}

async fn handle_rider_message(state: &AppState, text: &str) {
    let msg = match serde_json::from_str::<RiderClientMessage>(text) {
        Ok(msg) => msg,
        Err(e) => {
            warn!(error = %e, "unparseable rider message");
            return;
        }
    };

    match msg {
        RiderClientMessage::CancelTrip { trip_id } => {
            match state.trips.cancel_trip(trip_id, "cancelled by rider").await {
                Ok(ApplyOutcome::Applied(trip)) => {
                    if let Some(driver_id) = &trip.driver_id {
                        state.assignment.release_driver(driver_id, trip.id);
                    }
                    state.assignment.forget_trip(trip.id);
                    broadcast_trip_update(&state.hub, &trip).await;
                }
                Ok(outcome) => {
                    debug!(%trip_id, ?outcome, "cancellation not applied");
                }
                Err(e) => {
                    error!(error = %e, %trip_id, "failed to cancel trip");
                }
            }
        }
    }
}

/// Pushes the trip's new state to its rider and, when one is attached,
/// its driver. Best-effort; clients that miss it re-fetch over HTTP.
pub async fn broadcast_trip_update(hub: &ConnectionHub, trip: &Trip) {
    let message = json!({ "type": "trip_update", "trip": trip }).to_string();
    hub.push(Role::Rider, &trip.rider_id, &message).await;
    if let Some(driver_id) = &trip.driver_id {
        hub.push(Role::Driver, driver_id, &message).await;
    }
}
