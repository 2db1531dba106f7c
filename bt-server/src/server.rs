use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Error, Result};
use axum::extract::{Json, Path, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;
use bt_common::{Engine, ExportedDaywise, ExportedState, ExportedUser, Mode, OrderRequest, Quantity, Side, UserRegistration};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::task;
use tokio::task::JoinError;

use crate::registry::SimulationRegistry;

/// The only simulation this process hosts today. The registry is keyed
/// by simulation id regardless, so a future driver that wants several
/// independent tapes running side by side only needs to call
/// `registry.insert` again under a different key.
const DEFAULT_SIMULATION: &str = "default";

pub struct ServerState {
    registry: SimulationRegistry,
}

impl ServerState {
    pub fn new(engine: Engine) -> ServerState {
        let registry = SimulationRegistry::new();
        registry.insert(DEFAULT_SIMULATION, engine);
        ServerState { registry }
    }
}

#[derive(Serialize)]
struct Response<T> {
    result: Option<T>,
    error: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterUserRequest {
    user_id: String,
    #[serde(default)]
    spot: Option<f64>,
    #[serde(default)]
    margin: Option<f64>,
    #[serde(default)]
    futures: Option<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlaceOrderRequest {
    mode: Mode,
    asset: String,
    side: Side,
    leverage: u32,
    qty: Quantity,
    timestamp: DateTime<Utc>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PlaceOrderResponse {
    order_id: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CloseOrderRequest {
    mode: Mode,
    timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
struct StepRequest {}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StepResponse {
    end_of_tape: bool,
    current_timestamp: DateTime<Utc>,
}

pub async fn run(address: SocketAddr, engine: Engine) -> Result<()> {
    tracing::info!(%address, "starting bt-server");
    let state = Arc::new(ServerState::new(engine));
    let app = Router::new()
        .route("/users", post(register_user))
        .route("/users/:id", get(get_user))
        .route("/users/:id/orders", post(place_order))
        .route("/users/:id/orders/:order_id/close", post(close_order))
        .route("/step", post(step))
        .route("/state", get(get_state))
        .route("/state/daywise", get(get_daywise))
        .with_state(state);
    let listener = TcpListener::bind(address).await.with_context(|| "failed to bind address")?;
    axum::serve(listener, app).await.with_context(|| "axum server exited")?;
    Ok(())
}

/// Bridges the synchronous accounting core onto axum's async handlers via
/// `spawn_blocking`: the engine is plain, blocking compute, never an
/// `.await` point, so it must not run on the async executor's own thread.
async fn get_response<A, B>(
    request: A,
    get_data: Box<dyn FnOnce(A) -> Result<B> + Send>,
) -> impl IntoResponse
where
    A: Send + 'static,
    B: Send + Serialize + 'static,
{
    let get_response = |data: B| Response {
        result: Some(data),
        error: None,
    };
    let get_error = |error: Error| Response {
        result: None,
        error: Some(error.to_string()),
    };
    let response = task::spawn_blocking(move || get_data(request))
        .await
        .map(|task_result| task_result.map_or_else(get_error, get_response))
        .unwrap_or_else(|error: JoinError| get_error(anyhow::anyhow!(error)));
    Json(response)
}

async fn register_user(
    State(state): State<Arc<ServerState>>,
    Json(request): Json<RegisterUserRequest>,
) -> impl IntoResponse {
    get_response(
        request,
        Box::new(move |request: RegisterUserRequest| {
            state.registry.with_engine(DEFAULT_SIMULATION, |engine| {
                let registration = UserRegistration {
                    spot: request.spot,
                    margin: request.margin,
                    futures: request.futures,
                };
                engine.register_user(request.user_id, registration);
                Ok(())
            })
        }),
    )
    .await
}

async fn place_order(
    State(state): State<Arc<ServerState>>,
    Path(user_id): Path<String>,
    Json(request): Json<PlaceOrderRequest>,
) -> impl IntoResponse {
    get_response(
        request,
        Box::new(move |request: PlaceOrderRequest| {
            state.registry.with_engine(DEFAULT_SIMULATION, |engine| {
                let order_request = OrderRequest::new(request.asset, request.side, request.leverage, request.qty);
                let order_id = engine.place_order(&user_id, request.mode, order_request, request.timestamp)?;
                Ok(PlaceOrderResponse { order_id })
            })
        }),
    )
    .await
}

async fn close_order(
    State(state): State<Arc<ServerState>>,
    Path((user_id, order_id)): Path<(String, u64)>,
    Json(request): Json<CloseOrderRequest>,
) -> impl IntoResponse {
    get_response(
        request,
        Box::new(move |request: CloseOrderRequest| {
            state.registry.with_engine(DEFAULT_SIMULATION, |engine| {
                engine.close_order(&user_id, request.mode, order_id, request.timestamp)?;
                Ok(())
            })
        }),
    )
    .await
}

async fn step(State(state): State<Arc<ServerState>>, Json(request): Json<StepRequest>) -> impl IntoResponse {
    get_response(
        request,
        Box::new(move |_request: StepRequest| {
            state.registry.with_engine(DEFAULT_SIMULATION, |engine| {
                engine.step_simulation();
                let end_of_tape = engine.update_current_timestamp()?;
                Ok(StepResponse {
                    end_of_tape,
                    current_timestamp: engine.current_timestamp(),
                })
            })
        }),
    )
    .await
}

async fn get_user(State(state): State<Arc<ServerState>>, Path(user_id): Path<String>) -> impl IntoResponse {
    get_response(
        (),
        Box::new(move |_: ()| -> Result<ExportedUser> {
            state
                .registry
                .with_engine(DEFAULT_SIMULATION, |engine| Ok(engine.export_one_user(&user_id)?))
        }),
    )
    .await
}

async fn get_state(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    get_response(
        (),
        Box::new(move |_: ()| -> Result<ExportedState> {
            state.registry.with_engine(DEFAULT_SIMULATION, |engine| Ok(engine.export_state()))
        }),
    )
    .await
}

async fn get_daywise(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    get_response(
        (),
        Box::new(move |_: ()| -> Result<ExportedDaywise> {
            state.registry.with_engine(DEFAULT_SIMULATION, |engine| Ok(engine.export_daywise()))
        }),
    )
    .await
}
