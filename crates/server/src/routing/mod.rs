mod auth;
pub mod room;

use salvo::prelude::*;
use serde::Serialize;

use crate::state::AppState;
use crate::{AppError, JsonResult, hoops, json_ok, socket};

pub fn router(state: AppState) -> Router {
    Router::new()
        .hoop(salvo::affix_state::inject(state))
        .push(Router::with_path("healthz").get(healthz))
        .push(
            Router::with_path("auth")
                .push(Router::with_path("register").post(auth::register))
                .push(Router::with_path("login").post(auth::login)),
        )
        .push(
            Router::with_path("rooms")
                .hoop(hoops::auth_by_token)
                .push(Router::with_path("public").get(room::public_rooms))
                .push(Router::with_path("my-rooms").get(room::my_rooms))
                .push(Router::with_path("create").post(room::create))
                .push(Router::with_path("join").post(room::join))
                .push(Router::with_path("{room_id}/leave").post(room::leave)),
        )
        .push(
            Router::with_path("ws")
                .hoop(hoops::auth_by_token)
                .goal(socket::connect),
        )
}

#[derive(Debug, Serialize)]
struct HealthzResBody {
    status: &'static str,
    db: bool,
    kv: bool,
}

/// Liveness: reports whether the durable store and the fast store answer.
#[handler]
async fn healthz(depot: &mut Depot, res: &mut Response) -> JsonResult<HealthzResBody> {
    let state = depot
        .obtain::<AppState>()
        .map_err(|_| AppError::internal("app state missing from depot"))?;

    let db = palaver_data::connect().is_ok();
    let kv = state.kv.ping().await.is_ok();
    if !(db && kv) {
        res.status_code(StatusCode::SERVICE_UNAVAILABLE);
    }
    json_ok(HealthzResBody {
        status: if db && kv { "ok" } else { "degraded" },
        db,
        kv,
    })
}
