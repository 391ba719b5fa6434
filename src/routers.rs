//! Root router: the websocket connect endpoint (transport seam, spec §1)
//! plus the blob side-channel's reference HTTP routes (spec §6), with the
//! usual salvo OpenAPI surface mounted alongside.
//!
//! Grounded on the teacher's `routers.rs`: same `append`/`unshift` shape for
//! mounting sub-routers and doc UIs, minus every auth/game/profile/friends
//! sub-router and the JWT/session security schemes that went with them -
//! this core has no notion of an authenticated HTTP caller.

use crate::prelude::*;

const OPENAPI_JSON: &str = "/api-doc/openapi.json";

pub fn root() -> Router {
    let api_routes = Router::with_path("api")
        .hoop(crate::utils::logger::Logger)
        .hoop(Timeout::new(std::time::Duration::from_secs(30)))
        .push(crate::blob::http::router());
    let doc = openapi_doc(&api_routes);

    let ws_route =
        Router::with_path("connect").goal(crate::transport::ws::connect);

    Router::new()
        .push(ws_route)
        .push(api_routes)
        .unshift(doc.into_router(OPENAPI_JSON))
        .unshift(Scalar::new(OPENAPI_JSON).into_router("scalar"))
        .unshift(SwaggerUi::new(OPENAPI_JSON).into_router("swagger-ui"))
        .unshift(RapiDoc::new(OPENAPI_JSON).into_router("rapidoc"))
        .unshift(ReDoc::new(OPENAPI_JSON).into_router("redoc"))
}

fn openapi_doc(to_document: &Router) -> OpenApi {
    OpenApi::new("rpchub", "0.1.0").merge_router(to_document)
}
