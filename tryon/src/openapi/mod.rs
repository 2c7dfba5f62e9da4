//! OpenAPI documentation for the try-on API.
//!
//! Served as JSON at `/api-docs/openapi.json` and rendered with Scalar at `/docs`.

use utoipa::OpenApi;

use crate::api;
use crate::garments::GarmentCategory;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Virtual Try-On API",
        description = "Upload a person photo and a garment photo, get back a try-on image."
    ),
    paths(
        api::handlers::status::root,
        api::handlers::status::healthz,
        api::handlers::try_on::try_on,
    ),
    components(schemas(
        api::models::status::StatusMessage,
        api::models::try_on::TryOnForm,
        api::models::try_on::TryOnResponse,
        GarmentCategory,
    )),
    tags(
        (name = "try-on", description = "Virtual try-on generation"),
        (name = "status", description = "Service status"),
    )
)]
pub struct ApiDoc;
