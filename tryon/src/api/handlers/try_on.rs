use crate::{
    AppState,
    api::models::try_on::{TryOnForm, TryOnResponse},
    errors::{Error, Result},
    garments::{self, GarmentCategory},
    service::{ImageUpload, TryOnRequest},
};
use axum::{
    Json,
    extract::{
        Multipart, State,
        multipart::{Field, MultipartError},
    },
    http::StatusCode,
};
use tracing::{debug, instrument};

fn multipart_error(e: MultipartError) -> Error {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        Error::PayloadTooLarge {
            message: format!("Upload exceeds the maximum request size: {}", e.body_text()),
        }
    } else {
        Error::BadRequest {
            message: format!("Failed to parse multipart data: {}", e.body_text()),
        }
    }
}

async fn read_image(field: Field<'_>, name: &str) -> Result<ImageUpload> {
    let file_name = field.file_name().map(str::to_string);
    let bytes = field.bytes().await.map_err(multipart_error)?;
    if bytes.is_empty() {
        return Err(Error::BadRequest {
            message: format!("Field `{name}` is empty"),
        });
    }
    Ok(ImageUpload { file_name, bytes })
}

async fn read_text(field: Field<'_>) -> Result<Option<String>> {
    let text = field.text().await.map_err(multipart_error)?;
    let text = text.trim();
    Ok((!text.is_empty()).then(|| text.to_string()))
}

#[utoipa::path(
    post,
    path = "/api/try-on",
    tag = "try-on",
    summary = "Generate a try-on image",
    description = "Upload a person photo and a garment photo. The hosted try-on model is tried first; if it is unavailable the garment is overlaid locally. Either way the response points at the generated image.",
    request_body(content = TryOnForm, content_type = "multipart/form-data"),
    responses(
        (status = 200, description = "Try-on image generated", body = TryOnResponse),
        (status = 400, description = "Missing image, malformed upload or garment not eligible for photo try-on"),
        (status = 413, description = "Payload too large"),
        (status = 500, description = "Local composition failed and no placeholder is configured")
    )
)]
#[instrument(skip_all)]
pub async fn try_on(State(state): State<AppState>, mut multipart: Multipart) -> Result<Json<TryOnResponse>> {
    let mut person = None;
    let mut garment = None;
    let mut garment_type = None;
    let mut garment_category = None;
    let mut garment_description = None;

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().unwrap_or("").to_string();

        match field_name.as_str() {
            "person_image" => person = Some(read_image(field, "person_image").await?),
            "cloth_image" => garment = Some(read_image(field, "cloth_image").await?),
            "garment_type" => garment_type = read_text(field).await?,
            "garment_category" => {
                garment_category = read_text(field)
                    .await?
                    .map(|c| c.parse::<GarmentCategory>())
                    .transpose()
                    .map_err(|message| Error::BadRequest { message })?;
            }
            "garment_description" => garment_description = read_text(field).await?,
            other => debug!(field = other, "Ignoring unknown multipart field"),
        }
    }

    let person = person.ok_or_else(|| Error::BadRequest {
        message: "Missing required field `person_image`".to_string(),
    })?;
    let garment = garment.ok_or_else(|| Error::BadRequest {
        message: "Missing required field `cloth_image`".to_string(),
    })?;

    garments::check_photo_try_on(garment_category, garment_type.as_deref()).map_err(|message| Error::BadRequest {
        message: message.to_string(),
    })?;

    let result = state
        .service
        .try_on(TryOnRequest {
            person,
            garment,
            garment_description,
        })
        .await?;

    Ok(Json(TryOnResponse {
        output_image_url: result.output_image_url,
    }))
}
