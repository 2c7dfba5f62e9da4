use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::garments::GarmentCategory;

/// Multipart body of a try-on request (documentation only; the handler reads fields as they
/// stream in).
#[derive(Debug, ToSchema)]
#[allow(dead_code)]
pub struct TryOnForm {
    /// Photo of the person, any format the image decoder understands
    #[schema(value_type = String, format = Binary)]
    pub person_image: Vec<u8>,
    /// Photo of the garment. Transparent PNGs give the best local overlay.
    #[schema(value_type = String, format = Binary)]
    pub cloth_image: Vec<u8>,
    /// Catalogue garment type, e.g. `T-Shirt`. Used for the eligibility check.
    pub garment_type: Option<String>,
    /// Catalogue garment category. Used for the eligibility check.
    pub garment_category: Option<GarmentCategory>,
    /// Free-text description forwarded to the hosted model
    pub garment_description: Option<String>,
}

/// Try-on result
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TryOnResponse {
    /// Where the generated image can be fetched. Usually a path under the public prefix, or the
    /// configured placeholder URL when local composition failed.
    pub output_image_url: String,
}
