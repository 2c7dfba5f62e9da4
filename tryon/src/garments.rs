//! Garment eligibility rules.
//!
//! The storefront only offers AI try-on for upper-body garments. These rules mirror the catalogue
//! classification so the service rejects restricted or unsupported items even when a client skips
//! the UI checks. Requests that carry no garment metadata are allowed through.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use utoipa::ToSchema;

const UPPER_GARMENTS: &[&str] = &[
    "T-Shirt",
    "Polo Shirt",
    "Casual Shirt",
    "Formal Shirt",
    "Hoodie",
    "Sweatshirt",
    "Jacket",
    "Blazer",
    "Coat",
    "Kurta",
    "Panjabi",
    "Waistcoat",
    "Top",
    "Blouse",
    "Shirt",
    "Tunic",
    "Kurti",
    "Sweater",
    "Cardigan",
    "Shrug",
    "Crop Top",
];

const LOWER_GARMENTS: &[&str] = &[
    "Jeans",
    "Chinos",
    "Trousers",
    "Formal Pants",
    "Shorts",
    "Joggers",
    "Pajama",
    "Pants",
    "Leggings",
    "Palazzos",
    "Skirt",
    "Sharara Bottom",
    "Gharara Bottom",
];

const FULL_BODY_GARMENTS: &[&str] = &[
    "Saree",
    "Lehenga",
    "Gown",
    "Maxi Dress",
    "Anarkali",
    "Abaya",
    "Burqa",
    "Salwar Kameez",
    "Sherwani",
    "Thobe",
    "Jubba",
    "Suit",
    "Panjabi + Pajama",
];

const ACCESSORIES: &[&str] = &["Glasses", "Sunglasses", "Mask", "Earrings", "Watch", "Bracelet", "Ring", "Bangle"];

const INNERWEAR: &[&str] = &["Vest", "Briefs", "Boxers", "Bra", "Panty", "Lingerie"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, ToSchema)]
pub enum GarmentCategory {
    Upper,
    Lower,
    FullBody,
    Accessory,
    Innerwear,
    Footwear,
}

impl FromStr for GarmentCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "Upper" => Ok(Self::Upper),
            "Lower" => Ok(Self::Lower),
            "FullBody" => Ok(Self::FullBody),
            "Accessory" => Ok(Self::Accessory),
            "Innerwear" => Ok(Self::Innerwear),
            "Footwear" => Ok(Self::Footwear),
            other => Err(format!("Unknown garment category: {other}")),
        }
    }
}

impl fmt::Display for GarmentCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Upper => "Upper",
            Self::Lower => "Lower",
            Self::FullBody => "FullBody",
            Self::Accessory => "Accessory",
            Self::Innerwear => "Innerwear",
            Self::Footwear => "Footwear",
        };
        f.write_str(name)
    }
}

/// How a garment can be previewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryOnMode {
    /// Photo try-on through the diffusion model (the only mode this service serves)
    Diffusion,
    /// Live camera preview, handled client-side
    Ar,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TryOnStatus {
    pub mode: TryOnMode,
    pub message: &'static str,
    pub reason: Option<&'static str>,
}

/// Exact, case-sensitive lookup against the catalogue's type names.
fn contains(list: &[&str], garment_type: Option<&str>) -> bool {
    garment_type.is_some_and(|t| list.contains(&t))
}

/// Classify a garment by category and/or type.
///
/// Checks run innerwear first so a restricted item can never be unlocked by a permissive category.
pub fn try_on_status(category: Option<GarmentCategory>, garment_type: Option<&str>) -> TryOnStatus {
    if category == Some(GarmentCategory::Innerwear) || contains(INNERWEAR, garment_type) {
        return TryOnStatus {
            mode: TryOnMode::None,
            message: "Virtual Try-On is strictly disabled for this category.",
            reason: Some("Restricted category"),
        };
    }

    if category == Some(GarmentCategory::Lower) || contains(LOWER_GARMENTS, garment_type) {
        return TryOnStatus {
            mode: TryOnMode::None,
            message: "AI Try-On is available for upper garments only.",
            reason: Some("Partial support"),
        };
    }

    if category == Some(GarmentCategory::Upper) || contains(UPPER_GARMENTS, garment_type) {
        return TryOnStatus {
            mode: TryOnMode::Diffusion,
            message: "Upload a front-facing photo for best results.",
            reason: None,
        };
    }

    if category == Some(GarmentCategory::Accessory) || contains(ACCESSORIES, garment_type) {
        return TryOnStatus {
            mode: TryOnMode::Ar,
            message: "Use your camera to see how this looks on you.",
            reason: None,
        };
    }

    if category == Some(GarmentCategory::FullBody) || contains(FULL_BODY_GARMENTS, garment_type) {
        return TryOnStatus {
            mode: TryOnMode::None,
            message: "AI Try-On not supported for this item.",
            reason: Some("Complexity"),
        };
    }

    TryOnStatus {
        mode: TryOnMode::None,
        message: "Virtual Try-On is not available for this item.",
        reason: None,
    }
}

/// Decide whether a photo try-on request may proceed.
///
/// Returns the user-facing rejection message when it may not.
pub fn check_photo_try_on(category: Option<GarmentCategory>, garment_type: Option<&str>) -> Result<(), &'static str> {
    if category.is_none() && garment_type.is_none() {
        return Ok(());
    }

    let status = try_on_status(category, garment_type);
    match status.mode {
        TryOnMode::Diffusion => Ok(()),
        TryOnMode::Ar => Err("This item supports live AR preview only."),
        TryOnMode::None => Err(status.message),
    }
}
