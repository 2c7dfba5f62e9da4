//! API request and response models.

pub mod status;
pub mod try_on;
