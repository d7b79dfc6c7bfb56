pub mod facility;
pub mod reconciler;
pub mod viewport;
