mod kobo;

pub mod op;

pub use kobo::{Kobo, KoboConversionError};
