pub mod tokens;

pub use tokens::{constant_time_eq, random_token};
