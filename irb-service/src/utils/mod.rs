pub mod csv;
pub mod password;
pub mod validation;

pub use password::{dummy_hash, hash_password, verify_password, Password, PasswordHashString};
pub use validation::ValidatedJson;
