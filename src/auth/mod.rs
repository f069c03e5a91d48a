mod claims;
pub mod jwt;
pub mod password;
pub mod services;

pub use claims::Claims;
