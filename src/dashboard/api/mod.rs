pub mod errors;
pub mod handlers;
pub mod routes;

pub use errors::ApiError;
pub use routes::configure;
