pub mod handlers;
pub mod middleware;
pub mod routes;
pub mod stream;
pub mod streams;

pub use routes::create_router;
