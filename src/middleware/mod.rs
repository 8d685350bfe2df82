/// Middleware module
///
/// Session resolution and request logging.

mod request_logger;
mod session_middleware;

pub use request_logger::RequestLogger;
pub use session_middleware::{client_context, SessionMiddleware};
