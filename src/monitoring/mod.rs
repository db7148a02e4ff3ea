/*!
 * Monitoring
 * Structured logging setup and session correlation
 */

mod tracer;

pub use tracer::{generate_session_id, init_tracing, TRACE_JSON_ENV};
