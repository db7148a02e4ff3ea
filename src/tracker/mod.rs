/*!
 * Tracker
 * Session facade and job environment detection
 */

mod environment;
mod session;

pub use environment::{EnvironmentKind, TrialEnvironment};
pub use session::{Tracker, TrackerConfig, TrackerStats};
