pub mod controller;
pub mod events;
pub mod snapshot;
pub mod state;

pub use controller::{SessionController, SessionDeps, SessionSettings};
pub use events::{GatewayReply, SessionEvent, SubmitOutcome, UserAction};
pub use snapshot::SessionSnapshot;
pub use state::{CompletionReason, Feedback, SessionPhase};
