//! Reconciliation ("lettrage") engine: first-fit matching of statement
//! payments against invoices, plus the session state around it.

pub mod match_engine;
pub mod registry;
pub mod session;

pub use match_engine::{AutoMatchEngine, Claims};
pub use registry::{SessionKey, SessionRegistry, SharedSession};
pub use session::{LettrageSession, ProjectSnapshot, SavedPayment, SessionEvent, ValidationReport};
