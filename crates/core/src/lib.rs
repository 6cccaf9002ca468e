pub mod error;
pub mod events;
pub mod gateway;
pub mod invoice;
pub mod matching;
pub mod money;
pub mod payment;
pub mod period;
pub mod stats;

pub use error::LettrageError;
pub use events::{EventBus, Subscription};
pub use gateway::{CommittedMatch, GatewayError, InvoiceProvider, MemoryGateway, PersistenceGateway};
pub use invoice::Invoice;
pub use matching::{Match, MatchRecordId, MatchStatus};
pub use money::Money;
pub use payment::Payment;
pub use period::DateRange;
pub use stats::{calculate_stats, LettrageStats};
