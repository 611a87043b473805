pub mod delivery_client;
pub mod stop_signal;
pub mod sync_cycle;
pub mod transaction_source;
pub mod transport;

pub use delivery_client::{DeliveryClient, DeliverySettings};
pub use sync_cycle::{CycleOutcome, CyclePlan, CycleReport, SyncOrchestrator};
pub use transaction_source::{tcp_reachable, TransactionApiSource};
pub use transport::{HttpMethod, HttpReply, HttpTransport, ReqwestTransport, TransportSettings};
