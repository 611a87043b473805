pub mod components;
pub mod service;

pub use components::{
    CycleOutcome, CyclePlan, CycleReport, DeliveryClient, DeliverySettings, HttpMethod, HttpReply,
    HttpTransport, ReqwestTransport, SyncOrchestrator, TransactionApiSource, TransportSettings,
};
pub use service::SyncService;
