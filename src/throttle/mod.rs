//! Request throttling: policies, counter storage, the limiter and response shaping.

mod clock;
mod limiter;
mod policy;
mod record;
mod response;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use limiter::{Decision, Limiter, LimiterSettings, WriteMode};
pub use policy::{
    PolicyCatalog, PolicyClass, PolicyError, ThrottlePolicy, MAX_POLICY_DURATION,
};
pub use record::{CounterKey, CounterRecord, RecordUpdate};
pub use response::{
    DenialBody, ResponseShaper, ShapedResponse, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET,
    HEADER_RETRY_AFTER, STATUS_OK, STATUS_TOO_MANY_REQUESTS,
};
pub use store::{CounterStore, MemoryCounterStore, StoreError};
