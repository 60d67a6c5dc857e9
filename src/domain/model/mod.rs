pub mod jobs;
pub mod message;
pub mod metrics;
pub mod variant;

pub use jobs::{
    AllBatchesLoadedMarker, BatchJob, BatchLoadedMarker, TriggerMetricCollection, VariantJob,
};
pub use message::{Criteria, MessageConfig, MessagePayload, UnifiedPushMessage};
pub use metrics::{
    DeliveryStatus, PushMessageInformation, VariantErrorStatus, VariantMetricInformation,
};
pub use variant::{Installation, PushApplication, Variant, VariantType};
