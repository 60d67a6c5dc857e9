pub mod memory;
pub mod queues;

pub use memory::{
    Broker, Envelope, PropertyValue, Transaction, PROP_DUPLICATE_ID, PROP_FAILURE_REASON,
    PROP_ORIGIN_QUEUE, PROP_REDELIVERY_COUNT, PROP_SCHEDULED_DELIVERY,
};
pub use queues::{
    batch_queue, variant_job_queue, ALL_BATCHES_LOADED_QUEUE, BATCH_LOADED_QUEUE,
    DEAD_LETTER_QUEUE, METRICS_QUEUE, PROP_VARIANT_ID, TRIGGER_QUEUE,
};
