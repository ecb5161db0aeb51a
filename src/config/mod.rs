mod settings;

pub use settings::{ConnectionConfig, ConsumeConfig, Settings, StoreConfig, SweepConfig};
