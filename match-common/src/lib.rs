pub mod identifier;
pub mod metrics;
pub mod normalize;
pub mod record;
pub mod retry;
