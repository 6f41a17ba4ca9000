mod strategy;

pub use strategy::{RetryOutcome, RetryStrategy};
