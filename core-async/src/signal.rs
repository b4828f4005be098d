//! Process signal handling for front-ends.

pub use tokio::signal::ctrl_c;
