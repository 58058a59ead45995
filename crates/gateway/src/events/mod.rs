pub mod bus;

pub use bus::{EventBus, ObserverConn, ObserverMessage};
