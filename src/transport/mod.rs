pub mod memory;
pub mod multiplexer;
pub mod rest_proxy;
pub mod traits;

pub use memory::InMemoryBus;
pub use multiplexer::Multiplexer;
pub use rest_proxy::RestProxyTransport;
pub use traits::{Delivery, DeliveryStream, TransportSink, TransportSource};
