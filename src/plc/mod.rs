pub mod address;
pub mod client;
pub mod pool;
pub mod pool_manager;
pub mod transport;
pub mod value;

pub use address::{group_continuous_addresses, parse_address, AddressRun, ParsedAddress};
pub use client::Mc3eClient;
pub use pool::ConnectionPool;
pub use pool_manager::PoolManager;
pub use transport::{PlcTransport, TcpTransport};
pub use value::TagValue;
