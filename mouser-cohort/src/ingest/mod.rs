//! Identifier ingestion from scan devices

pub mod channel;
pub mod devices;
pub mod listener;
pub mod normalize;
pub mod simulated;

pub use channel::{DeviceConnector, RawEvent, ScanChannel};
pub use devices::{available_ports, LineChannel, LineDevice, PortInfo, StdinDevice};
pub use listener::{IdentificationIngestor, ListenerHandle};
pub use normalize::{normalize_identifier, Debouncer};
pub use simulated::{random_rfid, SimulatedScanner};
