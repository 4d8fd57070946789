//! Network subsystem for TCP frame transport

pub mod ingest;
pub mod reader;
pub mod receiver;
pub mod sender;

pub use ingest::{IngestStats, IngestionCoordinator};
pub use reader::{DecodedPacket, PacketReader};
pub use receiver::{create_listener, IngestServer, ServerStats};
pub use sender::{FrameSender, SenderStats};
