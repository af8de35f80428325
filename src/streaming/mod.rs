//! Network side of the service: TCP session server and UDP discovery

pub mod discovery;
pub mod frame;
pub mod server;
pub mod tcp_receiver;

pub use discovery::{
    Announcement, DiscoveryBroadcaster, SERVICE_NAME, discover_service, local_ip,
    subnet_broadcast,
};
pub use frame::{LineFramer, Reading, parse_frame};
pub use server::SessionServer;
pub use tcp_receiver::{IngestContext, ReceiverExit, ReceiverSettings, TcpReceiver};
