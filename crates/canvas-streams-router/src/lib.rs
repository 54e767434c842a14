//! Frame routing for canvas chat streams.
//!
//! Three delivery patterns sit on top of the core decoder and the session
//! registry:
//! - `SessionDriver` - One session owning its own transport
//! - `Demultiplexer` - Many sessions multiplexed over one shared transport
//! - `FanoutCoordinator` - Many related sessions, each with its own transport

pub mod demux;
pub mod driver;
pub mod fanout;

pub use demux::{CommitteeRouter, Demultiplexer, FrameRouter, RoutedFrame, RoutedKind};
pub use driver::{DriverConfig, SessionDriver, SessionOutcome, SessionStatus};
pub use fanout::{FanoutCoordinator, FanoutReport, FanoutUnit};
