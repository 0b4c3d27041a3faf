//! SLAM Core - soundboard playback engine
//!
//! This crate routes one selected track to one or more output sinks (a
//! virtual cable, the speakers, ...) and keeps them in lock-step behind a
//! single transport state machine.

pub mod catalog;
pub mod command;
pub mod decoder;
pub mod device;
pub mod output;
pub mod session;
pub mod sink;
pub mod source;

#[cfg( test )]
pub(crate) mod testing;

pub use catalog::{ CatalogError, TrackCatalog, TrackReference };
pub use command::{ Command, CommandError };
pub use decoder::TrackTags;
pub use device::CpalBackend;
pub use output::{ find_device_by_name_pattern, DeviceId, OutputBackend, OutputError, VolumeMode };
pub use session::{ ErrorKind, NowPlaying, PlaybackSession, SessionError, SessionEvent, SinkSnapshot, SongStatus };
pub use sink::{ OutputSink, SinkError, SinkSpec, SinkState, SinkTarget };
pub use source::{ AudioSource, SourceError };
