//! Output sinks
//!
//! An [`OutputSink`] is one destination (virtual cable, speakers, ...). It owns
//! the source it plays and the device binding that plays it, and tracks its
//! lifecycle explicitly instead of inferring it from which handles happen to
//! be present.

use std::fmt;
use std::path::Path;

use thiserror::Error;

use crate::output::{
    clamp_volume, find_device_by_name_pattern, BindRequest, CompletionNotifier, DeviceBinding,
    DeviceId, OutputBackend, OutputError, VolumeMode,
};
use crate::source::{ AudioSource, SourceError };


/// Errors raised by sink operations.
#[derive( Debug, Error )]
pub enum SinkError {
    #[error( transparent )]
    InvalidTrack( #[from] SourceError ),

    #[error( "Output '{sink}' unavailable: {source}" )]
    DeviceInit {
        sink: String,
        #[source]
        source: OutputError,
    },
}


/// Lifecycle of a sink.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum SinkState {
    #[default]
    Closed,
    /// Source open, nothing sent to the device yet.
    Opened,
    Playing,
    Paused,
}


impl fmt::Display for SinkState {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        let name = match self {
            SinkState::Closed => "closed",
            SinkState::Opened => "opened",
            SinkState::Playing => "playing",
            SinkState::Paused => "paused",
        };
        f.write_str( name )
    }
}


/// How a sink finds its device.
#[derive( Debug, Clone, PartialEq, Eq )]
pub enum SinkTarget {
    /// The host's default output device.
    DefaultDevice,
    /// First device whose name contains the pattern, e.g. `"CABLE Input"`.
    NamePattern( String ),
    Device( DeviceId ),
}


/// Construction parameters for a sink.
#[derive( Debug, Clone, PartialEq )]
pub struct SinkSpec {
    pub label: String,
    pub target: SinkTarget,
    pub volume: f32,
    pub mode: VolumeMode,
}


impl SinkSpec {
    pub fn new( label: impl Into<String>, target: SinkTarget ) -> Self {
        Self {
            label: label.into(),
            target,
            volume: 1.0,
            mode: VolumeMode::Device,
        }
    }


    pub fn with_volume( mut self, volume: f32 ) -> Self {
        self.volume = volume;
        self
    }


    pub fn with_mode( mut self, mode: VolumeMode ) -> Self {
        self.mode = mode;
        self
    }
}


/// One output destination driven by the session.
pub struct OutputSink {
    label: String,
    device: DeviceId,
    volume: f32,
    mode: VolumeMode,
    source: Option<AudioSource>,
    binding: Option<Box<dyn DeviceBinding>>,
    state: SinkState,
    /// Bumped by every close; stamps completion notifiers.
    generation: u64,
}


impl OutputSink {
    pub fn new( label: impl Into<String>, device: DeviceId, volume: f32, mode: VolumeMode ) -> Self {
        Self {
            label: label.into(),
            device,
            volume: clamp_volume( volume ),
            mode,
            source: None,
            binding: None,
            state: SinkState::Closed,
            generation: 0,
        }
    }


    /// Builds a sink from a spec, resolving its device once.
    ///
    /// A lookup miss does not fail; the sink just reports `DeviceId::NotFound`
    /// and refuses to open.
    pub fn from_spec( spec: &SinkSpec, backend: &dyn OutputBackend ) -> Self {
        let device = match &spec.target {
            SinkTarget::DefaultDevice => DeviceId::Default,
            SinkTarget::NamePattern( pattern ) => find_device_by_name_pattern( backend, pattern ),
            SinkTarget::Device( id ) => *id,
        };
        if !device.is_available() {
            tracing::warn!( "Sink '{}' has no device; it will refuse to open", spec.label );
        }
        Self::new( spec.label.clone(), device, spec.volume, spec.mode )
    }


    /// Opens `path` as this sink's source.
    ///
    /// No-op when a source is already open.
    pub fn open( &mut self, path: &Path ) -> Result<(), SinkError> {
        if path.as_os_str().is_empty() {
            return Err( SinkError::InvalidTrack( SourceError::EmptyPath ) );
        }
        if !self.device.is_available() {
            return Err( SinkError::DeviceInit {
                sink: self.label.clone(),
                source: OutputError::DeviceNotFound,
            });
        }
        if self.state != SinkState::Closed {
            tracing::debug!( "Sink '{}' already open, ignoring open", self.label );
            return Ok(());
        }

        self.source = Some( AudioSource::open( path )? );
        self.state = SinkState::Opened;
        Ok(())
    }


    /// Starts or resumes playback.
    ///
    /// The device binding is created on first play; `make_notifier` receives
    /// the current generation and is only called then. No-op when closed or
    /// already playing.
    pub fn play(
        &mut self,
        backend: &dyn OutputBackend,
        make_notifier: impl FnOnce( u64 ) -> CompletionNotifier,
    ) -> Result<(), SinkError> {
        match self.state {
            SinkState::Closed | SinkState::Playing => return Ok(()),
            SinkState::Opened | SinkState::Paused => {}
        }

        let created = self.binding.is_none();
        if created {
            let Some( handle ) = self.source.as_ref().and_then( |s| s.handle() ) else {
                return Err( self.device_error( OutputError::NoDevice ) );
            };
            let binding = backend
                .bind( BindRequest {
                    device: self.device,
                    volume: self.volume,
                    mode: self.mode,
                    source: handle,
                    notifier: make_notifier( self.generation ),
                })
                .map_err( |e| self.device_error( e ) )?;
            self.binding = Some( binding );
        }

        let result = match self.binding.as_mut() {
            Some( binding ) => binding.play(),
            None => Err( OutputError::NoDevice ),
        };
        if let Err( e ) = result {
            if created {
                // do not keep a binding that never started
                self.binding = None;
            }
            return Err( self.device_error( e ) );
        }

        tracing::debug!( "Sink '{}' playing", self.label );
        self.state = SinkState::Playing;
        Ok(())
    }


    /// Pauses the device. No-op unless playing.
    pub fn pause( &mut self ) -> Result<(), SinkError> {
        if self.state != SinkState::Playing {
            return Ok(());
        }
        let result = match self.binding.as_mut() {
            Some( binding ) => binding.pause(),
            None => Ok(()),
        };
        result.map_err( |e| self.device_error( e ) )?;

        tracing::debug!( "Sink '{}' paused", self.label );
        self.state = SinkState::Paused;
        Ok(())
    }


    /// Releases the binding and the source. Always safe.
    pub fn close( &mut self ) {
        if self.state == SinkState::Closed && self.binding.is_none() && self.source.is_none() {
            return;
        }
        self.generation += 1;
        // binding first: it borrows the source's decoder
        self.binding = None;
        if let Some( mut source ) = self.source.take() {
            source.close();
        }
        self.state = SinkState::Closed;
        tracing::debug!( "Sink '{}' closed", self.label );
    }


    /// Path of the open source.
    pub fn full_path( &self ) -> Option<&Path> {
        self.source.as_ref().map( |s| s.path() )
    }


    pub fn source( &self ) -> Option<&AudioSource> {
        self.source.as_ref()
    }


    /// Whether a completion stamped with `generation` belongs to the live binding.
    pub fn accepts( &self, generation: u64 ) -> bool {
        self.state != SinkState::Closed && generation == self.generation
    }


    pub fn set_volume( &mut self, volume: f32 ) {
        self.volume = clamp_volume( volume );
        if let Some( binding ) = self.binding.as_mut() {
            binding.set_volume( self.volume );
        }
    }


    pub fn state( &self ) -> SinkState {
        self.state
    }


    pub fn is_opened( &self ) -> bool {
        self.state != SinkState::Closed
    }


    pub fn is_playing( &self ) -> bool {
        self.state == SinkState::Playing
    }


    pub fn is_paused( &self ) -> bool {
        self.state == SinkState::Paused
    }


    pub fn label( &self ) -> &str {
        &self.label
    }


    pub fn device( &self ) -> DeviceId {
        self.device
    }


    pub fn volume( &self ) -> f32 {
        self.volume
    }


    pub fn mode( &self ) -> VolumeMode {
        self.mode
    }


    pub fn generation( &self ) -> u64 {
        self.generation
    }


    fn device_error( &self, source: OutputError ) -> SinkError {
        SinkError::DeviceInit { sink: self.label.clone(), source }
    }
}


impl fmt::Debug for OutputSink {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        f.debug_struct( "OutputSink" )
            .field( "label", &self.label )
            .field( "device", &self.device )
            .field( "state", &self.state )
            .field( "volume", &self.volume )
            .field( "mode", &self.mode )
            .field( "path", &self.full_path() )
            .finish()
    }
}


impl Drop for OutputSink {
    fn drop( &mut self ) {
        self.close();
    }
}


#[cfg( test )]
mod tests {
    use super::*;

    use std::sync::mpsc;

    use tempfile::TempDir;

    use crate::output::CompletionReason;
    use crate::source::tests::write_wav;
    use crate::testing::ScriptedBackend;


    fn notifier_into( tx: mpsc::Sender<crate::output::Completion> ) -> impl FnOnce( u64 ) -> CompletionNotifier {
        move |generation| CompletionNotifier::new( 0, generation, move |c| { let _ = tx.send( c ); } )
    }


    fn opened_sink( backend: &ScriptedBackend, dir: &TempDir ) -> ( OutputSink, std::path::PathBuf ) {
        let path = write_wav( dir.path(), "clip.wav", 800 );
        let mut sink = OutputSink::from_spec(
            &SinkSpec::new( "cable", SinkTarget::NamePattern( "CABLE Input".into() ) ),
            backend,
        );
        sink.open( &path ).unwrap();
        ( sink, path )
    }


    #[test]
    fn test_from_spec_resolves_device_once() {
        let backend = ScriptedBackend::with_devices( &[ "Speakers", "CABLE Input (VB-Audio)" ] );
        let sink = OutputSink::from_spec(
            &SinkSpec::new( "cable", SinkTarget::NamePattern( "CABLE Input".into() ) ).with_volume( 3.0 ),
            &backend,
        );
        assert_eq!( sink.device(), DeviceId::Index( 1 ) );
        assert_eq!( sink.volume(), 1.0 );
        assert_eq!( sink.state(), SinkState::Closed );
    }


    #[test]
    fn test_open_rejects_empty_path() {
        let backend = ScriptedBackend::with_devices( &[ "CABLE Input" ] );
        let mut sink = OutputSink::from_spec( &SinkSpec::new( "cable", SinkTarget::DefaultDevice ), &backend );
        let result = sink.open( Path::new( "" ) );
        assert!( matches!( result, Err( SinkError::InvalidTrack( SourceError::EmptyPath ) ) ) );
        assert!( !sink.is_opened() );
    }


    #[test]
    fn test_open_missing_device_is_device_init() {
        let dir = TempDir::new().unwrap();
        let path = write_wav( dir.path(), "clip.wav", 100 );
        let backend = ScriptedBackend::with_devices( &[ "Speakers" ] );
        let mut sink = OutputSink::from_spec(
            &SinkSpec::new( "cable", SinkTarget::NamePattern( "CABLE Input".into() ) ),
            &backend,
        );

        assert_eq!( sink.device(), DeviceId::NotFound );
        let result = sink.open( &path );
        assert!( matches!( result, Err( SinkError::DeviceInit { source: OutputError::DeviceNotFound, .. } ) ) );
        assert!( sink.full_path().is_none() );
    }


    #[test]
    fn test_open_then_full_path_round_trip() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::with_devices( &[ "CABLE Input" ] );
        let ( mut sink, path ) = opened_sink( &backend, &dir );

        assert_eq!( sink.state(), SinkState::Opened );
        assert_eq!( sink.full_path(), Some( path.as_path() ) );

        sink.close();
        assert_eq!( sink.full_path(), None );
    }


    #[test]
    fn test_open_twice_keeps_first_source() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::with_devices( &[ "CABLE Input" ] );
        let ( mut sink, path ) = opened_sink( &backend, &dir );
        let other = write_wav( dir.path(), "other.wav", 100 );

        sink.open( &other ).unwrap();
        assert_eq!( sink.full_path(), Some( path.as_path() ) );
    }


    #[test]
    fn test_play_without_open_is_noop() {
        let backend = ScriptedBackend::with_devices( &[ "CABLE Input" ] );
        let mut sink = OutputSink::new( "cable", DeviceId::Index( 0 ), 1.0, VolumeMode::Device );
        let ( tx, _rx ) = mpsc::channel();

        sink.play( &backend, notifier_into( tx ) ).unwrap();
        assert_eq!( sink.state(), SinkState::Closed );
        assert_eq!( backend.bind_count(), 0 );
    }


    #[test]
    fn test_play_twice_binds_once() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::with_devices( &[ "CABLE Input" ] );
        let ( mut sink, _ ) = opened_sink( &backend, &dir );
        let ( tx, _rx ) = mpsc::channel();

        sink.play( &backend, notifier_into( tx.clone() ) ).unwrap();
        sink.play( &backend, notifier_into( tx ) ).unwrap();

        assert!( sink.is_playing() );
        assert_eq!( backend.bind_count(), 1 );
        assert_eq!( backend.calls( 0 ), vec![ "play" ] );
    }


    #[test]
    fn test_pause_and_resume_reuse_binding() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::with_devices( &[ "CABLE Input" ] );
        let ( mut sink, _ ) = opened_sink( &backend, &dir );
        let ( tx, _rx ) = mpsc::channel();

        sink.pause().unwrap();
        assert_eq!( sink.state(), SinkState::Opened );

        sink.play( &backend, notifier_into( tx.clone() ) ).unwrap();
        sink.pause().unwrap();
        sink.pause().unwrap();
        assert!( sink.is_paused() );

        sink.play( &backend, notifier_into( tx ) ).unwrap();
        assert!( sink.is_playing() );
        assert_eq!( backend.bind_count(), 1 );
        assert_eq!( backend.calls( 0 ), vec![ "play", "pause", "play" ] );
    }


    #[test]
    fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::with_devices( &[ "CABLE Input" ] );
        let ( mut sink, _ ) = opened_sink( &backend, &dir );
        let ( tx, _rx ) = mpsc::channel();
        sink.play( &backend, notifier_into( tx ) ).unwrap();

        sink.close();
        let generation = sink.generation();
        sink.close();

        assert!( !sink.is_opened() );
        assert!( !sink.is_paused() );
        assert_eq!( sink.generation(), generation );
        assert_eq!( backend.live_bindings(), 0 );
    }


    #[test]
    fn test_close_invalidates_outstanding_notifier() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::with_devices( &[ "CABLE Input" ] );
        let ( mut sink, path ) = opened_sink( &backend, &dir );
        let ( tx, rx ) = mpsc::channel();
        sink.play( &backend, notifier_into( tx.clone() ) ).unwrap();
        sink.close();

        sink.open( &path ).unwrap();
        sink.play( &backend, notifier_into( tx ) ).unwrap();

        backend.complete( 0, CompletionReason::EndOfStream );
        let stale = rx.recv().unwrap();
        assert!( !sink.accepts( stale.generation ) );

        backend.complete( 1, CompletionReason::EndOfStream );
        let current = rx.recv().unwrap();
        assert!( sink.accepts( current.generation ) );
    }


    #[test]
    fn test_failed_bind_leaves_sink_opened() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::with_devices( &[ "CABLE Input" ] );
        backend.fail_bind( DeviceId::Index( 0 ) );
        let ( mut sink, _ ) = opened_sink( &backend, &dir );
        let ( tx, _rx ) = mpsc::channel();

        let result = sink.play( &backend, notifier_into( tx ) );
        assert!( matches!( result, Err( SinkError::DeviceInit { .. } ) ) );
        assert_eq!( sink.state(), SinkState::Opened );
    }


    #[test]
    fn test_failed_start_drops_fresh_binding() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::with_devices( &[ "CABLE Input" ] );
        backend.fail_play( DeviceId::Index( 0 ) );
        let ( mut sink, _ ) = opened_sink( &backend, &dir );
        let ( tx, _rx ) = mpsc::channel();

        assert!( sink.play( &backend, notifier_into( tx ) ).is_err() );
        assert_eq!( sink.state(), SinkState::Opened );
        assert_eq!( backend.live_bindings(), 0 );
    }


    #[test]
    fn test_set_volume_reaches_binding() {
        let dir = TempDir::new().unwrap();
        let backend = ScriptedBackend::with_devices( &[ "CABLE Input" ] );
        let ( mut sink, _ ) = opened_sink( &backend, &dir );
        let ( tx, _rx ) = mpsc::channel();
        sink.play( &backend, notifier_into( tx ) ).unwrap();

        sink.set_volume( 0.25 );
        assert_eq!( sink.volume(), 0.25 );
        assert_eq!( backend.calls( 0 ), vec![ "play", "volume" ] );
    }
}
