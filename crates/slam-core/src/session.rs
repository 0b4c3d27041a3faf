//! Playback session
//!
//! The [`PlaybackSession`] owns the transport status and every sink, and is
//! the only thing that mutates either. Commands from the control thread and
//! completions from device threads are serialized through one lock; the
//! completions arrive over a channel drained by a pump thread the session
//! owns, so a device thread never waits on its own teardown.
//!
//! Sinks move in lock-step:
//!
//! | status  | every sink |
//! |---------|------------|
//! | Stopped | Closed     |
//! | Playing | Playing    |
//! | Paused  | Paused     |

use std::fmt;
use std::path::{ Path, PathBuf };
use std::sync::mpsc::{ self, Receiver, Sender };
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{ Mutex, RwLock };
use thiserror::Error;

use crate::catalog::TrackCatalog;
use crate::decoder::TrackTags;
use crate::output::{ Completion, CompletionNotifier, CompletionReason, DeviceId, OutputBackend, OutputError, VolumeMode };
use crate::sink::{ OutputSink, SinkError, SinkSpec, SinkState };
use crate::source::display_name;


/// Transport status of the session.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum SongStatus {
    #[default]
    Stopped,
    Playing,
    Paused,
}


impl SongStatus {
    /// State every sink must be in while the session has this status.
    fn sink_state( self ) -> SinkState {
        match self {
            SongStatus::Stopped => SinkState::Closed,
            SongStatus::Playing => SinkState::Playing,
            SongStatus::Paused => SinkState::Paused,
        }
    }
}


impl fmt::Display for SongStatus {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        let name = match self {
            SongStatus::Stopped => "Stopped",
            SongStatus::Playing => "Playing",
            SongStatus::Paused => "Paused",
        };
        f.write_str( name )
    }
}


/// Coarse classification of [`SessionError`].
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum ErrorKind {
    InvalidTrack,
    DeviceInit,
    /// Programming defect, not a user-facing condition.
    InvalidState,
}


/// Errors returned by session commands.
#[derive( Debug, Error )]
pub enum SessionError {
    #[error( "{0}" )]
    InvalidTrack( String ),

    #[error( "Output '{sink}' unavailable: {source}" )]
    DeviceInit {
        sink: String,
        #[source]
        source: OutputError,
    },

    #[error( "No output sinks configured" )]
    NoSinks,

    #[error( "No sink number {0}" )]
    UnknownSink( usize ),

    #[error( "Unmodeled session state: {0}" )]
    InvalidState( String ),
}


impl SessionError {
    pub fn kind( &self ) -> ErrorKind {
        match self {
            SessionError::InvalidTrack( _ ) => ErrorKind::InvalidTrack,
            SessionError::DeviceInit { .. } | SessionError::NoSinks => ErrorKind::DeviceInit,
            SessionError::UnknownSink( _ ) | SessionError::InvalidState( _ ) => ErrorKind::InvalidState,
        }
    }
}


impl From<SinkError> for SessionError {
    fn from( e: SinkError ) -> Self {
        match e {
            SinkError::InvalidTrack( source ) => SessionError::InvalidTrack( source.to_string() ),
            SinkError::DeviceInit { sink, source } => SessionError::DeviceInit { sink, source },
        }
    }
}


/// Notifications published to subscribers.
#[derive( Debug, Clone, PartialEq )]
pub enum SessionEvent {
    /// Status, now-playing or selection changed.
    StatusChanged {
        status: SongStatus,
        now_playing: Option<String>,
        selected: Option<String>,
    },
    /// Playback stopped because a device or decoder failed.
    PlaybackFailed {
        sink: String,
        message: String,
    },
}


/// Point-in-time view of one sink.
#[derive( Debug, Clone, PartialEq )]
pub struct SinkSnapshot {
    pub label: String,
    pub device: DeviceId,
    pub state: SinkState,
    pub volume: f32,
    pub mode: VolumeMode,
}


/// What is loaded right now.
#[derive( Debug, Clone, PartialEq )]
pub struct NowPlaying {
    pub name: String,
    pub path: PathBuf,
    pub duration: Option<Duration>,
    pub tags: TrackTags,
}


enum Signal {
    Completed( Completion ),
    Shutdown,
}


/// Everything guarded by the session lock.
struct SessionState {
    status: SongStatus,
    selected: Option<PathBuf>,
    sinks: Vec<OutputSink>,
    subscribers: Vec<Sender<SessionEvent>>,
}


impl SessionState {
    /// Fails fast when the sinks disagree with `status`.
    fn check_lockstep( &self ) -> Result<(), SessionError> {
        let expected = self.status.sink_state();
        if let Some( sink ) = self.sinks.iter().find( |s| s.state() != expected ) {
            let detail = format!(
                "status {} but sink '{}' is {}",
                self.status,
                sink.label(),
                sink.state()
            );
            tracing::error!( kind = ?ErrorKind::InvalidState, "{}", detail );
            return Err( SessionError::InvalidState( detail ) );
        }
        Ok(())
    }


    fn close_all( &mut self ) {
        for sink in self.sinks.iter_mut() {
            sink.close();
        }
    }


    fn now_playing( &self ) -> Option<String> {
        self.sinks.iter().find_map( |s| s.full_path() ).map( display_name )
    }


    fn publish( &mut self, event: SessionEvent ) {
        self.subscribers.retain( |tx| tx.send( event.clone() ).is_ok() );
    }


    fn publish_status( &mut self ) {
        let event = SessionEvent::StatusChanged {
            status: self.status,
            now_playing: self.now_playing(),
            selected: self.selected.as_deref().map( display_name ),
        };
        self.publish( event );
    }


    fn complete( &mut self, completion: Completion ) {
        let Completion { sink: index, generation, reason } = completion;

        if self.status == SongStatus::Stopped {
            tracing::debug!( "Ignoring completion from sink {} while stopped", index );
            return;
        }
        let current = self.sinks.get( index ).is_some_and( |s| s.accepts( generation ) );
        if !current {
            tracing::debug!( "Ignoring stale completion from sink {} (generation {})", index, generation );
            return;
        }

        let label = self.sinks[ index ].label().to_string();
        tracing::info!( "Sink '{}' finished ({:?}), stopping all sinks", label, reason );

        // the signalling sink first, then the rest
        self.sinks[ index ].close();
        self.close_all();
        self.status = SongStatus::Stopped;

        if let CompletionReason::Failed( message ) = reason {
            self.publish( SessionEvent::PlaybackFailed { sink: label, message } );
        }
        self.publish_status();
    }
}


/// Orchestrates the sinks bound to the current track.
pub struct PlaybackSession {
    state: Arc<Mutex<SessionState>>,
    backend: Arc<dyn OutputBackend>,
    catalog: Arc<RwLock<TrackCatalog>>,
    signal_tx: Sender<Signal>,
    pump: Option<thread::JoinHandle<()>>,
}


impl PlaybackSession {
    /// Builds a session with one sink per spec, resolving devices now.
    pub fn new(
        backend: Arc<dyn OutputBackend>,
        specs: &[SinkSpec],
        catalog: Arc<RwLock<TrackCatalog>>,
    ) -> Result<Self, SessionError> {
        if specs.is_empty() {
            return Err( SessionError::NoSinks );
        }

        let sinks: Vec<OutputSink> = specs
            .iter()
            .map( |spec| OutputSink::from_spec( spec, backend.as_ref() ) )
            .collect();
        for sink in &sinks {
            tracing::info!( "Sink '{}' on device {} ({:?})", sink.label(), sink.device(), sink.mode() );
        }

        let state = Arc::new( Mutex::new( SessionState {
            status: SongStatus::Stopped,
            selected: None,
            sinks,
            subscribers: Vec::new(),
        }));

        let ( signal_tx, signal_rx ) = mpsc::channel();
        let pump_state = Arc::clone( &state );
        let pump = thread::Builder::new()
            .name( "slam-session".into() )
            .spawn( move || Self::pump( pump_state, signal_rx ) )
            .map_err( |e| SessionError::InvalidState( format!( "cannot start session thread: {}", e ) ) )?;

        Ok( Self {
            state,
            backend,
            catalog,
            signal_tx,
            pump: Some( pump ),
        })
    }


    /// Drains completions into the state machine until shutdown.
    fn pump( state: Arc<Mutex<SessionState>>, rx: Receiver<Signal> ) {
        while let Ok( Signal::Completed( completion ) ) = rx.recv() {
            state.lock().complete( completion );
        }
        tracing::debug!( "Session pump exiting" );
    }


    /// Selects the track the next `play` from Stopped will load.
    /// Does not interrupt current playback.
    pub fn select_track( &self, path: impl Into<PathBuf> ) {
        let path = path.into();
        let mut state = self.state.lock();
        if state.selected.as_ref() == Some( &path ) {
            return;
        }
        tracing::info!( "Selected {:?}", path );
        state.selected = Some( path );
        state.publish_status();
    }


    /// Selects a catalog track by display name.
    pub fn select_by_name( &self, name: &str ) -> Result<(), SessionError> {
        let path = self.catalog
            .read()
            .resolve( name )
            .map( Path::to_path_buf )
            .ok_or_else( || SessionError::InvalidTrack( format!( "No track named '{}'", name ) ) )?;
        self.select_track( path );
        Ok(())
    }


    pub fn clear_selection( &self ) {
        let mut state = self.state.lock();
        if state.selected.take().is_some() {
            state.publish_status();
        }
    }


    /// Starts the selected track, or resumes from pause.
    ///
    /// From Stopped with no selection this is a silent no-op. If any sink
    /// fails to open or start, every sink is closed again and the session
    /// stays Stopped.
    pub fn play( &self ) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        state.check_lockstep()?;

        match state.status {
            SongStatus::Playing => {
                tracing::debug!( "Play ignored: already playing" );
                Ok(())
            }
            SongStatus::Stopped => {
                let Some( path ) = state.selected.clone() else {
                    tracing::debug!( "Play ignored: no track selected" );
                    return Ok(());
                };
                self.start( &mut state, &path )
            }
            SongStatus::Paused => self.resume( &mut state ),
        }
    }


    fn start( &self, state: &mut SessionState, path: &Path ) -> Result<(), SessionError> {
        tracing::info!( "Starting {:?} on {} sink(s)", path, state.sinks.len() );

        let opened = state.sinks.iter_mut().try_for_each( |sink| sink.open( path ) );
        if let Err( e ) = opened {
            state.close_all();
            tracing::warn!( "Open failed, session stays stopped: {}", e );
            return Err( e.into() );
        }

        let mut started = Ok(());
        for ( index, sink ) in state.sinks.iter_mut().enumerate() {
            started = sink.play( self.backend.as_ref(), |generation| self.notifier( index, generation ) );
            if started.is_err() {
                break;
            }
        }
        if let Err( e ) = started {
            state.close_all();
            tracing::warn!( "Start failed, session stays stopped: {}", e );
            return Err( e.into() );
        }

        state.status = SongStatus::Playing;
        state.publish_status();
        Ok(())
    }


    fn resume( &self, state: &mut SessionState ) -> Result<(), SessionError> {
        for index in 0..state.sinks.len() {
            let result = state.sinks[ index ]
                .play( self.backend.as_ref(), |generation| self.notifier( index, generation ) );
            if let Err( e ) = result {
                for sink in state.sinks[ ..index ].iter_mut() {
                    if let Err( undo ) = sink.pause() {
                        tracing::error!( "Could not re-pause sink '{}': {}", sink.label(), undo );
                    }
                }
                tracing::warn!( "Resume failed, session stays paused: {}", e );
                return Err( e.into() );
            }
        }

        tracing::info!( "Resumed" );
        state.status = SongStatus::Playing;
        state.publish_status();
        Ok(())
    }


    /// Pauses every sink. No-op unless playing.
    pub fn pause( &self ) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        state.check_lockstep()?;

        if state.status != SongStatus::Playing {
            tracing::debug!( "Pause ignored: {}", state.status );
            return Ok(());
        }

        for index in 0..state.sinks.len() {
            if let Err( e ) = state.sinks[ index ].pause() {
                for ( undo_index, sink ) in state.sinks[ ..index ].iter_mut().enumerate() {
                    let undo = sink.play( self.backend.as_ref(), |generation| self.notifier( undo_index, generation ) );
                    if let Err( undo ) = undo {
                        tracing::error!( "Could not resume sink '{}': {}", sink.label(), undo );
                    }
                }
                tracing::warn!( "Pause failed, session keeps playing: {}", e );
                return Err( e.into() );
            }
        }

        tracing::info!( "Paused" );
        state.status = SongStatus::Paused;
        state.publish_status();
        Ok(())
    }


    /// Closes every sink and returns to Stopped.
    ///
    /// Also the way out of a lock-step violation: it closes whatever is
    /// open regardless of status.
    pub fn stop( &self ) {
        let mut state = self.state.lock();
        let all_closed = state.sinks.iter().all( |s| s.state() == SinkState::Closed );

        if state.status == SongStatus::Stopped && all_closed {
            tracing::debug!( "Stop ignored: already stopped" );
            return;
        }
        if state.status == SongStatus::Stopped {
            tracing::error!( kind = ?ErrorKind::InvalidState, "Stopped session had open sinks; closing them" );
        }

        state.close_all();
        state.status = SongStatus::Stopped;
        tracing::info!( "Stopped" );
        state.publish_status();
    }


    /// Sets one sink's volume, live if it is bound. `index` is 0-based.
    pub fn set_sink_volume( &self, index: usize, volume: f32 ) -> Result<(), SessionError> {
        let mut state = self.state.lock();
        let sink = state.sinks.get_mut( index ).ok_or( SessionError::UnknownSink( index ) )?;
        sink.set_volume( volume );
        tracing::info!( "Sink '{}' volume {:.2}", sink.label(), sink.volume() );
        Ok(())
    }


    /// Receives every event published from now on.
    pub fn subscribe( &self ) -> Receiver<SessionEvent> {
        let ( tx, rx ) = mpsc::channel();
        self.state.lock().subscribers.push( tx );
        rx
    }


    pub fn status( &self ) -> SongStatus {
        self.state.lock().status
    }


    pub fn selected_track( &self ) -> Option<PathBuf> {
        self.state.lock().selected.clone()
    }


    /// Display name of the loaded track.
    pub fn now_playing( &self ) -> Option<String> {
        self.state.lock().now_playing()
    }


    pub fn now_playing_info( &self ) -> Option<NowPlaying> {
        let state = self.state.lock();
        let source = state.sinks.iter().find_map( |s| s.source() )?;
        Some( NowPlaying {
            name: source.display_name(),
            path: source.path().to_path_buf(),
            duration: source.duration(),
            tags: source.tags().clone(),
        })
    }


    pub fn sinks( &self ) -> Vec<SinkSnapshot> {
        self.state.lock()
            .sinks
            .iter()
            .map( |s| SinkSnapshot {
                label: s.label().to_string(),
                device: s.device(),
                state: s.state(),
                volume: s.volume(),
                mode: s.mode(),
            })
            .collect()
    }


    pub fn sink_count( &self ) -> usize {
        self.state.lock().sinks.len()
    }


    pub fn catalog( &self ) -> Arc<RwLock<TrackCatalog>> {
        Arc::clone( &self.catalog )
    }


    pub fn backend( &self ) -> Arc<dyn OutputBackend> {
        Arc::clone( &self.backend )
    }


    fn notifier( &self, sink: usize, generation: u64 ) -> CompletionNotifier {
        let tx = self.signal_tx.clone();
        CompletionNotifier::new( sink, generation, move |completion| {
            // the session may already be gone
            let _ = tx.send( Signal::Completed( completion ) );
        })
    }
}


impl Drop for PlaybackSession {
    fn drop( &mut self ) {
        self.stop();
        let _ = self.signal_tx.send( Signal::Shutdown );
        if let Some( pump ) = self.pump.take() {
            let _ = pump.join();
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;

    use tempfile::TempDir;

    use crate::sink::SinkTarget;
    use crate::source::tests::write_wav;
    use crate::testing::ScriptedBackend;


    const WAIT: Duration = Duration::from_secs( 5 );


    struct Fixture {
        backend: ScriptedBackend,
        session: PlaybackSession,
        events: Receiver<SessionEvent>,
        dir: TempDir,
    }


    impl Fixture {
        fn new( devices: &[&str], specs: &[SinkSpec] ) -> Self {
            let backend = ScriptedBackend::with_devices( devices );
            let session = PlaybackSession::new(
                Arc::new( backend.clone() ),
                specs,
                Arc::new( RwLock::new( TrackCatalog::new() ) ),
            ).unwrap();
            let events = session.subscribe();
            Self { backend, session, events, dir: TempDir::new().unwrap() }
        }


        /// Cable plus speakers, both present.
        fn dual() -> Self {
            Self::new( &[ "Speakers", "CABLE Input" ], &dual_specs() )
        }


        fn track( &self, name: &str ) -> PathBuf {
            write_wav( self.dir.path(), name, 800 )
        }


        fn states( &self ) -> Vec<SinkState> {
            self.session.sinks().into_iter().map( |s| s.state ).collect()
        }


        /// Waits for the next StatusChanged event.
        fn next_status( &self ) -> SongStatus {
            loop {
                match self.events.recv_timeout( WAIT ).unwrap() {
                    SessionEvent::StatusChanged { status, .. } => return status,
                    SessionEvent::PlaybackFailed { .. } => continue,
                }
            }
        }


        fn drain( &self ) -> Vec<SessionEvent> {
            self.events.try_iter().collect()
        }
    }


    fn dual_specs() -> Vec<SinkSpec> {
        vec![
            SinkSpec::new( "cable", SinkTarget::NamePattern( "CABLE Input".into() ) )
                .with_mode( VolumeMode::Stage ),
            SinkSpec::new( "speakers", SinkTarget::DefaultDevice ).with_volume( 0.5 ),
        ]
    }


    #[test]
    fn test_new_requires_a_sink() {
        let result = PlaybackSession::new(
            Arc::new( ScriptedBackend::default() ),
            &[],
            Arc::new( RwLock::new( TrackCatalog::new() ) ),
        );
        assert!( matches!( result, Err( SessionError::NoSinks ) ) );
    }


    #[test]
    fn test_transport_without_selection_stays_stopped() {
        let fx = Fixture::dual();

        for _ in 0..2 {
            fx.session.play().unwrap();
            fx.session.pause().unwrap();
            fx.session.stop();
        }

        assert_eq!( fx.session.status(), SongStatus::Stopped );
        assert_eq!( fx.states(), vec![ SinkState::Closed, SinkState::Closed ] );
        assert_eq!( fx.backend.bind_count(), 0 );
        assert!( fx.drain().is_empty() );
    }


    #[test]
    fn test_play_drives_all_sinks() {
        let fx = Fixture::dual();
        let path = fx.track( "song.wav" );
        fx.session.select_track( &path );

        fx.session.play().unwrap();

        assert_eq!( fx.session.status(), SongStatus::Playing );
        assert_eq!( fx.states(), vec![ SinkState::Playing, SinkState::Playing ] );
        assert_eq!( fx.session.now_playing().as_deref(), Some( "song" ) );
        assert_eq!( fx.backend.bind_count(), 2 );

        fx.backend.with_record( 0, |r| {
            assert_eq!( r.device, DeviceId::Index( 1 ) );
            assert_eq!( r.mode, VolumeMode::Stage );
        });
        fx.backend.with_record( 1, |r| {
            assert_eq!( r.device, DeviceId::Default );
            assert_eq!( r.volume, 0.5 );
        });
    }


    #[test]
    fn test_play_is_idempotent_while_playing() {
        let fx = Fixture::dual();
        fx.session.select_track( fx.track( "song.wav" ) );

        fx.session.play().unwrap();
        fx.session.play().unwrap();
        assert_eq!( fx.backend.bind_count(), 2 );
        fx.drain();

        // one completion, one transition
        assert!( fx.backend.complete( 0, CompletionReason::EndOfStream ) );
        assert!( !fx.backend.complete( 0, CompletionReason::EndOfStream ) );
        assert_eq!( fx.next_status(), SongStatus::Stopped );

        fx.session.stop();
        assert!( fx.events.recv_timeout( Duration::from_millis( 100 ) ).is_err() );
    }


    #[test]
    fn test_pause_resume_stop() {
        let fx = Fixture::dual();
        fx.session.select_track( fx.track( "song.wav" ) );
        fx.session.play().unwrap();

        fx.session.pause().unwrap();
        assert_eq!( fx.session.status(), SongStatus::Paused );
        assert_eq!( fx.states(), vec![ SinkState::Paused, SinkState::Paused ] );

        fx.session.pause().unwrap();
        assert_eq!( fx.session.status(), SongStatus::Paused );

        fx.session.play().unwrap();
        assert_eq!( fx.session.status(), SongStatus::Playing );
        assert_eq!( fx.backend.bind_count(), 2 );
        assert_eq!( fx.backend.calls( 0 ), vec![ "play", "pause", "play" ] );

        fx.session.stop();
        assert_eq!( fx.session.status(), SongStatus::Stopped );
        assert_eq!( fx.states(), vec![ SinkState::Closed, SinkState::Closed ] );
        assert_eq!( fx.backend.live_bindings(), 0 );
        assert_eq!( fx.session.now_playing(), None );
    }


    #[test]
    fn test_stop_from_paused() {
        let fx = Fixture::dual();
        fx.session.select_track( fx.track( "song.wav" ) );
        fx.session.play().unwrap();
        fx.session.pause().unwrap();

        fx.session.stop();
        assert_eq!( fx.session.status(), SongStatus::Stopped );
        assert_eq!( fx.backend.live_bindings(), 0 );
    }


    #[test]
    fn test_select_while_playing_does_not_interrupt() {
        let fx = Fixture::dual();
        let first = fx.track( "first.wav" );
        let second = fx.track( "second.wav" );
        fx.session.select_track( &first );
        fx.session.play().unwrap();

        fx.session.select_track( &second );
        assert_eq!( fx.session.status(), SongStatus::Playing );
        assert_eq!( fx.session.now_playing().as_deref(), Some( "first" ) );
        assert_eq!( fx.session.selected_track(), Some( second.clone() ) );
        assert_eq!( fx.backend.live_bindings(), 2 );

        fx.session.stop();
        fx.session.play().unwrap();
        assert_eq!( fx.session.now_playing().as_deref(), Some( "second" ) );
    }


    #[test]
    fn test_completion_on_one_sink_stops_both() {
        let fx = Fixture::dual();
        fx.session.select_track( fx.track( "song.wav" ) );
        fx.session.play().unwrap();
        fx.drain();

        fx.backend.complete( 0, CompletionReason::EndOfStream );

        assert_eq!( fx.next_status(), SongStatus::Stopped );
        assert_eq!( fx.session.status(), SongStatus::Stopped );
        assert_eq!( fx.states(), vec![ SinkState::Closed, SinkState::Closed ] );
        assert_eq!( fx.backend.live_bindings(), 0 );
    }


    #[test]
    fn test_completion_while_paused_stops() {
        let fx = Fixture::dual();
        fx.session.select_track( fx.track( "song.wav" ) );
        fx.session.play().unwrap();
        fx.session.pause().unwrap();
        fx.drain();

        fx.backend.complete( 1, CompletionReason::Failed( "device unplugged".into() ) );

        match fx.events.recv_timeout( WAIT ).unwrap() {
            SessionEvent::PlaybackFailed { sink, message } => {
                assert_eq!( sink, "speakers" );
                assert_eq!( message, "device unplugged" );
            }
            other => panic!( "unexpected event {:?}", other ),
        }
        assert_eq!( fx.next_status(), SongStatus::Stopped );
        assert_eq!( fx.backend.live_bindings(), 0 );
    }


    #[test]
    fn test_stale_completion_is_ignored() {
        let fx = Fixture::dual();
        fx.session.select_track( fx.track( "song.wav" ) );
        fx.session.play().unwrap();
        fx.session.stop();
        fx.session.play().unwrap();
        fx.drain();

        // bindings 0 and 1 belong to the first run
        fx.backend.complete( 0, CompletionReason::EndOfStream );
        fx.backend.complete( 1, CompletionReason::EndOfStream );
        assert!( fx.events.recv_timeout( Duration::from_millis( 200 ) ).is_err() );
        assert_eq!( fx.session.status(), SongStatus::Playing );

        fx.backend.complete( 3, CompletionReason::EndOfStream );
        assert_eq!( fx.next_status(), SongStatus::Stopped );
    }


    #[test]
    fn test_missing_cable_fails_with_device_init() {
        let fx = Fixture::new( &[ "Speakers" ], &dual_specs() );
        fx.session.select_track( fx.track( "song.wav" ) );

        let err = fx.session.play().unwrap_err();
        assert_eq!( err.kind(), ErrorKind::DeviceInit );
        assert_eq!( fx.session.status(), SongStatus::Stopped );
        assert_eq!( fx.states(), vec![ SinkState::Closed, SinkState::Closed ] );
        assert_eq!( fx.backend.bind_count(), 0 );
    }


    #[test]
    fn test_second_sink_failure_rolls_back_first() {
        let fx = Fixture::dual();
        fx.backend.fail_bind( DeviceId::Default );
        fx.session.select_track( fx.track( "song.wav" ) );

        let err = fx.session.play().unwrap_err();
        assert_eq!( err.kind(), ErrorKind::DeviceInit );
        assert_eq!( fx.session.status(), SongStatus::Stopped );
        assert_eq!( fx.states(), vec![ SinkState::Closed, SinkState::Closed ] );
        assert_eq!( fx.backend.live_bindings(), 0 );

        fx.backend.heal();
        fx.session.play().unwrap();
        assert_eq!( fx.session.status(), SongStatus::Playing );
    }


    #[test]
    fn test_unreadable_track_is_invalid_track() {
        let fx = Fixture::dual();
        fx.session.select_track( fx.dir.path().join( "gone.wav" ) );

        let err = fx.session.play().unwrap_err();
        assert_eq!( err.kind(), ErrorKind::InvalidTrack );
        assert_eq!( fx.states(), vec![ SinkState::Closed, SinkState::Closed ] );
    }


    #[test]
    fn test_failed_pause_keeps_playing() {
        let fx = Fixture::dual();
        fx.session.select_track( fx.track( "song.wav" ) );
        fx.session.play().unwrap();
        fx.backend.fail_pause( DeviceId::Default );

        assert!( fx.session.pause().is_err() );
        assert_eq!( fx.session.status(), SongStatus::Playing );
        assert_eq!( fx.states(), vec![ SinkState::Playing, SinkState::Playing ] );
        assert_eq!( fx.backend.calls( 0 ), vec![ "play", "pause", "play" ] );
    }


    #[test]
    fn test_failed_resume_keeps_paused() {
        let fx = Fixture::dual();
        fx.session.select_track( fx.track( "song.wav" ) );
        fx.session.play().unwrap();
        fx.session.pause().unwrap();
        fx.backend.fail_play( DeviceId::Default );

        assert!( fx.session.play().is_err() );
        assert_eq!( fx.session.status(), SongStatus::Paused );
        assert_eq!( fx.states(), vec![ SinkState::Paused, SinkState::Paused ] );
    }


    #[test]
    fn test_lockstep_violation_is_invalid_state() {
        let fx = Fixture::dual();
        fx.session.select_track( fx.track( "song.wav" ) );
        fx.session.play().unwrap();
        fx.session.state.lock().sinks[ 1 ].close();

        let err = fx.session.pause().unwrap_err();
        assert_eq!( err.kind(), ErrorKind::InvalidState );
        assert!( matches!( fx.session.play(), Err( SessionError::InvalidState( _ ) ) ) );

        fx.session.stop();
        assert_eq!( fx.session.status(), SongStatus::Stopped );
        fx.session.play().unwrap();
        assert_eq!( fx.session.status(), SongStatus::Playing );
    }


    #[test]
    fn test_status_events_carry_names() {
        let fx = Fixture::dual();
        let path = fx.track( "rimshot.wav" );
        fx.session.select_track( &path );
        fx.session.select_track( &path );
        fx.session.play().unwrap();

        let events = fx.drain();
        assert_eq!( events, vec![
            SessionEvent::StatusChanged {
                status: SongStatus::Stopped,
                now_playing: None,
                selected: Some( "rimshot".into() ),
            },
            SessionEvent::StatusChanged {
                status: SongStatus::Playing,
                now_playing: Some( "rimshot".into() ),
                selected: Some( "rimshot".into() ),
            },
        ]);
    }


    #[test]
    fn test_clear_selection() {
        let fx = Fixture::dual();
        fx.session.select_track( fx.track( "song.wav" ) );
        fx.session.play().unwrap();
        fx.drain();

        fx.session.clear_selection();
        assert_eq!( fx.session.selected_track(), None );
        assert_eq!( fx.session.status(), SongStatus::Playing );
        assert_eq!( fx.next_status(), SongStatus::Playing );

        // nothing to clear, nothing published
        fx.session.clear_selection();
        assert!( fx.drain().is_empty() );

        fx.session.stop();
        fx.drain();
        fx.session.play().unwrap();
        assert_eq!( fx.session.status(), SongStatus::Stopped );
        assert_eq!( fx.backend.bind_count(), 2 );
    }


    #[test]
    fn test_select_by_name_uses_catalog() {
        let fx = Fixture::dual();
        let path = fx.track( "bell.wav" );
        fx.session.catalog().write().import( "bell.wav", &path );

        fx.session.select_by_name( "bell.wav" ).unwrap();
        assert_eq!( fx.session.selected_track(), Some( path ) );

        let err = fx.session.select_by_name( "nope.wav" ).unwrap_err();
        assert_eq!( err.kind(), ErrorKind::InvalidTrack );
    }


    #[test]
    fn test_single_sink_session() {
        let fx = Fixture::new(
            &[ "Speakers" ],
            &[ SinkSpec::new( "speakers", SinkTarget::DefaultDevice ) ],
        );
        fx.session.select_track( fx.track( "song.wav" ) );
        fx.session.play().unwrap();
        assert_eq!( fx.session.sink_count(), 1 );
        assert_eq!( fx.states(), vec![ SinkState::Playing ] );

        let info = fx.session.now_playing_info().unwrap();
        assert_eq!( info.name, "song" );
        assert_eq!( info.tags.channels, Some( 2 ) );
    }


    #[test]
    fn test_set_sink_volume() {
        let fx = Fixture::dual();
        fx.session.set_sink_volume( 1, 0.8 ).unwrap();
        assert_eq!( fx.session.sinks()[ 1 ].volume, 0.8 );
        assert!( matches!( fx.session.set_sink_volume( 5, 0.1 ), Err( SessionError::UnknownSink( 5 ) ) ) );
    }


    #[test]
    fn test_drop_releases_bindings() {
        let fx = Fixture::dual();
        fx.session.select_track( fx.track( "song.wav" ) );
        fx.session.play().unwrap();
        let backend = fx.backend.clone();

        drop( fx );
        assert_eq!( backend.live_bindings(), 0 );
    }
}
