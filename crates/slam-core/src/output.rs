//! Output device abstraction
//!
//! Device identity, the two volume strategies, the shared buffer between a
//! decode thread and a device callback, and the completion notifier a device
//! binding fires when playback ends.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{ AtomicBool, AtomicU32, Ordering };
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;

use crate::source::SourceHandle;


/// Errors from the device layer.
#[derive( Debug, Error )]
pub enum OutputError {
    #[error( "Output device not found" )]
    DeviceNotFound,

    #[error( "No output device available" )]
    NoDevice,

    #[error( "Failed to enumerate output devices: {0}" )]
    Enumerate( String ),

    #[error( "Failed to get stream config: {0}" )]
    StreamConfig( String ),

    #[error( "Failed to build output stream: {0}" )]
    BuildStream( String ),

    #[error( "Failed to play stream: {0}" )]
    PlayStream( String ),

    #[error( "Failed to pause stream: {0}" )]
    PauseStream( String ),

    #[error( "Failed to create resampler: {0}" )]
    Resampler( String ),
}


/// Which output device a sink targets.
///
/// Resolved once when the sink is built. `NotFound` is the result of a
/// failed name lookup and must never be bound.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Hash )]
pub enum DeviceId {
    /// The host's default output device.
    Default,
    /// Position in the backend's output device list.
    Index( usize ),
    NotFound,
}


impl DeviceId {
    /// Numeric form for logs: `-1` for a lookup miss, `-2` for the default device.
    pub fn raw( self ) -> i64 {
        match self {
            DeviceId::Index( i ) => i as i64,
            DeviceId::NotFound => -1,
            DeviceId::Default => -2,
        }
    }


    pub fn is_available( self ) -> bool {
        self != DeviceId::NotFound
    }
}


impl fmt::Display for DeviceId {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        match self {
            DeviceId::Default => write!( f, "default" ),
            DeviceId::Index( i ) => write!( f, "#{}", i ),
            DeviceId::NotFound => write!( f, "not found" ),
        }
    }
}


/// Where a sink applies its volume.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum VolumeMode {
    /// Gain applied by the device callback when samples leave the buffer.
    #[default]
    Device,
    /// Gain applied by a [`VolumeStage`] between decoder and device buffer.
    Stage,
}


/// Finds the first output device whose name contains `pattern`, ignoring case.
///
/// Any failure resolves to [`DeviceId::NotFound`]; callers decide whether a
/// missing device matters.
pub fn find_device_by_name_pattern( backend: &dyn OutputBackend, pattern: &str ) -> DeviceId {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return DeviceId::NotFound;
    }
    let needle = pattern.to_lowercase();

    let names = match backend.output_device_names() {
        Ok( names ) => names,
        Err( e ) => {
            tracing::warn!( "Device lookup for {:?} failed: {}", pattern, e );
            return DeviceId::NotFound;
        }
    };

    match names.iter().position( |name| name.to_lowercase().contains( &needle ) ) {
        Some( index ) => {
            tracing::info!( "Matched {:?} to output device {:?}", pattern, names[ index ] );
            DeviceId::Index( index )
        }
        None => {
            tracing::warn!( "No output device matches {:?}", pattern );
            DeviceId::NotFound
        }
    }
}


/// Why a binding finished.
#[derive( Debug, Clone, PartialEq, Eq )]
pub enum CompletionReason {
    EndOfStream,
    /// The device or decoder stopped the stream.
    Failed( String ),
}


/// Completion message delivered to the session.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct Completion {
    /// Index of the sink in the session's sink list.
    pub sink: usize,
    /// Sink generation the binding was created under.
    pub generation: u64,
    pub reason: CompletionReason,
}


type Deliver = Arc<dyn Fn( Completion ) + Send + Sync>;


/// One-shot completion signal handed to a device binding.
///
/// Clones share the fired flag, so the decode thread and the device error
/// callback together deliver at most one completion.
#[derive( Clone )]
pub struct CompletionNotifier {
    sink: usize,
    generation: u64,
    fired: Arc<AtomicBool>,
    deliver: Deliver,
}


impl CompletionNotifier {
    pub fn new(
        sink: usize,
        generation: u64,
        deliver: impl Fn( Completion ) + Send + Sync + 'static,
    ) -> Self {
        Self {
            sink,
            generation,
            fired: Arc::new( AtomicBool::new( false ) ),
            deliver: Arc::new( deliver ),
        }
    }


    /// Delivers the completion unless one was already delivered.
    /// Returns true if this call delivered it.
    pub fn notify( &self, reason: CompletionReason ) -> bool {
        if self.fired.swap( true, Ordering::AcqRel ) {
            return false;
        }
        ( self.deliver )( Completion {
            sink: self.sink,
            generation: self.generation,
            reason,
        });
        true
    }


    pub fn has_fired( &self ) -> bool {
        self.fired.load( Ordering::Acquire )
    }
}


impl fmt::Debug for CompletionNotifier {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        f.debug_struct( "CompletionNotifier" )
            .field( "sink", &self.sink )
            .field( "generation", &self.generation )
            .field( "fired", &self.has_fired() )
            .finish()
    }
}


/// Everything a backend needs to bind a source to a device.
pub struct BindRequest {
    pub device: DeviceId,
    pub volume: f32,
    pub mode: VolumeMode,
    pub source: SourceHandle,
    pub notifier: CompletionNotifier,
}


/// A source bound to a device. Dropping it releases the device and stops
/// the decode thread.
pub trait DeviceBinding: Send {
    fn play( &mut self ) -> Result<(), OutputError>;

    fn pause( &mut self ) -> Result<(), OutputError>;

    fn set_volume( &mut self, volume: f32 );
}


/// Device layer behind the sinks.
pub trait OutputBackend: Send + Sync {
    /// Names of the output devices, in the order `DeviceId::Index` refers to.
    fn output_device_names( &self ) -> Result<Vec<String>, OutputError>;

    fn bind( &self, request: BindRequest ) -> Result<Box<dyn DeviceBinding>, OutputError>;
}


/// Lock-free gain value shared between threads.
#[derive( Debug )]
pub struct Gain( AtomicU32 );


impl Gain {
    pub fn new( volume: f32 ) -> Self {
        Self( AtomicU32::new( clamp_volume( volume ).to_bits() ) )
    }


    pub fn set( &self, volume: f32 ) {
        self.0.store( clamp_volume( volume ).to_bits(), Ordering::Relaxed );
    }


    pub fn get( &self ) -> f32 {
        f32::from_bits( self.0.load( Ordering::Relaxed ) )
    }
}


/// Clamps to `[0, 1]`; NaN becomes silence.
pub fn clamp_volume( volume: f32 ) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp( 0.0, 1.0 )
    }
}


/// Volume-adjusting stage inserted between decoder and device buffer.
#[derive( Debug, Clone )]
pub struct VolumeStage {
    gain: Arc<Gain>,
}


impl VolumeStage {
    pub fn new( volume: f32 ) -> Self {
        Self { gain: Arc::new( Gain::new( volume ) ) }
    }


    pub fn set_volume( &self, volume: f32 ) {
        self.gain.set( volume );
    }


    pub fn volume( &self ) -> f32 {
        self.gain.get()
    }


    pub fn apply( &self, samples: &mut [f32] ) {
        let volume = self.gain.get();
        if volume != 1.0 {
            for sample in samples.iter_mut() {
                *sample *= volume;
            }
        }
    }
}


/// Sample queue between a decode thread (producer) and a device callback
/// (consumer). Converts channel layout on the way out and applies the
/// device-side gain.
pub struct DeviceBuffer {
    queue: Mutex<VecDeque<f32>>,
    capacity: usize,
    paused: AtomicBool,
    gain: Gain,
    source_channels: usize,
    output_channels: usize,
}


impl DeviceBuffer {
    /// - `capacity`: maximum number of queued source samples
    /// - `source_channels`: channel count of the pushed samples
    /// - `output_channels`: channel count the device expects
    pub fn new( capacity: usize, source_channels: u16, output_channels: u16 ) -> Self {
        Self {
            queue: Mutex::new( VecDeque::with_capacity( capacity ) ),
            capacity,
            paused: AtomicBool::new( false ),
            gain: Gain::new( 1.0 ),
            source_channels: source_channels.max( 1 ) as usize,
            output_channels: output_channels.max( 1 ) as usize,
        }
    }


    /// Queues as many samples as fit. Returns how many were taken.
    pub fn push( &self, samples: &[f32] ) -> usize {
        let mut queue = self.queue.lock();
        let room = self.capacity.saturating_sub( queue.len() );
        let taken = samples.len().min( room );
        queue.extend( samples[ ..taken ].iter().copied() );
        taken
    }


    /// Fills `output` with whole frames converted to the device layout.
    /// The remainder is silence. Returns the number of samples written.
    pub fn pop( &self, output: &mut [f32] ) -> usize {
        if self.paused.load( Ordering::Relaxed ) {
            output.fill( 0.0 );
            return 0;
        }

        let src = self.source_channels;
        let out = self.output_channels;
        let mut queue = self.queue.lock();

        let frames = ( output.len() / out ).min( queue.len() / src );
        let mut frame = [0.0_f32; 32];
        for f in 0..frames {
            let src_frame = &mut frame[ ..src.min( 32 ) ];
            for ch in 0..src {
                let sample = queue.pop_front().unwrap_or( 0.0 );
                if ch < src_frame.len() {
                    src_frame[ ch ] = sample;
                }
            }
            let dst = &mut output[ f * out..( f + 1 ) * out ];
            remix( src_frame, dst );
        }
        drop( queue );

        let written = frames * out;
        output[ written.. ].fill( 0.0 );

        let volume = self.gain.get();
        if volume != 1.0 {
            for sample in output[ ..written ].iter_mut() {
                *sample *= volume;
            }
        }

        written
    }


    pub fn len( &self ) -> usize {
        self.queue.lock().len()
    }


    pub fn is_empty( &self ) -> bool {
        self.queue.lock().is_empty()
    }


    pub fn clear( &self ) {
        self.queue.lock().clear();
    }


    pub fn set_paused( &self, paused: bool ) {
        self.paused.store( paused, Ordering::Relaxed );
    }


    pub fn is_paused( &self ) -> bool {
        self.paused.load( Ordering::Relaxed )
    }


    pub fn set_volume( &self, volume: f32 ) {
        self.gain.set( volume );
    }


    pub fn volume( &self ) -> f32 {
        self.gain.get()
    }
}


/// Maps one source frame onto one output frame.
fn remix( src: &[f32], dst: &mut [f32] ) {
    match ( src.len(), dst.len() ) {
        ( s, d ) if s == d => dst.copy_from_slice( src ),
        ( 2, 1 ) => dst[ 0 ] = ( src[ 0 ] + src[ 1 ] ) * 0.5,
        ( s, d ) => {
            for ch in 0..d {
                // extra output channels repeat the last source channel
                dst[ ch ] = src[ ch.min( s - 1 ) ];
            }
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;

    use std::sync::mpsc;


    struct NamedDevices( Vec<&'static str> );

    impl OutputBackend for NamedDevices {
        fn output_device_names( &self ) -> Result<Vec<String>, OutputError> {
            Ok( self.0.iter().map( |s| s.to_string() ).collect() )
        }

        fn bind( &self, _request: BindRequest ) -> Result<Box<dyn DeviceBinding>, OutputError> {
            Err( OutputError::NoDevice )
        }
    }


    struct BrokenHost;

    impl OutputBackend for BrokenHost {
        fn output_device_names( &self ) -> Result<Vec<String>, OutputError> {
            Err( OutputError::Enumerate( "host gone".into() ) )
        }

        fn bind( &self, _request: BindRequest ) -> Result<Box<dyn DeviceBinding>, OutputError> {
            Err( OutputError::NoDevice )
        }
    }


    #[test]
    fn test_find_device_matches_substring() {
        let backend = NamedDevices( vec![ "Speakers (Realtek)", "CABLE Input (VB-Audio Virtual Cable)" ] );
        assert_eq!( find_device_by_name_pattern( &backend, "CABLE Input" ), DeviceId::Index( 1 ) );
        assert_eq!( find_device_by_name_pattern( &backend, "cable input" ), DeviceId::Index( 1 ) );
    }


    #[test]
    fn test_find_device_miss_is_not_found() {
        let backend = NamedDevices( vec![ "Speakers (Realtek)" ] );
        let id = find_device_by_name_pattern( &backend, "CABLE Input" );
        assert_eq!( id, DeviceId::NotFound );
        assert_eq!( id.raw(), -1 );
        assert!( !id.is_available() );
    }


    #[test]
    fn test_find_device_empty_pattern_and_broken_host() {
        let backend = NamedDevices( vec![ "Speakers" ] );
        assert_eq!( find_device_by_name_pattern( &backend, "  " ), DeviceId::NotFound );
        assert_eq!( find_device_by_name_pattern( &BrokenHost, "Speakers" ), DeviceId::NotFound );
    }


    #[test]
    fn test_notifier_fires_once() {
        let ( tx, rx ) = mpsc::channel();
        let notifier = CompletionNotifier::new( 1, 7, move |c| { let _ = tx.send( c ); } );
        let other = notifier.clone();

        assert!( notifier.notify( CompletionReason::EndOfStream ) );
        assert!( !other.notify( CompletionReason::Failed( "late".into() ) ) );
        assert!( other.has_fired() );

        let got: Vec<_> = rx.try_iter().collect();
        assert_eq!( got, vec![ Completion { sink: 1, generation: 7, reason: CompletionReason::EndOfStream } ] );
    }


    #[test]
    fn test_buffer_passthrough_with_gain() {
        let buffer = DeviceBuffer::new( 16, 2, 2 );
        buffer.set_volume( 0.5 );
        assert_eq!( buffer.push( &[ 1.0, -1.0, 0.5, 0.25 ] ), 4 );

        let mut out = [9.0; 6];
        assert_eq!( buffer.pop( &mut out ), 4 );
        assert_eq!( out, [ 0.5, -0.5, 0.25, 0.125, 0.0, 0.0 ] );
        assert!( buffer.is_empty() );
    }


    #[test]
    fn test_buffer_mono_to_stereo() {
        let buffer = DeviceBuffer::new( 16, 1, 2 );
        buffer.push( &[ 0.1, 0.2 ] );

        let mut out = [0.0; 4];
        assert_eq!( buffer.pop( &mut out ), 4 );
        assert_eq!( out, [ 0.1, 0.1, 0.2, 0.2 ] );
    }


    #[test]
    fn test_buffer_stereo_to_mono() {
        let buffer = DeviceBuffer::new( 16, 2, 1 );
        buffer.push( &[ 1.0, 0.0, 0.5, 0.5 ] );

        let mut out = [0.0; 2];
        assert_eq!( buffer.pop( &mut out ), 2 );
        assert_eq!( out, [ 0.5, 0.5 ] );
    }


    #[test]
    fn test_buffer_respects_capacity_and_pause() {
        let buffer = DeviceBuffer::new( 3, 1, 1 );
        assert_eq!( buffer.push( &[ 1.0, 1.0, 1.0, 1.0 ] ), 3 );

        buffer.set_paused( true );
        let mut out = [7.0; 2];
        assert_eq!( buffer.pop( &mut out ), 0 );
        assert_eq!( out, [ 0.0, 0.0 ] );
        assert_eq!( buffer.len(), 3 );

        buffer.set_paused( false );
        buffer.clear();
        assert!( buffer.is_empty() );
    }


    #[test]
    fn test_volume_stage_and_clamp() {
        let stage = VolumeStage::new( 2.0 );
        assert_eq!( stage.volume(), 1.0 );

        stage.set_volume( 0.25 );
        let mut samples = [ 1.0, -0.5 ];
        stage.apply( &mut samples );
        assert_eq!( samples, [ 0.25, -0.125 ] );

        assert_eq!( clamp_volume( f32::NAN ), 0.0 );
        assert_eq!( clamp_volume( -1.0 ), 0.0 );
    }
}
