//! cpal-backed output devices
//!
//! Each binding owns one cpal stream plus a decode thread that feeds it.

use std::sync::atomic::{ AtomicBool, Ordering };
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use cpal::traits::{ DeviceTrait, HostTrait, StreamTrait };
use rubato::{ FastFixedOut, PolynomialDegree, Resampler };

use crate::output::{
    BindRequest, CompletionNotifier, CompletionReason, DeviceBinding, DeviceBuffer, DeviceId,
    OutputBackend, OutputError, VolumeMode, VolumeStage,
};
use crate::source::SourceHandle;


/// Output backend over the host's default cpal audio host.
#[derive( Debug, Default, Clone, Copy )]
pub struct CpalBackend;


impl CpalBackend {
    pub fn new() -> Self {
        Self
    }


    fn resolve( &self, id: DeviceId ) -> Result<cpal::Device, OutputError> {
        match id {
            DeviceId::NotFound => Err( OutputError::DeviceNotFound ),
            DeviceId::Default => cpal::default_host()
                .default_output_device()
                .ok_or( OutputError::NoDevice ),
            DeviceId::Index( index ) => cpal::default_host()
                .output_devices()
                .map_err( |e| OutputError::Enumerate( e.to_string() ) )?
                .nth( index )
                .ok_or( OutputError::DeviceNotFound ),
        }
    }
}


impl OutputBackend for CpalBackend {
    fn output_device_names( &self ) -> Result<Vec<String>, OutputError> {
        let host = cpal::default_host();
        let devices = host
            .output_devices()
            .map_err( |e| OutputError::Enumerate( e.to_string() ) )?;

        // keep unnamed devices so positions line up with DeviceId::Index
        Ok( devices
            .map( |d| d.name().unwrap_or_else( |_| "Unknown device".to_string() ) )
            .collect() )
    }


    fn bind( &self, request: BindRequest ) -> Result<Box<dyn DeviceBinding>, OutputError> {
        let BindRequest { device: id, volume, mode, source, notifier } = request;
        let device = self.resolve( id )?;

        tracing::info!( "Binding output device {} ({:?})", id, device.name() );

        let source_rate = source.sample_rate();
        let source_channels = source.channels();
        let config = pick_config( &device, source_rate, source_channels )?;

        tracing::info!(
            "Output config for {}: {} Hz, {} channels, volume {:.2} ({:?})",
            id,
            config.sample_rate.0,
            config.channels,
            volume,
            mode
        );

        // ~500ms of audio
        let capacity = ( source_rate as usize ) * ( source_channels as usize ) / 2;
        let buffer = Arc::new( DeviceBuffer::new( capacity, source_channels, config.channels ) );
        buffer.set_paused( true );

        let stage = match mode {
            VolumeMode::Device => {
                buffer.set_volume( volume );
                None
            }
            VolumeMode::Stage => Some( VolumeStage::new( volume ) ),
        };

        let callback_buffer = Arc::clone( &buffer );
        let error_notifier = notifier.clone();
        let stream = device
            .build_output_stream(
                &config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    callback_buffer.pop( data );
                },
                move |err| {
                    tracing::error!( "Audio output error: {}", err );
                    error_notifier.notify( CompletionReason::Failed( err.to_string() ) );
                },
                None,
            )
            .map_err( |e| OutputError::BuildStream( e.to_string() ) )?;

        let resampler = if source_rate != config.sample_rate.0 {
            tracing::info!( "Resampling: {} Hz → {} Hz", source_rate, config.sample_rate.0 );
            let resampler = FastFixedOut::<f32>::new(
                config.sample_rate.0 as f64 / source_rate as f64,
                2.0,
                PolynomialDegree::Cubic,
                1024,
                source_channels as usize,
            ).map_err( |e| OutputError::Resampler( e.to_string() ) )?;
            Some( resampler )
        } else {
            None
        };

        let stop_flag = Arc::new( AtomicBool::new( false ) );
        let feeder = DecodeFeeder {
            source,
            buffer: Arc::clone( &buffer ),
            stage: stage.clone(),
            resampler,
            stop_flag: Arc::clone( &stop_flag ),
            notifier,
        };
        let thread = thread::Builder::new()
            .name( format!( "slam-decode-{}", id ) )
            .spawn( move || feeder.run() )
            .map_err( |e| OutputError::BuildStream( e.to_string() ) )?;

        Ok( Box::new( CpalBinding {
            stream: StreamHandle( stream ),
            buffer,
            stage,
            stop_flag,
            thread: Some( thread ),
        }))
    }
}


/// Picks a stream config for the source format.
///
/// Priority: exact channel and rate match, then any config with the rate,
/// then the device default.
fn pick_config(
    device: &cpal::Device,
    sample_rate: u32,
    channels: u16,
) -> Result<cpal::StreamConfig, OutputError> {
    let supported: Vec<_> = device
        .supported_output_configs()
        .map_err( |e| OutputError::StreamConfig( e.to_string() ) )?
        .collect();

    let supports_rate = |c: &cpal::SupportedStreamConfigRange| {
        c.min_sample_rate().0 <= sample_rate && c.max_sample_rate().0 >= sample_rate
    };

    if let Some( range ) = supported.iter().find( |c| c.channels() == channels && supports_rate( c ) ) {
        return Ok( range.clone().with_sample_rate( cpal::SampleRate( sample_rate ) ).config() );
    }
    if let Some( range ) = supported.iter().find( |c| supports_rate( c ) ) {
        tracing::info!(
            "Channel conversion: file has {} channels, device using {}",
            channels,
            range.channels()
        );
        return Ok( range.clone().with_sample_rate( cpal::SampleRate( sample_rate ) ).config() );
    }

    let default = device
        .default_output_config()
        .map_err( |e| OutputError::StreamConfig( e.to_string() ) )?;
    tracing::warn!(
        "Device does not support {} Hz, using default {} Hz",
        sample_rate,
        default.sample_rate().0
    );
    Ok( default.config() )
}


/// Wrapper that lets a cpal stream live inside a `Send` binding.
///
/// SAFETY: the stream is only touched through `play`/`pause` and dropped by
/// whichever thread owns the binding, always under the session lock. cpal's
/// callback thread is managed internally by cpal.
struct StreamHandle( cpal::Stream );

unsafe impl Send for StreamHandle {}


/// A source bound to a cpal stream.
struct CpalBinding {
    stream: StreamHandle,
    buffer: Arc<DeviceBuffer>,
    stage: Option<VolumeStage>,
    stop_flag: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}


impl DeviceBinding for CpalBinding {
    fn play( &mut self ) -> Result<(), OutputError> {
        let stream = &self.stream.0;
        start_stream( &self.buffer, || {
            stream.play().map_err( |e| OutputError::PlayStream( e.to_string() ) )
        })
    }


    fn pause( &mut self ) -> Result<(), OutputError> {
        self.buffer.set_paused( true );
        // some hosts cannot pause a stream; the paused buffer already emits silence
        if let Err( e ) = self.stream.0.pause() {
            tracing::debug!( "Stream pause not supported: {}", e );
        }
        Ok(())
    }


    fn set_volume( &mut self, volume: f32 ) {
        match &self.stage {
            Some( stage ) => stage.set_volume( volume ),
            None => self.buffer.set_volume( volume ),
        }
    }
}


impl Drop for CpalBinding {
    fn drop( &mut self ) {
        self.stop_flag.store( true, Ordering::Relaxed );
        self.buffer.clear();
        if let Some( thread ) = self.thread.take() {
            let _ = thread.join();
        }
        tracing::debug!( "Released output binding" );
    }
}


/// Starts the stream, then lets the buffer drain into it.
/// A stream that refuses to start leaves the buffer paused.
fn start_stream(
    buffer: &DeviceBuffer,
    play: impl FnOnce() -> Result<(), OutputError>,
) -> Result<(), OutputError> {
    play()?;
    buffer.set_paused( false );
    Ok(())
}


/// Decode thread state: pulls from the source, pushes into the device buffer.
struct DecodeFeeder {
    source: SourceHandle,
    buffer: Arc<DeviceBuffer>,
    stage: Option<VolumeStage>,
    resampler: Option<FastFixedOut<f32>>,
    stop_flag: Arc<AtomicBool>,
    notifier: CompletionNotifier,
}


impl DecodeFeeder {
    fn stopped( &self ) -> bool {
        self.stop_flag.load( Ordering::Relaxed )
    }


    fn run( mut self ) {
        let channels = self.source.channels().max( 1 ) as usize;
        let mut pending: Vec<Vec<f32>> = ( 0..channels ).map( |_| Vec::new() ).collect();
        // keep about 50ms queued ahead of the device
        let target = ( self.source.sample_rate() as usize * channels ) / 20;

        loop {
            if self.stopped() {
                tracing::debug!( "Decode thread: stop requested" );
                return;
            }

            if self.buffer.len() > target {
                thread::sleep( Duration::from_millis( 5 ) );
                continue;
            }

            match self.source.next_chunk() {
                Ok( Some( samples ) ) => {
                    let mut samples = match self.resampler.as_mut() {
                        Some( resampler ) => resample_chunk( resampler, &mut pending, &samples ),
                        None => samples,
                    };
                    self.push_all( &mut samples );
                }
                Ok( None ) => {
                    if let Some( resampler ) = self.resampler.as_mut() {
                        if !pending[ 0 ].is_empty() {
                            match resampler.process_partial( Some( pending.as_slice() ), None ) {
                                Ok( resampled ) => {
                                    let mut tail = interleave( &resampled );
                                    self.push_all( &mut tail );
                                }
                                Err( e ) => tracing::error!( "Final resample error: {}", e ),
                            }
                        }
                    }

                    while !self.buffer.is_empty() && !self.stopped() {
                        thread::sleep( Duration::from_millis( 10 ) );
                    }
                    if !self.stopped() {
                        tracing::info!( "Decode thread: end of stream" );
                        self.notifier.notify( CompletionReason::EndOfStream );
                    }
                    return;
                }
                Err( e ) => {
                    tracing::error!( "Decode error: {}", e );
                    if !self.stopped() {
                        self.notifier.notify( CompletionReason::Failed( e.to_string() ) );
                    }
                    return;
                }
            }
        }
    }


    fn push_all( &self, samples: &mut [f32] ) {
        if let Some( stage ) = &self.stage {
            stage.apply( samples );
        }
        let mut offset = 0;
        while offset < samples.len() && !self.stopped() {
            let pushed = self.buffer.push( &samples[ offset.. ] );
            offset += pushed;
            if pushed == 0 {
                thread::sleep( Duration::from_millis( 5 ) );
            }
        }
    }
}


/// Feeds interleaved samples into the resampler's planar input and returns
/// whatever full output chunks are ready, interleaved.
fn resample_chunk(
    resampler: &mut FastFixedOut<f32>,
    pending: &mut [Vec<f32>],
    samples: &[f32],
) -> Vec<f32> {
    let channels = pending.len();
    for frame in samples.chunks( channels ) {
        for ( ch, sample ) in frame.iter().enumerate() {
            pending[ ch ].push( *sample );
        }
    }

    let mut out = Vec::new();
    while pending[ 0 ].len() >= resampler.input_frames_next() {
        let needed = resampler.input_frames_next();
        let chunk: Vec<Vec<f32>> = pending
            .iter_mut()
            .map( |ch| ch.drain( ..needed ).collect() )
            .collect();

        match resampler.process( &chunk, None ) {
            Ok( resampled ) => out.extend( interleave( &resampled ) ),
            Err( e ) => {
                tracing::error!( "Resample error: {}", e );
                break;
            }
        }
    }
    out
}


/// Planar to interleaved: [[L0, L1], [R0, R1]] → [L0, R0, L1, R1].
fn interleave( channels: &[Vec<f32>] ) -> Vec<f32> {
    let frames = channels.first().map_or( 0, |c| c.len() );
    let mut out = Vec::with_capacity( frames * channels.len() );
    for f in 0..frames {
        for ch in channels {
            out.push( ch[ f ] );
        }
    }
    out
}


#[cfg( test )]
mod tests {
    use super::*;

    use std::path::Path;
    use std::sync::mpsc;
    use std::time::Instant;

    use tempfile::TempDir;

    use crate::output::Completion;
    use crate::source::tests::write_wav;
    use crate::source::AudioSource;


    const WAIT: Duration = Duration::from_secs( 5 );


    /// A feeder over a freshly written WAV, wired to a completion channel.
    fn feeder( path: &Path ) -> ( DecodeFeeder, Arc<DeviceBuffer>, Arc<AtomicBool>, mpsc::Receiver<Completion> ) {
        let source = AudioSource::open( path ).unwrap();
        let ( tx, rx ) = mpsc::channel();
        let buffer = Arc::new( DeviceBuffer::new( 8000, 2, 2 ) );
        let stop_flag = Arc::new( AtomicBool::new( false ) );
        let feeder = DecodeFeeder {
            source: source.handle().unwrap(),
            buffer: Arc::clone( &buffer ),
            stage: None,
            resampler: None,
            stop_flag: Arc::clone( &stop_flag ),
            notifier: CompletionNotifier::new( 0, 3, move |c| { let _ = tx.send( c ); } ),
        };
        ( feeder, buffer, stop_flag, rx )
    }


    #[test]
    fn test_interleave() {
        let planar = vec![ vec![ 1.0, 2.0 ], vec![ -1.0, -2.0 ] ];
        assert_eq!( interleave( &planar ), vec![ 1.0, -1.0, 2.0, -2.0 ] );
        assert!( interleave( &[] ).is_empty() );
    }


    #[test]
    fn test_resample_chunk_buffers_short_input() {
        let mut resampler = FastFixedOut::<f32>::new(
            2.0,
            2.0,
            PolynomialDegree::Linear,
            1024,
            2,
        ).unwrap();
        let mut pending = vec![ Vec::new(), Vec::new() ];

        let out = resample_chunk( &mut resampler, &mut pending, &[ 0.0; 8 ] );
        assert!( out.is_empty() );
        assert_eq!( pending[ 0 ].len(), 4 );
        assert_eq!( pending[ 1 ].len(), 4 );
    }


    #[test]
    fn test_unbindable_device_is_rejected() {
        let backend = CpalBackend::new();
        assert!( matches!( backend.resolve( DeviceId::NotFound ), Err( OutputError::DeviceNotFound ) ) );
    }


    #[test]
    fn test_feeder_completes_after_buffer_drains() {
        let dir = TempDir::new().unwrap();
        let path = write_wav( dir.path(), "blip.wav", 2000 );
        let ( feeder, buffer, _stop, rx ) = feeder( &path );
        let worker = thread::spawn( move || feeder.run() );

        let mut popped = 0;
        let mut out = [0.0_f32; 256];
        let deadline = Instant::now() + WAIT;
        let completion = loop {
            assert!( Instant::now() < deadline, "feeder never completed" );
            if let Ok( completion ) = rx.try_recv() {
                break completion;
            }
            popped += buffer.pop( &mut out );
            thread::sleep( Duration::from_millis( 1 ) );
        };
        worker.join().unwrap();

        assert_eq!( completion, Completion { sink: 0, generation: 3, reason: CompletionReason::EndOfStream } );
        assert!( buffer.is_empty() );
        assert_eq!( popped, 4000 );
        assert!( rx.try_recv().is_err() );
    }


    #[test]
    fn test_stopped_feeder_never_completes() {
        let dir = TempDir::new().unwrap();
        let path = write_wav( dir.path(), "blip.wav", 2000 );
        let ( feeder, buffer, stop, rx ) = feeder( &path );
        // nobody pops, so the feeder is still waiting on the buffer when stopped
        let worker = thread::spawn( move || feeder.run() );

        let deadline = Instant::now() + WAIT;
        while buffer.is_empty() {
            assert!( Instant::now() < deadline, "feeder never pushed" );
            thread::sleep( Duration::from_millis( 1 ) );
        }
        stop.store( true, Ordering::Relaxed );
        worker.join().unwrap();

        assert!( rx.recv_timeout( Duration::from_millis( 100 ) ).is_err() );
    }


    #[test]
    fn test_failed_start_keeps_buffer_paused() {
        let buffer = DeviceBuffer::new( 16, 2, 2 );
        buffer.set_paused( true );

        let result = start_stream( &buffer, || Err( OutputError::PlayStream( "device busy".into() ) ) );
        assert!( matches!( result, Err( OutputError::PlayStream( _ ) ) ) );
        assert!( buffer.is_paused() );

        start_stream( &buffer, || Ok(()) ).unwrap();
        assert!( !buffer.is_paused() );
    }
}
