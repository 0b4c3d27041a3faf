//! Audio source lifecycle
//!
//! An [`AudioSource`] owns the decoder for one track. Device bindings borrow
//! it through a [`SourceHandle`] for as long as they are alive.

use std::path::{ Path, PathBuf };
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;

use crate::decoder::{ Decoder, DecoderError, TrackTags };


/// Errors raised while opening a source.
#[derive( Debug, Error )]
pub enum SourceError {
    #[error( "Invalid file path. Did you select a track?" )]
    EmptyPath,

    #[error( "Track not found: {0}" )]
    NotFound( PathBuf ),

    #[error( "Cannot decode {path}: {source}" )]
    Undecodable {
        path: PathBuf,
        #[source]
        source: DecoderError,
    },
}


/// A decodable track, open from `open` until `close`.
pub struct AudioSource {
    path: PathBuf,
    decoder: Option<Arc<Mutex<Decoder>>>,
    sample_rate: u32,
    channels: u16,
    duration: Option<Duration>,
    tags: TrackTags,
}


impl AudioSource {
    /// Opens `path` for decoding, positioned at stream start.
    pub fn open( path: &Path ) -> Result<Self, SourceError> {
        if path.as_os_str().is_empty() {
            return Err( SourceError::EmptyPath );
        }
        if !path.is_file() {
            return Err( SourceError::NotFound( path.to_path_buf() ) );
        }

        let mut decoder = Decoder::open( path ).map_err( |source| SourceError::Undecodable {
            path: path.to_path_buf(),
            source,
        })?;

        let sample_rate = decoder.sample_rate();
        let channels = decoder.channels() as u16;
        let duration = decoder.duration().map( Duration::from_secs_f64 );
        let tags = decoder.tags();

        tracing::info!( "Opened source {:?} ({} Hz, {} ch)", path, sample_rate, channels );

        Ok( Self {
            path: path.to_path_buf(),
            decoder: Some( Arc::new( Mutex::new( decoder ) ) ),
            sample_rate,
            channels,
            duration,
            tags,
        })
    }


    /// Releases the decoder. Safe to call more than once.
    pub fn close( &mut self ) {
        if self.decoder.take().is_some() {
            tracing::debug!( "Closed source {:?}", self.path );
        }
    }


    pub fn is_open( &self ) -> bool {
        self.decoder.is_some()
    }


    /// Path this source was opened from.
    pub fn path( &self ) -> &Path {
        &self.path
    }


    /// File name without directory or extension.
    pub fn display_name( &self ) -> String {
        display_name( &self.path )
    }


    pub fn sample_rate( &self ) -> u32 {
        self.sample_rate
    }


    pub fn channels( &self ) -> u16 {
        self.channels
    }


    pub fn duration( &self ) -> Option<Duration> {
        self.duration
    }


    pub fn tags( &self ) -> &TrackTags {
        &self.tags
    }


    /// Shared handle to the decoder, or `None` once closed.
    pub fn handle( &self ) -> Option<SourceHandle> {
        self.decoder.as_ref().map( |decoder| SourceHandle {
            decoder: Arc::clone( decoder ),
            sample_rate: self.sample_rate,
            channels: self.channels,
        })
    }
}


impl std::fmt::Debug for AudioSource {
    fn fmt( &self, f: &mut std::fmt::Formatter<'_> ) -> std::fmt::Result {
        f.debug_struct( "AudioSource" )
            .field( "path", &self.path )
            .field( "open", &self.is_open() )
            .field( "sample_rate", &self.sample_rate )
            .field( "channels", &self.channels )
            .finish()
    }
}


/// Borrowed access to an open source's decoder.
#[derive( Clone )]
pub struct SourceHandle {
    decoder: Arc<Mutex<Decoder>>,
    sample_rate: u32,
    channels: u16,
}


impl SourceHandle {
    pub fn sample_rate( &self ) -> u32 {
        self.sample_rate
    }


    pub fn channels( &self ) -> u16 {
        self.channels
    }


    /// Decodes the next packet. `None` at end of stream.
    pub fn next_chunk( &self ) -> Result<Option<Vec<f32>>, DecoderError> {
        self.decoder.lock().decode_next()
    }


    pub fn seek( &self, position: Duration ) -> Result<(), DecoderError> {
        self.decoder.lock().seek( position.as_secs_f64() )
    }
}


/// Human readable name for a track path: the file stem.
pub fn display_name( path: &Path ) -> String {
    path.file_stem()
        .or_else( || path.file_name() )
        .map( |s| s.to_string_lossy().into_owned() )
        .unwrap_or_else( || path.to_string_lossy().into_owned() )
}


#[cfg( test )]
pub(crate) mod tests {
    use super::*;

    use tempfile::TempDir;


    /// Writes a short 16-bit sine WAV and returns its path.
    pub(crate) fn write_wav( dir: &Path, name: &str, frames: u32 ) -> PathBuf {
        let path = dir.join( name );
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create( &path, spec ).unwrap();
        for i in 0..frames {
            let t = i as f32 / 8000.0;
            let sample = ( ( t * 440.0 * std::f32::consts::TAU ).sin() * 8000.0 ) as i16;
            writer.write_sample( sample ).unwrap();
            writer.write_sample( sample ).unwrap();
        }
        writer.finalize().unwrap();
        path
    }


    #[test]
    fn test_open_empty_path() {
        let result = AudioSource::open( Path::new( "" ) );
        assert!( matches!( result, Err( SourceError::EmptyPath ) ) );
    }


    #[test]
    fn test_open_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = AudioSource::open( &dir.path().join( "nope.wav" ) );
        assert!( matches!( result, Err( SourceError::NotFound( _ ) ) ) );
    }


    #[test]
    fn test_open_garbage_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join( "noise.mp3" );
        std::fs::write( &path, b"definitely not audio" ).unwrap();
        let result = AudioSource::open( &path );
        assert!( matches!( result, Err( SourceError::Undecodable { .. } ) ) );
    }


    #[test]
    fn test_open_reads_stream_facts() {
        let dir = TempDir::new().unwrap();
        let path = write_wav( dir.path(), "airhorn.wav", 4000 );
        let source = AudioSource::open( &path ).unwrap();

        assert!( source.is_open() );
        assert_eq!( source.path(), path.as_path() );
        assert_eq!( source.sample_rate(), 8000 );
        assert_eq!( source.channels(), 2 );
        assert_eq!( source.display_name(), "airhorn" );
        assert_eq!( source.duration(), Some( Duration::from_millis( 500 ) ) );
    }


    #[test]
    fn test_handle_decodes_until_eof() {
        let dir = TempDir::new().unwrap();
        let path = write_wav( dir.path(), "short.wav", 1000 );
        let source = AudioSource::open( &path ).unwrap();
        let handle = source.handle().unwrap();

        let mut total = 0;
        while let Some( chunk ) = handle.next_chunk().unwrap() {
            total += chunk.len();
        }
        assert_eq!( total, 2000 );
    }


    #[test]
    fn test_seek_skips_ahead() {
        let dir = TempDir::new().unwrap();
        let path = write_wav( dir.path(), "long.wav", 8000 );
        let source = AudioSource::open( &path ).unwrap();
        let handle = source.handle().unwrap();

        handle.seek( Duration::from_millis( 500 ) ).unwrap();

        let mut total = 0;
        while let Some( chunk ) = handle.next_chunk().unwrap() {
            total += chunk.len();
        }
        // seeks land on a packet boundary at or before the target
        let frames = total / 2;
        assert!( ( 3000..=5000 ).contains( &frames ), "{} frames left after seek", frames );
    }


    #[test]
    fn test_close_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let path = write_wav( dir.path(), "a.wav", 100 );
        let mut source = AudioSource::open( &path ).unwrap();

        source.close();
        source.close();
        assert!( !source.is_open() );
        assert!( source.handle().is_none() );
    }


    #[test]
    fn test_display_name_strips_extension() {
        assert_eq!( display_name( Path::new( "/sounds/rimshot.mp3" ) ), "rimshot" );
        assert_eq!( display_name( Path::new( "bell" ) ), "bell" );
    }
}
