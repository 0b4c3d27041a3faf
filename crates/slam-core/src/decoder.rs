//! Audio decoding via Symphonia
//!
//! Turns a file on disk into interleaved `f32` PCM packets.

use std::fs::File;
use std::path::Path;

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{ Decoder as SymphoniaDecoder, DecoderOptions, CODEC_TYPE_NULL };
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{ FormatOptions, FormatReader, SeekMode, SeekTo };
use symphonia::core::io::{ MediaSourceStream, MediaSourceStreamOptions };
use symphonia::core::meta::{ MetadataOptions, StandardTagKey, Tag };
use symphonia::core::probe::{ Hint, ProbedMetadata };
use symphonia::core::units::Time;
use thiserror::Error;


/// Tags and stream facts read from a track.
#[derive( Debug, Clone, Default, PartialEq )]
pub struct TrackTags {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    pub codec: Option<String>,
    pub sample_rate: Option<u32>,
    pub channels: Option<u32>,
}


/// Errors that can occur during decoding.
#[derive( Debug, Error )]
pub enum DecoderError {
    #[error( "Failed to open file: {0}" )]
    FileOpen( #[from] std::io::Error ),

    #[error( "Unsupported format" )]
    UnsupportedFormat,

    #[error( "No audio tracks found" )]
    NoAudioTrack,

    #[error( "Decoder creation failed: {0}" )]
    DecoderCreation( String ),

    #[error( "Decode error: {0}" )]
    Decode( String ),

    #[error( "Seek error: {0}" )]
    Seek( String ),
}


/// Symphonia format reader and codec for the first audio track of a file.
pub struct Decoder {
    format_reader: Box<dyn FormatReader>,
    decoder: Box<dyn SymphoniaDecoder>,
    track_id: u32,
    sample_rate: u32,
    channels: usize,
    sample_buf: Option<SampleBuffer<f32>>,
    duration: Option<f64>,
    probe_metadata: ProbedMetadata,
}


impl Decoder {
    /// Probes `path` and prepares a decoder positioned at the start of the stream.
    pub fn open( path: &Path ) -> Result<Self, DecoderError> {
        let file = File::open( path )?;
        let mss = MediaSourceStream::new( Box::new( file ), MediaSourceStreamOptions::default() );

        let mut hint = Hint::new();
        if let Some( ext ) = path.extension().and_then( |e| e.to_str() ) {
            hint.with_extension( ext );
        }

        let probed = symphonia::default::get_probe()
            .format( &hint, mss, &FormatOptions::default(), &MetadataOptions::default() )
            .map_err( |_| DecoderError::UnsupportedFormat )?;

        let probe_metadata = probed.metadata;
        let format_reader = probed.format;

        let track = format_reader
            .tracks()
            .iter()
            .find( |t| t.codec_params.codec != CODEC_TYPE_NULL )
            .ok_or( DecoderError::NoAudioTrack )?;

        let track_id = track.id;
        let codec_params = &track.codec_params;
        let sample_rate = codec_params.sample_rate.unwrap_or( 44100 );
        let channels = codec_params.channels.map( |c| c.count() ).unwrap_or( 2 );
        let duration = codec_params.n_frames.map( |frames| frames as f64 / sample_rate as f64 );

        let decoder = symphonia::default::get_codecs()
            .make( codec_params, &DecoderOptions::default() )
            .map_err( |e| DecoderError::DecoderCreation( e.to_string() ) )?;

        tracing::debug!(
            "Decoder ready for {:?}: {} Hz, {} channels, duration {:?}s",
            path,
            sample_rate,
            channels,
            duration
        );

        Ok( Self {
            format_reader,
            decoder,
            track_id,
            sample_rate,
            channels,
            sample_buf: None,
            duration,
            probe_metadata,
        })
    }


    pub fn sample_rate( &self ) -> u32 {
        self.sample_rate
    }


    pub fn channels( &self ) -> usize {
        self.channels
    }


    /// Duration in seconds, when the container reports a frame count.
    pub fn duration( &self ) -> Option<f64> {
        self.duration
    }


    /// Collects tags from the probe (ID3 and friends) and then the container.
    ///
    /// The first value seen for a key wins.
    pub fn tags( &mut self ) -> TrackTags {
        let mut tags = TrackTags::default();

        if let Some( log ) = self.probe_metadata.get() {
            if let Some( rev ) = log.current() {
                merge_tags( &mut tags, rev.tags() );
            }
        }
        if let Some( rev ) = self.format_reader.metadata().current() {
            merge_tags( &mut tags, rev.tags() );
        }

        tags.sample_rate = Some( self.sample_rate );
        tags.channels = Some( self.channels as u32 );
        if let Some( track ) = self.format_reader.tracks().iter().find( |t| t.id == self.track_id ) {
            let codec = symphonia::default::get_codecs()
                .get_codec( track.codec_params.codec )
                .map( |d| d.short_name.to_string() );
            tags.codec = codec;
        }

        tags
    }


    /// Decodes the next packet of our track into interleaved samples.
    ///
    /// Returns `None` at end of stream.
    pub fn decode_next( &mut self ) -> Result<Option<Vec<f32>>, DecoderError> {
        loop {
            let packet = match self.format_reader.next_packet() {
                Ok( packet ) => packet,
                Err( SymphoniaError::IoError( ref e ) )
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok( None );
                }
                Err( e ) => return Err( DecoderError::Decode( e.to_string() ) ),
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode( &packet ) {
                Ok( decoded ) => decoded,
                // corrupt packet, skip it
                Err( SymphoniaError::DecodeError( _ ) ) => continue,
                Err( e ) => return Err( DecoderError::Decode( e.to_string() ) ),
            };

            let spec = *decoded.spec();
            let frames = decoded.capacity();

            let needs_alloc = self.sample_buf
                .as_ref()
                .map_or( true, |buf| buf.capacity() < frames );
            if needs_alloc {
                self.sample_buf = Some( SampleBuffer::new( frames as u64, spec ) );
            }

            if let Some( buf ) = self.sample_buf.as_mut() {
                buf.copy_interleaved_ref( decoded );
                return Ok( Some( buf.samples().to_vec() ) );
            }
        }
    }


    /// Seeks to a position in seconds and resets codec state.
    pub fn seek( &mut self, position_secs: f64 ) -> Result<(), DecoderError> {
        let seek_to = SeekTo::Time {
            time: Time::from( position_secs ),
            track_id: Some( self.track_id ),
        };

        self.format_reader
            .seek( SeekMode::Accurate, seek_to )
            .map_err( |e| DecoderError::Seek( e.to_string() ) )?;
        self.decoder.reset();

        Ok(())
    }
}


fn merge_tags( tags: &mut TrackTags, found: &[Tag] ) {
    for tag in found {
        let slot = match tag.std_key {
            Some( StandardTagKey::TrackTitle ) => &mut tags.title,
            Some( StandardTagKey::Artist ) => &mut tags.artist,
            Some( StandardTagKey::Album ) => &mut tags.album,
            _ => continue,
        };
        if slot.is_none() {
            *slot = Some( tag.value.to_string() );
        }
    }
}
