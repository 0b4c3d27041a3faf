//! Application settings management
//!
//! Persists the sink layout (virtual cable + speakers) and the imported
//! library between runs.

use std::fs;
use std::path::{ Path, PathBuf };

use serde::{ Deserialize, Serialize };

use slam_core::{ SinkSpec, SinkTarget, VolumeMode };

use crate::cli::Args;


/// Where a sink applies its volume, as stored on disk.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize )]
#[serde( rename_all = "lowercase" )]
pub enum VolumeModeSetting {
    Device,
    Stage,
}


impl From<VolumeModeSetting> for VolumeMode {
    fn from( mode: VolumeModeSetting ) -> Self {
        match mode {
            VolumeModeSetting::Device => VolumeMode::Device,
            VolumeModeSetting::Stage => VolumeMode::Stage,
        }
    }
}


/// Application settings.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct Settings {
    /// Substring matched against output device names to find the virtual cable
    pub cable_pattern: String,
    pub cable_enabled: bool,
    pub cable_volume: f32,
    pub cable_volume_mode: VolumeModeSetting,

    /// Monitor the board on the default output device
    pub speakers_enabled: bool,
    pub speakers_volume: f32,
    pub speakers_volume_mode: VolumeModeSetting,

    /// Track files re-imported on start
    pub library: Vec<PathBuf>,
}


impl Default for Settings {
    fn default() -> Self {
        Self {
            cable_pattern: "CABLE Input".to_string(),
            cable_enabled: true,
            cable_volume: 1.0,
            cable_volume_mode: VolumeModeSetting::Stage,
            speakers_enabled: true,
            speakers_volume: 0.5,
            speakers_volume_mode: VolumeModeSetting::Device,
            library: Vec::new(),
        }
    }
}


impl Settings {
    /// Returns the directory holding settings and logs.
    pub fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "slam" ) )
    }


    /// Returns the path to the settings file.
    pub fn default_path() -> Option<PathBuf> {
        Self::config_dir().map( |p| p.join( "settings.json" ) )
    }


    /// Loads settings from disk, or returns defaults if missing or unreadable.
    pub fn load_from( path: &Path ) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string( path ) {
            Ok( contents ) => {
                serde_json::from_str( &contents ).unwrap_or_else( |e| {
                    tracing::warn!( "Ignoring malformed settings {:?}: {}", path, e );
                    Self::default()
                })
            }
            Err( e ) => {
                tracing::warn!( "Failed to read settings: {}", e );
                Self::default()
            }
        }
    }


    /// Saves settings to disk.
    pub fn save_to( &self, path: &Path ) {
        if let Some( parent ) = path.parent() {
            if !parent.exists() {
                if let Err( e ) = fs::create_dir_all( parent ) {
                    tracing::warn!( "Failed to create settings directory: {}", e );
                    return;
                }
            }
        }

        match serde_json::to_string_pretty( self ) {
            Ok( json ) => {
                if let Err( e ) = fs::write( path, json ) {
                    tracing::warn!( "Failed to save settings: {}", e );
                }
            }
            Err( e ) => {
                tracing::warn!( "Failed to serialize settings: {}", e );
            }
        }
    }


    /// Sink layout for this run, with command-line overrides applied.
    /// The cable comes first so it is always driven before the speakers.
    pub fn sink_specs( &self, args: &Args ) -> Vec<SinkSpec> {
        let mut specs = Vec::new();

        if self.cable_enabled && !args.no_cable {
            let pattern = args.cable.clone().unwrap_or_else( || self.cable_pattern.clone() );
            specs.push(
                SinkSpec::new( "cable", SinkTarget::NamePattern( pattern ) )
                    .with_volume( self.cable_volume )
                    .with_mode( self.cable_volume_mode.into() ),
            );
        }
        if self.speakers_enabled && !args.no_speakers {
            specs.push(
                SinkSpec::new( "speakers", SinkTarget::DefaultDevice )
                    .with_volume( self.speakers_volume )
                    .with_mode( self.speakers_volume_mode.into() ),
            );
        }

        specs
    }
}


#[cfg( test )]
mod tests {
    use super::*;

    use clap::Parser;
    use tempfile::TempDir;


    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load_from( &dir.path().join( "settings.json" ) );
        assert_eq!( settings, Settings::default() );
    }


    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join( "nested" ).join( "settings.json" );

        let mut settings = Settings::default();
        settings.cable_pattern = "VoiceMeeter Input".into();
        settings.speakers_volume_mode = VolumeModeSetting::Stage;
        settings.library.push( PathBuf::from( "/sfx/airhorn.mp3" ) );
        settings.save_to( &path );

        assert_eq!( Settings::load_from( &path ), settings );
    }


    #[test]
    fn test_partial_and_malformed_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join( "settings.json" );

        fs::write( &path, r#"{ "speakers_enabled": false }"# ).unwrap();
        let settings = Settings::load_from( &path );
        assert!( !settings.speakers_enabled );
        assert_eq!( settings.cable_pattern, "CABLE Input" );

        fs::write( &path, "{ not json" ).unwrap();
        assert_eq!( Settings::load_from( &path ), Settings::default() );
    }


    #[test]
    fn test_sink_specs_follow_settings_and_flags() {
        let settings = Settings::default();

        let specs = settings.sink_specs( &Args::parse_from( [ "slam" ] ) );
        assert_eq!( specs.len(), 2 );
        assert_eq!( specs[ 0 ].target, SinkTarget::NamePattern( "CABLE Input".into() ) );
        assert_eq!( specs[ 0 ].mode, VolumeMode::Stage );
        assert_eq!( specs[ 1 ].target, SinkTarget::DefaultDevice );
        assert_eq!( specs[ 1 ].volume, 0.5 );

        let specs = settings.sink_specs( &Args::parse_from( [ "slam", "--cable", "VB-Audio" ] ) );
        assert_eq!( specs[ 0 ].target, SinkTarget::NamePattern( "VB-Audio".into() ) );

        let specs = settings.sink_specs( &Args::parse_from( [ "slam", "--no-speakers" ] ) );
        assert_eq!( specs.len(), 1 );
        assert_eq!( specs[ 0 ].label, "cable" );

        let specs = settings.sink_specs( &Args::parse_from( [ "slam", "--no-cable", "--no-speakers" ] ) );
        assert!( specs.is_empty() );
    }
}
