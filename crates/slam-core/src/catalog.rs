//! Track catalog
//!
//! Owns track identity for the soundboard. Tracks are keyed by display name;
//! importing a name that already exists replaces that entry in place.

use std::fs;
use std::path::{ Path, PathBuf };

use thiserror::Error;


/// Extensions offered for import.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp3", "wav", "opus", "ogg", "flac", "m4a", "aac",
];


/// Errors that can occur while importing tracks.
#[derive( Debug, Error )]
pub enum CatalogError {
    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "Not a file: {0}" )]
    NotAFile( PathBuf ),

    #[error( "Unsupported file type: {0}" )]
    Unsupported( PathBuf ),
}


/// A track the user imported.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct TrackReference {
    pub name: String,
    pub path: PathBuf,
    /// File contents, only when imported eagerly.
    pub bytes: Option<Vec<u8>>,
}


/// Imported tracks in import order.
#[derive( Debug, Default )]
pub struct TrackCatalog {
    tracks: Vec<TrackReference>,
}


impl TrackCatalog {
    pub fn new() -> Self {
        Self::default()
    }


    /// Registers `path` under `name`. Returns the entry it replaced, if any.
    pub fn import( &mut self, name: impl Into<String>, path: impl Into<PathBuf> ) -> Option<TrackReference> {
        self.insert( TrackReference {
            name: name.into(),
            path: path.into(),
            bytes: None,
        })
    }


    /// Imports a file under its file name (extension included).
    pub fn import_file( &mut self, path: &Path ) -> Result<String, CatalogError> {
        let name = Self::check_file( path )?;
        self.import( name.clone(), path );
        Ok( name )
    }


    /// Like [`import_file`](Self::import_file) but also reads the whole file into memory.
    pub fn import_file_with_bytes( &mut self, path: &Path ) -> Result<String, CatalogError> {
        let name = Self::check_file( path )?;
        let bytes = fs::read( path )?;
        self.insert( TrackReference {
            name: name.clone(),
            path: path.to_path_buf(),
            bytes: Some( bytes ),
        });
        Ok( name )
    }


    /// Imports every supported file directly inside `dir`, sorted by file name.
    pub fn import_dir( &mut self, dir: &Path ) -> Result<Vec<String>, CatalogError> {
        let mut files: Vec<PathBuf> = fs::read_dir( dir )?
            .flatten()
            .map( |entry| entry.path() )
            .filter( |path| path.is_file() && is_audio_file( path ) )
            .collect();
        files.sort();

        let mut names = Vec::with_capacity( files.len() );
        for file in files {
            names.push( self.import_file( &file )? );
        }
        tracing::info!( "Imported {} tracks from {:?}", names.len(), dir );
        Ok( names )
    }


    /// Full path for a display name.
    pub fn resolve( &self, name: &str ) -> Option<&Path> {
        self.get( name ).map( |t| t.path.as_path() )
    }


    pub fn get( &self, name: &str ) -> Option<&TrackReference> {
        self.tracks.iter().find( |t| t.name == name )
    }


    pub fn position( &self, name: &str ) -> Option<usize> {
        self.tracks.iter().position( |t| t.name == name )
    }


    pub fn remove( &mut self, name: &str ) -> Option<TrackReference> {
        let index = self.position( name )?;
        Some( self.tracks.remove( index ) )
    }


    pub fn names( &self ) -> impl Iterator<Item = &str> {
        self.tracks.iter().map( |t| t.name.as_str() )
    }


    pub fn tracks( &self ) -> &[TrackReference] {
        &self.tracks
    }


    pub fn len( &self ) -> usize {
        self.tracks.len()
    }


    pub fn is_empty( &self ) -> bool {
        self.tracks.is_empty()
    }


    fn insert( &mut self, track: TrackReference ) -> Option<TrackReference> {
        tracing::debug!( "Importing {:?} as {:?}", track.path, track.name );
        match self.position( &track.name ) {
            Some( index ) => Some( std::mem::replace( &mut self.tracks[ index ], track ) ),
            None => {
                self.tracks.push( track );
                None
            }
        }
    }


    fn check_file( path: &Path ) -> Result<String, CatalogError> {
        if !path.is_file() {
            return Err( CatalogError::NotAFile( path.to_path_buf() ) );
        }
        if !is_audio_file( path ) {
            return Err( CatalogError::Unsupported( path.to_path_buf() ) );
        }
        path.file_name()
            .map( |n| n.to_string_lossy().into_owned() )
            .ok_or_else( || CatalogError::NotAFile( path.to_path_buf() ) )
    }
}


/// Checks if a file has a supported audio extension.
pub fn is_audio_file( path: &Path ) -> bool {
    path.extension()
        .and_then( |e| e.to_str() )
        .map( |e| SUPPORTED_EXTENSIONS.contains( &e.to_lowercase().as_str() ) )
        .unwrap_or( false )
}


#[cfg( test )]
mod tests {
    use super::*;

    use tempfile::TempDir;


    fn touch( dir: &Path, name: &str, contents: &[u8] ) -> PathBuf {
        let path = dir.join( name );
        fs::write( &path, contents ).unwrap();
        path
    }


    #[test]
    fn test_import_and_resolve() {
        let mut catalog = TrackCatalog::new();
        assert!( catalog.import( "airhorn.mp3", "/sfx/airhorn.mp3" ).is_none() );
        assert_eq!( catalog.resolve( "airhorn.mp3" ), Some( Path::new( "/sfx/airhorn.mp3" ) ) );
        assert_eq!( catalog.resolve( "missing" ), None );
    }


    #[test]
    fn test_import_same_name_replaces_in_place() {
        let mut catalog = TrackCatalog::new();
        catalog.import( "a.mp3", "/one/a.mp3" );
        catalog.import( "b.mp3", "/one/b.mp3" );

        let old = catalog.import( "a.mp3", "/two/a.mp3" ).unwrap();
        assert_eq!( old.path, PathBuf::from( "/one/a.mp3" ) );
        assert_eq!( catalog.len(), 2 );
        assert_eq!( catalog.names().collect::<Vec<_>>(), vec![ "a.mp3", "b.mp3" ] );
        assert_eq!( catalog.resolve( "a.mp3" ), Some( Path::new( "/two/a.mp3" ) ) );
    }


    #[test]
    fn test_import_file_uses_file_name() {
        let dir = TempDir::new().unwrap();
        let path = touch( dir.path(), "Rimshot.WAV", b"x" );
        let mut catalog = TrackCatalog::new();

        assert_eq!( catalog.import_file( &path ).unwrap(), "Rimshot.WAV" );
        assert!( catalog.get( "Rimshot.WAV" ).unwrap().bytes.is_none() );
    }


    #[test]
    fn test_import_file_rejects_bad_input() {
        let dir = TempDir::new().unwrap();
        let text = touch( dir.path(), "notes.txt", b"x" );
        let mut catalog = TrackCatalog::new();

        assert!( matches!( catalog.import_file( &text ), Err( CatalogError::Unsupported( _ ) ) ) );
        assert!( matches!( catalog.import_file( dir.path() ), Err( CatalogError::NotAFile( _ ) ) ) );
        assert!( catalog.is_empty() );
    }


    #[test]
    fn test_import_with_bytes() {
        let dir = TempDir::new().unwrap();
        let path = touch( dir.path(), "bell.ogg", b"OggS" );
        let mut catalog = TrackCatalog::new();

        let name = catalog.import_file_with_bytes( &path ).unwrap();
        assert_eq!( catalog.get( &name ).unwrap().bytes.as_deref(), Some( &b"OggS"[ .. ] ) );
    }


    #[test]
    fn test_import_dir_filters_and_sorts() {
        let dir = TempDir::new().unwrap();
        touch( dir.path(), "b.mp3", b"x" );
        touch( dir.path(), "a.wav", b"x" );
        touch( dir.path(), "cover.jpg", b"x" );
        fs::create_dir( dir.path().join( "nested.mp3" ) ).unwrap();

        let mut catalog = TrackCatalog::new();
        let names = catalog.import_dir( dir.path() ).unwrap();
        assert_eq!( names, vec![ "a.wav", "b.mp3" ] );
    }


    #[test]
    fn test_remove() {
        let mut catalog = TrackCatalog::new();
        catalog.import( "a.mp3", "/a.mp3" );
        assert!( catalog.remove( "a.mp3" ).is_some() );
        assert!( catalog.remove( "a.mp3" ).is_none() );
        assert!( catalog.is_empty() );
    }
}
