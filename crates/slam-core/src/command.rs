//! Slash command parsing.
//!
//! Commands typed in the front end's command line are parsed here into
//! [`Command`] values the front end then runs against the session.

use std::path::PathBuf;

use thiserror::Error;


/// Errors that can occur during command parsing or execution.
#[derive( Debug, Error )]
pub enum CommandError {
    #[error( "Unknown command: {0}" )]
    Unknown( String ),

    #[error( "Invalid argument: {0}" )]
    InvalidArgument( String ),

    #[error( "Missing argument: {0}" )]
    MissingArgument( String ),

    #[error( "Execution failed: {0}" )]
    ExecutionFailed( String ),
}


/// Parsed slash command.
#[derive( Debug, Clone, PartialEq )]
pub enum Command {
    // Catalog commands
    Import { path: PathBuf },
    Select { name: String },

    // Transport commands
    Play,
    Pause,
    Stop,

    // Output commands
    /// `sink` is 1-based, as shown in the UI.
    Volume { sink: usize, level: u32 },
    Devices,

    Help,
    Quit,
}


impl Command {
    /// Parses a command string (without the leading `/`).
    ///
    /// @param input - The command string to parse
    ///
    /// @returns The parsed command or an error
    pub fn parse( input: &str ) -> Result<Self, CommandError> {
        let input = input.trim();
        let mut parts = input.splitn( 2, ' ' );
        let cmd = parts.next().unwrap_or( "" ).to_lowercase();
        let args = parts.next().map( |s| s.trim() ).filter( |s| !s.is_empty() );

        match cmd.as_str() {
            "import" | "add" | "i" => {
                let path = args
                    .ok_or_else( || CommandError::MissingArgument( "path".into() ) )?;
                Ok( Command::Import { path: PathBuf::from( path ) } )
            }
            "select" | "sel" => {
                let name = args
                    .ok_or_else( || CommandError::MissingArgument( "track name".into() ) )?;
                Ok( Command::Select { name: name.to_string() } )
            }

            "play" | "p" => Ok( Command::Play ),
            "pause" | "pa" => Ok( Command::Pause ),
            "stop" | "st" => Ok( Command::Stop ),

            "vol" | "volume" => {
                let args = args
                    .ok_or_else( || CommandError::MissingArgument( "sink and level".into() ) )?;
                parse_volume( args )
            }
            "devices" | "dev" => Ok( Command::Devices ),

            "help" | "h" => Ok( Command::Help ),
            "quit" | "q" | "exit" => Ok( Command::Quit ),

            "" => Err( CommandError::Unknown( "empty command".into() ) ),
            other => Err( CommandError::Unknown( other.to_string() ) ),
        }
    }


    /// Returns a brief description of the command for help text.
    pub fn description( &self ) -> &'static str {
        match self {
            Command::Import { .. } => "Import a file or folder",
            Command::Select { .. } => "Select a track by name",
            Command::Play => "Play selected track",
            Command::Pause => "Pause playback",
            Command::Stop => "Stop playback",
            Command::Volume { .. } => "Set a sink's volume (0-100)",
            Command::Devices => "List output devices",
            Command::Help => "Show help",
            Command::Quit => "Quit application",
        }
    }
}


/// Parses `<sink> <level>`, e.g. `2 40`.
fn parse_volume( args: &str ) -> Result<Command, CommandError> {
    let mut words = args.split_whitespace();
    let sink_str = words.next().unwrap_or( "" );
    let level_str = words
        .next()
        .ok_or_else( || CommandError::MissingArgument( "volume level".into() ) )?;

    let sink: usize = sink_str.parse()
        .ok()
        .filter( |n| *n >= 1 )
        .ok_or_else( || CommandError::InvalidArgument( format!( "Invalid sink number: {}", sink_str ) ) )?;
    let level: u32 = level_str.trim_end_matches( '%' ).parse()
        .ok()
        .filter( |n| *n <= 100 )
        .ok_or_else( || CommandError::InvalidArgument( format!( "Volume must be 0-100: {}", level_str ) ) )?;

    Ok( Command::Volume { sink, level } )
}


/// Returns help text listing all available commands.
pub fn help_text() -> &'static str {
    r#"Catalog Commands:
  /import <path>      Import a file or every track in a folder
  /select <name>      Select a track by name

Transport Commands:
  /play               Play selected track        [Enter/Space]
  /pause              Pause playback             [p]
  /stop               Stop playback              [s]

Output Commands:
  /vol <sink> <0-100> Set volume of sink 1, 2, ...
  /devices            List output devices

Other Commands:
  /help               Show this help             [?]
  /quit               Exit slam                  [q]"#
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_import() {
        let cmd = Command::parse( "import /sfx/airhorn.mp3" ).unwrap();
        assert_eq!( cmd, Command::Import { path: PathBuf::from( "/sfx/airhorn.mp3" ) } );
    }


    #[test]
    fn test_parse_import_alias_keeps_spaces() {
        let cmd = Command::parse( "i /my sounds/bell.wav" ).unwrap();
        assert_eq!( cmd, Command::Import { path: PathBuf::from( "/my sounds/bell.wav" ) } );
    }


    #[test]
    fn test_parse_select() {
        let cmd = Command::parse( "select rimshot.mp3" ).unwrap();
        assert_eq!( cmd, Command::Select { name: "rimshot.mp3".into() } );
    }


    #[test]
    fn test_parse_transport() {
        assert_eq!( Command::parse( "play" ).unwrap(), Command::Play );
        assert_eq!( Command::parse( "P" ).unwrap(), Command::Play );
        assert_eq!( Command::parse( "pa" ).unwrap(), Command::Pause );
        assert_eq!( Command::parse( " stop " ).unwrap(), Command::Stop );
    }


    #[test]
    fn test_parse_aliases() {
        assert_eq!(
            Command::parse( "add /sfx" ).unwrap(),
            Command::Import { path: PathBuf::from( "/sfx" ) }
        );
        assert_eq!( Command::parse( "sel bell" ).unwrap(), Command::Select { name: "bell".into() } );
        assert_eq!( Command::parse( "st" ).unwrap(), Command::Stop );
        assert_eq!( Command::parse( "pause" ).unwrap(), Command::Pause );
    }


    #[test]
    fn test_parse_other_commands() {
        assert_eq!( Command::parse( "devices" ).unwrap(), Command::Devices );
        assert_eq!( Command::parse( "dev" ).unwrap(), Command::Devices );
        assert_eq!( Command::parse( "help" ).unwrap(), Command::Help );
        assert_eq!( Command::parse( "h" ).unwrap(), Command::Help );
        assert_eq!( Command::parse( "quit" ).unwrap(), Command::Quit );
        assert_eq!( Command::parse( "q" ).unwrap(), Command::Quit );
        assert_eq!( Command::parse( "EXIT" ).unwrap(), Command::Quit );
    }


    #[test]
    fn test_parse_volume() {
        let cmd = Command::parse( "vol 2 40" ).unwrap();
        assert_eq!( cmd, Command::Volume { sink: 2, level: 40 } );
        assert_eq!( Command::parse( "volume 1 100%" ).unwrap(), Command::Volume { sink: 1, level: 100 } );
    }


    #[test]
    fn test_parse_volume_rejects_bad_values() {
        assert!( matches!( Command::parse( "vol 0 50" ), Err( CommandError::InvalidArgument( _ ) ) ) );
        assert!( matches!( Command::parse( "vol 1 101" ), Err( CommandError::InvalidArgument( _ ) ) ) );
        assert!( matches!( Command::parse( "vol 1" ), Err( CommandError::MissingArgument( _ ) ) ) );
        assert!( matches!( Command::parse( "vol" ), Err( CommandError::MissingArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_unknown() {
        let result = Command::parse( "shuffle" );
        assert!( matches!( result, Err( CommandError::Unknown( _ ) ) ) );
        assert!( matches!( Command::parse( "" ), Err( CommandError::Unknown( _ ) ) ) );
    }


    #[test]
    fn test_parse_missing_arg() {
        assert!( matches!( Command::parse( "import" ), Err( CommandError::MissingArgument( _ ) ) ) );
        assert!( matches!( Command::parse( "select   " ), Err( CommandError::MissingArgument( _ ) ) ) );
    }
}
