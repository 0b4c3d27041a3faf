//! Command-line argument parsing for SLAM.

use std::path::PathBuf;

use clap::Parser;


/// SLAM - play sounds into a virtual microphone and your speakers.
#[derive( Parser, Debug )]
#[command( name = "slam" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// Settings file to use instead of the one in the config directory.
    #[arg( short, long )]
    pub config: Option<PathBuf>,

    /// Device name pattern for the virtual cable (e.g. "CABLE Input").
    #[arg( long )]
    pub cable: Option<String>,

    /// Do not route to the virtual cable.
    #[arg( long )]
    pub no_cable: bool,

    /// Do not play on the default speakers.
    #[arg( long )]
    pub no_speakers: bool,

    /// Print the output devices and exit.
    #[arg( long )]
    pub list_devices: bool,

    /// Files or folders to import on startup.
    #[arg( trailing_var_arg = true )]
    pub files: Vec<PathBuf>,
}
