//! File logging setup.
//!
//! The terminal belongs to the TUI, so log lines go to `slam.log` instead.

use std::fs;
use std::path::Path;

use anyhow::{ anyhow, Result };
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;


const LOG_FILE_NAME: &str = "slam.log";


/// Installs the global subscriber writing to `slam.log` in `dir`.
/// `RUST_LOG` overrides the default `info` level.
///
/// Keep the returned guard alive until exit; dropping it flushes the writer.
pub fn init( dir: &Path ) -> Result<WorkerGuard> {
    fs::create_dir_all( dir )?;

    let appender = tracing_appender::rolling::never( dir, LOG_FILE_NAME );
    let ( writer, guard ) = tracing_appender::non_blocking( appender );

    let filter = EnvFilter::try_from_default_env().unwrap_or_else( |_| EnvFilter::new( "info" ) );

    tracing_subscriber::fmt()
        .with_env_filter( filter )
        .with_writer( writer )
        .with_ansi( false )
        .with_thread_names( true )
        .try_init()
        .map_err( |e| anyhow!( "cannot install logger: {}", e ) )?;

    tracing::info!( "Logging to {}", dir.join( LOG_FILE_NAME ).display() );
    Ok( guard )
}
