//! SLAM CLI - terminal soundboard

mod cli;
mod input;
mod logging;
mod settings;
mod view;

use std::io;
use std::path::{ Path, PathBuf };
use std::sync::{ mpsc, Arc };
use std::time::{ Duration, Instant };

use anyhow::{ Context, Result };
use clap::Parser;
use crossterm::{
    event::{ self, Event, KeyCode, KeyEventKind, KeyModifiers },
    terminal::{ disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen },
    ExecutableCommand,
};
use parking_lot::RwLock;
use ratatui::{
    prelude::*,
    widgets::{ Block, Borders, List, ListItem, ListState, Paragraph, Wrap },
};

use cli::Args;
use input::{ InputBuffer, InputMode };
use settings::Settings;
use view::ViewMode;

use slam_core::{
    command, source, CatalogError, Command, CommandError, CpalBackend, OutputBackend,
    PlaybackSession, SessionEvent, SongStatus, TrackCatalog, VolumeMode,
};


/// Volume step for the `+`/`-` keys in the sinks view.
const VOLUME_STEP: f32 = 0.05;


/// Application state.
struct App {
    session: PlaybackSession,
    events: mpsc::Receiver<SessionEvent>,

    settings: Settings,
    settings_path: Option<PathBuf>,

    view_mode: ViewMode,
    input_mode: InputMode,
    input_buffer: InputBuffer,

    track_state: ListState,
    sink_state: ListState,
    help_scroll: u16,

    /// Output device names from the last `/devices`
    devices: Vec<String>,

    status_message: Option<String>,
    status_clear_at: Option<Instant>,
    should_quit: bool,
}


impl App {
    fn new( session: PlaybackSession, settings: Settings, settings_path: Option<PathBuf> ) -> Self {
        let events = session.subscribe();
        let mut sink_state = ListState::default();
        sink_state.select( Some( 0 ) );

        let mut app = Self {
            session,
            events,
            settings,
            settings_path,
            view_mode: ViewMode::default(),
            input_mode: InputMode::default(),
            input_buffer: InputBuffer::new(),
            track_state: ListState::default(),
            sink_state,
            help_scroll: 0,
            devices: Vec::new(),
            status_message: None,
            status_clear_at: None,
            should_quit: false,
        };
        app.select_row( 0 );
        app
    }


    /// Sets a temporary status message.
    fn set_status( &mut self, msg: impl Into<String> ) {
        self.status_message = Some( msg.into() );
        self.status_clear_at = Some( Instant::now() + Duration::from_secs( 3 ) );
    }


    /// Clears expired status messages and drains session events.
    fn tick( &mut self ) {
        if let Some( clear_at ) = self.status_clear_at {
            if Instant::now() >= clear_at {
                self.status_message = None;
                self.status_clear_at = None;
            }
        }

        while let Ok( event ) = self.events.try_recv() {
            match event {
                SessionEvent::PlaybackFailed { sink, message } => {
                    self.set_status( format!( "Playback stopped, {} failed: {}", sink, message ) );
                }
                SessionEvent::StatusChanged { status, now_playing, .. } => {
                    tracing::debug!( "Status {} ({:?})", status, now_playing );
                }
            }
        }
    }


    /// Highlights a row of the track list and selects that track.
    fn select_row( &mut self, index: usize ) {
        let path = self.session
            .catalog()
            .read()
            .tracks()
            .get( index )
            .map( |t| t.path.clone() );

        if let Some( path ) = path {
            self.track_state.select( Some( index ) );
            self.session.select_track( path );
        }
    }


    fn move_track_selection( &mut self, delta: isize ) {
        let len = self.session.catalog().read().len();
        if len == 0 {
            return;
        }
        let current = self.track_state.selected().unwrap_or( 0 ) as isize;
        let next = ( current + delta ).clamp( 0, len as isize - 1 ) as usize;
        self.select_row( next );
    }


    fn move_sink_selection( &mut self, delta: isize ) {
        let len = self.session.sink_count();
        if len == 0 {
            return;
        }
        let current = self.sink_state.selected().unwrap_or( 0 ) as isize;
        let next = ( current + delta ).clamp( 0, len as isize - 1 ) as usize;
        self.sink_state.select( Some( next ) );
    }


    fn nudge_sink_volume( &mut self, delta: f32 ) {
        let Some( index ) = self.sink_state.selected() else {
            return;
        };
        let Some( sink ) = self.session.sinks().into_iter().nth( index ) else {
            return;
        };

        let volume = ( sink.volume + delta ).clamp( 0.0, 1.0 );
        match self.session.set_sink_volume( index, volume ) {
            Ok(()) => self.set_status( format!( "{} volume {}%", sink.label, percent( volume ) ) ),
            Err( e ) => self.set_status( format!( "Error: {}", e ) ),
        }
    }


    /// Plays when stopped or paused, pauses when playing.
    fn toggle_playback( &mut self ) {
        let result = match self.session.status() {
            SongStatus::Playing => self.session.pause(),
            _ => self.session.play(),
        };
        if let Err( e ) = result {
            self.set_status( format!( "Error: {}", e ) );
        }
    }


    /// Handles a key event.
    fn handle_key( &mut self, code: KeyCode, modifiers: KeyModifiers ) {
        match self.input_mode {
            InputMode::Normal => self.handle_normal_key( code, modifiers ),
            InputMode::Command => self.handle_command_key( code ),
        }
    }


    fn handle_normal_key( &mut self, code: KeyCode, modifiers: KeyModifiers ) {
        if modifiers.contains( KeyModifiers::CONTROL ) && code == KeyCode::Char( 'c' ) {
            self.should_quit = true;
            return;
        }

        match code {
            KeyCode::Char( 'q' ) => self.should_quit = true,
            KeyCode::Char( '/' ) => {
                self.input_mode = InputMode::Command;
                self.input_buffer.clear();
            }
            KeyCode::Char( '?' ) => {
                self.view_mode = if self.view_mode == ViewMode::Help { ViewMode::Tracks } else { ViewMode::Help };
                self.help_scroll = 0;
            }
            KeyCode::Tab => self.view_mode = self.view_mode.next_tab(),
            KeyCode::BackTab => self.view_mode = self.view_mode.prev_tab(),
            KeyCode::Esc if self.view_mode == ViewMode::Help => self.view_mode = ViewMode::Tracks,

            KeyCode::Char( ' ' ) => self.toggle_playback(),
            KeyCode::Enter if self.view_mode == ViewMode::Tracks => {
                if let Err( e ) = self.session.play() {
                    self.set_status( format!( "Error: {}", e ) );
                }
            }
            KeyCode::Char( 'p' ) => {
                if let Err( e ) = self.session.pause() {
                    self.set_status( format!( "Error: {}", e ) );
                }
            }
            KeyCode::Char( 's' ) => self.session.stop(),

            _ => match self.view_mode {
                ViewMode::Tracks => self.handle_tracks_key( code ),
                ViewMode::Sinks => self.handle_sinks_key( code ),
                ViewMode::Help => self.handle_help_key( code ),
            },
        }
    }


    fn handle_tracks_key( &mut self, code: KeyCode ) {
        match code {
            KeyCode::Up | KeyCode::Char( 'k' ) => self.move_track_selection( -1 ),
            KeyCode::Down | KeyCode::Char( 'j' ) => self.move_track_selection( 1 ),
            KeyCode::PageUp => self.move_track_selection( -10 ),
            KeyCode::PageDown => self.move_track_selection( 10 ),
            KeyCode::Home => self.select_row( 0 ),
            KeyCode::End => {
                let len = self.session.catalog().read().len();
                self.select_row( len.saturating_sub( 1 ) );
            }
            KeyCode::Esc => {
                self.track_state.select( None );
                self.session.clear_selection();
            }
            _ => {}
        }
    }


    fn handle_sinks_key( &mut self, code: KeyCode ) {
        match code {
            KeyCode::Up | KeyCode::Char( 'k' ) => self.move_sink_selection( -1 ),
            KeyCode::Down | KeyCode::Char( 'j' ) => self.move_sink_selection( 1 ),
            KeyCode::Char( '+' ) | KeyCode::Char( '=' ) | KeyCode::Right => self.nudge_sink_volume( VOLUME_STEP ),
            KeyCode::Char( '-' ) | KeyCode::Left => self.nudge_sink_volume( -VOLUME_STEP ),
            _ => {}
        }
    }


    fn handle_help_key( &mut self, code: KeyCode ) {
        match code {
            KeyCode::Up | KeyCode::Char( 'k' ) => self.help_scroll = self.help_scroll.saturating_sub( 1 ),
            KeyCode::Down | KeyCode::Char( 'j' ) => self.help_scroll = self.help_scroll.saturating_add( 1 ),
            _ => {}
        }
    }


    /// Handles keys in command mode.
    fn handle_command_key( &mut self, code: KeyCode ) {
        match code {
            KeyCode::Enter => {
                let input = self.input_buffer.take();
                self.input_mode = InputMode::Normal;
                self.execute_command( &input );
            }
            KeyCode::Esc => {
                self.input_buffer.clear();
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Backspace => {
                if self.input_buffer.is_empty() {
                    self.input_mode = InputMode::Normal;
                } else {
                    self.input_buffer.backspace();
                }
            }
            KeyCode::Delete => self.input_buffer.delete(),
            KeyCode::Left => self.input_buffer.move_left(),
            KeyCode::Right => self.input_buffer.move_right(),
            KeyCode::Home => self.input_buffer.move_home(),
            KeyCode::End => self.input_buffer.move_end(),
            KeyCode::Char( c ) => self.input_buffer.insert( c ),
            _ => {}
        }
    }


    /// Parses and runs a slash command, reporting failures on the status bar.
    fn execute_command( &mut self, input: &str ) {
        if input.trim().is_empty() {
            return;
        }

        let result = Command::parse( input ).and_then( |cmd| {
            tracing::debug!( "Running command: {}", cmd.description() );
            self.run_command( cmd )
        });

        if let Err( e ) = result {
            self.set_status( format!( "Error: {}", e ) );
        }
    }


    fn run_command( &mut self, cmd: Command ) -> Result<(), CommandError> {
        match cmd {
            Command::Import { path } => {
                let names = {
                    let catalog = self.session.catalog();
                    let mut catalog = catalog.write();
                    import_path( &mut catalog, &path ).map_err( failed )?
                };
                if self.session.selected_track().is_none() {
                    self.select_row( 0 );
                }
                self.set_status( format!( "Imported {} track(s)", names.len() ) );
            }
            Command::Select { name } => {
                self.session.select_by_name( &name ).map_err( failed )?;
                let row = self.session.catalog().read().position( &name );
                self.track_state.select( row );
            }
            Command::Play => self.session.play().map_err( failed )?,
            Command::Pause => self.session.pause().map_err( failed )?,
            Command::Stop => self.session.stop(),
            Command::Volume { sink, level } => {
                let index = sink.saturating_sub( 1 );
                let volume = level as f32 / 100.0;
                self.session.set_sink_volume( index, volume ).map_err( failed )?;
                self.set_status( format!( "Sink {} volume {}%", sink, level ) );
            }
            Command::Devices => {
                self.devices = self.session.backend().output_device_names().map_err( failed )?;
                self.view_mode = ViewMode::Sinks;
                self.set_status( format!( "{} output device(s)", self.devices.len() ) );
            }
            Command::Help => {
                self.view_mode = ViewMode::Help;
                self.help_scroll = 0;
            }
            Command::Quit => self.should_quit = true,
        }
        Ok(())
    }


    /// Writes the library and sink volumes back to the settings file.
    fn save_settings( &mut self ) {
        self.settings.library = self.session
            .catalog()
            .read()
            .tracks()
            .iter()
            .map( |t| t.path.clone() )
            .collect();

        for sink in self.session.sinks() {
            match sink.label.as_str() {
                "cable" => self.settings.cable_volume = sink.volume,
                "speakers" => self.settings.speakers_volume = sink.volume,
                _ => {}
            }
        }

        if let Some( path ) = &self.settings_path {
            self.settings.save_to( path );
        }
    }
}


fn failed( e: impl std::fmt::Display ) -> CommandError {
    CommandError::ExecutionFailed( e.to_string() )
}


/// Imports a single track or every track in a folder.
fn import_path( catalog: &mut TrackCatalog, path: &Path ) -> Result<Vec<String>, CatalogError> {
    if path.is_dir() {
        catalog.import_dir( path )
    } else {
        catalog.import_file( path ).map( |name| vec![ name ] )
    }
}


fn percent( volume: f32 ) -> u32 {
    ( volume * 100.0 ).round() as u32
}


fn format_time( d: Duration ) -> String {
    let secs = d.as_secs();
    format!( "{}:{:02}", secs / 60, secs % 60 )
}


fn main() -> Result<()> {
    let args = Args::parse();

    let log_dir = Settings::config_dir().unwrap_or_else( std::env::temp_dir );
    let _log_guard = match logging::init( &log_dir ) {
        Ok( guard ) => Some( guard ),
        Err( e ) => {
            eprintln!( "Logging disabled: {}", e );
            None
        }
    };

    let backend: Arc<dyn OutputBackend> = Arc::new( CpalBackend::new() );

    if args.list_devices {
        for ( i, name ) in backend.output_device_names()?.iter().enumerate() {
            println!( "{:>3}  {}", i, name );
        }
        return Ok(());
    }

    let settings_path = args.config.clone().or_else( Settings::default_path );
    let settings = settings_path.as_deref().map( Settings::load_from ).unwrap_or_default();

    let catalog = Arc::new( RwLock::new( TrackCatalog::new() ) );
    {
        let mut catalog = catalog.write();
        for path in settings.library.iter().chain( args.files.iter() ) {
            if let Err( e ) = import_path( &mut catalog, path ) {
                tracing::warn!( "Skipping {:?}: {}", path, e );
            }
        }
        tracing::info!( "Catalog holds {} track(s)", catalog.len() );
    }

    let session = PlaybackSession::new( backend, &settings.sink_specs( &args ), catalog )
        .context( "cannot set up output sinks" )?;

    // Setup terminal
    enable_raw_mode()?;
    io::stdout().execute( EnterAlternateScreen )?;

    let mut terminal = Terminal::new( CrosstermBackend::new( io::stdout() ) )?;
    let mut app = App::new( session, settings, settings_path );

    let result = run( &mut terminal, &mut app );

    // Cleanup
    disable_raw_mode()?;
    io::stdout().execute( LeaveAlternateScreen )?;

    app.save_settings();
    result
}


/// Main loop.
fn run( terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, app: &mut App ) -> Result<()> {
    loop {
        app.tick();

        terminal.draw( |frame| draw_ui( frame, app ) )?;

        if event::poll( Duration::from_millis( 100 ) )? {
            if let Event::Key( key ) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.handle_key( key.code, key.modifiers );
                }
            }
        }

        if app.should_quit {
            return Ok(());
        }
    }
}


/// Draws the main UI.
fn draw_ui( frame: &mut Frame, app: &mut App ) {
    let area = frame.area();

    let chunks = Layout::default()
        .direction( Direction::Vertical )
        .constraints([
            Constraint::Length( 2 ),  // Header
            Constraint::Min( 0 ),     // Main content
            Constraint::Length( 5 ),  // Now playing
            Constraint::Length( 1 ),  // Status bar
        ])
        .split( area );

    let header = Paragraph::new( format!( "  SLAM - {}", app.view_mode.title() ) )
        .style( Style::default().fg( Color::Cyan ).bold() )
        .block( Block::default().borders( Borders::BOTTOM ) );
    frame.render_widget( header, chunks[0] );

    match app.view_mode {
        ViewMode::Tracks => draw_tracks( frame, app, chunks[1] ),
        ViewMode::Sinks => draw_sinks( frame, app, chunks[1] ),
        ViewMode::Help => draw_help( frame, app, chunks[1] ),
    }

    draw_now_playing( frame, app, chunks[2] );
    draw_status_bar( frame, app, chunks[3] );
}


fn draw_tracks( frame: &mut Frame, app: &mut App, area: Rect ) {
    let catalog = app.session.catalog();
    let catalog = catalog.read();

    if catalog.is_empty() {
        let hint = Paragraph::new( "No tracks yet. Use /import <file or folder> to add some." )
            .style( Style::default().fg( Color::DarkGray ) )
            .block( Block::default().borders( Borders::ALL ).title( " Tracks " ) );
        frame.render_widget( hint, area );
        return;
    }

    let playing = app.session.now_playing_info().map( |info| info.path );

    let items: Vec<ListItem> = catalog
        .tracks()
        .iter()
        .map( |track| {
            let prefix = if playing.as_ref() == Some( &track.path ) { "▶ " } else { "  " };
            ListItem::new( format!( "{}{}", prefix, track.name ) )
        })
        .collect();

    let list = List::new( items )
        .block( Block::default().borders( Borders::ALL ).title( format!( " Tracks ({}) ", catalog.len() ) ) )
        .highlight_style( Style::default().bg( Color::DarkGray ).bold() )
        .highlight_symbol( "> " );

    frame.render_stateful_widget( list, area, &mut app.track_state );
}


fn draw_sinks( frame: &mut Frame, app: &mut App, area: Rect ) {
    let device_rows = if app.devices.is_empty() { 0 } else { app.devices.len() as u16 + 2 };
    let chunks = Layout::default()
        .direction( Direction::Vertical )
        .constraints([ Constraint::Min( 3 ), Constraint::Length( device_rows ) ])
        .split( area );

    let items: Vec<ListItem> = app.session
        .sinks()
        .iter()
        .enumerate()
        .map( |( i, sink )| {
            let mode = match sink.mode {
                VolumeMode::Device => "device",
                VolumeMode::Stage => "stage",
            };
            let state_color = match sink.state {
                slam_core::SinkState::Playing => Color::Green,
                slam_core::SinkState::Paused => Color::Yellow,
                _ => Color::Gray,
            };
            ListItem::new( Line::from( vec![
                Span::raw( format!( "{}. {:<10} ", i + 1, sink.label ) ),
                Span::styled( format!( "{:<8}", sink.state.to_string() ), Style::default().fg( state_color ) ),
                Span::raw( format!( " {:>3}% ({})  device {}", percent( sink.volume ), mode, sink.device ) ),
            ]))
        })
        .collect();

    let list = List::new( items )
        .block( Block::default().borders( Borders::ALL ).title( " Sinks [+/-] volume " ) )
        .highlight_style( Style::default().bg( Color::DarkGray ).bold() )
        .highlight_symbol( "> " );
    frame.render_stateful_widget( list, chunks[0], &mut app.sink_state );

    if !app.devices.is_empty() {
        let lines: Vec<Line> = app.devices
            .iter()
            .enumerate()
            .map( |( i, name )| Line::from( format!( "{:>3}  {}", i, name ) ) )
            .collect();
        let devices = Paragraph::new( lines )
            .block( Block::default().borders( Borders::ALL ).title( " Output devices " ) );
        frame.render_widget( devices, chunks[1] );
    }
}


fn draw_help( frame: &mut Frame, app: &App, area: Rect ) {
    let help = Paragraph::new( command::help_text() )
        .block( Block::default().borders( Borders::ALL ).title( " Help [?/Esc] close " ) )
        .wrap( Wrap { trim: false } )
        .scroll(( app.help_scroll, 0 ));
    frame.render_widget( help, area );
}


fn draw_now_playing( frame: &mut Frame, app: &App, area: Rect ) {
    let status = app.session.status();
    let icon = match status {
        SongStatus::Playing => "▶",
        SongStatus::Paused => "⏸",
        SongStatus::Stopped => "■",
    };

    let sink_states = app.session
        .sinks()
        .iter()
        .map( |sink| format!( "{}: {}", sink.label, sink.state ) )
        .collect::<Vec<_>>()
        .join( ", " );

    let mut lines = match app.session.now_playing_info() {
        Some( info ) => {
            let title = info.tags.title.clone().unwrap_or( info.name );
            let artist_album = match ( &info.tags.artist, &info.tags.album ) {
                ( Some( artist ), Some( album ) ) => format!( "{} - {}", artist, album ),
                ( Some( artist ), None ) => artist.clone(),
                ( None, Some( album ) ) => album.clone(),
                ( None, None ) => String::new(),
            };
            let length = info.duration.map( format_time ).unwrap_or_else( || "--:--".to_string() );

            vec![
                Line::from( Span::styled( format!( " {} {} ", icon, title ), Style::default().bold() ) ),
                Line::from( Span::styled( format!( "   {}", artist_album ), Style::default().fg( Color::Gray ) ) ),
                Line::from( format!( "   {} | {} | {}", status, length, sink_states ) ),
            ]
        }
        None => vec![
            Line::from( Span::styled( format!( " {} Nothing playing", icon ), Style::default().bold() ) ),
            Line::from( format!( "   {}", sink_states ) ),
        ],
    };

    if let Some( selected ) = app.session.selected_track() {
        lines.push( Line::from( Span::styled(
            format!( "   Selected: {}", source::display_name( &selected ) ),
            Style::default().fg( Color::DarkGray ),
        )));
    }

    let panel = Paragraph::new( lines ).block( Block::default().borders( Borders::TOP ) );
    frame.render_widget( panel, area );
}


fn draw_status_bar( frame: &mut Frame, app: &App, area: Rect ) {
    let ( text, style ) = match app.input_mode {
        InputMode::Command => {
            ( format!( "/{}", app.input_buffer.content() ), Style::default().fg( Color::Yellow ) )
        }
        InputMode::Normal => {
            if let Some( ref msg ) = app.status_message {
                ( msg.clone(), Style::default().fg( Color::Green ) )
            } else {
                let hint = match app.view_mode {
                    ViewMode::Tracks => " [/]Cmd [Tab]Sinks [Enter]Play [Space]Play/Pause [p]Pause [s]Stop [?]Help [q]Quit ",
                    ViewMode::Sinks => " [/]Cmd [Tab]Tracks [+/-]Volume [Space]Play/Pause [s]Stop [?]Help [q]Quit ",
                    ViewMode::Help => " [?]Close [Esc]Close ",
                };
                ( hint.to_string(), Style::default().fg( Color::DarkGray ) )
            }
        }
    };

    let status = Paragraph::new( text ).style( style );
    frame.render_widget( status, area );

    if app.input_mode == InputMode::Command {
        let cursor_x = area.x + 1 + app.input_buffer.cursor_column() as u16;
        frame.set_cursor_position(( cursor_x, area.y ));
    }
}


#[cfg( test )]
mod tests {
    use super::*;

    use tempfile::TempDir;


    #[test]
    fn test_import_path_file_and_folder() {
        let dir = TempDir::new().unwrap();
        std::fs::write( dir.path().join( "b.wav" ), b"" ).unwrap();
        std::fs::write( dir.path().join( "a.mp3" ), b"" ).unwrap();
        std::fs::write( dir.path().join( "notes.txt" ), b"" ).unwrap();

        let mut catalog = TrackCatalog::new();
        let names = import_path( &mut catalog, dir.path() ).unwrap();
        assert_eq!( names, vec![ "a.mp3".to_string(), "b.wav".to_string() ] );

        let mut catalog = TrackCatalog::new();
        let names = import_path( &mut catalog, &dir.path().join( "b.wav" ) ).unwrap();
        assert_eq!( names, vec![ "b.wav".to_string() ] );
        assert!( import_path( &mut catalog, &dir.path().join( "missing.wav" ) ).is_err() );
    }


    #[test]
    fn test_formatting_helpers() {
        assert_eq!( format_time( Duration::from_secs( 75 ) ), "1:15" );
        assert_eq!( format_time( Duration::ZERO ), "0:00" );
        assert_eq!( percent( 0.5 ), 50 );
        assert_eq!( percent( 0.333 ), 33 );
    }


    #[test]
    fn test_execution_failures_become_command_errors() {
        let err = failed( "no such sink" );
        assert!( matches!( err, CommandError::ExecutionFailed( ref msg ) if msg == "no such sink" ) );
    }
}
