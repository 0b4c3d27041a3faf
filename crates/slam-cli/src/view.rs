//! View mode management for the TUI.


/// Current view mode of the application.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum ViewMode {
    /// Track list - main view, selecting a row selects the track.
    #[default]
    Tracks,

    /// Output sinks with their device, state and volume.
    Sinks,

    /// Help overlay - shows available commands.
    Help,
}


impl ViewMode {
    /// Returns the next view in tab order (excluding Help overlay).
    pub fn next_tab( self ) -> Self {
        match self {
            ViewMode::Tracks => ViewMode::Sinks,
            ViewMode::Sinks => ViewMode::Tracks,
            ViewMode::Help => ViewMode::Help,
        }
    }


    /// Returns the previous view in tab order (excluding Help overlay).
    pub fn prev_tab( self ) -> Self {
        // Two tabs, so backwards is the same walk
        self.next_tab()
    }


    pub fn title( self ) -> &'static str {
        match self {
            ViewMode::Tracks => "TRACKS",
            ViewMode::Sinks => "SINKS",
            ViewMode::Help => "HELP",
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_tab_cycle() {
        assert_eq!( ViewMode::Tracks.next_tab(), ViewMode::Sinks );
        assert_eq!( ViewMode::Sinks.next_tab(), ViewMode::Tracks );
        assert_eq!( ViewMode::Tracks.prev_tab(), ViewMode::Sinks );
        assert_eq!( ViewMode::Help.next_tab(), ViewMode::Help );
    }
}
