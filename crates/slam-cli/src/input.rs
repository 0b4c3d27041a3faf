//! Command line editing for the TUI.


/// Current input mode of the application.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum InputMode {
    /// Keyboard shortcuts active.
    #[default]
    Normal,

    /// Typing a slash command.
    Command,
}


/// Single-line text buffer with a byte-offset cursor kept on char boundaries.
#[derive( Debug, Default )]
pub struct InputBuffer {
    content: String,
    cursor: usize,
}


impl InputBuffer {
    pub fn new() -> Self {
        Self::default()
    }


    pub fn insert( &mut self, c: char ) {
        self.content.insert( self.cursor, c );
        self.cursor += c.len_utf8();
    }


    /// Deletes the character before the cursor.
    pub fn backspace( &mut self ) {
        if let Some( prev ) = self.prev_boundary() {
            self.content.remove( prev );
            self.cursor = prev;
        }
    }


    /// Deletes the character under the cursor.
    pub fn delete( &mut self ) {
        if self.cursor < self.content.len() {
            self.content.remove( self.cursor );
        }
    }


    pub fn move_left( &mut self ) {
        if let Some( prev ) = self.prev_boundary() {
            self.cursor = prev;
        }
    }


    pub fn move_right( &mut self ) {
        if let Some( c ) = self.content[ self.cursor.. ].chars().next() {
            self.cursor += c.len_utf8();
        }
    }


    pub fn move_home( &mut self ) {
        self.cursor = 0;
    }


    pub fn move_end( &mut self ) {
        self.cursor = self.content.len();
    }


    /// Empties the buffer and returns what it held.
    pub fn take( &mut self ) -> String {
        self.cursor = 0;
        std::mem::take( &mut self.content )
    }


    pub fn clear( &mut self ) {
        self.content.clear();
        self.cursor = 0;
    }


    pub fn content( &self ) -> &str {
        &self.content
    }


    /// Cursor position in characters, for placing the terminal cursor.
    pub fn cursor_column( &self ) -> usize {
        self.content[ ..self.cursor ].chars().count()
    }


    pub fn is_empty( &self ) -> bool {
        self.content.is_empty()
    }


    fn prev_boundary( &self ) -> Option<usize> {
        self.content[ ..self.cursor ].char_indices().last().map( |( i, _ )| i )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn typed( text: &str ) -> InputBuffer {
        let mut buffer = InputBuffer::new();
        text.chars().for_each( |c| buffer.insert( c ) );
        buffer
    }


    #[test]
    fn test_insert_and_take() {
        let mut buffer = typed( "play" );
        assert_eq!( buffer.cursor_column(), 4 );
        assert_eq!( buffer.take(), "play" );
        assert!( buffer.is_empty() );
        assert_eq!( buffer.cursor_column(), 0 );
    }


    #[test]
    fn test_editing_multibyte_text() {
        let mut buffer = typed( "import é.mp3" );
        buffer.move_home();
        for _ in 0..8 {
            buffer.move_right();
        }
        assert_eq!( buffer.cursor_column(), 8 );

        buffer.delete();
        assert_eq!( buffer.content(), "import .mp3" );

        buffer.insert( 'ü' );
        buffer.move_left();
        buffer.backspace();
        assert_eq!( buffer.content(), "importü.mp3" );
    }


    #[test]
    fn test_backspace_at_start_is_noop() {
        let mut buffer = typed( "ab" );
        buffer.move_home();
        buffer.backspace();
        buffer.move_left();
        assert_eq!( buffer.content(), "ab" );

        buffer.move_end();
        buffer.backspace();
        assert_eq!( buffer.content(), "a" );
    }
}
