//! Input mode handling for the TUI.
//!
//! Manages the current input mode (normal keys or one of the prompts)
//! and provides an input buffer for text entry.


/// Current input mode of the application.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum InputMode {
    /// Normal mode - keyboard shortcuts active.
    #[default]
    Normal,

    /// Typing a protocol command after `:`.
    Command,

    /// Typing a search term.
    Search { forward: bool },

    /// Typing a directory for the filelist.
    Goto,

    /// Typing a file name for the playlist.
    Save,

    /// Typing a file name pattern to find below the filelist directory.
    Find,

    /// Waiting for the key naming a bookmark.
    Bookmark { set: bool },

    /// Typing a pattern to mark or unmark entries by.
    MarkPattern { marked: bool },
}


impl InputMode {
    /// Prompt shown in front of the buffer.
    pub fn prompt( self ) -> &'static str {
        match self {
            InputMode::Normal => "",
            InputMode::Command => ":",
            InputMode::Search { forward: true } => "/",
            InputMode::Search { forward: false } => "?",
            InputMode::Goto => "goto: ",
            InputMode::Save => "save playlist: ",
            InputMode::Find => "find: ",
            InputMode::Bookmark { set: true } => "set bookmark: ",
            InputMode::Bookmark { set: false } => "go to bookmark: ",
            InputMode::MarkPattern { marked: true } => "mark regex: ",
            InputMode::MarkPattern { marked: false } => "unmark regex: ",
        }
    }
}


/// Input buffer for prompt text entry.
#[derive( Debug, Default )]
pub struct InputBuffer {
    content: String,
    cursor: usize,
}


impl InputBuffer {
    /// Creates a new empty input buffer.
    pub fn new() -> Self {
        Self::default()
    }


    /// Inserts a character at the cursor position.
    pub fn insert( &mut self, c: char ) {
        self.content.insert( self.cursor, c );
        self.cursor += c.len_utf8();
    }


    /// Deletes the character before the cursor.
    pub fn backspace( &mut self ) {
        if self.cursor > 0 {
            let prev_char_boundary = self.content[ ..self.cursor ]
                .char_indices()
                .last()
                .map( |( i, _ )| i )
                .unwrap_or( 0 );
            self.content.remove( prev_char_boundary );
            self.cursor = prev_char_boundary;
        }
    }


    /// Deletes the character at the cursor position.
    pub fn delete( &mut self ) {
        if self.cursor < self.content.len() {
            self.content.remove( self.cursor );
        }
    }


    /// Deletes the word before the cursor, and any spaces after it (C-w).
    pub fn delete_word( &mut self ) {
        let head = &self.content[ ..self.cursor ];
        let trimmed = head.trim_end();
        let start = trimmed
            .char_indices()
            .rev()
            .find( |( _, c )| c.is_whitespace() )
            .map( |( i, c )| i + c.len_utf8() )
            .unwrap_or( 0 );
        self.content.replace_range( start..self.cursor, "" );
        self.cursor = start;
    }


    /// Clears the buffer.
    pub fn clear( &mut self ) {
        self.content.clear();
        self.cursor = 0;
    }


    /// Empties the buffer, returning what was typed.
    pub fn take( &mut self ) -> String {
        self.cursor = 0;
        std::mem::take( &mut self.content )
    }


    /// Gets the current content.
    pub fn content( &self ) -> &str {
        &self.content
    }


    /// Gets the cursor position as character count (for display).
    pub fn cursor_char_pos( &self ) -> usize {
        self.content[ ..self.cursor ].chars().count()
    }


    /// Moves cursor left by one character.
    pub fn move_left( &mut self ) {
        if self.cursor > 0 {
            self.cursor = self.content[ ..self.cursor ]
                .char_indices()
                .last()
                .map( |( i, _ )| i )
                .unwrap_or( 0 );
        }
    }


    /// Moves cursor right by one character.
    pub fn move_right( &mut self ) {
        if self.cursor < self.content.len() {
            self.cursor = self.content[ self.cursor.. ]
                .char_indices()
                .nth( 1 )
                .map( |( i, _ )| self.cursor + i )
                .unwrap_or( self.content.len() );
        }
    }


    /// Moves cursor to the beginning.
    pub fn move_home( &mut self ) {
        self.cursor = 0;
    }


    /// Moves cursor to the end.
    pub fn move_end( &mut self ) {
        self.cursor = self.content.len();
    }


    /// Returns true if the buffer is empty.
    pub fn is_empty( &self ) -> bool {
        self.content.is_empty()
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
    fn test_editing_multibyte() {
        let mut buffer = typed( "héllo" );
        buffer.move_left();
        buffer.move_left();
        buffer.backspace();
        assert_eq!( buffer.content(), "hélo" );
        assert_eq!( buffer.cursor_char_pos(), 2 );
        buffer.move_home();
        buffer.delete();
        assert_eq!( buffer.content(), "élo" );
    }


    #[test]
    fn test_delete_word() {
        let mut buffer = typed( "add /music/some dir  " );
        buffer.delete_word();
        assert_eq!( buffer.content(), "add /music/some " );
        buffer.delete_word();
        buffer.delete_word();
        assert_eq!( buffer.content(), "" );
        buffer.delete_word();
        assert!( buffer.is_empty() );
    }


    #[test]
    fn test_take_resets() {
        let mut buffer = typed( "next" );
        assert_eq!( buffer.take(), "next" );
        assert!( buffer.is_empty() );
        buffer.insert( 'x' );
        assert_eq!( buffer.content(), "x" );
    }


    #[test]
    fn test_prompts() {
        assert_eq!( InputMode::Command.prompt(), ":" );
        assert_eq!( InputMode::Search { forward: false }.prompt(), "?" );
        assert_eq!( InputMode::MarkPattern { marked: false }.prompt(), "unmark regex: " );
    }
}
