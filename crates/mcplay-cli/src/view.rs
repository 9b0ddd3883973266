//! View mode management for the TUI.
//!
//! Defines the views available in the application and how list entries
//! and times are presented.

use std::time::Duration;

use mcplay_core::{ Entry, EntryKind, TagReader };


/// Current view mode of the application.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum ViewMode {
    /// Filelist view - the current directory.
    Filelist,

    /// Playlist view - main view showing the playlist.
    #[default]
    Playlist,

    /// Help overlay - shows available keys and commands.
    Help,
}


impl ViewMode {
    /// Returns the other list view (Help stays on Help until dismissed).
    pub fn next_tab( self ) -> Self {
        match self {
            ViewMode::Filelist => ViewMode::Playlist,
            ViewMode::Playlist => ViewMode::Filelist,
            ViewMode::Help => ViewMode::Help,
        }
    }


    pub fn title( self ) -> &'static str {
        match self {
            ViewMode::Filelist => "FILELIST",
            ViewMode::Playlist => "PLAYLIST",
            ViewMode::Help => "HELP",
        }
    }
}


/// How entries are labelled in the lists.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum Listing {
    #[default]
    FileName,
    Path,
    Tags,
}


impl Listing {
    /// Returns the next listing style.
    pub fn next( self ) -> Self {
        match self {
            Listing::FileName => Listing::Path,
            Listing::Path => Listing::Tags,
            Listing::Tags => Listing::FileName,
        }
    }


    pub fn name( self ) -> &'static str {
        match self {
            Listing::FileName => "filename",
            Listing::Path => "path",
            Listing::Tags => "tags",
        }
    }


    /// Text shown for `entry`. Directories get a trailing slash.
    pub fn label( self, entry: &Entry, tags: &dyn TagReader ) -> String {
        if entry.is_parent_link() {
            return "../".to_string();
        }
        let text = match self {
            Listing::FileName => entry.file_name().to_string(),
            Listing::Path => entry.locator().to_string(),
            Listing::Tags => entry.title( tags ),
        };
        if entry.kind() == EntryKind::Directory {
            format!( "{}/", text )
        } else {
            text
        }
    }
}


/// Which time the counter shows.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum Counter {
    #[default]
    Elapsed,
    Remaining,
}


impl Counter {
    pub fn toggle( self ) -> Self {
        match self {
            Counter::Elapsed => Counter::Remaining,
            Counter::Remaining => Counter::Elapsed,
        }
    }


    /// Counter text for `position` in a track of `length`.
    pub fn format( self, position: Duration, length: Option<Duration> ) -> String {
        match ( self, length ) {
            ( Counter::Remaining, Some( length ) ) => {
                format!( "-{}", format_time( length.saturating_sub( position ) ) )
            }
            _ => format_time( position ),
        }
    }
}


/// Formats as `M:SS`, or `H:MM:SS` past an hour.
pub fn format_time( time: Duration ) -> String {
    let secs = time.as_secs();
    let ( hours, mins, secs ) = ( secs / 3600, ( secs / 60 ) % 60, secs % 60 );
    if hours > 0 {
        format!( "{}:{:02}:{:02}", hours, mins, secs )
    } else {
        format!( "{}:{:02}", mins, secs )
    }
}


#[cfg( test )]
mod tests {
    use std::path::Path;

    use mcplay_core::NoTags;

    use super::*;


    #[test]
    fn test_format_time() {
        assert_eq!( format_time( Duration::from_secs( 0 ) ), "0:00" );
        assert_eq!( format_time( Duration::from_secs( 75 ) ), "1:15" );
        assert_eq!( format_time( Duration::from_secs( 3725 ) ), "1:02:05" );
    }


    #[test]
    fn test_counter() {
        let pos = Duration::from_secs( 30 );
        assert_eq!( Counter::Elapsed.format( pos, Some( Duration::from_secs( 90 ) ) ), "0:30" );
        assert_eq!( Counter::Remaining.format( pos, Some( Duration::from_secs( 90 ) ) ), "-1:00" );
        assert_eq!( Counter::Remaining.format( pos, None ), "0:30" );
    }


    #[test]
    fn test_labels() {
        let song = Entry::with_kind( "/music/a/song.mp3", EntryKind::LocalFile );
        let dir = Entry::with_kind( "/music/a", EntryKind::Directory );
        let up = Entry::parent_link( Path::new( "/music/a" ) );

        assert_eq!( Listing::FileName.label( &song, &NoTags ), "song.mp3" );
        assert_eq!( Listing::Path.label( &song, &NoTags ), "/music/a/song.mp3" );
        assert_eq!( Listing::FileName.label( &dir, &NoTags ), "a/" );
        assert_eq!( Listing::Tags.label( &up, &NoTags ), "../" );
    }


    #[test]
    fn test_tab_cycle() {
        assert_eq!( ViewMode::Filelist.next_tab(), ViewMode::Playlist );
        assert_eq!( ViewMode::Playlist.next_tab(), ViewMode::Filelist );
        assert_eq!( ViewMode::Help.next_tab(), ViewMode::Help );
        assert_eq!( Listing::Tags.next(), Listing::FileName );
    }
}
