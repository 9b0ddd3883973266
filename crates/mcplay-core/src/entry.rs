//! Track entries.
//!
//! An [`Entry`] is a single addressable track reference: a local file,
//! a directory placeholder in the filelist, a URL or a playlist file.
//! Entries are immutable apart from their tag cache, which is filled at
//! most once on first display.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use crate::tags::{ TagReader, Tags };


/// Extensions recognised as playlist files.
const PLAYLIST_EXTENSIONS: &[&str] = &[ "m3u", "pls" ];


/// What an entry points at.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum EntryKind {
    LocalFile,
    Directory,
    Url,
    Playlist,
}


impl EntryKind {
    /// Classifies a locator.
    ///
    /// URLs are recognised by their scheme separator, directories by a
    /// filesystem lookup and playlists by extension.
    pub fn classify( locator: &str ) -> Self {
        if is_url( locator ) {
            EntryKind::Url
        } else if Path::new( locator ).is_dir() {
            EntryKind::Directory
        } else if is_playlist_file( locator ) {
            EntryKind::Playlist
        } else {
            EntryKind::LocalFile
        }
    }


    /// Returns true if entries of this kind can be handed to a player.
    pub fn is_playable( self ) -> bool {
        matches!( self, EntryKind::LocalFile | EntryKind::Url )
    }
}


/// A single track reference.
#[derive( Debug )]
pub struct Entry {
    locator: String,
    kind: EntryKind,
    tags: OnceLock<Option<Tags>>,
}


impl Entry {
    /// Creates an entry, classifying the locator.
    pub fn new( locator: impl Into<String> ) -> Self {
        let locator = locator.into();
        let kind = EntryKind::classify( &locator );
        Self::with_kind( locator, kind )
    }


    /// Creates an entry with a known kind (skips the filesystem lookup).
    pub fn with_kind( locator: impl Into<String>, kind: EntryKind ) -> Self {
        Self {
            locator: locator.into(),
            kind,
            tags: OnceLock::new(),
        }
    }


    /// Creates the `..` entry used at the top of a filelist.
    pub fn parent_link( cwd: &Path ) -> Self {
        let entry = Self::with_kind( cwd.join( ".." ).to_string_lossy().into_owned(), EntryKind::Directory );
        // Directories never carry tags.
        let _ = entry.tags.set( None );
        entry
    }


    pub fn locator( &self ) -> &str {
        &self.locator
    }


    pub fn kind( &self ) -> EntryKind {
        self.kind
    }


    /// Returns true for the `..` link of a filelist.
    pub fn is_parent_link( &self ) -> bool {
        self.kind == EntryKind::Directory && self.locator.ends_with( "/.." )
    }


    /// The last path component, or the whole locator for URLs.
    pub fn file_name( &self ) -> &str {
        if self.kind == EntryKind::Url {
            return &self.locator;
        }
        if self.is_parent_link() {
            return "..";
        }
        Path::new( &self.locator )
            .file_name()
            .and_then( |n| n.to_str() )
            .unwrap_or( &self.locator )
    }


    /// Returns the cached tags, reading them on first use.
    ///
    /// Reading is best effort: a failed read is cached as "no tags" and
    /// never retried for this entry.
    pub fn tags( &self, reader: &dyn TagReader ) -> Option<&Tags> {
        self.tags
            .get_or_init( || {
                if self.kind.is_playable() {
                    reader.fetch( &self.locator )
                } else {
                    None
                }
            })
            .as_ref()
    }


    /// Returns the cached tags without triggering a read.
    pub fn cached_tags( &self ) -> Option<&Tags> {
        self.tags.get().and_then( |t| t.as_ref() )
    }


    /// Display title: "Artist - Title" when tagged, the file name otherwise.
    pub fn title( &self, reader: &dyn TagReader ) -> String {
        if self.kind == EntryKind::Url {
            return self.locator.clone();
        }
        self.tags( reader )
            .and_then( Tags::display )
            .unwrap_or_else( || self.file_name().to_string() )
    }


    /// Track length if the tag reader could determine it.
    pub fn duration( &self, reader: &dyn TagReader ) -> Option<Duration> {
        self.tags( reader ).and_then( |t| t.duration )
    }
}


/// Returns true if the locator carries a URL scheme.
pub fn is_url( locator: &str ) -> bool {
    locator.split_once( "://" )
        .map( |( scheme, _ )| !scheme.is_empty() && scheme.chars().all( |c| c.is_ascii_alphanumeric() || c == '+' ) )
        .unwrap_or( false )
}


/// Returns true if the name has a playlist extension.
pub fn is_playlist_file( name: &str ) -> bool {
    Path::new( name )
        .extension()
        .and_then( |e| e.to_str() )
        .map( |e| PLAYLIST_EXTENSIONS.contains( &e.to_lowercase().as_str() ) )
        .unwrap_or( false )
}


#[cfg( test )]
mod tests {
    use std::sync::atomic::{ AtomicUsize, Ordering };

    use super::*;


    struct CountingReader {
        calls: AtomicUsize,
    }


    impl TagReader for CountingReader {
        fn fetch( &self, _locator: &str ) -> Option<Tags> {
            self.calls.fetch_add( 1, Ordering::SeqCst );
            Some( Tags {
                title: Some( "Song".into() ),
                artist: Some( "Band".into() ),
                album: None,
                duration: Some( Duration::from_secs( 200 ) ),
            })
        }
    }


    #[test]
    fn test_classify_url_and_playlist() {
        assert_eq!( EntryKind::classify( "http://radio.example/stream" ), EntryKind::Url );
        assert_eq!( EntryKind::classify( "/nonexistent/mix.M3U" ), EntryKind::Playlist );
        assert_eq!( EntryKind::classify( "/nonexistent/song.ogg" ), EntryKind::LocalFile );
        assert_eq!( EntryKind::classify( "/" ), EntryKind::Directory );
    }


    #[test]
    fn test_tags_fill_once() {
        let reader = CountingReader { calls: AtomicUsize::new( 0 ) };
        let entry = Entry::with_kind( "/music/a.ogg", EntryKind::LocalFile );

        assert!( entry.cached_tags().is_none() );
        assert_eq!( entry.title( &reader ), "Band - Song" );
        assert_eq!( entry.title( &reader ), "Band - Song" );
        assert_eq!( entry.duration( &reader ), Some( Duration::from_secs( 200 ) ) );
        assert_eq!( reader.calls.load( Ordering::SeqCst ), 1 );
    }


    #[test]
    fn test_title_falls_back_to_file_name() {
        let entry = Entry::with_kind( "/music/untagged.flac", EntryKind::LocalFile );
        assert_eq!( entry.title( &crate::tags::NoTags ), "untagged.flac" );
    }


    #[test]
    fn test_parent_link_name() {
        let entry = Entry::parent_link( Path::new( "/music/albums" ) );
        assert!( entry.is_parent_link() );
        assert_eq!( entry.file_name(), ".." );
        assert_eq!( entry.locator(), "/music/albums/.." );
    }


    #[test]
    fn test_url_title_is_locator() {
        let reader = CountingReader { calls: AtomicUsize::new( 0 ) };
        let entry = Entry::new( "http://radio.example/live" );
        assert_eq!( entry.title( &reader ), "http://radio.example/live" );
        assert_eq!( reader.calls.load( Ordering::SeqCst ), 0 );
    }
}
