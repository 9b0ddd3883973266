//! Entry lists and the store holding the filelist and the playlist.
//!
//! Every structural mutation bumps the list's generation counter so the
//! controller can tell when its shuffle bookkeeping is out of date. Marks
//! select a set of entries for the next remove, move or add; they follow
//! their entry through every reorder but do not count as mutations.

use std::collections::HashMap;
use std::path::{ Component, Path, PathBuf };
use std::sync::Arc;
use std::time::SystemTime;

use rand::seq::SliceRandom;
use rand::Rng;
use regex::Regex;
use thiserror::Error;

use crate::entry::Entry;
use crate::filelist;
use crate::tags::TagReader;


/// Errors raised by entry list operations.
#[derive( Debug, Error, PartialEq, Eq )]
pub enum StoreError {
    #[error( "Index {index} out of range for list of {len}" )]
    OutOfRange { index: usize, len: usize },

    #[error( "Not a directory: {0}" )]
    NotADirectory( PathBuf ),

    #[error( "Outside the restricted root: {0}" )]
    Restricted( PathBuf ),

    #[error( "No bookmark '{0}'" )]
    NoBookmark( char ),
}


/// Identifies one of the two lists.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum ListId {
    Filelist,
    Playlist,
}


/// Cursor movement.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum Motion {
    Up,
    Down,
    PageUp( usize ),
    PageDown( usize ),
    Home,
    End,
}


/// Result of removing an entry.
#[derive( Debug )]
pub struct Removal {
    pub entry: Arc<Entry>,
    /// True if the removed entry was the now-playing one.
    pub was_playing: bool,
}


/// Ordered entries with a cursor, a now-playing marker and marks.
#[derive( Debug, Default )]
pub struct EntryList {
    entries: Vec<Arc<Entry>>,
    /// One flag per entry.
    marks: Vec<bool>,
    cursor: Option<usize>,
    now_playing: Option<usize>,
    generation: u64,
}


impl EntryList {
    pub fn new() -> Self {
        Self::default()
    }


    pub fn list( &self ) -> &[Arc<Entry>] {
        &self.entries
    }


    pub fn get( &self, index: usize ) -> Option<&Arc<Entry>> {
        self.entries.get( index )
    }


    pub fn len( &self ) -> usize {
        self.entries.len()
    }


    pub fn is_empty( &self ) -> bool {
        self.entries.is_empty()
    }


    pub fn cursor( &self ) -> Option<usize> {
        self.cursor
    }


    pub fn now_playing( &self ) -> Option<usize> {
        self.now_playing
    }


    /// Mutation counter, bumped on every structural change.
    pub fn generation( &self ) -> u64 {
        self.generation
    }


    /// Entry under the cursor.
    pub fn selected( &self ) -> Option<&Arc<Entry>> {
        self.cursor.and_then( |i| self.entries.get( i ) )
    }


    /// Inserts an entry; `pos` may equal the length to append.
    pub fn insert( &mut self, pos: usize, entry: Entry ) -> Result<(), StoreError> {
        if pos > self.entries.len() {
            return Err( StoreError::OutOfRange { index: pos, len: self.entries.len() } );
        }

        self.entries.insert( pos, Arc::new( entry ) );
        self.marks.insert( pos, false );

        if let Some( playing ) = self.now_playing {
            if pos <= playing {
                self.now_playing = Some( playing + 1 );
            }
        }
        match self.cursor {
            None => self.cursor = Some( 0 ),
            Some( c ) if pos <= c && self.entries.len() > 1 => self.cursor = Some( c + 1 ),
            _ => {}
        }

        self.bump();
        Ok(())
    }


    /// Appends an entry.
    pub fn push( &mut self, entry: Entry ) {
        let len = self.entries.len();
        // Appending is always in range.
        let _ = self.insert( len, entry );
    }


    /// Appends entries built from locators; tags are read lazily later.
    pub fn append_locators<I, S>( &mut self, locators: I ) -> usize
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let before = self.entries.len();
        for locator in locators {
            self.push( Entry::new( locator ) );
        }
        self.entries.len() - before
    }


    /// Removes the entry at `pos`.
    pub fn remove( &mut self, pos: usize ) -> Result<Removal, StoreError> {
        if pos >= self.entries.len() {
            return Err( StoreError::OutOfRange { index: pos, len: self.entries.len() } );
        }

        let entry = self.entries.remove( pos );
        self.marks.remove( pos );

        let mut was_playing = false;
        if let Some( playing ) = self.now_playing {
            if pos < playing {
                self.now_playing = Some( playing - 1 );
            } else if pos == playing {
                self.now_playing = None;
                was_playing = true;
            }
        }

        self.cursor = match self.cursor {
            _ if self.entries.is_empty() => None,
            Some( c ) if pos < c => Some( c - 1 ),
            Some( c ) => Some( c.min( self.entries.len() - 1 ) ),
            None => Some( 0 ),
        };

        self.bump();
        Ok( Removal { entry, was_playing } )
    }


    /// Moves the entry at `from` so that it ends up at index `to`.
    pub fn move_entry( &mut self, from: usize, to: usize ) -> Result<(), StoreError> {
        let len = self.entries.len();
        if from >= len {
            return Err( StoreError::OutOfRange { index: from, len } );
        }
        if to >= len {
            return Err( StoreError::OutOfRange { index: to, len } );
        }
        if from == to {
            return Ok(());
        }

        let entry = self.entries.remove( from );
        self.entries.insert( to, entry );
        let mark = self.marks.remove( from );
        self.marks.insert( to, mark );

        let remap = |index: usize| -> usize {
            if index == from {
                to
            } else if from < index && index <= to {
                index - 1
            } else if to <= index && index < from {
                index + 1
            } else {
                index
            }
        };
        self.now_playing = self.now_playing.map( remap );
        self.cursor = self.cursor.map( remap );

        self.bump();
        Ok(())
    }


    /// Sets the cursor.
    pub fn set_cursor( &mut self, index: usize ) -> Result<(), StoreError> {
        if index >= self.entries.len() {
            return Err( StoreError::OutOfRange { index, len: self.entries.len() } );
        }
        self.cursor = Some( index );
        Ok(())
    }


    /// Sets or clears the now-playing marker.
    pub fn set_now_playing( &mut self, index: Option<usize> ) -> Result<(), StoreError> {
        if let Some( i ) = index {
            if i >= self.entries.len() {
                return Err( StoreError::OutOfRange { index: i, len: self.entries.len() } );
            }
        }
        self.now_playing = index;
        Ok(())
    }


    /// Removes every entry.
    pub fn clear( &mut self ) {
        self.entries.clear();
        self.marks.clear();
        self.cursor = None;
        self.now_playing = None;
        self.bump();
    }


    /// Replaces the contents, placing the cursor at `cursor` (clamped).
    pub fn replace( &mut self, entries: Vec<Entry>, cursor: usize ) {
        self.entries = entries.into_iter().map( Arc::new ).collect();
        self.marks = vec![ false; self.entries.len() ];
        self.now_playing = None;
        self.cursor = if self.entries.is_empty() {
            None
        } else {
            Some( cursor.min( self.entries.len() - 1 ) )
        };
        self.bump();
    }


    /// Moves the cursor. Single steps wrap around.
    pub fn move_cursor( &mut self, motion: Motion ) {
        let len = self.entries.len();
        if len == 0 {
            return;
        }
        let current = self.cursor.unwrap_or( 0 );
        let next = match motion {
            Motion::Up => ( current + len - 1 ) % len,
            Motion::Down => ( current + 1 ) % len,
            Motion::PageUp( page ) => current.saturating_sub( page.max( 1 ) ),
            Motion::PageDown( page ) => ( current + page.max( 1 ) ).min( len - 1 ),
            Motion::Home => 0,
            Motion::End => len - 1,
        };
        self.cursor = Some( next );
    }


    /// Sorts by display title, keeping the now-playing entry tracked.
    pub fn sort( &mut self, reader: &dyn TagReader ) {
        let playing = self.playing_entry();
        let mut rows = self.take_rows();
        rows.sort_by_cached_key( |( e, _ )| e.title( reader ).to_lowercase() );
        self.set_rows( rows );
        self.relocate_playing( playing );
        self.cursor = if self.entries.is_empty() { None } else { Some( 0 ) };
        self.bump();
    }


    /// Physically reorders the list at random.
    pub fn scramble<R: Rng + ?Sized>( &mut self, rng: &mut R ) {
        let playing = self.playing_entry();
        let mut rows = self.take_rows();
        rows.shuffle( rng );
        self.set_rows( rows );
        self.relocate_playing( playing );
        self.cursor = if self.entries.is_empty() { None } else { Some( 0 ) };
        self.bump();
    }


    pub fn is_marked( &self, index: usize ) -> bool {
        self.marks.get( index ).copied().unwrap_or( false )
    }


    pub fn has_marks( &self ) -> bool {
        self.marks.contains( &true )
    }


    /// Indices of the marked entries, in list order.
    pub fn marked( &self ) -> Vec<usize> {
        self.marks
            .iter()
            .enumerate()
            .filter_map( |( i, &marked )| marked.then_some( i ) )
            .collect()
    }


    pub fn marked_entries( &self ) -> Vec<Arc<Entry>> {
        self.marked().into_iter().map( |i| Arc::clone( &self.entries[ i ] ) ).collect()
    }


    /// Marks or unmarks the selected entry and steps the cursor down.
    pub fn mark_selected( &mut self, marked: bool ) {
        self.update_selected( |_| marked );
    }


    /// Flips the selected entry's mark and steps the cursor down.
    pub fn toggle_mark_selected( &mut self ) {
        self.update_selected( |marked| !marked );
    }


    /// Flips every mark.
    pub fn invert_marks( &mut self ) {
        self.marks.iter_mut().for_each( |m| *m = !*m );
    }


    pub fn clear_marks( &mut self ) {
        self.marks.iter_mut().for_each( |m| *m = false );
    }


    /// Sets the mark of every entry whose locator matches `pattern`.
    ///
    /// @returns the number of matching entries
    pub fn mark_matching( &mut self, pattern: &Regex, marked: bool ) -> usize {
        let mut count = 0;
        for ( entry, mark ) in self.entries.iter().zip( self.marks.iter_mut() ) {
            if pattern.is_match( entry.locator() ) {
                *mark = marked;
                count += 1;
            }
        }
        count
    }


    /// Removes every marked entry.
    ///
    /// @returns the removals, in list order
    pub fn remove_marked( &mut self ) -> Vec<Removal> {
        let mut removals = Vec::new();
        for index in self.marked().into_iter().rev() {
            // Indices come from the list and are removed back to front.
            if let Ok( removal ) = self.remove( index ) {
                removals.push( removal );
            }
        }
        removals.reverse();
        removals
    }


    /// Moves the marked entries, in order, next to the selected entry.
    ///
    /// Nothing happens when no entry is marked or the selected entry is
    /// itself marked. The cursor lands on the first moved entry.
    ///
    /// @returns true if entries were moved
    pub fn move_marked( &mut self, after: bool ) -> bool {
        let Some( cursor ) = self.cursor else { return false };
        if !self.has_marks() || self.is_marked( cursor ) {
            return false;
        }

        let anchor = Arc::clone( &self.entries[ cursor ] );
        let playing = self.playing_entry();
        let ( moved, mut rows ): ( Vec<_>, Vec<_> ) = self.take_rows()
            .into_iter()
            .partition( |( _, marked )| *marked );

        let at = rows
            .iter()
            .position( |( e, _ )| Arc::ptr_eq( e, &anchor ) )
            .map( |i| if after { i + 1 } else { i } )
            .unwrap_or( 0 );
        let tail = rows.split_off( at );
        rows.extend( moved );
        rows.extend( tail );

        self.set_rows( rows );
        self.relocate_playing( playing );
        self.cursor = Some( at );
        self.bump();
        true
    }


    fn update_selected( &mut self, update: impl FnOnce( bool ) -> bool ) {
        let Some( cursor ) = self.cursor else { return };
        if let Some( mark ) = self.marks.get_mut( cursor ) {
            *mark = update( *mark );
        }
        self.cursor = Some( ( cursor + 1 ).min( self.entries.len().saturating_sub( 1 ) ) );
    }


    fn playing_entry( &self ) -> Option<Arc<Entry>> {
        self.now_playing.map( |i| Arc::clone( &self.entries[ i ] ) )
    }


    fn take_rows( &mut self ) -> Vec<( Arc<Entry>, bool )> {
        self.entries.drain( .. ).zip( self.marks.drain( .. ) ).collect()
    }


    fn set_rows( &mut self, rows: Vec<( Arc<Entry>, bool )> ) {
        let ( entries, marks ): ( Vec<_>, Vec<_> ) = rows.into_iter().unzip();
        self.entries = entries;
        self.marks = marks;
    }


    fn relocate_playing( &mut self, playing: Option<Arc<Entry>> ) {
        self.now_playing = playing.and_then( |p| self.entries.iter().position( |e| Arc::ptr_eq( e, &p ) ) );
    }


    fn bump( &mut self ) {
        self.generation = self.generation.wrapping_add( 1 );
    }
}


/// Index of the next entry after `cursor` whose file name or title
/// contains `term`, case-insensitively. Wraps around.
pub fn find(
    entries: &[Arc<Entry>],
    cursor: Option<usize>,
    term: &str,
    forward: bool,
    reader: &dyn TagReader,
) -> Option<usize> {
    let len = entries.len();
    if len == 0 || term.is_empty() {
        return None;
    }

    let needle = term.to_lowercase();
    let start = cursor.unwrap_or( 0 );

    ( 1..=len )
        .map( |step| if forward { ( start + step ) % len } else { ( start + len * 2 - step ) % len } )
        .find( |&index| {
            let entry = &entries[ index ];
            format!( "{} {}", entry.file_name(), entry.title( reader ) )
                .to_lowercase()
                .contains( &needle )
        })
}


/// Holds the filelist (current directory) and the playlist.
#[derive( Debug )]
pub struct EntryStore {
    pub filelist: EntryList,
    pub playlist: EntryList,
    cwd: PathBuf,
    cwd_mtime: Option<SystemTime>,
    positions: HashMap<PathBuf, usize>,
    restricted_root: Option<PathBuf>,
    bookmarks: HashMap<char, ( PathBuf, usize )>,
    /// The filelist holds search results rather than `cwd`.
    search_results: bool,
}


impl EntryStore {
    /// Creates a store with the filelist showing `cwd`.
    pub fn new( cwd: PathBuf ) -> Self {
        let cwd = normalize( &cwd );
        let mut store = Self {
            filelist: EntryList::new(),
            playlist: EntryList::new(),
            bookmarks: HashMap::from( [ ( '\'', ( cwd.clone(), 0 ) ) ] ),
            cwd,
            cwd_mtime: None,
            positions: HashMap::new(),
            restricted_root: None,
            search_results: false,
        };
        store.relist( None );
        store
    }


    /// Prevents navigating above the current directory.
    pub fn restrict_to_cwd( &mut self ) {
        self.restricted_root = Some( self.cwd.clone() );
    }


    pub fn is_restricted( &self ) -> bool {
        self.restricted_root.is_some()
    }


    pub fn list( &self, id: ListId ) -> &EntryList {
        match id {
            ListId::Filelist => &self.filelist,
            ListId::Playlist => &self.playlist,
        }
    }


    pub fn list_mut( &mut self, id: ListId ) -> &mut EntryList {
        match id {
            ListId::Filelist => &mut self.filelist,
            ListId::Playlist => &mut self.playlist,
        }
    }


    /// Directory shown by the filelist.
    pub fn cwd( &self ) -> &Path {
        &self.cwd
    }


    /// Shows `dir` in the filelist.
    pub fn chdir( &mut self, dir: &Path ) -> Result<(), StoreError> {
        let target = normalize( &self.cwd.join( filelist::expand_home( dir ) ) );
        if !target.is_dir() {
            return Err( StoreError::NotADirectory( target ) );
        }
        if let Some( root ) = &self.restricted_root {
            if !target.starts_with( root ) {
                return Err( StoreError::Restricted( target ) );
            }
        }

        self.remember_position();
        self.cwd = target;
        let restored = self.positions.get( &self.cwd ).copied();
        self.relist( restored );
        Ok(())
    }


    /// Goes to the parent directory, selecting the directory we came from.
    /// From search results, goes back to the directory listing instead.
    pub fn parent( &mut self ) -> Result<(), StoreError> {
        if self.search_results {
            let restored = self.positions.get( &self.cwd ).copied();
            self.relist( restored );
            return Ok(());
        }

        let Some( parent ) = self.cwd.parent().map( Path::to_path_buf ) else {
            return Ok(());
        };
        if let Some( root ) = &self.restricted_root {
            if !parent.starts_with( root ) {
                return Err( StoreError::Restricted( parent ) );
            }
        }

        let came_from = self.cwd.clone();
        self.remember_position();
        self.cwd = parent;
        self.relist( None );

        let index = self.filelist.list().iter().position( |e| Path::new( e.locator() ) == came_from );
        if let Some( index ) = index {
            // Index comes from the list itself.
            let _ = self.filelist.set_cursor( index );
        }
        Ok(())
    }


    /// Re-reads the directory if it changed on disk.
    ///
    /// @returns true if the listing was rebuilt
    pub fn refresh( &mut self ) -> bool {
        if self.search_results {
            return false;
        }
        let mtime = filelist::modified( &self.cwd );
        if mtime.is_some() && mtime == self.cwd_mtime {
            return false;
        }
        let cursor = self.filelist.cursor();
        self.relist( cursor );
        true
    }


    /// Shows `entries` in the filelist in place of the directory listing.
    pub fn show_search_results( &mut self, entries: Vec<Entry> ) {
        self.remember_position();
        self.filelist.replace( entries, 0 );
        self.search_results = true;
    }


    pub fn is_search_results( &self ) -> bool {
        self.search_results
    }


    /// Remembers the current directory and filelist position under `key`.
    pub fn set_bookmark( &mut self, key: char ) {
        let cursor = self.filelist.cursor().unwrap_or( 0 );
        self.bookmarks.insert( key, ( self.cwd.clone(), cursor ) );
    }


    /// Returns to a bookmark. The position left behind is kept under `'`
    /// so that `'` jumps back.
    pub fn goto_bookmark( &mut self, key: char ) -> Result<(), StoreError> {
        let ( dir, cursor ) = self.bookmarks.get( &key ).cloned().ok_or( StoreError::NoBookmark( key ) )?;
        let here = ( self.cwd.clone(), self.filelist.cursor().unwrap_or( 0 ) );

        self.chdir( &dir )?;
        let last = self.filelist.len().saturating_sub( 1 );
        // Clamped to the current listing.
        let _ = self.filelist.set_cursor( cursor.min( last ) );
        self.bookmarks.insert( '\'', here );
        Ok(())
    }


    fn remember_position( &mut self ) {
        if self.search_results {
            return;
        }
        if let Some( cursor ) = self.filelist.cursor() {
            self.positions.insert( self.cwd.clone(), cursor );
        }
    }


    fn relist( &mut self, cursor: Option<usize> ) {
        self.search_results = false;
        self.cwd_mtime = filelist::modified( &self.cwd );
        let entries = match filelist::list_dir( &self.cwd ) {
            Ok( entries ) => entries,
            Err( e ) => {
                tracing::warn!( "Failed to read directory {:?}: {}", self.cwd, e );
                Vec::new()
            }
        };
        let mut listing = Vec::with_capacity( entries.len() + 1 );
        if self.cwd.parent().is_some() {
            listing.push( Entry::parent_link( &self.cwd ) );
        }
        listing.extend( entries );
        self.filelist.replace( listing, cursor.unwrap_or( 0 ) );
    }
}


/// Lexically normalizes a path, resolving `.` and `..` components.
pub fn normalize( path: &Path ) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push( ".." );
                }
            }
            other => out.push( other.as_os_str() ),
        }
    }
    if out.as_os_str().is_empty() {
        out.push( "." );
    }
    out
}


#[cfg( test )]
mod tests {
    use std::fs;

    use rand::rngs::StdRng;
    use rand::SeedableRng;

    use super::*;
    use crate::entry::EntryKind;
    use crate::tags::NoTags;


    fn list_of( names: &[&str] ) -> EntryList {
        let mut list = EntryList::new();
        for name in names {
            list.push( Entry::with_kind( format!( "/m/{}", name ), EntryKind::LocalFile ) );
        }
        list
    }


    fn names( list: &EntryList ) -> Vec<&str> {
        list.list().iter().map( |e| e.file_name() ).collect()
    }


    #[test]
    fn test_empty_list_has_no_cursor() {
        let mut list = EntryList::new();
        assert_eq!( list.cursor(), None );
        assert_eq!( list.now_playing(), None );

        list.push( Entry::with_kind( "/m/a", EntryKind::LocalFile ) );
        assert_eq!( list.cursor(), Some( 0 ) );

        list.remove( 0 ).unwrap();
        assert_eq!( list.cursor(), None );
    }


    #[test]
    fn test_out_of_range() {
        let mut list = list_of( &[ "a", "b" ] );
        assert_eq!(
            list.remove( 2 ).unwrap_err(),
            StoreError::OutOfRange { index: 2, len: 2 }
        );
        assert!( list.insert( 3, Entry::with_kind( "/m/x", EntryKind::LocalFile ) ).is_err() );
        assert!( list.move_entry( 0, 2 ).is_err() );
        assert!( list.set_cursor( 5 ).is_err() );
        assert!( list.set_now_playing( Some( 2 ) ).is_err() );
        assert!( list.insert( 2, Entry::with_kind( "/m/c", EntryKind::LocalFile ) ).is_ok() );
    }


    #[test]
    fn test_insert_before_playing_shifts_marker() {
        let mut list = list_of( &[ "a", "b", "c" ] );
        list.set_now_playing( Some( 1 ) ).unwrap();

        list.insert( 0, Entry::with_kind( "/m/z", EntryKind::LocalFile ) ).unwrap();
        assert_eq!( list.now_playing(), Some( 2 ) );
        assert_eq!( list.get( 2 ).unwrap().file_name(), "b" );

        list.insert( 3, Entry::with_kind( "/m/y", EntryKind::LocalFile ) ).unwrap();
        assert_eq!( list.now_playing(), Some( 2 ) );
    }


    #[test]
    fn test_remove_playing_signals() {
        let mut list = list_of( &[ "a", "b", "c" ] );
        list.set_now_playing( Some( 1 ) ).unwrap();

        let removal = list.remove( 0 ).unwrap();
        assert!( !removal.was_playing );
        assert_eq!( list.now_playing(), Some( 0 ) );

        let removal = list.remove( 0 ).unwrap();
        assert!( removal.was_playing );
        assert_eq!( removal.entry.file_name(), "b" );
        assert_eq!( list.now_playing(), None );
        assert_eq!( names( &list ), vec![ "c" ] );
    }


    #[test]
    fn test_move_tracks_playing_and_cursor() {
        let mut list = list_of( &[ "a", "b", "c", "d" ] );
        list.set_now_playing( Some( 0 ) ).unwrap();
        list.set_cursor( 2 ).unwrap();

        list.move_entry( 0, 3 ).unwrap();
        assert_eq!( names( &list ), vec![ "b", "c", "d", "a" ] );
        assert_eq!( list.now_playing(), Some( 3 ) );
        assert_eq!( list.cursor(), Some( 1 ) );

        list.move_entry( 2, 0 ).unwrap();
        assert_eq!( names( &list ), vec![ "d", "b", "c", "a" ] );
        assert_eq!( list.now_playing(), Some( 3 ) );
        assert_eq!( list.cursor(), Some( 2 ) );
    }


    #[test]
    fn test_generation_bumps_on_mutation() {
        let mut list = list_of( &[ "a", "b" ] );
        let before = list.generation();
        list.set_cursor( 1 ).unwrap();
        assert_eq!( list.generation(), before );
        list.move_entry( 0, 1 ).unwrap();
        assert!( list.generation() > before );
    }


    #[test]
    fn test_cursor_wraps() {
        let mut list = list_of( &[ "a", "b", "c" ] );
        list.move_cursor( Motion::Up );
        assert_eq!( list.cursor(), Some( 2 ) );
        list.move_cursor( Motion::Down );
        assert_eq!( list.cursor(), Some( 0 ) );
        list.move_cursor( Motion::PageDown( 10 ) );
        assert_eq!( list.cursor(), Some( 2 ) );
        list.move_cursor( Motion::Home );
        assert_eq!( list.cursor(), Some( 0 ) );
    }


    #[test]
    fn test_find_wraps_and_is_case_insensitive() {
        let list = list_of( &[ "Alpha.ogg", "beta.ogg", "ALPHABET.ogg" ] );
        let entries = list.list();
        assert_eq!( find( entries, Some( 0 ), "alpha", true, &NoTags ), Some( 2 ) );
        assert_eq!( find( entries, Some( 2 ), "alpha", true, &NoTags ), Some( 0 ) );
        assert_eq!( find( entries, Some( 0 ), "BETA", false, &NoTags ), Some( 1 ) );
        assert_eq!( find( entries, Some( 1 ), "gamma", true, &NoTags ), None );
        assert_eq!( find( entries, None, "", true, &NoTags ), None );
    }


    #[test]
    fn test_scramble_keeps_playing_entry() {
        let mut list = list_of( &[ "a", "b", "c", "d", "e" ] );
        list.set_now_playing( Some( 3 ) ).unwrap();
        let mut rng = StdRng::seed_from_u64( 7 );

        list.scramble( &mut rng );
        let playing = list.now_playing().unwrap();
        assert_eq!( list.get( playing ).unwrap().file_name(), "d" );
        assert_eq!( list.len(), 5 );
    }


    #[test]
    fn test_sort_by_title() {
        let mut list = list_of( &[ "c", "A", "b" ] );
        list.set_now_playing( Some( 0 ) ).unwrap();
        list.sort( &NoTags );
        assert_eq!( names( &list ), vec![ "A", "b", "c" ] );
        assert_eq!( list.now_playing(), Some( 2 ) );
    }


    #[test]
    fn test_marks_follow_entries() {
        let mut list = list_of( &[ "a", "b", "c", "d" ] );
        list.toggle_mark_selected();
        assert_eq!( list.cursor(), Some( 1 ) );
        list.set_cursor( 3 ).unwrap();
        list.mark_selected( true );
        assert_eq!( list.cursor(), Some( 3 ) );
        assert_eq!( list.marked(), vec![ 0, 3 ] );

        let before = list.generation();
        list.invert_marks();
        assert_eq!( list.marked(), vec![ 1, 2 ] );
        assert_eq!( list.generation(), before );

        list.move_entry( 1, 3 ).unwrap();
        assert_eq!( names( &list ), vec![ "a", "c", "d", "b" ] );
        assert_eq!( list.marked(), vec![ 1, 3 ] );

        list.sort( &NoTags );
        assert_eq!( list.marked(), vec![ 1, 2 ] );

        list.insert( 0, Entry::with_kind( "/m/z", EntryKind::LocalFile ) ).unwrap();
        assert_eq!( list.marked(), vec![ 2, 3 ] );
        list.remove( 2 ).unwrap();
        assert_eq!( list.marked(), vec![ 2 ] );
        assert_eq!( list.marked_entries()[ 0 ].file_name(), "c" );

        list.clear_marks();
        assert!( !list.has_marks() );
    }


    #[test]
    fn test_mark_matching_uses_regex() {
        let mut list = list_of( &[ "Blues.mp3", "rock.ogg", "blue.flac" ] );
        let pattern = regex::RegexBuilder::new( "blue" ).case_insensitive( true ).build().unwrap();
        assert_eq!( list.mark_matching( &pattern, true ), 2 );
        assert_eq!( list.marked(), vec![ 0, 2 ] );

        let flac = Regex::new( r"\.flac$" ).unwrap();
        assert_eq!( list.mark_matching( &flac, false ), 1 );
        assert_eq!( list.marked(), vec![ 0 ] );
    }


    #[test]
    fn test_remove_marked_reports_playing() {
        let mut list = list_of( &[ "a", "b", "c", "d", "e" ] );
        list.set_now_playing( Some( 2 ) ).unwrap();
        for index in [ 1, 2, 4 ] {
            list.set_cursor( index ).unwrap();
            list.mark_selected( true );
        }

        let removals = list.remove_marked();
        let removed: Vec<&str> = removals.iter().map( |r| r.entry.file_name() ).collect();
        assert_eq!( removed, vec![ "b", "c", "e" ] );
        assert!( removals[ 1 ].was_playing );
        assert_eq!( names( &list ), vec![ "a", "d" ] );
        assert_eq!( list.now_playing(), None );
        assert!( !list.has_marks() );
    }


    #[test]
    fn test_move_marked_next_to_cursor() {
        let mut list = list_of( &[ "a", "b", "c", "d", "e" ] );
        list.set_now_playing( Some( 0 ) ).unwrap();
        list.set_cursor( 0 ).unwrap();
        list.mark_selected( true );
        list.set_cursor( 2 ).unwrap();
        list.mark_selected( true );

        list.set_cursor( 3 ).unwrap();
        assert!( list.move_marked( true ) );
        assert_eq!( names( &list ), vec![ "b", "d", "a", "c", "e" ] );
        assert_eq!( list.cursor(), Some( 2 ) );
        assert_eq!( list.now_playing(), Some( 2 ) );

        list.set_cursor( 0 ).unwrap();
        assert!( list.move_marked( false ) );
        assert_eq!( names( &list ), vec![ "a", "c", "b", "d", "e" ] );
        assert_eq!( list.cursor(), Some( 0 ) );
    }


    #[test]
    fn test_move_marked_onto_marked_does_nothing() {
        let mut list = list_of( &[ "a", "b", "c" ] );
        assert!( !list.move_marked( true ) );

        list.mark_selected( true );
        list.set_cursor( 0 ).unwrap();
        let before = list.generation();
        assert!( !list.move_marked( false ) );
        assert_eq!( names( &list ), vec![ "a", "b", "c" ] );
        assert_eq!( list.generation(), before );
    }


    #[test]
    fn test_search_results_and_back() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir( root.join( "albums" ) ).unwrap();
        fs::create_dir( root.join( "singles" ) ).unwrap();

        let mut store = EntryStore::new( root.to_path_buf() );
        store.filelist.set_cursor( 2 ).unwrap();
        store.show_search_results( vec![ Entry::with_kind( "/x/found.mp3", EntryKind::LocalFile ) ] );
        assert!( store.is_search_results() );
        assert_eq!( store.filelist.len(), 1 );
        assert!( !store.refresh() );

        store.parent().unwrap();
        assert!( !store.is_search_results() );
        assert_eq!( store.cwd(), root );
        assert_eq!( store.filelist.selected().unwrap().file_name(), "singles" );
    }


    #[test]
    fn test_bookmarks_jump_and_return() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir( root.join( "albums" ) ).unwrap();
        fs::write( root.join( "albums" ).join( "one.mp3" ), b"" ).unwrap();
        fs::write( root.join( "albums" ).join( "two.mp3" ), b"" ).unwrap();

        let mut store = EntryStore::new( root.to_path_buf() );
        store.chdir( Path::new( "albums" ) ).unwrap();
        store.filelist.set_cursor( 2 ).unwrap();
        store.set_bookmark( 'a' );

        store.parent().unwrap();
        store.goto_bookmark( 'a' ).unwrap();
        assert_eq!( store.cwd(), root.join( "albums" ) );
        assert_eq!( store.filelist.selected().unwrap().file_name(), "two.mp3" );

        store.goto_bookmark( '\'' ).unwrap();
        assert_eq!( store.cwd(), root );
        assert_eq!( store.filelist.selected().unwrap().file_name(), "albums" );

        assert_eq!( store.goto_bookmark( 'z' ), Err( StoreError::NoBookmark( 'z' ) ) );
    }


    #[test]
    fn test_store_navigation() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir( root.join( "albums" ) ).unwrap();
        fs::create_dir( root.join( "singles" ) ).unwrap();
        fs::write( root.join( "albums" ).join( "one.mp3" ), b"" ).unwrap();
        fs::write( root.join( "notes.txt" ), b"" ).unwrap();

        let mut store = EntryStore::new( root.to_path_buf() );
        let listed: Vec<&str> = store.filelist.list().iter().map( |e| e.file_name() ).collect();
        assert_eq!( listed, vec![ "..", "albums", "singles" ] );

        store.chdir( Path::new( "albums" ) ).unwrap();
        assert_eq!( store.cwd(), root.join( "albums" ) );
        let listed: Vec<&str> = store.filelist.list().iter().map( |e| e.file_name() ).collect();
        assert_eq!( listed, vec![ "..", "one.mp3" ] );

        store.parent().unwrap();
        assert_eq!( store.cwd(), root );
        assert_eq!( store.filelist.selected().unwrap().file_name(), "albums" );
    }


    #[test]
    fn test_restricted_root() {
        let dir = tempfile::tempdir().unwrap();
        let mut store = EntryStore::new( dir.path().to_path_buf() );
        store.restrict_to_cwd();
        assert!( matches!( store.parent(), Err( StoreError::Restricted( _ ) ) ) );
        assert!( matches!( store.chdir( Path::new( "/" ) ), Err( StoreError::Restricted( _ ) ) ) );
    }


    #[test]
    fn test_normalize() {
        assert_eq!( normalize( Path::new( "/a/b/../c/./d" ) ), PathBuf::from( "/a/c/d" ) );
        assert_eq!( normalize( Path::new( "/a/.." ) ), PathBuf::from( "/" ) );
    }
}
