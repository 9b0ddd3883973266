//! Directory listing and recursive expansion.
//!
//! Lists a directory for the filelist, searches below it and expands
//! directories, playlist files and URLs into flat sequences of playable
//! entries.

use std::collections::HashSet;
use std::path::{ Path, PathBuf };
use std::time::SystemTime;

use regex::Regex;
use thiserror::Error;

use crate::entry::{ is_playlist_file, is_url, Entry, EntryKind };
use crate::playlist::{ self, PlaylistError };


/// Extensions handed to the player.
const PLAYABLE_EXTENSIONS: &[&str] = &[
    "mp1", "mp2", "mp3", "mp4", "ogg", "oga", "flac", "spx", "mpc", "mpp",
    "mod", "xm", "s3m", "it", "med", "mtm", "stm", "669", "wav", "wma",
    "m4a", "m4b", "aif", "aiff", "au", "cdr", "opus", "aac", "alac", "flv",
];


/// Errors that can occur while listing or expanding.
#[derive( Debug, Error )]
pub enum ScanError {
    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "Path not found: {0}" )]
    NotFound( PathBuf ),

    #[error( "Playlist error: {0}" )]
    Playlist( #[from] PlaylistError ),
}


/// Checks if a file has a playable extension.
pub fn is_playable_file( path: &Path ) -> bool {
    path.extension()
        .and_then( |e| e.to_str() )
        .map( |e| PLAYABLE_EXTENSIONS.contains( &e.to_lowercase().as_str() ) )
        .unwrap_or( false )
}


/// Lists a directory: subdirectories first, then playable and playlist
/// files, each group sorted case-insensitively. Hidden names are skipped.
///
/// The `..` link is not included; the store adds it.
pub fn list_dir( dir: &Path ) -> Result<Vec<Entry>, ScanError> {
    let read = match std::fs::read_dir( dir ) {
        Ok( r ) => r,
        Err( e ) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err( ScanError::NotFound( dir.to_path_buf() ) );
        }
        Err( e ) => return Err( ScanError::Io( e ) ),
    };

    let mut dirs = Vec::new();
    let mut files = Vec::new();

    for item in read.flatten() {
        let name = item.file_name().to_string_lossy().to_string();
        if name.starts_with( '.' ) {
            continue;
        }

        let path = item.path();
        let locator = path.to_string_lossy().into_owned();
        if path.is_dir() {
            dirs.push( ( name.to_lowercase(), Entry::with_kind( locator, EntryKind::Directory ) ) );
        } else if is_playlist_file( &name ) {
            files.push( ( name.to_lowercase(), Entry::with_kind( locator, EntryKind::Playlist ) ) );
        } else if is_playable_file( &path ) {
            files.push( ( name.to_lowercase(), Entry::with_kind( locator, EntryKind::LocalFile ) ) );
        }
    }

    dirs.sort_by( |a, b| a.0.cmp( &b.0 ) );
    files.sort_by( |a, b| a.0.cmp( &b.0 ) );

    Ok( dirs.into_iter().chain( files ).map( |( _, e )| e ).collect() )
}


/// Expands a locator into playable locators.
///
/// Directories are walked recursively in listing order, playlist files
/// are parsed, URLs and plain files pass through unchanged.
pub fn expand( locator: &str ) -> Result<Vec<String>, ScanError> {
    if is_url( locator ) {
        return Ok( vec![ locator.to_string() ] );
    }

    let path = expand_home( Path::new( locator ) );
    if path.is_dir() {
        tracing::info!( "Scanning: {:?}", path );
        let mut out = Vec::new();
        expand_dir( &path, &mut out )?;
        tracing::info!( "Found {} tracks", out.len() );
        return Ok( out );
    }

    if is_playlist_file( locator ) {
        return Ok( playlist::load( &path )? );
    }

    if !path.exists() {
        return Err( ScanError::NotFound( path ) );
    }
    Ok( vec![ path.to_string_lossy().into_owned() ] )
}


fn expand_dir( dir: &Path, out: &mut Vec<String> ) -> Result<(), ScanError> {
    let entries = match list_dir( dir ) {
        Ok( e ) => e,
        Err( ScanError::Io( e ) ) if e.kind() == std::io::ErrorKind::PermissionDenied => {
            tracing::warn!( "Access denied: {:?}", dir );
            return Ok(());
        }
        Err( e ) => return Err( e ),
    };

    for entry in entries {
        match entry.kind() {
            EntryKind::Directory => expand_dir( Path::new( entry.locator() ), out )?,
            EntryKind::LocalFile => out.push( entry.locator().to_string() ),
            // Playlists inside directories are not followed.
            EntryKind::Playlist | EntryKind::Url => {}
        }
    }
    Ok(())
}


/// Searches below `dir` for entries whose file name matches `pattern`.
///
/// A matching directory is reported and not descended into; every other
/// directory is searched. Unreadable directories are skipped.
pub fn search( dir: &Path, pattern: &Regex ) -> Vec<Entry> {
    let mut found = Vec::new();
    let mut seen = HashSet::new();
    search_dir( dir, pattern, &mut seen, &mut found );
    tracing::debug!( "Search for {:?} under {:?}: {} matches", pattern.as_str(), dir, found.len() );
    found
}


fn search_dir( dir: &Path, pattern: &Regex, seen: &mut HashSet<PathBuf>, found: &mut Vec<Entry> ) {
    // Symlinked directories may loop back.
    let real = std::fs::canonicalize( dir ).unwrap_or_else( |_| dir.to_path_buf() );
    if !seen.insert( real ) {
        return;
    }

    let entries = match list_dir( dir ) {
        Ok( entries ) => entries,
        Err( e ) => {
            tracing::debug!( "Skipping {:?} in search: {}", dir, e );
            return;
        }
    };

    for entry in entries {
        if pattern.is_match( entry.file_name() ) {
            found.push( entry );
        } else if entry.kind() == EntryKind::Directory {
            search_dir( Path::new( entry.locator() ), pattern, seen, found );
        }
    }
}


/// Replaces a leading `~` with the home directory.
pub fn expand_home( path: &Path ) -> PathBuf {
    let Ok( rest ) = path.strip_prefix( "~" ) else {
        return path.to_path_buf();
    };
    match dirs::home_dir() {
        Some( home ) => home.join( rest ),
        None => path.to_path_buf(),
    }
}


/// Modification time of a path, if it can be read.
pub fn modified( path: &Path ) -> Option<SystemTime> {
    std::fs::metadata( path ).and_then( |m| m.modified() ).ok()
}


#[cfg( test )]
mod tests {
    use std::fs;

    use super::*;


    #[test]
    fn test_list_dir_orders_and_filters() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir( root.join( "Zeta" ) ).unwrap();
        fs::create_dir( root.join( "alpha" ) ).unwrap();
        fs::create_dir( root.join( ".hidden" ) ).unwrap();
        fs::write( root.join( "b.MP3" ), b"" ).unwrap();
        fs::write( root.join( "A.flac" ), b"" ).unwrap();
        fs::write( root.join( "mix.m3u" ), b"" ).unwrap();
        fs::write( root.join( "cover.jpg" ), b"" ).unwrap();

        let entries = list_dir( root ).unwrap();
        let names: Vec<&str> = entries.iter().map( |e| e.file_name() ).collect();
        assert_eq!( names, vec![ "alpha", "Zeta", "A.flac", "b.MP3", "mix.m3u" ] );
        assert_eq!( entries[ 4 ].kind(), EntryKind::Playlist );
    }


    #[test]
    fn test_expand_recurses() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all( root.join( "disc1" ) ).unwrap();
        fs::write( root.join( "disc1" ).join( "01.ogg" ), b"" ).unwrap();
        fs::write( root.join( "disc1" ).join( "02.ogg" ), b"" ).unwrap();
        fs::write( root.join( "bonus.mp3" ), b"" ).unwrap();
        fs::write( root.join( "readme.txt" ), b"" ).unwrap();

        let found = expand( root.to_str().unwrap() ).unwrap();
        let names: Vec<String> = found
            .iter()
            .map( |l| Path::new( l ).strip_prefix( root ).unwrap().to_string_lossy().into_owned() )
            .collect();
        assert_eq!( names, vec![ "disc1/01.ogg", "disc1/02.ogg", "bonus.mp3" ] );
    }


    #[test]
    fn test_search_matches_names_below() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all( root.join( "rock" ).join( "Live Blues" ) ).unwrap();
        fs::create_dir_all( root.join( "jazz" ) ).unwrap();
        fs::write( root.join( "rock" ).join( "Live Blues" ).join( "01.mp3" ), b"" ).unwrap();
        fs::write( root.join( "rock" ).join( "blues_jam.ogg" ), b"" ).unwrap();
        fs::write( root.join( "jazz" ).join( "BLUES.flac" ), b"" ).unwrap();
        fs::write( root.join( "jazz" ).join( "blues.txt" ), b"" ).unwrap();

        let pattern = regex::RegexBuilder::new( "blues" ).case_insensitive( true ).build().unwrap();
        let mut names: Vec<String> = search( root, &pattern )
            .iter()
            .map( |e| e.file_name().to_string() )
            .collect();
        names.sort();
        assert_eq!( names, vec![ "BLUES.flac", "Live Blues", "blues_jam.ogg" ] );
    }


    #[test]
    fn test_expand_url_and_missing() {
        assert_eq!( expand( "http://radio.example/a" ).unwrap(), vec![ "http://radio.example/a" ] );
        assert!( matches!( expand( "/nonexistent/track.mp3" ), Err( ScanError::NotFound( _ ) ) ) );
    }


    #[test]
    fn test_expand_home() {
        assert_eq!( expand_home( Path::new( "/abs/path" ) ), PathBuf::from( "/abs/path" ) );
        if let Some( home ) = dirs::home_dir() {
            assert_eq!( expand_home( Path::new( "~/music" ) ), home.join( "music" ) );
        }
    }
}
