//! Playlist files.
//!
//! Reads m3u and pls playlists into locators and writes m3u.

use std::fs::File;
use std::io::{ BufRead, BufReader, Write };
use std::path::{ Path, PathBuf };

use thiserror::Error;

use crate::entry::{ is_url, Entry };


/// Errors that can occur with playlist files.
#[derive( Debug, Error )]
pub enum PlaylistError {
    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "Unsupported playlist format: {0}" )]
    InvalidFormat( PathBuf ),
}


/// Loads a playlist file, dispatching on its extension.
pub fn load( path: &Path ) -> Result<Vec<String>, PlaylistError> {
    let ext = path.extension()
        .and_then( |e| e.to_str() )
        .map( str::to_lowercase );

    let file = File::open( path )?;
    let reader = BufReader::new( file );
    let base = path.parent().unwrap_or( Path::new( "." ) );

    let locators = match ext.as_deref() {
        Some( "m3u" ) => parse_m3u( reader, base )?,
        Some( "pls" ) => parse_pls( reader, base )?,
        _ => return Err( PlaylistError::InvalidFormat( path.to_path_buf() ) ),
    };

    tracing::info!( "Loaded {} entries from {:?}", locators.len(), path );
    Ok( locators )
}


/// Parses m3u lines. Comments and blank lines are skipped, relative paths
/// resolve against `base`.
pub fn parse_m3u<R: BufRead>( reader: R, base: &Path ) -> Result<Vec<String>, PlaylistError> {
    let mut locators = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim();

        if trimmed.is_empty() || trimmed.starts_with( '#' ) {
            continue;
        }
        locators.push( resolve( trimmed, base ) );
    }
    Ok( locators )
}


/// Parses pls `FileN=` lines; titles and lengths are ignored.
pub fn parse_pls<R: BufRead>( reader: R, base: &Path ) -> Result<Vec<String>, PlaylistError> {
    let mut locators = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let Some(( key, value )) = line.trim().split_once( '=' ) else { continue };

        if is_file_key( key ) && !value.trim().is_empty() {
            locators.push( resolve( value.trim(), base ) );
        }
    }
    Ok( locators )
}


/// Matches `FileN` keys, case-insensitively.
fn is_file_key( key: &str ) -> bool {
    match ( key.get( ..4 ), key.get( 4.. ) ) {
        ( Some( prefix ), Some( number ) ) => {
            prefix.eq_ignore_ascii_case( "file" )
                && !number.is_empty()
                && number.chars().all( |c| c.is_ascii_digit() )
        }
        _ => false,
    }
}


/// Saves entries as m3u, appending `.m3u` when the name lacks it.
///
/// @returns the path actually written
pub fn save<'a, I>( path: &Path, entries: I ) -> Result<PathBuf, PlaylistError>
where
    I: IntoIterator<Item = &'a Entry>,
{
    let path = with_m3u_extension( path );
    let mut file = File::create( &path )?;

    writeln!( file, "#EXTM3U" )?;
    for entry in entries {
        writeln!( file, "{}", entry.locator() )?;
    }

    tracing::info!( "Saved playlist to {:?}", path );
    Ok( path )
}


fn with_m3u_extension( path: &Path ) -> PathBuf {
    let has_ext = path.extension()
        .and_then( |e| e.to_str() )
        .map( |e| e.eq_ignore_ascii_case( "m3u" ) )
        .unwrap_or( false );
    if has_ext {
        path.to_path_buf()
    } else {
        let mut name = path.as_os_str().to_owned();
        name.push( ".m3u" );
        PathBuf::from( name )
    }
}


fn resolve( line: &str, base: &Path ) -> String {
    if is_url( line ) {
        return fix_url( line );
    }
    let path = Path::new( line );
    if path.is_absolute() {
        line.to_string()
    } else {
        base.join( path ).to_string_lossy().into_owned()
    }
}


/// Ensures a URL has a path after its host (`http://host` -> `http://host/`).
fn fix_url( url: &str ) -> String {
    match url.split_once( "://" ) {
        Some(( scheme, rest )) if !rest.contains( '/' ) => format!( "{}://{}/", scheme, rest ),
        _ => url.to_string(),
    }
}


#[cfg( test )]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::entry::EntryKind;


    #[test]
    fn test_m3u_skips_comments_and_resolves() {
        let text = "#EXTM3U\n\n#EXTINF:123,Band - Song\nsong.mp3\n/abs/other.ogg\nhttp://radio.example\n";
        let locators = parse_m3u( Cursor::new( text ), Path::new( "/lists" ) ).unwrap();
        assert_eq!( locators, vec![
            "/lists/song.mp3".to_string(),
            "/abs/other.ogg".to_string(),
            "http://radio.example/".to_string(),
        ]);
    }


    #[test]
    fn test_pls_file_lines() {
        let text = "[playlist]\nNumberOfEntries=2\nFile1=a.mp3\nTitle1=A\nfile2=http://radio.example/s\nLength1=-1\n";
        let locators = parse_pls( Cursor::new( text ), Path::new( "/lists" ) ).unwrap();
        assert_eq!( locators, vec![
            "/lists/a.mp3".to_string(),
            "http://radio.example/s".to_string(),
        ]);
    }


    #[test]
    fn test_pls_ignores_non_ascii_keys() {
        let text = "[playlist]\nabcé=x\nFileé=y\nFil€1=z\nFile=w\nFile1=a.mp3\n";
        let locators = parse_pls( Cursor::new( text ), Path::new( "/lists" ) ).unwrap();
        assert_eq!( locators, vec![ "/lists/a.mp3".to_string() ] );
    }


    #[test]
    fn test_invalid_utf8_playlist_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "broken.pls" );
        std::fs::write( &path, b"[playlist]\nFile1=\xff\xfe.mp3\n" ).unwrap();
        assert!( matches!( load( &path ), Err( PlaylistError::Io( _ ) ) ) );
    }


    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let entries = vec![
            Entry::with_kind( "/music/a.mp3", EntryKind::LocalFile ),
            Entry::with_kind( "http://radio.example/live", EntryKind::Url ),
        ];

        let written = save( &dir.path().join( "mix" ), entries.iter() ).unwrap();
        assert_eq!( written, dir.path().join( "mix.m3u" ) );

        let text = std::fs::read_to_string( &written ).unwrap();
        assert!( text.starts_with( "#EXTM3U\n" ) );

        let loaded = load( &written ).unwrap();
        assert_eq!( loaded, vec![ "/music/a.mp3", "http://radio.example/live" ] );
    }


    #[test]
    fn test_unknown_extension() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "list.txt" );
        std::fs::write( &path, "a.mp3\n" ).unwrap();
        assert!( matches!( load( &path ), Err( PlaylistError::InvalidFormat( _ ) ) ) );
    }
}
