//! Abstract commands and the line protocol.
//!
//! Every input source (keys, the `:` prompt, the control socket) produces
//! [`Command`] values. Lines typed at the prompt or sent over the socket
//! are parsed with [`Command::parse`]; verbs are case-insensitive.

use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use crate::mode::Repeat;
use crate::store::{ ListId, Motion };


/// Step used by `forward` and `backward`.
pub const SEEK_STEP_SECS: i64 = 10;

/// Highest volume level.
pub const MAX_VOLUME: u8 = 100;


/// Errors that can occur during command parsing.
#[derive( Debug, Error, PartialEq, Eq )]
pub enum CommandError {
    #[error( "Unknown command: {0}" )]
    Unknown( String ),

    #[error( "Invalid argument: {0}" )]
    InvalidArgument( String ),

    #[error( "Missing argument: {0}" )]
    MissingArgument( String ),
}


/// Seek destination.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum SeekTarget {
    /// Seconds relative to the current position.
    Relative( i64 ),
    /// Position from the start of the track.
    Absolute( Duration ),
}


/// Volume change.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum VolumeChange {
    Set( u8 ),
    Step( i16 ),
}


impl VolumeChange {
    /// Applies the change to `current`, clamping to 0..=100.
    pub fn apply( self, current: u8 ) -> u8 {
        match self {
            VolumeChange::Set( level ) => level.min( MAX_VOLUME ),
            VolumeChange::Step( delta ) => {
                ( current as i16 + delta ).clamp( 0, MAX_VOLUME as i16 ) as u8
            }
        }
    }
}


/// Abstract playback and list command.
#[derive( Debug, Clone, PartialEq )]
pub enum Command {
    // Playback
    Play,
    PlaySelected { list: ListId },
    TogglePause,
    Resume,
    Stop,
    ToggleStop,
    Next,
    Prev,
    Seek( SeekTarget ),
    Volume( VolumeChange ),
    Repeat( Option<Repeat> ),
    Shuffle( Option<bool> ),
    StopAfter,

    // Playlist
    Add { path: String },
    AddSelected,
    Load { path: String },
    Remove,
    Clear,
    MoveSelected { delta: isize },
    Sort,
    Scramble,
    Save { path: String },
    JumpToActive,

    // Marks
    ToggleMark { list: ListId },
    SetMark { list: ListId, marked: bool },
    InvertMarks { list: ListId },
    MarkMatching { list: ListId, pattern: String, marked: bool },

    // Navigation
    Cursor { list: ListId, motion: Motion },
    Search { list: ListId, term: String, forward: bool },
    Goto { path: String },
    Parent,
    Refresh,
    FindRecursive { pattern: String },
    SetBookmark( char ),
    GotoBookmark( char ),

    Quit,
}


impl FromStr for Repeat {
    type Err = CommandError;


    fn from_str( s: &str ) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "off" | "0" => Ok( Repeat::Off ),
            "one" | "1" => Ok( Repeat::One ),
            "all" | "2" => Ok( Repeat::All ),
            _ => Err( CommandError::InvalidArgument(
                format!( "Invalid repeat mode: '{}'. Use 'off', 'one', or 'all'", s )
            )),
        }
    }
}


impl Command {
    /// Parses a protocol line.
    ///
    /// @param input - One line, without the trailing newline
    ///
    /// @returns The parsed command or an error
    pub fn parse( input: &str ) -> Result<Self, CommandError> {
        let input = input.trim();
        let mut parts = input.splitn( 2, char::is_whitespace );
        let cmd = parts.next().unwrap_or( "" ).to_lowercase();
        let args = parts.next().map( str::trim ).filter( |s| !s.is_empty() );

        match cmd.as_str() {
            // Playback
            "play" => Ok( Command::Play ),
            "pause" => Ok( Command::TogglePause ),
            "resume" | "unpause" => Ok( Command::Resume ),
            "stop" => Ok( Command::Stop ),
            "next" => Ok( Command::Next ),
            "prev" | "previous" => Ok( Command::Prev ),
            "forward" => Ok( Command::Seek( SeekTarget::Relative( SEEK_STEP_SECS ) ) ),
            "backward" => Ok( Command::Seek( SeekTarget::Relative( -SEEK_STEP_SECS ) ) ),
            "seek" => {
                let arg = args
                    .ok_or_else( || CommandError::MissingArgument( "time position".into() ) )?;
                Ok( Command::Seek( parse_seek( arg )? ) )
            }
            "volume" | "vol" => {
                let arg = args
                    .ok_or_else( || CommandError::MissingArgument( "volume level".into() ) )?;
                Ok( Command::Volume( parse_volume( arg )? ) )
            }
            "repeat" => {
                let mode = args.map( str::parse ).transpose()?;
                Ok( Command::Repeat( mode ) )
            }
            "shuffle" | "random" => {
                let on = args.map( parse_switch ).transpose()?;
                Ok( Command::Shuffle( on ) )
            }

            // Playlist
            "add" => {
                let path = args
                    .ok_or_else( || CommandError::MissingArgument( "path".into() ) )?;
                Ok( Command::Add { path: path.to_string() } )
            }
            "load" => {
                let path = args
                    .ok_or_else( || CommandError::MissingArgument( "path".into() ) )?;
                Ok( Command::Load { path: path.to_string() } )
            }
            "save" => {
                let path = args
                    .ok_or_else( || CommandError::MissingArgument( "path".into() ) )?;
                Ok( Command::Save { path: path.to_string() } )
            }
            "empty" | "clear" => Ok( Command::Clear ),
            "sort" => Ok( Command::Sort ),
            "scramble" => Ok( Command::Scramble ),
            "mark" | "unmark" => {
                let pattern = args
                    .ok_or_else( || CommandError::MissingArgument( "pattern".into() ) )?;
                Ok( Command::MarkMatching {
                    list: ListId::Playlist,
                    pattern: pattern.to_string(),
                    marked: cmd == "mark",
                })
            }

            // Navigation
            "goto" | "cd" => {
                let path = args
                    .ok_or_else( || CommandError::MissingArgument( "path".into() ) )?;
                Ok( Command::Goto { path: path.to_string() } )
            }
            "find" => {
                let pattern = args
                    .ok_or_else( || CommandError::MissingArgument( "pattern".into() ) )?;
                Ok( Command::FindRecursive { pattern: pattern.to_string() } )
            }

            "quit" | "exit" => Ok( Command::Quit ),

            "" => Err( CommandError::Unknown( "empty command".into() ) ),
            other => Err( CommandError::Unknown( other.to_string() ) ),
        }
    }
}


/// Parses `+N`, `-N` (relative seconds), `N` or `M:SS` (absolute).
fn parse_seek( s: &str ) -> Result<SeekTarget, CommandError> {
    if let Some( rest ) = s.strip_prefix( '+' ) {
        return Ok( SeekTarget::Relative( parse_secs( rest )? ) );
    }
    if let Some( rest ) = s.strip_prefix( '-' ) {
        return Ok( SeekTarget::Relative( -parse_secs( rest )? ) );
    }
    Ok( SeekTarget::Absolute( parse_time( s )? ) )
}


fn parse_secs( s: &str ) -> Result<i64, CommandError> {
    parse_time( s ).map( |d| d.as_secs() as i64 )
}


/// Parses `N` (clamped to 100) or `+N`/`-N` steps.
fn parse_volume( s: &str ) -> Result<VolumeChange, CommandError> {
    let invalid = || CommandError::InvalidArgument( format!( "Invalid volume: {}", s ) );

    if s.starts_with( '+' ) || s.starts_with( '-' ) {
        let delta: i64 = s.parse().map_err( |_| invalid() )?;
        let delta = delta.clamp( -( MAX_VOLUME as i64 ), MAX_VOLUME as i64 ) as i16;
        return Ok( VolumeChange::Step( delta ) );
    }

    let level: u64 = s.parse().map_err( |_| invalid() )?;
    Ok( VolumeChange::Set( level.min( MAX_VOLUME as u64 ) as u8 ) )
}


fn parse_switch( s: &str ) -> Result<bool, CommandError> {
    match s.to_lowercase().as_str() {
        "on" | "1" | "true" => Ok( true ),
        "off" | "0" | "false" => Ok( false ),
        _ => Err( CommandError::InvalidArgument( format!( "Expected on/off: {}", s ) ) ),
    }
}


/// Parses a time string like "1:30" or "90" into a Duration.
///
/// @param s - Time string in format "MM:SS", "M:SS", or just seconds
///
/// @returns Duration or error
pub fn parse_time( s: &str ) -> Result<Duration, CommandError> {
    let s = s.trim();

    if let Some(( min, sec )) = s.split_once( ':' ) {
        let minutes: u64 = min.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid minutes: {}", min ) ) )?;
        let seconds: u64 = sec.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid seconds: {}", sec ) ) )?;
        Ok( Duration::from_secs( minutes * 60 + seconds ) )
    } else {
        let seconds: u64 = s.parse()
            .map_err( |_| CommandError::InvalidArgument( format!( "Invalid time: {}", s ) ) )?;
        Ok( Duration::from_secs( seconds ) )
    }
}


/// Returns help text listing the line commands.
pub fn help_text() -> &'static str {
    r#"Commands (prompt with : or over the control socket):
  play | pause | resume | stop   Playback control
  next | prev                    Change track
  forward | backward             Seek 10 seconds
  seek <+N|-N|N|M:SS>            Seek relative or absolute
  volume <N|+N|-N>               Set volume (0-100)
  add <path|url>                 Append to playlist
  load <path>                    Replace playlist
  save <path>                    Write playlist as m3u
  empty | clear                  Clear playlist
  sort | scramble                Reorder playlist
  mark | unmark <regex>          Mark playlist entries by path
  repeat [off|one|all]           Set or cycle repeat
  shuffle [on|off]               Set or toggle shuffle
  goto <dir>                     Show directory in filelist
  find <regex>                   Search below the filelist directory
  quit                           Exit mcplay"#
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_playback_verbs() {
        assert_eq!( Command::parse( "PAUSE" ).unwrap(), Command::TogglePause );
        assert_eq!( Command::parse( "resume" ).unwrap(), Command::Resume );
        assert_eq!( Command::parse( " next " ).unwrap(), Command::Next );
        assert_eq!( Command::parse( "prev" ).unwrap(), Command::Prev );
        assert_eq!( Command::parse( "quit" ).unwrap(), Command::Quit );
    }


    #[test]
    fn test_parse_seek() {
        assert_eq!(
            Command::parse( "seek 1:30" ).unwrap(),
            Command::Seek( SeekTarget::Absolute( Duration::from_secs( 90 ) ) )
        );
        assert_eq!(
            Command::parse( "seek +15" ).unwrap(),
            Command::Seek( SeekTarget::Relative( 15 ) )
        );
        assert_eq!(
            Command::parse( "seek -5" ).unwrap(),
            Command::Seek( SeekTarget::Relative( -5 ) )
        );
        assert_eq!(
            Command::parse( "backward" ).unwrap(),
            Command::Seek( SeekTarget::Relative( -10 ) )
        );
        assert!( matches!( Command::parse( "seek soon" ), Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_volume_is_clamped() {
        assert_eq!( Command::parse( "volume 200" ).unwrap(), Command::Volume( VolumeChange::Set( 100 ) ) );
        assert_eq!( Command::parse( "volume 40" ).unwrap(), Command::Volume( VolumeChange::Set( 40 ) ) );
        assert_eq!( Command::parse( "volume -10" ).unwrap(), Command::Volume( VolumeChange::Step( -10 ) ) );
        assert!( Command::parse( "volume loud" ).is_err() );

        assert_eq!( VolumeChange::Step( 30 ).apply( 90 ), 100 );
        assert_eq!( VolumeChange::Step( -30 ).apply( 10 ), 0 );
        assert_eq!( VolumeChange::Set( 250 ).apply( 10 ), 100 );
    }


    #[test]
    fn test_parse_repeat_and_shuffle() {
        assert_eq!( Command::parse( "repeat all" ).unwrap(), Command::Repeat( Some( Repeat::All ) ) );
        assert_eq!( Command::parse( "repeat" ).unwrap(), Command::Repeat( None ) );
        assert_eq!( Command::parse( "shuffle on" ).unwrap(), Command::Shuffle( Some( true ) ) );
        assert_eq!( Command::parse( "shuffle" ).unwrap(), Command::Shuffle( None ) );
        assert!( Command::parse( "shuffle maybe" ).is_err() );
    }


    #[test]
    fn test_parse_paths_keep_spaces() {
        assert_eq!(
            Command::parse( "add /music/Some Band/track 01.mp3" ).unwrap(),
            Command::Add { path: "/music/Some Band/track 01.mp3".into() }
        );
        assert_eq!( Command::parse( "empty" ).unwrap(), Command::Clear );
    }


    #[test]
    fn test_parse_mark_and_find() {
        assert_eq!(
            Command::parse( "mark Blues|Jazz" ).unwrap(),
            Command::MarkMatching { list: ListId::Playlist, pattern: "Blues|Jazz".into(), marked: true }
        );
        assert_eq!(
            Command::parse( "UNMARK \\.ogg$" ).unwrap(),
            Command::MarkMatching { list: ListId::Playlist, pattern: "\\.ogg$".into(), marked: false }
        );
        assert_eq!(
            Command::parse( "find live at" ).unwrap(),
            Command::FindRecursive { pattern: "live at".into() }
        );
        assert!( matches!( Command::parse( "find" ), Err( CommandError::MissingArgument( _ ) ) ) );
        assert!( matches!( Command::parse( "mark" ), Err( CommandError::MissingArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_unknown() {
        assert!( matches!( Command::parse( "foobar" ), Err( CommandError::Unknown( _ ) ) ) );
        assert!( matches!( Command::parse( "" ), Err( CommandError::Unknown( _ ) ) ) );
    }


    #[test]
    fn test_parse_missing_arg() {
        assert!( matches!( Command::parse( "add" ), Err( CommandError::MissingArgument( _ ) ) ) );
        assert!( matches!( Command::parse( "load   " ), Err( CommandError::MissingArgument( _ ) ) ) );
    }
}
